//! Content generation and multi-channel delivery.

pub mod content;
pub mod dispatcher;
pub mod transport;

pub use dispatcher::{ChannelDelivery, ChannelDispatcher, DeliveryOutcome};
pub use transport::{ChannelTransport, PushGatewayClient, RealtimeBroadcaster};

//! Notification delivery pipeline for the staff-operations backend.
//!
//! Decides, for every job-lifecycle event, whether a notification may be
//! sent, to whom, through which channels, and records the outcome.

pub mod directory;
pub mod pipeline;

pub use directory::RecipientDirectory;
pub use pipeline::{JobEventRequest, NotificationPipeline};

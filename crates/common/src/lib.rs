//! Shared types, configuration, and ports for the notification pipeline.

pub mod config;
pub mod error;
pub mod store;
pub mod types;

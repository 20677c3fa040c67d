//! Time-windowed, hierarchical rate limiting for the notification pipeline.

pub mod bucket;
pub mod limiter;

pub use bucket::FixedWindowBucket;
pub use limiter::{RateLimiter, UserSnapshots, load_user_snapshots, user_bucket_key};

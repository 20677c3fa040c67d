use thiserror::Error;

/// Common error types used across the pipeline.
///
/// Quota rejections and blocked duplicates are deliberately not here:
/// they are expected outcomes, reported as structured values. The
/// directory and transport ports return `anyhow::Result` instead.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Counter store error: {0}")]
    Store(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Configuration error: {0}")]
    Config(String),
}

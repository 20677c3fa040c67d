use std::collections::HashMap;

use serde::Deserialize;

use crate::error::RelayError;
use crate::types::EventKind;

/// Per-event-kind throughput limits: a 60s window plus an independent 10s
/// burst window.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct EventKindLimits {
    pub max_per_minute: u32,
    pub burst_limit: u32,
}

impl Default for EventKindLimits {
    fn default() -> Self {
        Self {
            max_per_minute: 10,
            burst_limit: 3,
        }
    }
}

/// Rate limiter quotas, most restrictive scopes first.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum notifications in flight at once.
    pub max_concurrent: u32,
    /// Global fixed 1s window.
    pub max_per_second: u32,
    /// Per-recipient fixed windows.
    pub user_per_minute: u32,
    pub user_per_hour: u32,
    pub user_per_day: u32,
    /// Per-event-kind overrides; kinds not listed fall back to
    /// [`RateLimitConfig::kind_limits`] defaults.
    pub kind_overrides: HashMap<EventKind, EventKindLimits>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 50,
            max_per_second: 25,
            user_per_minute: 10,
            user_per_hour: 60,
            user_per_day: 200,
            kind_overrides: HashMap::new(),
        }
    }
}

impl RateLimitConfig {
    /// Effective limits for an event kind: explicit override, else the
    /// built-in per-kind default, else the generic fallback entry.
    pub fn kind_limits(&self, kind: EventKind) -> EventKindLimits {
        if let Some(limits) = self.kind_overrides.get(&kind) {
            return *limits;
        }
        match kind {
            EventKind::JobAssigned => EventKindLimits {
                max_per_minute: 20,
                burst_limit: 5,
            },
            EventKind::JobStatusChanged => EventKindLimits {
                max_per_minute: 30,
                burst_limit: 10,
            },
            EventKind::Emergency => EventKindLimits {
                max_per_minute: 5,
                burst_limit: 2,
            },
            _ => EventKindLimits::default(),
        }
    }
}

/// Deduplication gate timing.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct DedupConfig {
    /// How long an identical notification identity stays handled.
    pub window_secs: i64,
    /// After this long a `pending` event is presumed abandoned.
    pub stale_pending_grace_secs: i64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_secs: 300,
            stale_pending_grace_secs: 120,
        }
    }
}

impl DedupConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_secs)
    }

    pub fn stale_pending_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_pending_grace_secs)
    }
}

/// Static pipeline configuration, loaded once at startup.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    pub rate_limits: RateLimitConfig,
    pub dedup: DedupConfig,
    /// Per-channel dispatch timeout in milliseconds.
    pub dispatch_timeout_ms: Option<u64>,
}

impl PipelineConfig {
    pub const DEFAULT_DISPATCH_TIMEOUT_MS: u64 = 5_000;

    pub fn dispatch_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(
            self.dispatch_timeout_ms
                .unwrap_or(Self::DEFAULT_DISPATCH_TIMEOUT_MS),
        )
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, RelayError> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();
        config.rate_limits.max_concurrent = env_u32("RELAY_MAX_CONCURRENT", 50)?;
        config.rate_limits.max_per_second = env_u32("RELAY_MAX_PER_SECOND", 25)?;
        config.rate_limits.user_per_minute = env_u32("RELAY_USER_PER_MINUTE", 10)?;
        config.rate_limits.user_per_hour = env_u32("RELAY_USER_PER_HOUR", 60)?;
        config.rate_limits.user_per_day = env_u32("RELAY_USER_PER_DAY", 200)?;
        config.dedup.window_secs = env_u32("RELAY_DEDUP_WINDOW_SECS", 300)? as i64;
        config.dedup.stale_pending_grace_secs =
            env_u32("RELAY_STALE_PENDING_GRACE_SECS", 120)? as i64;
        config.dispatch_timeout_ms = Some(env_u32(
            "RELAY_DISPATCH_TIMEOUT_MS",
            Self::DEFAULT_DISPATCH_TIMEOUT_MS as u32,
        )? as u64);
        Ok(config)
    }
}

fn env_u32(name: &str, default: u32) -> Result<u32, RelayError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| RelayError::Config(format!("{} must be a valid u32", name))),
        Err(_) => Ok(default),
    }
}

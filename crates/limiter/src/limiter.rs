//! Hierarchical rate limiter for notification delivery.
//!
//! Scopes are checked most restrictive first and short-circuit:
//!
//! 1. Global concurrent (live counter, not windowed)
//! 2. Global per-second
//! 3. Per-recipient minute → hour → day
//! 4. Per-event-kind minute + 10s burst
//!
//! On rejection nothing is incremented. When every check passes, all
//! consulted counters increment in the same non-suspending call; callers
//! on multi-threaded runtimes wrap the limiter in a mutex so check and
//! increment stay atomic relative to concurrent checks.
//!
//! Per-recipient buckets are persisted best-effort to the counter store so
//! quotas survive restarts; in-memory state is authoritative in between.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use relay_common::config::RateLimitConfig;
use relay_common::store::{BucketSnapshot, CounterStore};
use relay_common::types::{EventKind, Priority, RateDecision};

use crate::bucket::FixedWindowBucket;

/// Minute/hour/day windows for one recipient.
#[derive(Debug, Clone)]
struct UserBuckets {
    minute: FixedWindowBucket,
    hour: FixedWindowBucket,
    day: FixedWindowBucket,
}

impl UserBuckets {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            minute: FixedWindowBucket::new(now, Duration::minutes(1)),
            hour: FixedWindowBucket::new(now, Duration::hours(1)),
            day: FixedWindowBucket::new(now, Duration::days(1)),
        }
    }
}

/// Minute + burst windows for one event kind.
#[derive(Debug, Clone)]
struct KindBuckets {
    minute: FixedWindowBucket,
    burst: FixedWindowBucket,
}

impl KindBuckets {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            minute: FixedWindowBucket::new(now, Duration::seconds(60)),
            burst: FixedWindowBucket::new(now, Duration::seconds(10)),
        }
    }
}

/// Persisted per-recipient bucket state, loaded before a first check.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserSnapshots {
    pub minute: Option<BucketSnapshot>,
    pub hour: Option<BucketSnapshot>,
    pub day: Option<BucketSnapshot>,
}

pub fn user_bucket_key(recipient_id: &str, window: &str) -> String {
    format!("ratelimit:user:{}:{}", recipient_id, window)
}

/// Load persisted buckets for a recipient. Best-effort: store failures
/// are logged and read as "no snapshot".
pub async fn load_user_snapshots(store: &dyn CounterStore, recipient_id: &str) -> UserSnapshots {
    let mut snapshots = UserSnapshots::default();
    for (window, slot) in [
        ("minute", &mut snapshots.minute),
        ("hour", &mut snapshots.hour),
        ("day", &mut snapshots.day),
    ] {
        let key = user_bucket_key(recipient_id, window);
        match store.load(&key).await {
            Ok(snapshot) => *slot = snapshot,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Counter load failed; starting fresh");
            }
        }
    }
    snapshots
}

/// In-memory rate limiter owning all buckets keyed by scope + recipient.
pub struct RateLimiter {
    config: RateLimitConfig,
    store: Option<Arc<dyn CounterStore>>,
    in_flight: u32,
    global_second: FixedWindowBucket,
    users: HashMap<String, UserBuckets>,
    kinds: HashMap<EventKind, KindBuckets>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, store: Option<Arc<dyn CounterStore>>) -> Self {
        let now = Utc::now();
        Self {
            config,
            store,
            in_flight: 0,
            global_second: FixedWindowBucket::new(now, Duration::seconds(1)),
            users: HashMap::new(),
            kinds: HashMap::new(),
        }
    }

    pub fn has_user(&self, recipient_id: &str) -> bool {
        self.users.contains_key(recipient_id)
    }

    /// Seed a recipient's buckets from persisted snapshots. No-op when the
    /// recipient is already tracked; expired snapshots are discarded.
    pub fn hydrate_user(&mut self, recipient_id: &str, snapshots: UserSnapshots, now: DateTime<Utc>) {
        if self.users.contains_key(recipient_id) {
            return;
        }
        let mut buckets = UserBuckets::new(now);
        if let Some(s) = snapshots.minute.filter(|s| now < s.window_end) {
            buckets.minute = FixedWindowBucket::from_snapshot(s, Duration::minutes(1));
        }
        if let Some(s) = snapshots.hour.filter(|s| now < s.window_end) {
            buckets.hour = FixedWindowBucket::from_snapshot(s, Duration::hours(1));
        }
        if let Some(s) = snapshots.day.filter(|s| now < s.window_end) {
            buckets.day = FixedWindowBucket::from_snapshot(s, Duration::days(1));
        }
        self.users.insert(recipient_id.to_string(), buckets);
    }

    /// Run the hierarchical check. When every scope admits the request,
    /// every consulted counter is incremented before returning; on
    /// rejection nothing is incremented.
    pub fn check(
        &mut self,
        recipient_id: &str,
        kind: EventKind,
        priority: Priority,
        now: DateTime<Utc>,
    ) -> RateDecision {
        // 1. Concurrency ceiling
        if self.in_flight >= self.config.max_concurrent {
            return Self::rejected(
                "Max concurrent notifications in flight".to_string(),
                1,
                self.in_flight,
                self.config.max_concurrent,
                now + Duration::seconds(1),
            );
        }

        // 2. Global per-second window
        self.global_second.roll(now);
        if self.global_second.at_capacity(self.config.max_per_second) {
            return Self::rejected(
                "Global per-second limit exceeded".to_string(),
                self.global_second.retry_after(now),
                self.global_second.count(),
                self.config.max_per_second,
                self.global_second.window_end(),
            );
        }

        // 3. Per-recipient windows, minute → hour → day. Urgent traffic
        // gets twice the minute cap but stays bounded; other scopes apply
        // unchanged.
        let minute_limit = if priority == Priority::Urgent {
            self.config.user_per_minute * 2
        } else {
            self.config.user_per_minute
        };
        let user = self
            .users
            .entry(recipient_id.to_string())
            .or_insert_with(|| UserBuckets::new(now));
        user.minute.roll(now);
        user.hour.roll(now);
        user.day.roll(now);
        if user.minute.at_capacity(minute_limit) {
            return Self::rejected(
                "User per-minute limit exceeded".to_string(),
                user.minute.retry_after(now),
                user.minute.count(),
                minute_limit,
                user.minute.window_end(),
            );
        }
        if user.hour.at_capacity(self.config.user_per_hour) {
            return Self::rejected(
                "User per-hour limit exceeded".to_string(),
                user.hour.retry_after(now),
                user.hour.count(),
                self.config.user_per_hour,
                user.hour.window_end(),
            );
        }
        if user.day.at_capacity(self.config.user_per_day) {
            return Self::rejected(
                "User per-day limit exceeded".to_string(),
                user.day.retry_after(now),
                user.day.count(),
                self.config.user_per_day,
                user.day.window_end(),
            );
        }

        // 4. Per-event-kind minute + burst windows
        let limits = self.config.kind_limits(kind);
        let kind_buckets = self
            .kinds
            .entry(kind)
            .or_insert_with(|| KindBuckets::new(now));
        kind_buckets.minute.roll(now);
        kind_buckets.burst.roll(now);
        if kind_buckets.minute.at_capacity(limits.max_per_minute) {
            return Self::rejected(
                format!("Event type {} per-minute limit exceeded", kind),
                kind_buckets.minute.retry_after(now),
                kind_buckets.minute.count(),
                limits.max_per_minute,
                kind_buckets.minute.window_end(),
            );
        }
        if kind_buckets.burst.at_capacity(limits.burst_limit) {
            return Self::rejected(
                format!("Event type {} burst limit exceeded", kind),
                kind_buckets.burst.retry_after(now),
                kind_buckets.burst.count(),
                limits.burst_limit,
                kind_buckets.burst.window_end(),
            );
        }

        // 5. Admitted: increment every consulted counter in one step.
        self.in_flight += 1;
        self.global_second.increment();
        user.minute.increment();
        user.hour.increment();
        user.day.increment();
        kind_buckets.minute.increment();
        kind_buckets.burst.increment();

        RateDecision {
            allowed: true,
            reason: None,
            retry_after_secs: None,
            current_count: user.minute.count(),
            limit: minute_limit,
            reset_at: user.minute.window_end(),
        }
    }

    /// Refund the counters consumed by an admit whose request was then
    /// blocked downstream as a duplicate. Duplicates never consume quota.
    pub fn release(&mut self, recipient_id: &str, kind: EventKind) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.global_second.decrement();
        if let Some(user) = self.users.get_mut(recipient_id) {
            user.minute.decrement();
            user.hour.decrement();
            user.day.decrement();
        }
        if let Some(kind_buckets) = self.kinds.get_mut(&kind) {
            kind_buckets.minute.decrement();
            kind_buckets.burst.decrement();
        }
    }

    /// Called when an in-flight send finishes, success or failure.
    pub fn notification_complete(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight
    }

    /// Number of recipients currently tracked (for monitoring).
    pub fn tracked_users(&self) -> usize {
        self.users.len()
    }

    /// Evict recipients whose day window has fully expired. Windowed
    /// global and per-kind buckets are bounded and roll in place.
    pub fn sweep(&mut self, now: DateTime<Utc>) {
        let before = self.users.len();
        self.users.retain(|_, buckets| !buckets.day.is_expired(now));
        let evicted = before - self.users.len();
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted expired rate-limit buckets");
        }
    }

    /// Current persisted form of a recipient's buckets.
    pub fn user_snapshots(&self, recipient_id: &str) -> Vec<(String, BucketSnapshot)> {
        match self.users.get(recipient_id) {
            Some(buckets) => vec![
                (user_bucket_key(recipient_id, "minute"), buckets.minute.snapshot()),
                (user_bucket_key(recipient_id, "hour"), buckets.hour.snapshot()),
                (user_bucket_key(recipient_id, "day"), buckets.day.snapshot()),
            ],
            None => Vec::new(),
        }
    }

    /// Persist a recipient's buckets as a background task. Fire-and-forget:
    /// a failed save is logged and never fails the in-memory decision. The
    /// handle is returned so tests can await completion.
    pub fn spawn_persist(&self, recipient_id: &str) -> Option<tokio::task::JoinHandle<()>> {
        let store = self.store.clone()?;
        let entries = self.user_snapshots(recipient_id);
        if entries.is_empty() {
            return None;
        }
        Some(tokio::spawn(async move {
            for (key, snapshot) in entries {
                if let Err(e) = store.save(&key, &snapshot).await {
                    tracing::warn!(
                        key = %key,
                        error = %e,
                        "Counter persistence failed; in-memory state remains authoritative"
                    );
                }
            }
        }))
    }

    fn rejected(
        reason: String,
        retry_after_secs: i64,
        current_count: u32,
        limit: u32,
        reset_at: DateTime<Utc>,
    ) -> RateDecision {
        RateDecision {
            allowed: false,
            reason: Some(reason),
            retry_after_secs: Some(retry_after_secs),
            current_count,
            limit,
            reset_at,
        }
    }
}

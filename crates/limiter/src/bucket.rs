//! Fixed-window counters.
//!
//! A bucket is a count plus its time window. Windows are fixed, not
//! sliding: the bucket resets wholesale (count = 0, window re-anchored at
//! `now`) the first time it is consulted at or past its window end.

use chrono::{DateTime, Duration, Utc};

use relay_common::store::BucketSnapshot;

#[derive(Debug, Clone)]
pub struct FixedWindowBucket {
    count: u32,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    length: Duration,
}

impl FixedWindowBucket {
    pub fn new(now: DateTime<Utc>, length: Duration) -> Self {
        Self {
            count: 0,
            window_start: now,
            window_end: now + length,
            length,
        }
    }

    /// Rebuild a bucket from persisted state. The caller is responsible
    /// for discarding snapshots whose window has already passed.
    pub fn from_snapshot(snapshot: BucketSnapshot, length: Duration) -> Self {
        Self {
            count: snapshot.count,
            window_start: snapshot.window_start,
            window_end: snapshot.window_end,
            length,
        }
    }

    /// Reset the bucket if its window has fully elapsed.
    pub fn roll(&mut self, now: DateTime<Utc>) {
        if now >= self.window_end {
            self.count = 0;
            self.window_start = now;
            self.window_end = now + self.length;
        }
    }

    pub fn at_capacity(&self, limit: u32) -> bool {
        self.count >= limit
    }

    pub fn increment(&mut self) {
        self.count += 1;
    }

    pub fn decrement(&mut self) {
        self.count = self.count.saturating_sub(1);
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn window_end(&self) -> DateTime<Utc> {
        self.window_end
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.window_end
    }

    /// Seconds until the window resets, at least 1.
    pub fn retry_after(&self, now: DateTime<Utc>) -> i64 {
        (self.window_end - now).num_seconds().max(1)
    }

    pub fn snapshot(&self) -> BucketSnapshot {
        BucketSnapshot {
            count: self.count,
            window_start: self.window_start,
            window_end: self.window_end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_counts_within_window() {
        let now = Utc::now();
        let mut bucket = FixedWindowBucket::new(now, Duration::seconds(60));
        assert!(!bucket.at_capacity(2));
        bucket.increment();
        bucket.increment();
        assert!(bucket.at_capacity(2));
        assert_eq!(bucket.count(), 2);
    }

    #[test]
    fn test_bucket_resets_exactly_at_window_end() {
        let now = Utc::now();
        let mut bucket = FixedWindowBucket::new(now, Duration::seconds(60));
        bucket.increment();

        // One second before the end: still the same window
        bucket.roll(now + Duration::seconds(59));
        assert_eq!(bucket.count(), 1);

        // At the end: reset, window re-anchored
        let later = now + Duration::seconds(60);
        bucket.roll(later);
        assert_eq!(bucket.count(), 0);
        assert_eq!(bucket.window_end(), later + Duration::seconds(60));
    }

    #[test]
    fn test_retry_after_never_below_one() {
        let now = Utc::now();
        let bucket = FixedWindowBucket::new(now, Duration::seconds(1));
        assert_eq!(bucket.retry_after(now + Duration::milliseconds(900)), 1);
        assert_eq!(bucket.retry_after(now), 1);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let now = Utc::now();
        let mut bucket = FixedWindowBucket::new(now, Duration::seconds(60));
        bucket.increment();
        let restored = FixedWindowBucket::from_snapshot(bucket.snapshot(), Duration::seconds(60));
        assert_eq!(restored.count(), 1);
        assert_eq!(restored.window_end(), bucket.window_end());
    }
}

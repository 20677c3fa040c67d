//! Durable counter store port.
//!
//! Rate-limit buckets are persisted best-effort so quotas survive process
//! restarts. In-memory state stays authoritative between persists: a store
//! failure is logged by the caller and never affects a decision.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// Serialized state of one fixed-window bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketSnapshot {
    pub count: u32,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

/// Narrow key-value interface to the durable counter store.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<BucketSnapshot>, RelayError>;
    async fn save(&self, key: &str, snapshot: &BucketSnapshot) -> Result<(), RelayError>;
}

/// In-process store used by tests and single-node deployments.
#[derive(Default)]
pub struct MemoryCounterStore {
    entries: Mutex<HashMap<String, BucketSnapshot>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn load(&self, key: &str) -> Result<Option<BucketSnapshot>, RelayError> {
        Ok(self.entries.lock().get(key).copied())
    }

    async fn save(&self, key: &str, snapshot: &BucketSnapshot) -> Result<(), RelayError> {
        self.entries.lock().insert(key.to_string(), *snapshot);
        Ok(())
    }
}

/// Redis-backed store. Snapshots are stored as JSON with a TTL slightly
/// past the bucket's window end, so expired quota state evicts itself.
pub struct RedisCounterStore {
    conn: ConnectionManager,
}

/// Extra TTL past the window end, covering clock skew between nodes.
const TTL_MARGIN_SECS: i64 = 60;

impl RedisCounterStore {
    pub async fn connect(redis_url: &str) -> Result<Self, RelayError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn load(&self, key: &str) -> Result<Option<BucketSnapshot>, RelayError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            Some(payload) => serde_json::from_str(&payload)
                .map(Some)
                .map_err(|e| RelayError::Store(format!("corrupt snapshot at {}: {}", key, e))),
            None => Ok(None),
        }
    }

    async fn save(&self, key: &str, snapshot: &BucketSnapshot) -> Result<(), RelayError> {
        let payload = serde_json::to_string(snapshot)
            .map_err(|e| RelayError::Store(format!("serialize snapshot: {}", e)))?;
        let ttl = (snapshot.window_end - Utc::now())
            .num_seconds()
            .max(1)
            + TTL_MARGIN_SECS;

        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(payload)
            .arg("EX")
            .arg(ttl as u64)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }
}

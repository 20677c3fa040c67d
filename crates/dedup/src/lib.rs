//! Deduplication gate that suppresses semantically identical notifications.
//!
//! The gate owns the `NotificationEvent` record lifecycle. Identity is the
//! tuple `(kind, entity_id, recipient_id)` observed within the dedup
//! window. A prior `sent` or fresh `pending` event blocks the request; a
//! `failed` event is always retryable; a `pending` event older than the
//! stale grace period is presumed abandoned by a crashed sender and is
//! superseded so retries are never permanently starved.
//!
//! Runs after rate limiting: a caller over quota never reaches this
//! lookup, and a blocked duplicate has its quota refunded by the caller.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use relay_common::config::DedupConfig;
use relay_common::types::{
    DedupKey, EventState, NotificationContent, NotificationEvent, NotificationRequest,
};

/// Verdict for one request. Rejections still carry the existing event so
/// callers can correlate against the earlier delivery.
#[derive(Debug, Clone)]
pub struct DedupDecision {
    pub allowed: bool,
    pub event: NotificationEvent,
    pub reason: Option<String>,
}

/// In-memory deduplication gate keyed by notification identity.
pub struct DedupGate {
    config: DedupConfig,
    events: HashMap<DedupKey, NotificationEvent>,
    by_id: HashMap<Uuid, DedupKey>,
}

impl DedupGate {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config,
            events: HashMap::new(),
            by_id: HashMap::new(),
        }
    }

    /// Decide whether a request may proceed. Admitting creates a fresh
    /// `pending` event that supersedes any prior record for the identity.
    pub fn should_allow(
        &mut self,
        request: &NotificationRequest,
        now: DateTime<Utc>,
    ) -> DedupDecision {
        let key = DedupKey {
            kind: request.kind,
            entity_id: request.entity_id.clone(),
            recipient_id: request.recipient_id.clone(),
        };

        if let Some(prior) = self.events.get(&key) {
            let age = now - prior.created_at;
            let blocking = match prior.state {
                // Failures are always retryable
                EventState::Failed => false,
                EventState::Sent => age < self.config.window(),
                // A hung or crashed dispatch must not starve the identity
                EventState::Pending => {
                    age < self.config.window() && age < self.config.stale_pending_grace()
                }
            };
            if blocking {
                tracing::debug!(
                    event_id = %prior.id,
                    kind = %prior.kind,
                    entity_id = %prior.entity_id,
                    recipient_id = %prior.recipient_id,
                    state = %prior.state,
                    "Duplicate notification suppressed"
                );
                return DedupDecision {
                    allowed: false,
                    event: prior.clone(),
                    reason: Some("Duplicate notification within dedup window".to_string()),
                };
            }
            if prior.state == EventState::Pending {
                tracing::warn!(
                    event_id = %prior.id,
                    age_secs = age.num_seconds(),
                    "Stale pending event superseded"
                );
            }
        }

        let event = NotificationEvent {
            id: Uuid::new_v4(),
            kind: request.kind,
            entity_id: request.entity_id.clone(),
            recipient_id: request.recipient_id.clone(),
            content: NotificationContent::default(),
            source: request.source.clone(),
            priority: request.priority,
            metadata: serde_json::json!({}),
            state: EventState::Pending,
            created_at: now,
            resolved_at: None,
        };
        self.by_id.insert(event.id, key.clone());
        if let Some(old) = self.events.insert(key, event.clone()) {
            self.by_id.remove(&old.id);
        }

        DedupDecision {
            allowed: true,
            event,
            reason: None,
        }
    }

    /// Attach rendered content to an admitted event's audit record.
    pub fn set_content(&mut self, event_id: Uuid, content: NotificationContent) -> bool {
        match self.event_mut(event_id) {
            Some(event) => {
                event.content = content;
                true
            }
            None => false,
        }
    }

    /// Resolve an event as delivered on at least one channel.
    pub fn mark_sent(&mut self, event_id: Uuid, now: DateTime<Utc>) -> bool {
        match self.event_mut(event_id) {
            Some(event) => {
                event.state = EventState::Sent;
                event.resolved_at = Some(now);
                tracing::info!(event_id = %event_id, "Notification event marked sent");
                true
            }
            None => false,
        }
    }

    /// Resolve an event as failed on every attempted channel. Failed
    /// events are re-admitted by the next identical request.
    pub fn mark_failed(&mut self, event_id: Uuid, error: &str, now: DateTime<Utc>) -> bool {
        match self.event_mut(event_id) {
            Some(event) => {
                event.state = EventState::Failed;
                event.resolved_at = Some(now);
                event.metadata["error"] = serde_json::json!(error);
                tracing::warn!(event_id = %event_id, error, "Notification event marked failed");
                true
            }
            None => false,
        }
    }

    pub fn get(&self, event_id: Uuid) -> Option<&NotificationEvent> {
        let key = self.by_id.get(&event_id)?;
        self.events.get(key)
    }

    /// Number of tracked identities (for monitoring).
    pub fn tracked_count(&self) -> usize {
        self.events.len()
    }

    /// Evict records that can no longer influence a decision: resolved
    /// events past the window, pendings past the window plus grace.
    pub fn sweep(&mut self, now: DateTime<Utc>) {
        let window = self.config.window();
        let grace = self.config.stale_pending_grace();
        let mut evicted = Vec::new();
        self.events.retain(|_, event| {
            let age = now - event.created_at;
            let keep = match event.state {
                EventState::Pending => age < window + grace,
                _ => age < window,
            };
            if !keep {
                evicted.push(event.id);
            }
            keep
        });
        for id in &evicted {
            self.by_id.remove(id);
        }
        if !evicted.is_empty() {
            tracing::debug!(evicted = evicted.len(), "Evicted expired notification events");
        }
    }

    fn event_mut(&mut self, event_id: Uuid) -> Option<&mut NotificationEvent> {
        let key = self.by_id.get(&event_id)?;
        self.events.get_mut(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use relay_common::types::{EventKind, Priority};

    fn request(entity_id: &str, recipient_id: &str) -> NotificationRequest {
        NotificationRequest {
            kind: EventKind::JobAssigned,
            entity_id: entity_id.to_string(),
            recipient_id: recipient_id.to_string(),
            priority: Priority::Normal,
            source: "job-service".to_string(),
        }
    }

    fn gate() -> DedupGate {
        DedupGate::new(DedupConfig::default())
    }

    #[test]
    fn test_first_request_creates_pending_event() {
        let mut gate = gate();
        let now = Utc::now();

        let decision = gate.should_allow(&request("J1", "r1"), now);
        assert!(decision.allowed);
        assert_eq!(decision.event.state, EventState::Pending);
        assert_eq!(decision.event.entity_id, "J1");
        assert!(decision.event.resolved_at.is_none());
    }

    #[test]
    fn test_pending_duplicate_blocked_with_correlation() {
        let mut gate = gate();
        let now = Utc::now();

        let first = gate.should_allow(&request("J1", "r1"), now);
        let second = gate.should_allow(&request("J1", "r1"), now + Duration::seconds(5));
        assert!(!second.allowed);
        // The rejection reports the existing event for correlation
        assert_eq!(second.event.id, first.event.id);
        assert!(second.reason.unwrap().contains("Duplicate"));
    }

    #[test]
    fn test_sent_duplicate_blocked_within_window() {
        let mut gate = gate();
        let now = Utc::now();

        let first = gate.should_allow(&request("J1", "r1"), now);
        assert!(gate.mark_sent(first.event.id, now));

        let second = gate.should_allow(&request("J1", "r1"), now + Duration::minutes(3));
        assert!(!second.allowed);
        assert_eq!(second.event.state, EventState::Sent);
    }

    #[test]
    fn test_sent_event_expires_after_window() {
        let mut gate = gate();
        let now = Utc::now();

        let first = gate.should_allow(&request("J1", "r1"), now);
        gate.mark_sent(first.event.id, now);

        let later = now + Duration::minutes(6);
        let second = gate.should_allow(&request("J1", "r1"), later);
        assert!(second.allowed);
        assert_ne!(second.event.id, first.event.id);
    }

    #[test]
    fn test_failed_events_always_retryable() {
        let mut gate = gate();
        let now = Utc::now();

        let first = gate.should_allow(&request("J1", "r1"), now);
        assert!(gate.mark_failed(first.event.id, "push gateway 503", now));

        let retry = gate.should_allow(&request("J1", "r1"), now + Duration::seconds(1));
        assert!(retry.allowed);
        assert_ne!(retry.event.id, first.event.id);
    }

    #[test]
    fn test_stale_pending_superseded_after_grace() {
        let mut gate = gate();
        let now = Utc::now();

        let first = gate.should_allow(&request("J1", "r1"), now);

        // Inside the grace period: still blocking
        let blocked = gate.should_allow(&request("J1", "r1"), now + Duration::seconds(110));
        assert!(!blocked.allowed);

        // Past the grace period: presumed crashed, superseded
        let recovered = gate.should_allow(&request("J1", "r1"), now + Duration::seconds(130));
        assert!(recovered.allowed);
        assert_ne!(recovered.event.id, first.event.id);

        // The superseded record no longer resolves by id
        assert!(!gate.mark_sent(first.event.id, now));
    }

    #[test]
    fn test_distinct_identities_do_not_interfere() {
        let mut gate = gate();
        let now = Utc::now();

        assert!(gate.should_allow(&request("J1", "r1"), now).allowed);
        assert!(gate.should_allow(&request("J2", "r1"), now).allowed);
        assert!(gate.should_allow(&request("J1", "r2"), now).allowed);
        assert_eq!(gate.tracked_count(), 3);
    }

    #[test]
    fn test_mark_failed_records_error() {
        let mut gate = gate();
        let now = Utc::now();

        let decision = gate.should_allow(&request("J1", "r1"), now);
        gate.mark_failed(decision.event.id, "all channels failed", now);

        let event = gate.get(decision.event.id).unwrap();
        assert_eq!(event.state, EventState::Failed);
        assert_eq!(event.metadata["error"], "all channels failed");
        assert!(event.resolved_at.is_some());
    }

    #[test]
    fn test_set_content_updates_audit_record() {
        let mut gate = gate();
        let now = Utc::now();

        let decision = gate.should_allow(&request("J1", "r1"), now);
        let content = NotificationContent {
            title: "New Job Assignment".to_string(),
            body: "Deep clean at Ocean View Villa".to_string(),
            data: serde_json::json!({"entity_id": "J1"}),
        };
        assert!(gate.set_content(decision.event.id, content));
        assert_eq!(
            gate.get(decision.event.id).unwrap().content.title,
            "New Job Assignment"
        );
    }

    #[test]
    fn test_sweep_evicts_expired_records() {
        let mut gate = gate();
        let now = Utc::now();

        let sent = gate.should_allow(&request("J1", "r1"), now);
        gate.mark_sent(sent.event.id, now);
        gate.should_allow(&request("J2", "r1"), now); // stays pending

        // Sent record expires after the window; pending survives until
        // window + grace
        gate.sweep(now + Duration::minutes(6));
        assert_eq!(gate.tracked_count(), 1);

        gate.sweep(now + Duration::minutes(8));
        assert_eq!(gate.tracked_count(), 0);
    }
}

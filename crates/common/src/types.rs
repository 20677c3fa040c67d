use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job-lifecycle events that produce notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    JobAssigned,
    JobStatusChanged,
    JobReminder,
    JobEscalated,
    Emergency,
}

impl EventKind {
    /// Preference category this event falls under. Recipients opt out of
    /// whole categories, not individual event kinds.
    pub fn category(&self) -> EventCategory {
        match self {
            EventKind::JobAssigned => EventCategory::Assignment,
            EventKind::JobStatusChanged => EventCategory::Status,
            EventKind::JobReminder => EventCategory::Reminder,
            EventKind::JobEscalated => EventCategory::Escalation,
            EventKind::Emergency => EventCategory::Emergency,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::JobAssigned => write!(f, "job.assigned"),
            EventKind::JobStatusChanged => write!(f, "job.status_changed"),
            EventKind::JobReminder => write!(f, "job.reminder"),
            EventKind::JobEscalated => write!(f, "job.escalated"),
            EventKind::Emergency => write!(f, "emergency"),
        }
    }
}

/// Notification preference categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Assignment,
    Status,
    Reminder,
    Escalation,
    Emergency,
}

/// Notification priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
            Priority::Urgent => write!(f, "urgent"),
        }
    }
}

/// Delivery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Push,
    Realtime,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Push => write!(f, "push"),
            Channel::Realtime => write!(f, "realtime"),
        }
    }
}

/// Staff directory roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Staff,
    Admin,
    Manager,
}

/// Lifecycle state of a notification event record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventState {
    Pending,
    Sent,
    Failed,
}

impl std::fmt::Display for EventState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventState::Pending => write!(f, "pending"),
            EventState::Sent => write!(f, "sent"),
            EventState::Failed => write!(f, "failed"),
        }
    }
}

/// Rendered notification content ready for delivery.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationContent {
    /// Short title (e.g., "New Job Assignment")
    pub title: String,
    /// Detailed body message
    pub body: String,
    /// Structured payload for client-side routing
    pub data: serde_json::Value,
}

/// Identity under which duplicate notifications are detected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub kind: EventKind,
    pub entity_id: String,
    pub recipient_id: String,
}

/// Audit record for one admitted notification request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub id: Uuid,
    pub kind: EventKind,
    pub entity_id: String,
    pub recipient_id: String,
    pub content: NotificationContent,
    pub source: String,
    pub priority: Priority,
    pub metadata: serde_json::Value,
    pub state: EventState,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl NotificationEvent {
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            kind: self.kind,
            entity_id: self.entity_id.clone(),
            recipient_id: self.recipient_id.clone(),
        }
    }
}

/// One logical notification request for a single recipient.
#[derive(Debug, Clone)]
pub struct NotificationRequest {
    pub kind: EventKind,
    pub entity_id: String,
    pub recipient_id: String,
    pub priority: Priority,
    pub source: String,
}

/// Job fields used to render notification content. All optional; missing
/// fields substitute as blank strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobContext {
    pub job_title: Option<String>,
    pub job_type: Option<String>,
    pub property_name: Option<String>,
    pub staff_name: Option<String>,
    pub status: Option<String>,
    pub scheduled_at: Option<String>,
}

/// Per-recipient notification preferences. Absent keys mean enabled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Preferences {
    pub channel_enabled: HashMap<Channel, bool>,
    pub category_enabled: HashMap<EventCategory, bool>,
}

impl Preferences {
    pub fn allows_channel(&self, channel: Channel) -> bool {
        self.channel_enabled.get(&channel).copied().unwrap_or(true)
    }

    pub fn allows_category(&self, category: EventCategory) -> bool {
        self.category_enabled.get(&category).copied().unwrap_or(true)
    }
}

/// A staff or admin profile as read from the recipient directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub id: String,
    pub name: String,
    pub role: Role,
    pub channel_tokens: HashMap<Channel, Vec<String>>,
    pub preferences: Preferences,
}

impl Recipient {
    /// Registered tokens for a channel, empty when the channel has none.
    pub fn tokens_for(&self, channel: Channel) -> &[String] {
        self.channel_tokens
            .get(&channel)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Outcome of a rate-limit check. Rejections are structured values, never
/// errors.
#[derive(Debug, Clone, Serialize)]
pub struct RateDecision {
    pub allowed: bool,
    pub reason: Option<String>,
    pub retry_after_secs: Option<i64>,
    pub current_count: u32,
    pub limit: u32,
    pub reset_at: DateTime<Utc>,
}

/// Per-channel success/failure tally across one orchestrator call.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ChannelTally {
    pub success: u32,
    pub failed: u32,
}

/// Aggregate result of one orchestrator call, possibly spanning many
/// recipients. Produced fresh per call and only logged, never persisted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NotificationResult {
    pub success: bool,
    pub event_id: Option<Uuid>,
    pub recipient_count: u32,
    pub channel_results: HashMap<Channel, ChannelTally>,
    pub duplicates_blocked: u32,
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_display() {
        assert_eq!(EventKind::JobAssigned.to_string(), "job.assigned");
        assert_eq!(EventKind::Emergency.to_string(), "emergency");
    }

    #[test]
    fn test_event_kind_category() {
        assert_eq!(EventKind::JobAssigned.category(), EventCategory::Assignment);
        assert_eq!(EventKind::JobStatusChanged.category(), EventCategory::Status);
        assert_eq!(EventKind::JobEscalated.category(), EventCategory::Escalation);
    }

    #[test]
    fn test_preferences_default_to_enabled() {
        let prefs = Preferences::default();
        assert!(prefs.allows_channel(Channel::Push));
        assert!(prefs.allows_category(EventCategory::Reminder));
    }

    #[test]
    fn test_preferences_explicit_disable() {
        let mut prefs = Preferences::default();
        prefs.channel_enabled.insert(Channel::Realtime, false);
        prefs.category_enabled.insert(EventCategory::Reminder, false);
        assert!(!prefs.allows_channel(Channel::Realtime));
        assert!(prefs.allows_channel(Channel::Push));
        assert!(!prefs.allows_category(EventCategory::Reminder));
    }

    #[test]
    fn test_tokens_for_missing_channel() {
        let recipient = Recipient {
            id: "r1".to_string(),
            name: "Test".to_string(),
            role: Role::Staff,
            channel_tokens: HashMap::new(),
            preferences: Preferences::default(),
        };
        assert!(recipient.tokens_for(Channel::Push).is_empty());
    }
}

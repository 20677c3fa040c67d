//! Content generation: maps a job event to a human-readable title/body.
//!
//! Pure function, no side effects. Missing job fields substitute as blank
//! strings; an unmapped status transition falls back to a generic message.

use relay_common::types::{EventKind, JobContext, NotificationContent, Priority};

/// Build the notification content for an event.
pub fn build(
    kind: EventKind,
    entity_id: &str,
    priority: Priority,
    ctx: &JobContext,
) -> NotificationContent {
    let title_field = field(&ctx.job_title);

    let (title, body) = match kind {
        EventKind::JobAssigned => (
            "New Job Assignment".to_string(),
            format!(
                "{} — {} at {}",
                title_field,
                field(&ctx.job_type),
                field(&ctx.property_name)
            ),
        ),
        EventKind::JobStatusChanged => match field(&ctx.status) {
            "accepted" => (
                "Job Accepted".to_string(),
                format!("{} accepted by {}", title_field, field(&ctx.staff_name)),
            ),
            "started" => (
                "Job Started".to_string(),
                format!("{} started by {}", title_field, field(&ctx.staff_name)),
            ),
            "completed" => (
                "Job Completed".to_string(),
                format!("{} completed by {}", title_field, field(&ctx.staff_name)),
            ),
            "cancelled" => (
                "Job Cancelled".to_string(),
                format!("{} was cancelled", title_field),
            ),
            "declined" => (
                "Job Declined".to_string(),
                format!("{} declined by {}", title_field, field(&ctx.staff_name)),
            ),
            status => (
                "Job Update".to_string(),
                format!("{} status changed to {}", title_field, status),
            ),
        },
        EventKind::JobReminder => (
            "Upcoming Job Reminder".to_string(),
            format!(
                "{} at {} starts at {}",
                title_field,
                field(&ctx.property_name),
                field(&ctx.scheduled_at)
            ),
        ),
        EventKind::JobEscalated => (
            "Job Escalated".to_string(),
            format!(
                "{} at {} requires immediate attention",
                title_field,
                field(&ctx.property_name)
            ),
        ),
        EventKind::Emergency => (
            "⚠️ Emergency Alert".to_string(),
            format!(
                "Emergency reported for {} at {}",
                title_field,
                field(&ctx.property_name)
            ),
        ),
    };

    NotificationContent {
        title,
        body,
        data: serde_json::json!({
            "entity_id": entity_id,
            "event": kind.to_string(),
            "priority": priority.to_string(),
        }),
    }
}

fn field(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

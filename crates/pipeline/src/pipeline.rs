//! Pipeline orchestrator.
//!
//! Sequences rate limiting, deduplication, content generation, and channel
//! dispatch for one logical notification request, and aggregates the
//! outcome into a `NotificationResult`. Fan-out events repeat the sequence
//! independently per recipient; one recipient's rejection never affects
//! the others and nothing rolls back across recipients.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

use relay_common::config::PipelineConfig;
use relay_common::store::CounterStore;
use relay_common::types::{
    Channel, EventKind, JobContext, NotificationRequest, NotificationResult, Priority, Recipient,
    Role,
};
use relay_dedup::DedupGate;
use relay_dispatch::dispatcher::DeliveryOutcome;
use relay_dispatch::{ChannelDispatcher, ChannelTransport, content};
use relay_limiter::{RateLimiter, load_user_snapshots};

use crate::directory::RecipientDirectory;

/// One job-lifecycle event to deliver, possibly to many recipients.
#[derive(Debug, Clone)]
pub struct JobEventRequest {
    pub kind: EventKind,
    pub entity_id: String,
    pub recipient_ids: Vec<String>,
    pub context: JobContext,
    pub priority: Priority,
    pub source: String,
}

/// Releases the limiter's concurrent slot when an admitted send finishes,
/// on every exit path.
struct InFlightGuard {
    limiter: Arc<Mutex<RateLimiter>>,
    armed: bool,
}

impl InFlightGuard {
    fn new(limiter: Arc<Mutex<RateLimiter>>) -> Self {
        Self {
            limiter,
            armed: true,
        }
    }

    /// Hand release responsibility elsewhere (quota refund paths).
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.armed {
            self.limiter.lock().notification_complete();
        }
    }
}

/// Explicitly constructed, dependency-injected pipeline with its own
/// lifecycle; tests create isolated instances instead of sharing globals.
pub struct NotificationPipeline {
    limiter: Arc<Mutex<RateLimiter>>,
    gate: Arc<Mutex<DedupGate>>,
    dispatcher: ChannelDispatcher,
    directory: Arc<dyn RecipientDirectory>,
    store: Option<Arc<dyn CounterStore>>,
    sweeper: Option<tokio::task::JoinHandle<()>>,
}

/// How often expired limiter and dedup state is evicted.
const SWEEP_INTERVAL_SECS: u64 = 60;

impl NotificationPipeline {
    pub fn new(
        config: PipelineConfig,
        directory: Arc<dyn RecipientDirectory>,
        transports: Vec<Arc<dyn ChannelTransport>>,
        store: Option<Arc<dyn CounterStore>>,
    ) -> Self {
        let limiter = Arc::new(Mutex::new(RateLimiter::new(
            config.rate_limits.clone(),
            store.clone(),
        )));
        let gate = Arc::new(Mutex::new(DedupGate::new(config.dedup)));
        let dispatcher = ChannelDispatcher::new(transports, config.dispatch_timeout());

        // Sweeps only touch already-expired entries, so they can never
        // interleave badly with an in-progress check for the same key.
        let sweeper = {
            let limiter = limiter.clone();
            let gate = gate.clone();
            tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(std::time::Duration::from_secs(SWEEP_INTERVAL_SECS));
                loop {
                    interval.tick().await;
                    let now = Utc::now();
                    limiter.lock().sweep(now);
                    gate.lock().sweep(now);
                }
            })
        };

        Self {
            limiter,
            gate,
            dispatcher,
            directory,
            store,
            sweeper: Some(sweeper),
        }
    }

    /// Stop background sweeps. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.sweeper.take() {
            handle.abort();
        }
    }

    /// Deliver one event to an explicit list of recipients.
    pub async fn send_job_event(&self, request: JobEventRequest) -> NotificationResult {
        let mut result = NotificationResult::default();
        let mut hard_failures = 0u32;

        // One lookup per recipient within a fan-out
        let mut seen = HashSet::new();
        for recipient_id in &request.recipient_ids {
            if !seen.insert(recipient_id.as_str()) {
                continue;
            }
            match self.directory.get_recipient(recipient_id).await {
                Ok(Some(recipient)) => {
                    self.notify_recipient(&recipient, &request, &mut result, &mut hard_failures)
                        .await;
                }
                Ok(None) => {
                    hard_failures += 1;
                    result
                        .errors
                        .push(format!("Recipient {} not found", recipient_id));
                }
                Err(e) => {
                    hard_failures += 1;
                    result
                        .errors
                        .push(format!("Recipient lookup failed for {}: {}", recipient_id, e));
                }
            }
        }

        self.finish(&request, result, hard_failures)
    }

    /// Deliver one event to every recipient holding one of the roles
    /// (e.g., a status update broadcast to all admins and managers).
    pub async fn send_role_event(
        &self,
        roles: &[Role],
        request: JobEventRequest,
    ) -> NotificationResult {
        let mut result = NotificationResult::default();
        let mut hard_failures = 0u32;

        match self.directory.recipients_by_role(roles).await {
            Ok(recipients) => {
                for recipient in &recipients {
                    self.notify_recipient(recipient, &request, &mut result, &mut hard_failures)
                        .await;
                }
            }
            Err(e) => {
                hard_failures += 1;
                result
                    .errors
                    .push(format!("Role lookup failed: {}", e));
            }
        }

        self.finish(&request, result, hard_failures)
    }

    /// Run one recipient through the full gauntlet: rate limit → dedup →
    /// content → dispatch → outcome recording.
    async fn notify_recipient(
        &self,
        recipient: &Recipient,
        request: &JobEventRequest,
        result: &mut NotificationResult,
        hard_failures: &mut u32,
    ) {
        // Recipient opted out of this category: a non-error no-op.
        if !recipient.preferences.allows_category(request.kind.category()) {
            tracing::debug!(
                recipient_id = %recipient.id,
                kind = %request.kind,
                "Recipient disabled this event category"
            );
            return;
        }

        // First sight of a recipient since startup: hydrate persisted
        // quota state so restarts don't reset limits.
        if let Some(store) = &self.store {
            let hydrated = self.limiter.lock().has_user(&recipient.id);
            if !hydrated {
                let snapshots = load_user_snapshots(store.as_ref(), &recipient.id).await;
                self.limiter
                    .lock()
                    .hydrate_user(&recipient.id, snapshots, Utc::now());
            }
        }

        // Rate limit. Check and increment happen inside one lock hold.
        let decision =
            self.limiter
                .lock()
                .check(&recipient.id, request.kind, request.priority, Utc::now());
        if !decision.allowed {
            *hard_failures += 1;
            let reason = decision
                .reason
                .unwrap_or_else(|| "rate limited".to_string());
            result.errors.push(format!(
                "{}: {} (retry in {}s)",
                recipient.id,
                reason,
                decision.retry_after_secs.unwrap_or(1)
            ));
            return;
        }
        let guard = InFlightGuard::new(self.limiter.clone());

        // Dedup. A blocked duplicate is not an error, and its quota is
        // refunded so duplicates never consume quota.
        let dedup_request = NotificationRequest {
            kind: request.kind,
            entity_id: request.entity_id.clone(),
            recipient_id: recipient.id.clone(),
            priority: request.priority,
            source: request.source.clone(),
        };
        let dedup = self.gate.lock().should_allow(&dedup_request, Utc::now());
        if !dedup.allowed {
            result.duplicates_blocked += 1;
            guard.disarm();
            self.limiter.lock().release(&recipient.id, request.kind);
            return;
        }
        let event = dedup.event;
        if result.event_id.is_none() {
            result.event_id = Some(event.id);
        }

        // Content + dispatch
        let rendered = content::build(
            request.kind,
            &request.entity_id,
            request.priority,
            &request.context,
        );
        self.gate.lock().set_content(event.id, rendered.clone());

        let channels = [Channel::Push, Channel::Realtime];
        let deliveries = self
            .dispatcher
            .dispatch(recipient, &channels, &rendered)
            .await;
        result.recipient_count += 1;

        let mut delivered = false;
        let mut channel_errors = Vec::new();
        for delivery in &deliveries {
            match &delivery.outcome {
                DeliveryOutcome::Delivered => {
                    result
                        .channel_results
                        .entry(delivery.channel)
                        .or_default()
                        .success += 1;
                    delivered = true;
                }
                DeliveryOutcome::Failed(error) => {
                    result
                        .channel_results
                        .entry(delivery.channel)
                        .or_default()
                        .failed += 1;
                    channel_errors.push(format!("{} ({}): {}", recipient.id, delivery.channel, error));
                }
                DeliveryOutcome::Skipped(_) => {}
            }
        }

        if delivered {
            // At least one channel succeeded: sent, even on partial failure
            self.gate.lock().mark_sent(event.id, Utc::now());
            result.errors.extend(channel_errors);
        } else {
            let message = if channel_errors.is_empty() {
                format!("{}: no enabled channel with a registered token", recipient.id)
            } else {
                channel_errors.join("; ")
            };
            self.gate.lock().mark_failed(event.id, &message, Utc::now());
            *hard_failures += 1;
            result.errors.push(message);
        }

        // Quotas survive restarts; persisted off the hot path
        if let Some(handle) = self.limiter.lock().spawn_persist(&recipient.id) {
            drop(handle);
        }

        drop(guard);
    }

    fn finish(
        &self,
        request: &JobEventRequest,
        mut result: NotificationResult,
        hard_failures: u32,
    ) -> NotificationResult {
        result.success = hard_failures == 0;
        tracing::info!(
            kind = %request.kind,
            entity_id = %request.entity_id,
            success = result.success,
            recipient_count = result.recipient_count,
            duplicates_blocked = result.duplicates_blocked,
            errors = result.errors.len(),
            "Notification pipeline completed"
        );
        result
    }
}

impl Drop for NotificationPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

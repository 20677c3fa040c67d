//! Channel dispatcher: fans one approved notification out to a
//! recipient's enabled channels.
//!
//! Channels are independent: a transport failure on one never prevents
//! attempting the others, and every transport call runs under a timeout so
//! a slow channel cannot stall the batch. Failures are captured, never
//! thrown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use relay_common::types::{Channel, NotificationContent, Recipient};

use crate::transport::ChannelTransport;

/// Terminal outcome for one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct ChannelDelivery {
    pub channel: Channel,
    pub outcome: DeliveryOutcome,
}

impl ChannelDelivery {
    pub fn delivered(&self) -> bool {
        self.outcome == DeliveryOutcome::Delivered
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            DeliveryOutcome::Failed(error) => Some(error),
            _ => None,
        }
    }
}

pub struct ChannelDispatcher {
    transports: HashMap<Channel, Arc<dyn ChannelTransport>>,
    timeout: Duration,
}

impl ChannelDispatcher {
    pub fn new(transports: Vec<Arc<dyn ChannelTransport>>, timeout: Duration) -> Self {
        let transports = transports
            .into_iter()
            .map(|transport| (transport.channel(), transport))
            .collect();
        Self {
            transports,
            timeout,
        }
    }

    /// Attempt delivery on each requested channel, respecting recipient
    /// preferences and registered tokens.
    pub async fn dispatch(
        &self,
        recipient: &Recipient,
        channels: &[Channel],
        content: &NotificationContent,
    ) -> Vec<ChannelDelivery> {
        let mut deliveries = Vec::with_capacity(channels.len());
        for &channel in channels {
            let outcome = self.dispatch_one(recipient, channel, content).await;
            deliveries.push(ChannelDelivery { channel, outcome });
        }
        deliveries
    }

    async fn dispatch_one(
        &self,
        recipient: &Recipient,
        channel: Channel,
        content: &NotificationContent,
    ) -> DeliveryOutcome {
        if !recipient.preferences.allows_channel(channel) {
            tracing::debug!(
                recipient_id = %recipient.id,
                channel = %channel,
                "Channel disabled by recipient preference"
            );
            return DeliveryOutcome::Skipped("disabled by recipient preference".to_string());
        }

        let tokens = recipient.tokens_for(channel);
        if tokens.is_empty() {
            return DeliveryOutcome::Skipped("no registered token".to_string());
        }

        let Some(transport) = self.transports.get(&channel) else {
            return DeliveryOutcome::Skipped("no transport configured".to_string());
        };

        // All tokens for the channel are attempted; one success counts the
        // channel as delivered.
        let mut delivered = false;
        let mut errors = Vec::new();
        for token in tokens {
            match tokio::time::timeout(self.timeout, transport.send(token, content)).await {
                Ok(Ok(())) => delivered = true,
                Ok(Err(e)) => errors.push(e.to_string()),
                Err(_) => errors.push(format!(
                    "{} dispatch timed out after {}ms",
                    channel,
                    self.timeout.as_millis()
                )),
            }
        }

        if delivered {
            DeliveryOutcome::Delivered
        } else {
            let error = errors.join("; ");
            tracing::warn!(
                recipient_id = %recipient.id,
                channel = %channel,
                error = %error,
                "Channel delivery failed"
            );
            DeliveryOutcome::Failed(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relay_common::types::{Preferences, Role};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct MockTransport {
        channel: Channel,
        fail: bool,
        delay: Option<Duration>,
        calls: AtomicU32,
    }

    impl MockTransport {
        fn new(channel: Channel) -> Arc<Self> {
            Arc::new(Self {
                channel,
                fail: false,
                delay: None,
                calls: AtomicU32::new(0),
            })
        }

        fn failing(channel: Channel) -> Arc<Self> {
            Arc::new(Self {
                channel,
                fail: true,
                delay: None,
                calls: AtomicU32::new(0),
            })
        }

        fn slow(channel: Channel, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                channel,
                fail: false,
                delay: Some(delay),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl ChannelTransport for MockTransport {
        fn channel(&self) -> Channel {
            self.channel
        }

        async fn send(&self, _token: &str, _content: &NotificationContent) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                anyhow::bail!("gateway unavailable");
            }
            Ok(())
        }
    }

    fn recipient(tokens: &[(Channel, &[&str])]) -> Recipient {
        Recipient {
            id: "r1".to_string(),
            name: "Maria".to_string(),
            role: Role::Staff,
            channel_tokens: tokens
                .iter()
                .map(|(channel, toks)| {
                    (*channel, toks.iter().map(|t| t.to_string()).collect())
                })
                .collect(),
            preferences: Preferences::default(),
        }
    }

    fn content() -> NotificationContent {
        NotificationContent {
            title: "t".to_string(),
            body: "b".to_string(),
            data: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_delivers_on_enabled_channels() {
        let push = MockTransport::new(Channel::Push);
        let dispatcher = ChannelDispatcher::new(vec![push.clone()], Duration::from_secs(1));
        let recipient = recipient(&[(Channel::Push, &["tok1"])]);

        let deliveries = dispatcher
            .dispatch(&recipient, &[Channel::Push], &content())
            .await;
        assert_eq!(deliveries.len(), 1);
        assert!(deliveries[0].delivered());
        assert_eq!(push.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_skips_disabled_channel_without_calling_transport() {
        let push = MockTransport::new(Channel::Push);
        let dispatcher = ChannelDispatcher::new(vec![push.clone()], Duration::from_secs(1));
        let mut recipient = recipient(&[(Channel::Push, &["tok1"])]);
        recipient
            .preferences
            .channel_enabled
            .insert(Channel::Push, false);

        let deliveries = dispatcher
            .dispatch(&recipient, &[Channel::Push], &content())
            .await;
        assert!(matches!(
            deliveries[0].outcome,
            DeliveryOutcome::Skipped(_)
        ));
        assert_eq!(push.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_skips_channel_without_token() {
        let push = MockTransport::new(Channel::Push);
        let dispatcher = ChannelDispatcher::new(vec![push], Duration::from_secs(1));
        let recipient = recipient(&[]);

        let deliveries = dispatcher
            .dispatch(&recipient, &[Channel::Push], &content())
            .await;
        assert_eq!(
            deliveries[0].outcome,
            DeliveryOutcome::Skipped("no registered token".to_string())
        );
    }

    #[tokio::test]
    async fn test_one_channel_failure_does_not_block_others() {
        let push = MockTransport::new(Channel::Push);
        let realtime = MockTransport::failing(Channel::Realtime);
        let dispatcher =
            ChannelDispatcher::new(vec![push, realtime], Duration::from_secs(1));
        let recipient = recipient(&[
            (Channel::Push, &["tok1"]),
            (Channel::Realtime, &["conn1"]),
        ]);

        let deliveries = dispatcher
            .dispatch(&recipient, &[Channel::Realtime, Channel::Push], &content())
            .await;
        let push_delivery = deliveries.iter().find(|d| d.channel == Channel::Push).unwrap();
        let realtime_delivery = deliveries
            .iter()
            .find(|d| d.channel == Channel::Realtime)
            .unwrap();
        assert!(push_delivery.delivered());
        assert!(realtime_delivery.error().unwrap().contains("gateway unavailable"));
    }

    #[tokio::test]
    async fn test_one_token_success_counts_channel_delivered() {
        struct FirstTokenFails {
            calls: AtomicU32,
        }

        #[async_trait]
        impl ChannelTransport for FirstTokenFails {
            fn channel(&self) -> Channel {
                Channel::Push
            }

            async fn send(
                &self,
                token: &str,
                _content: &NotificationContent,
            ) -> anyhow::Result<()> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if token == "stale" {
                    anyhow::bail!("token no longer registered");
                }
                Ok(())
            }
        }

        let transport = Arc::new(FirstTokenFails {
            calls: AtomicU32::new(0),
        });
        let dispatcher = ChannelDispatcher::new(vec![transport.clone()], Duration::from_secs(1));
        let recipient = recipient(&[(Channel::Push, &["stale", "fresh"])]);

        let deliveries = dispatcher
            .dispatch(&recipient, &[Channel::Push], &content())
            .await;
        assert!(deliveries[0].delivered());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_a_channel_failure() {
        let slow = MockTransport::slow(Channel::Push, Duration::from_secs(30));
        let dispatcher = ChannelDispatcher::new(vec![slow], Duration::from_millis(100));
        let recipient = recipient(&[(Channel::Push, &["tok1"])]);

        let deliveries = dispatcher
            .dispatch(&recipient, &[Channel::Push], &content())
            .await;
        assert!(deliveries[0].error().unwrap().contains("timed out"));
    }
}

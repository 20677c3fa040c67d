//! Channel transports: external delivery mechanisms behind a narrow port.

use async_trait::async_trait;

use relay_common::types::{Channel, NotificationContent};

/// One delivery mechanism with its own token/address space per recipient.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    fn channel(&self) -> Channel;

    /// Deliver content to one token. Implementations return an error for
    /// any non-delivery; the dispatcher captures it without propagating.
    async fn send(&self, token: &str, content: &NotificationContent) -> anyhow::Result<()>;
}

/// HTTP client for the managed push-notification gateway.
pub struct PushGatewayClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl PushGatewayClient {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
        }
    }
}

#[async_trait]
impl ChannelTransport for PushGatewayClient {
    fn channel(&self) -> Channel {
        Channel::Push
    }

    async fn send(&self, token: &str, content: &NotificationContent) -> anyhow::Result<()> {
        let mut request = self.http.post(&self.endpoint).json(&serde_json::json!({
            "to": token,
            "title": content.title,
            "body": content.body,
            "data": content.data,
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            anyhow::bail!("push gateway returned {}", response.status());
        }
        Ok(())
    }
}

/// HTTP client for the realtime-socket broadcaster's ingest endpoint.
pub struct RealtimeBroadcaster {
    http: reqwest::Client,
    endpoint: String,
}

impl RealtimeBroadcaster {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl ChannelTransport for RealtimeBroadcaster {
    fn channel(&self) -> Channel {
        Channel::Realtime
    }

    async fn send(&self, token: &str, content: &NotificationContent) -> anyhow::Result<()> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&serde_json::json!({
                "channel": token,
                "event": "notification",
                "payload": {
                    "title": content.title,
                    "body": content.body,
                    "data": content.data,
                },
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("realtime broadcaster returned {}", response.status());
        }
        Ok(())
    }
}

//! Recipient directory port.
//!
//! Profiles and channel tokens are owned by the external directory; the
//! pipeline only reads them per request.

use async_trait::async_trait;

use relay_common::types::{Recipient, Role};

#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn get_recipient(&self, id: &str) -> anyhow::Result<Option<Recipient>>;

    async fn recipients_by_role(&self, roles: &[Role]) -> anyhow::Result<Vec<Recipient>>;
}

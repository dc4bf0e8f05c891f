use anyhow::Result;
use async_trait::async_trait;

use tango_core::OwnerId;

/// Outbound notification transport.
///
/// Delivery is best-effort: the sweep logs failures per owner and moves on;
/// an error here never aborts a pass for other owners.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, owner: OwnerId, text: &str) -> Result<()>;
}

//! Failure-escalation contract.
//!
//! Delivery mechanics (SMTP, chat webhooks, ...) live behind [`Notifier`];
//! the scheduler only knows the send contract.

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, display_name: &str, subject: &str, body: &str) -> Result<()>;
}

/// Default sink when no delivery channel is configured: escalations land
/// in the log.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, display_name: &str, subject: &str, body: &str) -> Result<()> {
        warn!(%display_name, %subject, %body, "escalation");
        Ok(())
    }
}

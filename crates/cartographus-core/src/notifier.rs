use async_trait::async_trait;

use crate::alert::Alert;

/// A destination alerts are fanned out to. `send` must return `Ok(())`
/// immediately when the notifier is disabled, must respect cancellation
/// while waiting on its own rate limiter, and must update its internal
/// `last_sent` bookkeeping on every attempted send regardless of outcome.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    fn enabled(&self) -> bool;

    async fn send(&self, alert: &Alert) -> anyhow::Result<()>;
}

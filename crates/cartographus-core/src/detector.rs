use async_trait::async_trait;

use crate::alert::NewAlert;
use crate::event::DetectionEvent;
use crate::rule::RuleType;

/// One rule's worth of behaviour. `check` is read-only with respect to
/// persistent state — it may mutate detector-local in-memory state (e.g.
/// the VPN detector's per-user history) but must never touch the store.
/// Implementations must be safe under concurrent `check` and `configure`
/// calls: a config read during `check` must never observe a torn write.
#[async_trait]
pub trait Detector: Send + Sync {
    fn rule_type(&self) -> RuleType;

    async fn check(&self, event: &DetectionEvent) -> anyhow::Result<Option<NewAlert>>;

    /// Replaces (never merges) the detector's configuration after
    /// validation. On validation failure the previous configuration stays
    /// live and the error is returned synchronously.
    fn configure(&self, raw_config: serde_json::Value) -> anyhow::Result<()>;

    fn enabled(&self) -> bool;

    fn set_enabled(&self, enabled: bool);
}

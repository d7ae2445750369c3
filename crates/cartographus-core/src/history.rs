use async_trait::async_trait;
use chrono::Duration;

use crate::event::{DetectionEvent, Geolocation};

/// The read-model every detector queries. `server_id` of `""` means "any
/// server" on every operation. Missing rows are `None`/empty, never an
/// error — only I/O failures reaching the backend are errors.
#[async_trait]
pub trait EventHistory: Send + Sync {
    async fn last_event_for_user(
        &self,
        user_id: i64,
        server_id: &str,
    ) -> anyhow::Result<Option<DetectionEvent>>;

    /// Events with an open session (no matching `stop`) started within the
    /// last 4 hours.
    async fn active_streams_for_user(
        &self,
        user_id: i64,
        server_id: &str,
    ) -> anyhow::Result<Vec<DetectionEvent>>;

    /// DISTINCT IPs observed for `machine_id` within `window`, newest-first.
    async fn recent_ips_for_device(
        &self,
        machine_id: &str,
        server_id: &str,
        window: Duration,
    ) -> anyhow::Result<Vec<String>>;

    /// Active streams of `user_id` within `window` that carry valid
    /// (non-sentinel) coordinates.
    async fn simultaneous_locations_for_user(
        &self,
        user_id: i64,
        server_id: &str,
        window: Duration,
    ) -> anyhow::Result<Vec<DetectionEvent>>;

    async fn geolocation_for_ip(&self, ip: &str) -> anyhow::Result<Option<Geolocation>>;

    /// Feeds the history layer a newly-processed event. The base
    /// persistent implementation may treat this as a no-op (the row
    /// already exists via ingestion); the cached wrapper relies on it to
    /// populate its in-memory indexes within the same batch.
    async fn record_event(&self, _event: &DetectionEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

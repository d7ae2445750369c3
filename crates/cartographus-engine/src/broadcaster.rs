use std::sync::Arc;

use cartographus_core::alert::Alert;
use cartographus_core::broadcaster::Broadcaster;
use tokio::sync::broadcast;
use tracing::warn;

use crate::metrics::Metrics;

/// Live push event, as delivered to subscribers of
/// [`BroadcastChannel::subscribe`].
#[derive(Debug, Clone)]
pub struct LiveEvent {
    pub topic: String,
    pub alert: Alert,
}

/// Reference `Broadcaster` implementation backed by a `tokio::sync::broadcast`
/// channel. Not the UI transport itself — a demonstration of the trait's
/// non-blocking shape that a real transport adapter can wrap.
pub struct BroadcastChannel {
    sender: broadcast::Sender<LiveEvent>,
    metrics: Arc<Metrics>,
}

impl BroadcastChannel {
    pub fn new(capacity: usize, metrics: Arc<Metrics>) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        BroadcastChannel { sender, metrics }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.sender.subscribe()
    }
}

impl Broadcaster for BroadcastChannel {
    fn broadcast(&self, topic: &str, alert: &Alert) {
        let event = LiveEvent {
            topic: topic.to_string(),
            alert: alert.clone(),
        };
        // `send` only fails when there are no receivers; a full channel just
        // lags the slowest subscriber rather than blocking the sender, so
        // both cases are "drop and count", never "wait".
        if self.sender.send(event).is_err() {
            self.metrics.record_broadcast_dropped();
            warn!(topic, "broadcast dropped: no listeners");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartographus_core::alert::Severity;
    use chrono::Utc;

    fn sample_alert() -> Alert {
        Alert {
            id: "alrt_1".to_string(),
            rule_type: "vpn_usage".to_string(),
            user_id: 1,
            username: "alice".to_string(),
            server_id: None,
            machine_id: None,
            ip_address: None,
            severity: Severity::Info,
            title: "VPN usage detected".to_string(),
            message: "alice streamed via a VPN".to_string(),
            metadata: serde_json::json!({}),
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn subscriber_receives_broadcast_alerts() {
        let channel = BroadcastChannel::new(16, Arc::new(Metrics::new()));
        let mut rx = channel.subscribe();
        channel.broadcast("detection_alert", &sample_alert());
        let received = rx.try_recv().expect("alert received");
        assert_eq!(received.topic, "detection_alert");
        assert_eq!(received.alert.id, "alrt_1");
    }

    #[test]
    fn broadcast_with_no_subscribers_is_counted_not_fatal() {
        let metrics = Arc::new(Metrics::new());
        let channel = BroadcastChannel::new(16, Arc::clone(&metrics));
        channel.broadcast("detection_alert", &sample_alert());
        assert_eq!(metrics.snapshot().broadcasts_dropped, 1);
    }
}

use std::sync::RwLock;

use chrono::{DateTime, Utc};

/// Point-in-time snapshot of [`Metrics`]. Cheap to clone, safe to log or
/// serve from an admin endpoint.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct MetricsSnapshot {
    pub events_checked: u64,
    pub events_processed: u64,
    pub alerts_generated: u64,
    pub errors: u64,
    pub detection_errors: u64,
    pub violations_dropped: u64,
    pub broadcasts_dropped: u64,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub last_processing_time_ms: u64,
}

/// Engine counters and gauges, guarded by their own lock so metrics reads
/// never contend with the detector-map lock on the hot path.
#[derive(Default)]
pub struct Metrics {
    inner: RwLock<MetricsSnapshot>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.read().expect("metrics lock").clone()
    }

    pub fn record_event_checked(&self) {
        self.inner.write().expect("metrics lock").events_checked += 1;
    }

    pub fn record_event_processed(&self, processing_time_ms: u64) {
        let mut m = self.inner.write().expect("metrics lock");
        m.events_processed += 1;
        m.last_processing_time_ms = processing_time_ms;
    }

    pub fn record_error(&self) {
        self.inner.write().expect("metrics lock").errors += 1;
    }

    pub fn record_detection_error(&self) {
        self.inner.write().expect("metrics lock").detection_errors += 1;
    }

    pub fn record_alert(&self, triggered_at: DateTime<Utc>) {
        let mut m = self.inner.write().expect("metrics lock");
        m.alerts_generated += 1;
        m.last_triggered_at = Some(triggered_at);
    }

    pub fn record_violation_dropped(&self) {
        self.inner.write().expect("metrics lock").violations_dropped += 1;
    }

    pub fn record_broadcast_dropped(&self) {
        self.inner.write().expect("metrics lock").broadcasts_dropped += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_counters() {
        let metrics = Metrics::new();
        metrics.record_event_checked();
        metrics.record_event_checked();
        metrics.record_alert(Utc::now());
        metrics.record_violation_dropped();

        let snap = metrics.snapshot();
        assert_eq!(snap.events_checked, 2);
        assert_eq!(snap.alerts_generated, 1);
        assert_eq!(snap.violations_dropped, 1);
        assert!(snap.last_triggered_at.is_some());
    }
}

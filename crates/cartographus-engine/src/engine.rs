use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cartographus_core::alert::{Alert, NewAlert};
use cartographus_core::broadcaster::Broadcaster;
use cartographus_core::config::Config;
use cartographus_core::detector::Detector;
use cartographus_core::event::DetectionEvent;
use cartographus_core::history::EventHistory;
use cartographus_core::notifier::Notifier;
use cartographus_core::rule::RuleType;
use cartographus_core::store::{AlertStore, TrustStore};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::error::EngineError;
use crate::metrics::Metrics;

/// Just enough of a generated alert to update trust scores. Kept separate
/// from [`NewAlert`] so the violation channel doesn't need it to be `Clone`.
struct Violation {
    user_id: i64,
    username: String,
}

/// Wires detectors, persistence, notifiers, and the live broadcaster into
/// one `process(event)` call, plus the background trust-score machinery
/// that runs off of it.
pub struct Engine {
    detectors: RwLock<HashMap<RuleType, Arc<dyn Detector>>>,
    alert_store: Arc<dyn AlertStore>,
    trust_store: Arc<dyn TrustStore>,
    history: Arc<dyn EventHistory>,
    notifiers: Vec<Arc<dyn Notifier>>,
    broadcaster: Option<Arc<dyn Broadcaster>>,
    metrics: Arc<Metrics>,
    enabled: AtomicBool,

    violation_tx: mpsc::Sender<Violation>,
    violation_rx: Mutex<Option<mpsc::Receiver<Violation>>>,
    trust_decrement_amount: i32,
}

impl Engine {
    pub fn new(
        alert_store: Arc<dyn AlertStore>,
        trust_store: Arc<dyn TrustStore>,
        history: Arc<dyn EventHistory>,
        detectors: Vec<Arc<dyn Detector>>,
        notifiers: Vec<Arc<dyn Notifier>>,
        broadcaster: Option<Arc<dyn Broadcaster>>,
        metrics: Arc<Metrics>,
        config: &Config,
    ) -> Self {
        let (violation_tx, violation_rx) = mpsc::channel(config.violation_channel_capacity);
        let detectors = detectors
            .into_iter()
            .map(|d| (d.rule_type(), d))
            .collect::<HashMap<_, _>>();

        Engine {
            detectors: RwLock::new(detectors),
            alert_store,
            trust_store,
            history,
            notifiers,
            broadcaster,
            metrics,
            enabled: AtomicBool::new(true),
            violation_tx,
            violation_rx: Mutex::new(Some(violation_rx)),
            trust_decrement_amount: config.trust_decrement_amount,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Runs every enabled detector against `event`, persists and fans out
    /// every alert raised, and returns the persisted alerts alongside an
    /// aggregated error describing any detector failures (the alerts that
    /// did fire are still returned even when some detector errored).
    pub async fn process(&self, mut event: DetectionEvent) -> (Vec<Alert>, Option<anyhow::Error>) {
        if !self.enabled() {
            return (Vec::new(), None);
        }
        let snapshot: Vec<Arc<dyn Detector>> = {
            let detectors = self.detectors.read().await;
            detectors.values().filter(|d| d.enabled()).cloned().collect()
        };
        if snapshot.is_empty() {
            return (Vec::new(), None);
        }

        if event.has_unknown_location() && !event.ip_address.is_empty() {
            match self.history.geolocation_for_ip(&event.ip_address).await {
                Ok(Some(geo)) => event.apply_geolocation(&geo),
                Ok(None) => {}
                Err(e) => warn!(error = %e, ip = %event.ip_address, "geolocation lookup failed"),
            }
        }

        let start = Instant::now();
        let mut raised: Vec<NewAlert> = Vec::new();
        let mut failures: Vec<String> = Vec::new();

        for detector in &snapshot {
            self.metrics.record_event_checked();
            match detector.check(&event).await {
                Ok(Some(new_alert)) => {
                    self.metrics.record_alert(chrono::Utc::now());
                    let violation = Violation {
                        user_id: new_alert.user_id,
                        username: new_alert.username.clone(),
                    };
                    if self.violation_tx.try_send(violation).is_err() {
                        self.metrics.record_violation_dropped();
                        warn!(
                            rule_type = new_alert.rule_type,
                            "violation channel full, dropping trust-score update"
                        );
                    }
                    raised.push(new_alert);
                }
                Ok(None) => {}
                Err(e) => {
                    self.metrics.record_error();
                    self.metrics.record_detection_error();
                    warn!(rule_type = ?detector.rule_type(), error = %e, "detector check failed");
                    failures.push(format!("{:?}: {e}", detector.rule_type()));
                }
            }
        }

        self.metrics
            .record_event_processed(start.elapsed().as_millis() as u64);

        if let Err(e) = self.history.record_event(&event).await {
            warn!(error = %e, "event history record_event failed");
        }

        let mut persisted = Vec::with_capacity(raised.len());
        for new_alert in raised {
            match self.alert_store.save_alert(new_alert).await {
                Ok(alert) => persisted.push(alert),
                Err(e) => error!(error = %e, "failed to persist alert"),
            }
        }

        for alert in &persisted {
            for notifier in &self.notifiers {
                if !notifier.enabled() {
                    continue;
                }
                let notifier = Arc::clone(notifier);
                let alert = alert.clone();
                tokio::spawn(async move {
                    if let Err(e) = notifier.send(&alert).await {
                        warn!(notifier = notifier.name(), error = %e, "notifier send failed");
                    }
                });
            }
            if let Some(broadcaster) = &self.broadcaster {
                broadcaster.broadcast("detection_alert", alert);
            }
        }

        let aggregated_error = if failures.is_empty() {
            None
        } else {
            Some(EngineError::DetectorFailure(failures.join("; ")).into())
        };
        (persisted, aggregated_error)
    }

    async fn process_violation(&self, violation: Violation) {
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            self.trust_store.decrement_trust_score(
                violation.user_id,
                &violation.username,
                self.trust_decrement_amount,
            ),
        )
        .await;
        match result {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => error!(user_id = violation.user_id, error = %e, "trust score decrement failed"),
            Err(_) => error!(user_id = violation.user_id, "trust score decrement timed out"),
        }
    }

    /// Consumes the violation channel until `cancellation` fires, then drains
    /// whatever remains so no in-flight alert's trust penalty is lost.
    pub async fn run(self: Arc<Self>, cancellation: CancellationToken) {
        let mut rx = self
            .violation_rx
            .lock()
            .await
            .take()
            .expect("Engine::run called more than once");

        loop {
            tokio::select! {
                _ = cancellation.cancelled() => break,
                received = rx.recv() => match received {
                    Some(violation) => self.process_violation(violation).await,
                    None => break,
                },
            }
        }

        rx.close();
        while let Ok(violation) = rx.try_recv() {
            self.process_violation(violation).await;
        }
    }

    /// Runs one trust-score recovery immediately, then every `interval`
    /// until `cancellation` fires. Each run is capped at 30 s.
    pub async fn run_trust_recovery(
        self: Arc<Self>,
        interval: Duration,
        amount: i32,
        cancellation: CancellationToken,
    ) {
        loop {
            match tokio::time::timeout(
                Duration::from_secs(30),
                self.trust_store.recover_trust_scores(amount),
            )
            .await
            {
                Ok(Ok(count)) => {
                    if count > 0 {
                        tracing::info!(count, "trust score recovery applied");
                    }
                }
                Ok(Err(e)) => error!(error = %e, "trust score recovery failed"),
                Err(_) => error!("trust score recovery timed out"),
            }

            tokio::select! {
                _ = cancellation.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartographus_duckdb::DuckDbBackend;
    use cartographus_detect::ImpossibleTravelDetector;
    use chrono::Utc;

    fn test_config() -> Config {
        Config {
            data_dir: "./data".to_string(),
            duckdb_memory_limit: "512MB".to_string(),
            violation_channel_capacity: 8,
            trust_decrement_amount: 10,
            trust_recovery_amount: 10,
            trust_recovery_interval_secs: 1,
            device_ip_window_secs: 300,
            device_ip_cache_capacity: 1_000,
            last_event_ttl_secs: 30,
            geolocation_cache_capacity: 1_000,
            geolocation_cache_ttl_secs: 3600,
            notifier_rate_limit_secs: 1,
        }
    }

    #[tokio::test]
    async fn process_persists_an_alert_and_queues_a_trust_violation() {
        let backend = Arc::new(DuckDbBackend::open_in_memory().await.expect("open db"));
        backend
            .seed_playback_event(&DetectionEvent {
                event_id: "evt-0".to_string(),
                session_key: "sess-0".to_string(),
                event_type: "start".to_string(),
                server_id: "srv1".to_string(),
                timestamp: Utc::now() - chrono::Duration::minutes(10),
                user_id: 1,
                username: "alice".to_string(),
                latitude: 51.5074,
                longitude: -0.1278,
                city: "London".to_string(),
                country: "GB".to_string(),
                ..Default::default()
            })
            .await
            .expect("seed last event");

        let detector: Arc<dyn Detector> = Arc::new(ImpossibleTravelDetector::new(Arc::clone(&backend)));
        let engine = Arc::new(Engine::new(
            backend.clone(),
            backend.clone(),
            backend.clone(),
            vec![detector],
            Vec::new(),
            None,
            Arc::new(Metrics::new()),
            &test_config(),
        ));

        let event = DetectionEvent {
            event_id: "evt-1".to_string(),
            session_key: "sess-1".to_string(),
            event_type: "start".to_string(),
            server_id: "srv1".to_string(),
            timestamp: Utc::now(),
            user_id: 1,
            username: "alice".to_string(),
            latitude: 40.7128,
            longitude: -74.0060,
            city: "New York".to_string(),
            country: "US".to_string(),
            ..Default::default()
        };

        let (alerts, error) = engine.process(event).await;
        assert!(error.is_none());
        assert_eq!(alerts.len(), 1);
        assert_eq!(engine.metrics().snapshot().alerts_generated, 1);
    }

    #[tokio::test]
    async fn process_returns_nothing_when_engine_disabled() {
        let backend = Arc::new(DuckDbBackend::open_in_memory().await.expect("open db"));
        let detector: Arc<dyn Detector> = Arc::new(ImpossibleTravelDetector::new(Arc::clone(&backend)));
        let engine = Arc::new(Engine::new(
            backend.clone(),
            backend.clone(),
            backend.clone(),
            vec![detector],
            Vec::new(),
            None,
            Arc::new(Metrics::new()),
            &test_config(),
        ));
        engine.set_enabled(false);

        let (alerts, error) = engine.process(DetectionEvent::default()).await;
        assert!(alerts.is_empty());
        assert!(error.is_none());
    }

    #[tokio::test]
    async fn run_drains_the_violation_channel_after_cancellation() {
        let backend = Arc::new(DuckDbBackend::open_in_memory().await.expect("open db"));
        let engine = Arc::new(Engine::new(
            backend.clone(),
            backend.clone(),
            backend.clone(),
            Vec::new(),
            Vec::new(),
            None,
            Arc::new(Metrics::new()),
            &test_config(),
        ));

        engine
            .violation_tx
            .try_send(Violation {
                user_id: 99,
                username: "carol".to_string(),
            })
            .expect("queue a violation before run starts");

        let cancellation = CancellationToken::new();
        cancellation.cancel();
        Arc::clone(&engine).run(cancellation).await;

        let score = backend.get_trust_score(99).await.expect("trust score lookup");
        assert_eq!(score.score, 90);
    }
}

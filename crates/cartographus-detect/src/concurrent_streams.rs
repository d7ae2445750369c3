use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use cartographus_core::alert::{NewAlert, Severity};
use cartographus_core::detector::Detector;
use cartographus_core::event::DetectionEvent;
use cartographus_core::history::EventHistory;
use cartographus_core::rule::RuleType;
use serde::{Deserialize, Serialize};

use crate::error::DetectError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrentStreamsConfig {
    pub default_limit: u32,
    pub user_limits: HashMap<String, u32>,
    pub severity: Severity,
}

impl Default for ConcurrentStreamsConfig {
    fn default() -> Self {
        ConcurrentStreamsConfig {
            default_limit: 3,
            user_limits: HashMap::new(),
            severity: Severity::Warning,
        }
    }
}

impl ConcurrentStreamsConfig {
    fn validate(&self) -> Result<(), DetectError> {
        if self.default_limit == 0 {
            return Err(DetectError::InvalidConfig(
                "default_limit must be > 0".to_string(),
            ));
        }
        if self.user_limits.values().any(|limit| *limit == 0) {
            return Err(DetectError::InvalidConfig(
                "user_limits entries must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    fn limit_for(&self, user_id: i64) -> u32 {
        self.user_limits
            .get(&user_id.to_string())
            .copied()
            .unwrap_or(self.default_limit)
    }
}

pub struct ConcurrentStreamsDetector<H: EventHistory + 'static> {
    history: Arc<H>,
    config: RwLock<ConcurrentStreamsConfig>,
    enabled: AtomicBool,
}

impl<H: EventHistory + 'static> ConcurrentStreamsDetector<H> {
    pub fn new(history: Arc<H>) -> Self {
        ConcurrentStreamsDetector {
            history,
            config: RwLock::new(ConcurrentStreamsConfig::default()),
            enabled: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl<H: EventHistory + 'static> Detector for ConcurrentStreamsDetector<H> {
    fn rule_type(&self) -> RuleType {
        RuleType::ConcurrentStreams
    }

    async fn check(&self, event: &DetectionEvent) -> anyhow::Result<Option<NewAlert>> {
        if !event.event_type.is_empty() && event.event_type != "start" {
            return Ok(None);
        }
        let config = self.config.read().expect("concurrent streams config lock").clone();
        let active = self
            .history
            .active_streams_for_user(event.user_id, &event.server_id)
            .await?;
        let limit = config.limit_for(event.user_id);
        let count = active.len() as u32 + 1;
        if count <= limit {
            return Ok(None);
        }

        let mut session_keys: Vec<String> = active.iter().map(|e| e.session_key.clone()).collect();
        session_keys.push(event.session_key.clone());

        let metadata = serde_json::json!({
            "active_streams": count,
            "limit": limit,
            "session_keys": session_keys,
        });

        Ok(Some(NewAlert {
            rule_type: RuleType::ConcurrentStreams.as_str().to_string(),
            user_id: event.user_id,
            username: event.username.clone(),
            server_id: Some(event.server_id.clone()).filter(|s| !s.is_empty()),
            machine_id: Some(event.machine_id.clone()).filter(|s| !s.is_empty()),
            ip_address: Some(event.ip_address.clone()).filter(|s| !s.is_empty()),
            severity: config.severity,
            title: "Concurrent stream limit exceeded".to_string(),
            message: format!(
                "{} has {} concurrent streams, exceeding the limit of {}",
                event.username, count, limit
            ),
            metadata,
        }))
    }

    fn configure(&self, raw_config: serde_json::Value) -> anyhow::Result<()> {
        let parsed: ConcurrentStreamsConfig = serde_json::from_value(raw_config)
            .map_err(|e| DetectError::InvalidConfig(e.to_string()))?;
        parsed.validate()?;
        *self.config.write().expect("concurrent streams config lock") = parsed;
        Ok(())
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use cartographus_duckdb::DuckDbBackend;
    use chrono::Utc;

    use super::*;

    fn active_event(user_id: i64, session_key: &str) -> DetectionEvent {
        DetectionEvent {
            event_id: format!("evt-{session_key}"),
            session_key: session_key.to_string(),
            event_type: "start".to_string(),
            server_id: "srv1".to_string(),
            timestamp: Utc::now(),
            user_id,
            username: "alice".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn fires_when_the_new_stream_exceeds_the_limit() {
        let backend = Arc::new(DuckDbBackend::open_in_memory().await.expect("open db"));
        for key in ["s1", "s2", "s3"] {
            backend
                .seed_playback_event(&active_event(1, key))
                .await
                .expect("seed active stream");
        }

        let detector = ConcurrentStreamsDetector::new(backend);
        let current = active_event(1, "s4");
        let alert = detector
            .check(&current)
            .await
            .expect("check")
            .expect("alert fires");
        assert_eq!(alert.metadata["active_streams"], 4);
        assert_eq!(alert.metadata["limit"], 3);
    }

    #[tokio::test]
    async fn respects_a_per_user_limit_override() {
        let backend = Arc::new(DuckDbBackend::open_in_memory().await.expect("open db"));
        for key in ["s1", "s2", "s3", "s4"] {
            backend
                .seed_playback_event(&active_event(7, key))
                .await
                .expect("seed active stream");
        }
        let detector = ConcurrentStreamsDetector::new(backend);
        let mut overrides = HashMap::new();
        overrides.insert("7".to_string(), 10u32);
        detector
            .configure(serde_json::json!({"default_limit": 3, "user_limits": overrides, "severity": "warning"}))
            .expect("configure");

        let alert = detector
            .check(&active_event(7, "s5"))
            .await
            .expect("check");
        assert!(alert.is_none());
    }

    #[tokio::test]
    async fn ignores_non_start_events() {
        let backend = Arc::new(DuckDbBackend::open_in_memory().await.expect("open db"));
        let detector = ConcurrentStreamsDetector::new(backend);
        let mut event = active_event(1, "s1");
        event.event_type = "pause".to_string();
        let alert = detector.check(&event).await.expect("check");
        assert!(alert.is_none());
    }
}

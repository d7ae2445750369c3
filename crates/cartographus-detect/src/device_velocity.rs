use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use cartographus_core::alert::{NewAlert, Severity};
use cartographus_core::detector::Detector;
use cartographus_core::event::DetectionEvent;
use cartographus_core::history::EventHistory;
use cartographus_core::rule::RuleType;
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::DetectError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceVelocityConfig {
    pub window_minutes: i64,
    pub max_unique_ips: u32,
    pub severity: Severity,
}

impl Default for DeviceVelocityConfig {
    fn default() -> Self {
        DeviceVelocityConfig {
            window_minutes: 5,
            max_unique_ips: 3,
            severity: Severity::Warning,
        }
    }
}

impl DeviceVelocityConfig {
    fn validate(&self) -> Result<(), DetectError> {
        if self.window_minutes <= 0 {
            return Err(DetectError::InvalidConfig(
                "window_minutes must be > 0".to_string(),
            ));
        }
        if self.max_unique_ips == 0 {
            return Err(DetectError::InvalidConfig(
                "max_unique_ips must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn truncate_machine_id(machine_id: &str) -> String {
    if machine_id.chars().count() > 12 {
        format!("{}...", machine_id.chars().take(8).collect::<String>())
    } else {
        machine_id.to_string()
    }
}

pub struct DeviceVelocityDetector<H: EventHistory + 'static> {
    history: Arc<H>,
    config: RwLock<DeviceVelocityConfig>,
    enabled: AtomicBool,
}

impl<H: EventHistory + 'static> DeviceVelocityDetector<H> {
    pub fn new(history: Arc<H>) -> Self {
        DeviceVelocityDetector {
            history,
            config: RwLock::new(DeviceVelocityConfig::default()),
            enabled: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl<H: EventHistory + 'static> Detector for DeviceVelocityDetector<H> {
    fn rule_type(&self) -> RuleType {
        RuleType::DeviceVelocity
    }

    async fn check(&self, event: &DetectionEvent) -> anyhow::Result<Option<NewAlert>> {
        if event.machine_id.is_empty() {
            return Ok(None);
        }
        let config = self.config.read().expect("device velocity config lock").clone();
        let window = Duration::minutes(config.window_minutes);
        let mut ips: BTreeSet<String> = self
            .history
            .recent_ips_for_device(&event.machine_id, &event.server_id, window)
            .await?
            .into_iter()
            .collect();
        if !event.ip_address.is_empty() {
            ips.insert(event.ip_address.clone());
        }
        if ips.len() as u32 <= config.max_unique_ips {
            return Ok(None);
        }

        let ip_list: Vec<String> = ips.into_iter().collect();
        let metadata = serde_json::json!({
            "machine_id": event.machine_id,
            "window_minutes": config.window_minutes,
            "unique_ip_count": ip_list.len(),
            "ips": ip_list,
        });

        Ok(Some(NewAlert {
            rule_type: RuleType::DeviceVelocity.as_str().to_string(),
            user_id: event.user_id,
            username: event.username.clone(),
            server_id: Some(event.server_id.clone()).filter(|s| !s.is_empty()),
            machine_id: Some(event.machine_id.clone()),
            ip_address: Some(event.ip_address.clone()).filter(|s| !s.is_empty()),
            severity: config.severity,
            title: "Device IP velocity exceeded".to_string(),
            message: format!(
                "Device {} used {} distinct IPs within {} minutes",
                truncate_machine_id(&event.machine_id),
                metadata["unique_ip_count"],
                config.window_minutes
            ),
            metadata,
        }))
    }

    fn configure(&self, raw_config: serde_json::Value) -> anyhow::Result<()> {
        let parsed: DeviceVelocityConfig = serde_json::from_value(raw_config)
            .map_err(|e| DetectError::InvalidConfig(e.to_string()))?;
        parsed.validate()?;
        *self.config.write().expect("device velocity config lock") = parsed;
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

    fn event_from_ip(machine_id: &str, ip: &str) -> DetectionEvent {
        DetectionEvent {
            event_id: format!("evt-{ip}"),
            session_key: format!("sess-{ip}"),
            event_type: "start".to_string(),
            server_id: "srv1".to_string(),
            timestamp: Utc::now(),
            user_id: 1,
            username: "alice".to_string(),
            machine_id: machine_id.to_string(),
            ip_address: ip.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn fires_when_a_device_exceeds_the_unique_ip_budget() {
        let backend = Arc::new(DuckDbBackend::open_in_memory().await.expect("open db"));
        for ip in ["203.0.113.1", "203.0.113.2", "203.0.113.3"] {
            backend
                .seed_playback_event(&event_from_ip("device-abc-123", ip))
                .await
                .expect("seed ip");
        }

        let detector = DeviceVelocityDetector::new(backend);
        let current = event_from_ip("device-abc-123", "203.0.113.4");
        let alert = detector
            .check(&current)
            .await
            .expect("check")
            .expect("alert fires");
        assert_eq!(alert.metadata["unique_ip_count"], 4);
        assert!(alert.message.contains("device-a..."));
    }

    #[tokio::test]
    async fn skips_events_with_no_machine_id() {
        let backend = Arc::new(DuckDbBackend::open_in_memory().await.expect("open db"));
        let detector = DeviceVelocityDetector::new(backend);
        let mut event = event_from_ip("", "203.0.113.1");
        event.machine_id.clear();
        let alert = detector.check(&event).await.expect("check");
        assert!(alert.is_none());
    }
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use cartographus_core::alert::{NewAlert, Severity};
use cartographus_core::detector::Detector;
use cartographus_core::event::DetectionEvent;
use cartographus_core::geo::normalise_platform;
use cartographus_core::history::EventHistory;
use cartographus_core::rule::RuleType;
use serde::{Deserialize, Serialize};

use crate::error::DetectError;

fn default_suspicious_patterns() -> Vec<String> {
    [
        "curl", "wget", "python", "bot", "crawler", "spider", "headless", "phantom", "selenium",
        "puppeteer",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UserAgentAnomalyConfig {
    pub window_minutes: i64,
    pub alert_on_new_user_agent: bool,
    pub alert_on_platform_switch: bool,
    /// Reserved for a future per-user history-length gate; validated and
    /// round-tripped but not currently consulted.
    pub min_history_for_anomaly: u32,
    pub suspicious_patterns: Vec<String>,
    pub severity: Severity,
}

impl Default for UserAgentAnomalyConfig {
    fn default() -> Self {
        UserAgentAnomalyConfig {
            window_minutes: 30,
            alert_on_new_user_agent: true,
            alert_on_platform_switch: true,
            min_history_for_anomaly: 3,
            suspicious_patterns: default_suspicious_patterns(),
            severity: Severity::Warning,
        }
    }
}

impl UserAgentAnomalyConfig {
    fn validate(&self) -> Result<(), DetectError> {
        if self.window_minutes <= 0 {
            return Err(DetectError::InvalidConfig(
                "window_minutes must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct UserAgentAnomalyDetector<H: EventHistory + 'static> {
    history: Arc<H>,
    config: RwLock<UserAgentAnomalyConfig>,
    enabled: AtomicBool,
}

impl<H: EventHistory + 'static> UserAgentAnomalyDetector<H> {
    pub fn new(history: Arc<H>) -> Self {
        UserAgentAnomalyDetector {
            history,
            config: RwLock::new(UserAgentAnomalyConfig::default()),
            enabled: AtomicBool::new(true),
        }
    }

    fn base_alert(event: &DetectionEvent, severity: Severity) -> NewAlertBuilder {
        NewAlertBuilder {
            user_id: event.user_id,
            username: event.username.clone(),
            server_id: Some(event.server_id.clone()).filter(|s| !s.is_empty()),
            machine_id: Some(event.machine_id.clone()).filter(|s| !s.is_empty()),
            ip_address: Some(event.ip_address.clone()).filter(|s| !s.is_empty()),
            severity,
        }
    }
}

struct NewAlertBuilder {
    user_id: i64,
    username: String,
    server_id: Option<String>,
    machine_id: Option<String>,
    ip_address: Option<String>,
    severity: Severity,
}

impl NewAlertBuilder {
    fn build(self, title: &str, message: String, metadata: serde_json::Value) -> NewAlert {
        NewAlert {
            rule_type: RuleType::UserAgentAnomaly.as_str().to_string(),
            user_id: self.user_id,
            username: self.username,
            server_id: self.server_id,
            machine_id: self.machine_id,
            ip_address: self.ip_address,
            severity: self.severity,
            title: title.to_string(),
            message,
            metadata,
        }
    }
}

#[async_trait]
impl<H: EventHistory + 'static> Detector for UserAgentAnomalyDetector<H> {
    fn rule_type(&self) -> RuleType {
        RuleType::UserAgentAnomaly
    }

    async fn check(&self, event: &DetectionEvent) -> anyhow::Result<Option<NewAlert>> {
        if event.platform.is_empty() && event.player.is_empty() {
            return Ok(None);
        }
        let config = self.config.read().expect("user agent anomaly config lock").clone();

        let haystack = format!(
            "{} {} {}",
            event.platform.to_lowercase(),
            event.player.to_lowercase(),
            event.device.to_lowercase()
        );
        if let Some(pattern) = config
            .suspicious_patterns
            .iter()
            .find(|p| haystack.contains(p.to_lowercase().as_str()))
        {
            let metadata = serde_json::json!({
                "anomaly_type": "suspicious_pattern",
                "matched_pattern": pattern,
            });
            return Ok(Some(
                Self::base_alert(event, Severity::Critical).build(
                    "Suspicious client signature detected",
                    format!(
                        "{}'s client signature matched a suspicious pattern: {}",
                        event.username, pattern
                    ),
                    metadata,
                ),
            ));
        }

        let last = match self
            .history
            .last_event_for_user(event.user_id, &event.server_id)
            .await?
        {
            Some(last) => last,
            None => return Ok(None),
        };

        let delta = event.timestamp - last.timestamp;
        let within_window = delta.num_seconds() >= 0 && delta.num_minutes() < config.window_minutes;

        if config.alert_on_platform_switch && within_window {
            let current_family = normalise_platform(&event.platform);
            let previous_family = normalise_platform(&last.platform);
            if current_family != previous_family {
                let metadata = serde_json::json!({
                    "anomaly_type": "platform_switch",
                    "previous_platform": last.platform,
                    "current_platform": event.platform,
                });
                return Ok(Some(
                    Self::base_alert(event, config.severity).build(
                        "Platform switch detected",
                        format!(
                            "{} switched from {} to {}",
                            event.username, previous_family, current_family
                        ),
                        metadata,
                    ),
                ));
            }
        }

        if config.alert_on_new_user_agent && within_window {
            let changed = (event.platform.as_str(), event.player.as_str(), event.device.as_str())
                != (last.platform.as_str(), last.player.as_str(), last.device.as_str());
            if changed {
                let metadata = serde_json::json!({
                    "anomaly_type": "new_agent",
                    "previous": {"platform": last.platform, "player": last.player, "device": last.device},
                    "current": {"platform": event.platform, "player": event.player, "device": event.device},
                });
                return Ok(Some(
                    Self::base_alert(event, Severity::Info).build(
                        "New client signature observed",
                        format!("{} streamed with a previously unseen client signature", event.username),
                        metadata,
                    ),
                ));
            }
        }

        Ok(None)
    }

    fn configure(&self, raw_config: serde_json::Value) -> anyhow::Result<()> {
        let parsed: UserAgentAnomalyConfig = serde_json::from_value(raw_config)
            .map_err(|e| DetectError::InvalidConfig(e.to_string()))?;
        parsed.validate()?;
        *self.config.write().expect("user agent anomaly config lock") = parsed;
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
    use chrono::{Duration, Utc};

    use super::*;

    fn event_with_client(platform: &str, player: &str, device: &str, minutes_ago: i64) -> DetectionEvent {
        DetectionEvent {
            event_id: format!("evt-{minutes_ago}"),
            session_key: format!("sess-{minutes_ago}"),
            event_type: "start".to_string(),
            server_id: "srv1".to_string(),
            timestamp: Utc::now() - Duration::minutes(minutes_ago),
            user_id: 1,
            username: "alice".to_string(),
            platform: platform.to_string(),
            player: player.to_string(),
            device: device.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn suspicious_pattern_overrides_configured_severity() {
        let backend = Arc::new(DuckDbBackend::open_in_memory().await.expect("open db"));
        let detector = UserAgentAnomalyDetector::new(backend);
        let event = event_with_client("Linux", "curl/8.1", "server", 0);
        let alert = detector
            .check(&event)
            .await
            .expect("check")
            .expect("alert fires");
        assert_eq!(alert.severity, Severity::Critical);
        assert_eq!(alert.metadata["anomaly_type"], "suspicious_pattern");
        assert_eq!(alert.metadata["matched_pattern"], "curl");
    }

    #[tokio::test]
    async fn platform_switch_within_window_fires() {
        let backend = Arc::new(DuckDbBackend::open_in_memory().await.expect("open db"));
        backend
            .seed_playback_event(&event_with_client("iOS", "iOS Player", "iPhone", 10))
            .await
            .expect("seed last event");

        let detector = UserAgentAnomalyDetector::new(backend);
        let event = event_with_client("Windows", "Plex Media Player", "PC", 0);
        let alert = detector
            .check(&event)
            .await
            .expect("check")
            .expect("alert fires");
        assert_eq!(alert.metadata["anomaly_type"], "platform_switch");
    }

    #[tokio::test]
    async fn skips_entirely_when_platform_and_player_are_both_empty() {
        let backend = Arc::new(DuckDbBackend::open_in_memory().await.expect("open db"));
        let detector = UserAgentAnomalyDetector::new(backend);
        let event = event_with_client("", "", "some-device", 0);
        let alert = detector.check(&event).await.expect("check");
        assert!(alert.is_none());
    }
}

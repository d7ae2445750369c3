use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use cartographus_core::alert::{NewAlert, Severity};
use cartographus_core::detector::Detector;
use cartographus_core::event::DetectionEvent;
use cartographus_core::geo::haversine_distance;
use cartographus_core::history::EventHistory;
use cartographus_core::rule::RuleType;
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::DetectError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimultaneousLocationsConfig {
    pub window_minutes: i64,
    pub min_distance_km: f64,
    pub severity: Severity,
}

impl Default for SimultaneousLocationsConfig {
    fn default() -> Self {
        SimultaneousLocationsConfig {
            window_minutes: 30,
            min_distance_km: 50.0,
            severity: Severity::Critical,
        }
    }
}

impl SimultaneousLocationsConfig {
    fn validate(&self) -> Result<(), DetectError> {
        if self.window_minutes <= 0 {
            return Err(DetectError::InvalidConfig(
                "window_minutes must be > 0".to_string(),
            ));
        }
        if self.min_distance_km < 0.0 {
            return Err(DetectError::InvalidConfig(
                "min_distance_km must be >= 0".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct SimultaneousLocationsDetector<H: EventHistory + 'static> {
    history: Arc<H>,
    config: RwLock<SimultaneousLocationsConfig>,
    enabled: AtomicBool,
}

impl<H: EventHistory + 'static> SimultaneousLocationsDetector<H> {
    pub fn new(history: Arc<H>) -> Self {
        SimultaneousLocationsDetector {
            history,
            config: RwLock::new(SimultaneousLocationsConfig::default()),
            enabled: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl<H: EventHistory + 'static> Detector for SimultaneousLocationsDetector<H> {
    fn rule_type(&self) -> RuleType {
        RuleType::SimultaneousLocations
    }

    async fn check(&self, event: &DetectionEvent) -> anyhow::Result<Option<NewAlert>> {
        if event.has_unknown_location() {
            return Ok(None);
        }
        let config = self.config.read().expect("simultaneous locations config lock").clone();
        let window = Duration::minutes(config.window_minutes);
        let others = self
            .history
            .simultaneous_locations_for_user(event.user_id, &event.server_id, window)
            .await?;

        let mut distant = Vec::new();
        for other in &others {
            if other.session_key == event.session_key {
                continue;
            }
            if other.has_unknown_location() {
                continue;
            }
            let distance_km =
                haversine_distance(event.latitude, event.longitude, other.latitude, other.longitude);
            if distance_km >= config.min_distance_km {
                distant.push(serde_json::json!({
                    "session_key": other.session_key,
                    "city": other.city,
                    "country": other.country,
                    "latitude": other.latitude,
                    "longitude": other.longitude,
                    "distance_km": (distance_km * 100.0).round() / 100.0,
                }));
            }
        }

        if distant.is_empty() {
            return Ok(None);
        }

        let summary: Vec<String> = distant
            .iter()
            .map(|d| format!("{}, {}", d["city"].as_str().unwrap_or(""), d["country"].as_str().unwrap_or("")))
            .collect();

        let metadata = serde_json::json!({
            "current": {
                "session_key": event.session_key,
                "city": event.city,
                "country": event.country,
                "latitude": event.latitude,
                "longitude": event.longitude,
            },
            "distant_locations": distant,
        });

        Ok(Some(NewAlert {
            rule_type: RuleType::SimultaneousLocations.as_str().to_string(),
            user_id: event.user_id,
            username: event.username.clone(),
            server_id: Some(event.server_id.clone()).filter(|s| !s.is_empty()),
            machine_id: Some(event.machine_id.clone()).filter(|s| !s.is_empty()),
            ip_address: Some(event.ip_address.clone()).filter(|s| !s.is_empty()),
            severity: config.severity,
            title: "Simultaneous streams from distant locations".to_string(),
            message: format!(
                "{} is streaming from {} other distant location(s): {}",
                event.username,
                summary.len(),
                summary.join(", ")
            ),
            metadata,
        }))
    }

    fn configure(&self, raw_config: serde_json::Value) -> anyhow::Result<()> {
        let parsed: SimultaneousLocationsConfig = serde_json::from_value(raw_config)
            .map_err(|e| DetectError::InvalidConfig(e.to_string()))?;
        parsed.validate()?;
        *self.config.write().expect("simultaneous locations config lock") = parsed;
        Ok(())
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

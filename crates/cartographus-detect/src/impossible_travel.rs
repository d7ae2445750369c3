use std::sync::RwLock;

use async_trait::async_trait;
use cartographus_core::alert::{NewAlert, Severity};
use cartographus_core::detector::Detector;
use cartographus_core::event::DetectionEvent;
use cartographus_core::geo::haversine_distance;
use cartographus_core::history::EventHistory;
use cartographus_core::rule::RuleType;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::DetectError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpossibleTravelConfig {
    pub max_speed_kmh: f64,
    pub min_distance_km: f64,
    pub min_time_delta_minutes: i64,
    pub severity: Severity,
}

impl Default for ImpossibleTravelConfig {
    fn default() -> Self {
        ImpossibleTravelConfig {
            max_speed_kmh: 900.0,
            min_distance_km: 100.0,
            min_time_delta_minutes: 5,
            severity: Severity::Critical,
        }
    }
}

impl ImpossibleTravelConfig {
    fn validate(&self) -> Result<(), DetectError> {
        if self.max_speed_kmh <= 0.0 {
            return Err(DetectError::InvalidConfig(
                "max_speed_kmh must be > 0".to_string(),
            ));
        }
        if self.min_distance_km < 0.0 {
            return Err(DetectError::InvalidConfig(
                "min_distance_km must be >= 0".to_string(),
            ));
        }
        if self.min_time_delta_minutes < 0 {
            return Err(DetectError::InvalidConfig(
                "min_time_delta_minutes must be >= 0".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct ImpossibleTravelDetector<H: EventHistory + 'static> {
    history: Arc<H>,
    config: RwLock<ImpossibleTravelConfig>,
    enabled: std::sync::atomic::AtomicBool,
}

impl<H: EventHistory + 'static> ImpossibleTravelDetector<H> {
    pub fn new(history: Arc<H>) -> Self {
        ImpossibleTravelDetector {
            history,
            config: RwLock::new(ImpossibleTravelConfig::default()),
            enabled: std::sync::atomic::AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl<H: EventHistory + 'static> Detector for ImpossibleTravelDetector<H> {
    fn rule_type(&self) -> RuleType {
        RuleType::ImpossibleTravel
    }

    async fn check(&self, event: &DetectionEvent) -> anyhow::Result<Option<NewAlert>> {
        if event.has_unknown_location() {
            return Ok(None);
        }
        let config = self.config.read().expect("impossible travel config lock").clone();

        let last = match self
            .history
            .last_event_for_user(event.user_id, &event.server_id)
            .await?
        {
            Some(last) if !last.has_unknown_location() => last,
            _ => return Ok(None),
        };

        let delta = event.timestamp - last.timestamp;
        if delta.num_seconds() < 0 {
            return Ok(None);
        }
        if delta.num_minutes() < config.min_time_delta_minutes {
            return Ok(None);
        }

        let distance_km = haversine_distance(
            last.latitude,
            last.longitude,
            event.latitude,
            event.longitude,
        );
        if distance_km < config.min_distance_km {
            return Ok(None);
        }

        let mut hours = delta.num_seconds() as f64 / 3600.0;
        if hours.abs() < 1e-9 {
            hours = 0.001;
        }
        let required_speed_kmh = distance_km / hours;
        if required_speed_kmh <= config.max_speed_kmh {
            return Ok(None);
        }

        let metadata = serde_json::json!({
            "from": {
                "city": last.city,
                "country": last.country,
                "latitude": last.latitude,
                "longitude": last.longitude,
                "timestamp": last.timestamp,
            },
            "to": {
                "city": event.city,
                "country": event.country,
                "latitude": event.latitude,
                "longitude": event.longitude,
                "timestamp": event.timestamp,
            },
            "distance_km": (distance_km * 100.0).round() / 100.0,
            "delta_minutes": delta.num_minutes(),
            "required_speed_kmh": (required_speed_kmh * 100.0).round() / 100.0,
        });

        Ok(Some(NewAlert {
            rule_type: RuleType::ImpossibleTravel.as_str().to_string(),
            user_id: event.user_id,
            username: event.username.clone(),
            server_id: Some(event.server_id.clone()).filter(|s| !s.is_empty()),
            machine_id: Some(event.machine_id.clone()).filter(|s| !s.is_empty()),
            ip_address: Some(event.ip_address.clone()).filter(|s| !s.is_empty()),
            severity: config.severity,
            title: "Impossible travel detected".to_string(),
            message: format!(
                "{} travelled {:.2} km in {} minutes, which would require {:.0} km/h",
                event.username,
                distance_km,
                delta.num_minutes(),
                required_speed_kmh
            ),
            metadata,
        }))
    }

    fn configure(&self, raw_config: serde_json::Value) -> anyhow::Result<()> {
        let parsed: ImpossibleTravelConfig = serde_json::from_value(raw_config)
            .map_err(|e| DetectError::InvalidConfig(e.to_string()))?;
        parsed.validate()?;
        *self.config.write().expect("impossible travel config lock") = parsed;
        Ok(())
    }

    fn enabled(&self) -> bool {
        self.enabled.load(std::sync::atomic::Ordering::Relaxed)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, std::sync::atomic::Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use cartographus_duckdb::DuckDbBackend;
    use chrono::{Duration, Utc};

    use super::*;

    fn event(user_id: i64, lat: f64, lon: f64, city: &str, country: &str, minutes_ago: i64) -> DetectionEvent {
        DetectionEvent {
            event_id: format!("evt-{minutes_ago}"),
            session_key: format!("sess-{minutes_ago}"),
            event_type: "start".to_string(),
            server_id: "srv1".to_string(),
            timestamp: Utc::now() - Duration::minutes(minutes_ago),
            user_id,
            username: "alice".to_string(),
            latitude: lat,
            longitude: lon,
            city: city.to_string(),
            country: country.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn fires_when_required_speed_exceeds_commercial_flight() {
        let backend = Arc::new(DuckDbBackend::open_in_memory().await.expect("open db"));
        backend
            .seed_playback_event(&event(1, 40.7128, -74.0060, "New York", "US", 10))
            .await
            .expect("seed last event");

        let detector = ImpossibleTravelDetector::new(backend);
        let current = event(1, 51.5074, -0.1278, "London", "GB", 0);
        let alert = detector
            .check(&current)
            .await
            .expect("check")
            .expect("alert fires");
        assert_eq!(alert.severity, Severity::Critical);
        assert!(alert.message.contains("would require"));
    }

    #[tokio::test]
    async fn no_alert_for_plausible_same_city_movement() {
        let backend = Arc::new(DuckDbBackend::open_in_memory().await.expect("open db"));
        backend
            .seed_playback_event(&event(2, 40.7128, -74.0060, "New York", "US", 10))
            .await
            .expect("seed last event");

        let detector = ImpossibleTravelDetector::new(backend);
        let current = event(2, 40.730610, -73.935242, "New York", "US", 0);
        let alert = detector.check(&current).await.expect("check");
        assert!(alert.is_none());
    }
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use cartographus_core::alert::{NewAlert, Severity};
use cartographus_core::detector::Detector;
use cartographus_core::event::DetectionEvent;
use cartographus_core::rule::RuleType;
use serde::{Deserialize, Serialize};

use crate::error::DetectError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoRestrictionConfig {
    pub blocked_countries: Vec<String>,
    pub allowed_countries: Vec<String>,
    pub severity: Severity,
}

impl Default for GeoRestrictionConfig {
    fn default() -> Self {
        GeoRestrictionConfig {
            blocked_countries: Vec::new(),
            allowed_countries: Vec::new(),
            severity: Severity::Warning,
        }
    }
}

enum Mode {
    Blocklist,
    Allowlist,
}

impl GeoRestrictionConfig {
    fn validate(&self) -> Result<(), DetectError> {
        let has_blocked = !self.blocked_countries.is_empty();
        let has_allowed = !self.allowed_countries.is_empty();
        if has_blocked == has_allowed {
            return Err(DetectError::InvalidConfig(
                "exactly one of blocked_countries or allowed_countries must be set".to_string(),
            ));
        }
        Ok(())
    }

    fn mode(&self) -> Mode {
        if !self.blocked_countries.is_empty() {
            Mode::Blocklist
        } else {
            Mode::Allowlist
        }
    }
}

pub struct GeoRestrictionDetector {
    config: RwLock<GeoRestrictionConfig>,
    enabled: AtomicBool,
}

impl Default for GeoRestrictionDetector {
    fn default() -> Self {
        GeoRestrictionDetector {
            config: RwLock::new(GeoRestrictionConfig::default()),
            // Disabled by default: a blank allow/block list has no meaning.
            enabled: AtomicBool::new(false),
        }
    }
}

impl GeoRestrictionDetector {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Detector for GeoRestrictionDetector {
    fn rule_type(&self) -> RuleType {
        RuleType::GeoRestriction
    }

    async fn check(&self, event: &DetectionEvent) -> anyhow::Result<Option<NewAlert>> {
        if event.country.is_empty() {
            return Ok(None);
        }
        let config = self.config.read().expect("geo restriction config lock").clone();
        let (triggered, mode_label, active_list) = match config.mode() {
            Mode::Blocklist => (
                config.blocked_countries.contains(&event.country),
                "blocklist",
                config.blocked_countries.clone(),
            ),
            Mode::Allowlist => (
                !config.allowed_countries.contains(&event.country),
                "allowlist",
                config.allowed_countries.clone(),
            ),
        };
        if !triggered {
            return Ok(None);
        }

        let metadata = serde_json::json!({
            "mode": mode_label,
            "active_list": active_list,
            "country": event.country,
        });

        Ok(Some(NewAlert {
            rule_type: RuleType::GeoRestriction.as_str().to_string(),
            user_id: event.user_id,
            username: event.username.clone(),
            server_id: Some(event.server_id.clone()).filter(|s| !s.is_empty()),
            machine_id: Some(event.machine_id.clone()).filter(|s| !s.is_empty()),
            ip_address: Some(event.ip_address.clone()).filter(|s| !s.is_empty()),
            severity: config.severity,
            title: "Geographic restriction violated".to_string(),
            message: format!(
                "{} streamed from a restricted country ({}) under {} policy",
                event.username, event.country, mode_label
            ),
            metadata,
        }))
    }

    fn configure(&self, raw_config: serde_json::Value) -> anyhow::Result<()> {
        let parsed: GeoRestrictionConfig = serde_json::from_value(raw_config)
            .map_err(|e| DetectError::InvalidConfig(e.to_string()))?;
        parsed.validate()?;
        *self.config.write().expect("geo restriction config lock") = parsed;
        Ok(())
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

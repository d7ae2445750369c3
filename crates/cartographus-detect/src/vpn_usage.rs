use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use cartographus_core::alert::{NewAlert, Severity};
use cartographus_core::detector::Detector;
use cartographus_core::event::DetectionEvent;
use cartographus_core::rule::RuleType;
use cartographus_core::vpn::VpnLookupService;
use serde::{Deserialize, Serialize};

use crate::error::DetectError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VpnUsageConfig {
    pub severity: Severity,
    pub alert_on_first_use: bool,
    pub alert_on_new_provider: bool,
    /// Reserved: validated and stored, but the lookup's confidence score is
    /// not yet wired to a decision.
    pub alert_on_high_risk: bool,
    pub excluded_providers: Vec<String>,
    pub excluded_users: Vec<i64>,
    pub track_vpn_history: bool,
}

impl Default for VpnUsageConfig {
    fn default() -> Self {
        VpnUsageConfig {
            severity: Severity::Info,
            alert_on_first_use: true,
            alert_on_new_provider: true,
            alert_on_high_risk: true,
            excluded_providers: Vec::new(),
            excluded_users: Vec::new(),
            track_vpn_history: true,
        }
    }
}

#[derive(Debug, Default, Clone)]
struct VpnUserHistory {
    providers_seen: HashSet<String>,
}

pub struct VpnUsageDetector {
    lookup: Arc<dyn VpnLookupService>,
    config: RwLock<VpnUsageConfig>,
    history: RwLock<HashMap<i64, VpnUserHistory>>,
    enabled: AtomicBool,
}

impl VpnUsageDetector {
    pub fn new(lookup: Arc<dyn VpnLookupService>) -> Self {
        VpnUsageDetector {
            lookup,
            config: RwLock::new(VpnUsageConfig::default()),
            history: RwLock::new(HashMap::new()),
            enabled: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl Detector for VpnUsageDetector {
    fn rule_type(&self) -> RuleType {
        RuleType::VpnUsage
    }

    async fn check(&self, event: &DetectionEvent) -> anyhow::Result<Option<NewAlert>> {
        let config = self.config.read().expect("vpn usage config lock").clone();

        if config.excluded_users.contains(&event.user_id) {
            return Ok(None);
        }
        if event.ip_address.is_empty() || event.location_type == "lan" {
            return Ok(None);
        }
        if !self.lookup.enabled() {
            return Ok(None);
        }

        let lookup = match self.lookup.lookup_ip(&event.ip_address).await? {
            Some(lookup) if lookup.is_vpn => lookup,
            _ => return Ok(None),
        };
        if config.excluded_providers.contains(&lookup.provider) {
            return Ok(None);
        }

        let mut history_map = self.history.write().expect("vpn usage history lock");
        let entry = history_map.entry(event.user_id).or_default();
        let is_first_use = entry.providers_seen.is_empty();
        let is_new_provider = !entry.providers_seen.contains(&lookup.provider);

        if config.track_vpn_history {
            entry.providers_seen.insert(lookup.provider.clone());
        }
        drop(history_map);

        let anomaly_type = if is_first_use && config.alert_on_first_use {
            "first_vpn_use"
        } else if is_new_provider && config.alert_on_new_provider {
            "new_vpn_provider"
        } else {
            return Ok(None);
        };

        let metadata = serde_json::json!({
            "anomaly_type": anomaly_type,
            "provider": lookup.provider,
            "provider_display_name": lookup.provider_display_name,
            "server_country": lookup.server_country,
            "server_city": lookup.server_city,
            "confidence": lookup.confidence,
        });

        Ok(Some(NewAlert {
            rule_type: RuleType::VpnUsage.as_str().to_string(),
            user_id: event.user_id,
            username: event.username.clone(),
            server_id: Some(event.server_id.clone()).filter(|s| !s.is_empty()),
            machine_id: Some(event.machine_id.clone()).filter(|s| !s.is_empty()),
            ip_address: Some(event.ip_address.clone()).filter(|s| !s.is_empty()),
            severity: config.severity,
            title: "VPN usage detected".to_string(),
            message: format!(
                "{} streamed via {} ({})",
                event.username, lookup.provider_display_name, anomaly_type
            ),
            metadata,
        }))
    }

    fn configure(&self, raw_config: serde_json::Value) -> anyhow::Result<()> {
        let parsed: VpnUsageConfig = serde_json::from_value(raw_config)
            .map_err(|e| DetectError::InvalidConfig(e.to_string()))?;
        *self.config.write().expect("vpn usage config lock") = parsed;
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
    use cartographus_core::vpn::VpnLookupResult;
    use chrono::Utc;

    use super::*;

    struct FakeLookup {
        by_ip: HashMap<String, VpnLookupResult>,
    }

    #[async_trait]
    impl VpnLookupService for FakeLookup {
        async fn lookup_ip(&self, ip: &str) -> anyhow::Result<Option<VpnLookupResult>> {
            Ok(self.by_ip.get(ip).cloned())
        }

        fn enabled(&self) -> bool {
            true
        }
    }

    fn vpn_result(provider: &str) -> VpnLookupResult {
        VpnLookupResult {
            is_vpn: true,
            provider: provider.to_string(),
            provider_display_name: provider.to_string(),
            server_country: "NL".to_string(),
            server_city: "Amsterdam".to_string(),
            confidence: 0.9,
        }
    }

    fn event_from_ip(ip: &str) -> DetectionEvent {
        DetectionEvent {
            event_id: "evt-1".to_string(),
            session_key: "sess-1".to_string(),
            event_type: "start".to_string(),
            server_id: "srv1".to_string(),
            timestamp: Utc::now(),
            user_id: 1,
            username: "alice".to_string(),
            ip_address: ip.to_string(),
            location_type: "wan".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn first_use_then_same_provider_again_is_silent_then_new_provider_fires() {
        let lookup = Arc::new(FakeLookup {
            by_ip: HashMap::from([
                ("203.0.113.1".to_string(), vpn_result("nordvpn")),
                ("203.0.113.2".to_string(), vpn_result("expressvpn")),
            ]),
        });
        let detector = VpnUsageDetector::new(lookup);

        let first = detector
            .check(&event_from_ip("203.0.113.1"))
            .await
            .expect("check")
            .expect("first alert fires");
        assert_eq!(first.metadata["anomaly_type"], "first_vpn_use");

        let same_provider = detector
            .check(&event_from_ip("203.0.113.1"))
            .await
            .expect("check");
        assert!(same_provider.is_none());

        let new_provider = detector
            .check(&event_from_ip("203.0.113.2"))
            .await
            .expect("check")
            .expect("new provider alert fires");
        assert_eq!(new_provider.metadata["anomaly_type"], "new_vpn_provider");
    }

    #[tokio::test]
    async fn non_vpn_ip_never_fires() {
        let lookup = Arc::new(FakeLookup {
            by_ip: HashMap::new(),
        });
        let detector = VpnUsageDetector::new(lookup);
        let alert = detector
            .check(&event_from_ip("203.0.113.1"))
            .await
            .expect("check");
        assert!(alert.is_none());
    }
}

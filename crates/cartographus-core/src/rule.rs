use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The seven rule types this crate ships detectors for. Stored as their
/// string form (`as_str`) so the store's unique key stays a plain string
/// column and new rule types never require a migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    ImpossibleTravel,
    ConcurrentStreams,
    DeviceVelocity,
    GeoRestriction,
    SimultaneousLocations,
    UserAgentAnomaly,
    VpnUsage,
}

impl RuleType {
    pub const ALL: [RuleType; 7] = [
        RuleType::ImpossibleTravel,
        RuleType::ConcurrentStreams,
        RuleType::DeviceVelocity,
        RuleType::GeoRestriction,
        RuleType::SimultaneousLocations,
        RuleType::UserAgentAnomaly,
        RuleType::VpnUsage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::ImpossibleTravel => "impossible_travel",
            RuleType::ConcurrentStreams => "concurrent_streams",
            RuleType::DeviceVelocity => "device_velocity",
            RuleType::GeoRestriction => "geo_restriction",
            RuleType::SimultaneousLocations => "simultaneous_locations",
            RuleType::UserAgentAnomaly => "user_agent_anomaly",
            RuleType::VpnUsage => "vpn_usage",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            RuleType::ImpossibleTravel => "Impossible Travel",
            RuleType::ConcurrentStreams => "Concurrent Streams",
            RuleType::DeviceVelocity => "Device IP Velocity",
            RuleType::GeoRestriction => "Geographic Restriction",
            RuleType::SimultaneousLocations => "Simultaneous Locations",
            RuleType::UserAgentAnomaly => "User-Agent Anomaly",
            RuleType::VpnUsage => "VPN Usage",
        }
    }

    /// Whether the rule ships enabled by default. Only `geo_restriction`
    /// requires explicit opt-in, since it needs an operator-supplied
    /// country list to mean anything.
    pub fn enabled_by_default(&self) -> bool {
        !matches!(self, RuleType::GeoRestriction)
    }
}

impl std::str::FromStr for RuleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RuleType::ALL
            .into_iter()
            .find(|rt| rt.as_str() == s)
            .ok_or_else(|| format!("unknown rule type: {s}"))
    }
}

/// A row in the rule-configuration table. Exactly one per [`RuleType`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub rule_type: RuleType,
    pub name: String,
    pub enabled: bool,
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

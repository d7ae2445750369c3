use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// A detected violation. Immutable except for acknowledgement, which is
/// monotonic: once acknowledged, an alert is never un-acknowledged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub rule_type: String,
    pub user_id: i64,
    pub username: String,
    pub server_id: Option<String>,
    pub machine_id: Option<String>,
    pub ip_address: Option<String>,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    /// Rule-specific, opaque to the store and the engine.
    pub metadata: serde_json::Value,
    pub acknowledged: bool,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Constructs an unacknowledged, unsaved alert. The store assigns `id` and
/// `created_at` on `save_alert`.
pub struct NewAlert {
    pub rule_type: String,
    pub user_id: i64,
    pub username: String,
    pub server_id: Option<String>,
    pub machine_id: Option<String>,
    pub ip_address: Option<String>,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub metadata: serde_json::Value,
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::alert::{Alert, NewAlert, Severity};
use crate::rule::{Rule, RuleType};
use crate::trust::TrustScore;

/// Columns an alert listing may be ordered by. This is the whitelist
/// referenced throughout the persistence design: anything that does not
/// parse to one of these variants falls back to `CreatedAt` descending,
/// never gets interpolated into SQL as free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOrderColumn {
    Id,
    RuleType,
    UserId,
    Username,
    ServerId,
    Severity,
    Acknowledged,
    AcknowledgedAt,
    CreatedAt,
}

impl AlertOrderColumn {
    pub fn column_name(&self) -> &'static str {
        match self {
            AlertOrderColumn::Id => "id",
            AlertOrderColumn::RuleType => "rule_type",
            AlertOrderColumn::UserId => "user_id",
            AlertOrderColumn::Username => "username",
            AlertOrderColumn::ServerId => "server_id",
            AlertOrderColumn::Severity => "severity",
            AlertOrderColumn::Acknowledged => "acknowledged",
            AlertOrderColumn::AcknowledgedAt => "acknowledged_at",
            AlertOrderColumn::CreatedAt => "created_at",
        }
    }

    /// Parses an arbitrary, possibly attacker-controlled, column name.
    /// Anything unrecognised is the caller's cue to fall back to the
    /// default ordering rather than a parse error — the whitelist behaviour
    /// itself IS the safe default, not an exceptional path.
    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "id" => AlertOrderColumn::Id,
            "rule_type" => AlertOrderColumn::RuleType,
            "user_id" => AlertOrderColumn::UserId,
            "username" => AlertOrderColumn::Username,
            "server_id" => AlertOrderColumn::ServerId,
            "severity" => AlertOrderColumn::Severity,
            "acknowledged" => AlertOrderColumn::Acknowledged,
            "acknowledged_at" => AlertOrderColumn::AcknowledgedAt,
            "created_at" => AlertOrderColumn::CreatedAt,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "ASC" => Some(SortDirection::Asc),
            "DESC" => Some(SortDirection::Desc),
            _ => None,
        }
    }

    pub fn sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// `(column, direction)` as requested by a caller. Resolve with
/// [`AlertOrdering::resolve`] before building SQL; never trust the raw
/// strings directly.
#[derive(Debug, Clone)]
pub struct AlertOrderingRequest {
    pub column: Option<String>,
    pub direction: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct AlertOrdering {
    pub column: AlertOrderColumn,
    pub direction: SortDirection,
}

impl Default for AlertOrdering {
    fn default() -> Self {
        AlertOrdering {
            column: AlertOrderColumn::CreatedAt,
            direction: SortDirection::Desc,
        }
    }
}

impl AlertOrderingRequest {
    /// Silently falls back to `created_at DESC` when either half of the
    /// request fails to whitelist-match.
    pub fn resolve(&self) -> AlertOrdering {
        let column = self
            .column
            .as_deref()
            .and_then(AlertOrderColumn::parse);
        let direction = self
            .direction
            .as_deref()
            .and_then(SortDirection::parse);
        match (column, direction) {
            (Some(column), Some(direction)) => AlertOrdering { column, direction },
            _ => AlertOrdering::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub rule_types: Vec<RuleType>,
    pub severities: Vec<Severity>,
    pub user_id: Option<i64>,
    pub server_id: Option<String>,
    pub acknowledged: Option<bool>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Pagination {
            limit: 100,
            offset: 0,
        }
    }
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Assigns `id` and `created_at`, persists, and returns the saved alert.
    async fn save_alert(&self, alert: NewAlert) -> anyhow::Result<Alert>;

    async fn get_alert(&self, id: &str) -> anyhow::Result<Option<Alert>>;

    async fn list_alerts(
        &self,
        filter: &AlertFilter,
        ordering: AlertOrderingRequest,
        pagination: Pagination,
    ) -> anyhow::Result<Vec<Alert>>;

    async fn count_alerts(&self, filter: &AlertFilter) -> anyhow::Result<u64>;

    async fn acknowledge_alert(&self, id: &str, acknowledged_by: &str) -> anyhow::Result<()>;
}

#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn list_rules(&self) -> anyhow::Result<Vec<Rule>>;

    async fn get_rule(&self, rule_type: RuleType) -> anyhow::Result<Option<Rule>>;

    /// Replaces (never merges) the config blob for `rule_type`.
    async fn update_rule(
        &self,
        rule_type: RuleType,
        enabled: bool,
        config: serde_json::Value,
    ) -> anyhow::Result<Rule>;
}

#[async_trait]
pub trait TrustStore: Send + Sync {
    async fn get_trust_score(&self, user_id: i64) -> anyhow::Result<TrustScore>;

    async fn update_trust_score(&self, score: &TrustScore) -> anyhow::Result<()>;

    /// Atomic: inserts a fresh row at `100 - amount` if absent, otherwise
    /// decrements the existing score, clamped at zero, incrementing
    /// `violations_count` and recomputing `restricted`.
    async fn decrement_trust_score(
        &self,
        user_id: i64,
        username: &str,
        amount: i32,
    ) -> anyhow::Result<TrustScore>;

    /// Raises every score below 100 by `amount`, clamped at 100, and
    /// recomputes `restricted` for each affected row.
    async fn recover_trust_scores(&self, amount: i32) -> anyhow::Result<u64>;
}

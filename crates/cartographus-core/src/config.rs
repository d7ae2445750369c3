use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {source}")]
    InvalidValue {
        var: &'static str,
        source: std::num::ParseIntError,
    },
}

/// Engine-wide configuration, read once at startup from the environment.
/// Every field has a documented default; unparseable values fall back to
/// that default rather than failing startup, matching the rest of the
/// crate's "liveness over completeness" error policy.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: String,
    /// DuckDB memory limit passed to `SET memory_limit = '...'` at init.
    /// Accepts any DuckDB size string: `"512MB"`, `"1GB"`, `"4GB"`, etc.
    pub duckdb_memory_limit: String,

    /// Capacity of the bounded channel feeding the background violation
    /// processor. Full channel drops the alert and logs a warning.
    pub violation_channel_capacity: usize,
    pub trust_decrement_amount: i32,
    pub trust_recovery_amount: i32,
    pub trust_recovery_interval_secs: u64,

    pub device_ip_window_secs: i64,
    pub device_ip_cache_capacity: usize,
    pub last_event_ttl_secs: u64,
    pub geolocation_cache_capacity: usize,
    pub geolocation_cache_ttl_secs: u64,

    /// Minimum interval between two sends for a single notifier.
    pub notifier_rate_limit_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            data_dir: std::env::var("CARTOGRAPHUS_DATA_DIR")
                .unwrap_or_else(|_| "./data".to_string()),
            duckdb_memory_limit: std::env::var("CARTOGRAPHUS_DUCKDB_MEMORY")
                .unwrap_or_else(|_| "1GB".to_string()),
            violation_channel_capacity: parse_or_default(
                "CARTOGRAPHUS_VIOLATION_CHANNEL_CAPACITY",
                100,
            )?,
            trust_decrement_amount: parse_or_default("CARTOGRAPHUS_TRUST_DECREMENT", 10)?,
            trust_recovery_amount: parse_or_default("CARTOGRAPHUS_TRUST_RECOVERY_AMOUNT", 10)?,
            trust_recovery_interval_secs: parse_or_default(
                "CARTOGRAPHUS_TRUST_RECOVERY_INTERVAL_SECS",
                24 * 60 * 60,
            )?,
            device_ip_window_secs: parse_or_default("CARTOGRAPHUS_DEVICE_IP_WINDOW_SECS", 300)?,
            device_ip_cache_capacity: parse_or_default(
                "CARTOGRAPHUS_DEVICE_IP_CACHE_CAPACITY",
                10_000,
            )?,
            last_event_ttl_secs: parse_or_default("CARTOGRAPHUS_LAST_EVENT_TTL_SECS", 30)?,
            geolocation_cache_capacity: parse_or_default(
                "CARTOGRAPHUS_GEO_CACHE_CAPACITY",
                10_000,
            )?,
            geolocation_cache_ttl_secs: parse_or_default(
                "CARTOGRAPHUS_GEO_CACHE_TTL_SECS",
                3600,
            )?,
            notifier_rate_limit_secs: parse_or_default("CARTOGRAPHUS_NOTIFIER_RATE_LIMIT_SECS", 1)?,
        })
    }

    pub fn trust_recovery_interval(&self) -> Duration {
        Duration::from_secs(self.trust_recovery_interval_secs)
    }

    pub fn notifier_rate_limit(&self) -> Duration {
        Duration::from_secs(self.notifier_rate_limit_secs)
    }
}

fn parse_or_default<T>(var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr<Err = std::num::ParseIntError>,
{
    match std::env::var(var) {
        Ok(raw) => raw
            .parse()
            .map_err(|source| ConfigError::InvalidValue { var, source }),
        Err(_) => Ok(default),
    }
}

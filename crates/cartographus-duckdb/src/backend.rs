use std::sync::Arc;

use anyhow::Result;
use cartographus_core::rule::RuleType;
use chrono::Utc;
use duckdb::Connection;
use tokio::sync::Mutex;
use tracing::info;

use crate::schema::{init_sql, MIGRATIONS_TABLE_SQL};

/// The shipped persistence backend, implementing [`cartographus_core::EventHistory`],
/// [`cartographus_core::AlertStore`], [`cartographus_core::RuleStore`], and
/// [`cartographus_core::TrustStore`] over a single DuckDB database.
///
/// DuckDB is single-writer: concurrent reads are fine, but concurrent
/// writes contend. The connection is wrapped in `Arc<Mutex<_>>` so the
/// async runtime serialises writes while still letting this struct be
/// cheaply cloned and shared across the engine and its background tasks.
#[derive(Clone)]
pub struct DuckDbBackend {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl DuckDbBackend {
    /// Opens (or creates) a DuckDB database file at `path`, bootstraps the
    /// schema, and seeds the seven default rules. Idempotent: safe to call
    /// on every process start.
    pub async fn open(path: &str, memory_limit: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(MIGRATIONS_TABLE_SQL)?;
        conn.execute_batch(&init_sql(memory_limit))?;
        // Flush after schema creation so a crash immediately after bootstrap
        // never replays DDL against a partially-visible catalog.
        conn.execute_batch("CHECKPOINT;")?;
        info!(%path, %memory_limit, "DuckDB opened");
        let backend = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        backend.seed_default_rules().await?;
        Ok(backend)
    }

    /// Opens an in-memory database. Intended for tests; data is discarded
    /// when the struct is dropped.
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(MIGRATIONS_TABLE_SQL)?;
        conn.execute_batch(&init_sql("512MB"))?;
        let backend = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        backend.seed_default_rules().await?;
        Ok(backend)
    }

    /// Upserts all seven rule types by their unique `rule_type` key. Safe
    /// to call repeatedly: existing rows (and their `enabled`/`config`
    /// customisation) are left untouched.
    async fn seed_default_rules(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        for rule_type in RuleType::ALL {
            let exists: i64 = conn
                .prepare("SELECT COUNT(*) FROM detection_rules WHERE rule_type = ?1")?
                .query_row(duckdb::params![rule_type.as_str()], |row| row.get(0))?;
            if exists > 0 {
                continue;
            }
            let id = format!("rule_{}", rule_type.as_str());
            let now = Utc::now().to_rfc3339();
            conn.execute(
                r#"INSERT INTO detection_rules (id, rule_type, name, enabled, config, created_at, updated_at)
                   VALUES (?1, ?2, ?3, ?4, '{}', ?5, ?5)"#,
                duckdb::params![
                    id,
                    rule_type.as_str(),
                    rule_type.display_name(),
                    rule_type.enabled_by_default(),
                    now,
                ],
            )?;
        }
        Ok(())
    }

    /// Inserts or replaces a single row in the `geolocations` read-model
    /// table. Intended for test fixtures; ingestion owns this table in
    /// production.
    pub async fn seed_geolocation(
        &self,
        ip: &str,
        lat: f64,
        lon: f64,
        city: &str,
        region: &str,
        country: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT OR REPLACE INTO geolocations (ip_address, latitude, longitude, city, region, country)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            duckdb::params![ip, lat, lon, city, region, country],
        )?;
        Ok(())
    }

    /// Inserts a single playback event row into the read-model table.
    /// Intended for test fixtures; a real deployment's ingestion pipeline
    /// owns this table.
    pub async fn seed_playback_event(
        &self,
        event: &cartographus_core::DetectionEvent,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT OR REPLACE INTO playback_events (
                event_id, session_key, correlation_key, event_type, source, server_id,
                event_timestamp, user_id, username, friendly_name, machine_id, platform,
                player, device, media_type, title, grandparent_title, ip_address,
                location_type, latitude, longitude, city, region, country
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24
            )"#,
            duckdb::params![
                event.event_id,
                event.session_key,
                event.correlation_key,
                event.event_type,
                event.source,
                event.server_id,
                event.timestamp.to_rfc3339(),
                event.user_id,
                event.username,
                event.friendly_name,
                event.machine_id,
                event.platform,
                event.player,
                event.device,
                event.media_type,
                event.title,
                event.grandparent_title,
                event.ip_address,
                event.location_type,
                event.latitude,
                event.longitude,
                event.city,
                event.region,
                event.country,
            ],
        )?;
        Ok(())
    }

    /// Lightweight liveness check used by operators wiring up health probes.
    pub async fn ping(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch("SELECT 1")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use cartographus_core::store::RuleStore;

    use super::*;

    #[tokio::test]
    async fn bootstrap_seeds_exactly_the_seven_rule_types() {
        let backend = DuckDbBackend::open_in_memory().await.expect("open in-memory db");
        let rules = backend.list_rules().await.expect("list rules");
        assert_eq!(rules.len(), 7);
        for rule_type in RuleType::ALL {
            assert!(
                rules.iter().any(|r| r.rule_type == rule_type),
                "missing seeded rule for {}",
                rule_type.as_str()
            );
        }
        let geo_restriction = rules
            .iter()
            .find(|r| r.rule_type == RuleType::GeoRestriction)
            .expect("geo_restriction rule present");
        assert!(!geo_restriction.enabled);
    }

    #[tokio::test]
    async fn reopening_in_memory_bootstrap_is_idempotent() {
        let backend = DuckDbBackend::open_in_memory().await.expect("open in-memory db");
        backend
            .seed_default_rules()
            .await
            .expect("re-run seed is safe");
        let rules = backend.list_rules().await.expect("list rules");
        assert_eq!(rules.len(), 7);
    }

    #[tokio::test]
    async fn ping_succeeds_on_a_fresh_database() {
        let backend = DuckDbBackend::open_in_memory().await.expect("open in-memory db");
        backend.ping().await.expect("ping");
    }
}

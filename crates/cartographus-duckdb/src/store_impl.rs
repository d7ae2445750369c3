use anyhow::{anyhow, Result};
use async_trait::async_trait;
use cartographus_core::alert::{Alert, NewAlert, Severity};
use cartographus_core::rule::{Rule, RuleType};
use cartographus_core::store::{
    AlertFilter, AlertOrderingRequest, AlertStore, Pagination, RuleStore, TrustStore,
};
use cartographus_core::trust::{clamp_score, is_restricted, TrustScore};
use chrono::{DateTime, Utc};
use rand::Rng;

use crate::backend::DuckDbBackend;

fn random_alnum(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..36);
            if idx < 10 {
                (b'0' + idx) as char
            } else {
                (b'a' + idx - 10) as char
            }
        })
        .collect()
}

fn generate_alert_id() -> String {
    format!("alrt_{}", random_alnum(21))
}

fn parse_rfc3339(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn map_alert_row(row: &duckdb::Row<'_>) -> Result<Alert, duckdb::Error> {
    let severity_raw: String = row.get(7)?;
    let severity = severity_raw.parse::<Severity>().map_err(|e| {
        duckdb::Error::FromSqlConversionFailure(
            7,
            duckdb::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        )
    })?;
    let metadata_raw: String = row.get(10)?;
    let metadata: serde_json::Value = serde_json::from_str(&metadata_raw).unwrap_or(serde_json::Value::Null);
    let created_at_raw: String = row.get(14)?;
    let acknowledged_at_raw: Option<String> = row.get(13)?;
    Ok(Alert {
        id: row.get(0)?,
        rule_type: row.get(1)?,
        user_id: row.get(2)?,
        username: row.get(3)?,
        server_id: row.get(4)?,
        machine_id: row.get(5)?,
        ip_address: row.get(6)?,
        severity,
        title: row.get(8)?,
        message: row.get(9)?,
        metadata,
        acknowledged: row.get(11)?,
        acknowledged_by: row.get(12)?,
        acknowledged_at: acknowledged_at_raw.map(|s| parse_rfc3339(&s)),
        created_at: parse_rfc3339(&created_at_raw),
    })
}

const ALERT_COLUMNS: &str = "id, rule_type, user_id, username, server_id, machine_id, ip_address, \
     severity, title, message, metadata, acknowledged, acknowledged_by, acknowledged_at, created_at";

#[async_trait]
impl AlertStore for DuckDbBackend {
    async fn save_alert(&self, alert: NewAlert) -> Result<Alert> {
        let id = generate_alert_id();
        let now = Utc::now();
        let metadata = serde_json::to_string(&alert.metadata)?;
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO detection_alerts (
                id, rule_type, user_id, username, server_id, machine_id, ip_address,
                severity, title, message, metadata, acknowledged, acknowledged_by,
                acknowledged_at, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, false, NULL, NULL, ?12)"#,
            duckdb::params![
                id,
                alert.rule_type,
                alert.user_id,
                alert.username,
                alert.server_id,
                alert.machine_id,
                alert.ip_address,
                alert.severity.as_str(),
                alert.title,
                alert.message,
                metadata,
                now.to_rfc3339(),
            ],
        )?;
        Ok(Alert {
            id,
            rule_type: alert.rule_type,
            user_id: alert.user_id,
            username: alert.username,
            server_id: alert.server_id,
            machine_id: alert.machine_id,
            ip_address: alert.ip_address,
            severity: alert.severity,
            title: alert.title,
            message: alert.message,
            metadata: alert.metadata,
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            created_at: now,
        })
    }

    async fn get_alert(&self, id: &str) -> Result<Option<Alert>> {
        let conn = self.conn.lock().await;
        let sql = format!("SELECT {ALERT_COLUMNS} FROM detection_alerts WHERE id = ?1");
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query_map(duckdb::params![id], map_alert_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    async fn list_alerts(
        &self,
        filter: &AlertFilter,
        ordering: AlertOrderingRequest,
        pagination: Pagination,
    ) -> Result<Vec<Alert>> {
        let ordering = ordering.resolve();
        let conn = self.conn.lock().await;

        let mut where_sql = String::from("WHERE 1=1");
        let mut params: Vec<Box<dyn duckdb::types::ToSql>> = Vec::new();
        let mut idx = 1usize;

        if !filter.rule_types.is_empty() {
            let placeholders: Vec<String> = filter
                .rule_types
                .iter()
                .map(|rt| {
                    params.push(Box::new(rt.as_str().to_string()));
                    let p = format!("?{idx}");
                    idx += 1;
                    p
                })
                .collect();
            where_sql.push_str(&format!(" AND rule_type IN ({})", placeholders.join(", ")));
        }
        if !filter.severities.is_empty() {
            let placeholders: Vec<String> = filter
                .severities
                .iter()
                .map(|s| {
                    params.push(Box::new(s.as_str().to_string()));
                    let p = format!("?{idx}");
                    idx += 1;
                    p
                })
                .collect();
            where_sql.push_str(&format!(" AND severity IN ({})", placeholders.join(", ")));
        }
        if let Some(user_id) = filter.user_id {
            params.push(Box::new(user_id));
            where_sql.push_str(&format!(" AND user_id = ?{idx}"));
            idx += 1;
        }
        if let Some(ref server_id) = filter.server_id {
            params.push(Box::new(server_id.clone()));
            where_sql.push_str(&format!(" AND server_id = ?{idx}"));
            idx += 1;
        }
        if let Some(acknowledged) = filter.acknowledged {
            params.push(Box::new(acknowledged));
            where_sql.push_str(&format!(" AND acknowledged = ?{idx}"));
            idx += 1;
        }
        if let Some(start) = filter.start_date {
            params.push(Box::new(start.to_rfc3339()));
            where_sql.push_str(&format!(" AND created_at >= CAST(?{idx} AS TIMESTAMP)"));
            idx += 1;
        }
        if let Some(end) = filter.end_date {
            params.push(Box::new(end.to_rfc3339()));
            where_sql.push_str(&format!(" AND created_at <= CAST(?{idx} AS TIMESTAMP)"));
            idx += 1;
        }

        params.push(Box::new(pagination.limit));
        let limit_idx = idx;
        idx += 1;
        params.push(Box::new(pagination.offset));
        let offset_idx = idx;

        let sql = format!(
            "SELECT {ALERT_COLUMNS} FROM detection_alerts {where_sql} \
             ORDER BY {} {} LIMIT ?{limit_idx} OFFSET ?{offset_idx}",
            ordering.column.column_name(),
            ordering.direction.sql(),
        );

        let param_refs: Vec<&dyn duckdb::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), map_alert_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    async fn count_alerts(&self, filter: &AlertFilter) -> Result<u64> {
        let conn = self.conn.lock().await;

        let mut where_sql = String::from("WHERE 1=1");
        let mut params: Vec<Box<dyn duckdb::types::ToSql>> = Vec::new();
        let mut idx = 1usize;

        if !filter.rule_types.is_empty() {
            let placeholders: Vec<String> = filter
                .rule_types
                .iter()
                .map(|rt| {
                    params.push(Box::new(rt.as_str().to_string()));
                    let p = format!("?{idx}");
                    idx += 1;
                    p
                })
                .collect();
            where_sql.push_str(&format!(" AND rule_type IN ({})", placeholders.join(", ")));
        }
        if !filter.severities.is_empty() {
            let placeholders: Vec<String> = filter
                .severities
                .iter()
                .map(|s| {
                    params.push(Box::new(s.as_str().to_string()));
                    let p = format!("?{idx}");
                    idx += 1;
                    p
                })
                .collect();
            where_sql.push_str(&format!(" AND severity IN ({})", placeholders.join(", ")));
        }
        if let Some(user_id) = filter.user_id {
            params.push(Box::new(user_id));
            where_sql.push_str(&format!(" AND user_id = ?{idx}"));
            idx += 1;
        }
        if let Some(ref server_id) = filter.server_id {
            params.push(Box::new(server_id.clone()));
            where_sql.push_str(&format!(" AND server_id = ?{idx}"));
            idx += 1;
        }
        if let Some(acknowledged) = filter.acknowledged {
            params.push(Box::new(acknowledged));
            where_sql.push_str(&format!(" AND acknowledged = ?{idx}"));
            idx += 1;
        }
        if let Some(start) = filter.start_date {
            params.push(Box::new(start.to_rfc3339()));
            where_sql.push_str(&format!(" AND created_at >= CAST(?{idx} AS TIMESTAMP)"));
            idx += 1;
        }
        if let Some(end) = filter.end_date {
            params.push(Box::new(end.to_rfc3339()));
            where_sql.push_str(&format!(" AND created_at <= CAST(?{idx} AS TIMESTAMP)"));
        }

        let sql = format!("SELECT COUNT(*) FROM detection_alerts {where_sql}");
        let param_refs: Vec<&dyn duckdb::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let count: i64 = conn
            .prepare(&sql)?
            .query_row(param_refs.as_slice(), |row| row.get(0))?;
        Ok(count as u64)
    }

    async fn acknowledge_alert(&self, id: &str, acknowledged_by: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        let updated = conn.execute(
            r#"UPDATE detection_alerts SET acknowledged = true, acknowledged_by = ?2, acknowledged_at = ?3
               WHERE id = ?1 AND acknowledged = false"#,
            duckdb::params![id, acknowledged_by, Utc::now().to_rfc3339()],
        )?;
        if updated == 0 {
            let exists: i64 = conn
                .prepare("SELECT COUNT(*) FROM detection_alerts WHERE id = ?1")?
                .query_row(duckdb::params![id], |row| row.get(0))?;
            if exists == 0 {
                return Err(anyhow!("alert not found: {id}"));
            }
            // Already acknowledged: acknowledgement is monotonic, not an error.
        }
        Ok(())
    }
}

fn map_rule_row(row: &duckdb::Row<'_>) -> Result<Rule, duckdb::Error> {
    let rule_type_raw: String = row.get(1)?;
    let rule_type = rule_type_raw.parse::<RuleType>().map_err(|e| {
        duckdb::Error::FromSqlConversionFailure(
            1,
            duckdb::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        )
    })?;
    let config_raw: String = row.get(4)?;
    let config: serde_json::Value = serde_json::from_str(&config_raw).unwrap_or(serde_json::Value::Null);
    let created_at_raw: String = row.get(5)?;
    let updated_at_raw: String = row.get(6)?;
    Ok(Rule {
        id: row.get(0)?,
        rule_type,
        name: row.get(2)?,
        enabled: row.get(3)?,
        config,
        created_at: parse_rfc3339(&created_at_raw),
        updated_at: parse_rfc3339(&updated_at_raw),
    })
}

const RULE_COLUMNS: &str = "id, rule_type, name, enabled, config, created_at, updated_at";

#[async_trait]
impl RuleStore for DuckDbBackend {
    async fn list_rules(&self) -> Result<Vec<Rule>> {
        let conn = self.conn.lock().await;
        let sql = format!("SELECT {RULE_COLUMNS} FROM detection_rules ORDER BY rule_type");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], map_rule_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    async fn get_rule(&self, rule_type: RuleType) -> Result<Option<Rule>> {
        let conn = self.conn.lock().await;
        let sql = format!("SELECT {RULE_COLUMNS} FROM detection_rules WHERE rule_type = ?1");
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query_map(duckdb::params![rule_type.as_str()], map_rule_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    async fn update_rule(
        &self,
        rule_type: RuleType,
        enabled: bool,
        config: serde_json::Value,
    ) -> Result<Rule> {
        let conn = self.conn.lock().await;
        let config_str = serde_json::to_string(&config)?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            r#"UPDATE detection_rules SET enabled = ?2, config = ?3, updated_at = ?4 WHERE rule_type = ?1"#,
            duckdb::params![rule_type.as_str(), enabled, config_str, now],
        )?;
        let sql = format!("SELECT {RULE_COLUMNS} FROM detection_rules WHERE rule_type = ?1");
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query_map(duckdb::params![rule_type.as_str()], map_rule_row)?;
        rows.next()
            .ok_or_else(|| anyhow!("rule not found after update: {}", rule_type.as_str()))?
            .map_err(Into::into)
    }
}

fn map_trust_row(row: &duckdb::Row<'_>) -> Result<TrustScore, duckdb::Error> {
    let last_violation_raw: Option<String> = row.get(4)?;
    let updated_at_raw: String = row.get(6)?;
    Ok(TrustScore {
        user_id: row.get(0)?,
        username: row.get(1)?,
        score: row.get(2)?,
        violations_count: row.get(3)?,
        last_violation_at: last_violation_raw.map(|s| parse_rfc3339(&s)),
        restricted: row.get(5)?,
        updated_at: parse_rfc3339(&updated_at_raw),
    })
}

const TRUST_COLUMNS: &str =
    "user_id, username, score, violations_count, last_violation_at, restricted, updated_at";

#[async_trait]
impl TrustStore for DuckDbBackend {
    async fn get_trust_score(&self, user_id: i64) -> Result<TrustScore> {
        let conn = self.conn.lock().await;
        let sql = format!("SELECT {TRUST_COLUMNS} FROM user_trust_scores WHERE user_id = ?1");
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query_map(duckdb::params![user_id], map_trust_row)?;
        match rows.next() {
            Some(row) => Ok(row?),
            None => Ok(TrustScore::fresh(user_id, "", Utc::now())),
        }
    }

    async fn update_trust_score(&self, score: &TrustScore) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO user_trust_scores (user_id, username, score, violations_count, last_violation_at, restricted, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
               ON CONFLICT (user_id) DO UPDATE SET
                 username = excluded.username,
                 score = excluded.score,
                 violations_count = excluded.violations_count,
                 last_violation_at = excluded.last_violation_at,
                 restricted = excluded.restricted,
                 updated_at = excluded.updated_at"#,
            duckdb::params![
                score.user_id,
                score.username,
                score.score,
                score.violations_count,
                score.last_violation_at.map(|dt| dt.to_rfc3339()),
                score.restricted,
                score.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn decrement_trust_score(
        &self,
        user_id: i64,
        username: &str,
        amount: i32,
    ) -> Result<TrustScore> {
        let conn = self.conn.lock().await;
        let now = Utc::now();
        let existing: Option<i32> = conn
            .prepare("SELECT score FROM user_trust_scores WHERE user_id = ?1")?
            .query_row(duckdb::params![user_id], |row| row.get(0))
            .ok();

        let (new_score, new_violations) = match existing {
            None => (clamp_score(100 - amount), 1),
            Some(current) => (clamp_score(current - amount), 0),
        };
        let restricted = is_restricted(new_score);

        conn.execute(
            r#"INSERT INTO user_trust_scores (user_id, username, score, violations_count, last_violation_at, restricted, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?5)
               ON CONFLICT (user_id) DO UPDATE SET
                 username = ?2,
                 score = ?3,
                 violations_count = user_trust_scores.violations_count + 1,
                 last_violation_at = ?5,
                 restricted = ?6,
                 updated_at = ?5"#,
            duckdb::params![
                user_id,
                username,
                new_score,
                new_violations,
                now.to_rfc3339(),
                restricted,
            ],
        )?;

        let sql = format!("SELECT {TRUST_COLUMNS} FROM user_trust_scores WHERE user_id = ?1");
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query_map(duckdb::params![user_id], map_trust_row)?;
        rows.next()
            .ok_or_else(|| anyhow!("trust score missing after decrement for user {user_id}"))?
            .map_err(Into::into)
    }

    async fn recover_trust_scores(&self, amount: i32) -> Result<u64> {
        let conn = self.conn.lock().await;
        let now = Utc::now().to_rfc3339();
        let updated = conn.execute(
            r#"UPDATE user_trust_scores
               SET score = LEAST(100, score + ?1),
                   restricted = LEAST(100, score + ?1) < 50,
                   updated_at = ?2
               WHERE score < 100"#,
            duckdb::params![amount, now],
        )?;
        Ok(updated as u64)
    }
}

#[cfg(test)]
mod tests {
    use cartographus_core::store::{AlertFilter, AlertOrderingRequest, Pagination};

    use super::*;
    use crate::backend::DuckDbBackend;

    fn sample_alert(rule_type: RuleType, user_id: i64) -> NewAlert {
        NewAlert {
            rule_type: rule_type.as_str().to_string(),
            user_id,
            username: "alice".to_string(),
            server_id: Some("srv1".to_string()),
            machine_id: Some("machine-abc".to_string()),
            ip_address: Some("203.0.113.9".to_string()),
            severity: Severity::Warning,
            title: "test alert".to_string(),
            message: "something happened".to_string(),
            metadata: serde_json::json!({"k": "v"}),
        }
    }

    #[tokio::test]
    async fn save_and_get_alert_round_trips_every_field() {
        let backend = DuckDbBackend::open_in_memory().await.expect("open db");
        let saved = backend
            .save_alert(sample_alert(RuleType::ImpossibleTravel, 42))
            .await
            .expect("save alert");
        assert!(!saved.acknowledged);
        assert!(saved.acknowledged_at.is_none());

        let fetched = backend
            .get_alert(&saved.id)
            .await
            .expect("get alert")
            .expect("alert exists");
        assert_eq!(fetched.id, saved.id);
        assert_eq!(fetched.rule_type, "impossible_travel");
        assert_eq!(fetched.user_id, 42);
        assert_eq!(fetched.severity.as_str(), "warning");
        assert_eq!(fetched.metadata, serde_json::json!({"k": "v"}));
    }

    #[tokio::test]
    async fn acknowledge_alert_is_monotonic() {
        let backend = DuckDbBackend::open_in_memory().await.expect("open db");
        let saved = backend
            .save_alert(sample_alert(RuleType::DeviceVelocity, 7))
            .await
            .expect("save alert");

        backend
            .acknowledge_alert(&saved.id, "ops")
            .await
            .expect("first acknowledge");
        let once = backend
            .get_alert(&saved.id)
            .await
            .expect("get alert")
            .expect("alert exists");
        assert!(once.acknowledged);
        let first_ack_at = once.acknowledged_at.expect("acknowledged_at set");

        // Acknowledging an already-acknowledged alert is a no-op, not an error.
        backend
            .acknowledge_alert(&saved.id, "someone-else")
            .await
            .expect("second acknowledge does not error");
        let twice = backend
            .get_alert(&saved.id)
            .await
            .expect("get alert")
            .expect("alert exists");
        assert_eq!(twice.acknowledged_by.as_deref(), Some("ops"));
        assert_eq!(twice.acknowledged_at, Some(first_ack_at));
    }

    #[tokio::test]
    async fn acknowledge_unknown_alert_errors() {
        let backend = DuckDbBackend::open_in_memory().await.expect("open db");
        let result = backend.acknowledge_alert("does-not-exist", "ops").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn list_alerts_filters_by_rule_type_and_user() {
        let backend = DuckDbBackend::open_in_memory().await.expect("open db");
        backend
            .save_alert(sample_alert(RuleType::ImpossibleTravel, 1))
            .await
            .expect("save alert 1");
        backend
            .save_alert(sample_alert(RuleType::ConcurrentStreams, 1))
            .await
            .expect("save alert 2");
        backend
            .save_alert(sample_alert(RuleType::ImpossibleTravel, 2))
            .await
            .expect("save alert 3");

        let filter = AlertFilter {
            rule_types: vec![RuleType::ImpossibleTravel],
            user_id: Some(1),
            ..Default::default()
        };
        let results = backend
            .list_alerts(&filter, AlertOrderingRequest { column: None, direction: None }, Pagination::default())
            .await
            .expect("list alerts");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].user_id, 1);
        assert_eq!(results[0].rule_type, "impossible_travel");

        let count = backend.count_alerts(&filter).await.expect("count alerts");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn list_alerts_falls_back_to_created_at_desc_on_unwhitelisted_ordering() {
        let backend = DuckDbBackend::open_in_memory().await.expect("open db");
        backend
            .save_alert(sample_alert(RuleType::ImpossibleTravel, 1))
            .await
            .expect("save alert");

        let ordering = AlertOrderingRequest {
            column: Some("id; DROP TABLE detection_alerts;--".to_string()),
            direction: Some("ASC; --".to_string()),
        };
        let results = backend
            .list_alerts(&AlertFilter::default(), ordering, Pagination::default())
            .await
            .expect("query still succeeds against the whitelisted fallback");
        assert_eq!(results.len(), 1);

        // The table must still exist: a successful query here is itself proof
        // the attacker-controlled strings never reached the SQL text.
        let still_there = backend.count_alerts(&AlertFilter::default()).await.expect("count alerts");
        assert_eq!(still_there, 1);
    }

    #[tokio::test]
    async fn rule_store_round_trips_enabled_and_config() {
        let backend = DuckDbBackend::open_in_memory().await.expect("open db");
        let updated = backend
            .update_rule(
                RuleType::GeoRestriction,
                true,
                serde_json::json!({"allowed_countries": ["US", "CA"]}),
            )
            .await
            .expect("update rule");
        assert!(updated.enabled);
        assert_eq!(updated.config["allowed_countries"][0], "US");

        let fetched = backend
            .get_rule(RuleType::GeoRestriction)
            .await
            .expect("get rule")
            .expect("rule exists");
        assert!(fetched.enabled);
    }

    #[tokio::test]
    async fn trust_score_defaults_to_a_fresh_record_for_unknown_users() {
        let backend = DuckDbBackend::open_in_memory().await.expect("open db");
        let score = backend.get_trust_score(999).await.expect("get trust score");
        assert_eq!(score.score, 100);
        assert_eq!(score.violations_count, 0);
        assert!(!score.restricted);
    }

    #[tokio::test]
    async fn decrement_trust_score_seeds_then_clamps_at_zero() {
        let backend = DuckDbBackend::open_in_memory().await.expect("open db");

        let first = backend
            .decrement_trust_score(10, "bob", 10)
            .await
            .expect("first decrement");
        assert_eq!(first.score, 90);
        assert_eq!(first.violations_count, 1);
        assert!(!first.restricted);

        let restricted = backend
            .decrement_trust_score(10, "bob", 45)
            .await
            .expect("second decrement");
        assert_eq!(restricted.score, 45);
        assert!(restricted.restricted);

        let clamped = backend
            .decrement_trust_score(10, "bob", 1000)
            .await
            .expect("third decrement");
        assert_eq!(clamped.score, 0);
        assert!(clamped.restricted);
    }

    #[tokio::test]
    async fn recover_trust_scores_raises_every_below_max_score_without_overshoot() {
        let backend = DuckDbBackend::open_in_memory().await.expect("open db");
        backend
            .decrement_trust_score(1, "bob", 60)
            .await
            .expect("decrement bob");
        backend
            .decrement_trust_score(2, "carol", 5)
            .await
            .expect("decrement carol");

        let updated = backend.recover_trust_scores(10).await.expect("recover");
        assert_eq!(updated, 2);

        let bob = backend.get_trust_score(1).await.expect("get bob");
        assert_eq!(bob.score, 50);
        let carol = backend.get_trust_score(2).await.expect("get carol");
        assert_eq!(carol.score, 100);
        assert!(!carol.restricted);
    }
}

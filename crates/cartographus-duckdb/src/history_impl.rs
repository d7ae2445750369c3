use async_trait::async_trait;
use cartographus_core::event::{DetectionEvent, Geolocation};
use cartographus_core::history::EventHistory;
use chrono::{DateTime, Duration, Utc};

use crate::backend::DuckDbBackend;

const EVENT_COLUMNS: &str = r#"event_id, session_key, correlation_key, event_type, source, server_id,
    event_timestamp, user_id, username, friendly_name, machine_id, platform,
    player, device, media_type, title, grandparent_title, ip_address,
    location_type, latitude, longitude, city, region, country"#;

fn map_event_row(row: &duckdb::Row<'_>) -> Result<DetectionEvent, duckdb::Error> {
    let timestamp: String = row.get(6)?;
    Ok(DetectionEvent {
        event_id: row.get(0)?,
        session_key: row.get(1)?,
        correlation_key: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        event_type: row.get(3)?,
        source: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        server_id: row.get(5)?,
        timestamp: parse_rfc3339(&timestamp),
        user_id: row.get(7)?,
        username: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
        friendly_name: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
        machine_id: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
        platform: row.get::<_, Option<String>>(11)?.unwrap_or_default(),
        player: row.get::<_, Option<String>>(12)?.unwrap_or_default(),
        device: row.get::<_, Option<String>>(13)?.unwrap_or_default(),
        media_type: row.get::<_, Option<String>>(14)?.unwrap_or_default(),
        title: row.get::<_, Option<String>>(15)?.unwrap_or_default(),
        grandparent_title: row.get::<_, Option<String>>(16)?.unwrap_or_default(),
        ip_address: row.get::<_, Option<String>>(17)?.unwrap_or_default(),
        location_type: row.get::<_, Option<String>>(18)?.unwrap_or_default(),
        latitude: row.get(19)?,
        longitude: row.get(20)?,
        city: row.get::<_, Option<String>>(21)?.unwrap_or_default(),
        region: row.get::<_, Option<String>>(22)?.unwrap_or_default(),
        country: row.get::<_, Option<String>>(23)?.unwrap_or_default(),
    })
}

fn parse_rfc3339(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[async_trait]
impl EventHistory for DuckDbBackend {
    async fn last_event_for_user(
        &self,
        user_id: i64,
        server_id: &str,
    ) -> anyhow::Result<Option<DetectionEvent>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM playback_events \
             WHERE user_id = ?1 AND (?2 = '' OR server_id = ?2) \
             ORDER BY event_timestamp DESC LIMIT 1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query_map(duckdb::params![user_id, server_id], map_event_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    async fn active_streams_for_user(
        &self,
        user_id: i64,
        server_id: &str,
    ) -> anyhow::Result<Vec<DetectionEvent>> {
        let conn = self.conn.lock().await;
        let cutoff = (Utc::now() - Duration::hours(4)).to_rfc3339();
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM playback_events p \
             WHERE p.user_id = ?1 AND (?2 = '' OR p.server_id = ?2) \
             AND p.event_timestamp >= CAST(?3 AS TIMESTAMP) \
             AND p.event_type != 'stop' \
             AND NOT EXISTS ( \
                 SELECT 1 FROM playback_events s \
                 WHERE s.session_key = p.session_key AND s.event_type = 'stop' \
             ) \
             ORDER BY p.event_timestamp DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(duckdb::params![user_id, server_id, cutoff], map_event_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    async fn recent_ips_for_device(
        &self,
        machine_id: &str,
        server_id: &str,
        window: Duration,
    ) -> anyhow::Result<Vec<String>> {
        let conn = self.conn.lock().await;
        let cutoff = (Utc::now() - window).to_rfc3339();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT ip_address, MAX(event_timestamp) AS last_seen \
             FROM playback_events \
             WHERE machine_id = ?1 AND (?2 = '' OR server_id = ?2) \
             AND event_timestamp >= CAST(?3 AS TIMESTAMP) \
             AND ip_address IS NOT NULL AND ip_address != '' \
             GROUP BY ip_address ORDER BY last_seen DESC",
        )?;
        let rows = stmt.query_map(duckdb::params![machine_id, server_id, cutoff], |row| {
            row.get::<_, String>(0)
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    async fn simultaneous_locations_for_user(
        &self,
        user_id: i64,
        server_id: &str,
        window: Duration,
    ) -> anyhow::Result<Vec<DetectionEvent>> {
        let conn = self.conn.lock().await;
        let cutoff = (Utc::now() - window).to_rfc3339();
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM playback_events p \
             WHERE p.user_id = ?1 AND (?2 = '' OR p.server_id = ?2) \
             AND p.event_timestamp >= CAST(?3 AS TIMESTAMP) \
             AND p.event_type != 'stop' \
             AND NOT EXISTS ( \
                 SELECT 1 FROM playback_events s \
                 WHERE s.session_key = p.session_key AND s.event_type = 'stop' \
             ) \
             ORDER BY p.event_timestamp DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(duckdb::params![user_id, server_id, cutoff], map_event_row)?;
        let mut out = Vec::new();
        for row in rows {
            let event = row?;
            if !cartographus_core::geo::is_unknown_location(event.latitude, event.longitude) {
                out.push(event);
            }
        }
        Ok(out)
    }

    async fn geolocation_for_ip(&self, ip: &str) -> anyhow::Result<Option<Geolocation>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT ip_address, latitude, longitude, city, region, country \
             FROM geolocations WHERE ip_address = ?1",
        )?;
        let mut rows = stmt.query_map(duckdb::params![ip], |row| {
            Ok(Geolocation {
                ip_address: row.get(0)?,
                latitude: row.get(1)?,
                longitude: row.get(2)?,
                city: row.get(3)?,
                region: row.get(4)?,
                country: row.get(5)?,
            })
        })?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    async fn record_event(&self, event: &DetectionEvent) -> anyhow::Result<()> {
        self.seed_playback_event(event).await
    }
}

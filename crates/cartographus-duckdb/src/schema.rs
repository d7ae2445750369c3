/// DuckDB initialization SQL.
///
/// Executed once at database open time via `Connection::execute_batch`. All
/// statements use `IF NOT EXISTS` so bootstrap is idempotent and safe to
/// re-run on every startup.
///
/// `memory_limit` is passed at runtime from `Config::duckdb_memory_limit`
/// (env `CARTOGRAPHUS_DUCKDB_MEMORY`, default `"1GB"`). DuckDB accepts any
/// size string it supports, e.g. `"512MB"`, `"1GB"`, `"4GB"`.
pub fn init_sql(memory_limit: &str) -> String {
    format!(
        r#"SET memory_limit = '{memory_limit}';
SET threads = 2;

-- ===========================================
-- RULE CONFIGURATION
-- ===========================================
CREATE TABLE IF NOT EXISTS detection_rules (
    id          VARCHAR PRIMARY KEY,
    rule_type   VARCHAR NOT NULL UNIQUE,
    name        VARCHAR NOT NULL,
    enabled     BOOLEAN NOT NULL DEFAULT true,
    config      VARCHAR NOT NULL,              -- JSON, opaque to the store
    created_at  TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at  TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

-- ===========================================
-- ALERT LOG
-- ===========================================
CREATE TABLE IF NOT EXISTS detection_alerts (
    id                 VARCHAR PRIMARY KEY,
    rule_type          VARCHAR NOT NULL,
    user_id            BIGINT NOT NULL,
    username           VARCHAR NOT NULL,
    server_id          VARCHAR,
    machine_id         VARCHAR,
    ip_address         VARCHAR,
    severity           VARCHAR NOT NULL,        -- 'info' | 'warning' | 'critical'
    title              VARCHAR NOT NULL,
    message            VARCHAR NOT NULL,
    metadata           VARCHAR NOT NULL,        -- JSON, rule-specific shape
    acknowledged       BOOLEAN NOT NULL DEFAULT false,
    acknowledged_by    VARCHAR,
    acknowledged_at    TIMESTAMP,
    created_at         TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_alerts_user_id      ON detection_alerts(user_id);
CREATE INDEX IF NOT EXISTS idx_alerts_rule_type    ON detection_alerts(rule_type);
CREATE INDEX IF NOT EXISTS idx_alerts_severity     ON detection_alerts(severity);
CREATE INDEX IF NOT EXISTS idx_alerts_created_at   ON detection_alerts(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_alerts_acknowledged ON detection_alerts(acknowledged);
CREATE INDEX IF NOT EXISTS idx_alerts_server_id    ON detection_alerts(server_id);

-- ===========================================
-- TRUST SCORES
-- ===========================================
CREATE TABLE IF NOT EXISTS user_trust_scores (
    user_id            BIGINT PRIMARY KEY,
    username           VARCHAR NOT NULL,
    score              INTEGER NOT NULL DEFAULT 100,
    violations_count   BIGINT NOT NULL DEFAULT 0,
    last_violation_at  TIMESTAMP,
    restricted         BOOLEAN NOT NULL DEFAULT false,
    updated_at         TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_trust_scores_score ON user_trust_scores(score);

-- ===========================================
-- READ-MODEL TABLES (populated by ingestion, owned outside this crate)
-- ===========================================
CREATE TABLE IF NOT EXISTS playback_events (
    event_id          VARCHAR PRIMARY KEY,
    session_key       VARCHAR NOT NULL,
    correlation_key   VARCHAR,
    event_type        VARCHAR NOT NULL,
    source            VARCHAR,
    server_id         VARCHAR NOT NULL DEFAULT '',
    event_timestamp   TIMESTAMP NOT NULL,
    user_id           BIGINT NOT NULL,
    username          VARCHAR,
    friendly_name     VARCHAR,
    machine_id        VARCHAR,
    platform          VARCHAR,
    player            VARCHAR,
    device            VARCHAR,
    media_type        VARCHAR,
    title             VARCHAR,
    grandparent_title VARCHAR,
    ip_address        VARCHAR,
    location_type     VARCHAR,
    latitude          DOUBLE NOT NULL DEFAULT 0.0,
    longitude         DOUBLE NOT NULL DEFAULT 0.0,
    city              VARCHAR,
    region            VARCHAR,
    country           VARCHAR
);
CREATE INDEX IF NOT EXISTS idx_playback_user_server_time
    ON playback_events(user_id, server_id, event_timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_playback_machine_server_time
    ON playback_events(machine_id, server_id, event_timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_playback_session
    ON playback_events(session_key);

CREATE TABLE IF NOT EXISTS geolocations (
    ip_address  VARCHAR PRIMARY KEY,
    latitude    DOUBLE NOT NULL,
    longitude   DOUBLE NOT NULL,
    city        VARCHAR NOT NULL,
    region      VARCHAR NOT NULL,
    country     VARCHAR NOT NULL
);
"#
    )
}

/// Migrations tracking table SQL, run before [`init_sql`].
pub const MIGRATIONS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS _migrations (
    id          VARCHAR PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#;

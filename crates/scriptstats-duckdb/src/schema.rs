/// DuckDB initialization SQL.
///
/// Executed once at database open time via `Connection::execute_batch`.
/// All statements use `IF NOT EXISTS` so they are safe to re-run on every
/// startup (idempotent).
///
/// `memory_limit` comes from `Config.duckdb_memory_limit`
/// (env `SCRIPTSTATS_DUCKDB_MEMORY`, default `"1GB"`).
///
/// Counter columns are only ever written with relative increments through
/// `INSERT ... ON CONFLICT DO UPDATE`, never read-modify-write, so two
/// writers creating the same row both land.
pub fn init_sql(memory_limit: &str) -> String {
    format!(
        r#"SET memory_limit = '{memory_limit}';
SET threads = 2;

-- ===========================================
-- LIFETIME TOTALS
-- ===========================================
-- score / score_count belong to the rating subsystem and are only read here.
CREATE TABLE IF NOT EXISTS script_statistics (
    script_id       BIGINT PRIMARY KEY,
    download_count  BIGINT NOT NULL DEFAULT 0,
    update_count    BIGINT NOT NULL DEFAULT 0,
    score           BIGINT NOT NULL DEFAULT 0,
    score_count     BIGINT NOT NULL DEFAULT 0,
    created_at      TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at      TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

-- ===========================================
-- PER-DAY TOTALS
-- ===========================================
-- `date` is the calendar day in SCRIPTSTATS_TIMEZONE, matching the
-- Counter Store day keys.
CREATE TABLE IF NOT EXISTS script_date_statistics (
    script_id       BIGINT NOT NULL,
    date            DATE NOT NULL,
    download_count  BIGINT NOT NULL DEFAULT 0,
    update_count    BIGINT NOT NULL DEFAULT 0,
    PRIMARY KEY (script_id, date)
);
CREATE INDEX IF NOT EXISTS idx_script_date_statistics_date ON script_date_statistics(date);
"#
    )
}

pub const MIGRATIONS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS _migrations (
    id          VARCHAR PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#;

/// Identifier recorded in `_migrations` once [`init_sql`] has run.
pub const SCHEMA_VERSION: &str = "0001_script_statistics";

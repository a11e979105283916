use std::sync::Arc;

use anyhow::Result;
use duckdb::Connection;
use tokio::sync::Mutex;
use tracing::info;

use crate::schema::{init_sql, MIGRATIONS_TABLE_SQL, SCHEMA_VERSION};

/// A DuckDB backend for the durable statistics tables.
///
/// DuckDB is single-writer: concurrent reads are fine, but concurrent writes
/// cause contention. The connection is wrapped in `Arc<Mutex<_>>` so every
/// consumer worker serialises its increments through one handle while the
/// struct stays cheap to share.
pub struct DuckDbBackend {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl DuckDbBackend {
    /// Open (or create) a DuckDB database file at `path`.
    ///
    /// `memory_limit` is a DuckDB size string such as `"1GB"` or `"512MB"`.
    pub fn open(path: &str, memory_limit: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(&conn, memory_limit)?;
        info!(path, memory_limit, "statistics database opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open a throwaway database with the statistics schema applied. Tests only.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn, "1GB")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init(conn: &Connection, memory_limit: &str) -> Result<()> {
        conn.execute_batch(MIGRATIONS_TABLE_SQL)?;
        conn.execute_batch(&init_sql(memory_limit))?;
        conn.execute(
            "INSERT OR IGNORE INTO _migrations (id) VALUES (?1)",
            duckdb::params![SCHEMA_VERSION],
        )?;
        Ok(())
    }

    pub async fn ping(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch("SELECT 1")?;
        Ok(())
    }

    /// Raw connection for tests that seed columns owned by other writers
    /// (`score`, `score_count`).
    pub async fn conn_for_test(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}

//! [`StatisticsRepository`] for [`DuckDbBackend`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;

use scriptstats_core::event::Operation;
use scriptstats_core::repository::StatisticsRepository;
use scriptstats_core::statistics::{ScriptDateStatistics, ScriptStatistics};

use crate::DuckDbBackend;

/// `(download, update)` deltas for one recorded operation.
fn deltas(operation: Operation) -> (i64, i64) {
    match operation {
        Operation::Download => (1, 0),
        Operation::Update => (0, 1),
        Operation::View => (0, 0),
    }
}

fn date_param(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[async_trait]
impl StatisticsRepository for DuckDbBackend {
    /// Both rows are written in one transaction so a redelivered message can
    /// never leave the lifetime and per-day totals disagreeing.
    async fn record(&self, script_id: i64, date: NaiveDate, operation: Operation) -> Result<()> {
        if !operation.is_durable() {
            return Ok(());
        }
        let (download, update) = deltas(operation);

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO script_statistics (script_id, download_count, update_count, updated_at) \
             VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP) \
             ON CONFLICT (script_id) DO UPDATE SET \
                 download_count = script_statistics.download_count + EXCLUDED.download_count, \
                 update_count = script_statistics.update_count + EXCLUDED.update_count, \
                 updated_at = EXCLUDED.updated_at",
            duckdb::params![script_id, download, update],
        )?;
        tx.execute(
            "INSERT INTO script_date_statistics (script_id, date, download_count, update_count) \
             VALUES (?1, CAST(?2 AS DATE), ?3, ?4) \
             ON CONFLICT (script_id, date) DO UPDATE SET \
                 download_count = script_date_statistics.download_count + EXCLUDED.download_count, \
                 update_count = script_date_statistics.update_count + EXCLUDED.update_count",
            duckdb::params![script_id, date_param(date), download, update],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn find_script(&self, script_id: i64) -> Result<Option<ScriptStatistics>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT script_id, download_count, update_count, score, score_count \
             FROM script_statistics WHERE script_id = ?1",
        )?;
        let row = stmt.query_row(duckdb::params![script_id], |row| {
            Ok(ScriptStatistics {
                script_id: row.get(0)?,
                download: row.get(1)?,
                update: row.get(2)?,
                score: row.get(3)?,
                score_count: row.get(4)?,
            })
        });
        match row {
            Ok(stats) => Ok(Some(stats)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_script_date(
        &self,
        script_id: i64,
        date: NaiveDate,
    ) -> Result<Option<ScriptDateStatistics>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT script_id, CAST(date AS VARCHAR), download_count, update_count \
             FROM script_date_statistics WHERE script_id = ?1 AND date = CAST(?2 AS DATE)",
        )?;
        let row = stmt.query_row(duckdb::params![script_id, date_param(date)], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        });
        let (script_id, raw_date, download, update) = match row {
            Ok(values) => values,
            Err(duckdb::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let date = NaiveDate::parse_from_str(&raw_date, "%Y-%m-%d")
            .with_context(|| format!("unexpected date value {raw_date}"))?;
        Ok(Some(ScriptDateStatistics {
            script_id,
            date,
            download,
            update,
        }))
    }

    async fn list_script_ids(&self) -> Result<Vec<i64>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT script_id FROM script_statistics ORDER BY script_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    async fn ping(&self) -> Result<()> {
        DuckDbBackend::ping(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deltas_only_touch_the_matching_column() {
        assert_eq!(deltas(Operation::Download), (1, 0));
        assert_eq!(deltas(Operation::Update), (0, 1));
        assert_eq!(deltas(Operation::View), (0, 0));
    }
}

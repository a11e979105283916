//! Durable statistics storage.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::event::Operation;
use crate::statistics::{ScriptDateStatistics, ScriptStatistics};

/// Row-oriented exact totals.
///
/// Implementations must make `record` an atomic increment-or-create for both
/// the lifetime row and the day row, so concurrent first writers both land.
#[async_trait]
pub trait StatisticsRepository: Send + Sync + 'static {
    /// Add one `operation` to the script's lifetime and `date` totals.
    /// `Operation::View` has no durable column and is a no-op.
    async fn record(&self, script_id: i64, date: NaiveDate, operation: Operation) -> Result<()>;

    async fn find_script(&self, script_id: i64) -> Result<Option<ScriptStatistics>>;

    async fn find_script_date(
        &self,
        script_id: i64,
        date: NaiveDate,
    ) -> Result<Option<ScriptDateStatistics>>;

    async fn list_script_ids(&self) -> Result<Vec<i64>>;

    async fn ping(&self) -> Result<()>;
}

use anyhow::Result;
use async_trait::async_trait;

use crate::statistics::{ScriptDocument, StatisticsDocument};

pub mod null;

pub use null::NullSearchIndex;

/// Denormalized script search index.
///
/// The index is a derived view: every write can be replayed from the durable
/// store, so callers treat failures as staleness rather than data loss.
#[async_trait]
pub trait SearchIndex: Send + Sync + 'static {
    /// Partial update of the statistics fields, creating the document if it
    /// does not exist yet.
    async fn upsert_statistics(&self, doc: &StatisticsDocument) -> Result<()>;

    /// Replace the whole document.
    async fn replace_script(&self, doc: &ScriptDocument) -> Result<()>;

    /// Remove the document. Deleting a missing document succeeds.
    async fn delete_script(&self, script_id: i64) -> Result<()>;
}

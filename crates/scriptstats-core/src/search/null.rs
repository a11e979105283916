use anyhow::Result;
use async_trait::async_trait;

use super::SearchIndex;
use crate::statistics::{ScriptDocument, StatisticsDocument};

/// [`SearchIndex`] that discards every write.
///
/// Used when no Elasticsearch URL is configured so the index consumer group
/// still runs its batching logic without an index behind it.
pub struct NullSearchIndex;

#[async_trait]
impl SearchIndex for NullSearchIndex {
    async fn upsert_statistics(&self, _doc: &StatisticsDocument) -> Result<()> {
        Ok(())
    }

    async fn replace_script(&self, _doc: &ScriptDocument) -> Result<()> {
        Ok(())
    }

    async fn delete_script(&self, _script_id: i64) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statistics::ScriptStatistics;

    #[tokio::test]
    async fn test_null_search_index_accepts_everything() {
        let index = NullSearchIndex;
        let doc = StatisticsDocument::from_row(&ScriptStatistics::empty(1), chrono::Utc::now());
        assert!(index.upsert_statistics(&doc).await.is_ok());
        assert!(index.delete_script(1).await.is_ok());
        assert!(index.delete_script(404).await.is_ok());
    }
}

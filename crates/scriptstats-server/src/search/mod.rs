use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use scriptstats_core::config::Config;
use scriptstats_core::search::{NullSearchIndex, SearchIndex};

pub mod elastic;

pub use elastic::ElasticsearchIndex;

/// Elasticsearch when `SCRIPTSTATS_ES_URL` is set, otherwise a no-op index.
pub fn from_config(config: &Config) -> Result<Arc<dyn SearchIndex>> {
    match &config.es_url {
        Some(url) => {
            info!(index = %config.es_index, "search index: Elasticsearch");
            Ok(Arc::new(ElasticsearchIndex::new(url, &config.es_index)?))
        }
        None => {
            info!("search index disabled (SCRIPTSTATS_ES_URL unset)");
            Ok(Arc::new(NullSearchIndex))
        }
    }
}

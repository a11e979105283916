use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use tracing::debug;

use scriptstats_core::search::SearchIndex;
use scriptstats_core::statistics::{ScriptDocument, StatisticsDocument};

/// [`SearchIndex`] over the Elasticsearch document REST API.
///
/// Statistics go through `_update` with `doc_as_upsert`, so they merge into
/// whatever metadata the lifecycle path wrote; lifecycle writes `PUT` the full
/// document.
#[derive(Clone)]
pub struct ElasticsearchIndex {
    client: Client,
    base_url: String,
    index: String,
}

impl ElasticsearchIndex {
    pub fn new(base_url: &str, index: &str) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(5))
            .build()
            .context("failed to build Elasticsearch HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            index: index.to_string(),
        })
    }

    fn update_url(&self, script_id: i64) -> String {
        format!(
            "{}/{}/_update/{}?retry_on_conflict=3",
            self.base_url, self.index, script_id
        )
    }

    fn doc_url(&self, script_id: i64) -> String {
        format!("{}/{}/_doc/{}", self.base_url, self.index, script_id)
    }
}

async fn check(resp: reqwest::Response, what: &str) -> Result<()> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("Elasticsearch {what} failed {status}: {body}");
    }
    Ok(())
}

#[async_trait]
impl SearchIndex for ElasticsearchIndex {
    async fn upsert_statistics(&self, doc: &StatisticsDocument) -> Result<()> {
        let resp = self
            .client
            .post(self.update_url(doc.script_id))
            .json(&json!({ "doc": doc, "doc_as_upsert": true }))
            .send()
            .await
            .context("Elasticsearch update request failed")?;
        check(resp, "update").await?;
        debug!(script_id = doc.script_id, "statistics document upserted");
        Ok(())
    }

    async fn replace_script(&self, doc: &ScriptDocument) -> Result<()> {
        let resp = self
            .client
            .put(self.doc_url(doc.script_id))
            .json(doc)
            .send()
            .await
            .context("Elasticsearch index request failed")?;
        check(resp, "index").await
    }

    async fn delete_script(&self, script_id: i64) -> Result<()> {
        let resp = self
            .client
            .delete(self.doc_url(script_id))
            .send()
            .await
            .context("Elasticsearch delete request failed")?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check(resp, "delete").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_address_the_script_document() {
        let index = ElasticsearchIndex::new("http://es:9200/", "scripts").unwrap();
        assert_eq!(
            index.update_url(12),
            "http://es:9200/scripts/_update/12?retry_on_conflict=3"
        );
        assert_eq!(index.doc_url(12), "http://es:9200/scripts/_doc/12");
    }
}

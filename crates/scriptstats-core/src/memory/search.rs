use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::search::SearchIndex;
use crate::statistics::{ScriptDocument, StatisticsDocument};

/// In-process [`SearchIndex`] with Elasticsearch update semantics: a
/// statistics upsert merges fields into the stored document, a replace
/// overwrites it.
#[derive(Default)]
pub struct MemorySearchIndex {
    docs: Mutex<HashMap<i64, Map<String, Value>>>,
    statistics_writes: AtomicUsize,
    failing: AtomicBool,
}

impl MemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document(&self, script_id: i64) -> Option<Value> {
        self.docs
            .lock()
            .get(&script_id)
            .map(|doc| Value::Object(doc.clone()))
    }

    /// Number of successful statistics upserts so far.
    pub fn statistics_writes(&self) -> usize {
        self.statistics_writes.load(Ordering::SeqCst)
    }

    /// Make every subsequent write fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("search index unavailable");
        }
        Ok(())
    }
}

fn to_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[async_trait]
impl SearchIndex for MemorySearchIndex {
    async fn upsert_statistics(&self, doc: &StatisticsDocument) -> Result<()> {
        self.check()?;
        let fields = to_object(serde_json::to_value(doc)?);
        self.docs
            .lock()
            .entry(doc.script_id)
            .or_default()
            .extend(fields);
        self.statistics_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn replace_script(&self, doc: &ScriptDocument) -> Result<()> {
        self.check()?;
        let fields = to_object(serde_json::to_value(doc)?);
        self.docs.lock().insert(doc.script_id, fields);
        Ok(())
    }

    async fn delete_script(&self, script_id: i64) -> Result<()> {
        self.check()?;
        self.docs.lock().remove(&script_id);
        Ok(())
    }
}

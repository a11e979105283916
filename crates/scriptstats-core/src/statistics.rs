//! Durable aggregate shapes and the search-index documents derived from them.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{Operation, ScriptSnapshot};

/// Exact lifetime totals per script. Mirrors the `script_statistics` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptStatistics {
    pub script_id: i64,
    pub download: i64,
    pub update: i64,
    /// Written by the rating subsystem; read-only here.
    pub score: i64,
    pub score_count: i64,
}

impl ScriptStatistics {
    pub fn empty(script_id: i64) -> Self {
        Self {
            script_id,
            ..Default::default()
        }
    }

    pub fn count(&self, operation: Operation) -> i64 {
        match operation {
            Operation::Download => self.download,
            Operation::Update => self.update,
            Operation::View => 0,
        }
    }
}

/// Exact per-day totals per script. Mirrors the `script_date_statistics` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptDateStatistics {
    pub script_id: i64,
    pub date: NaiveDate,
    pub download: i64,
    pub update: i64,
}

/// The statistics slice of a script's search document.
///
/// Pushed as a partial upsert by the batched index sync, so it never touches
/// the metadata fields written from lifecycle events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsDocument {
    /// Addresses the document; not part of the indexed body.
    #[serde(skip)]
    pub script_id: i64,
    pub download: i64,
    pub update: i64,
    pub score: i64,
    pub score_count: i64,
    pub statistics_synced_at: DateTime<Utc>,
}

impl StatisticsDocument {
    pub fn from_row(row: &ScriptStatistics, synced_at: DateTime<Utc>) -> Self {
        Self {
            script_id: row.script_id,
            download: row.download,
            update: row.update,
            score: row.score,
            score_count: row.score_count,
            statistics_synced_at: synced_at,
        }
    }
}

/// Full denormalized search document, written on create / code update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptDocument {
    pub script_id: i64,
    pub user_id: i64,
    pub name: String,
    pub description: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub statistics: StatisticsDocument,
}

impl ScriptDocument {
    pub fn new(snapshot: &ScriptSnapshot, statistics: StatisticsDocument) -> Self {
        Self {
            script_id: snapshot.script_id,
            user_id: snapshot.user_id,
            name: snapshot.name.clone(),
            description: snapshot.description.clone(),
            status: snapshot.status.clone(),
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
            statistics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_maps_operation_to_column() {
        let row = ScriptStatistics {
            script_id: 1,
            download: 5,
            update: 3,
            score: 0,
            score_count: 0,
        };
        assert_eq!(row.count(Operation::Download), 5);
        assert_eq!(row.count(Operation::Update), 3);
        assert_eq!(row.count(Operation::View), 0);
    }

    #[test]
    fn script_document_flattens_statistics() {
        let now = Utc::now();
        let snapshot = ScriptSnapshot {
            script_id: 9,
            user_id: 2,
            name: "Dark mode".to_string(),
            description: "Forces dark mode".to_string(),
            status: "active".to_string(),
            created_at: now,
            updated_at: now,
        };
        let stats = StatisticsDocument::from_row(&ScriptStatistics::empty(9), now);
        let doc = serde_json::to_value(ScriptDocument::new(&snapshot, stats)).unwrap();
        assert_eq!(doc["name"], "Dark mode");
        assert_eq!(doc["download"], 0);
        assert!(doc.get("statistics").is_none());
        assert_eq!(doc["script_id"], 9);
    }
}

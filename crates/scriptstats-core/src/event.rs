use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// The kind of client action a [`RawEvent`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    View,
    Download,
    Update,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::View => "view",
            Operation::Download => "download",
            Operation::Update => "update",
        }
    }

    /// Whether this operation has a durable column in `ScriptStatistics`.
    /// Page views only live in the fast-path counters.
    pub fn is_durable(&self) -> bool {
        matches!(self, Operation::Download | Operation::Update)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "view" => Ok(Operation::View),
            "download" => Ok(Operation::Download),
            "update" => Ok(Operation::Update),
            other => Err(CoreError::UnknownOperation(other.to_string())),
        }
    }
}

/// One client action, published on `script.statistic`.
///
/// Produced once per request and never persisted verbatim: the consumers fold
/// it into counters and then drop it. The wire encoding is JSON with a fixed
/// field set; unknown fields are rejected so a schema drift shows up as a
/// poison message instead of silently miscounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawEvent {
    pub script_id: i64,
    pub script_code_id: i64,
    /// 0 for anonymous visitors.
    pub user_id: i64,
    pub ip: String,
    pub user_agent: String,
    /// Client-held token identifying a visitor for unique-visitor counting.
    pub visitor_token: String,
    pub operation: Operation,
    pub time: DateTime<Utc>,
}

impl RawEvent {
    pub fn encode(&self) -> Result<Vec<u8>, CoreError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CoreError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Script metadata carried by `script.create` and `script.code.update`.
///
/// The CRUD layer owns scripts; this is only the slice the search document
/// needs, captured at publish time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptSnapshot {
    pub script_id: i64,
    pub user_id: i64,
    pub name: String,
    pub description: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payload of `script.delete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptDeleted {
    pub script_id: i64,
}

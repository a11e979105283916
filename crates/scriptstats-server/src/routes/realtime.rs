use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::{error::AppError, state::AppState};

use super::parse_operation;

#[derive(Debug, Deserialize)]
pub struct RealtimeQuery {
    pub operation: Option<String>,
}

/// `GET /api/scripts/{id}/realtime`: per-minute counts for the last 15
/// minutes, current minute first.
pub async fn get_realtime(
    State(state): State<Arc<AppState>>,
    Path(script_id): Path<i64>,
    Query(query): Query<RealtimeQuery>,
) -> Result<impl IntoResponse, AppError> {
    let operation = parse_operation(query.operation.as_deref())?;
    let minutes = state.query.realtime(script_id, operation).await?;

    Ok(Json(json!({
        "data": {
            "script_id": script_id,
            "operation": operation,
            "minutes": minutes,
        }
    })))
}

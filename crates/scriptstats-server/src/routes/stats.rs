use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;

use crate::{error::AppError, state::AppState};

use super::parse_operation;

/// Longest window served by the statistics route.
const MAX_DAYS: u32 = 365;

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub operation: Option<String>,
    pub days: Option<u32>,
    /// Last day of the window (`YYYY-MM-DD`); defaults to today.
    pub from: Option<String>,
}

/// `GET /api/scripts/{id}/statistics`: page views, unique visitors and the
/// durable totals for one script.
///
/// `days` defaults to 7. Visitor counts are approximate.
#[tracing::instrument(skip(state, query))]
pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    Path(script_id): Path<i64>,
    Query(query): Query<StatsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let operation = parse_operation(query.operation.as_deref())?;
    let days = query.days.unwrap_or(7);
    if !(1..=MAX_DAYS).contains(&days) {
        return Err(AppError::invalid("days", format!("days must be between 1 and {MAX_DAYS}")));
    }
    let from = match query.from.as_deref() {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|_| AppError::invalid("from", "from must be YYYY-MM-DD"))?,
        None => state.query.today(),
    };

    let total_pv = state.query.total_pv(script_id, operation).await?;
    let days_pv = state
        .query
        .days_pv_num(script_id, operation, days, from)
        .await?;
    let days_uv = state
        .query
        .days_uv_num(script_id, operation, days, from)
        .await?;
    let totals = state.repository.find_script(script_id).await?;
    let day_totals = state.repository.find_script_date(script_id, from).await?;

    Ok(Json(json!({
        "data": {
            "script_id": script_id,
            "operation": operation,
            "from": from,
            "days": days,
            "total_pv": total_pv,
            "days_pv": days_pv,
            "days_uv": days_uv,
            "totals": totals,
            "day_totals": day_totals,
        }
    })))
}

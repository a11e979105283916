use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::state::AppState;

/// `GET /health`: liveness check.
///
/// Returns `200 OK` when both the Counter Store and DuckDB answer a ping,
/// `503 Service Unavailable` otherwise.
///
/// Response shape:
/// ```json
/// { "status": "ok", "version": "0.1.0", "counter_store": "ok", "database": "ok" }
/// ```
#[tracing::instrument(skip(state))]
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let counter_store = match state.store.ping().await {
        Ok(()) => "ok",
        Err(e) => {
            tracing::error!(error = %e, "Health check: counter store unreachable");
            "unreachable"
        }
    };
    let database = match state.repository.ping().await {
        Ok(()) => "ok",
        Err(e) => {
            tracing::error!(error = %e, "Health check: DuckDB unreachable");
            "unreachable"
        }
    };

    let healthy = counter_store == "ok" && database == "ok";
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "status": if healthy { "ok" } else { "degraded" },
            "version": env!("CARGO_PKG_VERSION"),
            "counter_store": counter_store,
            "database": database
        })),
    )
}

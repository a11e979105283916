use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;

use scriptstats_core::event::{Operation, RawEvent};
use scriptstats_core::visitor::visitor_token_or_derive;

use crate::{error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct StatisticsPayload {
    pub script_id: i64,
    #[serde(default)]
    pub script_code_id: i64,
    /// 0 (or absent) for anonymous visitors.
    #[serde(default)]
    pub user_id: i64,
    pub operation: String,
    /// Client-held statistics token; derived from IP and UA when absent.
    pub visitor_token: Option<String>,
}

/// `POST /api/statistics`: record one script view, download or update.
///
/// The event is handed to the producer on a detached task and the request
/// returns `202 Accepted` without waiting for it. Publish failures and a
/// saturated publish queue are logged, never surfaced to the client.
#[tracing::instrument(skip(state, headers, payload))]
pub async fn collect(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<StatisticsPayload>,
) -> Result<impl IntoResponse, AppError> {
    let operation = payload
        .operation
        .parse::<Operation>()
        .map_err(|e| AppError::invalid("operation", e.to_string()))?;
    if payload.script_id <= 0 {
        return Err(AppError::invalid("script_id", "script_id must be positive"));
    }

    let ip = extract_client_ip(&headers);
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let time = state.clock.now();
    let visitor_token = visitor_token_or_derive(payload.visitor_token.as_deref(), &ip, &user_agent, time);

    state.producer.spawn_publish(RawEvent {
        script_id: payload.script_id,
        script_code_id: payload.script_code_id,
        user_id: payload.user_id,
        ip,
        user_agent,
        visitor_token,
        operation,
        time,
    });

    Ok((
        axum::http::StatusCode::ACCEPTED,
        Json(json!({ "ok": true })),
    ))
}

/// Extract the real client IP from `X-Forwarded-For` (first entry).
///
/// Falls back to `"unknown"` when the header is absent.
fn extract_client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ip_is_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(extract_client_ip(&headers), "203.0.113.7");
        assert_eq!(extract_client_ip(&HeaderMap::new()), "unknown");
    }
}

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{TimeZone, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::time::{sleep, Duration, Instant};
use tower::ServiceExt;

use scriptstats_core::clock::{Clock, ManualClock};
use scriptstats_core::config::Config;
use scriptstats_core::event::{Operation, RawEvent};
use scriptstats_core::memory::{MemoryChannel, MemoryCounterStore, MemorySearchIndex};
use scriptstats_core::repository::StatisticsRepository;
use scriptstats_duckdb::DuckDbBackend;
use scriptstats_server::app::build_app;
use scriptstats_server::state::AppState;

/// Create a fresh in-memory pipeline + state + app for each test.
fn setup() -> (Arc<AppState>, axum::Router, Arc<DuckDbBackend>, ManualClock) {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("in-memory DuckDB"));
    let state = Arc::new(AppState::new(
        Config::default(),
        Arc::new(clock.clone()),
        Arc::new(MemoryCounterStore::new(Arc::new(clock.clone()))),
        Arc::new(MemoryChannel::new()),
        db.clone(),
        Arc::new(MemorySearchIndex::new()),
    ));
    let app = build_app(Arc::clone(&state));
    (state, app, db, clock)
}

async fn json_body(response: axum::http::Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("parse JSON")
}

fn post_statistics(body: Value, ip: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/statistics")
        .header("content-type", "application/json")
        .header("x-forwarded-for", ip)
        .header("user-agent", "Mozilla/5.0 (X11; Linux x86_64)")
        .body(Body::from(body.to_string()))
        .expect("build request")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build request")
}

/// Fold one download straight into the counters and durable tables.
async fn seed_download(state: &AppState, script_id: i64, ip: &str) {
    let event = RawEvent {
        script_id,
        script_code_id: 1,
        user_id: 0,
        ip: ip.to_string(),
        user_agent: "ua".to_string(),
        visitor_token: format!("tok-{ip}"),
        operation: Operation::Download,
        time: state.clock.now(),
    };
    if state.aggregator.on_event(&event).await.expect("aggregate") {
        state.reconciler.apply(&event).await.expect("apply");
    }
}

// ============================================================
// POST /api/statistics
// ============================================================

#[tokio::test]
async fn test_collect_returns_202_and_event_reaches_durable_totals() {
    let (state, app, db, _clock) = setup();
    let (shutdown, shutdown_rx) = watch::channel(false);
    state
        .start_consumers(&shutdown_rx)
        .await
        .expect("start consumers");

    let response = app
        .oneshot(post_statistics(
            json!({ "script_id": 11, "script_code_id": 2, "operation": "download" }),
            "203.0.113.9, 10.0.0.1",
        ))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(json_body(response).await, json!({ "ok": true }));

    // Publishing is detached from the request; poll the durable row.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(row) = db.find_script(11).await.expect("find script") {
            assert_eq!(row.download, 1);
            break;
        }
        assert!(Instant::now() < deadline, "download never reached DuckDB");
        sleep(Duration::from_millis(10)).await;
    }
    shutdown.send(true).ok();
}

#[tokio::test]
async fn test_collect_rejects_unknown_operation() {
    let (_state, app, _db, _clock) = setup();

    let response = app
        .oneshot(post_statistics(
            json!({ "script_id": 11, "operation": "star" }),
            "203.0.113.9",
        ))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "validation_error");
    assert_eq!(body["error"]["field"], "operation");
}

#[tokio::test]
async fn test_collect_rejects_non_positive_script_id() {
    let (_state, app, _db, _clock) = setup();

    let response = app
        .oneshot(post_statistics(
            json!({ "script_id": 0, "operation": "view" }),
            "203.0.113.9",
        ))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"]["field"], "script_id");
}

#[tokio::test]
async fn test_collect_accepts_when_no_consumer_is_listening() {
    // No consumer groups exist, so the channel drops the event. The client
    // still gets 202.
    let (_state, app, _db, _clock) = setup();

    let response = app
        .oneshot(post_statistics(
            json!({ "script_id": 5, "operation": "view", "visitor_token": "abc" }),
            "198.51.100.4",
        ))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

// ============================================================
// GET /api/scripts/{id}/statistics
// ============================================================

#[tokio::test]
async fn test_statistics_defaults_to_download_over_seven_days() {
    let (state, app, _db, _clock) = setup();
    seed_download(&state, 21, "1.1.1.1").await;
    seed_download(&state, 21, "1.1.1.1").await;
    seed_download(&state, 21, "2.2.2.2").await;

    let response = app
        .oneshot(get("/api/scripts/21/statistics"))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let data = &body["data"];
    assert_eq!(data["script_id"], 21);
    assert_eq!(data["operation"], "download");
    assert_eq!(data["days"], 7);
    assert_eq!(data["from"], "2024-06-01");
    assert_eq!(data["total_pv"], 3);
    assert_eq!(data["days_pv"], 3);
    assert_eq!(data["days_uv"], 2);
    assert_eq!(data["totals"]["download"], 2);
    assert_eq!(data["day_totals"]["download"], 2);
}

#[tokio::test]
async fn test_statistics_window_ending_before_any_traffic_is_empty() {
    let (state, app, _db, _clock) = setup();
    seed_download(&state, 21, "1.1.1.1").await;

    let response = app
        .oneshot(get("/api/scripts/21/statistics?days=1&from=2024-05-31"))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["days_pv"], 0);
    assert_eq!(body["data"]["days_uv"], 0);
    assert_eq!(body["data"]["total_pv"], 1);
    assert!(body["data"]["day_totals"].is_null());
}

#[tokio::test]
async fn test_statistics_unknown_script_reads_as_zero() {
    let (_state, app, _db, _clock) = setup();

    let response = app
        .oneshot(get("/api/scripts/999/statistics?operation=view"))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["operation"], "view");
    assert_eq!(body["data"]["total_pv"], 0);
    assert!(body["data"]["totals"].is_null());
}

#[tokio::test]
async fn test_statistics_rejects_bad_parameters() {
    let (_state, app, _db, _clock) = setup();

    for (uri, field) in [
        ("/api/scripts/1/statistics?days=0", "days"),
        ("/api/scripts/1/statistics?days=366", "days"),
        ("/api/scripts/1/statistics?from=yesterday", "from"),
        ("/api/scripts/1/statistics?operation=star", "operation"),
    ] {
        let response = app.clone().oneshot(get(uri)).await.expect("request");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(json_body(response).await["error"]["field"], field, "{uri}");
    }
}

// ============================================================
// GET /api/scripts/{id}/realtime
// ============================================================

#[tokio::test]
async fn test_realtime_returns_fifteen_minutes_newest_first() {
    let (state, app, _db, clock) = setup();
    seed_download(&state, 31, "1.1.1.1").await;
    clock.advance(chrono::Duration::minutes(2));
    seed_download(&state, 31, "2.2.2.2").await;
    seed_download(&state, 31, "3.3.3.3").await;

    let response = app
        .oneshot(get("/api/scripts/31/realtime"))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let minutes = body["data"]["minutes"].as_array().expect("minutes array");
    assert_eq!(minutes.len(), 15);
    assert_eq!(minutes[0], 2);
    assert_eq!(minutes[1], 0);
    assert_eq!(minutes[2], 1);
}

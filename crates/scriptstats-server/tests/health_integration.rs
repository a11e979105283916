use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::NaiveDate;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use scriptstats_core::clock::SystemClock;
use scriptstats_core::config::Config;
use scriptstats_core::event::Operation;
use scriptstats_core::memory::{MemoryChannel, MemoryCounterStore};
use scriptstats_core::repository::StatisticsRepository;
use scriptstats_core::search::NullSearchIndex;
use scriptstats_core::statistics::{ScriptDateStatistics, ScriptStatistics};
use scriptstats_duckdb::DuckDbBackend;
use scriptstats_server::app::build_app;
use scriptstats_server::state::AppState;

/// Repository whose database has gone away.
struct UnreachableRepository;

#[async_trait]
impl StatisticsRepository for UnreachableRepository {
    async fn record(&self, _: i64, _: NaiveDate, _: Operation) -> Result<()> {
        anyhow::bail!("connection refused")
    }
    async fn find_script(&self, _: i64) -> Result<Option<ScriptStatistics>> {
        anyhow::bail!("connection refused")
    }
    async fn find_script_date(&self, _: i64, _: NaiveDate) -> Result<Option<ScriptDateStatistics>> {
        anyhow::bail!("connection refused")
    }
    async fn list_script_ids(&self) -> Result<Vec<i64>> {
        anyhow::bail!("connection refused")
    }
    async fn ping(&self) -> Result<()> {
        anyhow::bail!("connection refused")
    }
}

fn state_with(repository: Arc<dyn StatisticsRepository>) -> Arc<AppState> {
    Arc::new(AppState::new(
        Config::default(),
        Arc::new(SystemClock),
        Arc::new(MemoryCounterStore::default()),
        Arc::new(MemoryChannel::new()),
        repository,
        Arc::new(NullSearchIndex),
    ))
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

fn health_request() -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .expect("build request")
}

// ============================================================
// BDD: Health check returns 200 when every store is reachable
// ============================================================
#[tokio::test]
async fn test_health_returns_200_when_stores_reachable() {
    let db = DuckDbBackend::open_in_memory().expect("in-memory DuckDB");
    let app = build_app(state_with(Arc::new(db)));

    let response = app.oneshot(health_request()).await.expect("request");
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["counter_store"], "ok");
    assert_eq!(body["database"], "ok");
    assert!(body["version"].is_string());
}

// ============================================================
// BDD: Health check returns 503 when DuckDB is unreachable
// ============================================================
#[tokio::test]
async fn test_health_returns_503_when_database_unreachable() {
    let app = build_app(state_with(Arc::new(UnreachableRepository)));

    let response = app.oneshot(health_request()).await.expect("request");
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body = json_body(response).await;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["counter_store"], "ok");
    assert_eq!(body["database"], "unreachable");
}

// ============================================================
// BDD: Read routes surface repository failures as 500
// ============================================================
#[tokio::test]
async fn test_statistics_returns_500_when_database_unreachable() {
    let app = build_app(state_with(Arc::new(UnreachableRepository)));

    let request = Request::builder()
        .method("GET")
        .uri("/api/scripts/1/statistics")
        .body(Body::empty())
        .expect("build request");
    let response = app.oneshot(request).await.expect("request");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "internal_error");
}

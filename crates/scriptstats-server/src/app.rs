use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{routes, state::AppState};

/// Construct the Axum [`Router`] with all routes and middleware attached.
///
/// Middleware is listed in outer-to-inner order (outermost runs first on
/// request, last on response):
///
/// 1. `CorsLayer`: permissive CORS; statistics are posted from script
///    pages on any origin.
/// 2. `TraceLayer`: structured request/response logging via `tracing`.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health::health))
        .route("/api/statistics", post(routes::collect::collect))
        .route(
            "/api/scripts/{id}/statistics",
            get(routes::stats::get_stats),
        )
        .route(
            "/api/scripts/{id}/realtime",
            get(routes::realtime::get_realtime),
        )
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

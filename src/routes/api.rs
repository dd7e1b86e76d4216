use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::api;
use crate::state::AppState;
use std::sync::Arc;

/// Create the HTTP API router
///
/// All routes are thin readers over live session state and configuration:
///
/// - `GET /metrics` - snapshot across active sessions
/// - `GET /metrics/{call_id}` - one session's snapshot, 404 when unknown
/// - `GET /call-setup` - relay configuration document
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/metrics", get(api::metrics_snapshot))
        .route("/metrics/{call_id}", get(api::call_metrics))
        .route("/call-setup", get(api::call_setup))
        .layer(TraceLayer::new_for_http())
}

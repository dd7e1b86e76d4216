//! HTTP API handlers
//!
//! Thin readers over the session store and configuration: health check,
//! live metrics snapshots, and the call-setup document a CRM uses to point
//! the relay at this gateway.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::{Json, http::StatusCode};
use serde_json::{Value, json};

use crate::core::session::now_ms;
use crate::errors::{AppError, AppResult};
use crate::state::AppState;

/// Health check handler
/// Returns a simple JSON response indicating the server is running
pub async fn health_check() -> Result<Json<Value>, StatusCode> {
    Ok(Json(json!({
        "status": "OK"
    })))
}

/// Metrics snapshot across all active sessions.
pub async fn metrics_snapshot(State(state): State<Arc<AppState>>) -> AppResult<Json<Value>> {
    let now = now_ms();
    let mut sessions = Vec::new();
    for (_, handle) in state.sessions.iter_sessions() {
        let session = handle.lock().await;
        sessions.push(serde_json::to_value(session.snapshot(now))?);
    }

    Ok(Json(json!({
        "active_sessions": sessions.len(),
        "sessions": sessions,
    })))
}

/// Metrics snapshot for one call.
pub async fn call_metrics(
    Path(call_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<Value>> {
    let handle = state
        .sessions
        .get(&call_id)
        .ok_or_else(|| AppError::NotFound(format!("no active call {call_id}")))?;
    let session = handle.lock().await;
    Ok(Json(serde_json::to_value(session.snapshot(now_ms()))?))
}

/// Call-setup document describing the relay configuration for this
/// gateway: where to connect and how to greet and voice the call.
pub async fn call_setup(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "url": config.relay_url(),
        "greeting": config.greeting,
        "language": config.language,
        "voice": config.voice,
    }))
}

//! Relay WebSocket route configuration
//!
//! Configures the WebSocket endpoint carrying one call's event stream.

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::relay::relay_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the relay WebSocket router
///
/// # Endpoint
///
/// `GET /relay` - WebSocket upgrade for one call's event channel
///
/// # Protocol
///
/// After the upgrade, the relay sends JSON events:
/// 1. `setup` with the call id and call attributes
/// 2. `prompt` events carrying transcribed caller utterances
/// 3. `interrupt` / `dtmf` / `error` events as the call progresses
///
/// The server responds with:
/// - `{"type":"text","token":...,"last":...}` speech chunks per turn
/// - `{"type":"end"}` when the call should terminate
pub fn create_relay_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/relay", get(relay_handler))
        .layer(TraceLayer::new_for_http())
}

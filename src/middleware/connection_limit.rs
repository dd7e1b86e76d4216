//! Connection limit middleware for relay WebSocket connections
//!
//! Enforces a global maximum of concurrent relay connections and a per-IP
//! limit. A slot is reserved before the WebSocket upgrade runs and released
//! by the relay handler at teardown.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::state::{AppState, ConnectionLimitError};

/// Extension type to carry the client IP through to the handler
/// so the handler can release the connection when done.
#[derive(Clone, Debug)]
pub struct ClientIp(pub IpAddr);

/// Infallible extractor for the [`ClientIp`] extension.
///
/// Yields `None` when the request did not pass through
/// [`connection_limit_middleware`], in which case there is no slot to
/// release at teardown.
#[derive(Clone, Debug)]
pub struct MaybeClientIp(pub Option<IpAddr>);

impl<S> axum::extract::FromRequestParts<S> for MaybeClientIp
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        Ok(MaybeClientIp(
            parts.extensions.get::<ClientIp>().map(|client| client.0),
        ))
    }
}

/// Middleware that enforces connection limits for relay connections.
///
/// Only WebSocket upgrade requests (detected by the Upgrade header) are
/// limited; plain HTTP requests pass through untouched. Rejections map to
/// 503 when the server is at capacity and 429 when one IP holds too many
/// connections.
pub async fn connection_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let is_ws_upgrade = request
        .headers()
        .get("upgrade")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    if !is_ws_upgrade {
        return next.run(request).await;
    }

    let client_ip = addr.ip();

    match state.try_acquire_connection(client_ip) {
        Ok(()) => {
            // Inject the client IP so the handler can release the slot at
            // teardown.
            request.extensions_mut().insert(ClientIp(client_ip));
            next.run(request).await
        }
        Err(ConnectionLimitError::GlobalLimitReached) => {
            tracing::warn!(
                ip = %client_ip,
                "Rejecting relay connection: global limit reached"
            );
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Server at capacity. Please try again later.",
            )
                .into_response()
        }
        Err(ConnectionLimitError::PerIpLimitReached) => {
            tracing::warn!(
                ip = %client_ip,
                "Rejecting relay connection: per-IP limit reached"
            );
            (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many connections from your IP address.",
            )
                .into_response()
        }
    }
}

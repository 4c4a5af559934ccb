//! HTTP request handlers.

use crate::protocol::{ErrorBody, HandshakeBody, WireBody};
use crate::server::AppState;
use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use sessionrpc_core::{InboundCall, Result, RpcError, TransportConfig};
use std::sync::Arc;
use tracing::{debug, error};

/// Health check endpoint.
pub async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// `POST /{prefix}.{method}`: run one call for the caller's session.
pub async fn handle_call(
    state: Arc<AppState>,
    headers: HeaderMap,
    body: WireBody,
    prefix: String,
    method: &'static str,
) -> Response {
    let session_id = match ensure_session(&state, &headers).await {
        Ok(id) => id,
        Err(e) => return error_response(e),
    };

    let call = InboundCall::new(session_id.clone(), prefix, method, body.json);
    match state.dispatcher.dispatch(&call).await {
        Ok(reply) => with_session(&session_id, Json(WireBody { json: reply })),
        Err(e) => {
            error!("RPC error for {}: {}", call.path(), e);
            error_response(e)
        }
    }
}

/// `POST /{prefix}` for a callable interface: make sure the caller has a
/// session and tell it the id, so a push connection can be opened for it.
pub async fn handle_handshake(state: Arc<AppState>, headers: HeaderMap, prefix: String) -> Response {
    match ensure_session(&state, &headers).await {
        Ok(session_id) => {
            debug!(session_id = %session_id, "Handshake on /{}", prefix);
            let body = HandshakeBody {
                session_id: session_id.clone(),
            };
            with_session(&session_id, Json(body))
        }
        Err(e) => error_response(e),
    }
}

/// Session named by the request header, or a new one when the header is
/// missing or names a session the store does not know.
async fn ensure_session(state: &AppState, headers: &HeaderMap) -> Result<String> {
    let bridge = state.dispatcher.bridge();
    let requested = headers
        .get(TransportConfig::SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty());

    if let Some(session_id) = requested {
        if bridge.store().get(session_id).await?.is_some() {
            return Ok(session_id.to_string());
        }
        debug!(session_id, "Unknown session, creating a new one");
    }
    bridge.create_session().await
}

fn with_session(session_id: &str, body: impl IntoResponse) -> Response {
    let mut response = body.into_response();
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response
            .headers_mut()
            .insert(TransportConfig::SESSION_HEADER, value);
    }
    response
}

pub(crate) fn error_response(e: RpcError) -> Response {
    let status = match e {
        RpcError::SessionMissing { .. } => StatusCode::NOT_FOUND,
        RpcError::Transport { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = ErrorBody::new(e.to_rpc_error_code(), e.to_string());
    (status, Json(body)).into_response()
}

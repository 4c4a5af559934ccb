//! HTTP and WebSocket message shapes.
//!
//! Call (`POST /{prefix}.{method}`):
//! ```text
//! -> x-session-id: <id>            (optional)
//!    {"json": "{\"args\":[...]}"}
//! <- x-session-id: <id>
//!    {"json": "{\"response\":...,\"pushPayload\":...}"}
//! ```
//!
//! Handshake (`POST /{interface prefix}`): `{"sessionId": "<id>"}`.
//!
//! Push (`GET /push?session=<id>`, upgraded to WebSocket): text frames of
//! `{"tag": "prefix.method", "payload": "{\"args\":[...]}"}`. The first frame
//! carries [`READY_TAG`] and the connection id as payload.

use serde::{Deserialize, Serialize};
use sessionrpc_core::WireBlob;

/// Tag of the frame announcing that a push connection is bound to its session.
pub const READY_TAG: &str = "$connected";

/// Paths the server claims for itself; endpoint prefixes may not use them.
pub const RESERVED_PREFIXES: &[&str] = &["health", "push"];

/// Body of a call request or reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireBody {
    pub json: WireBlob,
}

/// Reply to a handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeBody {
    pub session_id: String,
}

/// Reply for failures outside any endpoint (store faults, bad sessions on
/// the push handshake).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: i32,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code,
                message: message.into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_body_carries_blob_as_string() {
        let body = WireBody {
            json: WireBlob::new(r#"{"args":[]}"#),
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"json": "{\"args\":[]}"})
        );
    }

    #[test]
    fn test_handshake_body_is_camel_case() {
        let body = HandshakeBody {
            session_id: "s1".into(),
        };
        assert_eq!(serde_json::to_value(&body).unwrap(), json!({"sessionId": "s1"}));
    }
}

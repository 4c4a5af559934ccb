//! Error types for sessionrpc.
//!
//! Every failure a call can hit is one variant of [`RpcError`]. The dispatcher
//! turns all of them into a failure envelope except store faults, which are
//! surfaced to the transport.

use thiserror::Error;

/// Main error type for sessionrpc.
#[derive(Debug, Error)]
pub enum RpcError {
    // Call-time errors, surfaced to the caller inside a failure envelope
    #[error("No session found for id {session_id}")]
    SessionMissing { session_id: String },

    #[error("cannot find connection for session {}", .session_id.as_deref().unwrap_or("<none>"))]
    ConnectionMissing { session_id: Option<String> },

    /// Deliberately generic: authorizer reasons never reach the caller.
    #[error("Unauthorized")]
    Unauthorized { method: String },

    #[error("implementation of {method} not defined in /{prefix}.{method}")]
    MethodNotImplemented { prefix: String, method: String },

    /// Raised by user handler code; the message is sent back verbatim.
    #[error("{0}")]
    Handler(String),

    /// An exception re-raised on the calling side of a request/response proxy.
    #[error("{0}")]
    Remote(String),

    // Setup errors
    #[error("Endpoint prefix already registered: {prefix}")]
    DuplicatePrefix { prefix: String },

    #[error("No endpoint registered for {name}")]
    UnknownEndpoint { name: String },

    #[error("No callable interface registered for {name}")]
    UnknownInterface { name: String },

    #[error("Type tag already registered: {tag}")]
    DuplicateTypeTag { tag: String },

    // Serialization errors
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("Codec error: {message}")]
    Codec {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Store errors
    #[error("Session store error: {message}")]
    Store { message: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Transport errors
    #[error("Transport error: {message}")]
    Transport { message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for sessionrpc operations.
pub type Result<T> = std::result::Result<T, RpcError>;

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::Codec {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for RpcError {
    fn from(err: rusqlite::Error) -> Self {
        RpcError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl RpcError {
    /// Shorthand for an error raised from a handler body.
    pub fn handler(message: impl Into<String>) -> Self {
        RpcError::Handler(message.into())
    }

    /// Convert to a JSON-RPC style error code.
    ///
    /// Standard codes:
    /// - -32601: Method not found
    /// - -32602: Invalid params (codec failures)
    /// - -32603: Internal error
    ///
    /// Application codes (-32000 to -32099):
    /// - -32000: Handler exception (local or remote)
    /// - -32001: Session missing
    /// - -32002: Connection missing
    /// - -32003: Unauthorized
    /// - -32004: Session store failure
    /// - -32005: Setup / configuration error
    /// - -32006: Transport failure
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            RpcError::Handler(_) | RpcError::Remote(_) => -32000,
            RpcError::SessionMissing { .. } => -32001,
            RpcError::ConnectionMissing { .. } => -32002,
            RpcError::Unauthorized { .. } => -32003,
            RpcError::Store { .. } | RpcError::Database { .. } => -32004,

            RpcError::DuplicatePrefix { .. }
            | RpcError::UnknownEndpoint { .. }
            | RpcError::UnknownInterface { .. }
            | RpcError::DuplicateTypeTag { .. }
            | RpcError::Config { .. } => -32005,

            RpcError::Transport { .. } => -32006,

            RpcError::MethodNotImplemented { .. } => -32601,

            RpcError::TypeMismatch { .. } | RpcError::Codec { .. } => -32602,

            RpcError::Other(_) => -32603,
        }
    }

    /// Store faults are the only errors the dispatcher lets escape.
    pub fn is_store_fault(&self) -> bool {
        matches!(self, RpcError::Store { .. } | RpcError::Database { .. })
    }
}

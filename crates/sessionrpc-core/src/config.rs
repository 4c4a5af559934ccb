//! Centralized configuration for sessionrpc.
//!
//! Fixed limits live in unit structs as associated constants; runtime knobs
//! (logging flags, concurrency policy) are plain serde structs with defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Session lifetime settings.
pub struct SessionConfig;

impl SessionConfig {
    /// Sessions idle longer than this are dropped by the bundled stores (24 hours).
    pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(86_400);
    /// Upper bound on live sessions kept by the in-memory store.
    pub const MEMORY_STORE_CAPACITY: u64 = 100_000;
    /// Longest accepted max age (100 years); larger values are clamped.
    pub const MAX_AGE_LIMIT: Duration = Duration::from_secs(100 * 365 * 86_400);
    pub const SQLITE_BUSY_TIMEOUT_MS: u32 = 5_000;
}

/// Transport-facing constants shared by the server and the client.
pub struct TransportConfig;

impl TransportConfig {
    /// Header carrying the session id on request/response calls.
    pub const SESSION_HEADER: &'static str = "x-session-id";
    /// Path of the WebSocket push endpoint.
    pub const PUSH_PATH: &'static str = "/push";
    /// Query parameter naming the session on the push handshake.
    pub const PUSH_SESSION_PARAM: &'static str = "session";
    /// Outgoing frames buffered per push connection before sends fail.
    pub const PUSH_CHANNEL_CAPACITY: usize = 64;
    pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
    pub const MAX_PUSH_CONNECTIONS: usize = 4_096;
    /// HTTP requests served concurrently before new ones queue.
    pub const MAX_IN_FLIGHT_REQUESTS: usize = 1_024;
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
}

/// Which events get logged.
///
/// Defaults match the long-standing behaviour: route binding, connections,
/// calls and exceptions are logged; outgoing proxy requests and payload
/// contents are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Route binding at startup.
    pub create: bool,
    /// Push connections and disconnections.
    pub connect: bool,
    /// Handler failures.
    pub exceptions: bool,
    /// Inbound dispatches.
    pub calls: bool,
    /// Outgoing proxy invocations.
    pub requests: bool,
    /// Include payloads in `calls` and `requests` lines.
    pub data: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            create: true,
            connect: true,
            exceptions: true,
            calls: true,
            requests: false,
            data: false,
        }
    }
}

impl LogConfig {
    /// Everything off.
    pub fn quiet() -> Self {
        Self {
            create: false,
            connect: false,
            exceptions: false,
            calls: false,
            requests: false,
            data: false,
        }
    }
}

/// How overlapping calls against one session are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyPolicy {
    /// One dispatch at a time per session id, from state read to persist.
    #[default]
    SerializedPerSession,
    /// No ordering; overlapping calls on the same prefix race and the last
    /// persist wins.
    LastWriteWins,
}

/// Runtime configuration for a [`crate::Dispatcher`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub log: LogConfig,
    pub policy: ConcurrencyPolicy,
}

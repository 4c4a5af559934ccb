//! Sessionrpc Server - HTTP and WebSocket transports for sessionrpc-core.
//!
//! Endpoint methods are served as `POST /{prefix}.{method}`, callable
//! interfaces get a `POST /{prefix}` session handshake, and pushes travel
//! over `GET /push?session=<id>`. [`BridgeClient`] speaks the same protocol
//! from the other side.

pub mod client;
pub mod demo;
mod handler;
pub mod protocol;
mod push;
pub mod server;

pub use client::{BridgeClient, PushSubscription};
pub use server::{build_router, start_server, AppState};

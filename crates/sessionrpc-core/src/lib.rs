//! Sessionrpc Core - session-scoped bidirectional RPC.
//!
//! Server-side endpoint types hold per-session state that is rebuilt from the
//! session store before every call and written back after a successful one.
//! Endpoints can reach back to the client of their own session, or of every
//! session, through typed proxies of callable interfaces.
//!
//! This crate is transport-agnostic: transports feed [`InboundCall`]s to a
//! [`Dispatcher`] and implement [`PushChannel`] for their connections.
//!
//! # Example
//!
//! ```rust,ignore
//! use sessionrpc_core::*;
//!
//! remote_interface! {
//!     pub struct GreeterApi {
//!         fn greet(name: String) -> String;
//!     }
//! }
//!
//! #[derive(Default, serde::Serialize, serde::Deserialize)]
//! struct Greeter { greeted: u32 }
//!
//! #[async_trait::async_trait]
//! impl Endpoint for Greeter {
//!     const METHODS: &'static [&'static str] = &["greet"];
//!
//!     async fn invoke(&mut self, _: &str, args: &Args, ctx: &mut CallContext) -> Result<Value> {
//!         self.greeted += 1;
//!         ctx.encode(&format!("Hello {}", args.get::<String>(0)?))
//!     }
//! }
//!
//! let mut registry = EndpointRegistry::new();
//! registry.register::<Greeter, GreeterApi>("greeter", None, None)?;
//! let dispatcher = Dispatcher::builder(registry, Arc::new(MemorySessionStore::new())).build()?;
//! ```

pub mod bridge;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod endpoint;
pub mod envelope;
pub mod error;
pub mod lifecycle;
pub mod proxy;
pub mod receiver;
pub mod session;

// Re-export commonly used types
pub use bridge::{
    ConnectionRegistry, PushConnection, PushFrame, SessionBridge, SessionEnumeration,
    SessionHandle,
};
pub use codec::{TypeRegistry, WireBlob};
pub use config::{
    ConcurrencyPolicy, DispatcherConfig, LogConfig, SessionConfig, TransportConfig,
};
pub use dispatch::{
    CallContext, Dispatcher, DispatcherBuilder, InboundCall, LocalChannel, Services,
};
pub use endpoint::{
    Authorizer, Endpoint, EndpointRegistry, InterfaceDefinition, RemoteInterface, Route,
};
pub use envelope::{Args, CallEnvelope, ResponseEnvelope};
pub use error::{Result, RpcError};
pub use proxy::{CallOutcome, PushChannel, RemoteProxy, RequestChannel};
pub use receiver::{PushHandler, PushRouter};
pub use session::{
    MemorySessionStore, SessionRecord, SessionStore, SessionStoreConfig, SqliteSessionStore,
};

/// JSON value type used for arguments and responses.
pub use serde_json::Value;

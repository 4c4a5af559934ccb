//! Endpoint and remote-interface contracts, plus the registry binding them to
//! prefixes.
//!
//! An endpoint is a serializable state type whose methods run on the server
//! for one session at a time. Its state is rebuilt from the session before
//! every call and written back after a successful one.
//!
//! A remote interface is the typed surface of whatever sits on the other end:
//! a browser for pushes, or another server for request/response calls. It is
//! declared with [`remote_interface!`](crate::remote_interface) and never
//! implemented by hand.

mod registry;

pub use registry::{EndpointRegistry, InterfaceDefinition, Route};
pub(crate) use registry::EndpointDefinition;

use crate::dispatch::CallContext;
use crate::envelope::Args;
use crate::error::Result;
use crate::proxy::RemoteProxy;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Server-side implementation of a remote interface.
///
/// `Default` builds the seed state for a session that has never touched this
/// endpoint. Every field that must survive between calls has to round-trip
/// through serde.
#[async_trait]
pub trait Endpoint: Serialize + DeserializeOwned + Default + Send + Sync + 'static {
    /// Methods this type implements. Calls for a method of the interface that
    /// is missing here fail with `MethodNotImplemented`.
    const METHODS: &'static [&'static str];

    /// Run `method` against this session's state.
    ///
    /// The returned value is the response payload; encode typed results with
    /// [`CallContext::encode`] so registered types keep their tag.
    async fn invoke(&mut self, method: &str, args: &Args, ctx: &mut CallContext) -> Result<Value>;

    fn implements(method: &str) -> bool {
        Self::METHODS.contains(&method)
    }
}

/// Typed client handle for a remote interface.
///
/// Generated by [`remote_interface!`](crate::remote_interface). Each method of
/// the interface becomes an async method forwarding to [`RemoteProxy::call`].
pub trait RemoteInterface: Send + Sync + Sized + 'static {
    /// Name used in errors and logs.
    const NAME: &'static str;
    /// Wire method names, in declaration order.
    const METHODS: &'static [&'static str];

    fn from_proxy(proxy: RemoteProxy) -> Self;

    fn proxy(&self) -> &RemoteProxy;
}

/// Decides whether a call may run.
///
/// Consulted after the endpoint state has been rehydrated and the arguments
/// decoded, so decisions can depend on both. A `false` turns into a plain
/// `Unauthorized` failure; no reason reaches the caller.
#[async_trait]
pub trait Authorizer<E: Sync>: Send + Sync {
    async fn authorize(&self, endpoint: &E, method: &str, args: &Args) -> bool;
}

#[async_trait]
impl<E, F> Authorizer<E> for F
where
    E: Sync + 'static,
    F: Fn(&E, &str, &Args) -> bool + Send + Sync,
{
    async fn authorize(&self, endpoint: &E, method: &str, args: &Args) -> bool {
        self(endpoint, method, args)
    }
}

//! Per-call context handed to endpoint methods.

use crate::bridge::SessionBridge;
use crate::codec::{self, TypeRegistry};
use crate::endpoint::{Endpoint, RemoteInterface};
use crate::error::{Result, RpcError};
use serde::Serialize;
use serde_json::Value;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Application objects shared by every call, looked up by type.
#[derive(Clone, Default)]
pub struct Services {
    entries: Arc<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl Services {
    pub(crate) fn insert<T: Send + Sync + 'static>(&mut self, service: Arc<T>) {
        Arc::make_mut(&mut self.entries).insert(TypeId::of::<T>(), service);
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.entries
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|entry| entry.downcast::<T>().ok())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What a running endpoint method can see and do besides its own state.
pub struct CallContext {
    session_id: String,
    prefix: String,
    types: Arc<TypeRegistry>,
    push_payload: Option<Value>,
    bridge: SessionBridge,
    services: Services,
}

impl CallContext {
    pub(crate) fn new(
        session_id: String,
        prefix: String,
        types: Arc<TypeRegistry>,
        bridge: SessionBridge,
        services: Services,
    ) -> Self {
        Self {
            session_id,
            prefix,
            types,
            push_payload: None,
            bridge,
            services,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Prefix of the endpoint being called.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    /// Encode a response value with this endpoint's type registry.
    pub fn encode<T: Serialize + 'static>(&self, value: &T) -> Result<Value> {
        codec::encode(value, &self.types)
    }

    /// Attach a payload for the caller's push handler. It rides along in the
    /// response envelope, on success and on failure. A second call replaces
    /// the first.
    pub fn send_to_client<T: Serialize + 'static>(&mut self, data: &T) -> Result<()> {
        self.push_payload = Some(codec::encode(data, &self.types)?);
        Ok(())
    }

    pub fn push_payload(&self) -> Option<&Value> {
        self.push_payload.as_ref()
    }

    pub(crate) fn take_push_payload(&mut self) -> Option<Value> {
        self.push_payload.take()
    }

    /// Proxy for callable interface `I` on this session's client.
    pub async fn peer<I: RemoteInterface>(&self) -> Result<I> {
        self.bridge.peer::<I>(&self.session_id).await
    }

    /// This session's instance of another endpoint, read-only.
    pub async fn endpoint<E: Endpoint>(&self) -> Result<E> {
        self.bridge.endpoint::<E>(&self.session_id).await
    }

    pub fn bridge(&self) -> &SessionBridge {
        &self.bridge
    }

    /// Shared service registered with
    /// [`DispatcherBuilder::service`](super::DispatcherBuilder::service).
    pub fn service<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.services.get::<T>().ok_or_else(|| RpcError::Config {
            message: format!("No service registered for {}", type_name::<T>()),
        })
    }
}

//! Prefix-keyed registry of endpoints and callable interfaces.
//!
//! Built once at startup and frozen into the dispatcher; lookups afterwards
//! are read-only.

use super::{Authorizer, Endpoint, RemoteInterface};
use crate::codec::{TypeRegistry, WireBlob};
use crate::dispatch::{Dispatcher, InboundCall};
use crate::error::{Result, RpcError};
use crate::session::SessionRecord;
use async_trait::async_trait;
use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// One dispatchable `prefix.method` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub prefix: String,
    pub method: &'static str,
}

impl Route {
    /// Wire tag, `prefix.method`.
    pub fn tag(&self) -> String {
        format!("{}.{}", self.prefix, self.method)
    }

    /// HTTP path, `/prefix.method`.
    pub fn path(&self) -> String {
        format!("/{}.{}", self.prefix, self.method)
    }
}

/// A remote interface the server may call on connected clients.
#[derive(Debug)]
pub struct InterfaceDefinition {
    pub prefix: String,
    pub name: &'static str,
    pub methods: &'static [&'static str],
    pub types: Arc<TypeRegistry>,
}

/// Everything the dispatcher needs to run calls for endpoint type `E`.
pub(crate) struct EndpointDefinition<E: Endpoint> {
    pub(crate) prefix: String,
    pub(crate) interface_name: &'static str,
    pub(crate) interface_methods: &'static [&'static str],
    pub(crate) types: Arc<TypeRegistry>,
    pub(crate) authorizer: Option<Arc<dyn Authorizer<E>>>,
}

/// Type-erased view of an [`EndpointDefinition`].
#[async_trait]
pub(crate) trait EndpointHandler: Send + Sync {
    fn prefix(&self) -> &str;

    fn type_name(&self) -> &'static str;

    fn interface_name(&self) -> &'static str;

    fn interface_methods(&self) -> &'static [&'static str];

    fn types(&self) -> &Arc<TypeRegistry>;

    async fn handle(
        &self,
        dispatcher: &Dispatcher,
        call: &InboundCall,
        record: Option<SessionRecord>,
    ) -> Result<WireBlob>;
}

#[async_trait]
impl<E: Endpoint> EndpointHandler for EndpointDefinition<E> {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn type_name(&self) -> &'static str {
        short_type_name::<E>()
    }

    fn interface_name(&self) -> &'static str {
        self.interface_name
    }

    fn interface_methods(&self) -> &'static [&'static str] {
        self.interface_methods
    }

    fn types(&self) -> &Arc<TypeRegistry> {
        &self.types
    }

    async fn handle(
        &self,
        dispatcher: &Dispatcher,
        call: &InboundCall,
        record: Option<SessionRecord>,
    ) -> Result<WireBlob> {
        dispatcher.run(self, call, record).await
    }
}

/// Registry of endpoints (server implementations) and callable interfaces
/// (client surfaces the server can reach), keyed by URL prefix.
///
/// Prefixes are unique across both kinds.
#[derive(Default)]
pub struct EndpointRegistry {
    endpoints: HashMap<String, Arc<dyn EndpointHandler>>,
    endpoint_prefixes: HashMap<TypeId, String>,
    endpoint_order: Vec<String>,
    interfaces: HashMap<TypeId, Arc<InterfaceDefinition>>,
    interface_prefixes: HashMap<String, TypeId>,
    interface_order: Vec<TypeId>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind endpoint type `E`, implementing interface `I`, to `prefix`.
    ///
    /// `E` itself is added to `types` under its short type name so its state
    /// blobs carry a tag, unless that name is already taken.
    pub fn register<E, I>(
        &mut self,
        prefix: impl Into<String>,
        types: Option<TypeRegistry>,
        authorizer: Option<Arc<dyn Authorizer<E>>>,
    ) -> Result<()>
    where
        E: Endpoint,
        I: RemoteInterface,
    {
        let prefix = prefix.into();
        self.check_prefix(&prefix)?;
        if let Some(existing) = self.endpoint_prefixes.get(&TypeId::of::<E>()) {
            return Err(RpcError::Config {
                message: format!(
                    "Endpoint {} already registered under /{}",
                    short_type_name::<E>(),
                    existing
                ),
            });
        }

        let mut types = types.unwrap_or_default();
        let own_tag = short_type_name::<E>();
        if types.tag_of::<E>().is_none() && !types.contains_tag(own_tag) {
            types.register::<E>(own_tag)?;
        }

        let definition = EndpointDefinition::<E> {
            prefix: prefix.clone(),
            interface_name: I::NAME,
            interface_methods: I::METHODS,
            types: Arc::new(types),
            authorizer,
        };

        self.endpoints.insert(prefix.clone(), Arc::new(definition));
        self.endpoint_prefixes.insert(TypeId::of::<E>(), prefix.clone());
        self.endpoint_order.push(prefix);
        Ok(())
    }

    /// Make interface `I` callable on clients under `prefix`.
    pub fn register_callable_interface<I>(
        &mut self,
        prefix: impl Into<String>,
        types: Option<TypeRegistry>,
    ) -> Result<()>
    where
        I: RemoteInterface,
    {
        let prefix = prefix.into();
        self.check_prefix(&prefix)?;
        if let Some(existing) = self.interfaces.get(&TypeId::of::<I>()) {
            return Err(RpcError::Config {
                message: format!(
                    "Interface {} already registered under /{}",
                    I::NAME,
                    existing.prefix
                ),
            });
        }

        let definition = InterfaceDefinition {
            prefix: prefix.clone(),
            name: I::NAME,
            methods: I::METHODS,
            types: Arc::new(types.unwrap_or_default()),
        };
        self.interfaces
            .insert(TypeId::of::<I>(), Arc::new(definition));
        self.interface_prefixes.insert(prefix, TypeId::of::<I>());
        self.interface_order.push(TypeId::of::<I>());
        Ok(())
    }

    fn check_prefix(&self, prefix: &str) -> Result<()> {
        if prefix.is_empty() || prefix.contains('/') || prefix.chars().any(char::is_whitespace) {
            return Err(RpcError::Config {
                message: format!("Invalid endpoint prefix: {:?}", prefix),
            });
        }
        if self.contains_prefix(prefix) {
            return Err(RpcError::DuplicatePrefix {
                prefix: prefix.to_string(),
            });
        }
        Ok(())
    }

    pub fn contains_prefix(&self, prefix: &str) -> bool {
        self.endpoints.contains_key(prefix) || self.interface_prefixes.contains_key(prefix)
    }

    /// Prefix endpoint type `E` is bound to.
    pub fn endpoint_prefix<E: Endpoint>(&self) -> Option<&str> {
        self.endpoint_prefixes
            .get(&TypeId::of::<E>())
            .map(String::as_str)
    }

    pub(crate) fn handler(&self, prefix: &str) -> Option<Arc<dyn EndpointHandler>> {
        self.endpoints.get(prefix).cloned()
    }

    /// Prefix and type registry for endpoint type `E`.
    pub(crate) fn endpoint_binding<E: Endpoint>(&self) -> Result<(&str, &Arc<TypeRegistry>)> {
        self.endpoint_prefixes
            .get(&TypeId::of::<E>())
            .and_then(|prefix| self.endpoints.get(prefix))
            .map(|handler| (handler.prefix(), handler.types()))
            .ok_or_else(|| RpcError::UnknownEndpoint {
                name: short_type_name::<E>().to_string(),
            })
    }

    /// Registration of callable interface `I`.
    pub fn interface<I: RemoteInterface>(&self) -> Result<Arc<InterfaceDefinition>> {
        self.interfaces
            .get(&TypeId::of::<I>())
            .cloned()
            .ok_or_else(|| RpcError::UnknownInterface {
                name: I::NAME.to_string(),
            })
    }

    pub fn interface_by_prefix(&self, prefix: &str) -> Option<Arc<InterfaceDefinition>> {
        self.interface_prefixes
            .get(prefix)
            .and_then(|id| self.interfaces.get(id))
            .cloned()
    }

    /// Callable interfaces in registration order.
    pub fn interfaces(&self) -> impl Iterator<Item = &Arc<InterfaceDefinition>> {
        self.interface_order
            .iter()
            .filter_map(|id| self.interfaces.get(id))
    }

    /// Every dispatchable route: one per method of each endpoint's interface,
    /// in registration order.
    pub fn routes(&self) -> Vec<Route> {
        self.endpoint_order
            .iter()
            .filter_map(|prefix| self.endpoints.get(prefix))
            .flat_map(|handler| {
                handler.interface_methods().iter().map(move |method| Route {
                    prefix: handler.prefix().to_string(),
                    method: *method,
                })
            })
            .collect()
    }

    pub(crate) fn handlers(&self) -> impl Iterator<Item = &Arc<dyn EndpointHandler>> {
        self.endpoint_order
            .iter()
            .filter_map(|prefix| self.endpoints.get(prefix))
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

impl fmt::Debug for EndpointRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointRegistry")
            .field("endpoints", &self.endpoint_order)
            .field(
                "interfaces",
                &self.interfaces().map(|i| i.prefix.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Last path segment of a type name, e.g. `UserEndpoint` for
/// `my_app::users::UserEndpoint`. Generic arguments are kept.
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    let start = base.rfind("::").map(|i| i + 2).unwrap_or(0);
    &full[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::CallContext;
    use crate::envelope::Args;
    use serde::{Deserialize, Serialize};
    use serde_json::Value;

    crate::remote_interface! {
        pub struct CounterApi {
            fn increment(by: u32) -> u32;
            fn reset();
        }
    }

    crate::remote_interface! {
        pub struct Notifier {
            fn notify(message: String);
        }
    }

    #[derive(Default, Serialize, Deserialize)]
    struct Counter {
        count: u32,
    }

    #[async_trait]
    impl Endpoint for Counter {
        const METHODS: &'static [&'static str] = &["increment"];

        async fn invoke(
            &mut self,
            _method: &str,
            args: &Args,
            _ctx: &mut CallContext,
        ) -> Result<Value> {
            self.count += args.get::<u32>(0)?;
            Ok(Value::from(self.count))
        }
    }

    #[test]
    fn test_routes_follow_interface_methods() {
        let mut registry = EndpointRegistry::new();
        registry
            .register::<Counter, CounterApi>("counter", None, None)
            .unwrap();

        let routes = registry.routes();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].tag(), "counter.increment");
        assert_eq!(routes[1].path(), "/counter.reset");
    }

    #[test]
    fn test_prefixes_are_unique_across_kinds() {
        let mut registry = EndpointRegistry::new();
        registry
            .register::<Counter, CounterApi>("shared", None, None)
            .unwrap();
        let err = registry
            .register_callable_interface::<Notifier>("shared", None)
            .unwrap_err();
        assert!(matches!(err, RpcError::DuplicatePrefix { prefix } if prefix == "shared"));
    }

    #[test]
    fn test_endpoint_type_registers_once() {
        let mut registry = EndpointRegistry::new();
        registry
            .register::<Counter, CounterApi>("a", None, None)
            .unwrap();
        assert!(registry
            .register::<Counter, CounterApi>("b", None, None)
            .is_err());
        assert_eq!(registry.endpoint_prefix::<Counter>(), Some("a"));
    }

    #[test]
    fn test_endpoint_state_type_is_tagged() {
        let mut registry = EndpointRegistry::new();
        registry
            .register::<Counter, CounterApi>("counter", None, None)
            .unwrap();
        let (prefix, types) = registry.endpoint_binding::<Counter>().unwrap();
        assert_eq!(prefix, "counter");
        assert_eq!(types.tag_of::<Counter>(), Some("Counter"));
    }

    #[test]
    fn test_unknown_lookups() {
        let registry = EndpointRegistry::new();
        assert!(matches!(
            registry.interface::<Notifier>(),
            Err(RpcError::UnknownInterface { .. })
        ));
        assert!(matches!(
            registry.endpoint_binding::<Counter>(),
            Err(RpcError::UnknownEndpoint { .. })
        ));
        assert!(registry.handler("counter").is_none());
    }

    #[test]
    fn test_invalid_prefix_rejected() {
        let mut registry = EndpointRegistry::new();
        assert!(registry
            .register_callable_interface::<Notifier>("a/b", None)
            .is_err());
        assert!(registry
            .register_callable_interface::<Notifier>("", None)
            .is_err());
    }

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name::<Counter>(), "Counter");
        assert!(short_type_name::<Vec<String>>().starts_with("Vec<"));
    }
}

//! Request dispatch.
//!
//! One inbound call runs through a fixed sequence:
//! 1. look up the session (missing: failure envelope)
//! 2. rehydrate the endpoint's state for that session
//! 3. decode the arguments
//! 4. check the method is implemented
//! 5. ask the authorizer
//! 6. invoke, then persist the state and reply with a success envelope
//!
//! Any error along the way becomes a failure envelope and leaves the stored
//! state untouched. Only faults of the session store itself escape as `Err`.

mod context;
mod local;

pub use context::{CallContext, Services};
pub use local::LocalChannel;

use crate::bridge::SessionBridge;
use crate::codec::WireBlob;
use crate::config::{ConcurrencyPolicy, DispatcherConfig, LogConfig};
use crate::endpoint::{Endpoint, EndpointDefinition, EndpointRegistry, Route};
use crate::envelope::{Args, ResponseEnvelope};
use crate::error::{Result, RpcError};
use crate::lifecycle;
use crate::session::{SessionRecord, SessionStore};
use std::sync::Arc;
use tracing::{error, info, warn};

/// One call as it arrives from a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundCall {
    pub session_id: String,
    pub prefix: String,
    pub method: String,
    /// Serialized [`CallEnvelope`](crate::envelope::CallEnvelope).
    pub args: WireBlob,
}

impl InboundCall {
    pub fn new(
        session_id: impl Into<String>,
        prefix: impl Into<String>,
        method: impl Into<String>,
        args: WireBlob,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            prefix: prefix.into(),
            method: method.into(),
            args,
        }
    }

    /// Build a call from a `prefix.method` wire tag.
    pub fn from_tag(session_id: impl Into<String>, tag: &str, args: WireBlob) -> Result<Self> {
        let (prefix, method) = tag.rsplit_once('.').ok_or_else(|| RpcError::Transport {
            message: format!("Malformed call tag: {}", tag),
        })?;
        Ok(Self::new(session_id, prefix, method, args))
    }

    pub fn path(&self) -> String {
        format!("/{}.{}", self.prefix, self.method)
    }
}

/// Runs inbound calls against registered endpoints.
pub struct Dispatcher {
    bridge: SessionBridge,
    services: Services,
    config: DispatcherConfig,
}

/// Builder for [`Dispatcher`].
pub struct DispatcherBuilder {
    registry: EndpointRegistry,
    store: Arc<dyn SessionStore>,
    config: DispatcherConfig,
    services: Services,
}

impl DispatcherBuilder {
    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn log(mut self, log: LogConfig) -> Self {
        self.config.log = log;
        self
    }

    pub fn policy(mut self, policy: ConcurrencyPolicy) -> Self {
        self.config.policy = policy;
        self
    }

    /// Share `service` with every call, retrievable through
    /// [`CallContext::service`].
    pub fn service<T: Send + Sync + 'static>(mut self, service: Arc<T>) -> Self {
        self.services.insert(service);
        self
    }

    /// Freeze the registry and bind the routes.
    ///
    /// Fails if the store cannot enumerate its sessions, since broadcast
    /// depends on it.
    pub fn build(self) -> Result<Dispatcher> {
        if !self.store.can_enumerate() {
            return Err(RpcError::Config {
                message: "A session store with enumeration support is required".to_string(),
            });
        }

        if self.config.log.create {
            for handler in self.registry.handlers() {
                for method in handler.interface_methods() {
                    info!(
                        "/{}.{} bound to {}.{} ({})",
                        handler.prefix(),
                        method,
                        handler.type_name(),
                        method,
                        handler.interface_name()
                    );
                }
            }
            for interface in self.registry.interfaces() {
                info!("/{} handshake bound for {}", interface.prefix, interface.name);
            }
        }

        let bridge = SessionBridge::new(Arc::new(self.registry), self.store, self.config);
        Ok(Dispatcher {
            bridge,
            services: self.services,
            config: self.config,
        })
    }
}

impl Dispatcher {
    pub fn builder(registry: EndpointRegistry, store: Arc<dyn SessionStore>) -> DispatcherBuilder {
        DispatcherBuilder {
            registry,
            store,
            config: DispatcherConfig::default(),
            services: Services::default(),
        }
    }

    pub fn bridge(&self) -> &SessionBridge {
        &self.bridge
    }

    pub fn registry(&self) -> &EndpointRegistry {
        self.bridge.registry()
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        self.bridge.store()
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Every `prefix.method` this dispatcher answers.
    pub fn routes(&self) -> Vec<Route> {
        self.registry().routes()
    }

    /// Run one call and return the serialized response envelope.
    pub async fn dispatch(&self, call: &InboundCall) -> Result<WireBlob> {
        let Some(handler) = self.registry().handler(&call.prefix) else {
            return self.fail(
                call,
                RpcError::UnknownEndpoint {
                    name: call.prefix.clone(),
                },
                None,
            );
        };

        self.bridge
            .serialized(&call.session_id, async {
                let record = self.store().get(&call.session_id).await.map_err(|e| {
                    error!("{} session lookup failed: {}", call.path(), e);
                    e
                })?;
                handler.handle(self, call, record).await
            })
            .await
    }

    pub(crate) async fn run<E: Endpoint>(
        &self,
        definition: &EndpointDefinition<E>,
        call: &InboundCall,
        record: Option<SessionRecord>,
    ) -> Result<WireBlob> {
        let log = self.config.log;
        if log.calls {
            if log.data {
                info!(session_id = %call.session_id, "{} reached with {}", call.path(), call.args);
            } else {
                info!(session_id = %call.session_id, "{} reached", call.path());
            }
        }

        let Some(mut record) = record else {
            let missing = RpcError::SessionMissing {
                session_id: call.session_id.clone(),
            };
            return self.fail(call, missing, None);
        };

        let mut instance: E = match lifecycle::rehydrate(
            &definition.prefix,
            &call.session_id,
            Some(&mut record),
            &definition.types,
        ) {
            Ok(instance) => instance,
            Err(e) => return self.fail(call, e, None),
        };

        let args = match Args::from_blob(&call.args, definition.types.clone()) {
            Ok(args) => args,
            Err(e) => return self.fail(call, e, None),
        };

        let method = call.method.as_str();
        if !definition.interface_methods.contains(&method) || !E::implements(method) {
            let missing = RpcError::MethodNotImplemented {
                prefix: definition.prefix.clone(),
                method: call.method.clone(),
            };
            error!(session_id = %call.session_id, "{}", missing);
            return self.fail(call, missing, None);
        }

        if let Some(authorizer) = &definition.authorizer {
            if !authorizer.authorize(&instance, method, &args).await {
                let denied = RpcError::Unauthorized {
                    method: call.method.clone(),
                };
                return self.fail(call, denied, None);
            }
        }

        let mut ctx = CallContext::new(
            call.session_id.clone(),
            definition.prefix.clone(),
            definition.types.clone(),
            self.bridge.clone(),
            self.services.clone(),
        );
        let outcome = instance.invoke(method, &args, &mut ctx).await;
        let push_payload = ctx.take_push_payload();

        let response = match outcome {
            Ok(response) => response,
            Err(e) => return self.fail(call, e, push_payload),
        };

        let persisted = lifecycle::persist(
            &instance,
            &definition.prefix,
            &call.session_id,
            &mut record,
            &definition.types,
            self.store().as_ref(),
        )
        .await;
        match persisted {
            Ok(()) => {}
            Err(e) if e.is_store_fault() => {
                error!("{} failed to persist session state: {}", call.path(), e);
                return Err(e);
            }
            Err(e) => return self.fail(call, e, push_payload),
        }

        ResponseEnvelope::success(response, push_payload).to_blob()
    }

    fn fail(
        &self,
        call: &InboundCall,
        error: RpcError,
        push_payload: Option<serde_json::Value>,
    ) -> Result<WireBlob> {
        if self.config.log.exceptions {
            warn!(
                session_id = %call.session_id,
                code = error.to_rpc_error_code(),
                "{} responded with exception: {}",
                call.path(),
                error
            );
        }
        ResponseEnvelope::failure(error.to_string(), push_payload).to_blob()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Authorizer;
    use crate::envelope::CallEnvelope;
    use crate::session::MemorySessionStore;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use serde_json::{json, Value};

    crate::remote_interface! {
        pub struct CounterApi {
            fn increment(by: u32) -> u32;
            fn fail_after_increment() -> u32;
            fn decrement() -> u32;
        }
    }

    #[derive(Default, Serialize, Deserialize)]
    struct Counter {
        count: u32,
    }

    #[async_trait]
    impl Endpoint for Counter {
        const METHODS: &'static [&'static str] = &["increment", "fail_after_increment"];

        async fn invoke(&mut self, method: &str, args: &Args, ctx: &mut CallContext) -> Result<Value> {
            match method {
                "increment" => {
                    self.count += args.get::<u32>(0)?;
                    ctx.send_to_client(&format!("now {}", self.count))?;
                    Ok(json!(self.count))
                }
                "fail_after_increment" => {
                    self.count += 100;
                    ctx.send_to_client(&"partial")?;
                    Err(RpcError::handler("counter exploded"))
                }
                _ => unreachable!(),
            }
        }
    }

    /// A store that cannot enumerate.
    struct OpaqueStore(MemorySessionStore);

    #[async_trait]
    impl SessionStore for OpaqueStore {
        async fn get(&self, id: &str) -> Result<Option<SessionRecord>> {
            self.0.get(id).await
        }

        async fn set(&self, id: &str, record: SessionRecord) -> Result<()> {
            self.0.set(id, record).await
        }

        async fn destroy(&self, id: &str) -> Result<bool> {
            self.0.destroy(id).await
        }
    }

    fn dispatcher(authorizer: Option<Arc<dyn Authorizer<Counter>>>) -> Dispatcher {
        let mut registry = EndpointRegistry::new();
        registry
            .register::<Counter, CounterApi>("counter", None, authorizer)
            .unwrap();
        Dispatcher::builder(registry, Arc::new(MemorySessionStore::new()))
            .log(LogConfig::quiet())
            .build()
            .unwrap()
    }

    fn call(session: &str, method: &str, args: Vec<Value>) -> InboundCall {
        InboundCall::new(
            session,
            "counter",
            method,
            CallEnvelope::new(args).to_blob().unwrap(),
        )
    }

    async fn stored_count(dispatcher: &Dispatcher, session: &str) -> u32 {
        dispatcher
            .bridge()
            .endpoint::<Counter>(session)
            .await
            .unwrap()
            .count
    }

    #[tokio::test]
    async fn test_success_persists_state() {
        let dispatcher = dispatcher(None);
        let session = dispatcher.bridge().create_session().await.unwrap();

        dispatcher.dispatch(&call(&session, "increment", vec![json!(2)])).await.unwrap();
        let reply = dispatcher
            .dispatch(&call(&session, "increment", vec![json!(3)]))
            .await
            .unwrap();

        let envelope = ResponseEnvelope::from_blob(&reply).unwrap();
        assert_eq!(envelope.push_payload(), Some(&json!("now 5")));
        assert_eq!(envelope.into_parts().unwrap().0, json!(5));
        assert_eq!(stored_count(&dispatcher, &session).await, 5);
    }

    #[tokio::test]
    async fn test_handler_failure_keeps_state_and_push_payload() {
        let dispatcher = dispatcher(None);
        let session = dispatcher.bridge().create_session().await.unwrap();
        dispatcher.dispatch(&call(&session, "increment", vec![json!(1)])).await.unwrap();

        let reply = dispatcher
            .dispatch(&call(&session, "fail_after_increment", vec![]))
            .await
            .unwrap();
        let envelope = ResponseEnvelope::from_blob(&reply).unwrap();
        assert_eq!(envelope.exception(), Some("counter exploded"));
        assert_eq!(envelope.push_payload(), Some(&json!("partial")));
        assert_eq!(stored_count(&dispatcher, &session).await, 1);
    }

    #[tokio::test]
    async fn test_unimplemented_interface_method() {
        let dispatcher = dispatcher(None);
        let session = dispatcher.bridge().create_session().await.unwrap();
        let reply = dispatcher
            .dispatch(&call(&session, "decrement", vec![]))
            .await
            .unwrap();
        assert_eq!(
            ResponseEnvelope::from_blob(&reply).unwrap().exception(),
            Some("implementation of decrement not defined in /counter.decrement")
        );
    }

    /// Log sink shared with a test subscriber.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_unimplemented_method_logged_at_error_even_when_quiet() {
        let logs = CapturedLogs::default();
        let sink = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || sink.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();
        let _default = tracing::subscriber::set_default(subscriber);

        let dispatcher = dispatcher(None);
        let session = dispatcher.bridge().create_session().await.unwrap();
        dispatcher.dispatch(&call(&session, "decrement", vec![])).await.unwrap();

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        let line = output
            .lines()
            .find(|line| line.contains("implementation of decrement not defined"))
            .expect("missing method not logged");
        assert!(line.contains("ERROR"));
    }

    #[tokio::test]
    async fn test_unimplemented_method_leaves_state_untouched() {
        let dispatcher = dispatcher(None);
        let session = dispatcher.bridge().create_session().await.unwrap();
        dispatcher.dispatch(&call(&session, "increment", vec![json!(4)])).await.unwrap();
        let before = dispatcher.store().get(&session).await.unwrap();

        dispatcher.dispatch(&call(&session, "decrement", vec![])).await.unwrap();

        assert_eq!(dispatcher.store().get(&session).await.unwrap(), before);
        assert_eq!(stored_count(&dispatcher, &session).await, 4);
    }

    #[tokio::test]
    async fn test_missing_session_and_unknown_prefix() {
        let dispatcher = dispatcher(None);
        let reply = dispatcher
            .dispatch(&call("ghost", "increment", vec![json!(1)]))
            .await
            .unwrap();
        assert!(ResponseEnvelope::from_blob(&reply)
            .unwrap()
            .exception()
            .unwrap()
            .contains("ghost"));

        let stray = InboundCall::new("ghost", "nowhere", "x", WireBlob::new("{}"));
        let reply = dispatcher.dispatch(&stray).await.unwrap();
        assert!(!ResponseEnvelope::from_blob(&reply).unwrap().is_success());
    }

    #[tokio::test]
    async fn test_authorizer_sees_state_and_args() {
        let limit: Arc<dyn Authorizer<Counter>> =
            Arc::new(|counter: &Counter, _method: &str, args: &Args| {
                counter.count + args.get::<u32>(0).unwrap_or(0) <= 10
            });
        let dispatcher = dispatcher(Some(limit));
        let session = dispatcher.bridge().create_session().await.unwrap();

        dispatcher.dispatch(&call(&session, "increment", vec![json!(8)])).await.unwrap();
        let reply = dispatcher
            .dispatch(&call(&session, "increment", vec![json!(5)]))
            .await
            .unwrap();

        let envelope = ResponseEnvelope::from_blob(&reply).unwrap();
        assert_eq!(envelope.exception(), Some("Unauthorized"));
        assert!(envelope.push_payload().is_none());
        assert_eq!(stored_count(&dispatcher, &session).await, 8);
    }

    #[tokio::test]
    async fn test_unauthorized_first_call_writes_nothing() {
        let deny: Arc<dyn Authorizer<Counter>> =
            Arc::new(|_: &Counter, _: &str, _: &Args| false);
        let dispatcher = dispatcher(Some(deny));
        let session = dispatcher.bridge().create_session().await.unwrap();

        let reply = dispatcher
            .dispatch(&call(&session, "increment", vec![json!(1)]))
            .await
            .unwrap();
        assert_eq!(
            ResponseEnvelope::from_blob(&reply).unwrap().exception(),
            Some("Unauthorized")
        );
        let record = dispatcher.store().get(&session).await.unwrap().unwrap();
        assert!(record.endpoints.is_empty());
    }

    #[tokio::test]
    async fn test_bad_arguments_are_failure_envelopes() {
        let dispatcher = dispatcher(None);
        let session = dispatcher.bridge().create_session().await.unwrap();
        let reply = dispatcher
            .dispatch(&call(&session, "increment", vec![json!("many")]))
            .await
            .unwrap();
        assert!(!ResponseEnvelope::from_blob(&reply).unwrap().is_success());
    }

    #[tokio::test]
    async fn test_serialized_policy_keeps_every_increment() {
        let dispatcher = Arc::new(dispatcher(None));
        let session = dispatcher.bridge().create_session().await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let (dispatcher, session) = (dispatcher.clone(), session.clone());
            tasks.push(tokio::spawn(async move {
                dispatcher
                    .dispatch(&call(&session, "increment", vec![json!(1)]))
                    .await
                    .unwrap()
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(stored_count(&dispatcher, &session).await, 20);
    }

    #[test]
    fn test_store_without_enumeration_is_rejected() {
        let err = Dispatcher::builder(
            EndpointRegistry::new(),
            Arc::new(OpaqueStore(MemorySessionStore::new())),
        )
        .build()
        .err()
        .unwrap();
        assert!(matches!(err, RpcError::Config { .. }));
    }

    #[test]
    fn test_call_from_tag() {
        let call = InboundCall::from_tag("s1", "users.login", WireBlob::new("{}")).unwrap();
        assert_eq!(call.prefix, "users");
        assert_eq!(call.method, "login");
        assert_eq!(call.path(), "/users.login");
        assert!(InboundCall::from_tag("s1", "nodot", WireBlob::new("{}")).is_err());
    }

    #[test]
    fn test_routes_exposed() {
        let dispatcher = dispatcher(None);
        let tags: Vec<String> = dispatcher.routes().iter().map(Route::tag).collect();
        assert_eq!(
            tags,
            vec!["counter.increment", "counter.fail_after_increment", "counter.decrement"]
        );
    }

    crate::remote_interface! {
        pub struct TallyApi {
            fn bump() -> u32;
        }
    }

    crate::remote_interface! {
        pub struct RelayApi {
            fn relay() -> u32;
        }
    }

    #[derive(Default, Serialize, Deserialize)]
    struct Tally {
        bumps: u32,
    }

    #[async_trait]
    impl Endpoint for Tally {
        const METHODS: &'static [&'static str] = &["bump"];

        async fn invoke(&mut self, _: &str, _: &Args, ctx: &mut CallContext) -> Result<Value> {
            self.bumps += 1;
            ctx.encode(&self.bumps)
        }
    }

    /// Gives handlers a way back into their own dispatcher.
    #[derive(Default)]
    struct Loopback(std::sync::OnceLock<Arc<Dispatcher>>);

    #[derive(Default, Serialize, Deserialize)]
    struct Relay {
        relayed: u32,
    }

    #[async_trait]
    impl Endpoint for Relay {
        const METHODS: &'static [&'static str] = &["relay"];

        async fn invoke(&mut self, _: &str, _: &Args, ctx: &mut CallContext) -> Result<Value> {
            let loopback = ctx.service::<Loopback>()?;
            let dispatcher = loopback
                .0
                .get()
                .cloned()
                .ok_or_else(|| RpcError::handler("dispatcher not wired"))?;
            let tally: TallyApi = LocalChannel::proxy(dispatcher, "tally", ctx.session_id())?;
            let bumps = tally.bump().await?;
            self.relayed += 1;
            ctx.encode(&bumps)
        }
    }

    fn relay_dispatcher(policy: ConcurrencyPolicy) -> Arc<Dispatcher> {
        let mut registry = EndpointRegistry::new();
        registry.register::<Tally, TallyApi>("tally", None, None).unwrap();
        registry.register::<Relay, RelayApi>("relay", None, None).unwrap();
        let loopback = Arc::new(Loopback::default());
        let dispatcher = Arc::new(
            Dispatcher::builder(registry, Arc::new(MemorySessionStore::new()))
                .log(LogConfig::quiet())
                .policy(policy)
                .service(loopback.clone())
                .build()
                .unwrap(),
        );
        let _ = loopback.0.set(dispatcher.clone());
        dispatcher
    }

    #[tokio::test]
    async fn test_nested_call_into_same_session_completes() {
        for policy in [ConcurrencyPolicy::SerializedPerSession, ConcurrencyPolicy::LastWriteWins] {
            let dispatcher = relay_dispatcher(policy);
            let session = dispatcher.bridge().create_session().await.unwrap();
            let relay: RelayApi =
                LocalChannel::proxy(dispatcher.clone(), "relay", &session).unwrap();

            let first = tokio::time::timeout(std::time::Duration::from_secs(3), relay.relay())
                .await
                .expect("nested call on the same session did not finish");
            assert_eq!(first.unwrap(), 1);
            assert_eq!(relay.relay().await.unwrap(), 2);

            let tally: Tally = dispatcher.bridge().endpoint(&session).await.unwrap();
            let relayed: Relay = dispatcher.bridge().endpoint(&session).await.unwrap();
            assert_eq!((tally.bumps, relayed.relayed), (2, 2));
        }
    }

    #[tokio::test]
    async fn test_nested_call_still_waits_for_other_tasks() {
        let dispatcher = relay_dispatcher(ConcurrencyPolicy::SerializedPerSession);
        let session = dispatcher.bridge().create_session().await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let (dispatcher, session) = (dispatcher.clone(), session.clone());
            tasks.push(tokio::spawn(async move {
                let relay: RelayApi = LocalChannel::proxy(dispatcher, "relay", &session).unwrap();
                relay.relay().await.unwrap()
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let tally: Tally = dispatcher.bridge().endpoint(&session).await.unwrap();
        let relayed: Relay = dispatcher.bridge().endpoint(&session).await.unwrap();
        assert_eq!((tally.bumps, relayed.relayed), (10, 10));
    }
}

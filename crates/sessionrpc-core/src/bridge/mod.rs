//! Session ↔ connection bridge.
//!
//! Sessions outlive connections: a session record remembers the id of its
//! latest push connection, and the [`ConnectionRegistry`] maps live ids to
//! channels. Resolving a session's client therefore takes two hops, and
//! either may come up empty.

mod connections;
mod enumeration;
mod locks;

pub use connections::{ConnectionRegistry, PushConnection, PushFrame};
pub use enumeration::{SessionEnumeration, SessionHandle};

use crate::config::{ConcurrencyPolicy, DispatcherConfig, LogConfig};
use crate::endpoint::{Endpoint, EndpointRegistry, RemoteInterface};
use crate::error::{Result, RpcError};
use crate::lifecycle;
use crate::proxy::{PushChannel, RemoteProxy};
use crate::session::SessionStore;
use locks::{SessionGuard, SessionLocks};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

struct BridgeInner {
    registry: Arc<EndpointRegistry>,
    store: Arc<dyn SessionStore>,
    connections: ConnectionRegistry,
    locks: SessionLocks,
    config: DispatcherConfig,
}

/// Shared handle to sessions, live connections and the endpoint registry.
///
/// Cheap to clone. Handlers reach it through
/// [`CallContext::bridge`](crate::CallContext::bridge).
#[derive(Clone)]
pub struct SessionBridge {
    inner: Arc<BridgeInner>,
}

impl SessionBridge {
    pub(crate) fn new(
        registry: Arc<EndpointRegistry>,
        store: Arc<dyn SessionStore>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                registry,
                store,
                connections: ConnectionRegistry::new(),
                locks: SessionLocks::default(),
                config,
            }),
        }
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.inner.registry
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.inner.store
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.inner.connections
    }

    pub(crate) fn log(&self) -> LogConfig {
        self.inner.config.log
    }

    /// Serialize work on `session_id` when the policy asks for it. Returns
    /// `None` under `LastWriteWins` or when this task already holds the lock.
    pub(crate) async fn lock_session(&self, session_id: &str) -> Option<SessionGuard<'_>> {
        match self.inner.config.policy {
            ConcurrencyPolicy::SerializedPerSession if !locks::held_by_current_task(session_id) => {
                Some(self.inner.locks.acquire(session_id).await)
            }
            _ => None,
        }
    }

    /// Run `work` under `session_id`'s lock. Nested calls for the same
    /// session from inside `work` reuse the lock rather than wait for it.
    pub(crate) async fn serialized<F: Future>(&self, session_id: &str, work: F) -> F::Output {
        match self.lock_session(session_id).await {
            Some(_guard) => locks::holding(session_id, work).await,
            None => work.await,
        }
    }

    /// Create an empty session in the store.
    pub async fn create_session(&self) -> Result<String> {
        let session_id = self.inner.store.create().await?;
        if self.inner.config.log.connect {
            debug!(session_id = %session_id, "Session created");
        }
        Ok(session_id)
    }

    /// Attach a push connection to `session_id`. The newest connection wins;
    /// an older one stays registered until its transport closes but is no
    /// longer reachable through the session.
    pub async fn connect(&self, session_id: &str, channel: Arc<dyn PushChannel>) -> Result<()> {
        let _guard = self.lock_session(session_id).await;
        let mut record = self
            .inner
            .store
            .get(session_id)
            .await?
            .ok_or_else(|| RpcError::SessionMissing {
                session_id: session_id.to_string(),
            })?;

        let connection_id = channel.id().to_string();
        record.connection_id = Some(connection_id.clone());
        self.inner.store.set(session_id, record).await?;
        self.inner.connections.add(session_id, channel).await;

        if self.inner.config.log.connect {
            info!(session_id, conn_id = %connection_id, "Push connection established");
        }
        Ok(())
    }

    /// Drop a push connection. The session forgets it only if it is still the
    /// session's current connection.
    pub async fn disconnect(&self, connection_id: &str) -> Result<()> {
        let Some(session_id) = self.inner.connections.remove(connection_id).await else {
            return Ok(());
        };
        let _guard = self.lock_session(&session_id).await;
        if let Some(mut record) = self.inner.store.get(&session_id).await? {
            if record.connection_id.as_deref() == Some(connection_id) {
                record.connection_id = None;
                self.inner.store.set(&session_id, record).await?;
            }
        }

        if self.inner.config.log.connect {
            info!(session_id = %session_id, conn_id = connection_id, "Push connection closed");
        }
        Ok(())
    }

    /// Live push channel of `session_id`, if it has one.
    pub async fn resolve(&self, session_id: &str) -> Result<Option<Arc<dyn PushChannel>>> {
        let record = self
            .inner
            .store
            .get(session_id)
            .await?
            .ok_or_else(|| RpcError::SessionMissing {
                session_id: session_id.to_string(),
            })?;
        match record.connection_id {
            Some(connection_id) => Ok(self.inner.connections.get(&connection_id).await),
            None => Ok(None),
        }
    }

    /// Proxy for callable interface `I` on the client of `session_id`.
    pub async fn peer<I: RemoteInterface>(&self, session_id: &str) -> Result<I> {
        let definition = self.inner.registry.interface::<I>()?;
        let channel =
            self.resolve(session_id)
                .await?
                .ok_or_else(|| RpcError::ConnectionMissing {
                    session_id: Some(session_id.to_string()),
                })?;
        let proxy = RemoteProxy::push(&definition.prefix, definition.types.clone(), channel)
            .with_session(session_id)
            .with_log(self.inner.config.log);
        Ok(I::from_proxy(proxy))
    }

    /// `session_id`'s instance of endpoint `E`, read-only: changes made to
    /// it are not saved.
    pub async fn endpoint<E: Endpoint>(&self, session_id: &str) -> Result<E> {
        let (prefix, types) = self.inner.registry.endpoint_binding::<E>()?;
        let mut record = self.inner.store.get(session_id).await?;
        lifecycle::rehydrate(prefix, session_id, record.as_mut(), types)
    }

    /// Snapshot every session in the store together with the live
    /// connections at this moment.
    pub async fn enumerate_sessions(&self) -> Result<SessionEnumeration> {
        let sessions = self.inner.store.all().await?;
        let live = self.inner.connections.snapshot().await;
        Ok(SessionEnumeration::new(sessions, live, self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::CallContext;
    use crate::envelope::Args;
    use crate::session::MemorySessionStore;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use serde_json::{json, Value};

    crate::remote_interface! {
        pub struct Browser {
            fn send_message(message: String);
        }
    }

    crate::remote_interface! {
        pub struct ProfileApi {
            fn whoami() -> Option<String>;
        }
    }

    #[derive(Default, Serialize, Deserialize)]
    struct Profile {
        name: Option<String>,
    }

    #[async_trait]
    impl Endpoint for Profile {
        const METHODS: &'static [&'static str] = &["whoami"];

        async fn invoke(&mut self, _: &str, _: &Args, _: &mut CallContext) -> Result<Value> {
            Ok(json!(self.name))
        }
    }

    fn bridge() -> SessionBridge {
        let mut registry = EndpointRegistry::new();
        registry
            .register::<Profile, ProfileApi>("profile", None, None)
            .unwrap();
        registry
            .register_callable_interface::<Browser>("browser", None)
            .unwrap();
        SessionBridge::new(
            Arc::new(registry),
            Arc::new(MemorySessionStore::new()),
            DispatcherConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_connect_then_peer_pushes() {
        let bridge = bridge();
        let session = bridge.create_session().await.unwrap();
        let (conn, mut rx) = PushConnection::with_id("c1", session.clone(), 8);
        bridge.connect(&session, conn).await.unwrap();

        let browser: Browser = bridge.peer(&session).await.unwrap();
        browser.send_message("Hello".into()).await.unwrap();

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.tag, "browser.send_message");
        assert_eq!(frame.payload.as_str(), r#"{"args":["Hello"]}"#);
    }

    #[tokio::test]
    async fn test_peer_without_connection() {
        let bridge = bridge();
        let session = bridge.create_session().await.unwrap();
        let err = bridge.peer::<Browser>(&session).await.unwrap_err();
        assert!(matches!(err, RpcError::ConnectionMissing { .. }));

        let err = bridge.peer::<Browser>("nope").await.unwrap_err();
        assert!(matches!(err, RpcError::SessionMissing { .. }));
    }

    /// Memory store whose writes can be switched off.
    struct ReadOnlyAfterSetup {
        inner: MemorySessionStore,
        read_only: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl SessionStore for ReadOnlyAfterSetup {
        async fn get(&self, id: &str) -> Result<Option<crate::SessionRecord>> {
            self.inner.get(id).await
        }

        async fn set(&self, id: &str, record: crate::SessionRecord) -> Result<()> {
            if self.read_only.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(RpcError::Store {
                    message: "read only".to_string(),
                });
            }
            self.inner.set(id, record).await
        }

        async fn destroy(&self, id: &str) -> Result<bool> {
            self.inner.destroy(id).await
        }
    }

    #[tokio::test]
    async fn test_failed_connect_leaves_no_live_connection() {
        let store = Arc::new(ReadOnlyAfterSetup {
            inner: MemorySessionStore::new(),
            read_only: std::sync::atomic::AtomicBool::new(false),
        });
        let bridge = SessionBridge::new(
            Arc::new(EndpointRegistry::new()),
            store.clone(),
            DispatcherConfig::default(),
        );
        let session = bridge.create_session().await.unwrap();
        store
            .read_only
            .store(true, std::sync::atomic::Ordering::SeqCst);

        let (conn, _rx) = PushConnection::with_id("c1", session.clone(), 8);
        assert!(bridge.connect(&session, conn).await.is_err());
        assert_eq!(bridge.connections().connection_count().await, 0);
        assert!(bridge.connections().get("c1").await.is_none());
    }

    #[tokio::test]
    async fn test_disconnect_only_clears_current_connection() {
        let bridge = bridge();
        let session = bridge.create_session().await.unwrap();
        let (old, _rx_old) = PushConnection::with_id("old", session.clone(), 8);
        let (new, _rx_new) = PushConnection::with_id("new", session.clone(), 8);
        bridge.connect(&session, old).await.unwrap();
        bridge.connect(&session, new).await.unwrap();

        bridge.disconnect("old").await.unwrap();
        let record = bridge.store().get(&session).await.unwrap().unwrap();
        assert_eq!(record.connection_id.as_deref(), Some("new"));

        bridge.disconnect("new").await.unwrap();
        let record = bridge.store().get(&session).await.unwrap().unwrap();
        assert!(record.connection_id.is_none());
        assert!(bridge.resolve(&session).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_endpoint_accessor_seeds_default() {
        let bridge = bridge();
        let session = bridge.create_session().await.unwrap();
        let profile: Profile = bridge.endpoint(&session).await.unwrap();
        assert!(profile.name.is_none());
    }

    #[tokio::test]
    async fn test_enumeration_binds_live_connections_only() {
        let bridge = bridge();
        let online = bridge.create_session().await.unwrap();
        let offline = bridge.create_session().await.unwrap();
        let (conn, mut rx) = PushConnection::with_id("c1", online.clone(), 8);
        bridge.connect(&online, conn).await.unwrap();

        let sessions = bridge.enumerate_sessions().await.unwrap();
        assert_eq!(sessions.len(), 2);

        let mut delivered = 0;
        let mut failed = 0;
        for handle in sessions {
            let _profile: Profile = handle.endpoint().unwrap();
            let browser: Browser = handle.peer().unwrap();
            match browser.send_message("hello out there".into()).await {
                Ok(()) => {
                    assert_eq!(handle.session_id(), online);
                    delivered += 1;
                }
                Err(RpcError::ConnectionMissing { session_id }) => {
                    assert_eq!(session_id.as_deref(), Some(offline.as_str()));
                    failed += 1;
                }
                Err(other) => panic!("unexpected error: {}", other),
            }
        }
        assert_eq!((delivered, failed), (1, 1));
        assert_eq!(rx.recv().await.unwrap().tag, "browser.send_message");
    }
}

//! Session store trait and configuration.

use super::record::SessionRecord;
use crate::config::SessionConfig;
use crate::error::{Result, RpcError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Configuration shared by the bundled stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SessionStoreConfig {
    /// How long a session survives without being written.
    pub max_age: Duration,
    /// Maximum number of sessions held by the in-memory store.
    pub capacity: u64,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            max_age: SessionConfig::DEFAULT_MAX_AGE,
            capacity: SessionConfig::MEMORY_STORE_CAPACITY,
        }
    }
}

impl SessionStoreConfig {
    /// `max_age`, capped at [`SessionConfig::MAX_AGE_LIMIT`].
    pub fn effective_max_age(&self) -> Duration {
        self.max_age.min(SessionConfig::MAX_AGE_LIMIT)
    }
}

/// Async keyed store of session records.
///
/// The store is the only shared mutable state in the bridge. Callers always go
/// through `get`/`set`/`all`; nothing holds a reference into it.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Fetch a session. Expired or unknown ids yield `None`.
    async fn get(&self, id: &str) -> Result<Option<SessionRecord>>;

    /// Write a session, returning once the write is durable for this store.
    async fn set(&self, id: &str, record: SessionRecord) -> Result<()>;

    /// Remove a session. Returns whether it existed.
    async fn destroy(&self, id: &str) -> Result<bool>;

    /// Whether [`all`](Self::all) is supported. Broadcast needs it, so the
    /// dispatcher refuses to start on a store that returns `false`.
    fn can_enumerate(&self) -> bool {
        false
    }

    /// Snapshot of every live session.
    async fn all(&self) -> Result<HashMap<String, SessionRecord>> {
        Err(RpcError::Config {
            message: "A session store with enumeration support is required".to_string(),
        })
    }

    /// Create an empty session and return its id.
    async fn create(&self) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.set(&id, SessionRecord::new()).await?;
        Ok(id)
    }
}

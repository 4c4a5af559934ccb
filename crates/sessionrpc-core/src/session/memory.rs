//! In-process session store with idle expiry.

use super::record::SessionRecord;
use super::store::{SessionStore, SessionStoreConfig};
use crate::error::Result;
use async_trait::async_trait;
use mini_moka::sync::Cache;
use std::collections::HashMap;

/// Session store backed by a TTL cache.
///
/// Sessions expire after `max_age` without access. Contents are lost on
/// restart; use [`super::SqliteSessionStore`] for durability.
#[derive(Clone)]
pub struct MemorySessionStore {
    sessions: Cache<String, SessionRecord>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::with_config(SessionStoreConfig::default())
    }

    pub fn with_config(config: SessionStoreConfig) -> Self {
        Self {
            sessions: Cache::builder()
                .max_capacity(config.capacity)
                .time_to_idle(config.effective_max_age())
                .build(),
        }
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, id: &str) -> Result<Option<SessionRecord>> {
        Ok(self.sessions.get(&id.to_string()))
    }

    async fn set(&self, id: &str, record: SessionRecord) -> Result<()> {
        self.sessions.insert(id.to_string(), record);
        Ok(())
    }

    async fn destroy(&self, id: &str) -> Result<bool> {
        let key = id.to_string();
        let existed = self.sessions.contains_key(&key);
        self.sessions.invalidate(&key);
        Ok(existed)
    }

    fn can_enumerate(&self) -> bool {
        true
    }

    async fn all(&self) -> Result<HashMap<String, SessionRecord>> {
        Ok(self
            .sessions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }
}

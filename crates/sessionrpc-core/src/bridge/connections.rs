//! Live push connections.

use crate::codec::WireBlob;
use crate::error::{Result, RpcError};
use crate::proxy::PushChannel;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, RwLock};
use tracing::warn;

/// One message pushed to a client: `{"tag": "prefix.method", "payload": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushFrame {
    pub tag: String,
    pub payload: WireBlob,
}

/// A queue-backed [`PushChannel`].
///
/// Frames go into a bounded mpsc channel drained by the transport's writer
/// task. A full or closed queue fails the send.
pub struct PushConnection {
    id: String,
    session_id: String,
    tx: mpsc::Sender<PushFrame>,
    pub connected_at: Instant,
    dropped_frames: AtomicU64,
}

impl PushConnection {
    /// New connection for `session_id` with a fresh id. The receiver yields
    /// every frame sent on the connection.
    pub fn open(
        session_id: impl Into<String>,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<PushFrame>) {
        Self::with_id(uuid::Uuid::new_v4().to_string(), session_id, capacity)
    }

    pub fn with_id(
        id: impl Into<String>,
        session_id: impl Into<String>,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<PushFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let connection = Arc::new(Self {
            id: id.into(),
            session_id: session_id.into(),
            tx,
            connected_at: Instant::now(),
            dropped_frames: AtomicU64::new(0),
        });
        (connection, rx)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Frames rejected because the queue was full or closed.
    pub fn drop_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PushChannel for PushConnection {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(&self, tag: &str, payload: WireBlob) -> Result<()> {
        let frame = PushFrame {
            tag: tag.to_string(),
            payload,
        };
        self.tx.try_send(frame).map_err(|e| {
            let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            match e {
                mpsc::error::TrySendError::Closed(_) => RpcError::ConnectionMissing {
                    session_id: Some(self.session_id.clone()),
                },
                mpsc::error::TrySendError::Full(_) => RpcError::Transport {
                    message: format!("push queue full for connection {}", self.id),
                },
            }
        })
    }
}

struct ConnectionEntry {
    channel: Arc<dyn PushChannel>,
    session_id: String,
}

/// Live connections indexed by connection id.
///
/// A connection appears here between transport handshake and disconnect.
/// The session record only stores the id; this map owns the channel.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, ConnectionEntry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, session_id: &str, channel: Arc<dyn PushChannel>) {
        let mut conns = self.connections.write().await;
        let id = channel.id().to_string();
        if conns.contains_key(&id) {
            warn!(conn_id = %id, "replacing push connection with duplicate id");
        }
        let _ = conns.insert(
            id,
            ConnectionEntry {
                channel,
                session_id: session_id.to_string(),
            },
        );
    }

    /// Remove a connection, returning the session it belonged to.
    pub async fn remove(&self, connection_id: &str) -> Option<String> {
        let mut conns = self.connections.write().await;
        conns.remove(connection_id).map(|entry| entry.session_id)
    }

    pub async fn get(&self, connection_id: &str) -> Option<Arc<dyn PushChannel>> {
        let conns = self.connections.read().await;
        conns.get(connection_id).map(|entry| entry.channel.clone())
    }

    /// Snapshot of every live channel by connection id.
    pub async fn snapshot(&self) -> HashMap<String, Arc<dyn PushChannel>> {
        let conns = self.connections.read().await;
        conns
            .iter()
            .map(|(id, entry)| (id.clone(), entry.channel.clone()))
            .collect()
    }

    /// Connections opened for `session_id`, including superseded ones.
    pub async fn session_connections(&self, session_id: &str) -> Vec<Arc<dyn PushChannel>> {
        let conns = self.connections.read().await;
        conns
            .values()
            .filter(|entry| entry.session_id == session_id)
            .map(|entry| entry.channel.clone())
            .collect()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

//! Walking every live session, for broadcast.

use super::SessionBridge;
use crate::endpoint::{Endpoint, RemoteInterface};
use crate::error::Result;
use crate::lifecycle;
use crate::proxy::{PushChannel, RemoteProxy};
use crate::session::SessionRecord;
use std::collections::{hash_map, HashMap};
use std::sync::Arc;

/// Snapshot of the store's sessions taken by
/// [`SessionBridge::enumerate_sessions`], consumed one session at a time.
pub struct SessionEnumeration {
    sessions: hash_map::IntoIter<String, SessionRecord>,
    live: HashMap<String, Arc<dyn PushChannel>>,
    bridge: SessionBridge,
}

impl SessionEnumeration {
    pub(crate) fn new(
        sessions: HashMap<String, SessionRecord>,
        live: HashMap<String, Arc<dyn PushChannel>>,
        bridge: SessionBridge,
    ) -> Self {
        Self {
            sessions: sessions.into_iter(),
            live,
            bridge,
        }
    }
}

impl Iterator for SessionEnumeration {
    type Item = SessionHandle;

    fn next(&mut self) -> Option<SessionHandle> {
        let (session_id, record) = self.sessions.next()?;
        let connection = record
            .connection_id
            .as_ref()
            .and_then(|id| self.live.get(id))
            .cloned();
        Some(SessionHandle {
            session_id,
            record,
            connection,
            bridge: self.bridge.clone(),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.sessions.size_hint()
    }
}

impl ExactSizeIterator for SessionEnumeration {}

/// One session seen during enumeration.
pub struct SessionHandle {
    session_id: String,
    record: SessionRecord,
    connection: Option<Arc<dyn PushChannel>>,
    bridge: SessionBridge,
}

impl SessionHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Connection id stored in the session, live or not.
    pub fn connection_id(&self) -> Option<&str> {
        self.record.connection_id.as_deref()
    }

    /// Whether the stored connection was live when the snapshot was taken.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn record(&self) -> &SessionRecord {
        &self.record
    }

    /// This session's instance of endpoint `E`, read-only.
    pub fn endpoint<E: Endpoint>(&self) -> Result<E> {
        let (prefix, types) = self.bridge.registry().endpoint_binding::<E>()?;
        let mut record = self.record.clone();
        lifecycle::rehydrate(prefix, &self.session_id, Some(&mut record), types)
    }

    /// Proxy for callable interface `I` on this session's client. Without a
    /// live connection the proxy is unbound and its calls fail.
    pub fn peer<I: RemoteInterface>(&self) -> Result<I> {
        let definition = self.bridge.registry().interface::<I>()?;
        let proxy = match &self.connection {
            Some(channel) => {
                RemoteProxy::push(&definition.prefix, definition.types.clone(), channel.clone())
            }
            None => RemoteProxy::unbound(&definition.prefix, definition.types.clone()),
        };
        Ok(I::from_proxy(
            proxy
                .with_session(&self.session_id)
                .with_log(self.bridge.log()),
        ))
    }
}

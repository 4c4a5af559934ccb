//! Rebuilding endpoint state from a session and writing it back.

use crate::codec::{self, TypeRegistry};
use crate::endpoint::Endpoint;
use crate::error::{Result, RpcError};
use crate::session::{SessionRecord, SessionStore};

/// Build an `E` from the state stored under `prefix` in `session`.
///
/// A session that has never touched `prefix` is seeded in memory with the
/// serialized `E::default()`. Nothing is written to the store here.
pub fn rehydrate<E: Endpoint>(
    prefix: &str,
    session_id: &str,
    session: Option<&mut SessionRecord>,
    types: &TypeRegistry,
) -> Result<E> {
    let session = session.ok_or_else(|| RpcError::SessionMissing {
        session_id: session_id.to_string(),
    })?;
    let blob = session.endpoint_state_or_seed(prefix, || codec::serialize(&E::default(), types))?;
    codec::deserialize(blob, types)
}

/// Serialize `instance` into `session` under `prefix` and save it.
///
/// Only `prefix` is written: the update is applied on top of the freshest
/// stored copy of the session, so concurrent writes to other prefixes or the
/// connection id survive. `session` is replaced with what was saved.
pub async fn persist<E: Endpoint>(
    instance: &E,
    prefix: &str,
    session_id: &str,
    session: &mut SessionRecord,
    types: &TypeRegistry,
    store: &dyn SessionStore,
) -> Result<()> {
    let blob = codec::serialize(instance, types)?;
    let mut latest = match store.get(session_id).await? {
        Some(latest) => latest,
        None => session.clone(),
    };
    latest.set_endpoint_state(prefix, blob);
    store.set(session_id, latest.clone()).await?;
    *session = latest;
    Ok(())
}

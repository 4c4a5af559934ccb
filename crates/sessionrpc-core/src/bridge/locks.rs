//! Per-session mutual exclusion.
//!
//! Locks are not reentrant, so the task holding a session's lock records the
//! session in a task-local list. Nested work on the same task (a handler
//! calling back into its own session in-process) sees the entry and runs
//! under the outer lock instead of waiting on it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

tokio::task_local! {
    static HELD_SESSIONS: Vec<String>;
}

/// Whether the current task already holds `session_id`'s lock.
pub(crate) fn held_by_current_task(session_id: &str) -> bool {
    HELD_SESSIONS
        .try_with(|held| held.iter().any(|id| id == session_id))
        .unwrap_or(false)
}

/// Run `work` with `session_id` marked as held by the current task.
pub(crate) async fn holding<F: Future>(session_id: &str, work: F) -> F::Output {
    let mut held = HELD_SESSIONS.try_with(|held| held.clone()).unwrap_or_default();
    held.push(session_id.to_string());
    HELD_SESSIONS.scope(held, work).await
}

/// One async mutex per session id, created on demand and dropped once nobody
/// holds or waits for it.
#[derive(Default)]
pub(crate) struct SessionLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionLocks {
    pub(crate) async fn acquire(&self, session_id: &str) -> SessionGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            locks.entry(session_id.to_string()).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        SessionGuard {
            locks: self,
            session_id: session_id.to_string(),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

pub(crate) struct SessionGuard<'a> {
    locks: &'a SessionLocks,
    session_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.locks.lock().unwrap_or_else(|p| p.into_inner());
        // Only the map's own handle left: no holder, no waiter.
        if locks
            .get(&self.session_id)
            .map(|lock| Arc::strong_count(lock) == 1)
            .unwrap_or(false)
        {
            locks.remove(&self.session_id);
        }
    }
}

//! Session registry.

use super::handle::{SessionHandle, SessionSummary};
use crate::error::{SessionError, SessionResult};
use crate::id::SessionId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{OwnedMutexGuard, RwLock};

type LockTable = Arc<Mutex<HashMap<SessionId, Arc<tokio::sync::Mutex<()>>>>>;

/// Identifier-keyed table of live session handles.
///
/// At most one non-terminated handle exists per identifier. Mutating
/// lifecycle operations on the same identifier are serialized through
/// [`lock`](Self::lock); different identifiers never contend.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<SessionHandle>>>,
    locks: LockTable,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a handle.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AlreadyExists`] if a non-terminated handle is
    /// already registered under the same identifier.
    pub async fn register(&self, handle: Arc<SessionHandle>) -> SessionResult<()> {
        let mut sessions = self.sessions.write().await;
        if sessions
            .get(handle.id())
            .is_some_and(|existing| !existing.status().is_terminal())
        {
            return Err(SessionError::AlreadyExists(handle.id().to_string()));
        }
        sessions.insert(handle.id().clone(), handle);
        Ok(())
    }

    /// Look up a handle.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] if nothing is registered.
    pub async fn lookup(&self, id: &SessionId) -> SessionResult<Arc<SessionHandle>> {
        self.get(id)
            .await
            .ok_or_else(|| SessionError::not_found(id.as_str()))
    }

    /// Look up a handle, if present.
    pub async fn get(&self, id: &SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Remove a handle. Removing an absent identifier is a no-op.
    pub async fn remove(&self, id: &SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.write().await.remove(id)
    }

    /// All handles, ordered by identifier.
    pub async fn handles(&self) -> Vec<Arc<SessionHandle>> {
        let mut handles: Vec<_> = self.sessions.read().await.values().cloned().collect();
        handles.sort_by(|a, b| a.id().cmp(b.id()));
        handles
    }

    /// Summaries of all sessions, ordered by identifier.
    pub async fn snapshot(&self) -> Vec<SessionSummary> {
        self.handles()
            .await
            .iter()
            .map(|handle| handle.summary())
            .collect()
    }

    /// Number of registered handles.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether no handle is registered.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Acquire the lifecycle lock of `id`.
    ///
    /// The guard is owned and may be moved into a spawned task.
    pub async fn lock(&self, id: &SessionId) -> IdGuard {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(id.clone()).or_default())
        };
        let guard = mutex.lock_owned().await;
        IdGuard {
            id: id.clone(),
            table: Arc::clone(&self.locks),
            guard: Some(guard),
        }
    }
}

/// Exclusive lifecycle access to one identifier.
///
/// Dropping the guard releases the lock and prunes the table entry once no
/// one else is waiting on it.
#[derive(Debug)]
pub struct IdGuard {
    id: SessionId,
    table: LockTable,
    guard: Option<OwnedMutexGuard<()>>,
}

impl IdGuard {
    /// Identifier this guard protects.
    #[must_use]
    pub const fn id(&self) -> &SessionId {
        &self.id
    }
}

impl Drop for IdGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.id)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            locks.remove(&self.id);
        }
    }
}

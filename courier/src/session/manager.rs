//! Session lifecycle manager.
//!
//! The manager owns the registry and drives every session through
//! create, validate, delete and flush. Deletes run in their own task under
//! the per-identifier lock, so a caller that stops waiting (a flush timeout,
//! a dropped HTTP request) never leaves a half-torn-down session behind.

use super::config::ManagerConfig;
use super::handle::{SessionHandle, SessionSummary};
use super::registry::SessionRegistry;
use crate::client::{ClientFactory, ClientRequest, DestroyOptions, InitContext, stored_sessions};
use crate::error::{AdapterError, SessionError, SessionResult};
use crate::events::{ClientEvent, SessionEvent, event_channel};
use crate::id::SessionId;
use crate::poller::{PollOptions, Probe, wait_for_nested, wait_until};
use crate::status::SessionStatus;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Capacity of the session event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Result of [`SessionManager::create`].
#[derive(Debug)]
pub struct CreateOutcome {
    /// Session identifier.
    pub session_id: SessionId,
    /// `false` if a live session already existed and nothing was started.
    pub accepted: bool,
    /// Status at the time the call returned.
    pub status: SessionStatus,
    /// Resolves once the session is ready.
    pub readiness: Readiness,
}

/// Deferred readiness of a session.
///
/// Nothing is polled until [`wait`](Self::wait) is called, and dropping it
/// has no effect on the session.
#[derive(Debug, Clone)]
pub struct Readiness {
    handle: Arc<SessionHandle>,
    options: PollOptions,
}

impl Readiness {
    /// Wait until the session reaches `READY`.
    ///
    /// # Errors
    ///
    /// - [`SessionError::AuthFailure`] if the session became `INVALID`
    /// - [`SessionError::NotFound`] if it was deleted meanwhile
    /// - [`SessionError::Timeout`] if the deadline passed
    ///
    /// A timeout leaves the session registered.
    pub async fn wait(self) -> SessionResult<()> {
        let handle = self.handle;
        wait_until(
            || match handle.status() {
                SessionStatus::Ready => Probe::Ready(()),
                SessionStatus::Invalid => Probe::Failed(SessionError::AuthFailure(
                    handle
                        .last_error()
                        .unwrap_or_else(|| "session invalidated".to_string()),
                )),
                SessionStatus::Terminating | SessionStatus::Terminated => {
                    Probe::Failed(SessionError::not_found(handle.id().as_str()))
                }
                SessionStatus::Pending | SessionStatus::QrRequired => Probe::Pending,
            },
            self.options,
        )
        .await
    }
}

/// Result of [`SessionManager::delete`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    /// Session identifier.
    pub session_id: SessionId,
    /// Whether the external service was signed out of.
    pub logged_out: bool,
}

/// A session a flush could not delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlushFailure {
    /// Session identifier.
    pub id: SessionId,
    /// Why the delete failed.
    pub reason: String,
}

/// Result of [`SessionManager::flush`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Deleted sessions, ordered by identifier.
    pub deleted: Vec<SessionId>,
    /// Sessions whose delete failed, ordered by identifier.
    pub failed: Vec<FlushFailure>,
}

struct Inner {
    registry: SessionRegistry,
    factory: Arc<dyn ClientFactory>,
    config: ManagerConfig,
    events: broadcast::Sender<SessionEvent>,
}

/// Orchestrates the lifecycle of every session.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("registry", &self.inner.registry)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a manager with default configuration.
    pub fn new(factory: impl ClientFactory + 'static) -> Self {
        Self::with_config(factory, ManagerConfig::default())
    }

    /// Create a manager with the given configuration.
    pub fn with_config(factory: impl ClientFactory + 'static, config: ManagerConfig) -> Self {
        Self::from_arc(Arc::new(factory), config)
    }

    /// Create a manager from a shared factory.
    #[must_use]
    pub fn from_arc(factory: Arc<dyn ClientFactory>, config: ManagerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                registry: SessionRegistry::new(),
                factory,
                config,
                events,
            }),
        }
    }

    /// Manager configuration.
    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// The underlying registry.
    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    /// Subscribe to events of all sessions.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Create and start a session.
    ///
    /// If a live session already exists under `id`, nothing is started and
    /// the outcome reports `accepted: false` with the existing status.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidId`] if `id` is not a safe identifier
    /// - [`SessionError::Adapter`] if the client cannot be constructed
    pub async fn create(&self, id: &str) -> SessionResult<CreateOutcome> {
        let id = SessionId::parse(id)?;
        let _guard = self.inner.registry.lock(&id).await;

        if let Some(existing) = self
            .inner
            .registry
            .get(&id)
            .await
            .filter(|handle| !handle.status().is_terminal())
        {
            let status = existing.status();
            info!(session_id = %id, %status, "session already exists");
            return Ok(CreateOutcome {
                session_id: id,
                accepted: false,
                status,
                readiness: self.readiness(existing),
            });
        }

        let auth = self.inner.config.auth_for(&id);
        let client = self
            .inner
            .factory
            .create(&id, &auth)
            .map_err(|e| SessionError::adapter("failed to create client", e))?;
        let handle = Arc::new(SessionHandle::new(id.clone(), Arc::clone(&client)));
        self.inner.registry.register(Arc::clone(&handle)).await?;

        let (events, rx) = event_channel(id.clone());
        self.spawn_event_pump(Arc::clone(&handle), rx);
        // Read before initialization starts; afterwards events may race ahead.
        let status = handle.status();

        let ctx = InitContext {
            session_id: id.clone(),
            auth,
            events,
        };
        let init_handle = Arc::clone(&handle);
        tokio::spawn(async move {
            if let Err(e) = client.initialize(ctx).await {
                error!(session_id = %init_handle.id(), error = %e, "client initialization failed");
                init_handle.invalidate(format!("initialization failed: {e}"));
            }
        });

        info!(session_id = %id, "session created");
        Ok(CreateOutcome {
            session_id: id,
            accepted: true,
            status,
            readiness: self.readiness(handle),
        })
    }

    /// Check that a session can serve requests.
    ///
    /// A `READY` session whose client reports no live connection is demoted
    /// to `INVALID`.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidId`] if `id` is not a safe identifier
    /// - [`SessionError::NotFound`] if no session is registered
    /// - [`SessionError::NotReady`] if the session is not `READY` and connected
    pub async fn validate(&self, id: &str) -> SessionResult<Arc<SessionHandle>> {
        let id = SessionId::parse(id)?;
        let handle = self.inner.registry.lookup(&id).await?;

        match handle.status() {
            SessionStatus::Ready if handle.is_connected() => Ok(handle),
            SessionStatus::Ready => {
                if handle.invalidate("client disconnected") {
                    warn!(session_id = %id, "ready session lost its connection");
                }
                Err(SessionError::NotReady {
                    id: id.into_string(),
                    status: handle.status(),
                })
            }
            status => Err(SessionError::NotReady {
                id: id.into_string(),
                status,
            }),
        }
    }

    /// Delete a session: sign out if possible, destroy the client and
    /// remove the handle.
    ///
    /// With `force_if_invalid`, the client's liveness is checked before
    /// signing out, and sign-out is skipped for a dead connection.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidId`] if `id` is not a safe identifier
    /// - [`SessionError::NotFound`] if no session is registered
    /// - [`SessionError::Adapter`] if destroying the client failed; the
    ///   handle is removed regardless
    pub async fn delete(&self, id: &str, force_if_invalid: bool) -> SessionResult<DeleteOutcome> {
        let id = SessionId::parse(id)?;
        self.delete_id(id, force_if_invalid).await
    }

    async fn delete_id(&self, id: SessionId, force_if_invalid: bool) -> SessionResult<DeleteOutcome> {
        let manager = self.clone();
        tokio::spawn(async move { manager.terminate(id, force_if_invalid).await }).await?
    }

    async fn terminate(&self, id: SessionId, force_if_invalid: bool) -> SessionResult<DeleteOutcome> {
        let _guard = self.inner.registry.lock(&id).await;
        let handle = self.inner.registry.lookup(&id).await?;
        let Some(previous) = handle.begin_termination() else {
            return Err(SessionError::not_found(id.into_string()));
        };
        info!(session_id = %id, status = %previous, "terminating session");

        let config = &self.inner.config;
        let client = handle.take_client();
        let mut logged_out = false;
        let mut destroyed = Ok(());

        if let Some(client) = client {
            let live = !force_if_invalid || client.is_connected();
            if previous.is_ready() && live {
                match timeout(config.logout_timeout, client.logout()).await {
                    Ok(Ok(())) => logged_out = true,
                    Ok(Err(e)) => warn!(session_id = %id, error = %e, "logout failed"),
                    Err(_) => warn!(session_id = %id, timeout = ?config.logout_timeout, "logout timed out"),
                }
            } else {
                debug!(session_id = %id, status = %previous, "skipping logout");
            }

            let options = DestroyOptions {
                purge_credentials: config.purge_credentials_on_delete,
            };
            destroyed = match timeout(config.destroy_timeout, client.destroy(options)).await {
                Ok(result) => result,
                Err(_) => Err(AdapterError::Timeout(config.destroy_timeout)),
            };
        }

        self.inner.registry.remove(&id).await;
        handle.mark_terminated();

        match destroyed {
            Ok(()) => {
                info!(session_id = %id, logged_out, "session terminated");
                Ok(DeleteOutcome {
                    session_id: id,
                    logged_out,
                })
            }
            Err(e) => {
                error!(session_id = %id, error = %e, "failed to destroy client");
                Err(SessionError::adapter("failed to destroy client", e))
            }
        }
    }

    /// Delete many sessions concurrently.
    ///
    /// With `only_inactive`, sessions that are `READY` and connected are
    /// kept. Sessions already being deleted are never selected. Each delete
    /// is bounded by the configured delete timeout; one failure does not
    /// stop the others.
    pub async fn flush(&self, only_inactive: bool) -> FlushReport {
        let candidates: Vec<SessionId> = self
            .inner
            .registry
            .handles()
            .await
            .into_iter()
            .filter(|handle| {
                let status = handle.status();
                status.can_terminate()
                    && !(only_inactive && status.is_ready() && handle.is_connected())
            })
            .map(|handle| handle.id().clone())
            .collect();
        info!(count = candidates.len(), only_inactive, "flushing sessions");

        let delete_timeout = self.inner.config.delete_timeout;
        let results = join_all(candidates.into_iter().map(|id| async move {
            let result = timeout(delete_timeout, self.delete_id(id.clone(), true)).await;
            (id, result)
        }))
        .await;

        let mut report = FlushReport::default();
        for (id, result) in results {
            match result {
                Ok(Ok(_)) => report.deleted.push(id),
                Ok(Err(SessionError::NotFound(_))) => {
                    debug!(session_id = %id, "session already gone");
                }
                Ok(Err(e)) => report.failed.push(FlushFailure {
                    id,
                    reason: e.to_string(),
                }),
                Err(_) => report.failed.push(FlushFailure {
                    id,
                    reason: SessionError::Timeout(delete_timeout).to_string(),
                }),
            }
        }

        if !report.failed.is_empty() {
            warn!(failed = report.failed.len(), "some sessions could not be deleted");
        }
        report
    }

    /// Delete every session. Used on process shutdown.
    pub async fn shutdown(&self) -> FlushReport {
        info!("shutting down session manager");
        self.flush(false).await
    }

    /// Summary of one session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidId`] or [`SessionError::NotFound`].
    pub async fn status(&self, id: &str) -> SessionResult<SessionSummary> {
        let id = SessionId::parse(id)?;
        Ok(self.inner.registry.lookup(&id).await?.summary())
    }

    /// Current QR payload of a session, if one is waiting to be scanned.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidId`] or [`SessionError::NotFound`].
    pub async fn qr(&self, id: &str) -> SessionResult<Option<String>> {
        let id = SessionId::parse(id)?;
        Ok(self.inner.registry.lookup(&id).await?.last_qr())
    }

    /// Summaries of all sessions, ordered by identifier.
    pub async fn list(&self) -> Vec<SessionSummary> {
        self.inner.registry.snapshot().await
    }

    /// Wait until the client's bootstrap state exposes the configured path.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidId`], [`SessionError::NotFound`], or
    /// [`SessionError::Timeout`].
    pub async fn wait_bootstrapped(&self, id: &str) -> SessionResult<serde_json::Value> {
        let id = SessionId::parse(id)?;
        let handle = self.inner.registry.lookup(&id).await?;
        let config = &self.inner.config;
        wait_for_nested(handle.as_ref(), &config.bootstrap_path, config.bootstrap_poll()).await
    }

    /// Forward a capability request to a ready session's client.
    ///
    /// # Errors
    ///
    /// Fails like [`validate`](Self::validate), or with
    /// [`SessionError::Adapter`] if the client rejects the request.
    pub async fn call(&self, id: &str, request: ClientRequest) -> SessionResult<serde_json::Value> {
        let handle = self.validate(id).await?;
        let client = handle
            .client()
            .ok_or_else(|| SessionError::not_found(handle.id().as_str()))?;
        let method = request.method();
        debug!(session_id = %handle.id(), method, "forwarding request");
        client
            .call(request)
            .await
            .map_err(|e| SessionError::adapter(format!("{method} failed"), e))
    }

    /// Recreate sessions whose credentials are stored below the sessions
    /// root.
    ///
    /// Returns the identifiers that were started. A session that fails to
    /// start is logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Adapter`] if the sessions root cannot be read.
    pub async fn recover(&self) -> SessionResult<Vec<SessionId>> {
        let root = &self.inner.config.sessions_root;
        let stored = stored_sessions(root)
            .await
            .map_err(|e| SessionError::adapter("failed to scan sessions root", e.into()))?;
        info!(root = %root.display(), count = stored.len(), "recovering stored sessions");

        let mut started = Vec::with_capacity(stored.len());
        for id in stored {
            match self.create(id.as_str()).await {
                Ok(outcome) if outcome.accepted => started.push(outcome.session_id),
                Ok(_) => debug!(session_id = %id, "session already running"),
                Err(e) => warn!(session_id = %id, error = %e, "failed to recover session"),
            }
        }
        Ok(started)
    }

    fn readiness(&self, handle: Arc<SessionHandle>) -> Readiness {
        Readiness {
            handle,
            options: self.inner.config.ready_poll(),
        }
    }

    fn spawn_event_pump(
        &self,
        handle: Arc<SessionHandle>,
        mut rx: mpsc::UnboundedReceiver<ClientEvent>,
    ) {
        let events = self.inner.events.clone();
        tokio::spawn(async move {
            let mut status_rx = handle.subscribe_status();
            loop {
                tokio::select! {
                    event = rx.recv() => {
                        let Some(event) = event else { break };
                        match handle.apply(&event) {
                            Some(status) => info!(
                                session_id = %handle.id(),
                                event = event.kind(),
                                %status,
                                "session status changed"
                            ),
                            None => debug!(session_id = %handle.id(), event = event.kind(), "client event"),
                        }
                        // No subscribers is fine.
                        let _ = events.send(SessionEvent::new(handle.id().clone(), event));
                    }
                    changed = status_rx.changed() => {
                        if changed.is_err() || handle.status().is_terminal() {
                            break;
                        }
                    }
                }
            }
            debug!(session_id = %handle.id(), "event pump stopped");
        });
    }
}

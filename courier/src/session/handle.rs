//! Session handle: the in-process record of one tenant session.

use crate::client::MessagingClient;
use crate::events::ClientEvent;
use crate::id::SessionId;
use crate::status::SessionStatus;
use crate::util::timestamp_ms;
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;

/// Tracks one session's status and exclusively owns its client.
///
/// Status lives in a [`watch`] channel so it can be read synchronously and
/// awaited. The client is taken out exactly once when the session is torn
/// down.
pub struct SessionHandle {
    id: SessionId,
    created_at: u64,
    status: watch::Sender<SessionStatus>,
    client: RwLock<Option<Arc<dyn MessagingClient>>>,
    last_qr: RwLock<Option<String>>,
    last_error: RwLock<Option<String>>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    /// Create a `PENDING` handle owning `client`.
    #[must_use]
    pub fn new(id: SessionId, client: Arc<dyn MessagingClient>) -> Self {
        let (status, _) = watch::channel(SessionStatus::Pending);
        Self {
            id,
            created_at: timestamp_ms(),
            status,
            client: RwLock::new(Some(client)),
            last_qr: RwLock::new(None),
            last_error: RwLock::new(None),
        }
    }

    /// Session identifier.
    #[must_use]
    pub const fn id(&self) -> &SessionId {
        &self.id
    }

    /// Registration time in Unix milliseconds.
    #[must_use]
    pub const fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Watch status changes.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// The owned client, until the session is torn down.
    #[must_use]
    pub fn client(&self) -> Option<Arc<dyn MessagingClient>> {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the owned client reports a live connection.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.client().is_some_and(|client| client.is_connected())
    }

    /// Most recent QR payload while authentication is pending.
    #[must_use]
    pub fn last_qr(&self) -> Option<String> {
        self.last_qr
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Reason of the most recent failure.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply a client event. Returns the new status if it changed.
    pub(crate) fn apply(&self, event: &ClientEvent) -> Option<SessionStatus> {
        let changed = self.transition(|current| current.on_event(event));

        match event {
            ClientEvent::Qr { code } if self.status() == SessionStatus::QrRequired => {
                self.set_qr(Some(code.clone()));
            }
            ClientEvent::Ready if changed.is_some() => self.set_qr(None),
            ClientEvent::AuthFailure { reason } | ClientEvent::Disconnected { reason }
                if changed.is_some() =>
            {
                self.set_error(reason.clone());
            }
            _ => {}
        }

        changed
    }

    /// Mark the session `INVALID` for a reason found outside the event stream.
    ///
    /// Returns `false` if the session was not in a live state.
    pub(crate) fn invalidate(&self, reason: impl Into<String>) -> bool {
        let changed = self
            .transition(|current| {
                matches!(
                    current,
                    SessionStatus::Pending | SessionStatus::QrRequired | SessionStatus::Ready
                )
                .then_some(SessionStatus::Invalid)
            })
            .is_some();
        if changed {
            self.set_error(reason.into());
        }
        changed
    }

    /// Move to `TERMINATING`. Returns the previous status, or `None` if a
    /// delete may not start from the current status.
    pub(crate) fn begin_termination(&self) -> Option<SessionStatus> {
        let mut previous = None;
        self.status.send_if_modified(|current| {
            if current.can_terminate() {
                previous = Some(*current);
                *current = SessionStatus::Terminating;
                true
            } else {
                false
            }
        });
        previous
    }

    /// Take the client out of the handle. Only the first call gets it.
    pub(crate) fn take_client(&self) -> Option<Arc<dyn MessagingClient>> {
        self.client
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Final state after the client was destroyed and the handle removed.
    pub(crate) fn mark_terminated(&self) {
        self.status.send_replace(SessionStatus::Terminated);
        self.set_qr(None);
    }

    /// Serializable summary.
    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            status: self.status(),
            created_at: self.created_at,
            connected: self.is_connected(),
            qr_pending: self.last_qr().is_some(),
            last_error: self.last_error(),
        }
    }

    fn transition(
        &self,
        next: impl FnOnce(SessionStatus) -> Option<SessionStatus>,
    ) -> Option<SessionStatus> {
        let mut changed = None;
        self.status.send_if_modified(|current| match next(*current) {
            Some(status) if status != *current => {
                *current = status;
                changed = Some(status);
                true
            }
            _ => false,
        });
        changed
    }

    fn set_qr(&self, qr: Option<String>) {
        *self.last_qr.write().unwrap_or_else(PoisonError::into_inner) = qr;
    }

    fn set_error(&self, error: String) {
        *self.last_error.write().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// Session identifier.
    pub id: SessionId,
    /// Current status.
    pub status: SessionStatus,
    /// Registration time in Unix milliseconds.
    pub created_at: u64,
    /// Whether the client reports a live connection.
    pub connected: bool,
    /// Whether a QR code is waiting to be scanned.
    pub qr_pending: bool,
    /// Reason of the most recent failure.
    pub last_error: Option<String>,
}

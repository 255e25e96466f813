//! Lifecycle events emitted by messaging clients.
//!
//! Each client pushes [`ClientEvent`]s through the [`EventSender`] it receives
//! at initialization. The session manager applies them to the owning handle
//! and re-broadcasts them as [`SessionEvent`]s for observers such as webhook
//! dispatchers.

use crate::id::SessionId;
use crate::util::timestamp_ms;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Event emitted by a messaging client during its lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// A QR code must be scanned to authenticate.
    Qr {
        /// Renderable QR payload.
        code: String,
    },
    /// Credentials were accepted; the client is still loading.
    Authenticated,
    /// The client can serve requests.
    Ready,
    /// The external service rejected the credentials.
    AuthFailure {
        /// Reason given by the client.
        reason: String,
    },
    /// The client lost its connection.
    Disconnected {
        /// Reason given by the client.
        reason: String,
    },
    /// An incoming message or other passthrough payload.
    Message {
        /// Raw payload as produced by the client.
        payload: serde_json::Value,
    },
}

impl ClientEvent {
    /// Short name used in logs and callback payloads.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Qr { .. } => "qr",
            Self::Authenticated => "authenticated",
            Self::Ready => "ready",
            Self::AuthFailure { .. } => "auth_failure",
            Self::Disconnected { .. } => "disconnected",
            Self::Message { .. } => "message",
        }
    }

    /// Event payload in callback form.
    #[must_use]
    pub fn data(&self) -> serde_json::Value {
        match self {
            Self::Qr { code } => serde_json::json!({ "qr": code }),
            Self::AuthFailure { reason } => serde_json::json!({ "msg": reason }),
            Self::Disconnected { reason } => serde_json::json!({ "reason": reason }),
            Self::Message { payload } => serde_json::json!({ "message": payload }),
            Self::Authenticated | Self::Ready => serde_json::Value::Null,
        }
    }
}

/// A client event tagged with the session it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    /// Session that produced the event.
    pub session_id: SessionId,
    /// The event itself.
    pub event: ClientEvent,
    /// Unix milliseconds when the manager observed the event.
    pub timestamp: u64,
}

impl SessionEvent {
    /// Tag an event with its session.
    #[must_use]
    pub fn new(session_id: SessionId, event: ClientEvent) -> Self {
        Self {
            session_id,
            event,
            timestamp: timestamp_ms(),
        }
    }
}

/// Sending half handed to a client at initialization.
#[derive(Debug, Clone)]
pub struct EventSender {
    session_id: SessionId,
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl EventSender {
    /// Session these events belong to.
    #[must_use]
    pub const fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Emit an event.
    ///
    /// Returns `false` once the session has been torn down and nobody is
    /// listening anymore.
    pub fn emit(&self, event: ClientEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Whether the receiving side is gone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Create the event channel for one session.
#[must_use]
pub fn event_channel(session_id: SessionId) -> (EventSender, mpsc::UnboundedReceiver<ClientEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { session_id, tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kinds() {
        assert_eq!(ClientEvent::Ready.kind(), "ready");
        assert_eq!(
            ClientEvent::AuthFailure {
                reason: String::new()
            }
            .kind(),
            "auth_failure"
        );
    }

    #[test]
    fn test_qr_callback_data() {
        let event = ClientEvent::Qr {
            code: "2@xyz".to_string(),
        };
        assert_eq!(event.data(), serde_json::json!({ "qr": "2@xyz" }));
        assert!(ClientEvent::Ready.data().is_null());
    }

    #[tokio::test]
    async fn test_sender_closes_with_receiver() {
        let (tx, mut rx) = event_channel(SessionId::parse("alice").unwrap());
        assert!(tx.emit(ClientEvent::Authenticated));
        assert_eq!(rx.recv().await, Some(ClientEvent::Authenticated));

        drop(rx);
        assert!(tx.is_closed());
        assert!(!tx.emit(ClientEvent::Ready));
    }
}

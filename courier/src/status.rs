//! Session status and its transition rules.

use crate::events::ClientEvent;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a session handle.
///
/// ```text
/// PENDING --qr--> QR_REQUIRED --ready--> READY
/// PENDING --ready--> READY
/// {PENDING, QR_REQUIRED, READY} --auth_failure|disconnected--> INVALID
/// {PENDING, QR_REQUIRED, READY, INVALID} --delete--> TERMINATING --destroy--> TERMINATED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Client is bootstrapping.
    #[default]
    Pending,
    /// Client is waiting for a QR code to be scanned.
    QrRequired,
    /// Client is authenticated and can serve requests.
    Ready,
    /// Client failed authentication or lost its connection.
    Invalid,
    /// A delete is in progress.
    Terminating,
    /// Client destroyed and handle removed from the registry.
    Terminated,
}

impl SessionStatus {
    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::QrRequired => "QR_REQUIRED",
            Self::Ready => "READY",
            Self::Invalid => "INVALID",
            Self::Terminating => "TERMINATING",
            Self::Terminated => "TERMINATED",
        }
    }

    /// Whether the session can serve requests.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Whether the handle has been torn down for good.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated)
    }

    /// Whether a delete may start from this status.
    #[must_use]
    pub const fn can_terminate(self) -> bool {
        matches!(
            self,
            Self::Pending | Self::QrRequired | Self::Ready | Self::Invalid
        )
    }

    /// Status reached when `event` arrives in this status, if any.
    ///
    /// Returns `None` when the event does not move the state machine.
    #[must_use]
    pub const fn on_event(self, event: &ClientEvent) -> Option<Self> {
        match (self, event) {
            (Self::Pending | Self::QrRequired, ClientEvent::Qr { .. }) => Some(Self::QrRequired),
            (Self::Pending | Self::QrRequired, ClientEvent::Ready) => Some(Self::Ready),
            (
                Self::Pending | Self::QrRequired | Self::Ready,
                ClientEvent::AuthFailure { .. } | ClientEvent::Disconnected { .. },
            ) => Some(Self::Invalid),
            _ => None,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qr() -> ClientEvent {
        ClientEvent::Qr {
            code: "2@abc".to_string(),
        }
    }

    #[test]
    fn test_happy_path_with_qr() {
        let status = SessionStatus::Pending.on_event(&qr()).unwrap();
        assert_eq!(status, SessionStatus::QrRequired);
        let status = status.on_event(&ClientEvent::Ready).unwrap();
        assert_eq!(status, SessionStatus::Ready);
    }

    #[test]
    fn test_restored_credentials_skip_qr() {
        assert_eq!(
            SessionStatus::Pending.on_event(&ClientEvent::Ready),
            Some(SessionStatus::Ready)
        );
    }

    #[test]
    fn test_failures_invalidate_live_states() {
        let failure = ClientEvent::AuthFailure {
            reason: "bad creds".to_string(),
        };
        let gone = ClientEvent::Disconnected {
            reason: "LOGOUT".to_string(),
        };
        for status in [
            SessionStatus::Pending,
            SessionStatus::QrRequired,
            SessionStatus::Ready,
        ] {
            assert_eq!(status.on_event(&failure), Some(SessionStatus::Invalid));
            assert_eq!(status.on_event(&gone), Some(SessionStatus::Invalid));
        }
    }

    #[test]
    fn test_dead_states_ignore_events() {
        for status in [
            SessionStatus::Invalid,
            SessionStatus::Terminating,
            SessionStatus::Terminated,
        ] {
            assert_eq!(status.on_event(&ClientEvent::Ready), None);
            assert_eq!(status.on_event(&qr()), None);
        }
        assert_eq!(SessionStatus::Ready.on_event(&qr()), None);
        assert_eq!(SessionStatus::Pending.on_event(&ClientEvent::Authenticated), None);
    }

    #[test]
    fn test_terminate_guard() {
        assert!(SessionStatus::Invalid.can_terminate());
        assert!(SessionStatus::Pending.can_terminate());
        assert!(!SessionStatus::Terminating.can_terminate());
        assert!(!SessionStatus::Terminated.can_terminate());
    }

    #[test]
    fn test_wire_name() {
        assert_eq!(
            serde_json::to_string(&SessionStatus::QrRequired).unwrap(),
            "\"QR_REQUIRED\""
        );
    }
}

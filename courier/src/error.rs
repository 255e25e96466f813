//! Error types for session orchestration.
//!
//! [`SessionError`] is the taxonomy every lifecycle operation reports to its
//! caller. Failures raised by a wrapped messaging client are expressed as
//! [`AdapterError`] and wrapped with context on their way out.

use crate::status::SessionStatus;
use std::time::Duration;

// ============================================================================
// Session Errors
// ============================================================================

/// Error type for session lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The identifier does not match the safe-identifier pattern.
    #[error("invalid session id: {0}")]
    InvalidId(String),

    /// A live session already exists for this identifier.
    #[error("session already exists: {0}")]
    AlreadyExists(String),

    /// No session is registered under this identifier.
    #[error("session not found: {0}")]
    NotFound(String),

    /// The session exists but cannot serve requests yet.
    #[error("session {id} is not ready (status: {status})")]
    NotReady {
        /// Session identifier.
        id: String,
        /// Status observed when the request was rejected.
        status: SessionStatus,
    },

    /// A readiness wait exceeded its deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The external client rejected the session credentials.
    #[error("authentication failed: {0}")]
    AuthFailure(String),

    /// The wrapped client failed.
    #[error("{context}: {source}")]
    Adapter {
        /// What the orchestrator was doing when the client failed.
        context: String,
        /// Underlying client failure.
        #[source]
        source: AdapterError,
    },

    /// A background task panicked or was cancelled.
    #[error("task: {0}")]
    Task(String),
}

impl SessionError {
    /// Create a not found error.
    #[inline]
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    /// Wrap a client failure with context.
    #[inline]
    pub fn adapter(context: impl Into<String>, source: AdapterError) -> Self {
        Self::Adapter {
            context: context.into(),
            source,
        }
    }

    /// Stable machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidId(_) => "invalid_session_id",
            Self::AlreadyExists(_) => "session_already_exists",
            Self::NotFound(_) => "session_not_found",
            Self::NotReady { .. } => "session_not_ready",
            Self::Timeout(_) => "timeout",
            Self::AuthFailure(_) => "auth_failure",
            Self::Adapter { .. } => "adapter_error",
            Self::Task(_) => "internal_error",
        }
    }
}

impl From<tokio::task::JoinError> for SessionError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

/// Result type for session operations.
pub type SessionResult<T> = std::result::Result<T, SessionError>;

// ============================================================================
// Adapter Errors
// ============================================================================

/// Error type for messaging client operations.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// The client could not be created or started.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The client rejected or failed a request.
    #[error("request failed: {0}")]
    Request(String),

    /// The client did not answer in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The client has already been shut down.
    #[error("client closed")]
    Closed,

    /// The client sent something it should not have.
    #[error("protocol: {0}")]
    Protocol(String),

    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl AdapterError {
    /// Create a request failed error.
    #[inline]
    pub fn request(msg: impl Into<String>) -> Self {
        Self::Request(msg.into())
    }

    /// Create an unavailable error.
    #[inline]
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}

/// Result type for messaging client operations.
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

//! Client adapter abstraction.
//!
//! A [`MessagingClient`] wraps one instance of the external messaging client
//! and exposes only what the orchestrator needs: start-up, a liveness probe,
//! logout, destruction, and an opaque capability call. A [`ClientFactory`]
//! builds a fresh client for every session handle, so no two handles ever
//! share an instance.

use crate::error::AdapterResult;
use crate::events::EventSender;
use crate::id::SessionId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Prefix of per-session credential directories.
pub const SESSION_DIR_PREFIX: &str = "session-";

/// Credential directory of a session below `root`.
#[must_use]
pub fn session_dir(root: &Path, id: &SessionId) -> PathBuf {
    root.join(format!("{SESSION_DIR_PREFIX}{id}"))
}

/// Session identifiers with stored credentials below `root`.
///
/// Directories whose suffix is not a valid identifier are skipped. A missing
/// root yields an empty list.
///
/// # Errors
///
/// Returns an IO error if `root` exists but cannot be read.
pub async fn stored_sessions(root: &Path) -> std::io::Result<Vec<SessionId>> {
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut ids = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(suffix) = name.to_str().and_then(|n| n.strip_prefix(SESSION_DIR_PREFIX)) else {
            continue;
        };
        match SessionId::parse(suffix) {
            Ok(id) => ids.push(id),
            Err(e) => debug!(dir = ?name, error = %e, "skipping session directory"),
        }
    }
    ids.sort();
    Ok(ids)
}

/// How a client persists its authentication material.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthStrategy {
    /// Nothing is persisted; every start requires a fresh QR scan.
    #[default]
    None,
    /// Credentials live in a directory derived from the session id.
    Local {
        /// Directory holding this session's credentials.
        data_dir: PathBuf,
    },
}

impl AuthStrategy {
    /// Local strategy rooted at `root` for session `id`.
    #[must_use]
    pub fn local(root: &Path, id: &SessionId) -> Self {
        Self::Local {
            data_dir: session_dir(root, id),
        }
    }

    /// Credential directory, if any.
    #[must_use]
    pub fn data_dir(&self) -> Option<&Path> {
        match self {
            Self::None => None,
            Self::Local { data_dir } => Some(data_dir),
        }
    }
}

/// Everything a client needs to start.
#[derive(Debug, Clone)]
pub struct InitContext {
    /// Session being started.
    pub session_id: SessionId,
    /// Credential persistence.
    pub auth: AuthStrategy,
    /// Where lifecycle events go.
    pub events: EventSender,
}

/// Options for [`MessagingClient::destroy`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DestroyOptions {
    /// Remove stored credentials as well.
    pub purge_credentials: bool,
}

/// Media attached to an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaPayload {
    /// MIME type, e.g. `image/png`.
    pub mimetype: String,
    /// Base64-encoded content.
    pub data: String,
    /// Optional file name.
    #[serde(default)]
    pub filename: Option<String>,
    /// Size in bytes, if known.
    #[serde(default)]
    pub filesize: Option<u64>,
}

/// Content of an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MessageContent {
    /// Plain text.
    Text {
        /// Message body.
        body: String,
    },
    /// Inline media.
    Media(MediaPayload),
    /// Media the client should download first.
    MediaFromUrl {
        /// Source URL.
        url: String,
    },
}

/// Capability requested from a ready client.
///
/// The orchestrator treats these as opaque; the client decides how to carry
/// them out and what to return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "camelCase")]
pub enum ClientRequest {
    /// Information about the authenticated account.
    Info,
    /// Send a message to a chat.
    #[serde(rename_all = "camelCase")]
    SendMessage {
        /// Target chat.
        chat_id: String,
        /// What to send.
        content: MessageContent,
        /// Client-specific send options.
        #[serde(default)]
        options: serde_json::Value,
    },
    /// Whether a number is registered with the service.
    IsRegisteredUser {
        /// Number or contact id.
        id: String,
    },
    /// Create a group chat.
    CreateGroup {
        /// Group title.
        name: String,
        /// Initial members.
        participants: Vec<String>,
    },
    /// Set the account's status text.
    SetStatus {
        /// New status text.
        status: String,
    },
    /// List contacts.
    GetContacts,
    /// List chats.
    GetChats,
    /// Profile picture URL of a contact.
    #[serde(rename_all = "camelCase")]
    GetProfilePicUrl {
        /// Contact id.
        contact_id: String,
    },
}

impl ClientRequest {
    /// Method name as used on the wire.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::SendMessage { .. } => "sendMessage",
            Self::IsRegisteredUser { .. } => "isRegisteredUser",
            Self::CreateGroup { .. } => "createGroup",
            Self::SetStatus { .. } => "setStatus",
            Self::GetContacts => "getContacts",
            Self::GetChats => "getChats",
            Self::GetProfilePicUrl { .. } => "getProfilePicUrl",
        }
    }
}

/// Façade over one external messaging client instance.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Begin the client's start-up sequence.
    ///
    /// Implementations should return once start-up is under way and report
    /// progress through `ctx.events`.
    async fn initialize(&self, ctx: InitContext) -> AdapterResult<()>;

    /// Whether the client still has a live connection.
    ///
    /// Must not perform network IO.
    fn is_connected(&self) -> bool;

    /// Snapshot of internal bootstrap state for readiness polling.
    fn inspect(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    /// Sign out of the external service.
    async fn logout(&self) -> AdapterResult<()>;

    /// Release every resource held by the client.
    ///
    /// Called exactly once per client, even if [`logout`](Self::logout) failed.
    async fn destroy(&self, options: DestroyOptions) -> AdapterResult<()>;

    /// Carry out a capability request.
    async fn call(&self, request: ClientRequest) -> AdapterResult<serde_json::Value>;
}

/// Builds one client per session.
pub trait ClientFactory: Send + Sync {
    /// Construct a client for `id`. The client must not start yet.
    ///
    /// # Errors
    ///
    /// Returns an adapter error if the client cannot be constructed.
    fn create(&self, id: &SessionId, auth: &AuthStrategy)
    -> AdapterResult<Arc<dyn MessagingClient>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_dir_layout() {
        let id = SessionId::parse("alice").unwrap();
        let dir = session_dir(Path::new("/var/courier"), &id);
        assert_eq!(dir, PathBuf::from("/var/courier/session-alice"));
        assert_eq!(AuthStrategy::local(Path::new("/var/courier"), &id).data_dir(), Some(dir.as_path()));
        assert_eq!(AuthStrategy::None.data_dir(), None);
    }

    #[test]
    fn test_request_wire_format() {
        let request = ClientRequest::SendMessage {
            chat_id: "123@c.us".to_string(),
            content: MessageContent::Text {
                body: "hi".to_string(),
            },
            options: serde_json::Value::Null,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["method"], "sendMessage");
        assert_eq!(value["params"]["chatId"], "123@c.us");
        assert_eq!(value["params"]["content"]["type"], "text");
        assert_eq!(request.method(), "sendMessage");

        let value = serde_json::to_value(ClientRequest::GetChats).unwrap();
        assert_eq!(value, serde_json::json!({ "method": "getChats" }));
    }

    #[tokio::test]
    async fn test_stored_sessions_scan() {
        let root = tempfile::tempdir().unwrap();
        for dir in ["session-bob", "session-alice", "session-..bad", "other"] {
            tokio::fs::create_dir_all(root.path().join(dir)).await.unwrap();
        }
        tokio::fs::write(root.path().join("session-file"), b"x").await.unwrap();

        let ids = stored_sessions(root.path()).await.unwrap();
        let ids: Vec<&str> = ids.iter().map(SessionId::as_str).collect();
        assert_eq!(ids, ["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_stored_sessions_missing_root() {
        let root = tempfile::tempdir().unwrap();
        let ids = stored_sessions(&root.path().join("absent")).await.unwrap();
        assert!(ids.is_empty());
    }
}

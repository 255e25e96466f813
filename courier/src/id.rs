//! Validated session identifiers.
//!
//! Identifiers are caller supplied and end up in on-disk paths, so they are
//! checked against a restrictive pattern before anything else sees them.

use crate::error::{SessionError, SessionResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Maximum identifier length in bytes.
pub const MAX_SESSION_ID_LEN: usize = 64;

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid session id regex"))
}

/// A session identifier made of ASCII letters, digits, `_` and `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Validate and wrap an identifier.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidId`] when the identifier is empty, too
    /// long, or contains characters outside the allowed set.
    pub fn parse(id: impl Into<String>) -> SessionResult<Self> {
        let id = id.into();
        if id.len() > MAX_SESSION_ID_LEN || !id_pattern().is_match(&id) {
            return Err(SessionError::InvalidId(id));
        }
        Ok(Self(id))
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the identifier.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = SessionError;

    fn from_str(s: &str) -> SessionResult<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SessionId {
    type Error = SessionError;

    fn try_from(value: String) -> SessionResult<Self> {
        Self::parse(value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_safe_ids() {
        for id in ["alice", "tenant_42", "ABC-def-123", "a"] {
            assert_eq!(SessionId::parse(id).unwrap().as_str(), id);
        }
    }

    #[test]
    fn test_rejects_traversal_and_punctuation() {
        for id in ["", "../etc", "a/b", "a.b", "space id", "semi;colon", "ünïcode"] {
            assert!(
                matches!(SessionId::parse(id), Err(SessionError::InvalidId(_))),
                "{id:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_rejects_overlong_ids() {
        let id = "x".repeat(MAX_SESSION_ID_LEN + 1);
        assert!(SessionId::parse(id).is_err());
        assert!(SessionId::parse("x".repeat(MAX_SESSION_ID_LEN)).is_ok());
    }

    #[test]
    fn test_serde_validates() {
        let id: SessionId = serde_json::from_str("\"bob\"").unwrap();
        assert_eq!(id.to_string(), "bob");
        assert!(serde_json::from_str::<SessionId>("\"../bob\"").is_err());
    }
}

//! Session manager configuration.

use crate::client::AuthStrategy;
use crate::id::SessionId;
use crate::poller::{DEFAULT_POLL_INTERVAL, PollOptions};
use std::path::PathBuf;
use std::time::Duration;

/// Default deadline for a new session to become ready.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(90);

/// Default deadline for a client's bootstrap state to appear.
pub const DEFAULT_BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bootstrap property path.
pub const DEFAULT_BOOTSTRAP_PATH: &str = "page";

/// Timeouts and storage settings for a [`SessionManager`](super::SessionManager).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Root directory of per-session credential directories.
    pub sessions_root: PathBuf,
    /// Persist credentials between runs.
    pub persist_credentials: bool,
    /// How long a new session may take to become ready.
    pub ready_timeout: Duration,
    /// How long a client's bootstrap state may take to appear.
    pub bootstrap_timeout: Duration,
    /// Property path whose presence marks a bootstrapped client.
    pub bootstrap_path: String,
    /// Interval between readiness probes.
    pub poll_interval: Duration,
    /// Deadline for signing out during delete.
    pub logout_timeout: Duration,
    /// Deadline for destroying a client during delete.
    pub destroy_timeout: Duration,
    /// Deadline for each delete run by a flush.
    pub delete_timeout: Duration,
    /// Remove stored credentials when a session is deleted.
    pub purge_credentials_on_delete: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            sessions_root: PathBuf::from("sessions"),
            persist_credentials: true,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            bootstrap_timeout: DEFAULT_BOOTSTRAP_TIMEOUT,
            bootstrap_path: DEFAULT_BOOTSTRAP_PATH.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            logout_timeout: Duration::from_secs(10),
            destroy_timeout: Duration::from_secs(15),
            delete_timeout: Duration::from_secs(30),
            purge_credentials_on_delete: true,
        }
    }
}

impl ManagerConfig {
    /// Set the sessions root directory.
    #[must_use]
    pub fn with_sessions_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sessions_root = root.into();
        self
    }

    /// Enable or disable credential persistence.
    #[must_use]
    pub const fn with_persist_credentials(mut self, persist: bool) -> Self {
        self.persist_credentials = persist;
        self
    }

    /// Set the ready timeout.
    #[must_use]
    pub const fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Set the bootstrap timeout.
    #[must_use]
    pub const fn with_bootstrap_timeout(mut self, timeout: Duration) -> Self {
        self.bootstrap_timeout = timeout;
        self
    }

    /// Set the bootstrap property path.
    #[must_use]
    pub fn with_bootstrap_path(mut self, path: impl Into<String>) -> Self {
        self.bootstrap_path = path.into();
        self
    }

    /// Set the poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the logout timeout.
    #[must_use]
    pub const fn with_logout_timeout(mut self, timeout: Duration) -> Self {
        self.logout_timeout = timeout;
        self
    }

    /// Set the destroy timeout.
    #[must_use]
    pub const fn with_destroy_timeout(mut self, timeout: Duration) -> Self {
        self.destroy_timeout = timeout;
        self
    }

    /// Set the per-delete timeout used by flushes.
    #[must_use]
    pub const fn with_delete_timeout(mut self, timeout: Duration) -> Self {
        self.delete_timeout = timeout;
        self
    }

    /// Enable or disable credential removal on delete.
    #[must_use]
    pub const fn with_purge_credentials_on_delete(mut self, purge: bool) -> Self {
        self.purge_credentials_on_delete = purge;
        self
    }

    /// Credential strategy for session `id`.
    #[must_use]
    pub fn auth_for(&self, id: &SessionId) -> AuthStrategy {
        if self.persist_credentials {
            AuthStrategy::local(&self.sessions_root, id)
        } else {
            AuthStrategy::None
        }
    }

    /// Polling options for readiness waits.
    #[must_use]
    pub const fn ready_poll(&self) -> PollOptions {
        PollOptions::new(self.poll_interval, self.ready_timeout)
    }

    /// Polling options for bootstrap waits.
    #[must_use]
    pub const fn bootstrap_poll(&self) -> PollOptions {
        PollOptions::new(self.poll_interval, self.bootstrap_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_follows_persistence() {
        let id = SessionId::parse("alice").unwrap();
        let config = ManagerConfig::default().with_sessions_root("/data");
        assert_eq!(
            config.auth_for(&id).data_dir(),
            Some(std::path::Path::new("/data/session-alice"))
        );

        let config = config.with_persist_credentials(false);
        assert_eq!(config.auth_for(&id), AuthStrategy::None);
    }

    #[test]
    fn test_poll_options() {
        let config = ManagerConfig::default()
            .with_poll_interval(Duration::from_millis(20))
            .with_ready_timeout(Duration::from_secs(5));
        let poll = config.ready_poll();
        assert_eq!(poll.interval, Duration::from_millis(20));
        assert_eq!(poll.deadline, Duration::from_secs(5));
        assert_eq!(config.bootstrap_poll().deadline, DEFAULT_BOOTSTRAP_TIMEOUT);
    }
}

//! Gateway configuration.
//!
//! The configuration is a JSON document, by default at
//! `~/.courier/config.json`. Every field has a default, so a partial file
//! (or none at all) is valid. A handful of `COURIER_*` environment
//! variables override the file.

use crate::error::{ConfigError, ConfigResult};
use courier::session::{DEFAULT_BOOTSTRAP_PATH, ManagerConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Directory below the home directory holding gateway state.
pub const CONFIG_DIR: &str = ".courier";

/// Configuration file name.
pub const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding the listen port.
pub const ENV_PORT: &str = "COURIER_PORT";
/// Environment variable overriding the API key.
pub const ENV_API_KEY: &str = "COURIER_API_KEY";
/// Environment variable overriding the webhook base URL.
pub const ENV_WEBHOOK_URL: &str = "COURIER_WEBHOOK_URL";
/// Environment variable overriding the sessions directory.
pub const ENV_SESSIONS_PATH: &str = "COURIER_SESSIONS_PATH";
/// Environment variable overriding session recovery.
pub const ENV_RECOVER_SESSIONS: &str = "COURIER_RECOVER_SESSIONS";

/// Gateway state directory.
#[must_use]
pub fn config_dir() -> PathBuf {
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR)
}

/// Default configuration file path.
#[must_use]
pub fn config_path() -> PathBuf {
    config_dir().join(CONFIG_FILE)
}

fn default_sessions_path() -> PathBuf {
    config_dir().join("sessions")
}

/// Complete gateway configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GatewayConfig {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Session storage and timeouts.
    pub sessions: SessionsConfig,
    /// Which messaging client backs the sessions.
    pub driver: DriverConfig,
    /// Event callbacks.
    pub webhook: WebhookConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    /// Listen address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Required `x-api-key` value. No key disables authentication.
    pub api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            api_key: None,
        }
    }
}

/// Session storage and lifecycle settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionsConfig {
    /// Root directory of per-session credential directories.
    pub path: PathBuf,
    /// Restart stored sessions at startup.
    pub recover: bool,
    /// Persist credentials between runs.
    pub persist_credentials: bool,
    /// Remove stored credentials when a session is deleted.
    pub purge_on_delete: bool,
    /// Property path whose presence marks a bootstrapped client.
    pub bootstrap_path: String,
    /// Lifecycle timeouts.
    pub timeouts: TimeoutsConfig,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            path: default_sessions_path(),
            recover: true,
            persist_credentials: true,
            purge_on_delete: true,
            bootstrap_path: DEFAULT_BOOTSTRAP_PATH.to_string(),
            timeouts: TimeoutsConfig::default(),
        }
    }
}

/// Lifecycle timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimeoutsConfig {
    /// Seconds a new session may take to become ready.
    pub ready_secs: u64,
    /// Seconds a client may take to bootstrap.
    pub bootstrap_secs: u64,
    /// Milliseconds between readiness probes.
    pub poll_interval_ms: u64,
    /// Seconds allowed for signing out.
    pub logout_secs: u64,
    /// Seconds allowed for destroying a client.
    pub destroy_secs: u64,
    /// Seconds allowed for each delete during a flush.
    pub delete_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            ready_secs: 90,
            bootstrap_secs: 10,
            poll_interval_ms: 100,
            logout_secs: 10,
            destroy_secs: 15,
            delete_secs: 30,
        }
    }
}

/// Messaging client backing the sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DriverConfig {
    /// In-process client that never leaves memory.
    #[serde(rename_all = "camelCase")]
    Memory {
        /// Become ready right after start instead of waiting for a QR scan.
        #[serde(default = "default_true")]
        auto_ready: bool,
    },
    /// One bridge process per session speaking JSON lines.
    #[serde(rename_all = "camelCase")]
    Process {
        /// Bridge executable.
        command: String,
        /// Arguments passed to the bridge.
        #[serde(default)]
        args: Vec<String>,
        /// Seconds to wait for a bridge response.
        #[serde(default = "default_request_timeout_secs")]
        request_timeout_secs: u64,
    },
}

const fn default_true() -> bool {
    true
}

const fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self::Memory { auto_ready: true }
    }
}

/// Event callback settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WebhookConfig {
    /// URL every session event is posted to.
    pub base_url: Option<String>,
    /// Event types that are not posted.
    pub disabled_callbacks: Vec<String>,
    /// Serve `POST /localCallbackExample` as a sample sink.
    pub enable_local_callback_example: bool,
    /// Seconds allowed for each delivery.
    pub timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            disabled_callbacks: Vec::new(),
            enable_local_callback_example: false,
            timeout_secs: 10,
        }
    }
}

impl WebhookConfig {
    /// Whether events of `data_type` should be posted.
    #[must_use]
    pub fn is_enabled(&self, data_type: &str) -> bool {
        !self.disabled_callbacks.iter().any(|d| d == data_type)
    }
}

impl GatewayConfig {
    /// `host:port` to listen on.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Session manager settings derived from this configuration.
    #[must_use]
    pub fn manager_config(&self) -> ManagerConfig {
        let sessions = &self.sessions;
        let timeouts = &sessions.timeouts;
        ManagerConfig::default()
            .with_sessions_root(sessions.path.clone())
            .with_persist_credentials(sessions.persist_credentials)
            .with_purge_credentials_on_delete(sessions.purge_on_delete)
            .with_bootstrap_path(sessions.bootstrap_path.clone())
            .with_ready_timeout(Duration::from_secs(timeouts.ready_secs))
            .with_bootstrap_timeout(Duration::from_secs(timeouts.bootstrap_secs))
            .with_poll_interval(Duration::from_millis(timeouts.poll_interval_ms))
            .with_logout_timeout(Duration::from_secs(timeouts.logout_secs))
            .with_destroy_timeout(Duration::from_secs(timeouts.destroy_secs))
            .with_delete_timeout(Duration::from_secs(timeouts.delete_secs))
    }

    /// Apply `COURIER_*` overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a variable cannot be parsed.
    pub fn apply_env(&mut self) -> ConfigResult<()> {
        self.apply_env_with(|name| std::env::var(name).ok())
    }

    /// Apply `COURIER_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a variable cannot be parsed.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<()> {
        if let Some(port) = lookup(ENV_PORT) {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid(format!("{ENV_PORT}={port} is not a port")))?;
        }
        if let Some(key) = lookup(ENV_API_KEY) {
            self.server.api_key = Some(key).filter(|k| !k.is_empty());
        }
        if let Some(url) = lookup(ENV_WEBHOOK_URL) {
            self.webhook.base_url = Some(url).filter(|u| !u.is_empty());
        }
        if let Some(path) = lookup(ENV_SESSIONS_PATH) {
            self.sessions.path = PathBuf::from(path);
        }
        if let Some(recover) = lookup(ENV_RECOVER_SESSIONS) {
            self.sessions.recover = parse_bool(&recover).ok_or_else(|| {
                ConfigError::invalid(format!("{ENV_RECOVER_SESSIONS}={recover} is not a boolean"))
            })?;
        }
        Ok(())
    }

    /// Check the configuration for problems.
    #[must_use]
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.server.port == 0 {
            issues.push(ConfigIssue::error("server.port", "port must not be 0"));
        }
        if self.server.api_key.is_none() {
            issues.push(ConfigIssue::warning(
                "server.apiKey",
                "no API key configured, the API is unauthenticated",
            ));
        }

        let timeouts = &self.sessions.timeouts;
        for (field, value) in [
            ("sessions.timeouts.readySecs", timeouts.ready_secs),
            ("sessions.timeouts.bootstrapSecs", timeouts.bootstrap_secs),
            ("sessions.timeouts.pollIntervalMs", timeouts.poll_interval_ms),
            ("sessions.timeouts.destroySecs", timeouts.destroy_secs),
            ("sessions.timeouts.deleteSecs", timeouts.delete_secs),
        ] {
            if value == 0 {
                issues.push(ConfigIssue::error(field, "must be greater than 0"));
            }
        }
        if timeouts.delete_secs < timeouts.logout_secs + timeouts.destroy_secs {
            issues.push(ConfigIssue::warning(
                "sessions.timeouts.deleteSecs",
                "shorter than logout plus destroy, flushes may report timeouts",
            ));
        }
        if self.sessions.bootstrap_path.is_empty() {
            issues.push(ConfigIssue::error("sessions.bootstrapPath", "must not be empty"));
        }

        if matches!(&self.driver, DriverConfig::Process { command, .. } if command.trim().is_empty())
        {
            issues.push(ConfigIssue::error("driver.command", "bridge command is empty"));
        }

        if let Some(url) = &self.webhook.base_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                issues.push(ConfigIssue::error(
                    "webhook.baseUrl",
                    format!("{url} is not an http(s) URL"),
                ));
            }
        }

        issues
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Severity of a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueLevel {
    /// The gateway cannot run with this value.
    Error,
    /// Works, but probably not as intended.
    Warning,
}

/// A problem found by [`GatewayConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigIssue {
    /// Severity.
    pub level: IssueLevel,
    /// Offending field, as a dotted path.
    pub field: String,
    /// What is wrong.
    pub message: String,
}

impl ConfigIssue {
    fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Warning,
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether this issue prevents the gateway from starting.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self.level, IssueLevel::Error)
    }
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self.level {
            IssueLevel::Error => "error",
            IssueLevel::Warning => "warning",
        };
        write!(f, "{level}: {}: {}", self.field, self.message)
    }
}

/// Load the configuration from the default path.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub async fn load_config() -> ConfigResult<GatewayConfig> {
    load_config_from(&config_path()).await
}

/// Load the configuration from `path`. A missing file yields the defaults.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub async fn load_config_from(path: &Path) -> ConfigResult<GatewayConfig> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => {
            debug!(path = %path.display(), "loading config");
            Ok(serde_json::from_str(&content)?)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, using defaults");
            Ok(GatewayConfig::default())
        }
        Err(e) => Err(e.into()),
    }
}

/// Save the configuration to the default path.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub async fn save_config(config: &GatewayConfig) -> ConfigResult<()> {
    save_config_to(config, &config_path()).await
}

/// Save the configuration to `path`, creating parent directories.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub async fn save_config_to(config: &GatewayConfig, path: &Path) -> ConfigResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let content = serde_json::to_string_pretty(config)?;
    tokio::fs::write(path, content).await?;
    Ok(())
}

/// Write a default configuration to `path` and create the sessions
/// directory.
///
/// # Errors
///
/// Returns an error if a file or directory cannot be created.
pub async fn init_config(path: &Path) -> ConfigResult<GatewayConfig> {
    let config = GatewayConfig::default();
    save_config_to(&config, path).await?;
    tokio::fs::create_dir_all(&config.sessions.path).await?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_partial_document() {
        let config: GatewayConfig = serde_json::from_str(
            r#"{ "server": { "port": 8080 }, "driver": { "kind": "process", "command": "bridge" } }"#,
        )
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(
            config.driver,
            DriverConfig::Process {
                command: "bridge".to_string(),
                args: Vec::new(),
                request_timeout_secs: 30,
            }
        );
        assert!(config.sessions.recover);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = GatewayConfig::default();
        config
            .apply_env_with(env(&[
                (ENV_PORT, "4000"),
                (ENV_API_KEY, "secret"),
                (ENV_SESSIONS_PATH, "/srv/sessions"),
                (ENV_RECOVER_SESSIONS, "false"),
            ]))
            .unwrap();
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.server.api_key.as_deref(), Some("secret"));
        assert_eq!(config.sessions.path, PathBuf::from("/srv/sessions"));
        assert!(!config.sessions.recover);

        let err = config.apply_env_with(env(&[(ENV_PORT, "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_manager_config_mapping() {
        let mut config = GatewayConfig::default();
        config.sessions.timeouts.ready_secs = 5;
        config.sessions.persist_credentials = false;
        let manager = config.manager_config();
        assert_eq!(manager.ready_timeout, Duration::from_secs(5));
        assert!(!manager.persist_credentials);
        assert_eq!(manager.sessions_root, config.sessions.path);
    }

    #[test]
    fn test_validate() {
        let mut config = GatewayConfig::default();
        config.server.api_key = Some("k".to_string());
        assert!(config.validate().is_empty());

        config.server.port = 0;
        config.webhook.base_url = Some("ftp://example.com".to_string());
        config.driver = DriverConfig::Process {
            command: " ".to_string(),
            args: Vec::new(),
            request_timeout_secs: 30,
        };
        let errors: Vec<String> = config
            .validate()
            .into_iter()
            .filter(ConfigIssue::is_error)
            .map(|issue| issue.field)
            .collect();
        assert_eq!(errors, ["server.port", "driver.command", "webhook.baseUrl"]);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let mut config = GatewayConfig::default();
        config.webhook.disabled_callbacks = vec!["message_ack".to_string()];
        save_config_to(&config, &path).await.unwrap();

        let loaded = load_config_from(&path).await.unwrap();
        assert_eq!(loaded, config);
        assert!(!loaded.webhook.is_enabled("message_ack"));
        assert!(loaded.webhook.is_enabled("qr"));
    }

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_config_from(&dir.path().join("absent.json")).await.unwrap();
        assert_eq!(loaded, GatewayConfig::default());
    }
}

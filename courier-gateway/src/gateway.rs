//! Gateway service.
//!
//! The gateway wires the pieces of a running deployment together:
//! - Client driver and session manager
//! - Webhook dispatcher
//! - Session recovery on start-up
//! - HTTP API, served until shutdown, after which every session is deleted

use crate::api::{AppState, router};
use crate::config::GatewayConfig;
use crate::driver::build_factory;
use crate::error::Result;
use crate::webhook::WebhookDispatcher;
use axum::Router;
use courier::client::ClientFactory;
use courier::session::{SessionManager, SessionSummary};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// The gateway service.
pub struct Gateway {
    config: GatewayConfig,
    manager: SessionManager,
    running: Arc<RwLock<bool>>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("config", &self.config)
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Create a gateway using the driver named in `config`.
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        let factory = build_factory(&config.driver);
        Self::with_factory(config, factory)
    }

    /// Create a gateway with an explicit client factory.
    #[must_use]
    pub fn with_factory(config: GatewayConfig, factory: Arc<dyn ClientFactory>) -> Self {
        let manager = SessionManager::from_arc(factory, config.manager_config());
        Self {
            config,
            manager,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Create a builder.
    #[must_use]
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    /// Gateway configuration.
    #[must_use]
    pub const fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Session manager.
    #[must_use]
    pub const fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// HTTP router bound to this gateway's manager.
    #[must_use]
    pub fn router(&self) -> Router {
        router(AppState::new(self.manager.clone(), self.config.clone()))
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound or the server fails.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on `listener` until `shutdown` resolves, then delete every
    /// session.
    ///
    /// # Errors
    ///
    /// Returns an error if the sessions directory cannot be created or the
    /// server fails.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        *self.running.write().await = true;
        info!("gateway starting");

        tokio::fs::create_dir_all(&self.config.sessions.path).await?;

        let webhook = WebhookDispatcher::from_config(
            &self.config.webhook,
            self.config.server.api_key.clone(),
        )?
        .map(|dispatcher| dispatcher.start(self.manager.subscribe()));
        if webhook.is_none() {
            info!("no webhook configured, events are not forwarded");
        }

        if self.config.sessions.recover {
            match self.manager.recover().await {
                Ok(ids) => info!(count = ids.len(), "sessions recovered"),
                Err(e) => warn!(error = %e, "session recovery failed"),
            }
        }

        let addr = listener.local_addr()?;
        info!(%addr, "gateway listening");
        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await;

        info!("gateway stopping");
        let report = self.manager.shutdown().await;
        for failure in &report.failed {
            error!(session_id = %failure.id, reason = %failure.reason, "session not cleaned up");
        }
        if let Some(webhook) = webhook {
            webhook.stop().await;
        }
        *self.running.write().await = false;
        info!(deleted = report.deleted.len(), "gateway stopped");

        result.map_err(Into::into)
    }

    /// Whether the gateway is serving.
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Current gateway status.
    pub async fn status(&self) -> GatewayStatus {
        GatewayStatus {
            running: *self.running.read().await,
            bind_addr: self.config.bind_addr(),
            webhook: self.config.webhook.base_url.clone(),
            sessions: self.manager.list().await,
        }
    }
}

/// Gateway status information.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStatus {
    /// Whether the gateway is serving.
    pub running: bool,
    /// Listen address.
    pub bind_addr: String,
    /// Webhook base URL, if any.
    pub webhook: Option<String>,
    /// Current sessions.
    pub sessions: Vec<SessionSummary>,
}

/// Builder for creating a [`Gateway`].
#[derive(Default)]
pub struct GatewayBuilder {
    config: GatewayConfig,
    factory: Option<Arc<dyn ClientFactory>>,
}

impl std::fmt::Debug for GatewayBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayBuilder")
            .field("config", &self.config)
            .field("factory", &self.factory.is_some())
            .finish()
    }
}

impl GatewayBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration.
    #[must_use]
    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `factory` instead of the configured driver.
    #[must_use]
    pub fn factory(mut self, factory: impl ClientFactory + 'static) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Build the gateway.
    #[must_use]
    pub fn build(self) -> Gateway {
        match self.factory {
            Some(factory) => Gateway::with_factory(self.config, factory),
            None => Gateway::new(self.config),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier::memory::MemoryClientFactory;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn test_config(dir: &std::path::Path) -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.sessions.path = dir.to_path_buf();
        config.sessions.recover = false;
        config
    }

    #[tokio::test]
    async fn test_serve_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let factory = MemoryClientFactory::auto_ready();
        let gateway = Arc::new(
            Gateway::builder()
                .config(test_config(dir.path()))
                .factory(factory.clone())
                .build(),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = {
            let gateway = Arc::clone(&gateway);
            tokio::spawn(async move {
                gateway
                    .serve(listener, async {
                        let _ = stop_rx.await;
                    })
                    .await
            })
        };

        let body: serde_json::Value = reqwest::get(format!("http://{addr}/ping"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["message"], "pong");
        assert!(gateway.is_running().await);

        let body: serde_json::Value = reqwest::get(format!("http://{addr}/api/startSession/alice"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(gateway.status().await.sessions.len(), 1);

        stop_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(10), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert!(!gateway.is_running().await);
        assert!(gateway.manager().list().await.is_empty());
        let client = factory.client("alice").unwrap();
        assert_eq!(client.destroy_calls(), 1);
    }

    #[tokio::test]
    async fn test_recovers_stored_sessions() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("session-alice"))
            .await
            .unwrap();
        let mut config = test_config(dir.path());
        config.sessions.recover = true;

        let factory = MemoryClientFactory::auto_ready();
        let gateway = Gateway::builder()
            .config(config)
            .factory(factory.clone())
            .build();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        gateway.serve(listener, async {}).await.unwrap();

        assert_eq!(factory.created_count("alice"), 1);
        assert!(gateway.manager().list().await.is_empty());
    }

    #[tokio::test]
    async fn test_status_before_start() {
        let gateway = Gateway::new(GatewayConfig::default());
        let status = gateway.status().await;
        assert!(!status.running);
        assert_eq!(status.bind_addr, "0.0.0.0:3000");
        assert!(status.sessions.is_empty());
    }
}

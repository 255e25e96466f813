//! Webhook dispatcher.
//!
//! Posts every session event to the configured base URL as
//! `{ "sessionId", "dataType", "data" }`. Delivery is best-effort: failures
//! are logged and the event is dropped.

use crate::api::API_KEY_HEADER;
use crate::config::WebhookConfig;
use crate::error::Result;
use courier::events::SessionEvent;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Callback body for a session event.
#[must_use]
pub fn payload(event: &SessionEvent) -> Value {
    json!({
        "sessionId": event.session_id,
        "dataType": event.event.kind(),
        "data": event.event.data(),
    })
}

/// Delivers session events to a webhook.
#[derive(Debug, Clone)]
pub struct WebhookDispatcher {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    config: WebhookConfig,
}

impl WebhookDispatcher {
    /// Create a dispatcher posting to `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, api_key: Option<String>, config: WebhookConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            api_key,
            config,
        })
    }

    /// Create a dispatcher from configuration, if a base URL is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &WebhookConfig, api_key: Option<String>) -> Result<Option<Self>> {
        config
            .base_url
            .as_ref()
            .map(|url| Self::new(url.clone(), api_key, config.clone()))
            .transpose()
    }

    /// Whether `event` passes the callback filter.
    #[must_use]
    pub fn accepts(&self, event: &SessionEvent) -> bool {
        self.config.is_enabled(event.event.kind())
    }

    /// Post one event.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the receiver answers with an
    /// error status.
    pub async fn deliver(&self, event: &SessionEvent) -> Result<()> {
        let mut request = self.client.post(&self.url).json(&payload(event));
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }
        request.send().await?.error_for_status()?;
        debug!(session_id = %event.session_id, data_type = event.event.kind(), "webhook delivered");
        Ok(())
    }

    /// Forward events from `events` until stopped or the channel closes.
    #[must_use]
    pub fn start(self, mut events: broadcast::Receiver<SessionEvent>) -> WebhookHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            info!(url = %self.url, "webhook dispatcher started");
            loop {
                tokio::select! {
                    received = events.recv() => match received {
                        Ok(event) if self.accepts(&event) => {
                            if let Err(e) = self.deliver(&event).await {
                                warn!(
                                    session_id = %event.session_id,
                                    data_type = event.event.kind(),
                                    error = %e,
                                    "webhook delivery failed"
                                );
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "webhook dispatcher lagging, events dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = shutdown_rx.recv() => break,
                }
            }
            info!("webhook dispatcher stopped");
        });

        WebhookHandle { shutdown_tx }
    }
}

/// Handle to a running dispatcher.
#[derive(Debug, Clone)]
pub struct WebhookHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl WebhookHandle {
    /// Stop the dispatcher.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

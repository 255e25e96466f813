//! Courier Gateway - HTTP front end for multi-tenant messaging sessions.
//!
//! Serves the `courier` session manager over a small JSON API, forwards
//! client events to a webhook, and recovers stored sessions on start-up.
//!
//! # Architecture
//!
//! - **API** ([`api`]) - Routes, API-key guard and response shapes
//! - **Driver** ([`driver`]) - Client factories: in-memory or bridge process
//! - **Webhook** ([`webhook`]) - Event forwarding to an external service
//! - **Gateway** ([`gateway`]) - Wiring and graceful shutdown
//! - **Config** ([`config`]) - File and environment configuration
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use courier_gateway::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = load_config().await?;
//!     let gateway = Gateway::new(config);
//!     gateway.run(async { let _ = tokio::signal::ctrl_c().await; }).await
//! }
//! ```

pub mod api;
pub mod config;
pub mod driver;
pub mod error;
pub mod gateway;
pub mod webhook;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{
        ApiError, ApiResult, ConfigError, ConfigResult, ErrorContext, GatewayError, Result,
    };

    pub use crate::api::{API_KEY_HEADER, AppState, router};

    pub use crate::config::{
        ConfigIssue, DriverConfig, GatewayConfig, IssueLevel, ServerConfig, SessionsConfig,
        TimeoutsConfig, WebhookConfig, config_dir, config_path, init_config, load_config,
        load_config_from, save_config,
    };

    pub use crate::driver::{ProcessClient, ProcessClientFactory, ProcessConfig, build_factory};

    pub use crate::gateway::{Gateway, GatewayBuilder, GatewayStatus};

    pub use crate::webhook::{WebhookDispatcher, WebhookHandle};
}

//! Courier - session lifecycle orchestration for multi-tenant messaging
//! gateways.
//!
//! Each tenant owns one long-lived session backed by an external messaging
//! client. This crate keeps those sessions isolated by identifier and drives
//! them through their lifecycle.
//!
//! # Architecture
//!
//! - **Session** ([`session`]) - Registry, handles and the lifecycle manager
//! - **Client** ([`client`]) - Adapter trait over the external client
//! - **Poller** ([`poller`]) - Deadline-bounded readiness polling
//! - **Events** ([`events`]) - Client lifecycle events and their fan-out
//! - **Memory** ([`memory`]) - In-memory client for tests and demos
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use courier::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> SessionResult<()> {
//!     let manager = SessionManager::new(MemoryClientFactory::auto_ready());
//!     let outcome = manager.create("alice").await?;
//!     outcome.readiness.wait().await?;
//!     manager.call("alice", ClientRequest::GetChats).await?;
//!     manager.delete("alice", false).await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
pub mod events;
pub mod id;
pub mod memory;
pub mod poller;
pub mod session;
pub mod status;
pub mod util;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::client::{
        AuthStrategy, ClientFactory, ClientRequest, DestroyOptions, InitContext, MediaPayload,
        MessageContent, MessagingClient, session_dir, stored_sessions,
    };
    pub use crate::error::{AdapterError, AdapterResult, SessionError, SessionResult};
    pub use crate::events::{ClientEvent, EventSender, SessionEvent, event_channel};
    pub use crate::id::SessionId;
    pub use crate::memory::{DestroyBehavior, MemoryClient, MemoryClientFactory};
    pub use crate::poller::{PollOptions, Probe, wait_for_nested, wait_until};
    pub use crate::session::{
        CreateOutcome, DeleteOutcome, FlushFailure, FlushReport, ManagerConfig, Readiness,
        SessionHandle, SessionManager, SessionRegistry, SessionSummary,
    };
    pub use crate::status::SessionStatus;
}

//! Session lifecycle orchestration.
//!
//! A [`SessionHandle`] tracks one tenant session, the [`SessionRegistry`]
//! indexes handles by identifier, and the [`SessionManager`] drives them
//! through create, validate, delete and flush.

mod config;
mod handle;
mod manager;
mod registry;

pub use config::{
    DEFAULT_BOOTSTRAP_PATH, DEFAULT_BOOTSTRAP_TIMEOUT, DEFAULT_READY_TIMEOUT, ManagerConfig,
};
pub use handle::{SessionHandle, SessionSummary};
pub use manager::{
    CreateOutcome, DeleteOutcome, EVENT_CHANNEL_CAPACITY, FlushFailure, FlushReport, Readiness,
    SessionManager,
};
pub use registry::{IdGuard, SessionRegistry};

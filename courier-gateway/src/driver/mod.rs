//! Messaging client drivers.
//!
//! A driver is a [`ClientFactory`] chosen by configuration: the in-memory
//! client from `courier`, or a bridge process per session.

pub mod process;

pub use process::{ProcessClient, ProcessClientFactory, ProcessConfig};

use crate::config::DriverConfig;
use courier::client::ClientFactory;
use courier::events::ClientEvent;
use courier::memory::MemoryClientFactory;
use std::sync::Arc;
use std::time::Duration;

/// QR payload shown by the in-memory driver when it is not auto-ready.
pub const MEMORY_QR_CODE: &str = "courier-memory-session";

/// Build the client factory selected by `config`.
#[must_use]
pub fn build_factory(config: &DriverConfig) -> Arc<dyn ClientFactory> {
    match config {
        DriverConfig::Memory { auto_ready: true } => {
            Arc::new(MemoryClientFactory::auto_ready().without_tracking())
        }
        DriverConfig::Memory { auto_ready: false } => Arc::new(
            MemoryClientFactory::with_script(vec![ClientEvent::Qr {
                code: MEMORY_QR_CODE.to_string(),
            }])
            .without_tracking(),
        ),
        DriverConfig::Process {
            command,
            args,
            request_timeout_secs,
        } => {
            let config = ProcessConfig {
                command: command.clone(),
                args: args.clone(),
                request_timeout: Duration::from_secs(*request_timeout_secs),
            };
            Arc::new(ProcessClientFactory::new(config))
        }
    }
}

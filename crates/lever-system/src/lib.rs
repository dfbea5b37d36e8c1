//! Lever Registry
//!
//! Owns every lever connection on behalf of the control thread:
//! - One background worker thread performs all serial I/O
//! - Commands travel down through a single-slot mailbox per lever
//! - State reports travel up through one shared bounded queue
//!
//! The control thread calls [`LeverRegistry::update`] once per tick and
//! never blocks on hardware.

mod config;
mod message;
mod registry;
mod worker;

pub use config::RegistryConfig;
pub use message::{LeverCommand, LeverHandle, LeverReport};
pub use registry::{LeverRegistry, REPORT_QUEUE_CAPACITY};
pub use worker::LeverWorker;

pub use lever_protocol::{Direction, LeverState};

use thiserror::Error;

/// Outcome code carried by a port status report
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortOpenError {
    #[error("Failed to open serial port {port}: {reason}")]
    FailedToOpen { port: String, reason: String },
}

/// Registry lifecycle errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Lever registry is already initialized with {0} levers")]
    AlreadyInitialized(usize),

    #[error("Failed to spawn lever worker thread: {0}")]
    WorkerSpawn(#[source] std::io::Error),
}

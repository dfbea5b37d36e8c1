//! Lever Rig
//!
//! Task-thread control loop tying the lever stack together:
//! - Loads configuration and installs logging
//! - Owns the lever registry and drives it once per control tick
//! - Detects pulls on every lever and runs scheduled automated pulls

pub mod config;
mod rig;

pub use self::config::{LeverConfig, LogConfig, RigConfig, TransportKind};
pub use rig::{Rig, RunSummary};

use lever_protocol::{MockTransport, SerialPortTransport, SerialTransport};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Rig error types
#[derive(Error, Debug)]
pub enum RigError {
    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Lever registry error: {0}")]
    Registry(#[from] lever_system::RegistryError),

    #[error("Serial port error: {0}")]
    Ports(#[from] lever_protocol::ProtocolError),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Install the global tracing subscriber
pub fn init_logging(config: &LogConfig) -> Result<(), RigError> {
    let level = Level::from_str(&config.level)
        .map_err(|e| RigError::Logging(format!("bad level {:?}: {}", config.level, e)))?;

    let installed = if config.json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(true)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)
    };

    installed.map_err(|e| RigError::Logging(e.to_string()))
}

/// Transport selected by the configuration
pub fn transport_for(kind: TransportKind) -> Arc<dyn SerialTransport> {
    match kind {
        TransportKind::Serial => Arc::new(SerialPortTransport),
        TransportKind::Mock => Arc::new(MockTransport::new()),
    }
}

/// Run the control loop until the configured duration elapses
pub fn run(config: RigConfig) -> Result<RunSummary, RigError> {
    let transport = transport_for(config.transport);
    let period = config.control_period();
    let duration = config.duration();

    let mut rig = Rig::new(config, transport);
    rig.start()?;

    let started = Instant::now();
    loop {
        let now = Instant::now();
        if duration.map_or(false, |d| now.duration_since(started) >= d) {
            break;
        }

        rig.tick(now);

        let spent = now.elapsed();
        if spent < period {
            std::thread::sleep(period - spent);
        }
    }

    let summary = rig.shutdown();
    info!("Rig stopped after {:?}", started.elapsed());
    Ok(summary)
}

//! Lever Rig - Main Entry Point
//!
//! Usage: `lever-rig [config.toml]` or `lever-rig --list-ports`

use rig::config::CONFIG_PATH_ENV;
use rig::{init_logging, run, RigConfig};
use std::path::PathBuf;
use tracing::info;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let arg = std::env::args().nth(1);

    if arg.as_deref() == Some("--list-ports") {
        let ports = lever_protocol::list_ports()?;
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    let path = arg
        .map(PathBuf::from)
        .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));
    let config = RigConfig::load(path.as_deref())?;
    init_logging(&config.log)?;

    info!("=== Lever Rig v{} ===", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &path {
        info!("Config: {}", path.display());
    }

    let summary = run(config)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}

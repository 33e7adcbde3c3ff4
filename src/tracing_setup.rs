//! Diagnostic tracing initialization.
//!
//! `RUST_LOG` wins when set; otherwise the filter comes from
//! `application.log_level`. Diagnostics go to stderr and are separate from the
//! operator log file.

use crate::config::Settings;
use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber.
///
/// Fails if a subscriber is already installed.
pub fn init_from_config(settings: &Settings) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.application.log_level))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {e}"))?;

    tracing::debug!(level = %settings.application.log_level, "Tracing initialized");
    Ok(())
}

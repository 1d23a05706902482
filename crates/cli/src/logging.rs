//! Logging and tracing utilities.

use cometgate_config::GateConfig;
use eyre::{Context, Result};

/// Initialize the tracing subscriber for logging.
///
/// # Arguments
///
/// * `level` - The log level string (trace, debug, info, warn, error)
///
/// # Errors
///
/// Returns an error if the tracing subscriber cannot be initialized.
pub fn init_tracing(level: &str) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new("info"))
        .wrap_err("failed to create log filter")?;

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    Ok(())
}

/// Logs a configuration summary at startup.
#[derive(Debug, Default, Clone, Copy)]
pub struct Logger;

impl Logger {
    /// Create a new Logger instance.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Log a summary of the configuration at startup.
    pub fn log(&self, config: &GateConfig) {
        info!(
            host = %config.server.host,
            port = config.server.port,
            "Server configuration"
        );

        info!(
            health_check_interval_ms = config.proxy.health_check_interval_ms,
            registry_update_interval_ms = config.proxy.registry_update_interval_ms,
            sync_threshold_blocks = config.proxy.sync_threshold_blocks,
            retry_attempts = config.proxy.retry_attempts,
            "Proxy configuration"
        );

        info!(count = config.chains.len(), "Chains configured");

        for chain in &config.chains {
            debug!(
                name = %chain.name,
                display_name = %chain.display_name,
                registry_url = %chain.registry_url,
                base_prefix = %chain.base_prefix,
                archive_prefix = %chain.archive_prefix,
                "Chain"
            );
        }

        if config.metrics.enabled {
            info!(
                host = %config.metrics.host,
                port = config.metrics.port,
                "Metrics enabled"
            );
        }
    }
}

//! Application builder: configuration in, router and manager out.

use std::sync::Arc;

use cometgate_chain::ChainManager;
use cometgate_config::GateConfig;
use cometgate_server::{Router, create_router};
use eyre::{Context, Result};

/// Builds the multi-chain manager and HTTP router from configuration.
///
/// # Example
///
/// ```ignore
/// use cometgate_cli::AppBuilder;
/// use cometgate_config::GateConfig;
///
/// let config = GateConfig::from_file("cometgate.toml".as_ref())?;
/// let (app, manager) = AppBuilder::new().build(&config).await?;
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct AppBuilder;

impl AppBuilder {
    /// Create a new application builder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Build the application:
    /// 1. Initialize every configured chain in parallel
    /// 2. Create the HTTP router over the manager
    ///
    /// # Errors
    ///
    /// Returns an error if any chain fails to initialize.
    pub async fn build(self, config: &GateConfig) -> Result<(Router, Arc<ChainManager>)> {
        let manager = Arc::new(
            ChainManager::start(config).await.wrap_err("failed to initialize chains")?,
        );
        debug!(chains = manager.chains().len(), "Created chain manager");

        let app = create_router(Arc::clone(&manager));
        Ok((app, manager))
    }
}

/// Build the application with default settings.
///
/// This is a convenience function that creates an [`AppBuilder`] and builds
/// the application.
///
/// # Errors
///
/// Returns an error if any chain fails to initialize.
pub async fn build_app(config: &GateConfig) -> Result<(Router, Arc<ChainManager>)> {
    AppBuilder::new().build(config).await
}

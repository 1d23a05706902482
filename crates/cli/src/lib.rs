#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/cometgate/cometgate/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]

#[macro_use]
extern crate tracing;

// Used by the binary target only.
use clap as _;

use std::path::Path;

use eyre::Result;

mod builder;
pub use builder::{AppBuilder, build_app};

mod logging;
pub use logging::{Logger, init_tracing};

mod server;
pub use server::run_server;

/// Load the configuration, build the application, and run it to completion.
///
/// # Errors
///
/// Returns an error when the configuration is invalid, any chain fails to
/// initialize, or the server fails to bind.
pub async fn run(config_path: &Path, log_level: &str) -> Result<()> {
    init_tracing(log_level)?;

    let config = cometgate_config::GateConfig::from_file(config_path)?;
    Logger::new().log(&config);

    let (app, manager) = AppBuilder::new().build(&config).await?;
    run_server(app, manager, &config).await
}

//! The `cometgate` binary.

use std::path::PathBuf;

use clap::Parser;

/// Multi-chain reverse proxy and load balancer for CometBFT RPC endpoints.
#[derive(Debug, Parser)]
#[command(name = "cometgate", version, about)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "cometgate.toml")]
    config: PathBuf,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = Args::parse();
    cometgate_cli::run(&args.config, &args.log_level).await
}

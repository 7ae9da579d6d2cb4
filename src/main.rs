//! Site server entry point.
//!
//! ```text
//! ciso-site [--config site.toml]
//!     → load + validate config (file, then environment)
//!     → init tracing
//!     → lifecycle::startup (metrics, pipeline, listener, signals)
//! ```

use std::path::PathBuf;

use clap::Parser;

use ciso_site::config::load_config;
use ciso_site::lifecycle::startup;
use ciso_site::observability::logging::init_tracing;

#[derive(Parser)]
#[command(name = "ciso-site")]
#[command(about = "Consulting site backend with request defense", long_about = None)]
struct Args {
    /// TOML configuration file. Defaults plus environment overrides when omitted.
    #[arg(short, long, env = "SITE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    init_tracing(&config.observability, config.environment);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "ciso-site starting");

    startup::start(config).await?;
    Ok(())
}

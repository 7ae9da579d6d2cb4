//! Startup orchestration.
//!
//! # Responsibilities
//! - Start the metrics exporter when enabled
//! - Bind the listener, build the server, install signal handling
//! - Serve until a shutdown signal arrives
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listener binds last, after every subsystem is built

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::SiteConfig;
use crate::http::SiteServer;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::spawn_signal_handler;
use crate::observability::metrics;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid metrics address '{0}'")]
    MetricsAddress(String),
}

/// Run the site until SIGINT/SIGTERM.
pub async fn start(config: SiteConfig) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        let addr: SocketAddr = config
            .observability
            .metrics_address
            .parse()
            .map_err(|_| StartupError::MetricsAddress(config.observability.metrics_address.clone()))?;
        metrics::init_metrics(addr);
    }

    tracing::info!(
        bind_address = %config.listener.bind_address,
        limiters = config.rate_limit.limiters.len(),
        shared_counters = config.rate_limit.redis_url.is_some(),
        admin = config.admin.enabled,
        "Configuration loaded"
    );

    let server = SiteServer::new(config);
    let listener = TcpListener::bind(&server.config().listener.bind_address).await?;

    let shutdown = Arc::new(Shutdown::new());
    spawn_signal_handler(shutdown.clone());

    server.run(listener, &shutdown).await?;
    tracing::info!("Shutdown complete");
    Ok(())
}

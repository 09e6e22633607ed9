//! framed-lookup server
//!
//! Serves currency lookups (or echoes requests back) as JSON messages over
//! TCP, Unix domain sockets or TLS.
//!
//! Features:
//! - Self-delimiting or terminator-based message framing
//! - Idle deadlines per connection
//! - Backoff on transient accept failures
//! - Configuration via CLI arguments or TOML file

use framed_lookup::config::{Config, ServiceKind};
use framed_lookup::currency::{CurrencyHandler, Dataset};
use framed_lookup::{tls, EchoHandler, RequestHandler, Server};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        network = %config.network,
        service = ?config.service,
        framing = ?config.framing_mode,
        tls = config.tls_enabled(),
        first_deadline_secs = config.first_deadline_secs,
        idle_deadline_secs = config.idle_deadline_secs,
        "Starting framed-lookup server"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.enable_all().build()?;

    runtime.block_on(run(config))
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    match config.service {
        ServiceKind::Currency => {
            let dataset = Dataset::load(&config.data)?;
            info!(records = dataset.len(), data = %config.data.display(), "Currency data loaded");
            serve(&config, CurrencyHandler::new(Arc::new(dataset))).await
        }
        ServiceKind::Echo => serve(&config, EchoHandler).await,
    }
}

async fn serve<H: RequestHandler>(
    config: &Config,
    handler: H,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut server = Server::new(config.server_config()?, handler);

    if let (Some(cert), Some(key)) = (&config.tls_cert, &config.tls_key) {
        server = server.with_tls(tls::server_acceptor(cert, key)?);
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    };

    if let Err(e) = server.run_until(shutdown).await {
        error!(error = %e, "Server stopped");
        return Err(e.into());
    }
    Ok(())
}

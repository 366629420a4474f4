// lazarus-sw - Offline cache worker for the Lazarus note app
// Author: kelexine (https://github.com/kelexine)

use anyhow::Result;
use clap::Parser;
use lazarus_sw::cache;
use lazarus_sw::cli::Args;
use lazarus_sw::config::AppConfig;
use lazarus_sw::server::create_router;
use lazarus_sw::upstream::HttpUpstream;
use lazarus_sw::utils::logging;
use lazarus_sw::worker::{Registration, WorkerSettings, WriteBehind};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Phase 1: Load configuration
    let config = AppConfig::load(&args)?;

    // Phase 2: Initialize logging
    logging::init(&config.logging)?;
    info!("Starting lazarus-sw v{}", env!("CARGO_PKG_VERSION"));

    // Phase 3: Open cache storage and the upstream client
    let storage = cache::open_storage(&config.cache).await?;
    let fetcher = Arc::new(HttpUpstream::new(&config.upstream)?);
    info!("Proxying {}", fetcher.origin());

    let writes = WriteBehind::spawn(storage.clone(), config.cache.write_queue_capacity);
    let registration = Arc::new(Registration::new(
        storage,
        fetcher,
        writes,
        config.routing.clone(),
    ));

    // Phase 4: Register the configured version, keeping any previous one
    // in control until it activates
    let settings = WorkerSettings::from_config(&config);
    registration.resume_existing(&settings).await?;

    if let Err(e) = registration.update(settings.clone()).await {
        if config.lifecycle.retry_install {
            warn!("Install of {} failed ({}); retrying in the background", settings.version, e);
            registration.spawn_install_retry(settings);
        } else {
            warn!("Install of {} failed: {}", settings.version, e);
        }
    }

    // Phase 5: Build and start HTTP server
    let app = create_router(config.clone(), registration.clone())?;
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Phase 6: Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Phase 7: Apply cache writes still in flight
    let pending = registration.write_behind().pending();
    if pending > 0 {
        info!("Flushing {} pending cache writes", pending);
    }
    registration.write_behind().flush().await;

    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

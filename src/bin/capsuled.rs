//! capsuled - time capsule backend daemon
//!
//! Serves the capsule HTTP API and runs the outbox relay on its own thread.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use time_capsule::{
    http, CapsuleService, FsBlobStore, LogPublisher, OutboxRelay, OutboxRelayThread, SqliteStore,
};

#[derive(Parser, Debug, Clone)]
#[command(name = "capsuled")]
#[command(about = "Time capsule backend with a transactional outbox")]
struct Config {
    /// SQLite database file
    #[arg(long, env = "CAPSULE_DATABASE", default_value = "capsules.db")]
    database: PathBuf,

    /// Directory capsule content is written under
    #[arg(long, env = "CAPSULE_BLOB_DIR", default_value = "blobs")]
    blob_dir: PathBuf,

    /// Address to listen on
    #[arg(long, env = "CAPSULE_LISTEN", default_value = "0.0.0.0:8081")]
    listen: SocketAddr,

    /// Outbox polling interval in milliseconds
    #[arg(long, env = "CAPSULE_RELAY_INTERVAL_MS", default_value = "1000")]
    relay_interval_ms: u64,

    /// Pending events read per relay pass
    #[arg(long, env = "CAPSULE_RELAY_BATCH_SIZE", default_value = "100")]
    relay_batch_size: usize,

    /// Publish attempts before an event is marked failed
    #[arg(long, env = "CAPSULE_RELAY_MAX_ATTEMPTS", default_value = "5")]
    relay_max_attempts: u32,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::parse();
    if let Err(err) = run(config).await {
        error!("capsuled exited: {}", err);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        database = %config.database.display(),
        blob_dir = %config.blob_dir.display(),
        listen = %config.listen,
        "starting capsuled"
    );

    let store = SqliteStore::open(&config.database)?;
    let blobs = FsBlobStore::open(&config.blob_dir)?;

    let relay = OutboxRelay::new(LogPublisher::new())
        .with_batch_size(config.relay_batch_size)
        .with_max_attempts(config.relay_max_attempts);
    let relay_thread = OutboxRelayThread::spawn(
        store.clone(),
        relay,
        Duration::from_millis(config.relay_interval_ms),
    );

    let service = Arc::new(CapsuleService::new(store, blobs));
    let listener = TcpListener::bind(config.listen).await?;
    info!(addr = %config.listen, "listening");

    let served = http::serve_with_shutdown(listener, http::router(service), shutdown_signal()).await;

    let stats = relay_thread.stop();
    info!(
        published = stats.published,
        failed = stats.failed,
        store_errors = stats.store_errors,
        "relay drained"
    );
    served?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {}", err);
        return;
    }
    info!("shutdown signal received");
}

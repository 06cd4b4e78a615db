//! Spoolgate - streaming multipart upload gateway
//!
//! Classifies uploads by content type, spools them to disk and relays them
//! to S3-compatible object storage.

use clap::Parser;
use spoolgate::config::{Config, ConfigHandle};
use spoolgate::server::Server;
use spoolgate::store;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Spoolgate - streaming upload gateway for S3-compatible storage
#[derive(Parser, Debug)]
#[command(name = "spoolgate")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Spoolgate v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::load(&args.config)?;
    info!("Loaded configuration from {:?}", args.config);

    let handle = ConfigHandle::new(config);
    let store = store::from_config(&handle.current()).await?;

    // SIGHUP swaps in a fresh configuration snapshot without a restart
    #[cfg(unix)]
    spoolgate::config::spawn_reload_on_sighup(handle.clone(), args.config.clone());

    // Start server
    let server = Server::bind(handle, store).await?;
    server.run().await?;

    Ok(())
}

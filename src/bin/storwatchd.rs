//! storwatchd - removable storage watcher daemon
//!
//! Watches UDisks2 on the system bus, auto-mounts supported filesystems and posts
//! notifications on the session bus.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use storwatch::{Config, PostalNotifier, Reactor, StatvfsFreeSpace, StorageWatcher, UDisks2Bus};

#[derive(Debug, Parser)]
#[command(name = "storwatchd", version, about = "Removable storage watcher")]
struct Args {
    /// Configuration file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Filesystem type to auto-mount; repeat to allow several. Replaces the configured list.
    #[arg(long = "filesystem", value_name = "FS")]
    filesystems: Vec<String>,

    /// Log filter, overrides RUST_LOG
    #[arg(long)]
    log_filter: Option<String>,
}

fn init_logging(filter: Option<&str>) {
    let filter = match filter {
        Some(filter) => EnvFilter::new(filter),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("storwatch=info,warn")),
    };
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_filter.as_deref());

    tracing::info!("Starting storwatchd v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    if !args.filesystems.is_empty() {
        config.supported_filesystems = args.filesystems;
    }
    tracing::info!("Auto-mounting {:?}", config.supported_filesystems);

    let bus = UDisks2Bus::system()
        .await
        .context("Cannot connect to the system bus")?;
    let notifier = PostalNotifier::session(config.application.clone())
        .await
        .context("Cannot connect to the session bus")?;

    let watcher = StorageWatcher::new(Arc::new(bus), &config);
    let reactor = Reactor::spawn(
        &watcher,
        Arc::new(notifier),
        Arc::new(StatvfsFreeSpace::new()),
        &config,
    );

    watcher
        .init()
        .await
        .context("Cannot monitor storage devices")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for shutdown signal")?;
    tracing::info!("Shutting down");

    watcher.shutdown().await;
    reactor.shutdown().await;
    Ok(())
}

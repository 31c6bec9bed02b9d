use anyhow::{Context, Result};
use camwatch::db::Db;
use camwatch::store::{SqliteRecordStore, StatusStore};
use camwatch::{storage, Config, FileWatcher, Uploader, WatcherSettings};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "camwatch")]
#[command(about = "Watch a directory and upload new files to object storage")]
struct Args {
    /// Debounce delay in milliseconds (overrides DEBOUNCE_TIME / config)
    #[arg(long)]
    debounce_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load()?;
    if let Some(ms) = args.debounce_ms {
        config.watcher.debounce_ms = ms;
        config.validate()?;
    }

    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.watcher.log_level.as_str()),
    )
    .init();

    log::info!("camwatch v{} starting", env!("CARGO_PKG_VERSION"));
    log::info!("Configuration validated successfully");
    log::info!("Watch directory: {}", config.watch_dir().display());
    log::info!("Bucket: {}", config.storage.bucket);
    log::info!("Delete after upload: {}", config.watcher.delete_after_upload);

    let db = Db::new(config.db_path());
    let records = SqliteRecordStore::open(db)
        .await
        .with_context(|| format!("Failed to open record store at {}", config.db_path().display()))?;
    let status = StatusStore::new(Arc::new(records));

    let store = storage::from_config(&config.storage)?;
    let uploader = Uploader::new(store, config.watcher.delete_after_upload);

    let watcher = FileWatcher::new(WatcherSettings::from_config(&config), uploader, status);
    watcher.start()?;

    let mut stats_ticker = tokio::time::interval(Duration::from_secs(config.watcher.stats_interval_secs));
    // First tick completes immediately
    stats_ticker.tick().await;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = stats_ticker.tick() => watcher.log_summary(),
            _ = &mut shutdown => break,
        }
    }

    log::info!("Shutdown signal received");
    watcher.stop();
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

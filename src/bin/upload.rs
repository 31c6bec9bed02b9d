//! Upload files once, outside the watcher, and record their status.

use anyhow::{Context, Result};
use camwatch::db::Db;
use camwatch::store::{SqliteRecordStore, StatusStore};
use camwatch::upload::base_name;
use camwatch::{storage, Config, Uploader};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "upload")]
#[command(about = "Upload files to the configured bucket and mark them as uploaded")]
struct Args {
    /// Files to upload
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Skip writing upload records
    #[arg(long)]
    no_record: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load()?;

    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.watcher.log_level.as_str()),
    )
    .init();

    let status = if args.no_record {
        None
    } else {
        let records = SqliteRecordStore::open(Db::new(config.db_path()))
            .await
            .context("Failed to open record store")?;
        Some(StatusStore::new(Arc::new(records)))
    };

    let uploader = Uploader::new(storage::from_config(&config.storage)?, config.watcher.delete_after_upload);

    let mut failed = 0;
    for file in &args.files {
        let outcome = uploader.upload(file).await;
        if !outcome.success {
            failed += 1;
            println!(
                "FAILED  {}: {}",
                file.display(),
                outcome.error.as_deref().unwrap_or("unknown error")
            );
            continue;
        }

        if let Some(status) = &status {
            status
                .mark_uploaded(&base_name(file), &outcome.destination)
                .await
                .with_context(|| format!("Uploaded {} but could not record it", file.display()))?;
        }
        println!("OK      {} -> {}", file.display(), outcome.destination);
    }

    if failed > 0 {
        anyhow::bail!("{} of {} uploads failed", failed, args.files.len());
    }
    Ok(())
}

//! File watcher: upload every file that lands in the watched directory.
//!
//! Filesystem events go through a per-path debounce; when a timer fires the
//! file is uploaded and, on success, its status is recorded. A path that is
//! being uploaded ignores further events until the upload finishes.

mod debounce;
mod observer;

pub use debounce::DebounceScheduler;
pub use observer::{is_ignored, DirectoryObserver, StabilityConfig, WatchEvent};

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::{CamwatchError, Result};
use crate::store::StatusStore;
use crate::upload::{base_name, UploadOutcome, Uploader};

/// Coordinator settings
#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub watch_dir: PathBuf,
    pub debounce: Duration,
    pub stability: StabilityConfig,
}

impl WatcherSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            watch_dir: config.watch_dir().to_path_buf(),
            debounce: config.debounce(),
            stability: StabilityConfig {
                threshold: config.stability_threshold(),
                poll_interval: config.poll_interval(),
            },
        }
    }
}

/// Counters since the coordinator was created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherStats {
    pub files_processed: u64,
    pub files_uploaded: u64,
    pub files_failed: u64,
    pub start_time: DateTime<Utc>,
}

impl WatcherStats {
    fn new() -> Self {
        Self {
            files_processed: 0,
            files_uploaded: 0,
            files_failed: 0,
            start_time: Utc::now(),
        }
    }

    pub fn uptime(&self) -> chrono::Duration {
        Utc::now() - self.start_time
    }
}

/// What `process` did with a path
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    /// Uploaded and recorded
    Uploaded(UploadOutcome),
    /// The upload itself failed
    Failed(UploadOutcome),
    /// Another upload of the same path was still running
    Skipped,
}

/// State shared with timer callbacks and upload tasks
struct Shared {
    uploader: Uploader,
    status: StatusStore,
    in_flight: Mutex<HashSet<PathBuf>>,
    stats: Mutex<WatcherStats>,
}

/// Removes its path from the in-flight set when dropped, including on panic
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<PathBuf>>,
    path: PathBuf,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(set: &'a Mutex<HashSet<PathBuf>>, path: &Path) -> Option<Self> {
        if lock(set).insert(path.to_path_buf()) {
            Some(Self {
                set,
                path: path.to_path_buf(),
            })
        } else {
            None
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        lock(self.set).remove(&self.path);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn is_in_flight(&self, path: &Path) -> bool {
        lock(&self.in_flight).contains(path)
    }

    fn record(&self, f: impl FnOnce(&mut WatcherStats)) {
        f(&mut *lock(&self.stats));
    }

    async fn process(&self, path: &Path) -> Result<ProcessOutcome> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, path) else {
            log::debug!("Already processing {}, skipping", path.display());
            return Ok(ProcessOutcome::Skipped);
        };
        self.record(|s| s.files_processed += 1);

        let file_name = base_name(path);
        log::info!("Processing file: {}", file_name);

        let outcome = self.uploader.upload(path).await;
        if !outcome.success {
            self.record(|s| s.files_failed += 1);
            log::error!(
                "Upload failed for: {} ({})",
                file_name,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
            return Ok(ProcessOutcome::Failed(outcome));
        }

        self.record(|s| s.files_uploaded += 1);
        if let Err(e) = self.status.mark_uploaded(&file_name, &outcome.destination).await {
            self.record(|s| s.files_failed += 1);
            return Err(CamwatchError::StatusWrite {
                file_name,
                source: Box::new(e),
            });
        }

        log::info!("Upload successful: {}", outcome.destination);
        Ok(ProcessOutcome::Uploaded(outcome))
    }

    /// Run `process` on its own task so a panic is contained and counted
    fn dispatch(self: &Arc<Self>, path: PathBuf) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let worker = Arc::clone(&shared);
            let target = path.clone();
            let joined = tokio::spawn(async move { worker.process(&target).await }).await;
            match joined {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => log::error!("Error processing file {}: {}", base_name(&path), e),
                Err(e) => {
                    shared.record(|s| s.files_failed += 1);
                    log::error!("Error processing file {}: {}", base_name(&path), e);
                }
            }
        });
    }
}

/// Observer and event loop of a started watcher
struct Running {
    observer: Option<DirectoryObserver>,
    events: JoinHandle<()>,
}

/// Watches a directory and uploads each new file once
pub struct FileWatcher {
    settings: WatcherSettings,
    shared: Arc<Shared>,
    scheduler: Arc<DebounceScheduler>,
    running: Mutex<Option<Running>>,
}

impl FileWatcher {
    pub fn new(settings: WatcherSettings, uploader: Uploader, status: StatusStore) -> Self {
        let shared = Arc::new(Shared {
            uploader,
            status,
            in_flight: Mutex::new(HashSet::new()),
            stats: Mutex::new(WatcherStats::new()),
        });

        let on_fire = Arc::clone(&shared);
        let scheduler = Arc::new(DebounceScheduler::new(settings.debounce, move |path| {
            on_fire.dispatch(path);
        }));

        Self {
            settings,
            shared,
            scheduler,
            running: Mutex::new(None),
        }
    }

    /// Start observing the watch directory. Must be called inside a tokio runtime.
    pub fn start(&self) -> Result<()> {
        log::info!("Starting file watcher on directory: {}", self.settings.watch_dir.display());
        log::info!("Debounce time: {}ms", self.settings.debounce.as_millis());

        let (observer, events) = DirectoryObserver::spawn(&self.settings.watch_dir, self.settings.stability)?;
        self.attach(events, Some(observer))
    }

    /// Start on an externally supplied event stream instead of a directory observer
    pub fn start_with_events(&self, events: mpsc::UnboundedReceiver<WatchEvent>) -> Result<()> {
        self.attach(events, None)
    }

    fn attach(
        &self,
        mut events: mpsc::UnboundedReceiver<WatchEvent>,
        observer: Option<DirectoryObserver>,
    ) -> Result<()> {
        let mut running = lock(&self.running);
        if running.is_some() {
            return Err(CamwatchError::Watch("file watcher is already running".to_string()));
        }

        let shared = Arc::clone(&self.shared);
        let scheduler = Arc::clone(&self.scheduler);
        let events = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    WatchEvent::Added(path) => handle_new_file(&shared, &scheduler, &path),
                    WatchEvent::Error(e) => log::error!("Watcher error: {}", e),
                    WatchEvent::Ready => log::info!("File watcher is ready and scanning for files"),
                }
            }
            log::debug!("Watch event stream closed");
        });

        *running = Some(Running { observer, events });
        Ok(())
    }

    /// Feed a file event directly, as the observer would
    pub fn notify_added(&self, path: &Path) {
        handle_new_file(&self.shared, &self.scheduler, path);
    }

    /// Upload `path` now, bypassing the debounce
    pub async fn process(&self, path: &Path) -> Result<ProcessOutcome> {
        self.shared.process(path).await
    }

    /// Cancel pending timers, stop observing, log final statistics.
    /// Uploads already running are left to finish. No-op when not started.
    pub fn stop(&self) {
        let Some(running) = lock(&self.running).take() else {
            return;
        };
        log::info!("Stopping file watcher...");

        let cancelled = self.scheduler.cancel_all();
        if cancelled > 0 {
            log::debug!("Cancelled {} pending debounce timers", cancelled);
        }

        if let Some(observer) = running.observer {
            observer.close();
        }
        running.events.abort();

        self.log_stats();
    }

    pub fn is_running(&self) -> bool {
        lock(&self.running).is_some()
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> WatcherStats {
        lock(&self.shared.stats).clone()
    }

    pub fn is_processing(&self, path: &Path) -> bool {
        self.shared.is_in_flight(path)
    }

    pub fn pending_count(&self) -> usize {
        self.scheduler.pending_count()
    }

    /// One-line summary for periodic logging
    pub fn log_summary(&self) {
        let stats = self.stats();
        log::info!(
            "Stats - Processed: {}, Uploaded: {}, Failed: {}",
            stats.files_processed,
            stats.files_uploaded,
            stats.files_failed
        );
    }

    fn log_stats(&self) {
        let stats = self.stats();
        log::info!("=== Watcher Statistics ===");
        log::info!("Uptime: {}s", stats.uptime().num_seconds());
        log::info!("Files processed: {}", stats.files_processed);
        log::info!("Files uploaded: {}", stats.files_uploaded);
        log::info!("Files failed: {}", stats.files_failed);
        log::info!("=========================");
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.scheduler.cancel_all();
        if let Some(running) = lock(&self.running).take() {
            running.events.abort();
        }
    }
}

/// Events for a path that is uploading are dropped; otherwise (re)start its timer
fn handle_new_file(shared: &Shared, scheduler: &DebounceScheduler, path: &Path) {
    if shared.is_in_flight(path) {
        log::debug!("Ignoring event for {} while it uploads", path.display());
        return;
    }
    scheduler.notify(path);
}

//! End-to-end behaviour of the watcher with in-memory storage and records.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use camwatch::storage::{ObjectStore, PutObject};
use camwatch::store::{RecordStore, StatusStore, UploadRecord, UploadStatus};
use camwatch::watch::{ProcessOutcome, StabilityConfig, WatchEvent};
use camwatch::{CamwatchError, FileWatcher, Result, Uploader, WatcherSettings};
use chrono::{DateTime, Utc};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};

/// Object store that records calls; keys containing "bad" fail, "panic" panics
#[derive(Default)]
struct FakeStore {
    calls: Mutex<Vec<(String, Instant)>>,
    latency: Duration,
}

impl FakeStore {
    fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    fn keys(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(k, _)| k.clone()).collect()
    }

    fn times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    fn bucket(&self) -> &str {
        "test-bucket"
    }

    async fn put(&self, object: PutObject<'_>) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((object.key.to_string(), Instant::now()));
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
        if object.key.contains("panic") {
            panic!("storage client blew up");
        }
        if object.key.contains("bad") {
            return Err(CamwatchError::Storage("503 Service Unavailable".to_string()));
        }
        Ok(())
    }
}

/// Record store in memory; can be switched to reject writes
#[derive(Default)]
struct FakeRecords {
    records: Mutex<HashMap<String, UploadRecord>>,
    unreachable: AtomicBool,
}

#[async_trait]
impl RecordStore for FakeRecords {
    async fn upsert_uploaded(&self, file_name: &str, destination: &str, at: DateTime<Utc>) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(CamwatchError::Storage("record store unreachable".to_string()));
        }
        let mut records = self.records.lock().unwrap();
        let record = records.entry(file_name.to_string()).or_insert_with(|| UploadRecord {
            file_name: file_name.to_string(),
            destination: String::new(),
            status: UploadStatus::Uploaded,
            created_at: at,
            uploaded_at: at,
        });
        record.destination = destination.to_string();
        record.status = UploadStatus::Uploaded;
        record.uploaded_at = at;
        Ok(())
    }

    async fn find(&self, file_name: &str) -> Result<Option<UploadRecord>> {
        Ok(self.records.lock().unwrap().get(file_name).cloned())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<UploadRecord>> {
        let mut all: Vec<_> = self.records.lock().unwrap().values().cloned().collect();
        all.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        all.truncate(limit);
        Ok(all)
    }
}

struct Harness {
    dir: TempDir,
    store: Arc<FakeStore>,
    records: Arc<FakeRecords>,
    watcher: FileWatcher,
}

impl Harness {
    fn new(debounce: Duration, store: FakeStore) -> Self {
        Self::with_stability(debounce, store, StabilityConfig::default())
    }

    fn with_stability(debounce: Duration, store: FakeStore, stability: StabilityConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(store);
        let records = Arc::new(FakeRecords::default());
        let settings = WatcherSettings {
            watch_dir: dir.path().to_path_buf(),
            debounce,
            stability,
        };
        let uploader = Uploader::new(store.clone(), false);
        let status = StatusStore::new(records.clone());
        let watcher = FileWatcher::new(settings, uploader, status);
        Self {
            dir,
            store,
            records,
            watcher,
        }
    }

    fn file(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, b"camera bytes").unwrap();
        path
    }

    fn record_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.records.records.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

#[tokio::test(start_paused = true)]
async fn burst_of_events_triggers_one_upload_after_quiet_period() {
    let h = Harness::new(ms(2000), FakeStore::default());
    let file = h.file("a.jpg");
    let start = Instant::now();

    h.watcher.notify_added(&file);
    sleep(ms(100)).await;
    h.watcher.notify_added(&file);
    sleep(ms(1800)).await;
    h.watcher.notify_added(&file);

    sleep(ms(1999)).await;
    assert!(h.store.keys().is_empty(), "uploaded before the quiet period ended");

    sleep(ms(10)).await;
    assert_eq!(h.store.keys().len(), 1);
    let elapsed = h.store.times()[0] - start;
    assert!(elapsed >= ms(3900) && elapsed < ms(3905), "uploaded at {:?}", elapsed);

    let stats = h.watcher.stats();
    assert_eq!(stats.files_processed, 1);
    assert_eq!(stats.files_uploaded, 1);
    assert_eq!(stats.files_failed, 0);
    assert_eq!(h.record_names(), vec!["a.jpg".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn many_events_within_window_collapse() {
    let h = Harness::new(ms(100), FakeStore::default());
    let file = h.file("burst.jpg");

    for _ in 0..10 {
        h.watcher.notify_added(&file);
        sleep(ms(50)).await;
    }
    sleep(ms(200)).await;

    assert_eq!(h.store.keys().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn events_during_upload_are_dropped() {
    let h = Harness::new(ms(100), FakeStore::with_latency(ms(500)));
    let file = h.file("slow.mp4");

    h.watcher.notify_added(&file);
    sleep(ms(101)).await;
    assert!(h.watcher.is_processing(&file));

    h.watcher.notify_added(&file);
    assert_eq!(h.watcher.pending_count(), 0, "event during upload started a timer");

    sleep(ms(1000)).await;
    assert_eq!(h.store.keys().len(), 1);
    assert!(!h.watcher.is_processing(&file));

    // Once finished, the next event is processed normally
    h.watcher.notify_added(&file);
    sleep(ms(700)).await;
    assert_eq!(h.store.keys().len(), 2);
    assert_eq!(h.watcher.stats().files_uploaded, 2);
}

#[tokio::test(start_paused = true)]
async fn different_paths_upload_concurrently() {
    let h = Harness::new(ms(100), FakeStore::with_latency(ms(500)));
    let a = h.file("a.jpg");
    let b = h.file("b.jpg");

    h.watcher.notify_added(&a);
    h.watcher.notify_added(&b);
    sleep(ms(150)).await;
    assert!(h.watcher.is_processing(&a));
    assert!(h.watcher.is_processing(&b));

    sleep(ms(600)).await;
    assert_eq!(h.watcher.stats().files_uploaded, 2);
    assert_eq!(h.record_names(), vec!["a.jpg".to_string(), "b.jpg".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn failed_upload_does_not_block_other_files() {
    let h = Harness::new(ms(100), FakeStore::default());
    let bad = h.file("bad.jpg");
    let good = h.file("good.jpg");

    h.watcher.notify_added(&bad);
    h.watcher.notify_added(&good);
    sleep(ms(200)).await;

    let stats = h.watcher.stats();
    assert_eq!(stats.files_processed, 2);
    assert_eq!(stats.files_uploaded, 1);
    assert_eq!(stats.files_failed, 1);
    assert_eq!(h.record_names(), vec!["good.jpg".to_string()]);
    assert!(!h.watcher.is_processing(&bad));
}

#[tokio::test(start_paused = true)]
async fn panicking_upload_is_counted_as_failure() {
    let h = Harness::new(ms(100), FakeStore::default());
    let file = h.file("panic.jpg");
    let other = h.file("other.jpg");

    h.watcher.notify_added(&file);
    sleep(ms(200)).await;

    let stats = h.watcher.stats();
    assert_eq!(stats.files_processed, 1);
    assert_eq!(stats.files_uploaded, 0);
    assert_eq!(stats.files_failed, 1);
    assert!(!h.watcher.is_processing(&file));

    h.watcher.notify_added(&other);
    sleep(ms(200)).await;
    assert_eq!(h.watcher.stats().files_uploaded, 1);
}

#[tokio::test(start_paused = true)]
async fn missing_file_fails_without_touching_storage() {
    let h = Harness::new(ms(100), FakeStore::default());
    let ghost = h.dir.path().join("ghost.jpg");

    let outcome = h.watcher.process(&ghost).await.unwrap();
    match outcome {
        ProcessOutcome::Failed(outcome) => {
            assert!(!outcome.success);
            assert!(outcome.error.unwrap().contains("does not exist"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(h.store.keys().is_empty());
    assert_eq!(h.watcher.stats().files_failed, 1);
}

#[tokio::test]
async fn upload_failure_and_status_failure_are_distinct() {
    let h = Harness::new(ms(100), FakeStore::default());

    // Upload fails: reported as an outcome, nothing recorded
    let bad = h.file("bad.jpg");
    let result = h.watcher.process(&bad).await;
    assert!(matches!(result, Ok(ProcessOutcome::Failed(_))));

    // Upload succeeds but the record write fails: surfaced as an error
    h.records.unreachable.store(true, Ordering::SeqCst);
    let good = h.file("good.jpg");
    let result = h.watcher.process(&good).await;
    match result {
        Err(CamwatchError::StatusWrite { file_name, .. }) => assert_eq!(file_name, "good.jpg"),
        other => panic!("expected StatusWrite error, got {:?}", other),
    }
    assert!(h.store.keys().iter().any(|k| k.ends_with("/good.jpg")));
    assert!(!h.watcher.is_processing(&good));

    // The watcher keeps working once the store is back
    h.records.unreachable.store(false, Ordering::SeqCst);
    let result = h.watcher.process(&good).await;
    assert!(matches!(result, Ok(ProcessOutcome::Uploaded(_))));

    let stats = h.watcher.stats();
    assert_eq!(stats.files_processed, 3);
    assert_eq!(stats.files_uploaded, 2);
    assert_eq!(stats.files_failed, 2);
    assert_eq!(h.record_names(), vec!["good.jpg".to_string()]);
}

#[tokio::test]
async fn destination_is_date_partitioned() {
    let h = Harness::new(ms(100), FakeStore::default());
    let file = h.file("test.jpg");

    let outcome = match h.watcher.process(&file).await.unwrap() {
        ProcessOutcome::Uploaded(outcome) => outcome,
        other => panic!("expected upload, got {:?}", other),
    };

    let keys = h.store.keys();
    let parts: Vec<&str> = keys[0].split('/').collect();
    assert_eq!(parts.len(), 4, "unexpected key {}", keys[0]);
    assert_eq!(parts[0].len(), 4);
    assert_eq!(parts[1].len(), 2);
    assert_eq!(parts[2].len(), 2);
    assert!(parts[..3].iter().all(|p| p.chars().all(|c| c.is_ascii_digit())));
    assert_eq!(parts[3], "test.jpg");
    assert_eq!(outcome.destination, format!("gs://test-bucket/{}", keys[0]));

    let record = h.records.find("test.jpg").await.unwrap().unwrap();
    assert_eq!(record.destination, outcome.destination);
}

#[tokio::test(start_paused = true)]
async fn event_stream_drives_uploads_and_stop_cancels_pending() {
    let h = Harness::new(ms(100), FakeStore::default());
    let (tx, rx) = mpsc::unbounded_channel();
    h.watcher.start_with_events(rx).unwrap();

    let first = h.file("first.jpg");
    tx.send(WatchEvent::Ready).unwrap();
    tx.send(WatchEvent::Added(first.clone())).unwrap();
    tx.send(WatchEvent::Error("inotify queue overflow".to_string())).unwrap();
    sleep(ms(150)).await;
    assert_eq!(h.store.keys().len(), 1);

    let second = h.file("second.jpg");
    tx.send(WatchEvent::Added(second)).unwrap();
    sleep(ms(10)).await;
    assert_eq!(h.watcher.pending_count(), 1);

    h.watcher.stop();
    assert!(!h.watcher.is_running());
    assert_eq!(h.watcher.pending_count(), 0);

    sleep(ms(500)).await;
    assert_eq!(h.store.keys().len(), 1, "cancelled timer still fired");

    // Stopping again is harmless
    h.watcher.stop();
}

#[tokio::test(start_paused = true)]
async fn stop_lets_running_upload_finish() {
    let h = Harness::new(ms(100), FakeStore::with_latency(ms(500)));
    let (_tx, rx) = mpsc::unbounded_channel();
    h.watcher.start_with_events(rx).unwrap();

    let file = h.file("clip.avi");
    h.watcher.notify_added(&file);
    sleep(ms(150)).await;
    assert!(h.watcher.is_processing(&file));

    h.watcher.stop();
    sleep(ms(600)).await;

    assert!(!h.watcher.is_processing(&file));
    assert_eq!(h.watcher.stats().files_uploaded, 1);
    assert_eq!(h.record_names(), vec!["clip.avi".to_string()]);
}

#[tokio::test]
async fn observed_directory_skips_dotfiles() {
    let stability = StabilityConfig {
        threshold: ms(100),
        poll_interval: ms(20),
    };
    let h = Harness::with_stability(ms(50), FakeStore::default(), stability);
    h.file(".already-there.jpg");
    h.watcher.start().unwrap();

    h.file(".partial.jpg");
    h.file("shot.jpg");

    let deadline = Instant::now() + Duration::from_secs(10);
    while h.watcher.stats().files_uploaded == 0 && Instant::now() < deadline {
        sleep(ms(20)).await;
    }
    // Room for a stray dot-file upload to show up
    sleep(ms(500)).await;
    h.watcher.stop();

    let keys = h.store.keys();
    assert_eq!(keys.len(), 1, "uploaded {:?}", keys);
    assert!(keys[0].ends_with("/shot.jpg"));
    assert!(!h.record_names().iter().any(|n| n.starts_with('.')));
}

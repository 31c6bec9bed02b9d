//! Directory observer: notify + write-stability, as a stream of [`WatchEvent`]s.
//!
//! A file is reported as `Added` only after its size has stayed the same for
//! the stability threshold, so partially written uploads from the camera are
//! never picked up. Each file is reported once until it is removed again.

use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use walkdir::WalkDir;

use crate::error::{CamwatchError, Result};

/// Events delivered to the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A new file whose size is stable
    Added(PathBuf),
    Error(String),
    /// Initial scan of the directory finished
    Ready,
}

#[derive(Debug, Clone, Copy)]
pub struct StabilityConfig {
    pub threshold: Duration,
    pub poll_interval: Duration,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            threshold: Duration::from_millis(2000),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Raw notifications from the notify thread
#[derive(Debug, PartialEq, Eq)]
enum RawEvent {
    Touched(PathBuf),
    Removed(PathBuf),
    Failed(String),
}

/// Running observer. Dropping it (or calling `close`) stops the watch.
pub struct DirectoryObserver {
    watcher: Option<RecommendedWatcher>,
    task: JoinHandle<()>,
}

impl DirectoryObserver {
    /// Watch `root` (non-recursive) and return the event stream
    pub fn spawn(
        root: &Path,
        stability: StabilityConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<WatchEvent>)> {
        let root = root.to_path_buf();
        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<RawEvent>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<WatchEvent>();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(ev) => {
                    for raw in classify(ev) {
                        let _ = raw_tx.send(raw);
                    }
                }
                Err(e) => {
                    let _ = raw_tx.send(RawEvent::Failed(e.to_string()));
                }
            }
        })
        .map_err(|e| CamwatchError::Watch(e.to_string()))?;

        watcher
            .watch(&root, RecursiveMode::NonRecursive)
            .map_err(|e| CamwatchError::Watch(format!("{}: {}", root.display(), e)))?;

        let initial = scan_directory(&root);
        let task = tokio::spawn(stability_loop(root, initial, stability, raw_rx, event_tx));

        Ok((
            Self {
                watcher: Some(watcher),
                task,
            },
            event_rx,
        ))
    }

    /// Stop watching; pending (not yet stable) files are forgotten
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.watcher.take();
        self.task.abort();
    }
}

impl Drop for DirectoryObserver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for DirectoryObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryObserver")
            .field("active", &self.watcher.is_some())
            .finish()
    }
}

fn classify(event: notify::Event) -> Vec<RawEvent> {
    match event.kind {
        // Moving a file out of the root counts as removing it
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            event.paths.into_iter().map(RawEvent::Removed).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut paths = event.paths.into_iter();
            let mut raw = Vec::with_capacity(2);
            if let Some(from) = paths.next() {
                raw.push(RawEvent::Removed(from));
            }
            raw.extend(paths.map(RawEvent::Touched));
            raw
        }
        // Backends that can't tell the two sides of a rename apart
        EventKind::Modify(ModifyKind::Name(RenameMode::Any | RenameMode::Other)) => event
            .paths
            .into_iter()
            .map(|p| if p.exists() { RawEvent::Touched(p) } else { RawEvent::Removed(p) })
            .collect(),
        EventKind::Create(_) | EventKind::Modify(_) => {
            event.paths.into_iter().map(RawEvent::Touched).collect()
        }
        EventKind::Remove(_) => event.paths.into_iter().map(RawEvent::Removed).collect(),
        _ => Vec::new(),
    }
}

/// True if any component below `root` starts with a dot
pub fn is_ignored(root: &Path, path: &Path) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.components().any(|c| match c {
        Component::Normal(name) => name.to_string_lossy().starts_with('.'),
        _ => false,
    })
}

/// Regular, non-hidden files directly under `root`
fn scan_directory(root: &Path) -> Vec<PathBuf> {
    let files: Vec<PathBuf> = WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| !is_ignored(root, p))
        .collect();

    log::debug!("Initial scan found {} files in {}", files.len(), root.display());
    files
}

#[derive(Debug)]
struct Candidate {
    size: u64,
    stable_since: Instant,
}

/// Tracks files until their size settles
#[derive(Debug)]
struct StabilityTracker {
    root: PathBuf,
    threshold: Duration,
    candidates: HashMap<PathBuf, Option<Candidate>>,
    reported: HashSet<PathBuf>,
}

impl StabilityTracker {
    fn new(root: PathBuf, threshold: Duration) -> Self {
        Self {
            root,
            threshold,
            candidates: HashMap::new(),
            reported: HashSet::new(),
        }
    }

    fn touch(&mut self, path: PathBuf) {
        if path == self.root || is_ignored(&self.root, &path) || self.reported.contains(&path) {
            return;
        }
        // Size is sampled on the next poll
        self.candidates.entry(path).or_insert(None);
    }

    fn remove(&mut self, path: &Path) {
        self.candidates.remove(path);
        self.reported.remove(path);
    }

    /// Sample sizes; returns files that have been stable long enough
    async fn poll(&mut self, now: Instant) -> Vec<PathBuf> {
        let paths: Vec<PathBuf> = self.candidates.keys().cloned().collect();
        let mut ready = Vec::new();

        for path in paths {
            let size = match tokio::fs::metadata(&path).await {
                Ok(m) if m.is_file() => m.len(),
                _ => {
                    self.remove(&path);
                    continue;
                }
            };
            let Some(state) = self.candidates.get_mut(&path) else {
                continue;
            };
            match state {
                Some(candidate) if candidate.size == size => {
                    if now.duration_since(candidate.stable_since) >= self.threshold {
                        ready.push(path);
                    }
                }
                _ => {
                    *state = Some(Candidate {
                        size,
                        stable_since: now,
                    });
                }
            }
        }

        for path in &ready {
            self.candidates.remove(path);
            self.reported.insert(path.clone());
        }
        ready
    }
}

async fn stability_loop(
    root: PathBuf,
    initial: Vec<PathBuf>,
    stability: StabilityConfig,
    mut raw_rx: mpsc::UnboundedReceiver<RawEvent>,
    event_tx: mpsc::UnboundedSender<WatchEvent>,
) {
    let mut tracker = StabilityTracker::new(root, stability.threshold);
    for path in initial {
        tracker.touch(path);
    }
    if event_tx.send(WatchEvent::Ready).is_err() {
        return;
    }

    let mut ticker = tokio::time::interval(stability.poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            raw = raw_rx.recv() => match raw {
                Some(RawEvent::Touched(path)) => tracker.touch(path),
                Some(RawEvent::Removed(path)) => tracker.remove(&path),
                Some(RawEvent::Failed(msg)) => {
                    if event_tx.send(WatchEvent::Error(msg)).is_err() {
                        return;
                    }
                }
                None => return,
            },
            _ = ticker.tick() => {
                for path in tracker.poll(Instant::now()).await {
                    if event_tx.send(WatchEvent::Added(path)).is_err() {
                        return;
                    }
                }
            }
        }
    }
}

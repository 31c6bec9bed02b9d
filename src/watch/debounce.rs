//! Per-path debounce timers.
//!
//! Each `notify` (re)starts a full-length timer for its path; only the last
//! timer for a path can fire. Firing removes the timer before the callback
//! runs, so `cancel_all` never interrupts work the callback started.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::Instant;

type Callback = Arc<dyn Fn(PathBuf) + Send + Sync>;

struct PendingTimer {
    generation: u64,
    handle: AbortHandle,
}

pub struct DebounceScheduler {
    delay: Duration,
    timers: Arc<Mutex<HashMap<PathBuf, PendingTimer>>>,
    next_generation: AtomicU64,
    callback: Callback,
}

impl DebounceScheduler {
    /// `callback` runs once per expired timer, on the runtime that called `notify`
    pub fn new<F>(delay: Duration, callback: F) -> Self
    where
        F: Fn(PathBuf) + Send + Sync + 'static,
    {
        Self {
            delay,
            timers: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
            callback: Arc::new(callback),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Start, or restart from zero, the timer for `path`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn notify(&self, path: &Path) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + self.delay;
        let timers = Arc::clone(&self.timers);
        let callback = Arc::clone(&self.callback);
        let key = path.to_path_buf();

        // Holding the lock while spawning keeps the new timer from firing
        // before it is registered.
        let mut guard = lock(&self.timers);
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let fired = {
                let mut timers = lock(&timers);
                match timers.get(&key) {
                    Some(pending) if pending.generation == generation => {
                        timers.remove(&key);
                        true
                    }
                    _ => false,
                }
            };
            if fired {
                callback(key);
            }
        });

        let replaced = guard.insert(
            path.to_path_buf(),
            PendingTimer {
                generation,
                handle: task.abort_handle(),
            },
        );
        if let Some(previous) = replaced {
            previous.handle.abort();
            log::trace!("debounce reset: {}", path.display());
        }
    }

    /// Drop the pending timer for `path`, if any, without firing it
    pub fn cancel(&self, path: &Path) -> bool {
        match lock(&self.timers).remove(path) {
            Some(pending) => {
                pending.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Drop every pending timer without firing any; returns how many were pending
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<PendingTimer> = lock(&self.timers).drain().map(|(_, t)| t).collect();
        for pending in &drained {
            pending.handle.abort();
        }
        drained.len()
    }

    pub fn is_pending(&self, path: &Path) -> bool {
        lock(&self.timers).contains_key(path)
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.timers).len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // The map stays consistent even if a holder panicked
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl std::fmt::Debug for DebounceScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebounceScheduler")
            .field("delay", &self.delay)
            .field("pending", &self.pending_count())
            .finish()
    }
}

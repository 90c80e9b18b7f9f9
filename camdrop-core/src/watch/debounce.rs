//! Per-path debounce of filesystem events.
//!
//! Each scheduled path owns one generation-tagged task. A newer event for the
//! same path cancels the older task, whether it is still sleeping or already
//! processing, and takes its place. Only the most recent event is processed.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// A filesystem event that survived filtering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEvent {
    pub path: PathBuf,
    pub detected_at: DateTime<Utc>,
}

impl FileEvent {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            detected_at: Utc::now(),
        }
    }
}

/// Work run once the debounce window for a path has closed.
///
/// Implementations check `cancel` at their own checkpoints; it fires when a
/// newer event supersedes this one or the scheduler shuts down.
#[async_trait]
pub trait PathProcessor: Send + Sync + 'static {
    async fn process(&self, event: FileEvent, cancel: CancellationToken);
}

struct PendingTask {
    generation: u64,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct PendingState {
    tasks: HashMap<PathBuf, PendingTask>,
    next_generation: u64,
    closed: bool,
}

struct SchedulerInner {
    delay: Duration,
    processor: Arc<dyn PathProcessor>,
    state: Mutex<PendingState>,
    shutdown: CancellationToken,
}

impl SchedulerInner {
    fn finish(&self, path: &PathBuf, generation: u64) {
        let mut state = self.state.lock();
        let current = state
            .tasks
            .get(path)
            .is_some_and(|task| task.generation == generation);
        if current {
            state.tasks.remove(path);
        }
    }
}

/// Removes the bookkeeping entry when the task ends, including by panic or
/// abort. Superseded generations leave the newer entry alone.
struct FinishGuard {
    inner: Arc<SchedulerInner>,
    path: PathBuf,
    generation: u64,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.inner.finish(&self.path, self.generation);
    }
}

#[derive(Clone)]
pub struct DebounceScheduler {
    inner: Arc<SchedulerInner>,
}

impl fmt::Debug for DebounceScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("DebounceScheduler");
        debug.field("delay", &self.inner.delay);
        match self.inner.state.try_lock() {
            Some(state) => {
                debug
                    .field("pending", &state.tasks.len())
                    .field("closed", &state.closed);
            }
            None => {
                debug.field("state", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl DebounceScheduler {
    pub fn new(delay: Duration, processor: Arc<dyn PathProcessor>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                delay,
                processor,
                state: Mutex::new(PendingState::default()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn delay(&self) -> Duration {
        self.inner.delay
    }

    /// Process `event` after the debounce delay, replacing any earlier
    /// attempt for the same path. Returns false once the scheduler is shut
    /// down. Must be called from within a Tokio runtime.
    pub fn schedule(&self, event: FileEvent) -> bool {
        let mut state = self.inner.state.lock();
        if state.closed {
            debug!(path = %event.path.display(), "scheduler closed, dropping event");
            return false;
        }

        state.next_generation += 1;
        let generation = state.next_generation;
        if let Some(previous) = state.tasks.remove(&event.path) {
            trace!(
                path = %event.path.display(),
                superseded = previous.generation,
                "replacing pending attempt"
            );
            previous.token.cancel();
        }

        let token = self.inner.shutdown.child_token();
        let path = event.path.clone();
        let guard = FinishGuard {
            inner: Arc::clone(&self.inner),
            path: path.clone(),
            generation,
        };
        let delay = self.inner.delay;
        let processor = Arc::clone(&self.inner.processor);
        let task_token = token.clone();

        // Spawned under the lock so the entry is visible before the task can
        // try to remove it.
        let handle = tokio::spawn(async move {
            let _guard = guard;
            tokio::select! {
                _ = task_token.cancelled() => {
                    trace!(path = %event.path.display(), generation, "debounce cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    processor.process(event, task_token).await;
                }
            }
        });

        state.tasks.insert(
            path,
            PendingTask {
                generation,
                token,
                handle,
            },
        );
        true
    }

    /// Number of live tasks, sleeping or processing.
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().tasks.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Cancel every pending attempt and wait up to `grace` for in-flight
    /// processing to observe the cancellation. Tasks still running after the
    /// grace period are aborted. Returns the number of aborted tasks.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        let tasks: Vec<PendingTask> = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            state.tasks.drain().map(|(_, task)| task).collect()
        };
        self.inner.shutdown.cancel();

        let total = tasks.len();
        info!(pending = total, "shutting down debounce scheduler");

        let mut handles: Vec<JoinHandle<()>> = tasks.into_iter().map(|task| task.handle).collect();
        let drained = tokio::time::timeout(
            grace,
            futures::future::join_all(handles.iter_mut()),
        )
        .await;

        match drained {
            Ok(results) => {
                for result in results {
                    if let Err(err) = result
                        && err.is_panic()
                    {
                        warn!("debounce task panicked during shutdown: {err}");
                    }
                }
                0
            }
            Err(_) => {
                let mut aborted = 0;
                for handle in &handles {
                    if !handle.is_finished() {
                        handle.abort();
                        aborted += 1;
                    }
                }
                warn!(aborted, ?grace, "debounce tasks did not finish within grace period");
                aborted
            }
        }
    }
}

//! Background Task Supervision
//!
//! Stale refreshes and L2 writes run detached from the caller. They are
//! spawned through a [`TaskSupervisor`] so that they are bounded, can be
//! awaited (`drain`) and cancelled (`shutdown`), and a panic in one job is
//! logged instead of silently lost.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

use super::DEFAULT_MAX_BACKGROUND_TASKS;

/// Background work configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    /// Maximum background jobs running at once
    pub max_concurrent: usize,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_BACKGROUND_TASKS,
        }
    }
}

#[derive(Debug, Default)]
struct TaskCounters {
    spawned: AtomicU64,
    rejected: AtomicU64,
    panicked: AtomicU64,
    cancelled: AtomicU64,
}

/// Bounded, cancellable spawner for detached jobs
#[derive(Debug)]
pub struct TaskSupervisor {
    tracker: TaskTracker,
    /// Long-running loops; awaited at shutdown but not by `drain`
    loops: TaskTracker,
    cancel: CancellationToken,
    permits: Arc<Semaphore>,
    counters: Arc<TaskCounters>,
}

impl TaskSupervisor {
    pub fn new(config: &BackgroundConfig) -> Self {
        Self {
            tracker: TaskTracker::new(),
            loops: TaskTracker::new(),
            cancel: CancellationToken::new(),
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            counters: Arc::new(TaskCounters::default()),
        }
    }

    /// Spawn `job`; returns false once the supervisor is shut down
    ///
    /// The job waits for a permit before it starts and is dropped at its next
    /// await point when the supervisor is cancelled.
    pub fn spawn<F>(&self, name: &'static str, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            debug!(task = name, "Supervisor shut down, dropping background job");
            return false;
        }

        let cancel = self.cancel.clone();
        let permits = Arc::clone(&self.permits);
        let counters = Arc::clone(&self.counters);
        counters.spawned.fetch_add(1, Ordering::Relaxed);

        self.tracker.spawn(async move {
            let _permit = tokio::select! {
                _ = cancel.cancelled() => {
                    counters.cancelled.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                permit = permits.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };

            let outcome = tokio::select! {
                _ = cancel.cancelled() => {
                    counters.cancelled.fetch_add(1, Ordering::Relaxed);
                    debug!(task = name, "Background job cancelled");
                    return;
                }
                outcome = AssertUnwindSafe(job).catch_unwind() => outcome,
            };

            if outcome.is_err() {
                counters.panicked.fetch_add(1, Ordering::Relaxed);
                error!(task = name, "Background job panicked");
            }
        });
        true
    }

    /// Spawn a long-running loop that watches its own cancellation token
    ///
    /// Loops take no permit and are not dropped on cancellation, so they can
    /// finish cleanup before `shutdown` returns.
    pub fn spawn_loop<F, Fut>(&self, name: &'static str, body: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let counters = Arc::clone(&self.counters);
        counters.spawned.fetch_add(1, Ordering::Relaxed);
        let job = body(self.cancel.child_token());

        self.loops.spawn(async move {
            if AssertUnwindSafe(job).catch_unwind().await.is_err() {
                counters.panicked.fetch_add(1, Ordering::Relaxed);
                error!(task = name, "Background loop panicked");
            }
        });
        true
    }

    /// Wait for every job spawned so far (loops excluded); new jobs are still accepted
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Cancel outstanding jobs, refuse new ones and wait for the rest to stop
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.loops.close();
        self.tracker.wait().await;
        self.loops.wait().await;
    }

    /// Token cancelled at shutdown, for long-running loops
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Jobs currently tracked (queued or running)
    pub fn active(&self) -> usize {
        self.tracker.len()
    }

    /// Loops still running
    pub fn active_loops(&self) -> usize {
        self.loops.len()
    }

    pub fn spawned(&self) -> u64 {
        self.counters.spawned.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.counters.rejected.load(Ordering::Relaxed)
    }

    pub fn panicked(&self) -> u64 {
        self.counters.panicked.load(Ordering::Relaxed)
    }

    pub fn cancelled(&self) -> u64 {
        self.counters.cancelled.load(Ordering::Relaxed)
    }
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new(&BackgroundConfig::default())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_drain_waits_for_jobs() {
        let supervisor = TaskSupervisor::default();
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let done = Arc::clone(&done);
            assert!(supervisor.spawn("test", async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                done.fetch_add(1, Ordering::SeqCst);
            }));
        }

        supervisor.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 5);
        assert_eq!(supervisor.active(), 0);

        // Still accepting work after a drain
        assert!(supervisor.spawn("after", async {}));
        supervisor.drain().await;
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let supervisor = TaskSupervisor::new(&BackgroundConfig { max_concurrent: 2 });
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            supervisor.spawn("bounded", async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            });
        }

        supervisor.drain().await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_panics_are_contained() {
        let supervisor = TaskSupervisor::default();
        supervisor.spawn("boom", async {
            panic!("refresh exploded");
        });
        supervisor.drain().await;
        assert_eq!(supervisor.panicked(), 1);
    }

    #[tokio::test]
    async fn test_loop_runs_cleanup_on_shutdown() {
        let supervisor = TaskSupervisor::default();
        let cleaned_up = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&cleaned_up);
        assert!(supervisor.spawn_loop("loop", move |token| async move {
            token.cancelled().await;
            c.fetch_add(1, Ordering::SeqCst);
        }));

        // Loops do not hold up a drain
        supervisor.drain().await;
        assert_eq!(supervisor.active_loops(), 1);

        supervisor.shutdown().await;
        assert_eq!(cleaned_up.load(Ordering::SeqCst), 1);
        assert_eq!(supervisor.active_loops(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_and_rejects() {
        let supervisor = TaskSupervisor::default();
        let finished = Arc::new(AtomicUsize::new(0));

        let f = Arc::clone(&finished);
        supervisor.spawn("slow", async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            f.fetch_add(1, Ordering::SeqCst);
        });
        tokio::task::yield_now().await;

        supervisor.shutdown().await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
        assert_eq!(supervisor.cancelled(), 1);
        assert!(supervisor.is_shutdown());

        assert!(!supervisor.spawn("late", async {}));
        assert_eq!(supervisor.rejected(), 1);
    }
}

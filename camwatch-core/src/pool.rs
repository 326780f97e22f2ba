//! Bounded worker pool used to parallelize capability probes.
//!
//! The pool caps concurrent executions with a counting semaphore and gives
//! every accepted task a hard deadline. Each task is classified exactly once
//! as completed, failed (panicked), or timed out: the supervisor task owns
//! the classification, so a race between completion and the deadline can
//! never double-count.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::{CameraError, Result};

pub const DEFAULT_MAX_WORKERS: usize = 10;
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub max_workers: usize,
    pub task_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            task_timeout: DEFAULT_TASK_TIMEOUT,
        }
    }
}

impl WorkerPoolConfig {
    /// Replace out-of-range values with the documented defaults.
    fn sanitized(&self) -> Self {
        let max_workers = if self.max_workers == 0 {
            DEFAULT_MAX_WORKERS
        } else {
            self.max_workers
        };
        let task_timeout = if self.task_timeout.is_zero() {
            DEFAULT_TASK_TIMEOUT
        } else {
            self.task_timeout
        };
        Self {
            max_workers,
            task_timeout,
        }
    }
}

/// Snapshot of the pool's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub active: u64,
    pub queued: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub max_workers: u64,
}

#[derive(Debug, Default)]
struct PoolCounters {
    active: AtomicU64,
    queued: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
}

#[derive(Debug)]
struct PoolState {
    running: bool,
    semaphore: Arc<Semaphore>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

/// Executes submitted tasks with a hard cap on concurrency and a deadline
/// per task.
#[derive(Debug)]
pub struct WorkerPool {
    config: WorkerPoolConfig,
    counters: Arc<PoolCounters>,
    state: parking_lot::Mutex<PoolState>,
}

enum TaskOutcome {
    Completed,
    Panicked(String),
    TimedOut,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig) -> Self {
        let config = config.sanitized();
        let state = PoolState {
            running: false,
            semaphore: Arc::new(Semaphore::new(config.max_workers)),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        };
        Self {
            config,
            counters: Arc::new(PoolCounters::default()),
            state: parking_lot::Mutex::new(state),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.config.max_workers
    }

    pub fn task_timeout(&self) -> Duration {
        self.config.task_timeout
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Allocate the concurrency gate and accept submissions.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.running {
            return Err(CameraError::AlreadyRunning);
        }
        state.semaphore = Arc::new(Semaphore::new(self.config.max_workers));
        state.shutdown = CancellationToken::new();
        state.tracker = TaskTracker::new();
        state.running = true;
        info!(max_workers = self.config.max_workers, "worker pool started");
        Ok(())
    }

    /// Reserve a slot and launch `task` under the pool's deadline.
    ///
    /// Waits until a slot is free, `ctx` is cancelled, or the pool begins
    /// shutting down. The token handed to the task is a child of `ctx` and
    /// is cancelled when the per-task deadline expires.
    pub async fn submit<F, Fut>(&self, ctx: &CancellationToken, task: F) -> Result<()>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (semaphore, shutdown, tracker) = {
            let state = self.state.lock();
            if !state.running {
                return Err(CameraError::NotRunning);
            }
            (
                state.semaphore.clone(),
                state.shutdown.clone(),
                state.tracker.clone(),
            )
        };

        self.counters.queued.fetch_add(1, Ordering::Relaxed);
        let permit = tokio::select! {
            permit = semaphore.acquire_owned() => {
                self.counters.queued.fetch_sub(1, Ordering::Relaxed);
                permit.map_err(|_| CameraError::ShuttingDown)?
            }
            _ = ctx.cancelled() => {
                self.counters.queued.fetch_sub(1, Ordering::Relaxed);
                return Err(CameraError::Cancelled("submit".to_string()));
            }
            _ = shutdown.cancelled() => {
                self.counters.queued.fetch_sub(1, Ordering::Relaxed);
                return Err(CameraError::ShuttingDown);
            }
        };

        self.counters.active.fetch_add(1, Ordering::Relaxed);

        let task_token = ctx.child_token();
        let task_timeout = self.config.task_timeout;
        let counters = self.counters.clone();
        let mut handle = tokio::spawn(task(task_token.clone()));

        tracker.spawn(async move {
            let outcome = tokio::select! {
                joined = &mut handle => match joined {
                    Ok(()) => TaskOutcome::Completed,
                    Err(err) => TaskOutcome::Panicked(err.to_string()),
                },
                _ = tokio::time::sleep(task_timeout) => {
                    task_token.cancel();
                    TaskOutcome::TimedOut
                }
            };

            // Single resolution point: counters move here and nowhere else.
            match outcome {
                TaskOutcome::Completed => {
                    counters.completed.fetch_add(1, Ordering::Relaxed);
                }
                TaskOutcome::Panicked(msg) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %msg, "pool task panicked");
                }
                TaskOutcome::TimedOut => {
                    counters.timed_out.fetch_add(1, Ordering::Relaxed);
                    debug!(timeout = ?task_timeout, "pool task timed out");
                    // The task is not killed; hold the slot until it returns.
                    let _ = handle.await;
                }
            }

            counters.active.fetch_sub(1, Ordering::Relaxed);
            drop(permit);
        });

        Ok(())
    }

    /// Stop accepting work and wait for in-flight tasks.
    ///
    /// Idempotent. If `ctx` expires before the tasks drain, returns the
    /// cancellation error; stragglers finish on their own and only touch
    /// counters they share with this pool.
    pub async fn stop(&self, ctx: &CancellationToken) -> Result<()> {
        let tracker = {
            let mut state = self.state.lock();
            if !state.running {
                return Ok(());
            }
            state.running = false;
            state.shutdown.cancel();
            state.semaphore.close();
            state.tracker.close();
            state.tracker.clone()
        };

        tokio::select! {
            _ = tracker.wait() => {
                info!("worker pool stopped");
                Ok(())
            }
            _ = ctx.cancelled() => {
                warn!("worker pool stop abandoned in-flight tasks");
                Err(CameraError::Cancelled("pool stop".to_string()))
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            active: self.counters.active.load(Ordering::Relaxed),
            queued: self.counters.queued.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            timed_out: self.counters.timed_out.load(Ordering::Relaxed),
            max_workers: self.config.max_workers as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_replace_degenerate_values() {
        let config = WorkerPoolConfig {
            max_workers: 0,
            task_timeout: Duration::ZERO,
        }
        .sanitized();
        assert_eq!(config.max_workers, DEFAULT_MAX_WORKERS);
        assert_eq!(config.task_timeout, DEFAULT_TASK_TIMEOUT);
    }

    #[tokio::test]
    async fn submit_before_start_is_rejected() {
        let pool = WorkerPool::new(WorkerPoolConfig::default());
        let ctx = CancellationToken::new();
        let result = pool.submit(&ctx, |_token| async {}).await;
        assert!(matches!(result, Err(CameraError::NotRunning)));
    }

    #[tokio::test]
    async fn double_start_reports_already_running() {
        let pool = WorkerPool::new(WorkerPoolConfig::default());
        pool.start().unwrap();
        assert!(matches!(pool.start(), Err(CameraError::AlreadyRunning)));
    }

    #[tokio::test]
    async fn stop_before_start_is_ok() {
        let pool = WorkerPool::new(WorkerPoolConfig::default());
        let ctx = CancellationToken::new();
        assert!(pool.stop(&ctx).await.is_ok());
        assert!(pool.stop(&ctx).await.is_ok());
    }
}

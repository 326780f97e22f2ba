//! End-to-end properties of the bounded worker pool: concurrency caps,
//! accounting conservation, panic isolation, and lifecycle idempotence.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use camwatch_core::CameraError;
use camwatch_core::pool::{PoolStats, WorkerPool, WorkerPoolConfig};
use tokio_util::sync::CancellationToken;

fn pool(max_workers: usize, task_timeout: Duration) -> WorkerPool {
    let pool = WorkerPool::new(WorkerPoolConfig {
        max_workers,
        task_timeout,
    });
    pool.start().unwrap();
    pool
}

async fn drain(pool: &WorkerPool) -> PoolStats {
    pool.stop(&CancellationToken::new()).await.unwrap();
    pool.stats()
}

/// Tracks the observed peak of concurrently running tasks.
#[derive(Default)]
struct ConcurrencyGauge {
    current: AtomicI64,
    peak: AtomicI64,
}

impl ConcurrencyGauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> i64 {
        self.peak.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn concurrency_never_exceeds_max_workers() {
    let pool = pool(2, Duration::from_secs(5));
    let ctx = CancellationToken::new();
    let gauge = Arc::new(ConcurrencyGauge::default());

    for _ in 0..5 {
        let gauge = gauge.clone();
        pool.submit(&ctx, move |_token| async move {
            gauge.enter();
            tokio::time::sleep(Duration::from_millis(10)).await;
            gauge.exit();
        })
        .await
        .unwrap();
    }

    let stats = drain(&pool).await;
    assert_eq!(stats.completed, 5);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.timed_out, 0);
    assert!(gauge.peak() <= 2, "observed peak {}", gauge.peak());
}

#[tokio::test]
async fn slow_task_is_classified_as_timed_out() {
    let pool = pool(1, Duration::from_millis(50));
    let ctx = CancellationToken::new();

    pool.submit(&ctx, |_token| async {
        tokio::time::sleep(Duration::from_millis(150)).await;
    })
    .await
    .unwrap();

    let stats = drain(&pool).await;
    assert_eq!(stats.completed, 0);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.timed_out, 1);
}

#[tokio::test]
async fn mixed_workload_conserves_accounting() {
    let pool = pool(5, Duration::from_millis(50));
    let ctx = CancellationToken::new();

    for _ in 0..10 {
        pool.submit(&ctx, |_token| async {}).await.unwrap();
    }
    for _ in 0..5 {
        pool.submit(&ctx, |_token| async {
            panic!("deliberate test panic");
        })
        .await
        .unwrap();
    }
    for _ in 0..3 {
        pool.submit(&ctx, |_token| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
        })
        .await
        .unwrap();
    }

    let stats = drain(&pool).await;
    assert_eq!(stats.completed, 10);
    assert_eq!(stats.failed, 5);
    assert_eq!(stats.timed_out, 3);
    assert_eq!(stats.completed + stats.failed + stats.timed_out, 18);
}

#[tokio::test]
async fn every_task_is_classified_near_the_deadline_boundary() {
    let pool = pool(4, Duration::from_millis(20));
    let ctx = CancellationToken::new();
    let total = 20u64;

    for index in 0..total {
        // Sleeps straddle the timeout so completion races the deadline.
        let sleep_ms = 14 + (index % 12);
        pool.submit(&ctx, move |_token| async move {
            tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
        })
        .await
        .unwrap();
    }

    let stats = drain(&pool).await;
    assert_eq!(
        stats.completed + stats.failed + stats.timed_out,
        total,
        "unclassified tasks: {stats:?}"
    );
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn panics_leave_the_pool_usable() {
    let pool = pool(2, Duration::from_secs(5));
    let ctx = CancellationToken::new();

    for _ in 0..4 {
        pool.submit(&ctx, |_token| async {
            panic!("deliberate test panic");
        })
        .await
        .unwrap();
    }

    // Wait for the panicking batch to resolve.
    while pool.stats().failed < 4 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(pool.is_running());

    let (tx, rx) = tokio::sync::oneshot::channel();
    pool.submit(&ctx, move |_token| async move {
        let _ = tx.send(());
    })
    .await
    .unwrap();
    rx.await.unwrap();

    let stats = drain(&pool).await;
    assert_eq!(stats.failed, 4);
    assert_eq!(stats.completed, 1);
}

#[tokio::test]
async fn cancelled_submit_does_not_reserve_a_slot() {
    let pool = pool(1, Duration::from_secs(5));
    let ctx = CancellationToken::new();

    // Occupy the only slot.
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    pool.submit(&ctx, move |_token| async move {
        let _ = release_rx.await;
    })
    .await
    .unwrap();

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let rejected = pool.submit(&cancelled, |_token| async {}).await;
    assert!(matches!(rejected, Err(CameraError::Cancelled(_))));

    release_tx.send(()).unwrap();
    let stats = drain(&pool).await;
    assert_eq!(stats.completed, 1);
}

#[tokio::test]
async fn pool_can_be_restarted_after_stop() {
    let pool = pool(2, Duration::from_secs(5));
    let ctx = CancellationToken::new();

    pool.submit(&ctx, |_token| async {}).await.unwrap();
    pool.stop(&ctx).await.unwrap();
    assert!(matches!(
        pool.submit(&ctx, |_token| async {}).await,
        Err(CameraError::NotRunning)
    ));

    pool.start().unwrap();
    pool.submit(&ctx, |_token| async {}).await.unwrap();
    let stats = drain(&pool).await;
    assert_eq!(stats.completed, 2);
}

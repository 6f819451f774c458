//! Integration tests for core-async on the tokio runtime.
//!
//! These cover the primitives the device engine leans on: the worker pool's
//! bounded concurrency, FIFO queueing, cancellation tokens and timeouts.

use core_async::sync::{CancellationToken, Mutex};
use core_async::worker::WorkerPool;
use core_async::{sync, task, time};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[core_async::test]
async fn test_task_spawn() {
    let handle = task::spawn(async { 42 });
    let result = handle.await.unwrap();
    assert_eq!(result, 42);
}

#[core_async::test]
async fn test_timeout_success() {
    let result = time::timeout(time::Duration::from_millis(100), async {
        time::sleep(time::Duration::from_millis(10)).await;
        42
    })
    .await;

    assert_eq!(result.unwrap(), 42);
}

#[core_async::test]
async fn test_timeout_failure() {
    let result = time::timeout(time::Duration::from_millis(10), async {
        time::sleep(time::Duration::from_millis(200)).await;
        42
    })
    .await;

    assert!(result.is_err());
}

#[core_async::test]
async fn test_cancellation_token_propagates_to_children() {
    let parent = CancellationToken::new();
    let child = parent.child_token();

    let waiter = task::spawn(async move {
        child.cancelled().await;
        "cancelled"
    });

    parent.cancel();
    assert_eq!(waiter.await.unwrap(), "cancelled");
}

#[core_async::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_worker_pool_bounds_concurrency() {
    let pool = WorkerPool::new("bounded", 2);
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        tasks.push(pool.dispatch(async move {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            time::sleep(time::Duration::from_millis(20)).await;
            running.fetch_sub(1, Ordering::SeqCst);
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(running.load(Ordering::SeqCst), 0);
}

#[core_async::test]
async fn test_worker_pool_single_worker_runs_in_dispatch_order() {
    let pool = WorkerPool::new("serial", 1);
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut tasks = Vec::new();
    for i in 0..5 {
        let order = Arc::clone(&order);
        tasks.push(pool.dispatch(async move {
            time::sleep(time::Duration::from_millis(2)).await;
            order.lock().await.push(i);
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(*order.lock().await, vec![0, 1, 2, 3, 4]);
}

#[core_async::test]
async fn test_worker_pool_reports_queue_depth() {
    let pool = WorkerPool::new("queue", 1);
    let gate = Arc::new(sync::Notify::new());

    let blocker = {
        let gate = Arc::clone(&gate);
        pool.dispatch(async move { gate.notified().await })
    };
    task::yield_now().await;

    let waiting = pool.dispatch(async { 1 });
    task::yield_now().await;
    assert_eq!(pool.idle(), 0);

    gate.notify_one();
    blocker.await.unwrap();
    assert_eq!(waiting.await.unwrap(), 1);
    assert_eq!(pool.queued(), 0);
}

#[core_async::test]
async fn test_worker_task_panic_surfaces_as_join_error() {
    let pool = WorkerPool::new("panics", 1);
    let task = pool.dispatch(async {
        panic!("device exploded");
    });

    let err = task.await.unwrap_err();
    assert!(err.is_panic());

    // The permit is released even though the unit panicked.
    assert_eq!(pool.dispatch(async { 5 }).await.unwrap(), 5);
}

#[core_async::test]
async fn test_time_utilities() {
    let now_millis = time::now_millis();
    let now_secs = time::now_secs();

    assert!(now_millis > 0);
    assert!(now_millis / 1000 >= now_secs - 1);
}

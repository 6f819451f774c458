//! # Worker Pool
//!
//! Bounded pool used to run device work off the caller's task.
//!
//! ## Overview
//!
//! Handshakes and byte transfers against hardware have latency the caller
//! must not wait on inline. [`WorkerPool::dispatch`] spawns the future
//! immediately but lets it run only once one of the pool's permits is free,
//! so at most `size` units of device work are in flight per pool. The
//! returned [`WorkerTask`] is a future resolving to the unit's output, which
//! is how completion is delivered back to the requester.
//!
//! Queued work is never dropped: permits are handed out in FIFO order.
//!
//! ## Usage
//!
//! ```rust
//! use core_async::worker::WorkerPool;
//!
//! # core_async::runtime::block_on(async {
//! let pool = WorkerPool::new("transfers", 1);
//! let first = pool.dispatch(async { "first" });
//! let second = pool.dispatch(async { "second" });
//! assert_eq!(first.await.unwrap(), "first");
//! assert_eq!(second.await.unwrap(), "second");
//! # });
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tracing::trace;

use crate::sync::Semaphore;
use crate::task::{JoinError, JoinHandle};

/// A bounded pool of asynchronous workers.
#[derive(Clone)]
pub struct WorkerPool {
    name: Arc<str>,
    size: usize,
    permits: Arc<Semaphore>,
    queued: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Creates a pool that runs at most `size` units concurrently.
    ///
    /// A `size` of zero is treated as one.
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        let size = size.max(1);
        Self {
            name: Arc::from(name.into()),
            size,
            permits: Arc::new(Semaphore::new(size)),
            queued: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Pool name, used in trace output.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum number of concurrently running units.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of units dispatched but still waiting for a worker.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Number of idle workers.
    pub fn idle(&self) -> usize {
        self.permits.available_permits()
    }

    /// Queues `future` on the pool and returns a handle resolving to its output.
    ///
    /// Must be called from within a runtime.
    pub fn dispatch<F>(&self, future: F) -> WorkerTask<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let queued = Arc::clone(&self.queued);
        let name = Arc::clone(&self.name);

        queued.fetch_add(1, Ordering::SeqCst);
        let handle = crate::task::spawn(async move {
            // The semaphore is never closed, so acquisition only waits.
            let permit = permits.acquire_owned().await.ok();
            queued.fetch_sub(1, Ordering::SeqCst);
            trace!(pool = %name, "worker picked up unit");

            let output = future.await;
            drop(permit);
            output
        });

        WorkerTask { handle }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("idle", &self.idle())
            .field("queued", &self.queued())
            .finish()
    }
}

/// Completion handle for a unit dispatched on a [`WorkerPool`].
///
/// Awaiting it yields the unit's output, or a `JoinError` if the unit
/// panicked or was aborted.
#[derive(Debug)]
pub struct WorkerTask<T> {
    handle: JoinHandle<T>,
}

impl<T> WorkerTask<T> {
    /// Aborts the unit. A unit that already finished is unaffected.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Whether the unit has finished running.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl<T> Future for WorkerTask<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{sleep, Duration};

    #[core_async::test]
    async fn test_dispatch_returns_output() {
        let pool = WorkerPool::new("test", 2);
        let task = pool.dispatch(async { 7 * 6 });
        assert_eq!(task.await.unwrap(), 42);
    }

    #[core_async::test]
    async fn test_zero_size_becomes_one() {
        let pool = WorkerPool::new("test", 0);
        assert_eq!(pool.size(), 1);
        assert_eq!(pool.idle(), 1);
    }

    #[core_async::test]
    async fn test_abort_yields_cancelled_join_error() {
        let pool = WorkerPool::new("test", 1);
        let task = pool.dispatch(async {
            sleep(Duration::from_secs(30)).await;
        });
        task.abort();
        let err = task.await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[core_async::test]
    async fn test_permit_released_after_completion() {
        let pool = WorkerPool::new("test", 1);
        pool.dispatch(async {}).await.unwrap();
        assert_eq!(pool.idle(), 1);
        assert_eq!(pool.queued(), 0);
    }
}

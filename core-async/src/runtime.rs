//! Runtime construction helpers.
//!
//! `block_on` drives a future on a fresh current-thread runtime;
//! `block_on_multi_thread` uses a small multi-thread runtime, which tests of
//! the worker pool rely on to observe real parallelism.

pub use tokio::runtime::{Builder, Handle, Runtime};

/// Runs the provided future to completion on a current-thread runtime.
pub fn block_on<F>(future: F) -> F::Output
where
    F: std::future::Future,
{
    Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("core_async::runtime::block_on: failed to build Tokio runtime")
        .block_on(future)
}

/// Runs the provided future to completion on a multi-thread runtime with
/// `worker_threads` workers (at least one).
pub fn block_on_multi_thread<F>(worker_threads: usize, future: F) -> F::Output
where
    F: std::future::Future,
{
    Builder::new_multi_thread()
        .worker_threads(worker_threads.max(1))
        .enable_all()
        .build()
        .expect("core_async::runtime::block_on_multi_thread: failed to build Tokio runtime")
        .block_on(future)
}

//! Async runtime facade for the device sync engine.
//!
//! Every `core-*` and `bridge-*` crate reaches the executor through this crate
//! instead of depending on tokio directly. Besides thin re-exports it owns the
//! [`worker`] pool that runs device handshakes and transfers off the caller's
//! task.
//!
//! # Modules
//!
//! - `task`: task spawning and join handles
//! - `time`: sleep, timeouts and wall-clock helpers
//! - `sync`: locks, channels, semaphores and `CancellationToken`
//! - `fs`: async filesystem helpers
//! - `runtime`: `block_on` entry points used by the attribute macros
//! - `worker`: bounded worker pool with awaitable completion
//!
//! # Examples
//!
//! ```rust
//! use core_async::worker::WorkerPool;
//!
//! # core_async::runtime::block_on(async {
//! let pool = WorkerPool::new("device-io", 2);
//! let task = pool.dispatch(async { 40 + 2 });
//! assert_eq!(task.await.unwrap(), 42);
//! # });
//! ```

// Async entry-point/test macros, so downstream crates never need tokio macros.
pub use core_async_macros::{main, test};

// Lets the macros' `core_async::` paths resolve inside this crate's own tests.
extern crate self as core_async;

pub mod fs;
pub mod runtime;
pub mod sync;
pub mod task;
pub mod time;
pub mod worker;

pub use task::spawn;
pub use time::{sleep, Duration, Instant};

//! Synchronization primitives.
//!
//! Async-aware locks and channels from `tokio::sync`, plus tokio-util's
//! `CancellationToken` used for cooperative cancellation of transfer jobs.
//!
//! Lock discipline in the engine:
//! - a device session funnels native calls through one `Mutex` (fair, FIFO),
//!   so concurrent requests queue instead of being dropped;
//! - host-side graphs sit behind `RwLock` so lookups share access while
//!   structural edits take it exclusively.
//!
//! # Examples
//!
//! ```rust
//! use core_async::sync::{CancellationToken, Mutex};
//!
//! # core_async::runtime::block_on(async {
//! let mutex = Mutex::new(0);
//! *mutex.lock().await += 1;
//!
//! let token = CancellationToken::new();
//! let child = token.child_token();
//! token.cancel();
//! assert!(child.is_cancelled());
//! # });
//! ```

pub use tokio::sync::{
    broadcast, mpsc, oneshot, watch, Mutex, MutexGuard, Notify, OwnedSemaphorePermit, RwLock,
    RwLockReadGuard, RwLockWriteGuard, Semaphore, SemaphorePermit,
};

pub use tokio_util::sync::CancellationToken;

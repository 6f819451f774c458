//! Workspace facade crate.
//!
//! Host applications depend on `mdsync-workspace` and pick a feature set
//! instead of wiring the individual crates. With `desktop-shims` (default) the
//! mass-storage driver and the tokio filesystem bridge are available; the
//! `virtual-device` feature adds the in-memory MTP-like device used by demos
//! and tests.

#[cfg(any(feature = "desktop-shims", feature = "virtual-device"))]
pub use core_service::*;

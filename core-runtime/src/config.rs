//! # Engine Configuration Module
//!
//! Configuration for the media-device synchronization engine.
//!
//! ## Overview
//!
//! The host owns its configuration storage; the engine consumes a handful of
//! opaque values (folder template, preferred target format) plus its own
//! tuning knobs. `EngineConfig` is assembled with a builder and validated
//! fail-fast, so a bad value surfaces at start-up rather than mid-transfer.
//!
//! ## Required Dependencies
//!
//! - `FileSystemAccess` - staging of device tracks for copy-out and playback
//!
//! When the `desktop-shims` feature is enabled, `TokioFileSystem` is injected
//! automatically if no file system bridge is provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::EngineConfig;
//! use std::time::Duration;
//!
//! let config = EngineConfig::builder()
//!     .folder_template("%a/%b")
//!     .handshake_timeout(Duration::from_secs(5))
//!     .worker_count(2)
//!     .build()
//!     .expect("Failed to build config");
//! ```
//!
//! ### Custom Bridges
//!
//! ```ignore
//! let config = EngineConfig::builder()
//!     .file_system(Arc::new(MySandboxedFs::new()))
//!     .clock(Arc::new(MyTestClock::at(ts)))
//!     .build()?;
//! ```
//!
//! The clock stamps transfer jobs when they are created, started and
//! finished.

use crate::error::{Error, Result};
use bridge_traits::{Clock, FileSystemAccess, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Template used when the host supplies none: artist folder, then album.
pub const DEFAULT_FOLDER_TEMPLATE: &str = "%a/%b";

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_WORKER_COUNT: usize = 2;

pub const MAX_WORKER_COUNT: usize = 16;

/// Free space a copy-in must leave on the device.
pub const DEFAULT_FREE_SPACE_RESERVE: u64 = 5 * 1024 * 1024;

const MAX_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(300);

/// Engine configuration.
///
/// Holds the bridges the engine needs and the values the host passes through
/// from its own settings.
#[derive(Clone)]
pub struct EngineConfig {
    /// Destination folder template (`%a` artist, `%b` album, `%g` genre).
    /// Empty means "default music folder".
    pub folder_template: String,

    /// Preferred transcode/target format, carried for the host; the engine
    /// does not transcode.
    pub target_format: Option<String>,

    /// Upper bound on the device handshake.
    pub handshake_timeout: Duration,

    /// Size of the worker pool running handshakes and transfers.
    pub worker_count: usize,

    /// Bytes that must remain free after a copy-in.
    pub free_space_reserve_bytes: u64,

    /// When set, the handshake fails unless the device reports this serial.
    pub verify_serial: Option<String>,

    /// Override for the staging root. Defaults to
    /// `<cache dir>/device-staging`.
    pub staging_dir: Option<PathBuf>,

    pub event_buffer_size: usize,

    pub file_system: Arc<dyn FileSystemAccess>,

    /// Time source for transfer job timestamps.
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("folder_template", &self.folder_template)
            .field("target_format", &self.target_format)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("worker_count", &self.worker_count)
            .field("free_space_reserve_bytes", &self.free_space_reserve_bytes)
            .field(
                "verify_serial",
                &self.verify_serial.as_ref().map(|_| "[REDACTED]"),
            )
            .field("staging_dir", &self.staging_dir)
            .field("event_buffer_size", &self.event_buffer_size)
            .field("file_system", &"FileSystemAccess { ... }")
            .field("clock", &"Clock { ... }")
            .finish()
    }
}

impl EngineConfig {
    /// Creates a new builder for constructing an `EngineConfig`.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Worker count is between 1 and 16
    /// - Handshake timeout is non-zero and at most five minutes
    /// - Event buffer size is non-zero
    /// - Optional strings and paths are not empty when present
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(Error::Config(
                "Worker count must be at least 1".to_string(),
            ));
        }

        if self.worker_count > MAX_WORKER_COUNT {
            return Err(Error::Config(format!(
                "Worker count exceeds maximum of {}",
                MAX_WORKER_COUNT
            )));
        }

        if self.handshake_timeout.is_zero() {
            return Err(Error::Config(
                "Handshake timeout must be greater than zero".to_string(),
            ));
        }

        if self.handshake_timeout > MAX_HANDSHAKE_TIMEOUT {
            return Err(Error::Config(
                "Handshake timeout exceeds maximum of 5 minutes".to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        if matches!(&self.verify_serial, Some(s) if s.trim().is_empty()) {
            return Err(Error::Config(
                "Serial to verify cannot be empty; leave it unset instead".to_string(),
            ));
        }

        if matches!(&self.target_format, Some(f) if f.trim().is_empty()) {
            return Err(Error::Config(
                "Target format cannot be empty; leave it unset instead".to_string(),
            ));
        }

        if matches!(&self.staging_dir, Some(p) if p.as_os_str().is_empty()) {
            return Err(Error::Config("Staging directory cannot be empty".to_string()));
        }

        Ok(())
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn file_system_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "FileSystemAccess".to_string(),
        message: "FileSystemAccess implementation is required for track staging. \
                 Desktop: ensure the 'desktop-shims' feature is enabled to use the default TokioFileSystem. \
                 Other hosts: inject an adapter for the platform's sandboxed storage."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_file_system() -> Result<Arc<dyn FileSystemAccess>> {
    use bridge_desktop::TokioFileSystem;

    let fs: Arc<dyn FileSystemAccess> = Arc::new(TokioFileSystem::new());
    Ok(fs)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_file_system() -> Result<Arc<dyn FileSystemAccess>> {
    Err(file_system_missing_error())
}

/// Builder for [`EngineConfig`].
#[derive(Default)]
pub struct EngineConfigBuilder {
    folder_template: Option<String>,
    target_format: Option<String>,
    handshake_timeout: Option<Duration>,
    worker_count: Option<usize>,
    free_space_reserve_bytes: Option<u64>,
    verify_serial: Option<String>,
    staging_dir: Option<PathBuf>,
    event_buffer_size: Option<usize>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    clock: Option<Arc<dyn Clock>>,
}

impl EngineConfigBuilder {
    pub fn folder_template(mut self, template: impl Into<String>) -> Self {
        self.folder_template = Some(template.into());
        self
    }

    pub fn target_format(mut self, format: impl Into<String>) -> Self {
        self.target_format = Some(format.into());
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }

    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = Some(count);
        self
    }

    pub fn free_space_reserve_bytes(mut self, bytes: u64) -> Self {
        self.free_space_reserve_bytes = Some(bytes);
        self
    }

    pub fn verify_serial(mut self, serial: impl Into<String>) -> Self {
        self.verify_serial = Some(serial.into());
        self
    }

    pub fn staging_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.staging_dir = Some(path.into());
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// - `CapabilityMissing` when no `FileSystemAccess` was supplied and no
    ///   desktop default is compiled in
    /// - `Config` when a value fails validation
    pub fn build(self) -> Result<EngineConfig> {
        let file_system = match self.file_system {
            Some(fs) => fs,
            None => provide_default_file_system()?,
        };

        let config = EngineConfig {
            folder_template: self
                .folder_template
                .unwrap_or_else(|| DEFAULT_FOLDER_TEMPLATE.to_string()),
            target_format: self.target_format,
            handshake_timeout: self.handshake_timeout.unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT),
            worker_count: self.worker_count.unwrap_or(DEFAULT_WORKER_COUNT),
            free_space_reserve_bytes: self
                .free_space_reserve_bytes
                .unwrap_or(DEFAULT_FREE_SPACE_RESERVE),
            verify_serial: self.verify_serial,
            staging_dir: self.staging_dir,
            event_buffer_size: self
                .event_buffer_size
                .unwrap_or(crate::events::DEFAULT_EVENT_BUFFER_SIZE),
            file_system,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        };

        config.validate()?;

        Ok(config)
    }
}

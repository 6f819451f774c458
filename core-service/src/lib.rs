//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided connection assistants and driver factories
//! into the device sync engine. Desktop apps typically enable the
//! `desktop-shims` feature (which depends on `bridge-desktop`) and call
//! [`bootstrap_desktop`]; other hosts build a [`CoreDependencies`] bundle
//! from their own bridge implementations.
//!
//! ```ignore
//! use core_runtime::config::EngineConfig;
//! use core_service::bootstrap_desktop;
//!
//! let config = EngineConfig::builder().folder_template("%a/%b").build()?;
//! let service = bootstrap_desktop(config).await?;
//!
//! if let Some(descriptor) = service.probe(&raw) {
//!     let session = service.open(descriptor).wait().await?;
//!     let tracks = service.enumerate(session.id()).await?;
//! }
//! ```

pub mod error;
pub mod service;

pub use error::{CoreError, Result};
pub use service::{DeviceSyncService, HostPlaylist, OpenTask, SessionHandle};

use bridge_traits::device::{ConnectionAssistant, DriverFactory};
use core_device::{AssistantChain, DriverRegistry};
use std::sync::Arc;

/// Aggregated handle to the device bridges the engine probes with.
#[derive(Debug, Default)]
pub struct CoreDependencies {
    pub assistants: AssistantChain,
    pub drivers: DriverRegistry,
}

impl CoreDependencies {
    pub fn new(assistants: AssistantChain, drivers: DriverRegistry) -> Self {
        Self {
            assistants,
            drivers,
        }
    }

    /// Registers one device family: its assistant is asked after those
    /// already registered.
    pub fn with_family(
        mut self,
        assistant: Arc<dyn ConnectionAssistant>,
        factory: Arc<dyn DriverFactory>,
    ) -> Self {
        self.assistants.register(assistant);
        self.drivers.register(factory);
        self
    }
}

/// Convenience bootstrapper for desktop hosts: mass-storage players mounted
/// as a folder.
#[cfg(feature = "desktop-shims")]
pub async fn bootstrap_desktop(
    config: core_runtime::config::EngineConfig,
) -> Result<DeviceSyncService> {
    use bridge_desktop::{MassStorageAssistant, MassStorageDriverFactory};

    let deps = CoreDependencies::default().with_family(
        Arc::new(MassStorageAssistant),
        Arc::new(MassStorageDriverFactory),
    );
    DeviceSyncService::new(config, deps).await
}

//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `FileSystemAccess` using `tokio::fs` and the platform's per-user
//!   directories
//! - `MassStorageDriver` / `MassStorageAssistant` for players mounted as a
//!   folder, with tags handled by `lofty`
//! - `VirtualDevice` (feature `virtual-device`): an in-memory MTP-like device
//!   for demos and tests
//!
//! ## Feature Flags
//!
//! - `virtual-device`: Enable the in-memory device family
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{MassStorageAssistant, MassStorageDriverFactory, TokioFileSystem};
//!
//! #[tokio::main]
//! async fn main() {
//!     let fs = TokioFileSystem::new();
//!     let assistant = MassStorageAssistant;
//!     let factory = MassStorageDriverFactory;
//!
//!     // Hand these to the engine configuration / service
//! }
//! ```

mod filesystem;
mod mass_storage;

#[cfg(feature = "virtual-device")]
mod virtual_device;

pub use filesystem::TokioFileSystem;
pub use mass_storage::{MassStorageAssistant, MassStorageDriver, MassStorageDriverFactory};

#[cfg(feature = "virtual-device")]
pub use virtual_device::{
    HandshakeFault, VirtualDevice, VirtualDeviceAssistant, VirtualDeviceDriver,
    VirtualDeviceFactory,
};

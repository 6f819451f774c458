//! # Device and Host Bridge Traits
//!
//! Abstraction traits implemented per host platform and per device family.
//!
//! ## Overview
//!
//! This crate is the contract between the synchronization engine and the code
//! that actually talks to hardware or to the host's storage. The engine only
//! ever sees these traits, so a new device family or host platform is added by
//! implementing them, never by touching the engine.
//!
//! ## Traits
//!
//! ### Devices
//! - [`ConnectionAssistant`](device::ConnectionAssistant) - Classify a raw bus/mount id and describe it
//! - [`DriverFactory`](device::DriverFactory) - Build a driver for a device family
//! - [`DeviceDriver`](device::DeviceDriver) - Native handshake, enumeration, transfer, metadata and folders
//!
//! ### Host
//! - [`FileSystemAccess`](storage::FileSystemAccess) - Staging and source-file I/O
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Implementations
//!
//! | Family / Host | Implementation Crate |
//! |---------------|----------------------|
//! | Desktop host  | `bridge-desktop` (`TokioFileSystem`) |
//! | Mass storage  | `bridge-desktop` (`MassStorageDriver`) |
//! | MTP (virtual) | `bridge-desktop`, feature `virtual-device` |
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Drivers map their
//! transport's detection codes onto the connection variants
//! (`NoDeviceAttached`, `ConnectionFailed`, `ResourceExhausted`,
//! `WrongFamily`) and everything else onto `Io` or `OperationFailed`.
//! Metadata values a device refuses are not errors; they come back as
//! [`FieldRejection`](device::FieldRejection)s.
//!
//! ## Thread Safety
//!
//! All traits require `Send + Sync`. Drivers take `&mut self` for native calls;
//! the engine guarantees one in-flight call per device.
//!
//! ## Example
//!
//! ```ignore
//! use bridge_traits::device::{ConnectionAssistant, DeviceDescriptor, DeviceFamily, RawDevice};
//!
//! struct UmsAssistant;
//!
//! impl ConnectionAssistant for UmsAssistant {
//!     fn family(&self) -> DeviceFamily {
//!         DeviceFamily::MassStorage
//!     }
//!
//!     fn identify(&self, raw: &RawDevice) -> bool {
//!         raw.mount_path.is_some() && raw.speaks("ums")
//!     }
//!
//!     fn describe(&self, raw: &RawDevice) -> Option<DeviceDescriptor> {
//!         let id = raw.id.clone()?;
//!         Some(DeviceDescriptor::from_raw(raw, id, self.family()))
//!     }
//! }
//! ```

pub mod device;
pub mod error;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use device::{
    ConnectionAssistant, DeviceDescriptor, DeviceDriver, DeviceFamily, DeviceInfo, DriverFactory,
    FieldRejection, FileType, NativeFolder, NativeId, NativePlaylist, NativeTrack, RawDevice,
    RawDeviceId, StorageCapacity, ROOT_FOLDER,
};
pub use storage::{FileMetadata, FileSystemAccess};
pub use time::{Clock, ConsoleLogger, LogEntry, LogLevel, LoggerSink, SystemClock};

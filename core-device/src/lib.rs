//! # Core Device
//!
//! Device-side half of the sync engine: one [`DeviceSession`] per attached
//! device, owning the native handle, the track arena and the cached folder
//! tree.
//!
//! ## Overview
//!
//! - [`AssistantChain`] classifies raw devices and produces descriptors.
//! - [`DriverRegistry`] selects the family driver when a session opens.
//! - [`DeviceSession`] runs the handshake, enumerates tracks and playlists,
//!   moves bytes and maintains folders, serializing native calls.
//! - [`CapabilityRegistry`] answers which operation classes a family supports.
//! - [`SessionRegistry`] tracks live sessions with explicit register and
//!   unregister calls.
//!
//! Tracks are addressed by generational [`NativeTrackKey`] values; no native
//! record is ever handed out by reference across the crate boundary.

pub mod arena;
pub mod capability;
pub mod cursor;
pub mod error;
pub mod folders;
pub mod probe;
pub mod registry;
pub mod session;

pub use arena::{NativeTrackKey, TrackArena};
pub use capability::{Capability, CapabilityRegistry, CapabilitySet};
pub use cursor::TrackCursor;
pub use error::{DeviceError, Result};
pub use folders::{FolderCache, FolderNode, MUSIC_FOLDER_NAME};
pub use probe::{AssistantChain, DriverRegistry};
pub use registry::SessionRegistry;
pub use session::{DeviceSession, SentTrack, SessionId, SessionOptions, SessionState};

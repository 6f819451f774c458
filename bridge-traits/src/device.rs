//! Device Family Seams
//!
//! Types and traits shared between the engine and concrete device-family
//! implementations.
//!
//! ## Overview
//!
//! - [`ConnectionAssistant`] classifies a raw bus/mount identifier and turns it
//!   into a [`DeviceDescriptor`] without opening the device.
//! - [`DriverFactory`] builds a [`DeviceDriver`] for a descriptor's family.
//! - [`DeviceDriver`] owns the native handle and speaks the family's protocol:
//!   enumeration, byte transfer, metadata writes, folders and playlists.
//!
//! Native records ([`NativeTrack`], [`NativeFolder`], [`NativePlaylist`]) are
//! plain owned values. Drivers hand out copies; the engine keeps the
//! authoritative set in its own arena.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{BridgeError, Result};

/// Numeric object id as assigned by the device. `0` is the root folder and
/// doubles as "no parent".
pub type NativeId = u32;

/// Id of the device root folder.
pub const ROOT_FOLDER: NativeId = 0;

// ============================================================================
// Identification
// ============================================================================

/// Device family tag, selecting the driver at `open()` time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceFamily {
    /// MTP-style object protocol devices.
    Mtp,
    /// Disk-mounted players exposing a plain file tree.
    MassStorage,
    /// Optical audio discs.
    AudioCd,
}

impl DeviceFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceFamily::Mtp => "mtp",
            DeviceFamily::MassStorage => "mass-storage",
            DeviceFamily::AudioCd => "audio-cd",
        }
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Opaque bus address or mount identifier reported by the host's hotplug layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawDeviceId(String);

impl RawDeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RawDeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RawDeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Advertised capability metadata of a device that has not been opened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawDevice {
    pub id: Option<RawDeviceId>,
    pub vendor: Option<String>,
    pub product: Option<String>,
    pub serial: Option<String>,
    /// Supported-protocol strings, e.g. `"mtp"` or `"ums"`.
    pub protocols: Vec<String>,
    pub mount_path: Option<PathBuf>,
}

impl RawDevice {
    pub fn new(id: impl Into<RawDeviceId>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn with_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = Some(vendor.into());
        self
    }

    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.product = Some(product.into());
        self
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    pub fn with_mount_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.mount_path = Some(path.into());
        self
    }

    /// Case-insensitive check for an advertised protocol.
    pub fn speaks(&self, protocol: &str) -> bool {
        self.protocols
            .iter()
            .any(|p| p.eq_ignore_ascii_case(protocol))
    }
}

impl From<String> for RawDeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Immutable identity of one attached device instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    id: RawDeviceId,
    family: DeviceFamily,
    display_name: String,
    serial: Option<String>,
    mount_path: Option<PathBuf>,
    previously_known: bool,
}

impl DeviceDescriptor {
    pub fn new(id: RawDeviceId, family: DeviceFamily, display_name: impl Into<String>) -> Self {
        Self {
            id,
            family,
            display_name: display_name.into(),
            serial: None,
            mount_path: None,
            previously_known: false,
        }
    }

    /// Builds a descriptor from raw metadata, naming it after the product,
    /// then the vendor, then the raw id.
    pub fn from_raw(raw: &RawDevice, id: RawDeviceId, family: DeviceFamily) -> Self {
        let display_name = raw
            .product
            .clone()
            .or_else(|| raw.vendor.clone())
            .unwrap_or_else(|| id.to_string());

        Self {
            id,
            family,
            display_name,
            serial: raw.serial.clone(),
            mount_path: raw.mount_path.clone(),
            previously_known: false,
        }
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    pub fn with_mount_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.mount_path = Some(path.into());
        self
    }

    pub fn with_previously_known(mut self, known: bool) -> Self {
        self.previously_known = known;
        self
    }

    pub fn id(&self) -> &RawDeviceId {
        &self.id
    }

    pub fn family(&self) -> DeviceFamily {
        self.family
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    pub fn mount_path(&self) -> Option<&Path> {
        self.mount_path.as_deref()
    }

    pub fn previously_known(&self) -> bool {
        self.previously_known
    }
}

// ============================================================================
// Native records
// ============================================================================

/// Audio container as the device labels it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FileType {
    Mp3,
    Ogg,
    Wma,
    Mp4,
    M4a,
    Aac,
    Flac,
    Wav,
    #[default]
    Unknown,
}

impl FileType {
    /// Maps a file extension (without dot, any case) to a file type.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "mp3" => FileType::Mp3,
            "ogg" | "oga" => FileType::Ogg,
            "wma" => FileType::Wma,
            "mp4" => FileType::Mp4,
            "m4a" => FileType::M4a,
            "aac" => FileType::Aac,
            "flac" => FileType::Flac,
            "wav" => FileType::Wav,
            _ => FileType::Unknown,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or_default()
    }

    pub fn extension(&self) -> &'static str {
        match self {
            FileType::Mp3 => "mp3",
            FileType::Ogg => "ogg",
            FileType::Wma => "wma",
            FileType::Mp4 => "mp4",
            FileType::M4a => "m4a",
            FileType::Aac => "aac",
            FileType::Flac => "flac",
            FileType::Wav => "wav",
            FileType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// One track as the device stores it.
///
/// `item_id` is `0` until the device has accepted the object. `rating` uses the
/// device scale (0-100) and `date` the device's date string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeTrack {
    pub item_id: NativeId,
    pub parent_id: NativeId,
    pub storage_id: u32,
    pub title: Option<String>,
    pub album: Option<String>,
    pub artist: Option<String>,
    pub album_artist: Option<String>,
    pub genre: Option<String>,
    pub composer: Option<String>,
    pub date: Option<String>,
    pub duration_ms: u64,
    pub bitrate: u32,
    pub sample_rate: u32,
    pub file_size: u64,
    pub track_number: u32,
    pub disc_number: u32,
    pub rating: u16,
    pub play_count: u32,
    pub file_type: FileType,
    pub filename: String,
}

impl NativeTrack {
    /// An empty shell not yet known to the device.
    pub fn shell(parent_id: NativeId, storage_id: u32) -> Self {
        Self {
            parent_id,
            storage_id,
            ..Default::default()
        }
    }

    pub fn is_registered(&self) -> bool {
        self.item_id != 0
    }
}

/// Folder as the device reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeFolder {
    pub id: NativeId,
    pub name: String,
    pub parent_id: NativeId,
    pub storage_id: u32,
}

/// Playlist as the device reports it: a name and ordered member ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativePlaylist {
    pub id: NativeId,
    pub name: String,
    pub tracks: Vec<NativeId>,
}

/// Raw storage figures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageCapacity {
    pub total_bytes: u64,
    pub free_bytes: u64,
}

impl StorageCapacity {
    pub fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.free_bytes)
    }
}

/// What the handshake learned about the device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub serial: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    /// Folder the device advertises for music, if any.
    pub default_music_folder: Option<NativeId>,
    pub default_storage: u32,
}

/// A metadata field the device refused. Partial failure: the remaining fields
/// were still applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRejection {
    pub field: String,
    pub reason: String,
}

impl FieldRejection {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for FieldRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Per-family probe. Pure classification: never opens the device.
///
/// Returning `false`/`None` is the normal "not mine" answer; several
/// assistants are tried in sequence.
pub trait ConnectionAssistant: Send + Sync {
    fn family(&self) -> DeviceFamily;

    /// True when the device advertises the transport this assistant handles.
    fn identify(&self, raw: &RawDevice) -> bool;

    /// Descriptor for a device this assistant identified.
    fn describe(&self, raw: &RawDevice) -> Option<DeviceDescriptor>;
}

/// Native protocol driver for one device family.
///
/// All methods touching the native handle take `&mut self`; the engine
/// serializes calls per session, so implementations need no internal locking.
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    fn family(&self) -> DeviceFamily;

    /// Handshake: open the raw handle and read identity information.
    async fn open(&mut self, descriptor: &DeviceDescriptor) -> Result<DeviceInfo>;

    /// Release the native handle. Must tolerate repeated calls.
    async fn close(&mut self) -> Result<()>;

    async fn capacity(&mut self) -> Result<StorageCapacity>;

    /// Full track listing with every field populated.
    async fn list_tracks(&mut self) -> Result<Vec<NativeTrack>>;

    async fn list_folders(&mut self) -> Result<Vec<NativeFolder>>;

    async fn create_folder(
        &mut self,
        name: &str,
        parent_id: NativeId,
        storage_id: u32,
    ) -> Result<NativeId>;

    /// Copy one track's bytes to a local path.
    async fn get_track(&mut self, track: &NativeTrack, destination: &Path) -> Result<()>;

    /// Push a local file into the shell `track`, assigning `item_id` on
    /// success. Fields the device refuses are reported, not raised.
    ///
    /// On error no object may remain on the device: whatever the driver
    /// created before the failure is removed, and `track` stays unregistered.
    async fn send_track(
        &mut self,
        source: &Path,
        track: &mut NativeTrack,
    ) -> Result<Vec<FieldRejection>>;

    async fn delete_object(&mut self, id: NativeId) -> Result<()>;

    /// Write in-memory field changes to the device's metadata store.
    async fn update_metadata(&mut self, track: &NativeTrack) -> Result<Vec<FieldRejection>>;

    fn supported_formats(&self) -> Vec<FileType>;

    async fn list_playlists(&mut self) -> Result<Vec<NativePlaylist>> {
        Ok(Vec::new())
    }

    async fn save_playlist(&mut self, name: &str, _tracks: &[NativeId]) -> Result<NativeId> {
        Err(BridgeError::Unsupported(format!(
            "{} devices have no playlists (saving '{}')",
            self.family(),
            name
        )))
    }

    async fn rename_playlist(&mut self, id: NativeId, _name: &str) -> Result<()> {
        Err(BridgeError::Unsupported(format!(
            "{} devices have no playlists (renaming {})",
            self.family(),
            id
        )))
    }

    async fn delete_playlist(&mut self, id: NativeId) -> Result<()> {
        Err(BridgeError::Unsupported(format!(
            "{} devices have no playlists (deleting {})",
            self.family(),
            id
        )))
    }
}

/// Builds drivers for one family.
pub trait DriverFactory: Send + Sync {
    fn family(&self) -> DeviceFamily;

    fn create(&self, descriptor: &DeviceDescriptor) -> Result<Box<dyn DeviceDriver>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;

    mock! {
        Assistant {}

        impl ConnectionAssistant for Assistant {
            fn family(&self) -> DeviceFamily;
            fn identify(&self, raw: &RawDevice) -> bool;
            fn describe(&self, raw: &RawDevice) -> Option<DeviceDescriptor>;
        }
    }

    #[test]
    fn test_file_type_extension_map() {
        assert_eq!(FileType::from_extension("MP3"), FileType::Mp3);
        assert_eq!(FileType::from_extension("oga"), FileType::Ogg);
        assert_eq!(FileType::from_extension("flac"), FileType::Flac);
        assert_eq!(FileType::from_extension("xyz"), FileType::Unknown);
        assert_eq!(FileType::from_path(Path::new("/a/b/song.m4a")), FileType::M4a);
        assert_eq!(FileType::from_path(Path::new("/a/b/noext")), FileType::Unknown);
        assert_eq!(FileType::Wma.extension(), "wma");
    }

    #[test]
    fn test_descriptor_display_name_fallback() {
        let id = RawDeviceId::new("usb:001,004");

        let raw = RawDevice::new("usb:001,004")
            .with_vendor("Acme")
            .with_product("Player 3000");
        let desc = DeviceDescriptor::from_raw(&raw, id.clone(), DeviceFamily::Mtp);
        assert_eq!(desc.display_name(), "Player 3000");

        let raw = RawDevice::new("usb:001,004").with_vendor("Acme");
        let desc = DeviceDescriptor::from_raw(&raw, id.clone(), DeviceFamily::Mtp);
        assert_eq!(desc.display_name(), "Acme");

        let raw = RawDevice::new("usb:001,004");
        let desc = DeviceDescriptor::from_raw(&raw, id, DeviceFamily::Mtp);
        assert_eq!(desc.display_name(), "usb:001,004");
        assert!(!desc.previously_known());
    }

    #[test]
    fn test_raw_device_protocol_match_is_case_insensitive() {
        let raw = RawDevice::new("usb:1").with_protocol("MTP");
        assert!(raw.speaks("mtp"));
        assert!(!raw.speaks("ums"));
    }

    #[test]
    fn test_capacity_used() {
        let cap = StorageCapacity {
            total_bytes: 1000,
            free_bytes: 250,
        };
        assert_eq!(cap.used_bytes(), 750);

        let odd = StorageCapacity {
            total_bytes: 10,
            free_bytes: 20,
        };
        assert_eq!(odd.used_bytes(), 0);
    }

    #[test]
    fn test_native_shell_is_unregistered() {
        let shell = NativeTrack::shell(42, 65537);
        assert!(!shell.is_registered());
        assert_eq!(shell.parent_id, 42);
        assert_eq!(shell.storage_id, 65537);
    }

    #[test]
    fn test_assistant_used_through_trait_object() {
        let mut assistant = MockAssistant::new();
        assistant
            .expect_identify()
            .returning(|raw| raw.speaks("mtp"));
        assistant.expect_describe().returning(|raw| {
            raw.id
                .clone()
                .map(|id| DeviceDescriptor::from_raw(raw, id, DeviceFamily::Mtp))
        });

        let assistant: Box<dyn ConnectionAssistant> = Box::new(assistant);
        let raw = RawDevice::new("usb:2").with_protocol("mtp");
        assert!(assistant.identify(&raw));
        assert_eq!(
            assistant.describe(&raw).map(|d| d.family()),
            Some(DeviceFamily::Mtp)
        );
    }

    #[test]
    fn test_native_track_serializes() {
        let track = NativeTrack {
            item_id: 7,
            title: Some("Song A".into()),
            file_type: FileType::Mp3,
            ..Default::default()
        };
        let json = serde_json::to_string(&track).unwrap();
        let back: NativeTrack = serde_json::from_str(&json).unwrap();
        assert_eq!(back, track);
    }
}

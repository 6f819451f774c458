//! In-Memory MTP-Like Device
//!
//! A complete object-protocol device held in memory: tracks, folders and
//! playlists with device-assigned ids, a storage budget and an optional
//! advertised music folder. Used by demos and by the engine's integration
//! tests, so it also supports fault injection:
//!
//! - a handshake error or delay,
//! - failing a specific `send_track` call (after the object was created),
//! - failing `get_track` for given ids,
//! - refusing individual metadata fields,
//! - unplugging mid-session.
//!
//! [`VirtualDevice`] is a cheap handle; clones share the same device, so a
//! test can keep one to inspect or sabotage the device a session has open.

use async_trait::async_trait;
use bridge_traits::device::{
    ConnectionAssistant, DeviceDescriptor, DeviceDriver, DeviceFamily, DeviceInfo, DriverFactory,
    FieldRejection, FileType, NativeFolder, NativeId, NativePlaylist, NativeTrack, RawDevice,
    RawDeviceId, StorageCapacity, ROOT_FOLDER,
};
use bridge_traits::error::{BridgeError, Result};
use bytes::Bytes;
use core_async::fs;
use core_async::sync::Mutex;
use core_async::time::{sleep, Duration};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

const DEFAULT_STORAGE: u32 = 0x0001_0001;
const DEFAULT_TOTAL_BYTES: u64 = 1024 * 1024 * 1024;

/// Detection failures the handshake can be told to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeFault {
    NoDevice,
    ConnectionError,
    MemoryAllocation,
}

#[derive(Debug, Default)]
struct Faults {
    handshake: Option<HandshakeFault>,
    handshake_delay: Duration,
    op_latency: Duration,
    /// 1-based index of the `send_track` call that fails.
    fail_send_call: Option<usize>,
    fail_get: HashSet<NativeId>,
    refuse_fields: HashSet<String>,
}

#[derive(Debug)]
struct State {
    serial: String,
    manufacturer: String,
    model: String,
    total_bytes: u64,
    advertise_music_folder: bool,
    music_folder: Option<NativeId>,
    next_id: NativeId,
    tracks: BTreeMap<NativeId, (NativeTrack, Bytes)>,
    folders: BTreeMap<NativeId, NativeFolder>,
    playlists: BTreeMap<NativeId, NativePlaylist>,
    plugged_in: bool,
    open: bool,
    send_calls: usize,
    faults: Faults,
}

impl State {
    fn allocate_id(&mut self) -> NativeId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn used_bytes(&self) -> u64 {
        self.tracks.values().map(|(_, b)| b.len() as u64).sum()
    }

    fn check_connected(&self) -> Result<()> {
        if !self.plugged_in {
            return Err(BridgeError::NoDeviceAttached);
        }
        if !self.open {
            return Err(BridgeError::OperationFailed("device not open".to_string()));
        }
        Ok(())
    }

    fn folder_exists(&self, id: NativeId) -> bool {
        id == ROOT_FOLDER || self.folders.contains_key(&id)
    }

    fn apply_refusals(&self, track: &mut NativeTrack) -> Vec<FieldRejection> {
        let mut rejections = Vec::new();
        for field in &self.faults.refuse_fields {
            let cleared = match field.as_str() {
                "title" => track.title.take().is_some(),
                "album" => track.album.take().is_some(),
                "artist" => track.artist.take().is_some(),
                "album_artist" => track.album_artist.take().is_some(),
                "genre" => track.genre.take().is_some(),
                "composer" => track.composer.take().is_some(),
                "date" => track.date.take().is_some(),
                "rating" => std::mem::take(&mut track.rating) != 0,
                "play_count" => std::mem::take(&mut track.play_count) != 0,
                "file_type" => {
                    std::mem::replace(&mut track.file_type, FileType::Unknown)
                        != FileType::Unknown
                }
                _ => false,
            };
            if cleared {
                rejections.push(FieldRejection::new(field.clone(), "refused by device"));
            }
        }
        rejections.sort_by(|a, b| a.field.cmp(&b.field));
        rejections
    }
}

/// Shared handle to one in-memory device.
#[derive(Debug, Clone)]
pub struct VirtualDevice {
    id: RawDeviceId,
    state: Arc<Mutex<State>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl VirtualDevice {
    /// An empty 1 GiB device with an advertised "Music" folder.
    pub fn new(id: impl Into<String>) -> Self {
        let mut state = State {
            serial: "VIRT-0001".to_string(),
            manufacturer: "Virtual".to_string(),
            model: "Virtual Player".to_string(),
            total_bytes: DEFAULT_TOTAL_BYTES,
            advertise_music_folder: true,
            music_folder: None,
            next_id: 1,
            tracks: BTreeMap::new(),
            folders: BTreeMap::new(),
            playlists: BTreeMap::new(),
            plugged_in: true,
            open: false,
            send_calls: 0,
            faults: Faults::default(),
        };
        let music = state.allocate_id();
        state.folders.insert(
            music,
            NativeFolder {
                id: music,
                name: "Music".to_string(),
                parent_id: ROOT_FOLDER,
                storage_id: DEFAULT_STORAGE,
            },
        );
        state.music_folder = Some(music);

        Self {
            id: RawDeviceId::new(id),
            state: Arc::new(Mutex::new(state)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn id(&self) -> &RawDeviceId {
        &self.id
    }

    /// Advertised metadata as a hotplug layer would report it.
    pub async fn raw(&self) -> RawDevice {
        let state = self.state.lock().await;
        RawDevice::new(self.id.clone())
            .with_vendor(state.manufacturer.clone())
            .with_product(state.model.clone())
            .with_serial(state.serial.clone())
            .with_protocol("mtp")
    }

    pub async fn set_serial(&self, serial: impl Into<String>) {
        self.state.lock().await.serial = serial.into();
    }

    pub async fn set_total_bytes(&self, total: u64) {
        self.state.lock().await.total_bytes = total;
    }

    /// Stop advertising the default music folder (the folder itself stays).
    pub async fn hide_music_folder(&self) {
        self.state.lock().await.advertise_music_folder = false;
    }

    pub async fn fail_handshake(&self, fault: HandshakeFault) {
        self.state.lock().await.faults.handshake = Some(fault);
    }

    pub async fn clear_handshake_fault(&self) {
        self.state.lock().await.faults.handshake = None;
    }

    pub async fn set_handshake_delay(&self, delay: Duration) {
        self.state.lock().await.faults.handshake_delay = delay;
    }

    /// Latency added to every native call after the handshake.
    pub async fn set_op_latency(&self, latency: Duration) {
        self.state.lock().await.faults.op_latency = latency;
    }

    /// The `nth` send from now on (1-based) creates the object, then fails
    /// and removes it again.
    pub async fn fail_nth_send(&self, nth: usize) {
        let mut state = self.state.lock().await;
        state.faults.fail_send_call = Some(state.send_calls + nth);
    }

    pub async fn fail_get(&self, id: NativeId) {
        self.state.lock().await.faults.fail_get.insert(id);
    }

    pub async fn refuse_field(&self, field: impl Into<String>) {
        self.state.lock().await.faults.refuse_fields.insert(field.into());
    }

    pub async fn unplug(&self) {
        self.state.lock().await.plugged_in = false;
    }

    /// Puts a track directly onto the device, creating its folder path.
    pub async fn seed_track(&self, folder_path: &[&str], mut track: NativeTrack, data: Bytes) -> NativeId {
        let mut state = self.state.lock().await;
        let mut parent = ROOT_FOLDER;
        for segment in folder_path {
            let existing = state
                .folders
                .values()
                .find(|f| f.parent_id == parent && f.name == *segment)
                .map(|f| f.id);
            parent = match existing {
                Some(id) => id,
                None => {
                    let id = state.allocate_id();
                    state.folders.insert(
                        id,
                        NativeFolder {
                            id,
                            name: segment.to_string(),
                            parent_id: parent,
                            storage_id: DEFAULT_STORAGE,
                        },
                    );
                    id
                }
            };
        }

        let id = state.allocate_id();
        track.item_id = id;
        track.parent_id = parent;
        track.storage_id = DEFAULT_STORAGE;
        track.file_size = data.len() as u64;
        state.tracks.insert(id, (track, data));
        id
    }

    pub async fn seed_playlist(&self, name: &str, tracks: Vec<NativeId>) -> NativeId {
        let mut state = self.state.lock().await;
        let id = state.allocate_id();
        state.playlists.insert(
            id,
            NativePlaylist {
                id,
                name: name.to_string(),
                tracks,
            },
        );
        id
    }

    pub async fn track_count(&self) -> usize {
        self.state.lock().await.tracks.len()
    }

    pub async fn track(&self, id: NativeId) -> Option<NativeTrack> {
        self.state.lock().await.tracks.get(&id).map(|(t, _)| t.clone())
    }

    pub async fn folders(&self) -> Vec<NativeFolder> {
        self.state.lock().await.folders.values().cloned().collect()
    }

    pub async fn is_open(&self) -> bool {
        self.state.lock().await.open
    }

    /// Highest number of native calls observed in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn driver(&self) -> VirtualDeviceDriver {
        VirtualDeviceDriver {
            device: self.clone(),
        }
    }
}

/// Driver bound to one [`VirtualDevice`].
pub struct VirtualDeviceDriver {
    device: VirtualDevice,
}

struct CallGuard<'a> {
    in_flight: &'a AtomicUsize,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl VirtualDeviceDriver {
    /// Marks a native call in flight and applies the configured latency.
    async fn enter(&self) -> CallGuard<'_> {
        let now = self.device.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.device.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let latency = self.device.state.lock().await.faults.op_latency;
        if !latency.is_zero() {
            sleep(latency).await;
        }
        CallGuard {
            in_flight: &self.device.in_flight,
        }
    }
}

#[async_trait]
impl DeviceDriver for VirtualDeviceDriver {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::Mtp
    }

    async fn open(&mut self, descriptor: &DeviceDescriptor) -> Result<DeviceInfo> {
        if descriptor.family() != DeviceFamily::Mtp {
            return Err(BridgeError::WrongFamily {
                expected: DeviceFamily::Mtp.to_string(),
                found: descriptor.family().to_string(),
            });
        }

        let (fault, delay) = {
            let state = self.device.state.lock().await;
            if !state.plugged_in {
                return Err(BridgeError::NoDeviceAttached);
            }
            (state.faults.handshake, state.faults.handshake_delay)
        };

        if !delay.is_zero() {
            sleep(delay).await;
        }

        match fault {
            Some(HandshakeFault::NoDevice) => return Err(BridgeError::NoDeviceAttached),
            Some(HandshakeFault::ConnectionError) => {
                return Err(BridgeError::ConnectionFailed(
                    "error opening raw device".to_string(),
                ))
            }
            Some(HandshakeFault::MemoryAllocation) => {
                return Err(BridgeError::ResourceExhausted(
                    "memory allocation failed during init".to_string(),
                ))
            }
            None => {}
        }

        let mut state = self.device.state.lock().await;
        state.open = true;
        debug!(device = %self.device.id, "Virtual device opened");

        Ok(DeviceInfo {
            serial: Some(state.serial.clone()),
            manufacturer: Some(state.manufacturer.clone()),
            model: Some(state.model.clone()),
            default_music_folder: state
                .music_folder
                .filter(|_| state.advertise_music_folder),
            default_storage: DEFAULT_STORAGE,
        })
    }

    async fn close(&mut self) -> Result<()> {
        self.device.state.lock().await.open = false;
        Ok(())
    }

    async fn capacity(&mut self) -> Result<StorageCapacity> {
        let _call = self.enter().await;
        let state = self.device.state.lock().await;
        state.check_connected()?;
        Ok(StorageCapacity {
            total_bytes: state.total_bytes,
            free_bytes: state.total_bytes.saturating_sub(state.used_bytes()),
        })
    }

    async fn list_tracks(&mut self) -> Result<Vec<NativeTrack>> {
        let _call = self.enter().await;
        let state = self.device.state.lock().await;
        state.check_connected()?;
        Ok(state.tracks.values().map(|(t, _)| t.clone()).collect())
    }

    async fn list_folders(&mut self) -> Result<Vec<NativeFolder>> {
        let _call = self.enter().await;
        let state = self.device.state.lock().await;
        state.check_connected()?;
        Ok(state.folders.values().cloned().collect())
    }

    async fn create_folder(
        &mut self,
        name: &str,
        parent_id: NativeId,
        storage_id: u32,
    ) -> Result<NativeId> {
        let _call = self.enter().await;
        let mut state = self.device.state.lock().await;
        state.check_connected()?;
        if !state.folder_exists(parent_id) {
            return Err(BridgeError::ObjectNotFound(parent_id));
        }
        let id = state.allocate_id();
        state.folders.insert(
            id,
            NativeFolder {
                id,
                name: name.to_string(),
                parent_id,
                storage_id,
            },
        );
        Ok(id)
    }

    async fn get_track(&mut self, track: &NativeTrack, destination: &Path) -> Result<()> {
        let _call = self.enter().await;
        let data = {
            let state = self.device.state.lock().await;
            state.check_connected()?;
            if state.faults.fail_get.contains(&track.item_id) {
                return Err(BridgeError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("read error on object {}", track.item_id),
                )));
            }
            state
                .tracks
                .get(&track.item_id)
                .map(|(_, b)| b.clone())
                .ok_or(BridgeError::ObjectNotFound(track.item_id))?
        };
        fs::write(destination, &data).await?;
        Ok(())
    }

    async fn send_track(
        &mut self,
        source: &Path,
        track: &mut NativeTrack,
    ) -> Result<Vec<FieldRejection>> {
        let _call = self.enter().await;
        let data = Bytes::from(fs::read(source).await?);

        let mut state = self.device.state.lock().await;
        state.check_connected()?;
        if !state.folder_exists(track.parent_id) {
            return Err(BridgeError::ObjectNotFound(track.parent_id));
        }
        let free = state.total_bytes.saturating_sub(state.used_bytes());
        if data.len() as u64 > free {
            return Err(BridgeError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "device storage full",
            )));
        }

        state.send_calls += 1;
        let mut stored = track.clone();
        let rejections = state.apply_refusals(&mut stored);
        let id = state.allocate_id();
        stored.item_id = id;
        stored.file_size = data.len() as u64;
        if stored.filename.is_empty() {
            stored.filename = source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
        }
        state.tracks.insert(id, (stored.clone(), data));

        if state.faults.fail_send_call == Some(state.send_calls) {
            // The object exists on the device at this point; a failed transfer
            // leaves nothing behind.
            state.tracks.remove(&id);
            return Err(BridgeError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "transfer aborted by device",
            )));
        }

        *track = stored;
        Ok(rejections)
    }

    async fn delete_object(&mut self, id: NativeId) -> Result<()> {
        let _call = self.enter().await;
        let mut state = self.device.state.lock().await;
        state.check_connected()?;
        if state.tracks.remove(&id).is_some() || state.playlists.remove(&id).is_some() {
            for playlist in state.playlists.values_mut() {
                playlist.tracks.retain(|t| *t != id);
            }
            return Ok(());
        }
        if state.folders.contains_key(&id) {
            let has_children = state.folders.values().any(|f| f.parent_id == id)
                || state.tracks.values().any(|(t, _)| t.parent_id == id);
            if has_children {
                return Err(BridgeError::OperationFailed(format!(
                    "folder {} is not empty",
                    id
                )));
            }
            state.folders.remove(&id);
            return Ok(());
        }
        Err(BridgeError::ObjectNotFound(id))
    }

    async fn update_metadata(&mut self, track: &NativeTrack) -> Result<Vec<FieldRejection>> {
        let _call = self.enter().await;
        let mut state = self.device.state.lock().await;
        state.check_connected()?;
        let mut updated = track.clone();
        let rejections = state.apply_refusals(&mut updated);
        let (stored, _) = state
            .tracks
            .get_mut(&track.item_id)
            .ok_or(BridgeError::ObjectNotFound(track.item_id))?;
        let keep_size = stored.file_size;
        *stored = updated;
        stored.file_size = keep_size;
        Ok(rejections)
    }

    fn supported_formats(&self) -> Vec<FileType> {
        vec![
            FileType::Mp3,
            FileType::Wma,
            FileType::Ogg,
            FileType::M4a,
            FileType::Mp4,
            FileType::Aac,
            FileType::Flac,
            FileType::Wav,
        ]
    }

    async fn list_playlists(&mut self) -> Result<Vec<NativePlaylist>> {
        let _call = self.enter().await;
        let state = self.device.state.lock().await;
        state.check_connected()?;
        Ok(state.playlists.values().cloned().collect())
    }

    async fn save_playlist(&mut self, name: &str, tracks: &[NativeId]) -> Result<NativeId> {
        let _call = self.enter().await;
        let mut state = self.device.state.lock().await;
        state.check_connected()?;
        if let Some(missing) = tracks.iter().find(|t| !state.tracks.contains_key(t)) {
            return Err(BridgeError::ObjectNotFound(*missing));
        }
        let id = state.allocate_id();
        state.playlists.insert(
            id,
            NativePlaylist {
                id,
                name: name.to_string(),
                tracks: tracks.to_vec(),
            },
        );
        Ok(id)
    }

    async fn rename_playlist(&mut self, id: NativeId, name: &str) -> Result<()> {
        let _call = self.enter().await;
        let mut state = self.device.state.lock().await;
        state.check_connected()?;
        let playlist = state
            .playlists
            .get_mut(&id)
            .ok_or(BridgeError::ObjectNotFound(id))?;
        playlist.name = name.to_string();
        Ok(())
    }

    async fn delete_playlist(&mut self, id: NativeId) -> Result<()> {
        let _call = self.enter().await;
        let mut state = self.device.state.lock().await;
        state.check_connected()?;
        state
            .playlists
            .remove(&id)
            .map(|_| ())
            .ok_or(BridgeError::ObjectNotFound(id))
    }
}

// ============================================================================
// Assistant and factory
// ============================================================================

/// Claims devices advertising the `mtp` protocol.
#[derive(Debug, Default, Clone)]
pub struct VirtualDeviceAssistant;

impl ConnectionAssistant for VirtualDeviceAssistant {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::Mtp
    }

    fn identify(&self, raw: &RawDevice) -> bool {
        raw.id.is_some() && raw.speaks("mtp")
    }

    fn describe(&self, raw: &RawDevice) -> Option<DeviceDescriptor> {
        if !self.identify(raw) {
            return None;
        }
        let id = raw.id.clone()?;
        Some(DeviceDescriptor::from_raw(raw, id, DeviceFamily::Mtp))
    }
}

/// Hands out drivers for the virtual devices it was built with.
#[derive(Debug, Default, Clone)]
pub struct VirtualDeviceFactory {
    devices: HashMap<RawDeviceId, VirtualDevice>,
}

impl VirtualDeviceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, device: VirtualDevice) -> Self {
        self.devices.insert(device.id().clone(), device);
        self
    }
}

impl DriverFactory for VirtualDeviceFactory {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::Mtp
    }

    fn create(&self, descriptor: &DeviceDescriptor) -> Result<Box<dyn DeviceDriver>> {
        self.devices
            .get(descriptor.id())
            .map(|d| Box::new(d.driver()) as Box<dyn DeviceDriver>)
            .ok_or(BridgeError::NoDeviceAttached)
    }
}

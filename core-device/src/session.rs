//! # Device Session
//!
//! Owns the open native handle to one device for its whole connected
//! lifetime, together with the track arena and the folder cache mirrored from
//! the device.
//!
//! ## State Machine
//!
//! ```text
//! Closed → Opening → Ready → Closed
//!             ↓
//!           Closed   (handshake failed)
//! ```
//!
//! ## Concurrency
//!
//! Every call that touches the driver goes through one FIFO mutex, so at most
//! one native operation is in flight per session and later callers queue
//! rather than fail. The arena and folder cache sit behind read-write locks.
//! Lock order is driver, then tracks, then folders. The lifecycle state is
//! also published on a watch channel, so [`DeviceSession::state`] never waits
//! behind the driver lock.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let session = DeviceSession::new(descriptor, driver);
//! session.open(&SessionOptions::default()).await?;
//!
//! let mut cursor = session.enumerate_tracks().await?;
//! cursor.prepare();
//! while !cursor.is_end() {
//!     let (key, track) = cursor.fetch().unwrap();
//!     println!("{} {:?}", key, track.title);
//!     cursor.advance();
//! }
//!
//! session.close().await?;
//! ```

use crate::arena::{NativeTrackKey, TrackArena};
use crate::capability::{Capability, CapabilityRegistry, CapabilitySet};
use crate::cursor::TrackCursor;
use crate::error::{DeviceError, Result};
use crate::folders::{FolderCache, FolderNode};
use bridge_traits::device::{
    DeviceDescriptor, DeviceDriver, DeviceFamily, DeviceInfo, FieldRejection, FileType, NativeId,
    NativePlaylist, NativeTrack, StorageCapacity,
};
use core_async::sync::{watch, Mutex, RwLock};
use core_async::time::{timeout, Duration};
use core_runtime::config::{EngineConfig, DEFAULT_HANDSHAKE_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a device session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a session ID from a string
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self> {
        Ok(Self(
            Uuid::parse_str(s).map_err(|e| DeviceError::InvalidSessionId(e.to_string()))?,
        ))
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SessionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<SessionId> for Uuid {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Closed,
    /// Handshake in progress
    Opening,
    Ready,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Closed => "closed",
            SessionState::Opening => "opening",
            SessionState::Ready => "ready",
        }
    }
}

impl FromStr for SessionState {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "closed" => Ok(SessionState::Closed),
            "opening" => Ok(SessionState::Opening),
            "ready" => Ok(SessionState::Ready),
            _ => Err(DeviceError::InvalidStateTransition {
                from: s.to_string(),
                to: s.to_string(),
                reason: format!("unknown session state '{}'", s),
            }),
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Handshake settings taken from the engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub handshake_timeout: Duration,
    /// Serial the device must report, if set.
    pub verify_serial: Option<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            verify_serial: None,
        }
    }
}

impl From<&EngineConfig> for SessionOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            handshake_timeout: config.handshake_timeout,
            verify_serial: config.verify_serial.clone(),
        }
    }
}

/// A track the device accepted through `send_track_from_local`.
#[derive(Debug, Clone)]
pub struct SentTrack {
    pub key: NativeTrackKey,
    pub track: NativeTrack,
    pub rejections: Vec<FieldRejection>,
}

struct Inner {
    state: SessionState,
    /// Mirrors `state` for readers that must not wait on the driver lock.
    published: watch::Sender<SessionState>,
    driver: Box<dyn DeviceDriver>,
    info: Option<DeviceInfo>,
}

impl Inner {
    fn transition(&mut self, to: SessionState) -> Result<()> {
        let valid = matches!(
            (self.state, to),
            (SessionState::Closed, SessionState::Opening)
                | (SessionState::Opening, SessionState::Ready)
                | (SessionState::Opening, SessionState::Closed)
                | (SessionState::Ready, SessionState::Closed)
        );

        if !valid {
            return Err(DeviceError::InvalidStateTransition {
                from: self.state.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!(
                    "Cannot transition from {} to {}",
                    self.state.as_str(),
                    to.as_str()
                ),
            });
        }

        self.state = to;
        self.published.send_replace(to);
        Ok(())
    }

    fn ready_driver(&mut self) -> Result<&mut dyn DeviceDriver> {
        if self.state != SessionState::Ready {
            return Err(DeviceError::NotReady {
                state: self.state.as_str().to_string(),
            });
        }
        Ok(self.driver.as_mut())
    }

    fn storage_id(&self) -> u32 {
        self.info.as_ref().map(|i| i.default_storage).unwrap_or(0)
    }
}

// ============================================================================
// Session
// ============================================================================

pub struct DeviceSession {
    id: SessionId,
    descriptor: DeviceDescriptor,
    capabilities: CapabilitySet,
    formats: Vec<FileType>,
    inner: Mutex<Inner>,
    state: watch::Receiver<SessionState>,
    tracks: RwLock<TrackArena>,
    folders: RwLock<FolderCache>,
}

impl DeviceSession {
    /// Creates a closed session around `driver`.
    pub fn new(descriptor: DeviceDescriptor, driver: Box<dyn DeviceDriver>) -> Self {
        let capabilities = CapabilityRegistry::for_family(descriptor.family());
        let formats = driver.supported_formats();
        let (published, state) = watch::channel(SessionState::Closed);
        Self {
            id: SessionId::new(),
            descriptor,
            capabilities,
            formats,
            inner: Mutex::new(Inner {
                state: SessionState::Closed,
                published,
                driver,
                info: None,
            }),
            state,
            tracks: RwLock::new(TrackArena::new()),
            folders: RwLock::new(FolderCache::new()),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn family(&self) -> DeviceFamily {
        self.descriptor.family()
    }

    pub fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    /// Fails with `UnsupportedOperation` unless this family supports `capability`.
    pub fn require(&self, capability: Capability) -> Result<()> {
        CapabilityRegistry::require(self.family(), capability)
    }

    /// File types the driver can store.
    pub fn supported_formats(&self) -> &[FileType] {
        &self.formats
    }

    /// Current lifecycle state. Does not wait for an in-flight handshake
    /// or native call, so `Opening` is observable while the device answers.
    pub async fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub async fn is_ready(&self) -> bool {
        self.state().await == SessionState::Ready
    }

    /// Identity learned during the handshake.
    pub async fn info(&self) -> Option<DeviceInfo> {
        self.inner.lock().await.info.clone()
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Performs the device handshake and loads the folder tree.
    ///
    /// # Errors
    ///
    /// Connection errors (`NoDeviceAttached`, `ConnectionFailed`,
    /// `ResourceExhausted`, `WrongFamily`, `HandshakeTimeout`) are terminal
    /// for this attempt; the session returns to `Closed`.
    #[instrument(skip(self, options), fields(session_id = %self.id, device = %self.descriptor.id()))]
    pub async fn open(&self, options: &SessionOptions) -> Result<DeviceInfo> {
        let mut inner = self.inner.lock().await;
        inner.transition(SessionState::Opening)?;

        match self.handshake(&mut inner, options).await {
            Ok(info) => {
                inner.transition(SessionState::Ready)?;
                inner.info = Some(info.clone());
                info!(
                    family = %self.family(),
                    model = info.model.as_deref().unwrap_or("unknown"),
                    "Device session ready"
                );
                Ok(info)
            }
            Err(e) => {
                if let Err(close_err) = inner.driver.close().await {
                    debug!(error = %close_err, "Driver close after failed handshake");
                }
                inner.transition(SessionState::Closed)?;
                warn!(error = %e, "Device handshake failed");
                Err(e)
            }
        }
    }

    async fn handshake(&self, inner: &mut Inner, options: &SessionOptions) -> Result<DeviceInfo> {
        if inner.driver.family() != self.family() {
            return Err(DeviceError::WrongFamily {
                expected: self.family().to_string(),
                found: inner.driver.family().to_string(),
            });
        }

        let info = match timeout(
            options.handshake_timeout,
            inner.driver.open(&self.descriptor),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(DeviceError::HandshakeTimeout(
                    options.handshake_timeout.as_millis() as u64,
                ))
            }
        };

        if let Some(expected) = options.verify_serial.as_deref() {
            if info.serial.as_deref() != Some(expected) {
                return Err(DeviceError::ConnectionFailed(
                    "device serial does not match the expected serial".to_string(),
                ));
            }
        }

        let folders = inner.driver.list_folders().await?;
        let mut cache = self.folders.write().await;
        cache.rebuild(folders);
        debug!(folders = cache.len(), "Folder tree loaded");

        Ok(info)
    }

    /// Releases the native handle. Closing a closed session is a no-op.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub async fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state == SessionState::Closed {
            return Ok(());
        }

        if let Err(e) = inner.driver.close().await {
            warn!(error = %e, "Driver reported an error while closing");
        }
        inner.transition(SessionState::Closed)?;
        inner.info = None;
        self.tracks.write().await.clear();
        self.folders.write().await.clear();
        info!("Device session closed");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Raw storage figures from the device.
    pub async fn storage(&self) -> Result<StorageCapacity> {
        let mut inner = self.inner.lock().await;
        Ok(inner.ready_driver()?.capacity().await?)
    }

    /// `(used, total)` bytes. Capacity is advisory, so failures read as zero.
    pub async fn capacity(&self) -> (u64, u64) {
        match self.storage().await {
            Ok(capacity) => (capacity.used_bytes(), capacity.total_bytes),
            Err(e) => {
                debug!(error = %e, "Capacity query failed");
                (0, 0)
            }
        }
    }

    /// Re-reads the full track listing and returns a cursor over it.
    ///
    /// Every call replaces the arena, so keys from earlier listings go stale.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub async fn enumerate_tracks(&self) -> Result<TrackCursor> {
        self.require(Capability::Readable)?;
        let mut inner = self.inner.lock().await;
        let listing = inner.ready_driver()?.list_tracks().await?;

        let mut arena = self.tracks.write().await;
        let keys = arena.rebuild(listing);
        let items: Vec<_> = keys
            .into_iter()
            .filter_map(|key| arena.get(key).map(|t| (key, t.clone())))
            .collect();
        debug!(tracks = items.len(), "Track listing refreshed");
        Ok(TrackCursor::new(items))
    }

    /// Playlists as `(name, member ids)` records.
    pub async fn enumerate_playlists(&self) -> Result<Vec<NativePlaylist>> {
        self.require(Capability::Readable)?;
        let mut inner = self.inner.lock().await;
        Ok(inner.ready_driver()?.list_playlists().await?)
    }

    pub async fn track(&self, key: NativeTrackKey) -> Option<NativeTrack> {
        self.tracks.read().await.get(key).cloned()
    }

    pub async fn key_of(&self, id: NativeId) -> Option<NativeTrackKey> {
        self.tracks.read().await.key_of(id)
    }

    pub async fn track_count(&self) -> usize {
        self.tracks.read().await.len()
    }

    /// Every known track with its key, in arena order.
    pub async fn tracks(&self) -> Vec<(NativeTrackKey, NativeTrack)> {
        self.tracks
            .read()
            .await
            .iter()
            .map(|(k, t)| (k, t.clone()))
            .collect()
    }

    // ------------------------------------------------------------------------
    // Transfer primitives
    // ------------------------------------------------------------------------

    /// Copies one track's bytes to `destination`.
    #[instrument(skip(self, destination), fields(session_id = %self.id, key = %key))]
    pub async fn get_track_to_local(&self, key: NativeTrackKey, destination: &Path) -> Result<()> {
        self.require(Capability::Readable)?;
        let mut inner = self.inner.lock().await;
        let driver = inner.ready_driver()?;
        let track = self
            .tracks
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| DeviceError::TrackNotFound(key.to_string()))?;

        driver.get_track(&track, destination).await?;
        debug!(item_id = track.item_id, "Track copied from device");
        Ok(())
    }

    /// Pushes a local file into `shell` and registers the result.
    ///
    /// The shell only reaches the arena once the device accepted the bytes;
    /// on failure nothing is registered.
    #[instrument(skip(self, source, shell), fields(session_id = %self.id, parent_id = shell.parent_id))]
    pub async fn send_track_from_local(
        &self,
        source: &Path,
        mut shell: NativeTrack,
    ) -> Result<SentTrack> {
        self.require(Capability::Writable)?;
        let mut inner = self.inner.lock().await;
        let storage_id = inner.storage_id();
        let driver = inner.ready_driver()?;
        if shell.storage_id == 0 {
            shell.storage_id = storage_id;
        }

        let rejections = driver.send_track(source, &mut shell).await?;
        for rejection in &rejections {
            warn!(field = %rejection.field, reason = %rejection.reason, "Device rejected field");
        }

        let key = self.tracks.write().await.insert(shell.clone());
        debug!(item_id = shell.item_id, "Track registered");
        Ok(SentTrack {
            key,
            track: shell,
            rejections,
        })
    }

    /// Deletes a track, playlist or empty folder by native id.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub async fn delete(&self, id: NativeId) -> Result<()> {
        self.require(Capability::Writable)?;
        let mut inner = self.inner.lock().await;
        let driver = inner.ready_driver()?;
        driver.delete_object(id).await?;

        let mut arena = self.tracks.write().await;
        if let Some(key) = arena.key_of(id) {
            arena.remove(key);
            return Ok(());
        }
        drop(arena);

        let is_folder = self.folders.read().await.get(id).is_some();
        if is_folder {
            let listing = driver.list_folders().await?;
            self.folders.write().await.rebuild(listing);
        }
        Ok(())
    }

    /// Writes in-memory field changes of `track` to the device.
    ///
    /// Refused fields come back as rejections; the rest are applied.
    #[instrument(skip(self, track), fields(session_id = %self.id, key = %key))]
    pub async fn update_metadata(
        &self,
        key: NativeTrackKey,
        track: NativeTrack,
    ) -> Result<Vec<FieldRejection>> {
        self.require(Capability::Writable)?;
        let mut inner = self.inner.lock().await;
        let driver = inner.ready_driver()?;

        let known = self
            .tracks
            .read()
            .await
            .get(key)
            .map(|t| t.item_id)
            .ok_or_else(|| DeviceError::TrackNotFound(key.to_string()))?;
        if known != track.item_id {
            return Err(DeviceError::TrackNotFound(format!(
                "{} does not hold native id {}",
                key, track.item_id
            )));
        }

        let rejections = driver.update_metadata(&track).await?;
        for rejection in &rejections {
            warn!(field = %rejection.field, reason = %rejection.reason, "Device rejected field");
        }
        if let Some(slot) = self.tracks.write().await.get_mut(key) {
            *slot = track;
        }
        Ok(rejections)
    }

    // ------------------------------------------------------------------------
    // Folders
    // ------------------------------------------------------------------------

    async fn refresh_folders_if_stale(&self, driver: &mut dyn DeviceDriver) -> Result<()> {
        if self.folders.read().await.is_stale() {
            let listing = driver.list_folders().await?;
            self.folders.write().await.rebuild(listing);
        }
        Ok(())
    }

    /// Snapshot of the cached folder tree.
    pub async fn list_folders(&self) -> Result<Vec<FolderNode>> {
        let mut inner = self.inner.lock().await;
        let driver = inner.ready_driver()?;
        self.refresh_folders_if_stale(driver).await?;
        Ok(self.folders.read().await.snapshot())
    }

    pub async fn find_folder(&self, name: &str, parent_id: NativeId) -> Result<Option<NativeId>> {
        let mut inner = self.inner.lock().await;
        let driver = inner.ready_driver()?;
        self.refresh_folders_if_stale(driver).await?;
        Ok(self.folders.read().await.find(name, parent_id))
    }

    /// Creates a folder and re-fetches the tree from the device.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub async fn create_folder(&self, name: &str, parent_id: NativeId) -> Result<NativeId> {
        self.require(Capability::Writable)?;
        let mut inner = self.inner.lock().await;
        let storage_id = inner.storage_id();
        let driver = inner.ready_driver()?;
        self.create_folder_locked(driver, name, parent_id, storage_id)
            .await
    }

    async fn create_folder_locked(
        &self,
        driver: &mut dyn DeviceDriver,
        name: &str,
        parent_id: NativeId,
        storage_id: u32,
    ) -> Result<NativeId> {
        if !self.folders.read().await.contains(parent_id) {
            return Err(DeviceError::FolderNotFound {
                name: name.to_string(),
                parent_id,
            });
        }
        let id = driver.create_folder(name, parent_id, storage_id).await?;
        self.folders.write().await.invalidate();
        let listing = driver.list_folders().await?;
        self.folders.write().await.rebuild(listing);
        debug!(folder_id = id, parent_id, "Folder created");
        Ok(id)
    }

    /// Folder used when no template applies: advertised music folder, a
    /// folder named "Music", or the root.
    pub async fn default_parent(&self) -> Result<NativeId> {
        let mut inner = self.inner.lock().await;
        let advertised = inner.info.as_ref().and_then(|i| i.default_music_folder);
        let driver = inner.ready_driver()?;
        self.refresh_folders_if_stale(driver).await?;
        Ok(self.folders.read().await.default_parent(advertised))
    }

    /// Resolves `segments` one level at a time below `base`.
    ///
    /// Names match case-insensitively among the children of the current
    /// parent. Missing levels are created when `create` is set; otherwise
    /// resolution fails with `FolderNotFound`. The whole walk holds the
    /// session's native lock, so concurrent resolutions of the same path
    /// cannot create duplicate folders.
    #[instrument(skip(self, segments), fields(session_id = %self.id, depth = segments.len()))]
    pub async fn resolve_folder_path(
        &self,
        base: NativeId,
        segments: &[String],
        create: bool,
    ) -> Result<NativeId> {
        if create {
            self.require(Capability::Writable)?;
        }
        let mut inner = self.inner.lock().await;
        let storage_id = inner.storage_id();
        let driver = inner.ready_driver()?;
        self.refresh_folders_if_stale(driver).await?;

        let mut parent = base;
        for segment in segments.iter().filter(|s| !s.is_empty()) {
            let existing = self.folders.read().await.find(segment, parent);
            parent = match existing {
                Some(id) => id,
                None if create => {
                    self.create_folder_locked(driver, segment, parent, storage_id)
                        .await?
                }
                None => {
                    return Err(DeviceError::FolderNotFound {
                        name: segment.clone(),
                        parent_id: parent,
                    })
                }
            };
        }
        Ok(parent)
    }

    // ------------------------------------------------------------------------
    // Playlists
    // ------------------------------------------------------------------------

    pub async fn save_playlist(&self, name: &str, tracks: &[NativeId]) -> Result<NativeId> {
        self.require(Capability::Playlist)?;
        let mut inner = self.inner.lock().await;
        Ok(inner.ready_driver()?.save_playlist(name, tracks).await?)
    }

    pub async fn rename_playlist(&self, id: NativeId, name: &str) -> Result<()> {
        self.require(Capability::Playlist)?;
        let mut inner = self.inner.lock().await;
        Ok(inner.ready_driver()?.rename_playlist(id, name).await?)
    }

    pub async fn delete_playlist(&self, id: NativeId) -> Result<()> {
        self.require(Capability::Playlist)?;
        let mut inner = self.inner.lock().await;
        Ok(inner.ready_driver()?.delete_playlist(id).await?)
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("id", &self.id)
            .field("device", &self.descriptor.id())
            .field("family", &self.family())
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_desktop::{HandshakeFault, VirtualDevice, VirtualDeviceAssistant};
    use bridge_traits::device::{ConnectionAssistant, ROOT_FOLDER};
    use bytes::Bytes;
    use std::sync::Arc;

    fn song(title: &str, artist: &str, album: &str) -> NativeTrack {
        NativeTrack {
            title: Some(title.to_string()),
            artist: Some(artist.to_string()),
            album: Some(album.to_string()),
            file_type: FileType::Mp3,
            ..Default::default()
        }
    }

    async fn session_for(device: &VirtualDevice) -> DeviceSession {
        let raw = device.raw().await;
        let descriptor = VirtualDeviceAssistant.describe(&raw).unwrap();
        DeviceSession::new(descriptor, Box::new(device.driver()))
    }

    async fn ready(device: &VirtualDevice) -> DeviceSession {
        let session = session_for(device).await;
        session.open(&SessionOptions::default()).await.unwrap();
        session
    }

    #[core_async::test]
    async fn test_open_reaches_ready_and_close_is_idempotent() {
        let device = VirtualDevice::new("usb-1");
        let session = session_for(&device).await;
        assert_eq!(session.state().await, SessionState::Closed);

        let info = session.open(&SessionOptions::default()).await.unwrap();
        assert_eq!(info.model.as_deref(), Some("Virtual Player"));
        assert!(session.is_ready().await);
        assert!(device.is_open().await);

        session.close().await.unwrap();
        session.close().await.unwrap();
        assert_eq!(session.state().await, SessionState::Closed);
        assert!(!device.is_open().await);
    }

    #[core_async::test]
    async fn test_state_reports_opening_during_handshake() {
        let device = VirtualDevice::new("usb-slow");
        device.set_handshake_delay(Duration::from_millis(200)).await;
        let session = Arc::new(session_for(&device).await);

        let opening = Arc::clone(&session);
        let task = core_async::task::spawn(async move {
            opening.open(&SessionOptions::default()).await
        });
        core_async::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.state().await, SessionState::Opening);
        assert!(!session.is_ready().await);

        task.await.unwrap().unwrap();
        assert_eq!(session.state().await, SessionState::Ready);
    }

    #[core_async::test]
    async fn test_open_twice_is_invalid_transition() {
        let device = VirtualDevice::new("usb-1");
        let session = ready(&device).await;
        let err = session.open(&SessionOptions::default()).await.unwrap_err();
        assert!(matches!(err, DeviceError::InvalidStateTransition { .. }));
    }

    #[core_async::test]
    async fn test_handshake_faults_are_connection_errors() {
        for (fault, expect_alloc) in [
            (HandshakeFault::NoDevice, false),
            (HandshakeFault::ConnectionError, false),
            (HandshakeFault::MemoryAllocation, true),
        ] {
            let device = VirtualDevice::new("usb-1");
            device.fail_handshake(fault).await;
            let session = session_for(&device).await;

            let err = session.open(&SessionOptions::default()).await.unwrap_err();
            assert!(err.is_connection_error());
            assert_eq!(
                matches!(err, DeviceError::ResourceExhausted(_)),
                expect_alloc
            );
            assert_eq!(session.state().await, SessionState::Closed);
        }
    }

    #[core_async::test]
    async fn test_handshake_is_bounded_by_timeout() {
        let device = VirtualDevice::new("usb-slow");
        device.set_handshake_delay(Duration::from_millis(500)).await;
        let session = session_for(&device).await;

        let options = SessionOptions {
            handshake_timeout: Duration::from_millis(20),
            verify_serial: None,
        };
        let err = session.open(&options).await.unwrap_err();
        assert!(matches!(err, DeviceError::HandshakeTimeout(20)));
        assert_eq!(session.state().await, SessionState::Closed);
    }

    #[core_async::test]
    async fn test_serial_verification() {
        let device = VirtualDevice::new("usb-1");
        device.set_serial("ABC123").await;
        let session = session_for(&device).await;

        let wrong = SessionOptions {
            verify_serial: Some("XYZ".to_string()),
            ..Default::default()
        };
        let err = session.open(&wrong).await.unwrap_err();
        assert!(matches!(err, DeviceError::ConnectionFailed(_)));

        let right = SessionOptions {
            verify_serial: Some("ABC123".to_string()),
            ..Default::default()
        };
        session.open(&right).await.unwrap();
        assert!(session.is_ready().await);
    }

    #[core_async::test]
    async fn test_operations_require_ready_session() {
        let device = VirtualDevice::new("usb-1");
        let session = session_for(&device).await;
        let err = session.enumerate_tracks().await.unwrap_err();
        assert!(matches!(err, DeviceError::NotReady { ref state } if state == "closed"));
        assert_eq!(session.capacity().await, (0, 0));
    }

    #[core_async::test]
    async fn test_enumeration_yields_every_track() {
        let device = VirtualDevice::new("usb-1");
        for i in 0..4 {
            device
                .seed_track(
                    &["Music", "Foo"],
                    song(&format!("Song {}", i), "Foo", "Bar"),
                    Bytes::from_static(b"data"),
                )
                .await;
        }
        let session = ready(&device).await;

        let first: Vec<_> = session.enumerate_tracks().await.unwrap().collect();
        assert_eq!(first.len(), 4);
        assert!(first.iter().all(|(_, t)| t.artist.as_deref() == Some("Foo")));

        let second = session.enumerate_tracks().await.unwrap();
        assert_eq!(second.len(), 4);
        assert_eq!(session.track_count().await, 4);
        // Keys from the earlier listing are stale after a rescan.
        assert!(session.track(first[0].0).await.is_none());
    }

    #[core_async::test]
    async fn test_capacity_reports_used_and_total() {
        let device = VirtualDevice::new("usb-1");
        device.set_total_bytes(1000).await;
        device
            .seed_track(&[], song("A", "B", "C"), Bytes::from(vec![0u8; 100]))
            .await;
        let session = ready(&device).await;
        assert_eq!(session.capacity().await, (100, 1000));
    }

    #[core_async::test]
    async fn test_send_get_and_delete_track() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.mp3");
        std::fs::write(&source, b"payload").unwrap();

        let device = VirtualDevice::new("usb-1");
        let session = ready(&device).await;
        let parent = session.default_parent().await.unwrap();

        let sent = session
            .send_track_from_local(&source, NativeTrack::shell(parent, 0))
            .await
            .unwrap();
        assert!(sent.track.is_registered());
        assert_eq!(sent.track.parent_id, parent);
        assert_eq!(session.key_of(sent.track.item_id).await, Some(sent.key));

        let dest = dir.path().join("out.mp3");
        session.get_track_to_local(sent.key, &dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"payload");

        session.delete(sent.track.item_id).await.unwrap();
        assert!(session.track(sent.key).await.is_none());
        assert_eq!(device.track_count().await, 0);
    }

    #[core_async::test]
    async fn test_failed_send_registers_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.mp3");
        std::fs::write(&source, b"payload").unwrap();

        let device = VirtualDevice::new("usb-1");
        let session = ready(&device).await;
        device.fail_nth_send(1).await;

        let err = session
            .send_track_from_local(&source, NativeTrack::shell(ROOT_FOLDER, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::Io(_)));
        assert_eq!(session.track_count().await, 0);
        assert_eq!(session.enumerate_tracks().await.unwrap().len(), 0);
    }

    #[core_async::test]
    async fn test_update_metadata_reports_refused_fields() {
        let device = VirtualDevice::new("usb-1");
        device
            .seed_track(&[], song("A", "Artist", "Album"), Bytes::from_static(b"x"))
            .await;
        device.refuse_field("genre").await;
        let session = ready(&device).await;
        let (key, mut track) = session.enumerate_tracks().await.unwrap().next().unwrap();

        track.title = Some("Renamed".to_string());
        track.genre = Some("Jazz".to_string());
        let rejections = session.update_metadata(key, track.clone()).await.unwrap();

        assert_eq!(rejections.len(), 1);
        assert_eq!(rejections[0].field, "genre");
        let stored = device.track(track.item_id).await.unwrap();
        assert_eq!(stored.title.as_deref(), Some("Renamed"));
        assert_eq!(stored.genre, None);
    }

    #[core_async::test]
    async fn test_resolve_folder_path_creates_once() {
        let device = VirtualDevice::new("usb-1");
        let session = ready(&device).await;
        let base = session.default_parent().await.unwrap();
        let segments = vec!["Foo".to_string(), "Bar".to_string()];

        let first = session
            .resolve_folder_path(base, &segments, true)
            .await
            .unwrap();
        let second = session
            .resolve_folder_path(base, &segments, true)
            .await
            .unwrap();
        assert_eq!(first, second);
        // "Music" plus the two created levels.
        assert_eq!(device.folders().await.len(), 3);

        let lower = vec!["foo".to_string(), "BAR".to_string()];
        assert_eq!(
            session.resolve_folder_path(base, &lower, false).await.unwrap(),
            first
        );
    }

    #[core_async::test]
    async fn test_resolve_without_create_reports_missing_folder() {
        let device = VirtualDevice::new("usb-1");
        let session = ready(&device).await;

        let err = session
            .resolve_folder_path(ROOT_FOLDER, &["Nope".to_string()], false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DeviceError::FolderNotFound { ref name, parent_id: ROOT_FOLDER } if name == "Nope"
        ));
    }

    #[core_async::test]
    async fn test_default_parent_fallbacks() {
        let device = VirtualDevice::new("usb-1");
        device.hide_music_folder().await;
        let session = ready(&device).await;
        let music = session.find_folder("music", ROOT_FOLDER).await.unwrap();
        assert_eq!(session.default_parent().await.unwrap(), music.unwrap());
    }

    #[core_async::test]
    async fn test_created_folder_is_visible_immediately() {
        let device = VirtualDevice::new("usb-1");
        let session = ready(&device).await;

        let id = session.create_folder("Podcasts", ROOT_FOLDER).await.unwrap();
        let folders = session.list_folders().await.unwrap();
        assert!(folders.iter().any(|f| f.id == id && f.name == "Podcasts"));
        assert_eq!(
            session.find_folder("PODCASTS", ROOT_FOLDER).await.unwrap(),
            Some(id)
        );
    }

    #[core_async::test]
    async fn test_playlists() {
        let device = VirtualDevice::new("usb-1");
        let a = device
            .seed_track(&[], song("A", "x", "y"), Bytes::from_static(b"a"))
            .await;
        device.seed_playlist("Road", vec![a]).await;
        let session = ready(&device).await;

        let playlists = session.enumerate_playlists().await.unwrap();
        assert_eq!(playlists.len(), 1);
        assert_eq!(playlists[0].name, "Road");
        assert_eq!(playlists[0].tracks, vec![a]);

        let id = session.save_playlist("Gym", &[a]).await.unwrap();
        session.rename_playlist(id, "Run").await.unwrap();
        session.delete_playlist(playlists[0].id).await.unwrap();
        let names: Vec<_> = session
            .enumerate_playlists()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["Run"]);
    }

    #[core_async::test(flavor = "multi_thread")]
    async fn test_native_calls_are_serialized() {
        let device = VirtualDevice::new("usb-1");
        for i in 0..3 {
            device
                .seed_track(&[], song(&format!("{}", i), "a", "b"), Bytes::from_static(b"z"))
                .await;
        }
        let session = std::sync::Arc::new(ready(&device).await);
        device.set_op_latency(Duration::from_millis(5)).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let session = session.clone();
            handles.push(core_async::spawn(async move {
                session.enumerate_tracks().await.map(|c| c.len())
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 3);
        }
        assert_eq!(device.peak_in_flight(), 1);
    }
}

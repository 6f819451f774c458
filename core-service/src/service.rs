//! # Device Sync Service
//!
//! The host-facing entry point: probe attached devices, open sessions, and
//! run library and transfer operations against them.
//!
//! ## Overview
//!
//! `DeviceSyncService` owns the engine-wide pieces (worker pool, event bus,
//! staging area, session registry) and one [`SessionHandle`] per open
//! device. Handles bundle the session with its library bridge and transfer
//! pipeline. Operations are addressed by [`SessionId`]; once a device is
//! removed its id stops resolving and the host drops its handle.
//!
//! ## Lifecycle
//!
//! ```text
//! probe(raw) ─> DeviceDescriptor ─> open(descriptor) ─> OpenTask
//!                                                          │ wait()
//!                                                          v
//!        device_removed(raw id) / close(id) <── SessionHandle
//! ```
//!
//! ## Notifications
//!
//! Everything the host needs to refresh arrives on the event bus:
//! `Device` events for attach/open/removal, `Transfer` events for job
//! progress and completion, and `Library` events after any structural
//! change to a session's graph.

use crate::{CoreDependencies, CoreError, Result};
use bridge_traits::device::{DeviceDescriptor, NativeId, RawDevice, RawDeviceId};
use core_async::sync::RwLock;
use core_async::worker::{WorkerPool, WorkerTask};
use core_device::{
    AssistantChain, CapabilitySet, DeviceError, DeviceSession, DriverRegistry, NativeTrackKey,
    SessionId, SessionOptions, SessionRegistry,
};
use core_library::{
    EditOutcome, GraphDelta, GroupKind, HostTrack, HostTrackId, LibraryBridge, LibraryError,
};
use core_runtime::config::EngineConfig;
use core_runtime::events::{CoreEvent, DeviceEvent, EventBus, Receiver};
use core_sync::{
    library_event, JobHandle, PipelineSettings, StagedFile, StagingArea, TransferJobId,
    TransferPipeline,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

// ============================================================================
// Handles
// ============================================================================

/// Everything bound to one open device.
#[derive(Clone)]
pub struct SessionHandle {
    session: Arc<DeviceSession>,
    library: Arc<LibraryBridge>,
    pipeline: TransferPipeline,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.session.id()
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        self.session.descriptor()
    }

    pub fn capabilities(&self) -> CapabilitySet {
        self.session.capabilities()
    }

    pub fn session(&self) -> &Arc<DeviceSession> {
        &self.session
    }

    pub fn library(&self) -> &Arc<LibraryBridge> {
        &self.library
    }

    pub fn pipeline(&self) -> &TransferPipeline {
        &self.pipeline
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("session_id", &self.session.id())
            .field("device", self.session.descriptor().id())
            .finish()
    }
}

/// Pending `open`; resolves once the handshake and first scan finished.
#[derive(Debug)]
pub struct OpenTask {
    device_id: RawDeviceId,
    task: WorkerTask<Result<SessionHandle>>,
}

impl OpenTask {
    pub fn device_id(&self) -> &RawDeviceId {
        &self.device_id
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn wait(self) -> Result<SessionHandle> {
        self.task
            .await
            .map_err(|e| CoreError::Worker(e.to_string()))?
    }
}

/// A device playlist with members resolved to host tracks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPlaylist {
    pub id: NativeId,
    pub name: String,
    /// Members in playlist order; ids unknown to the library are dropped
    pub tracks: Vec<HostTrackId>,
}

// ============================================================================
// Service
// ============================================================================

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct DeviceSyncService {
    config: Arc<EngineConfig>,
    assistants: Arc<AssistantChain>,
    drivers: Arc<DriverRegistry>,
    registry: Arc<SessionRegistry>,
    handles: Arc<RwLock<HashMap<SessionId, SessionHandle>>>,
    events: EventBus,
    pool: WorkerPool,
    staging: Arc<StagingArea>,
}

impl DeviceSyncService {
    /// Builds the service and prepares the staging area.
    pub async fn new(config: EngineConfig, deps: CoreDependencies) -> Result<Self> {
        config.validate()?;
        let staging = StagingArea::new(
            Arc::clone(&config.file_system),
            config.staging_dir.clone(),
        )
        .await
        .map_err(|e| CoreError::InitializationFailed(e.to_string()))?;

        info!(
            workers = config.worker_count,
            template = %config.folder_template,
            assistants = deps.assistants.len(),
            "Device sync service ready"
        );
        Ok(Self {
            events: EventBus::new(config.event_buffer_size),
            pool: WorkerPool::new("device-io", config.worker_count),
            config: Arc::new(config),
            assistants: Arc::new(deps.assistants),
            drivers: Arc::new(deps.drivers),
            registry: Arc::new(SessionRegistry::new()),
            handles: Arc::new(RwLock::new(HashMap::new())),
            staging: Arc::new(staging),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Preferred target format from the host's settings, passed through.
    pub fn target_format(&self) -> Option<&str> {
        self.config.target_format.as_deref()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.events.subscribe()
    }

    // ------------------------------------------------------------------------
    // Probe and open
    // ------------------------------------------------------------------------

    /// Asks each connection assistant in turn whether it can own `raw`.
    pub fn probe(&self, raw: &RawDevice) -> Option<DeviceDescriptor> {
        let descriptor = self.assistants.probe(raw)?;
        self.events
            .emit(CoreEvent::Device(DeviceEvent::Attached {
                device_id: descriptor.id().to_string(),
                family: descriptor.family().to_string(),
                display_name: descriptor.display_name().to_string(),
            }))
            .ok();
        Some(descriptor)
    }

    /// Opens a session on the worker pool. The returned task resolves to the
    /// handle once the handshake and the initial scan completed.
    ///
    /// Must be called from within a runtime.
    pub fn open(&self, descriptor: DeviceDescriptor) -> OpenTask {
        let device_id = descriptor.id().clone();
        let service = self.clone();
        let task = self
            .pool
            .dispatch(async move { service.open_session(descriptor).await });
        OpenTask { device_id, task }
    }

    #[instrument(skip(self, descriptor), fields(device = %descriptor.id(), family = %descriptor.family()))]
    async fn open_session(&self, descriptor: DeviceDescriptor) -> Result<SessionHandle> {
        match self.try_open(descriptor.clone()).await {
            Ok((handle, delta)) => {
                self.events
                    .emit(CoreEvent::Device(DeviceEvent::Opened {
                        session_id: handle.id().to_string(),
                        device_id: descriptor.id().to_string(),
                        display_name: descriptor.display_name().to_string(),
                    }))
                    .ok();
                if !delta.is_empty() {
                    self.events.emit(library_event(&handle.session, delta)).ok();
                }
                info!(session_id = %handle.id(), "Device session ready");
                Ok(handle)
            }
            Err(e) => {
                warn!(error = %e, "Device open failed");
                self.events
                    .emit(CoreEvent::Device(DeviceEvent::OpenFailed {
                        device_id: descriptor.id().to_string(),
                        message: e.to_string(),
                        connection_error: e.is_connection_error(),
                    }))
                    .ok();
                Err(e)
            }
        }
    }

    async fn try_open(&self, descriptor: DeviceDescriptor) -> Result<(SessionHandle, GraphDelta)> {
        // Claimed before any driver exists so a racing open never touches
        // the native handle.
        self.registry.reserve(descriptor.id()).await?;
        let device_id = descriptor.id().clone();
        let result = self.open_reserved(descriptor).await;
        if result.is_err() {
            self.registry.release(&device_id).await;
        }
        result
    }

    async fn open_reserved(
        &self,
        descriptor: DeviceDescriptor,
    ) -> Result<(SessionHandle, GraphDelta)> {
        let driver = self.drivers.create(&descriptor)?;
        let session = Arc::new(DeviceSession::new(descriptor, driver));
        session.open(&SessionOptions::from(&*self.config)).await?;

        if let Err(e) = self.registry.register(Arc::clone(&session)).await {
            session.close().await.ok();
            return Err(e.into());
        }

        let library = Arc::new(LibraryBridge::new(Arc::clone(&session)));
        let delta = match library.rescan().await {
            Ok(delta) => delta,
            Err(e) => {
                // Close before unregistering so a retry cannot open the
                // device while this handle still owns it.
                session.close().await.ok();
                self.registry.unregister(session.id()).await;
                return Err(e.into());
            }
        };

        let pipeline = TransferPipeline::new(
            Arc::clone(&library),
            Arc::clone(&self.staging),
            Arc::clone(&self.config.file_system),
            self.pool.clone(),
            self.events.clone(),
            PipelineSettings::from(&*self.config),
        );
        let handle = SessionHandle {
            session,
            library,
            pipeline,
        };
        self.handles.write().await.insert(handle.id(), handle.clone());
        Ok((handle, delta))
    }

    // ------------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------------

    pub async fn session(&self, id: SessionId) -> Result<SessionHandle> {
        self.handles
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::SessionNotFound(id.to_string()))
    }

    pub async fn sessions(&self) -> Vec<SessionHandle> {
        self.handles.read().await.values().cloned().collect()
    }

    pub async fn capabilities(&self, id: SessionId) -> Result<CapabilitySet> {
        Ok(self.session(id).await?.capabilities())
    }

    /// `(used, total)` bytes; zero when the device cannot say.
    pub async fn capacity(&self, id: SessionId) -> Result<(u64, u64)> {
        Ok(self.session(id).await?.session.capacity().await)
    }

    /// The host lost the device. Closes its session if one is open.
    pub async fn device_removed(&self, device_id: &RawDeviceId) -> Result<()> {
        match self.registry.find_by_device(device_id).await {
            Some(session) => self.close(session.id()).await,
            None => {
                debug!(device = %device_id, "Removal of a device without session");
                Ok(())
            }
        }
    }

    /// Tears a session down: cancels its jobs, clears its staging files and
    /// graph, and releases the device.
    #[instrument(skip(self))]
    pub async fn close(&self, id: SessionId) -> Result<()> {
        let handle = self
            .handles
            .write()
            .await
            .remove(&id)
            .ok_or_else(|| CoreError::SessionNotFound(id.to_string()))?;

        if let Err(e) = handle.pipeline.shutdown().await {
            warn!(error = %e, "Staging cleanup failed");
        }
        let delta = handle.library.clear().await;
        if !delta.is_empty() {
            self.events.emit(library_event(&handle.session, delta)).ok();
        }
        if let Err(e) = handle.session.close().await {
            warn!(error = %e, "Device close failed");
        }
        // The device stays claimed until its native handle is released.
        self.registry.unregister(id).await;

        self.events
            .emit(CoreEvent::Device(DeviceEvent::Removed {
                session_id: id.to_string(),
                device_id: handle.descriptor().id().to_string(),
            }))
            .ok();
        info!("Session closed");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Library
    // ------------------------------------------------------------------------

    /// Re-enumerates the device and returns every track, sorted by title.
    pub async fn enumerate(&self, id: SessionId) -> Result<Vec<HostTrack>> {
        let handle = self.session(id).await?;
        let delta = handle.library.rescan().await?;
        if !delta.is_empty() {
            self.events.emit(library_event(&handle.session, delta)).ok();
        }
        Ok(handle.library.tracks().await)
    }

    /// Moves a track to another artist, album, genre, composer or year and
    /// writes the field to the device.
    pub async fn reassign_group(
        &self,
        id: SessionId,
        track: HostTrackId,
        kind: GroupKind,
        value: &str,
    ) -> Result<EditOutcome> {
        let handle = self.session(id).await?;
        let outcome = handle.library.reassign_group(track, kind, value).await?;
        if !outcome.delta.is_empty() {
            self.events
                .emit(library_event(&handle.session, outcome.delta))
                .ok();
        }
        Ok(outcome)
    }

    // ------------------------------------------------------------------------
    // Transfers
    // ------------------------------------------------------------------------

    pub async fn copy_in(&self, id: SessionId, tracks: Vec<HostTrack>) -> Result<JobHandle> {
        let handle = self.session(id).await?;
        Ok(handle.pipeline.copy_in(tracks).await)
    }

    pub async fn copy_out(&self, id: SessionId, tracks: &[HostTrackId]) -> Result<JobHandle> {
        let handle = self.session(id).await?;
        let keys = native_keys(&handle, tracks).await?;
        Ok(handle.pipeline.copy_out(keys).await)
    }

    pub async fn delete(&self, id: SessionId, tracks: &[HostTrackId]) -> Result<JobHandle> {
        let handle = self.session(id).await?;
        let keys = native_keys(&handle, tracks).await?;
        Ok(handle.pipeline.delete(keys).await)
    }

    pub async fn push_metadata(&self, id: SessionId, tracks: Vec<HostTrack>) -> Result<JobHandle> {
        let handle = self.session(id).await?;
        Ok(handle.pipeline.push_metadata(tracks).await)
    }

    pub async fn cancel_job(&self, id: SessionId, job: TransferJobId) -> Result<()> {
        let handle = self.session(id).await?;
        Ok(handle.pipeline.cancel(job).await?)
    }

    /// Stages a track for playback; the file goes away with the returned value.
    pub async fn prepare_to_play(&self, id: SessionId, track: HostTrackId) -> Result<StagedFile> {
        let handle = self.session(id).await?;
        let key = native_keys(&handle, &[track]).await?.remove(0);
        Ok(handle.pipeline.prepare_to_play(key).await?)
    }

    // ------------------------------------------------------------------------
    // Playlists
    // ------------------------------------------------------------------------

    pub async fn playlists(&self, id: SessionId) -> Result<Vec<HostPlaylist>> {
        let handle = self.session(id).await?;
        let native = handle.session.enumerate_playlists().await?;

        let mut playlists = Vec::with_capacity(native.len());
        for playlist in native {
            let mut tracks = Vec::with_capacity(playlist.tracks.len());
            for member in &playlist.tracks {
                match handle.library.host_for_native_id(*member).await {
                    Some(host) => tracks.push(host),
                    None => debug!(item_id = member, "Playlist member not in library"),
                }
            }
            playlists.push(HostPlaylist {
                id: playlist.id,
                name: playlist.name,
                tracks,
            });
        }
        Ok(playlists)
    }

    pub async fn save_playlist(
        &self,
        id: SessionId,
        name: &str,
        tracks: &[HostTrackId],
    ) -> Result<NativeId> {
        let handle = self.session(id).await?;
        let mut members = Vec::with_capacity(tracks.len());
        for key in native_keys(&handle, tracks).await? {
            let native = handle.session.track(key).await.ok_or_else(|| {
                DeviceError::TrackNotFound(key.to_string())
            })?;
            members.push(native.item_id);
        }
        Ok(handle.session.save_playlist(name, &members).await?)
    }

    pub async fn rename_playlist(&self, id: SessionId, playlist: NativeId, name: &str) -> Result<()> {
        let handle = self.session(id).await?;
        Ok(handle.session.rename_playlist(playlist, name).await?)
    }

    pub async fn delete_playlist(&self, id: SessionId, playlist: NativeId) -> Result<()> {
        let handle = self.session(id).await?;
        Ok(handle.session.delete_playlist(playlist).await?)
    }
}

impl std::fmt::Debug for DeviceSyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSyncService")
            .field("config", &self.config)
            .field("assistants", &self.assistants)
            .field("drivers", &self.drivers)
            .field("pool", &self.pool)
            .field("staging", &self.staging)
            .finish()
    }
}

async fn native_keys(handle: &SessionHandle, tracks: &[HostTrackId]) -> Result<Vec<NativeTrackKey>> {
    let mut keys = Vec::with_capacity(tracks.len());
    for track in tracks {
        let key = handle
            .library
            .native_key(*track)
            .await
            .ok_or_else(|| LibraryError::NotFound {
                entity_type: "device track".to_string(),
                id: track.to_string(),
            })?;
        keys.push(key);
    }
    Ok(keys)
}

//! # Transfer Pipeline
//!
//! Runs copy-in, copy-out, delete and metadata-update work against one
//! device session as cancellable [`TransferJob`]s.
//!
//! ## Overview
//!
//! Every request becomes a job dispatched on the engine's worker pool and
//! returns a [`JobHandle`] at once. The handle resolves to the finished job;
//! progress and completion are also published on the [`EventBus`].
//!
//! Jobs are batches. Each item is attempted on its own: one failing item is
//! recorded and the batch continues. A job ends `Failed` only when every
//! item failed, carrying the first item's error.
//!
//! ## Copy-in steps
//!
//! 1. Preflight: duplicate check, format check, free-space check
//! 2. Destination folder from the folder template, creating missing levels
//! 3. Native shell carrying the host metadata
//! 4. Byte transfer via `send_track_from_local`
//! 5. Link into the library graph
//!
//! The cancellation token is checked between steps. Nothing is linked into
//! the identity map unless step 4 succeeded.
//!
//! ## Cancellation
//!
//! A job cancelled while still queued never starts. A running job stops at
//! the next checkpoint; items not yet started are recorded as skipped and
//! an item already transferring finishes.

use crate::folder_path::FolderTemplate;
use crate::job::{ItemOutcome, ItemResult, TransferJob, TransferJobId, TransferKind};
use crate::staging::{StagedFile, StagingArea};
use crate::{Result, SyncError};
use bridge_traits::device::{FieldRejection, FileType, NativeTrack};
use bridge_traits::storage::FileSystemAccess;
use bridge_traits::time::{Clock, SystemClock};
use core_async::sync::{CancellationToken, Mutex};
use core_async::worker::{WorkerPool, WorkerTask};
use core_device::{DeviceError, DeviceSession, NativeTrackKey};
use core_library::{encoding, GraphDelta, HostTrack, LibraryBridge};
use core_runtime::config::{EngineConfig, DEFAULT_FREE_SPACE_RESERVE};
use core_runtime::events::{CoreEvent, EventBus, LibraryEvent, TransferEvent};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

// ============================================================================
// Settings
// ============================================================================

/// Pipeline knobs taken from the engine configuration.
#[derive(Clone)]
pub struct PipelineSettings {
    pub template: FolderTemplate,
    /// Free space a copy-in must leave on the device
    pub free_space_reserve: u64,
    /// Stamps job creation, start and completion
    pub clock: Arc<dyn Clock>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            template: FolderTemplate::default(),
            free_space_reserve: DEFAULT_FREE_SPACE_RESERVE,
            clock: Arc::new(SystemClock),
        }
    }
}

impl From<&EngineConfig> for PipelineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            template: FolderTemplate::parse(&config.folder_template),
            free_space_reserve: config.free_space_reserve_bytes,
            clock: Arc::clone(&config.clock),
        }
    }
}

impl std::fmt::Debug for PipelineSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineSettings")
            .field("template", &self.template)
            .field("free_space_reserve", &self.free_space_reserve)
            .field("clock", &"Clock { ... }")
            .finish()
    }
}

// ============================================================================
// Job Handle
// ============================================================================

/// Completion handle for a dispatched job.
#[derive(Debug)]
pub struct JobHandle {
    id: TransferJobId,
    kind: TransferKind,
    token: CancellationToken,
    task: WorkerTask<TransferJob>,
}

impl JobHandle {
    pub fn id(&self) -> TransferJobId {
        self.id
    }

    pub fn kind(&self) -> TransferKind {
        self.kind
    }

    /// Requests cancellation. Takes effect before the job starts or at its
    /// next checkpoint.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the job to reach a terminal state.
    pub async fn wait(self) -> Result<TransferJob> {
        self.task
            .await
            .map_err(|e| SyncError::Worker(e.to_string()))
    }
}

/// One unit of work inside a job.
enum Item {
    CopyIn(HostTrack),
    CopyOut(NativeTrackKey),
    Delete(NativeTrackKey),
    MetadataUpdate(HostTrack),
}

/// What one successful item produced.
#[derive(Default)]
struct ItemEffect {
    rejections: Vec<FieldRejection>,
    delta: GraphDelta,
    local_path: Option<PathBuf>,
}

// ============================================================================
// Pipeline
// ============================================================================

/// Transfer orchestration for one device session.
///
/// Cheap to clone; clones share the session, library, pool and job table.
#[derive(Clone)]
pub struct TransferPipeline {
    session: Arc<DeviceSession>,
    library: Arc<LibraryBridge>,
    staging: Arc<StagingArea>,
    fs: Arc<dyn FileSystemAccess>,
    pool: WorkerPool,
    events: EventBus,
    settings: Arc<PipelineSettings>,
    active: Arc<Mutex<HashMap<TransferJobId, CancellationToken>>>,
}

impl TransferPipeline {
    pub fn new(
        library: Arc<LibraryBridge>,
        staging: Arc<StagingArea>,
        fs: Arc<dyn FileSystemAccess>,
        pool: WorkerPool,
        events: EventBus,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            session: Arc::clone(library.session()),
            library,
            staging,
            fs,
            pool,
            events,
            settings: Arc::new(settings),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn session(&self) -> &Arc<DeviceSession> {
        &self.session
    }

    pub fn library(&self) -> &Arc<LibraryBridge> {
        &self.library
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    /// Copies host tracks onto the device.
    pub async fn copy_in(&self, tracks: Vec<HostTrack>) -> JobHandle {
        self.submit(TransferKind::CopyIn, tracks.into_iter().map(Item::CopyIn).collect())
            .await
    }

    /// Stages device tracks into the local staging area. Best effort: each
    /// item succeeds or fails on its own.
    pub async fn copy_out(&self, keys: Vec<NativeTrackKey>) -> JobHandle {
        self.submit(TransferKind::CopyOut, keys.into_iter().map(Item::CopyOut).collect())
            .await
    }

    /// Deletes tracks from the device, forgetting each one only after the
    /// device confirmed the delete.
    pub async fn delete(&self, keys: Vec<NativeTrackKey>) -> JobHandle {
        self.submit(TransferKind::Delete, keys.into_iter().map(Item::Delete).collect())
            .await
    }

    /// Applies edited host tracks in memory, then pushes them to the device.
    pub async fn push_metadata(&self, tracks: Vec<HostTrack>) -> JobHandle {
        self.submit(
            TransferKind::MetadataUpdate,
            tracks.into_iter().map(Item::MetadataUpdate).collect(),
        )
        .await
    }

    /// Cancels a queued or running job.
    pub async fn cancel(&self, id: TransferJobId) -> Result<()> {
        let active = self.active.lock().await;
        let token = active.get(&id).ok_or_else(|| SyncError::JobNotFound {
            job_id: id.to_string(),
        })?;
        token.cancel();
        info!(job_id = %id, "Transfer cancellation requested");
        Ok(())
    }

    /// Jobs not yet in a terminal state.
    pub async fn active_jobs(&self) -> Vec<TransferJobId> {
        self.active.lock().await.keys().copied().collect()
    }

    /// Cancels every active job and clears this session's staging files.
    pub async fn shutdown(&self) -> Result<()> {
        for token in self.active.lock().await.values() {
            token.cancel();
        }
        self.staging.clear_session(self.session.id()).await
    }

    /// Stages one device track for playback. The file is removed when the
    /// returned value is dropped.
    #[instrument(skip(self), fields(session_id = %self.session.id()))]
    pub async fn prepare_to_play(&self, key: NativeTrackKey) -> Result<StagedFile> {
        let pipeline = self.clone();
        let path = self
            .pool
            .dispatch(async move { pipeline.stage(key).await })
            .await
            .map_err(|e| SyncError::Worker(e.to_string()))??;
        Ok(self.staging.adopt(path))
    }

    // ------------------------------------------------------------------------
    // Job execution
    // ------------------------------------------------------------------------

    async fn submit(&self, kind: TransferKind, items: Vec<Item>) -> JobHandle {
        let job = TransferJob::new_at(kind, self.session.id(), items.len(), self.now());
        let id = job.id;
        let token = CancellationToken::new();
        self.active.lock().await.insert(id, token.clone());

        self.events
            .emit(CoreEvent::Transfer(TransferEvent::Queued {
                job_id: id.to_string(),
                session_id: self.session.id().to_string(),
                kind: kind.to_string(),
                items: job.items as u64,
            }))
            .ok();
        debug!(job_id = %id, kind = %kind, items = job.items, "Transfer queued");

        let pipeline = self.clone();
        let task_token = token.clone();
        let task = self
            .pool
            .dispatch(async move { pipeline.execute(job, items, task_token).await });

        JobHandle {
            id,
            kind,
            token,
            task,
        }
    }

    #[instrument(skip(self, job, items, token), fields(job_id = %job.id, kind = %job.kind))]
    async fn execute(
        self,
        job: TransferJob,
        items: Vec<Item>,
        token: CancellationToken,
    ) -> TransferJob {
        let id = job.id;
        let job = if token.is_cancelled() {
            info!("Transfer cancelled before start");
            transition(job, |j| j.cancel_at(self.now()))
        } else {
            let job = transition(job, |j| j.start_at(self.now()));
            self.events
                .emit(CoreEvent::Transfer(TransferEvent::Started {
                    job_id: id.to_string(),
                    kind: job.kind.to_string(),
                }))
                .ok();
            self.run(job, items, &token).await
        };

        self.active.lock().await.remove(&id);
        if let Some(outcome) = job.outcome() {
            info!(
                status = %job.status,
                succeeded = job.succeeded(),
                failed = job.failed(),
                "Transfer finished"
            );
            self.events
                .emit(CoreEvent::Transfer(TransferEvent::JobCompleted {
                    job_id: id.to_string(),
                    kind: job.kind.to_string(),
                    outcome,
                }))
                .ok();
        }
        job
    }

    async fn run(
        &self,
        mut job: TransferJob,
        items: Vec<Item>,
        token: &CancellationToken,
    ) -> TransferJob {
        let mut cancelled = false;
        let mut first_error: Option<String> = None;
        let mut changes = GraphDelta::default();

        let mut items = items.into_iter().enumerate();
        for (index, item) in items.by_ref() {
            if token.is_cancelled() {
                self.record(&mut job, ItemResult::new(index, ItemOutcome::Skipped));
                cancelled = true;
                break;
            }
            match self.run_item(item, token).await {
                Ok(effect) => {
                    changes.merge(effect.delta);
                    let mut result = ItemResult::new(index, ItemOutcome::Succeeded)
                        .with_rejections(effect.rejections);
                    result.local_path = effect.local_path;
                    self.record(&mut job, result);
                }
                Err(SyncError::Cancelled) => {
                    self.record(&mut job, ItemResult::new(index, ItemOutcome::Skipped));
                    cancelled = true;
                    break;
                }
                Err(e) => {
                    warn!(item_index = index, error = %e, "Transfer item failed");
                    first_error.get_or_insert_with(|| e.to_string());
                    self.record(
                        &mut job,
                        ItemResult::new(index, ItemOutcome::Failed(e.to_string())),
                    );
                }
            }
        }
        for (index, _) in items {
            self.record(&mut job, ItemResult::new(index, ItemOutcome::Skipped));
        }

        if !changes.is_empty() {
            self.events.emit(library_event(&self.session, changes)).ok();
        }

        let now = self.now();
        if cancelled {
            transition(job, |j| j.cancel_at(now))
        } else if job.items > 0 && job.failed() == job.items {
            let message = first_error.unwrap_or_default();
            transition(job, |j| j.fail_at(message, now))
        } else {
            transition(job, |j| j.complete_at(now))
        }
    }

    async fn run_item(&self, item: Item, token: &CancellationToken) -> Result<ItemEffect> {
        match item {
            Item::CopyIn(track) => self.copy_in_one(track, token).await,
            Item::CopyOut(key) => {
                let path = self.stage(key).await?;
                Ok(ItemEffect {
                    local_path: Some(path),
                    ..Default::default()
                })
            }
            Item::Delete(key) => self.delete_one(key).await,
            Item::MetadataUpdate(track) => self.push_one(track).await,
        }
    }

    fn now(&self) -> i64 {
        self.settings.clock.unix_timestamp()
    }

    fn record(&self, job: &mut TransferJob, result: ItemResult) {
        if let ItemOutcome::Failed(message) = &result.outcome {
            self.events
                .emit(CoreEvent::Transfer(TransferEvent::ItemFailed {
                    job_id: job.id.to_string(),
                    item_index: result.index as u64,
                    message: message.clone(),
                }))
                .ok();
        }
        if let Err(e) = job.record_result(result) {
            error!(job_id = %job.id, error = %e, "Could not record item result");
        }
    }

    // ------------------------------------------------------------------------
    // Items
    // ------------------------------------------------------------------------

    async fn copy_in_one(&self, track: HostTrack, token: &CancellationToken) -> Result<ItemEffect> {
        let source = track
            .local_path
            .clone()
            .ok_or_else(|| SyncError::MissingSource(track.title.clone()))?;
        self.preflight(&track, &source).await?;

        checkpoint(token)?;
        let base = self.session.default_parent().await?;
        let segments = self.settings.template.expand(&track);
        let parent = self
            .session
            .resolve_folder_path(base, &segments, true)
            .await?;

        checkpoint(token)?;
        let shell = encoding::to_native(&track, NativeTrack::shell(parent, 0));

        checkpoint(token)?;
        let sent = self.session.send_track_from_local(&source, shell).await?;
        let delta = self.library.adopt(track, sent.key, &sent.track).await?;
        debug!(item_id = sent.track.item_id, parent_id = parent, "Track copied to device");

        Ok(ItemEffect {
            rejections: sent.rejections,
            delta,
            local_path: None,
        })
    }

    /// Refuses a copy-in before anything on the device changes.
    async fn preflight(&self, track: &HostTrack, source: &Path) -> Result<()> {
        if self.library.find_duplicate(track).await.is_some() {
            return Err(SyncError::DuplicateTrack {
                title: track.title.clone(),
            });
        }

        let file_type = FileType::from_path(source);
        if !self.session.supported_formats().contains(&file_type) {
            return Err(SyncError::UnsupportedFormat(file_type.to_string()));
        }

        let size = if track.file_size > 0 {
            track.file_size
        } else {
            self.fs
                .metadata(source)
                .await
                .map_err(|_| SyncError::MissingSource(track.title.clone()))?
                .size
        };
        let storage = self.session.storage().await?;
        let reserve = self.settings.free_space_reserve;
        if storage.free_bytes.saturating_sub(size) <= reserve {
            return Err(SyncError::InsufficientSpace {
                required: size.saturating_add(reserve),
                available: storage.free_bytes,
            });
        }
        Ok(())
    }

    async fn stage(&self, key: NativeTrackKey) -> Result<PathBuf> {
        let native = self
            .session
            .track(key)
            .await
            .ok_or_else(|| DeviceError::TrackNotFound(key.to_string()))?;
        let path = self.staging.path_for(self.session.id(), &native).await?;
        if let Err(e) = self.session.get_track_to_local(key, &path).await {
            // Partial output is not worth keeping; it may not exist at all.
            self.fs.delete_file(&path).await.ok();
            return Err(e.into());
        }
        Ok(path)
    }

    async fn delete_one(&self, key: NativeTrackKey) -> Result<ItemEffect> {
        let native = self
            .session
            .track(key)
            .await
            .ok_or_else(|| DeviceError::TrackNotFound(key.to_string()))?;
        self.session.delete(native.item_id).await?;
        let delta = match self.library.forget(key).await {
            Some((_, delta)) => delta,
            None => {
                warn!(
                    item_id = native.item_id,
                    key = %key,
                    "Deleted track had no library identity"
                );
                GraphDelta::default()
            }
        };
        Ok(ItemEffect {
            delta,
            ..Default::default()
        })
    }

    async fn push_one(&self, track: HostTrack) -> Result<ItemEffect> {
        let id = track.id;
        let delta = self.library.apply_edit(track).await?;
        let (key, native) = self.library.native_for(id).await?;
        let rejections = self.session.update_metadata(key, native).await?;
        Ok(ItemEffect {
            rejections,
            delta,
            local_path: None,
        })
    }
}

impl std::fmt::Debug for TransferPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferPipeline")
            .field("session_id", &self.session.id())
            .field("pool", &self.pool)
            .field("settings", &self.settings)
            .finish()
    }
}

/// `LibraryEvent::Changed` for a structural change to `session`'s graph.
pub fn library_event(session: &DeviceSession, delta: GraphDelta) -> CoreEvent {
    CoreEvent::Library(LibraryEvent::Changed {
        session_id: session.id().to_string(),
        tracks_added: delta.tracks_added,
        tracks_removed: delta.tracks_removed,
        groups_added: delta.groups_added,
        groups_removed: delta.groups_removed,
    })
}

fn checkpoint(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        return Err(SyncError::Cancelled);
    }
    Ok(())
}

/// Applies a state transition, keeping the job as it was if the transition
/// is not allowed.
fn transition(
    job: TransferJob,
    step: impl FnOnce(TransferJob) -> Result<TransferJob>,
) -> TransferJob {
    let fallback = job.clone();
    step(job).unwrap_or_else(|e| {
        error!(job_id = %fallback.id, error = %e, "Invalid transfer transition");
        fallback
    })
}

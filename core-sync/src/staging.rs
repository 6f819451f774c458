//! # Staging Area
//!
//! Local scratch space for tracks pulled off a device, either for bulk
//! export (copy-out) or for playback.
//!
//! ## Layout
//!
//! ```text
//! <cache dir>/device-staging/
//!   <session id>/
//!     <native id>-<file name>
//! ```
//!
//! The root comes from the configured staging directory, or the host's
//! cache directory when none is set. All I/O goes through
//! [`FileSystemAccess`]. A session's directory is removed when the session
//! closes.

use crate::{Result, SyncError};
use bridge_traits::device::NativeTrack;
use bridge_traits::storage::FileSystemAccess;
use core_device::SessionId;
use core_runtime::logging::strip_path;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Directory created below the host cache directory.
pub const STAGING_DIR_NAME: &str = "device-staging";

pub struct StagingArea {
    fs: Arc<dyn FileSystemAccess>,
    root: PathBuf,
}

impl StagingArea {
    /// Resolves and creates the staging root.
    pub async fn new(fs: Arc<dyn FileSystemAccess>, root: Option<PathBuf>) -> Result<Self> {
        let root = match root {
            Some(root) => root,
            None => fs.get_cache_directory().await?.join(STAGING_DIR_NAME),
        };
        fs.create_dir_all(&root).await?;
        debug!(root = %root.display(), "Staging area ready");
        Ok(Self { fs, root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, session: SessionId) -> PathBuf {
        self.root.join(session.as_str())
    }

    /// Path a track is staged to. Creates the session directory.
    pub async fn path_for(&self, session: SessionId, track: &NativeTrack) -> Result<PathBuf> {
        let dir = self.session_dir(session);
        self.fs.create_dir_all(&dir).await?;
        Ok(dir.join(staged_name(track)))
    }

    /// Wraps an already staged path so it is removed on drop.
    pub fn adopt(&self, path: PathBuf) -> StagedFile {
        StagedFile {
            path,
            fs: Arc::clone(&self.fs),
            keep: false,
        }
    }

    /// Deletes everything staged for `session`.
    pub async fn clear_session(&self, session: SessionId) -> Result<()> {
        let dir = self.session_dir(session);
        if self.fs.exists(&dir).await? {
            self.fs.delete_dir_all(&dir).await?;
            debug!(session_id = %session, "Staging cleared");
        }
        Ok(())
    }

    /// Bytes currently staged across all sessions.
    pub async fn size(&self) -> Result<u64> {
        Ok(self.fs.directory_size(&self.root).await?)
    }
}

impl std::fmt::Debug for StagingArea {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingArea")
            .field("root", &self.root)
            .finish()
    }
}

/// A staged track file, deleted when dropped unless kept.
pub struct StagedFile {
    path: PathBuf,
    fs: Arc<dyn FileSystemAccess>,
    keep: bool,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keeps the file on disk and returns its path.
    pub fn keep(mut self) -> PathBuf {
        self.keep = true;
        std::mem::take(&mut self.path)
    }

    /// Deletes the file through the file system bridge.
    pub async fn discard(mut self) -> Result<()> {
        self.keep = true;
        self.fs
            .delete_file(&self.path)
            .await
            .map_err(|e| SyncError::Staging(e.to_string()))
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        // Drop cannot await the bridge; staged files are always local.
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    file = strip_path(&self.path.to_string_lossy()),
                    error = %e,
                    "Failed to remove staged file"
                );
            }
        }
    }
}

impl std::fmt::Debug for StagedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedFile")
            .field("path", &self.path)
            .field("keep", &self.keep)
            .finish()
    }
}

fn staged_name(track: &NativeTrack) -> String {
    let name: String = track
        .filename
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    if name.is_empty() {
        format!("{}.{}", track.item_id, track.file_type.extension())
    } else {
        format!("{}-{}", track.item_id, name)
    }
}

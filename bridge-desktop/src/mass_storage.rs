//! Mass-Storage Device Driver
//!
//! Drives players that mount as a plain file tree (USB mass storage, iPod-like
//! disk mode). The directory tree is the folder tree, audio files are tracks,
//! and metadata lives in the files' own tags, read and written with `lofty`.
//!
//! Object ids are assigned by this driver on `open()` and stay stable for the
//! lifetime of the handle. `0` is the mount root.

use async_trait::async_trait;
use bridge_traits::device::{
    ConnectionAssistant, DeviceDescriptor, DeviceDriver, DeviceFamily, DeviceInfo, DriverFactory,
    FieldRejection, FileType, NativeFolder, NativeId, NativeTrack, RawDevice, StorageCapacity,
    ROOT_FOLDER,
};
use bridge_traits::error::{BridgeError, Result};
use core_async::fs;
use lofty::config::WriteOptions;
use lofty::file::{AudioFile, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::{Accessor, ItemKey, Tag, TagExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const SUPPORTED: [FileType; 7] = [
    FileType::Mp3,
    FileType::Ogg,
    FileType::Flac,
    FileType::M4a,
    FileType::Mp4,
    FileType::Aac,
    FileType::Wav,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Folder,
    Track,
}

#[derive(Debug, Clone)]
struct Entry {
    path: PathBuf,
    parent_id: NativeId,
    kind: EntryKind,
}

/// Driver for a mounted folder.
pub struct MassStorageDriver {
    root: Option<PathBuf>,
    entries: HashMap<NativeId, Entry>,
    next_id: NativeId,
}

impl MassStorageDriver {
    pub fn new() -> Self {
        Self {
            root: None,
            entries: HashMap::new(),
            next_id: 1,
        }
    }

    fn root(&self) -> Result<&Path> {
        self.root.as_deref().ok_or(BridgeError::NoDeviceAttached)
    }

    fn path_of(&self, id: NativeId) -> Result<PathBuf> {
        if id == ROOT_FOLDER {
            return self.root().map(Path::to_path_buf);
        }
        self.entries
            .get(&id)
            .map(|e| e.path.clone())
            .ok_or(BridgeError::ObjectNotFound(id))
    }

    fn register(&mut self, path: PathBuf, parent_id: NativeId, kind: EntryKind) -> NativeId {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(
            id,
            Entry {
                path,
                parent_id,
                kind,
            },
        );
        id
    }

    /// Walks the mount iteratively, registering folders and audio files.
    async fn scan(&mut self, root: &Path) -> Result<()> {
        self.entries.clear();
        self.next_id = 1;

        let mut pending = vec![(root.to_path_buf(), ROOT_FOLDER)];
        while let Some((dir, dir_id)) = pending.pop() {
            let mut read_dir = fs::read_dir(&dir).await?;
            let mut children = Vec::new();
            while let Some(entry) = read_dir.next_entry().await? {
                children.push(entry);
            }
            children.sort_by_key(|e| e.file_name());

            for entry in children {
                let name = entry.file_name();
                if name.to_string_lossy().starts_with('.') {
                    continue;
                }
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    let id = self.register(path.clone(), dir_id, EntryKind::Folder);
                    pending.push((path, id));
                } else if file_type.is_file()
                    && SUPPORTED.contains(&FileType::from_path(&path))
                {
                    self.register(path, dir_id, EntryKind::Track);
                }
            }
        }

        debug!(objects = self.entries.len(), "Scanned mass-storage mount");
        Ok(())
    }
}

impl Default for MassStorageDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceDriver for MassStorageDriver {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::MassStorage
    }

    async fn open(&mut self, descriptor: &DeviceDescriptor) -> Result<DeviceInfo> {
        if descriptor.family() != DeviceFamily::MassStorage {
            return Err(BridgeError::WrongFamily {
                expected: DeviceFamily::MassStorage.to_string(),
                found: descriptor.family().to_string(),
            });
        }

        let root = descriptor
            .mount_path()
            .map(Path::to_path_buf)
            .ok_or(BridgeError::NoDeviceAttached)?;

        match fs::metadata(&root).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(BridgeError::ConnectionFailed(format!(
                    "{} is not a directory",
                    root.display()
                )))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BridgeError::NoDeviceAttached)
            }
            Err(e) => return Err(BridgeError::ConnectionFailed(e.to_string())),
        }

        self.scan(&root).await?;
        self.root = Some(root);

        info!(device = %descriptor.display_name(), "Opened mass-storage device");
        Ok(DeviceInfo {
            serial: descriptor.serial().map(str::to_string),
            manufacturer: None,
            model: Some(descriptor.display_name().to_string()),
            default_music_folder: None,
            default_storage: 0,
        })
    }

    async fn close(&mut self) -> Result<()> {
        if self.root.take().is_some() {
            debug!("Closed mass-storage device");
        }
        self.entries.clear();
        Ok(())
    }

    async fn capacity(&mut self) -> Result<StorageCapacity> {
        let root = self.root()?.to_path_buf();
        core_async::task::spawn_blocking(move || statvfs_capacity(&root))
            .await
            .map_err(|e| BridgeError::OperationFailed(e.to_string()))?
    }

    async fn list_tracks(&mut self) -> Result<Vec<NativeTrack>> {
        let items: Vec<(NativeId, Entry)> = self
            .entries
            .iter()
            .filter(|(_, e)| e.kind == EntryKind::Track)
            .map(|(id, e)| (*id, e.clone()))
            .collect();

        let mut tracks = core_async::task::spawn_blocking(move || {
            items
                .into_iter()
                .map(|(id, entry)| read_track(id, &entry))
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| BridgeError::OperationFailed(e.to_string()))?;

        tracks.sort_by_key(|t| t.item_id);
        Ok(tracks)
    }

    async fn list_folders(&mut self) -> Result<Vec<NativeFolder>> {
        let mut folders: Vec<NativeFolder> = self
            .entries
            .iter()
            .filter(|(_, e)| e.kind == EntryKind::Folder)
            .map(|(id, e)| NativeFolder {
                id: *id,
                name: file_name(&e.path),
                parent_id: e.parent_id,
                storage_id: 0,
            })
            .collect();
        folders.sort_by_key(|f| f.id);
        Ok(folders)
    }

    async fn create_folder(
        &mut self,
        name: &str,
        parent_id: NativeId,
        _storage_id: u32,
    ) -> Result<NativeId> {
        let parent = self.path_of(parent_id)?;
        let path = parent.join(name);
        fs::create_dir(&path).await?;
        let id = self.register(path, parent_id, EntryKind::Folder);
        debug!(id, parent_id, "Created folder");
        Ok(id)
    }

    async fn get_track(&mut self, track: &NativeTrack, destination: &Path) -> Result<()> {
        let source = self.path_of(track.item_id)?;
        fs::copy(&source, destination).await?;
        Ok(())
    }

    async fn send_track(
        &mut self,
        source: &Path,
        track: &mut NativeTrack,
    ) -> Result<Vec<FieldRejection>> {
        let parent = self.path_of(track.parent_id)?;
        let filename = if track.filename.is_empty() {
            file_name(source)
        } else {
            track.filename.clone()
        };
        let target = parent.join(&filename);

        if fs::try_exists(&target).await? {
            return Err(BridgeError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already exists on device", filename),
            )));
        }

        let (rejections, size) = match write_file(source, &target, track).await {
            Ok(written) => written,
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&target).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        warn!(
                            path = %target.display(),
                            error = %cleanup,
                            "Failed to remove partial track"
                        );
                    }
                }
                return Err(e);
            }
        };

        let id = self.register(target.clone(), track.parent_id, EntryKind::Track);
        track.item_id = id;
        track.filename = filename;
        track.file_size = size;
        track.file_type = FileType::from_path(&target);

        debug!(id, parent_id = track.parent_id, "Sent track to mass-storage device");
        Ok(rejections)
    }

    async fn delete_object(&mut self, id: NativeId) -> Result<()> {
        let entry = self
            .entries
            .get(&id)
            .cloned()
            .ok_or(BridgeError::ObjectNotFound(id))?;

        match entry.kind {
            EntryKind::Track => fs::remove_file(&entry.path).await?,
            EntryKind::Folder => fs::remove_dir(&entry.path).await?,
        }
        self.entries.remove(&id);
        debug!(id, "Deleted object");
        Ok(())
    }

    async fn update_metadata(&mut self, track: &NativeTrack) -> Result<Vec<FieldRejection>> {
        let path = self.path_of(track.item_id)?;
        let snapshot = track.clone();
        core_async::task::spawn_blocking(move || write_tags(&path, &snapshot))
            .await
            .map_err(|e| BridgeError::OperationFailed(e.to_string()))
    }

    fn supported_formats(&self) -> Vec<FileType> {
        SUPPORTED.to_vec()
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Year in the device date form used across families.
fn native_date(year: u32) -> String {
    format!("{:04}0101T0000.0", year)
}

fn read_track(id: NativeId, entry: &Entry) -> NativeTrack {
    let mut track = NativeTrack {
        item_id: id,
        parent_id: entry.parent_id,
        filename: file_name(&entry.path),
        file_type: FileType::from_path(&entry.path),
        disc_number: 1,
        ..Default::default()
    };

    if let Ok(meta) = std::fs::metadata(&entry.path) {
        track.file_size = meta.len();
    }

    let tagged_file = match Probe::open(&entry.path).and_then(|p| p.read()) {
        Ok(file) => file,
        Err(e) => {
            warn!(id, error = %e, "Unreadable tags; using file name as title");
            track.title = entry
                .path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned());
            return track;
        }
    };

    let properties = tagged_file.properties();
    track.duration_ms = properties.duration().as_millis() as u64;
    track.bitrate = properties.audio_bitrate().unwrap_or(0);
    track.sample_rate = properties.sample_rate().unwrap_or(0);

    let tag = tagged_file
        .primary_tag()
        .or_else(|| tagged_file.first_tag());

    match tag {
        Some(tag) => {
            track.title = tag.title().map(|s| s.into_owned());
            track.artist = tag.artist().map(|s| s.into_owned());
            track.album = tag.album().map(|s| s.into_owned());
            track.genre = tag.genre().map(|s| s.into_owned());
            track.album_artist = tag.get_string(&ItemKey::AlbumArtist).map(str::to_string);
            track.composer = tag.get_string(&ItemKey::Composer).map(str::to_string);
            track.date = tag.year().map(native_date);
            track.track_number = tag.track().unwrap_or(0);
            track.disc_number = tag.disk().unwrap_or(1);
        }
        None => {
            track.title = entry
                .path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned());
        }
    }

    track
}

/// Copies `source` to `target` and tags it. Returns the refused fields and
/// the size of the written file.
async fn write_file(
    source: &Path,
    target: &Path,
    track: &NativeTrack,
) -> Result<(Vec<FieldRejection>, u64)> {
    fs::copy(source, target).await?;

    let snapshot = track.clone();
    let tag_target = target.to_path_buf();
    let rejections = core_async::task::spawn_blocking(move || write_tags(&tag_target, &snapshot))
        .await
        .map_err(|e| BridgeError::OperationFailed(e.to_string()))?;

    let size = fs::metadata(target).await?.len();
    Ok((rejections, size))
}

/// Writes the textual fields into the file's primary tag. Fields the tag
/// format cannot carry come back as rejections.
fn write_tags(path: &Path, track: &NativeTrack) -> Vec<FieldRejection> {
    let mut rejections = Vec::new();
    if track.rating != 0 {
        rejections.push(FieldRejection::new("rating", "file tags carry no rating"));
    }
    if track.play_count != 0 {
        rejections.push(FieldRejection::new(
            "play_count",
            "file tags carry no play count",
        ));
    }

    let mut tagged_file = match Probe::open(path).and_then(|p| p.read()) {
        Ok(file) => file,
        Err(e) => {
            rejections.push(FieldRejection::new("tags", e.to_string()));
            return rejections;
        }
    };

    let tag_type = tagged_file.primary_tag_type();
    let mut tag = tagged_file
        .primary_tag()
        .cloned()
        .unwrap_or_else(|| Tag::new(tag_type));

    set_or_remove(&mut tag, track.title.as_deref(), Tag::set_title, Tag::remove_title);
    set_or_remove(&mut tag, track.artist.as_deref(), Tag::set_artist, Tag::remove_artist);
    set_or_remove(&mut tag, track.album.as_deref(), Tag::set_album, Tag::remove_album);
    set_or_remove(&mut tag, track.genre.as_deref(), Tag::set_genre, Tag::remove_genre);

    match track.album_artist.as_deref() {
        Some(v) if !v.is_empty() => {
            tag.insert_text(ItemKey::AlbumArtist, v.to_string());
        }
        _ => {
            tag.remove_key(&ItemKey::AlbumArtist);
        }
    }
    match track.composer.as_deref() {
        Some(v) if !v.is_empty() => {
            tag.insert_text(ItemKey::Composer, v.to_string());
        }
        _ => {
            tag.remove_key(&ItemKey::Composer);
        }
    }

    match track
        .date
        .as_deref()
        .and_then(|d| d.get(..4))
        .and_then(|y| y.parse::<u32>().ok())
        .filter(|y| *y > 1)
    {
        Some(year) => tag.set_year(year),
        None => tag.remove_year(),
    }
    if track.track_number > 0 {
        tag.set_track(track.track_number);
    }
    if track.disc_number > 0 {
        tag.set_disk(track.disc_number);
    }

    if let Err(e) = tag.save_to_path(path, WriteOptions::default()) {
        warn!(error = %e, "Tag write refused");
        rejections.push(FieldRejection::new("tags", e.to_string()));
    }

    rejections
}

fn set_or_remove(
    tag: &mut Tag,
    value: Option<&str>,
    set: fn(&mut Tag, String),
    remove: fn(&mut Tag),
) {
    match value {
        Some(v) if !v.is_empty() => set(tag, v.to_string()),
        _ => remove(tag),
    }
}

#[cfg(unix)]
fn statvfs_capacity(path: &Path) -> Result<StorageCapacity> {
    use std::ffi::CString;

    let path_c = CString::new(path.to_string_lossy().as_bytes())
        .map_err(|e| BridgeError::OperationFailed(e.to_string()))?;

    unsafe {
        let mut stat: libc::statvfs = std::mem::zeroed();
        if libc::statvfs(path_c.as_ptr(), &mut stat) == 0 {
            #[allow(clippy::unnecessary_cast)]
            let block_size = stat.f_frsize as u64;
            #[allow(clippy::unnecessary_cast)]
            let total_bytes = (stat.f_blocks as u64) * block_size;
            #[allow(clippy::unnecessary_cast)]
            let free_bytes = (stat.f_bavail as u64) * block_size;

            Ok(StorageCapacity {
                total_bytes,
                free_bytes,
            })
        } else {
            Err(BridgeError::Io(std::io::Error::last_os_error()))
        }
    }
}

#[cfg(not(unix))]
fn statvfs_capacity(_path: &Path) -> Result<StorageCapacity> {
    Err(BridgeError::Unsupported(
        "capacity query on this platform".to_string(),
    ))
}

// ============================================================================
// Assistant and factory
// ============================================================================

/// Claims devices that advertise a mount path and a mass-storage protocol.
#[derive(Debug, Default, Clone)]
pub struct MassStorageAssistant;

impl ConnectionAssistant for MassStorageAssistant {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::MassStorage
    }

    fn identify(&self, raw: &RawDevice) -> bool {
        raw.mount_path.is_some() && (raw.speaks("ums") || raw.speaks("mass-storage"))
    }

    fn describe(&self, raw: &RawDevice) -> Option<DeviceDescriptor> {
        if !self.identify(raw) {
            return None;
        }
        let id = raw.id.clone()?;
        Some(DeviceDescriptor::from_raw(raw, id, DeviceFamily::MassStorage))
    }
}

#[derive(Debug, Default, Clone)]
pub struct MassStorageDriverFactory;

impl DriverFactory for MassStorageDriverFactory {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::MassStorage
    }

    fn create(&self, _descriptor: &DeviceDescriptor) -> Result<Box<dyn DeviceDriver>> {
        Ok(Box::new(MassStorageDriver::new()))
    }
}

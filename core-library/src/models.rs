//! Domain models for the host-side library
//!
//! Host tracks and the grouping entities (artist, album, genre, composer,
//! year) the library arranges them into.

use crate::error::{LibraryError, Result};
use bridge_traits::device::FileType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

// =============================================================================
// ID Types
// =============================================================================

/// Unique identifier for a host track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostTrackId(pub Uuid);

impl HostTrackId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self> {
        Ok(Self(Uuid::parse_str(s).map_err(|e| {
            LibraryError::InvalidInput {
                field: "track_id".to_string(),
                message: e.to_string(),
            }
        })?))
    }
}

impl Default for HostTrackId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HostTrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Grouping
// =============================================================================

/// The grouping registries a track belongs to, one entity per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupKind {
    Artist,
    Album,
    Genre,
    Composer,
    Year,
}

impl GroupKind {
    pub const ALL: [GroupKind; 5] = [
        GroupKind::Artist,
        GroupKind::Album,
        GroupKind::Genre,
        GroupKind::Composer,
        GroupKind::Year,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GroupKind::Artist => "artist",
            GroupKind::Album => "album",
            GroupKind::Genre => "genre",
            GroupKind::Composer => "composer",
            GroupKind::Year => "year",
        }
    }
}

impl FromStr for GroupKind {
    type Err = LibraryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "artist" => Ok(GroupKind::Artist),
            "album" => Ok(GroupKind::Album),
            "genre" => Ok(GroupKind::Genre),
            "composer" => Ok(GroupKind::Composer),
            "year" => Ok(GroupKind::Year),
            _ => Err(LibraryError::InvalidInput {
                field: "group_kind".to_string(),
                message: format!("unknown grouping '{}'", s),
            }),
        }
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity of one grouping entity inside its registry.
///
/// Names match case-sensitively. Albums are additionally keyed by album
/// artist, so two albums called "Greatest Hits" by different artists stay
/// apart; `album_artist` is empty for every other kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    pub kind: GroupKind,
    pub name: String,
    pub album_artist: String,
}

impl GroupKey {
    pub fn new(kind: GroupKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            album_artist: String::new(),
        }
    }

    pub fn album(name: impl Into<String>, album_artist: impl Into<String>) -> Self {
        Self {
            kind: GroupKind::Album,
            name: name.into(),
            album_artist: album_artist.into(),
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.album_artist.is_empty() {
            write!(f, "{}:{}", self.kind, self.name)
        } else {
            write!(f, "{}:{} ({})", self.kind, self.name, self.album_artist)
        }
    }
}

// =============================================================================
// Host Track
// =============================================================================

/// Library-side metadata for one track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostTrack {
    /// Unique identifier
    pub id: HostTrackId,
    /// Track title
    pub title: String,
    /// Track artist; empty when unknown
    pub artist: String,
    /// Album name; empty when unknown
    pub album: String,
    /// Album artist; empty for compilations and when unknown
    pub album_artist: String,
    /// Whether the album is a various-artists compilation
    pub compilation: bool,
    /// Music genre; empty when unknown
    pub genre: String,
    /// Composer; empty when unknown
    pub composer: String,
    /// Release year
    pub year: Option<u32>,

    // Audio properties
    /// Duration in milliseconds
    pub duration_ms: u64,
    /// Bitrate in kbps
    pub bitrate: u32,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// File size in bytes
    pub file_size: u64,
    /// Track position on album
    pub track_number: u32,
    /// Disc number, starting at 1
    pub disc_number: u32,
    /// Rating on a 0-10 scale
    pub rating: u8,
    pub play_count: u32,
    pub file_type: FileType,
    /// File name on the device or in the library
    pub filename: String,
    /// Local file backing this track, for tracks coming from the host library
    pub local_path: Option<PathBuf>,
}

impl HostTrack {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: HostTrackId::new(),
            title: title.into(),
            artist: String::new(),
            album: String::new(),
            album_artist: String::new(),
            compilation: false,
            genre: String::new(),
            composer: String::new(),
            year: None,
            duration_ms: 0,
            bitrate: 0,
            sample_rate: 0,
            file_size: 0,
            track_number: 0,
            disc_number: 1,
            rating: 0,
            play_count: 0,
            file_type: FileType::Unknown,
            filename: String::new(),
            local_path: None,
        }
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = artist.into();
        self
    }

    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = album.into();
        self
    }

    pub fn with_genre(mut self, genre: impl Into<String>) -> Self {
        self.genre = genre.into();
        self
    }

    pub fn with_year(mut self, year: u32) -> Self {
        self.year = Some(year);
        self
    }

    /// Sets the local file and derives file type, name and size hint from it.
    pub fn with_local_path(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.file_type = FileType::from_path(&path);
        if let Some(name) = path.file_name() {
            self.filename = name.to_string_lossy().into_owned();
        }
        self.local_path = Some(path);
        self
    }

    /// Key of the grouping entity this track belongs to for `kind`.
    pub fn group_key(&self, kind: GroupKind) -> GroupKey {
        match kind {
            GroupKind::Artist => GroupKey::new(kind, self.artist.clone()),
            GroupKind::Album => GroupKey::album(self.album.clone(), self.album_artist.clone()),
            GroupKind::Genre => GroupKey::new(kind, self.genre.clone()),
            GroupKind::Composer => GroupKey::new(kind, self.composer.clone()),
            GroupKind::Year => GroupKey::new(
                kind,
                self.year.map(|y| y.to_string()).unwrap_or_default(),
            ),
        }
    }

    /// Returns a copy with the `kind` field set to `value`.
    ///
    /// # Errors
    ///
    /// `InvalidInput` when a year value is not a number.
    pub fn with_group_value(&self, kind: GroupKind, value: &str) -> Result<Self> {
        let mut track = self.clone();
        match kind {
            GroupKind::Artist => track.artist = value.to_string(),
            GroupKind::Album => track.album = value.to_string(),
            GroupKind::Genre => track.genre = value.to_string(),
            GroupKind::Composer => track.composer = value.to_string(),
            GroupKind::Year => {
                let trimmed = value.trim();
                track.year = if trimmed.is_empty() {
                    None
                } else {
                    let year = trimmed.parse::<u32>().map_err(|_| LibraryError::InvalidInput {
                        field: "year".to_string(),
                        message: format!("'{}' is not a year", value),
                    })?;
                    Some(year).filter(|y| *y > 0)
                };
            }
        }
        Ok(track)
    }

    /// Same song by the same people: title plus every grouping field.
    pub fn same_song_as(&self, other: &HostTrack) -> bool {
        self.title == other.title
            && self.artist == other.artist
            && self.album == other.album
            && self.genre == other.genre
            && self.composer == other.composer
            && self.year == other.year
    }

    /// Validate track data
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.rating > 10 {
            return Err(format!("Track rating {} is above 10", self.rating));
        }

        if self.disc_number == 0 {
            return Err("Disc number must be positive".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_kind_round_trip() {
        for kind in GroupKind::ALL {
            assert_eq!(kind.as_str().parse::<GroupKind>().unwrap(), kind);
        }
        assert_eq!("Artist".parse::<GroupKind>().unwrap(), GroupKind::Artist);
        assert!("label".parse::<GroupKind>().is_err());
    }

    #[test]
    fn test_album_key_includes_album_artist() {
        let mut a = HostTrack::new("x").with_album("Hits");
        a.album_artist = "One".to_string();
        let mut b = a.clone();
        b.album_artist = "Two".to_string();

        assert_ne!(a.group_key(GroupKind::Album), b.group_key(GroupKind::Album));
        assert_eq!(a.group_key(GroupKind::Genre).album_artist, "");
    }

    #[test]
    fn test_year_group_value() {
        let track = HostTrack::new("x");
        assert_eq!(track.with_group_value(GroupKind::Year, "1999").unwrap().year, Some(1999));
        assert_eq!(track.with_group_value(GroupKind::Year, "").unwrap().year, None);
        assert!(track.with_group_value(GroupKind::Year, "nineties").is_err());
        assert_eq!(track.group_key(GroupKind::Year).name, "");
    }

    #[test]
    fn test_local_path_sets_type_and_name() {
        let track = HostTrack::new("x").with_local_path("/music/a/song.flac");
        assert_eq!(track.file_type, FileType::Flac);
        assert_eq!(track.filename, "song.flac");
    }

    #[test]
    fn test_validate() {
        let mut track = HostTrack::new("x");
        assert!(track.validate().is_ok());
        track.rating = 11;
        assert!(track.validate().is_err());
    }
}

//! Field encodings between native records and host tracks.
//!
//! | Field        | Device                          | Host                  |
//! |--------------|---------------------------------|-----------------------|
//! | rating       | 0-100                           | 0-10                  |
//! | date / year  | `YYYY0101T0000.0`               | `Option<u32>`         |
//! | disc number  | 0 means unset                   | starts at 1           |
//! | album artist | `"Various Artists"` for comps   | empty + `compilation` |

use crate::models::{HostTrack, HostTrackId};
use bridge_traits::device::NativeTrack;

pub const VARIOUS_ARTISTS: &str = "Various Artists";

/// Date string written when the track has no year.
pub const NO_DATE: &str = "00010101T0000.0";

pub fn rating_from_native(rating: u16) -> u8 {
    (rating / 10).min(10) as u8
}

pub fn rating_to_native(rating: u8) -> u16 {
    u16::from(rating.min(10)) * 10
}

/// Year from the first four characters of a device date string.
pub fn year_from_date(date: Option<&str>) -> Option<u32> {
    let date = date?;
    let prefix = date.get(..4)?;
    prefix.parse::<u32>().ok().filter(|y| *y > 1)
}

pub fn date_from_year(year: Option<u32>) -> String {
    match year {
        Some(year) if year > 0 => format!("{:04}0101T0000.0", year),
        _ => NO_DATE.to_string(),
    }
}

pub fn disc_from_native(disc: u32) -> u32 {
    disc.max(1)
}

/// `(album_artist, compilation)` from the device's album artist field.
///
/// "Various Artists" is cleared and marks a compilation, as does a missing
/// album artist.
pub fn album_artist_from_native(album_artist: Option<&str>) -> (String, bool) {
    match album_artist.map(str::trim) {
        None | Some("") => (String::new(), true),
        Some(name) if name.eq_ignore_ascii_case(VARIOUS_ARTISTS) => (String::new(), true),
        Some(name) => (name.to_string(), false),
    }
}

/// Album artist to write to the device.
///
/// Compilations without an album artist become "Various Artists"; otherwise
/// the album artist, or the track artist as the best guess.
pub fn album_artist_to_native(track: &HostTrack) -> String {
    if !track.album_artist.is_empty() {
        track.album_artist.clone()
    } else if track.compilation {
        VARIOUS_ARTISTS.to_string()
    } else {
        track.artist.clone()
    }
}

fn text(value: Option<&String>) -> String {
    value.cloned().unwrap_or_default()
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Reads every native field into a new host track.
pub fn to_host(id: HostTrackId, native: &NativeTrack) -> HostTrack {
    let (album_artist, compilation) = album_artist_from_native(native.album_artist.as_deref());
    let title = native
        .title
        .clone()
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| native.filename.clone());

    HostTrack {
        id,
        title,
        artist: text(native.artist.as_ref()),
        album: text(native.album.as_ref()),
        album_artist,
        compilation,
        genre: text(native.genre.as_ref()),
        composer: text(native.composer.as_ref()),
        year: year_from_date(native.date.as_deref()),
        duration_ms: native.duration_ms,
        bitrate: native.bitrate,
        sample_rate: native.sample_rate,
        file_size: native.file_size,
        track_number: native.track_number,
        disc_number: disc_from_native(native.disc_number),
        rating: rating_from_native(native.rating),
        play_count: native.play_count,
        file_type: native.file_type,
        filename: native.filename.clone(),
        local_path: None,
    }
}

/// Writes the host fields onto `base`, keeping its ids and placement.
pub fn to_native(track: &HostTrack, base: NativeTrack) -> NativeTrack {
    NativeTrack {
        title: Some(track.title.clone()),
        artist: optional(&track.artist),
        album: optional(&track.album),
        album_artist: optional(&album_artist_to_native(track)),
        genre: optional(&track.genre),
        composer: optional(&track.composer),
        date: Some(date_from_year(track.year)),
        duration_ms: track.duration_ms,
        bitrate: track.bitrate,
        sample_rate: track.sample_rate,
        file_size: if track.file_size > 0 {
            track.file_size
        } else {
            base.file_size
        },
        track_number: track.track_number,
        disc_number: track.disc_number.max(1),
        rating: rating_to_native(track.rating),
        play_count: track.play_count,
        file_type: track.file_type,
        filename: if track.filename.is_empty() {
            base.filename.clone()
        } else {
            track.filename.clone()
        },
        ..base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::device::FileType;

    #[test]
    fn test_rating_scales() {
        assert_eq!(rating_from_native(0), 0);
        assert_eq!(rating_from_native(80), 8);
        assert_eq!(rating_from_native(85), 8);
        assert_eq!(rating_from_native(250), 10);
        assert_eq!(rating_to_native(7), 70);
        assert_eq!(rating_to_native(12), 100);
    }

    #[test]
    fn test_year_and_date() {
        assert_eq!(year_from_date(Some("19990101T0000.0")), Some(1999));
        assert_eq!(year_from_date(Some("2004")), Some(2004));
        assert_eq!(year_from_date(Some(NO_DATE)), None);
        assert_eq!(year_from_date(Some("abc")), None);
        assert_eq!(year_from_date(None), None);

        assert_eq!(date_from_year(Some(1999)), "19990101T0000.0");
        assert_eq!(date_from_year(Some(7)), "00070101T0000.0");
        assert_eq!(date_from_year(None), NO_DATE);
    }

    #[test]
    fn test_album_artist_mapping() {
        assert_eq!(
            album_artist_from_native(Some("Various Artists")),
            (String::new(), true)
        );
        assert_eq!(album_artist_from_native(None), (String::new(), true));
        assert_eq!(
            album_artist_from_native(Some("Foo")),
            ("Foo".to_string(), false)
        );

        let mut track = HostTrack::new("t").with_artist("Solo");
        assert_eq!(album_artist_to_native(&track), "Solo");
        track.compilation = true;
        assert_eq!(album_artist_to_native(&track), VARIOUS_ARTISTS);
        track.album_artist = "Band".to_string();
        assert_eq!(album_artist_to_native(&track), "Band");
    }

    #[test]
    fn test_to_host_reads_every_field() {
        let native = NativeTrack {
            item_id: 12,
            parent_id: 3,
            title: Some("Song".into()),
            artist: Some("Foo".into()),
            album: Some("Bar".into()),
            album_artist: Some("Foo".into()),
            genre: Some("Rock".into()),
            composer: Some("Baz".into()),
            date: Some("20010101T0000.0".into()),
            duration_ms: 180_000,
            bitrate: 320,
            sample_rate: 44_100,
            file_size: 7_000_000,
            track_number: 4,
            disc_number: 0,
            rating: 60,
            play_count: 9,
            file_type: FileType::Mp3,
            filename: "song.mp3".into(),
            ..Default::default()
        };
        let host = to_host(HostTrackId::new(), &native);

        assert_eq!(host.title, "Song");
        assert_eq!(host.album_artist, "Foo");
        assert!(!host.compilation);
        assert_eq!(host.year, Some(2001));
        assert_eq!(host.disc_number, 1);
        assert_eq!(host.rating, 6);
        assert_eq!(host.play_count, 9);
        assert_eq!(host.file_type, FileType::Mp3);
    }

    #[test]
    fn test_missing_title_falls_back_to_filename() {
        let native = NativeTrack {
            filename: "track01.mp3".into(),
            ..Default::default()
        };
        assert_eq!(to_host(HostTrackId::new(), &native).title, "track01.mp3");
    }

    #[test]
    fn test_to_native_keeps_placement() {
        let base = NativeTrack {
            item_id: 40,
            parent_id: 7,
            storage_id: 65537,
            file_size: 1234,
            filename: "a.mp3".into(),
            ..Default::default()
        };
        let mut host = HostTrack::new("New").with_artist("Foo");
        host.rating = 5;
        let native = to_native(&host, base);

        assert_eq!(native.item_id, 40);
        assert_eq!(native.parent_id, 7);
        assert_eq!(native.storage_id, 65537);
        assert_eq!(native.file_size, 1234);
        assert_eq!(native.filename, "a.mp3");
        assert_eq!(native.rating, 50);
        assert_eq!(native.date.as_deref(), Some(NO_DATE));
        assert_eq!(native.album_artist.as_deref(), Some("Foo"));
        assert_eq!(native.album, None);
    }
}

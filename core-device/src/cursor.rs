//! Enumeration cursor over a track listing.
//!
//! The cursor follows the device idiom of `prepare`, `is_end`, `advance` and
//! `fetch`, and also implements [`Iterator`]. It is finite and not resumable:
//! a fresh listing needs a new call to `DeviceSession::enumerate_tracks`.

use crate::arena::NativeTrackKey;
use bridge_traits::device::NativeTrack;

#[derive(Debug)]
pub struct TrackCursor {
    items: Vec<(NativeTrackKey, NativeTrack)>,
    position: usize,
    prepared: bool,
}

impl TrackCursor {
    pub(crate) fn new(items: Vec<(NativeTrackKey, NativeTrack)>) -> Self {
        Self {
            items,
            position: 0,
            prepared: false,
        }
    }

    /// Positions the cursor on the first record.
    pub fn prepare(&mut self) {
        self.position = 0;
        self.prepared = true;
    }

    pub fn is_end(&self) -> bool {
        !self.prepared || self.position >= self.items.len()
    }

    pub fn advance(&mut self) {
        if !self.is_end() {
            self.position += 1;
        }
    }

    /// Record under the cursor; every field is already populated.
    pub fn fetch(&self) -> Option<(NativeTrackKey, &NativeTrack)> {
        if self.is_end() {
            return None;
        }
        self.items
            .get(self.position)
            .map(|(key, track)| (*key, track))
    }

    /// Total records in the listing.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl Iterator for TrackCursor {
    type Item = (NativeTrackKey, NativeTrack);

    fn next(&mut self) -> Option<Self::Item> {
        if !self.prepared {
            self.prepare();
        }
        if self.is_end() {
            return None;
        }
        let item = self.items.get_mut(self.position).map(|(key, track)| {
            (*key, std::mem::take(track))
        });
        self.position += 1;
        item
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = if self.prepared {
            self.items.len().saturating_sub(self.position)
        } else {
            self.items.len()
        };
        (remaining, Some(remaining))
    }
}

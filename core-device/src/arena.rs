//! Track arena owned by a device session.
//!
//! Native track records live in slots addressed by a generational
//! [`NativeTrackKey`]. Removing a record bumps its slot's generation, so a key
//! held by the library side after the track was deleted or the session was
//! rescanned resolves to `None` instead of a different track.

use bridge_traits::device::{NativeId, NativeTrack};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Opaque handle to one native track inside a session's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NativeTrackKey {
    index: u32,
    generation: u32,
}

impl fmt::Display for NativeTrackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    track: Option<NativeTrack>,
}

#[derive(Debug, Default)]
pub struct TrackArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_id: HashMap<NativeId, NativeTrackKey>,
}

impl TrackArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a registered track. A record with the same native id is
    /// replaced and its old key invalidated.
    pub fn insert(&mut self, track: NativeTrack) -> NativeTrackKey {
        if let Some(old) = self.by_id.get(&track.item_id).copied() {
            self.remove(old);
        }

        let item_id = track.item_id;
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.track = Some(track);
        let key = NativeTrackKey {
            index,
            generation: slot.generation,
        };
        self.by_id.insert(item_id, key);
        key
    }

    pub fn get(&self, key: NativeTrackKey) -> Option<&NativeTrack> {
        self.slots
            .get(key.index as usize)
            .filter(|s| s.generation == key.generation)
            .and_then(|s| s.track.as_ref())
    }

    pub fn get_mut(&mut self, key: NativeTrackKey) -> Option<&mut NativeTrack> {
        self.slots
            .get_mut(key.index as usize)
            .filter(|s| s.generation == key.generation)
            .and_then(|s| s.track.as_mut())
    }

    pub fn key_of(&self, id: NativeId) -> Option<NativeTrackKey> {
        self.by_id.get(&id).copied()
    }

    pub fn remove(&mut self, key: NativeTrackKey) -> Option<NativeTrack> {
        let slot = self
            .slots
            .get_mut(key.index as usize)
            .filter(|s| s.generation == key.generation)?;
        let track = slot.track.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);
        self.by_id.remove(&track.item_id);
        Some(track)
    }

    /// Drops every record. All outstanding keys become stale.
    pub fn clear(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.track.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
            }
        }
        self.by_id.clear();
    }

    /// Replaces the contents with a fresh listing, returning the new keys in
    /// listing order.
    pub fn rebuild(&mut self, tracks: Vec<NativeTrack>) -> Vec<NativeTrackKey> {
        self.clear();
        tracks.into_iter().map(|t| self.insert(t)).collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NativeTrackKey, &NativeTrack)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.track.as_ref().map(|t| {
                (
                    NativeTrackKey {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    t,
                )
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: NativeId, title: &str) -> NativeTrack {
        NativeTrack {
            item_id: id,
            title: Some(title.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut arena = TrackArena::new();
        let key = arena.insert(track(7, "Song"));

        assert_eq!(arena.get(key).unwrap().title.as_deref(), Some("Song"));
        assert_eq!(arena.key_of(7), Some(key));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_removed_key_goes_stale_after_slot_reuse() {
        let mut arena = TrackArena::new();
        let first = arena.insert(track(1, "A"));
        arena.remove(first);
        let second = arena.insert(track(2, "B"));

        assert_eq!(first.index, second.index);
        assert!(arena.get(first).is_none());
        assert_eq!(arena.get(second).unwrap().item_id, 2);
        assert!(arena.key_of(1).is_none());
    }

    #[test]
    fn test_reinsert_same_native_id_replaces_record() {
        let mut arena = TrackArena::new();
        let old = arena.insert(track(5, "Old"));
        let new = arena.insert(track(5, "New"));

        assert!(arena.get(old).is_none());
        assert_eq!(arena.get(new).unwrap().title.as_deref(), Some("New"));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_rebuild_invalidates_previous_keys() {
        let mut arena = TrackArena::new();
        let before = arena.rebuild(vec![track(1, "A"), track(2, "B")]);
        let after = arena.rebuild(vec![track(1, "A"), track(2, "B")]);

        assert_eq!(arena.len(), 2);
        assert!(before.iter().all(|k| arena.get(*k).is_none()));
        assert!(after.iter().all(|k| arena.get(*k).is_some()));
        assert_eq!(arena.iter().count(), 2);
    }
}

//! # Library Graph
//!
//! Host tracks plus one registry per [`GroupKind`]. A track belongs to
//! exactly one entity in every registry, derived from its own fields, and an
//! entity exists only while it has members.
//!
//! Every mutation computes its full effect before touching the maps and
//! cannot fail once it starts, so the graph is never observed with a track in
//! two groups of one kind, in none, or with an empty group left behind.

use crate::error::{LibraryError, Result};
use crate::models::{GroupKey, GroupKind, HostTrack, HostTrackId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// One grouping entity and its members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub key: GroupKey,
    /// Set on album groups holding compilation tracks
    pub compilation: bool,
    members: BTreeSet<HostTrackId>,
}

impl Group {
    fn new(key: GroupKey) -> Self {
        Self {
            key,
            compilation: false,
            members: BTreeSet::new(),
        }
    }

    pub fn members(&self) -> impl Iterator<Item = &HostTrackId> {
        self.members.iter()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Structural change produced by one mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphDelta {
    pub tracks_added: u64,
    pub tracks_removed: u64,
    pub groups_added: u64,
    pub groups_removed: u64,
}

impl GraphDelta {
    pub fn is_empty(&self) -> bool {
        *self == GraphDelta::default()
    }

    pub fn merge(&mut self, other: GraphDelta) {
        self.tracks_added += other.tracks_added;
        self.tracks_removed += other.tracks_removed;
        self.groups_added += other.groups_added;
        self.groups_removed += other.groups_removed;
    }
}

#[derive(Debug, Default, Clone)]
pub struct LibraryGraph {
    tracks: HashMap<HostTrackId, HostTrack>,
    registries: HashMap<GroupKind, BTreeMap<GroupKey, Group>>,
}

impl LibraryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn track(&self, id: HostTrackId) -> Option<&HostTrack> {
        self.tracks.get(&id)
    }

    pub fn tracks(&self) -> impl Iterator<Item = &HostTrack> {
        self.tracks.values()
    }

    pub fn groups(&self, kind: GroupKind) -> impl Iterator<Item = &Group> {
        self.registries.get(&kind).into_iter().flat_map(|r| r.values())
    }

    pub fn group(&self, key: &GroupKey) -> Option<&Group> {
        self.registries.get(&key.kind).and_then(|r| r.get(key))
    }

    pub fn group_count(&self, kind: GroupKind) -> usize {
        self.registries.get(&kind).map_or(0, |r| r.len())
    }

    /// Adds a track and attaches it to its groups, creating missing ones.
    ///
    /// # Errors
    ///
    /// `InvalidInput` when a track with the same id is already present.
    pub fn insert(&mut self, track: HostTrack) -> Result<GraphDelta> {
        if self.tracks.contains_key(&track.id) {
            return Err(LibraryError::InvalidInput {
                field: "track_id".to_string(),
                message: format!("track {} already in library", track.id),
            });
        }

        let mut delta = GraphDelta {
            tracks_added: 1,
            ..Default::default()
        };
        for kind in GroupKind::ALL {
            if self.attach(&track, kind) {
                delta.groups_added += 1;
            }
        }
        self.tracks.insert(track.id, track);
        Ok(delta)
    }

    /// Removes a track, deleting groups it leaves empty.
    pub fn remove(&mut self, id: HostTrackId) -> Option<(HostTrack, GraphDelta)> {
        let track = self.tracks.remove(&id)?;
        let mut delta = GraphDelta {
            tracks_removed: 1,
            ..Default::default()
        };
        for kind in GroupKind::ALL {
            if self.detach(&track, kind) {
                delta.groups_removed += 1;
            }
        }
        Some((track, delta))
    }

    /// Moves a track to the `kind` group named `value`.
    ///
    /// Detaches from the old group (dropping it if now empty), finds or
    /// creates the new one and attaches. Returns the previous value's group
    /// key alongside the delta.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown track and `InvalidInput` for a bad year.
    /// Nothing is changed on error.
    pub fn reassign(
        &mut self,
        id: HostTrackId,
        kind: GroupKind,
        value: &str,
    ) -> Result<(GroupKey, GraphDelta)> {
        let current = self.tracks.get(&id).ok_or_else(|| LibraryError::NotFound {
            entity_type: "track".to_string(),
            id: id.to_string(),
        })?;
        let updated = current.with_group_value(kind, value)?;
        let previous = current.group_key(kind);
        let delta = self.replace_unchecked(updated);
        Ok((previous, delta))
    }

    /// Replaces a track's fields, moving it between groups as needed.
    pub fn replace(&mut self, track: HostTrack) -> Result<GraphDelta> {
        if !self.tracks.contains_key(&track.id) {
            return Err(LibraryError::NotFound {
                entity_type: "track".to_string(),
                id: track.id.to_string(),
            });
        }
        Ok(self.replace_unchecked(track))
    }

    fn replace_unchecked(&mut self, track: HostTrack) -> GraphDelta {
        let mut delta = GraphDelta::default();
        let Some(old) = self.tracks.get(&track.id).cloned() else {
            return delta;
        };
        for kind in GroupKind::ALL {
            if old.group_key(kind) == track.group_key(kind) {
                if kind == GroupKind::Album && old.compilation != track.compilation {
                    self.refresh_compilation(&track.group_key(kind), Some(&track));
                }
                continue;
            }
            if self.detach(&old, kind) {
                delta.groups_removed += 1;
            }
            if self.attach(&track, kind) {
                delta.groups_added += 1;
            }
        }
        self.tracks.insert(track.id, track);
        delta
    }

    /// Returns true when a new group was created.
    fn attach(&mut self, track: &HostTrack, kind: GroupKind) -> bool {
        let key = track.group_key(kind);
        let registry = self.registries.entry(kind).or_default();
        let created = !registry.contains_key(&key);
        let group = registry
            .entry(key.clone())
            .or_insert_with(|| Group::new(key));
        group.members.insert(track.id);
        if kind == GroupKind::Album && track.compilation {
            group.compilation = true;
        }
        created
    }

    /// Returns true when the group became empty and was removed.
    fn detach(&mut self, track: &HostTrack, kind: GroupKind) -> bool {
        let key = track.group_key(kind);
        let Some(registry) = self.registries.get_mut(&kind) else {
            return false;
        };
        let Some(group) = registry.get_mut(&key) else {
            return false;
        };
        group.members.remove(&track.id);
        if group.members.is_empty() {
            registry.remove(&key);
            return true;
        }
        if kind == GroupKind::Album {
            self.refresh_compilation(&key, None);
        }
        false
    }

    fn refresh_compilation(&mut self, key: &GroupKey, pending: Option<&HostTrack>) {
        let compilation = {
            let Some(group) = self.group(key) else {
                return;
            };
            group.members.iter().any(|id| match pending {
                Some(track) if track.id == *id => track.compilation,
                _ => self.tracks.get(id).is_some_and(|t| t.compilation),
            })
        };
        if let Some(group) = self
            .registries
            .get_mut(&key.kind)
            .and_then(|r| r.get_mut(key))
        {
            group.compilation = compilation;
        }
    }

    /// Structural difference from `self` to `other`, by track id and group key.
    pub fn diff(&self, other: &LibraryGraph) -> GraphDelta {
        let tracks_added = other
            .tracks
            .keys()
            .filter(|id| !self.tracks.contains_key(id))
            .count();
        let tracks_removed = self
            .tracks
            .keys()
            .filter(|id| !other.tracks.contains_key(id))
            .count();

        let mut groups_added = 0;
        let mut groups_removed = 0;
        for kind in GroupKind::ALL {
            groups_added += other
                .groups(kind)
                .filter(|g| self.group(&g.key).is_none())
                .count();
            groups_removed += self
                .groups(kind)
                .filter(|g| other.group(&g.key).is_none())
                .count();
        }

        GraphDelta {
            tracks_added: tracks_added as u64,
            tracks_removed: tracks_removed as u64,
            groups_added: groups_added as u64,
            groups_removed: groups_removed as u64,
        }
    }

    /// Checks the membership invariants, describing the first violation.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        for (kind, registry) in &self.registries {
            for (key, group) in registry {
                if group.members.is_empty() {
                    return Err(format!("empty group {}", key));
                }
                for member in &group.members {
                    let track = self
                        .tracks
                        .get(member)
                        .ok_or_else(|| format!("group {} lists unknown track {}", key, member))?;
                    if track.group_key(*kind) != *key {
                        return Err(format!("track {} listed in foreign group {}", member, key));
                    }
                }
            }
        }
        for track in self.tracks.values() {
            for kind in GroupKind::ALL {
                let memberships = self
                    .groups(kind)
                    .filter(|g| g.members.contains(&track.id))
                    .count();
                if memberships != 1 {
                    return Err(format!(
                        "track {} is in {} {} groups",
                        track.id, memberships, kind
                    ));
                }
            }
        }
        Ok(())
    }
}

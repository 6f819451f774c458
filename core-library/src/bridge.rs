//! # Library Bridge
//!
//! Maps between a device session's native records and the host library
//! graph, and owns the [`IdentityMap`] correlating the two.
//!
//! ## Overview
//!
//! - [`LibraryBridge::rescan`] enumerates the device and rebuilds the graph
//!   and identity map from scratch. Host ids stay stable for native ids seen
//!   before.
//! - [`LibraryBridge::reassign_group`] is the single edit path for artist,
//!   album, genre, composer and year. The graph change is applied in one step
//!   under the write lock, then pushed to the device; if the push fails the
//!   graph change is reverted.
//! - [`LibraryBridge::forget`] drops a deleted track from both sides.
//!
//! Lock order is graph, then identity map. Readers take snapshots and never
//! hold a lock across calls.

use crate::encoding;
use crate::error::{LibraryError, Result};
use crate::graph::{GraphDelta, LibraryGraph};
use crate::identity::IdentityMap;
use crate::models::{GroupKey, GroupKind, HostTrack, HostTrackId};
use bridge_traits::device::{FieldRejection, NativeId, NativeTrack};
use core_async::sync::RwLock;
use core_device::{DeviceSession, NativeTrackKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Result of an edit pushed to the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditOutcome {
    pub delta: GraphDelta,
    /// Fields the device refused; the rest were applied.
    pub rejections: Vec<FieldRejection>,
}

/// One grouping entity as seen by readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub key: GroupKey,
    pub compilation: bool,
    pub track_count: usize,
}

/// Point-in-time copy of the host library.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LibrarySnapshot {
    pub tracks: Vec<HostTrack>,
    pub groups: HashMap<GroupKind, Vec<GroupSummary>>,
}

impl LibrarySnapshot {
    pub fn group_names(&self, kind: GroupKind) -> Vec<String> {
        self.groups
            .get(&kind)
            .map(|groups| groups.iter().map(|g| g.key.name.clone()).collect())
            .unwrap_or_default()
    }
}

pub struct LibraryBridge {
    session: Arc<DeviceSession>,
    graph: RwLock<LibraryGraph>,
    identities: RwLock<IdentityMap>,
}

impl LibraryBridge {
    pub fn new(session: Arc<DeviceSession>) -> Self {
        Self {
            session,
            graph: RwLock::new(LibraryGraph::new()),
            identities: RwLock::new(IdentityMap::new()),
        }
    }

    pub fn session(&self) -> &Arc<DeviceSession> {
        &self.session
    }

    // ------------------------------------------------------------------------
    // Enumeration
    // ------------------------------------------------------------------------

    /// Re-enumerates the device and rebuilds graph and identity map.
    #[instrument(skip(self), fields(session_id = %self.session.id()))]
    pub async fn rescan(&self) -> Result<GraphDelta> {
        let cursor = self.session.enumerate_tracks().await?;

        let mut graph = self.graph.write().await;
        let mut identities = self.identities.write().await;
        let known = identities.hosts_by_native_id();

        let mut next_graph = LibraryGraph::new();
        let mut next_identities = IdentityMap::new();
        for (key, native) in cursor {
            let host_id = known.get(&native.item_id).copied().unwrap_or_default();
            let host = encoding::to_host(host_id, &native);
            if let Err(e) = next_graph.insert(host) {
                warn!(error = %e, item_id = native.item_id, "Skipping track during rescan");
                continue;
            }
            next_identities.link(host_id, key, native.item_id);
        }

        let delta = graph.diff(&next_graph);
        *graph = next_graph;
        *identities = next_identities;
        info!(
            tracks = graph.len(),
            added = delta.tracks_added,
            removed = delta.tracks_removed,
            "Library rebuilt from device"
        );
        Ok(delta)
    }

    /// Reads a native record into the graph and links it.
    ///
    /// A record already linked keeps its host track, refreshed from the
    /// native fields.
    pub async fn materialize(
        &self,
        key: NativeTrackKey,
        native: &NativeTrack,
    ) -> Result<(HostTrackId, GraphDelta)> {
        let mut graph = self.graph.write().await;
        let mut identities = self.identities.write().await;

        if let Some(existing) = identities.host_for(key) {
            let host = encoding::to_host(existing, native);
            let delta = graph.replace(host)?;
            return Ok((existing, delta));
        }

        let host = encoding::to_host(HostTrackId::new(), native);
        let id = host.id;
        let delta = graph.insert(host)?;
        identities.link(id, key, native.item_id);
        debug!(host_id = %id, item_id = native.item_id, "Track materialized");
        Ok((id, delta))
    }

    /// Links a host track the device just accepted, keeping the host's own
    /// metadata and id.
    ///
    /// A rescan that ran between the send and this call may already have
    /// materialized the record under a fresh host id and a new key; that
    /// host track is replaced by `host`.
    pub async fn adopt(
        &self,
        mut host: HostTrack,
        key: NativeTrackKey,
        native: &NativeTrack,
    ) -> Result<GraphDelta> {
        let key = self.session.key_of(native.item_id).await.unwrap_or(key);
        let mut graph = self.graph.write().await;
        let mut identities = self.identities.write().await;

        host.file_size = native.file_size;
        if host.filename.is_empty() {
            host.filename = native.filename.clone();
        }
        host.local_path = None;
        let id = host.id;

        let mut delta = GraphDelta::default();
        if let Some(stale) = identities.host_for(key).filter(|h| *h != id) {
            identities.unlink_host(stale);
            if let Some((_, removed)) = graph.remove(stale) {
                delta.merge(removed);
            }
        }
        delta.merge(if graph.track(id).is_some() {
            graph.replace(host)?
        } else {
            graph.insert(host)?
        });
        identities.link(id, key, native.item_id);
        Ok(delta)
    }

    // ------------------------------------------------------------------------
    // Edits
    // ------------------------------------------------------------------------

    /// Moves `track` to the `kind` group named `value` and pushes the field
    /// to the device.
    ///
    /// # Errors
    ///
    /// `NotFound`/`InvalidInput` leave everything untouched. A device error
    /// reverts the in-memory change before it is returned.
    #[instrument(skip(self, value), fields(host_id = %track, kind = %kind))]
    pub async fn reassign_group(
        &self,
        track: HostTrackId,
        kind: GroupKind,
        value: &str,
    ) -> Result<EditOutcome> {
        let (previous, delta, updated) = {
            let mut graph = self.graph.write().await;
            let (previous, delta) = graph.reassign(track, kind, value)?;
            let updated = graph
                .track(track)
                .cloned()
                .ok_or_else(|| not_found(track))?;
            (previous, delta, updated)
        };

        match self.push(&updated).await {
            Ok(rejections) => Ok(EditOutcome { delta, rejections }),
            Err(e) => {
                let mut graph = self.graph.write().await;
                if let Err(revert) = graph.reassign(track, kind, &previous.name) {
                    warn!(error = %revert, "Could not revert group change");
                }
                Err(e)
            }
        }
    }

    /// Replaces a host track's fields in memory, regrouping as needed.
    pub async fn apply_edit(&self, track: HostTrack) -> Result<GraphDelta> {
        track.validate().map_err(|message| LibraryError::InvalidInput {
            field: "track".to_string(),
            message,
        })?;
        self.graph.write().await.replace(track)
    }

    /// Native record for `track` with the host fields written onto the
    /// device's current record.
    pub async fn native_for(&self, track: HostTrackId) -> Result<(NativeTrackKey, NativeTrack)> {
        let host = self.track(track).await.ok_or_else(|| not_found(track))?;
        let key = self
            .identities
            .read()
            .await
            .native_for(track)
            .ok_or_else(|| LibraryError::NotFound {
                entity_type: "native track".to_string(),
                id: track.to_string(),
            })?;
        let base = self.session.track(key).await.ok_or_else(|| LibraryError::NotFound {
            entity_type: "native track".to_string(),
            id: key.to_string(),
        })?;
        Ok((key, encoding::to_native(&host, base)))
    }

    /// Writes the host track's current fields to the device. Tracks with no
    /// native counterpart are host-only and nothing is pushed.
    async fn push(&self, track: &HostTrack) -> Result<Vec<FieldRejection>> {
        let linked = self.identities.read().await.native_for(track.id);
        if linked.is_none() {
            return Ok(Vec::new());
        }
        let (key, native) = self.native_for(track.id).await?;
        Ok(self.session.update_metadata(key, native).await?)
    }

    /// Drops a deleted native track from the identity map and the graph.
    pub async fn forget(&self, key: NativeTrackKey) -> Option<(HostTrackId, GraphDelta)> {
        let mut graph = self.graph.write().await;
        let host = self.identities.write().await.unlink_native(key)?;
        let (_, delta) = graph.remove(host)?;
        debug!(host_id = %host, "Track forgotten");
        Some((host, delta))
    }

    /// Clears graph and identity map, as when the session goes away.
    pub async fn clear(&self) -> GraphDelta {
        let mut graph = self.graph.write().await;
        let mut identities = self.identities.write().await;
        let delta = graph.diff(&LibraryGraph::new());
        *graph = LibraryGraph::new();
        identities.clear();
        delta
    }

    // ------------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------------

    pub async fn track(&self, id: HostTrackId) -> Option<HostTrack> {
        self.graph.read().await.track(id).cloned()
    }

    pub async fn tracks(&self) -> Vec<HostTrack> {
        let mut tracks: Vec<_> = self.graph.read().await.tracks().cloned().collect();
        tracks.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
        tracks
    }

    pub async fn track_count(&self) -> usize {
        self.graph.read().await.len()
    }

    pub async fn identity_count(&self) -> usize {
        self.identities.read().await.len()
    }

    pub async fn native_key(&self, id: HostTrackId) -> Option<NativeTrackKey> {
        self.identities.read().await.native_for(id)
    }

    pub async fn host_for(&self, key: NativeTrackKey) -> Option<HostTrackId> {
        self.identities.read().await.host_for(key)
    }

    pub async fn host_for_native_id(&self, id: NativeId) -> Option<HostTrackId> {
        let identities = self.identities.read().await;
        identities
            .key_for_id(id)
            .and_then(|key| identities.host_for(key))
    }

    /// An on-device track with the same title and grouping fields.
    pub async fn find_duplicate(&self, track: &HostTrack) -> Option<HostTrackId> {
        let graph = self.graph.read().await;
        let identities = self.identities.read().await;
        let found = graph
            .tracks()
            .filter(|t| t.id != track.id && identities.native_for(t.id).is_some())
            .find(|t| t.same_song_as(track))
            .map(|t| t.id);
        found
    }

    pub async fn snapshot(&self) -> LibrarySnapshot {
        let graph = self.graph.read().await;
        let groups = GroupKind::ALL
            .into_iter()
            .map(|kind| {
                let summaries = graph
                    .groups(kind)
                    .map(|g| GroupSummary {
                        key: g.key.clone(),
                        compilation: g.compilation,
                        track_count: g.len(),
                    })
                    .collect();
                (kind, summaries)
            })
            .collect();
        LibrarySnapshot {
            tracks: graph.tracks().cloned().collect(),
            groups,
        }
    }

    /// Runs the graph invariant check, for diagnostics and tests.
    pub async fn check_invariants(&self) -> std::result::Result<(), String> {
        self.graph.read().await.check_invariants()
    }
}

fn not_found(id: HostTrackId) -> LibraryError {
    LibraryError::NotFound {
        entity_type: "track".to_string(),
        id: id.to_string(),
    }
}

impl std::fmt::Debug for LibraryBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibraryBridge")
            .field("session", &self.session.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_desktop::{VirtualDevice, VirtualDeviceAssistant};
    use bridge_traits::device::{ConnectionAssistant, FileType};
    use bytes::Bytes;
    use core_device::SessionOptions;

    fn song(title: &str, artist: &str, album: &str) -> NativeTrack {
        NativeTrack {
            title: Some(title.to_string()),
            artist: Some(artist.to_string()),
            album: Some(album.to_string()),
            genre: Some("Rock".to_string()),
            date: Some("19990101T0000.0".to_string()),
            file_type: FileType::Mp3,
            ..Default::default()
        }
    }

    async fn bridge_for(device: &VirtualDevice) -> LibraryBridge {
        let raw = device.raw().await;
        let descriptor = VirtualDeviceAssistant.describe(&raw).unwrap();
        let session = Arc::new(DeviceSession::new(descriptor, Box::new(device.driver())));
        session.open(&SessionOptions::default()).await.unwrap();
        LibraryBridge::new(session)
    }

    #[core_async::test]
    async fn test_rescan_materializes_every_track() {
        let device = VirtualDevice::new("usb-1");
        for (t, a) in [("A", "Foo"), ("B", "Foo"), ("C", "Bar")] {
            device
                .seed_track(&["Music"], song(t, a, "Album"), Bytes::from_static(b"x"))
                .await;
        }
        let bridge = bridge_for(&device).await;

        let delta = bridge.rescan().await.unwrap();
        assert_eq!(delta.tracks_added, 3);
        assert_eq!(bridge.track_count().await, 3);
        assert_eq!(bridge.identity_count().await, 3);

        let snapshot = bridge.snapshot().await;
        let mut artists = snapshot.group_names(GroupKind::Artist);
        artists.sort();
        assert_eq!(artists, vec!["Bar", "Foo"]);
        assert_eq!(snapshot.group_names(GroupKind::Year), vec!["1999"]);
        bridge.check_invariants().await.unwrap();
    }

    #[core_async::test]
    async fn test_rescan_is_idempotent_and_keeps_host_ids() {
        let device = VirtualDevice::new("usb-1");
        let id = device
            .seed_track(&[], song("A", "Foo", "Bar"), Bytes::from_static(b"x"))
            .await;
        let bridge = bridge_for(&device).await;

        bridge.rescan().await.unwrap();
        let host = bridge.host_for_native_id(id).await.unwrap();
        let delta = bridge.rescan().await.unwrap();

        assert!(delta.is_empty());
        assert_eq!(bridge.identity_count().await, 1);
        assert_eq!(bridge.host_for_native_id(id).await, Some(host));
    }

    #[core_async::test]
    async fn test_reassign_group_pushes_native_setter() {
        let device = VirtualDevice::new("usb-1");
        let id = device
            .seed_track(&[], song("A", "Foo", "Bar"), Bytes::from_static(b"x"))
            .await;
        let bridge = bridge_for(&device).await;
        bridge.rescan().await.unwrap();
        let host = bridge.host_for_native_id(id).await.unwrap();

        let outcome = bridge
            .reassign_group(host, GroupKind::Artist, "Qux")
            .await
            .unwrap();
        assert_eq!(outcome.delta.groups_removed, 1);
        assert_eq!(outcome.delta.groups_added, 1);
        assert!(outcome.rejections.is_empty());

        let stored = device.track(id).await.unwrap();
        assert_eq!(stored.artist.as_deref(), Some("Qux"));
        // No album artist on the device makes the album a compilation.
        assert_eq!(stored.album_artist.as_deref(), Some("Various Artists"));

        bridge
            .reassign_group(host, GroupKind::Year, "2005")
            .await
            .unwrap();
        let stored = device.track(id).await.unwrap();
        assert_eq!(stored.date.as_deref(), Some("20050101T0000.0"));
        bridge.check_invariants().await.unwrap();
    }

    #[core_async::test]
    async fn test_reassign_reverts_when_device_fails() {
        let device = VirtualDevice::new("usb-1");
        let id = device
            .seed_track(&[], song("A", "Foo", "Bar"), Bytes::from_static(b"x"))
            .await;
        let bridge = bridge_for(&device).await;
        bridge.rescan().await.unwrap();
        let host = bridge.host_for_native_id(id).await.unwrap();

        device.unplug().await;
        let err = bridge
            .reassign_group(host, GroupKind::Artist, "Qux")
            .await
            .unwrap_err();
        assert!(matches!(err, LibraryError::Device(_)));

        let track = bridge.track(host).await.unwrap();
        assert_eq!(track.artist, "Foo");
        let snapshot = bridge.snapshot().await;
        assert_eq!(snapshot.group_names(GroupKind::Artist), vec!["Foo"]);
        bridge.check_invariants().await.unwrap();
    }

    #[core_async::test]
    async fn test_refused_field_is_partial_failure() {
        let device = VirtualDevice::new("usb-1");
        let id = device
            .seed_track(&[], song("A", "Foo", "Bar"), Bytes::from_static(b"x"))
            .await;
        device.refuse_field("genre").await;
        let bridge = bridge_for(&device).await;
        bridge.rescan().await.unwrap();
        let host = bridge.host_for_native_id(id).await.unwrap();

        let outcome = bridge
            .reassign_group(host, GroupKind::Genre, "Jazz")
            .await
            .unwrap();
        assert_eq!(outcome.rejections.len(), 1);
        assert_eq!(outcome.rejections[0].field, "genre");
        assert_eq!(bridge.track(host).await.unwrap().genre, "Jazz");
    }

    #[core_async::test]
    async fn test_forget_detaches_from_every_group() {
        let device = VirtualDevice::new("usb-1");
        let id = device
            .seed_track(&[], song("A", "Foo", "Bar"), Bytes::from_static(b"x"))
            .await;
        let bridge = bridge_for(&device).await;
        bridge.rescan().await.unwrap();
        let key = bridge.session().key_of(id).await.unwrap();

        let (_, delta) = bridge.forget(key).await.unwrap();
        assert_eq!(delta.tracks_removed, 1);
        assert_eq!(delta.groups_removed, 5);
        assert_eq!(bridge.identity_count().await, 0);
        assert!(bridge.forget(key).await.is_none());
    }

    #[core_async::test]
    async fn test_find_duplicate_only_matches_device_tracks() {
        let device = VirtualDevice::new("usb-1");
        device
            .seed_track(&[], song("A", "Foo", "Bar"), Bytes::from_static(b"x"))
            .await;
        let bridge = bridge_for(&device).await;
        bridge.rescan().await.unwrap();

        let same = HostTrack::new("A")
            .with_artist("Foo")
            .with_album("Bar")
            .with_genre("Rock")
            .with_year(1999);
        assert!(bridge.find_duplicate(&same).await.is_some());

        let other = same.clone().with_year(2000);
        assert!(bridge.find_duplicate(&other).await.is_none());
    }

    #[core_async::test]
    async fn test_host_only_edit_skips_device() {
        let device = VirtualDevice::new("usb-1");
        let bridge = bridge_for(&device).await;
        let track = HostTrack::new("Local").with_artist("Foo");
        let id = track.id;
        bridge.graph.write().await.insert(track).unwrap();

        let outcome = bridge
            .reassign_group(id, GroupKind::Artist, "Bar")
            .await
            .unwrap();
        assert!(outcome.rejections.is_empty());
        assert_eq!(bridge.track(id).await.unwrap().artist, "Bar");
    }
}

//! Cross-reference between host tracks and native track keys.
//!
//! Non-owning: the session owns native records and the graph owns host
//! tracks. Each side maps to at most one counterpart. The map is rebuilt
//! wholesale whenever the session is rescanned.

use crate::models::HostTrackId;
use bridge_traits::device::NativeId;
use core_device::NativeTrackKey;
use std::collections::HashMap;

#[derive(Debug, Default, Clone)]
pub struct IdentityMap {
    to_native: HashMap<HostTrackId, NativeTrackKey>,
    to_host: HashMap<NativeTrackKey, HostTrackId>,
    by_native_id: HashMap<NativeId, NativeTrackKey>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Links `host` and `key`, dropping any previous link of either side.
    pub fn link(&mut self, host: HostTrackId, key: NativeTrackKey, native_id: NativeId) {
        self.unlink_host(host);
        self.unlink_native(key);
        self.to_native.insert(host, key);
        self.to_host.insert(key, host);
        self.by_native_id.insert(native_id, key);
    }

    pub fn unlink_host(&mut self, host: HostTrackId) -> Option<NativeTrackKey> {
        let key = self.to_native.remove(&host)?;
        self.to_host.remove(&key);
        self.by_native_id.retain(|_, k| *k != key);
        Some(key)
    }

    pub fn unlink_native(&mut self, key: NativeTrackKey) -> Option<HostTrackId> {
        let host = self.to_host.remove(&key)?;
        self.to_native.remove(&host);
        self.by_native_id.retain(|_, k| *k != key);
        Some(host)
    }

    pub fn native_for(&self, host: HostTrackId) -> Option<NativeTrackKey> {
        self.to_native.get(&host).copied()
    }

    pub fn host_for(&self, key: NativeTrackKey) -> Option<HostTrackId> {
        self.to_host.get(&key).copied()
    }

    /// Key for a native numeric id, as used by folders and playlists.
    pub fn key_for_id(&self, id: NativeId) -> Option<NativeTrackKey> {
        self.by_native_id.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.to_native.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_native.is_empty()
    }

    pub fn clear(&mut self) {
        self.to_native.clear();
        self.to_host.clear();
        self.by_native_id.clear();
    }

    /// Host ids keyed by native numeric id, used to keep host identities
    /// stable across rescans.
    pub fn hosts_by_native_id(&self) -> HashMap<NativeId, HostTrackId> {
        self.by_native_id
            .iter()
            .filter_map(|(id, key)| self.to_host.get(key).map(|h| (*id, *h)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::device::NativeTrack;
    use core_device::TrackArena;

    fn keys(n: u32) -> Vec<NativeTrackKey> {
        let mut arena = TrackArena::new();
        (1..=n)
            .map(|id| {
                arena.insert(NativeTrack {
                    item_id: id,
                    ..Default::default()
                })
            })
            .collect()
    }

    #[test]
    fn test_link_is_one_to_one() {
        let k = keys(2);
        let mut map = IdentityMap::new();
        let a = HostTrackId::new();
        let b = HostTrackId::new();

        map.link(a, k[0], 1);
        map.link(b, k[0], 1);

        assert_eq!(map.len(), 1);
        assert_eq!(map.host_for(k[0]), Some(b));
        assert_eq!(map.native_for(a), None);

        map.link(b, k[1], 2);
        assert_eq!(map.len(), 1);
        assert_eq!(map.key_for_id(1), None);
        assert_eq!(map.key_for_id(2), Some(k[1]));
    }

    #[test]
    fn test_unlink_clears_every_index() {
        let k = keys(1);
        let mut map = IdentityMap::new();
        let a = HostTrackId::new();
        map.link(a, k[0], 1);

        assert_eq!(map.unlink_native(k[0]), Some(a));
        assert!(map.is_empty());
        assert_eq!(map.key_for_id(1), None);
        assert_eq!(map.unlink_host(a), None);
    }

    #[test]
    fn test_hosts_by_native_id() {
        let k = keys(2);
        let mut map = IdentityMap::new();
        let a = HostTrackId::new();
        map.link(a, k[1], 2);
        let hosts = map.hosts_by_native_id();
        assert_eq!(hosts.get(&2), Some(&a));
        assert_eq!(hosts.len(), 1);
    }
}

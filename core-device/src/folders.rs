//! Cached mirror of the device folder tree.
//!
//! Folders are stored in a parent-indexed arena: one map from id to node and
//! one from parent id to child ids. All walks are iterative. Name matching is
//! case-insensitive, mirroring how device firmwares compare folder names.

use bridge_traits::device::{NativeFolder, NativeId, ROOT_FOLDER};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// Folder name used when the device advertises no music folder.
pub const MUSIC_FOLDER_NAME: &str = "Music";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderNode {
    pub id: NativeId,
    pub name: String,
    pub parent_id: NativeId,
    pub storage_id: u32,
}

impl From<NativeFolder> for FolderNode {
    fn from(folder: NativeFolder) -> Self {
        Self {
            id: folder.id,
            name: folder.name,
            parent_id: folder.parent_id,
            storage_id: folder.storage_id,
        }
    }
}

#[derive(Debug, Default)]
pub struct FolderCache {
    nodes: HashMap<NativeId, FolderNode>,
    children: HashMap<NativeId, Vec<NativeId>>,
    stale: bool,
}

impl FolderCache {
    pub fn new() -> Self {
        Self {
            stale: true,
            ..Default::default()
        }
    }

    /// Replaces the cache with a fresh device listing.
    pub fn rebuild(&mut self, folders: Vec<NativeFolder>) {
        self.nodes.clear();
        self.children.clear();
        for folder in folders {
            self.children
                .entry(folder.parent_id)
                .or_default()
                .push(folder.id);
            self.nodes.insert(folder.id, folder.into());
        }
        for ids in self.children.values_mut() {
            ids.sort_unstable();
        }
        self.stale = false;
    }

    /// Marks the cache as needing a re-fetch.
    pub fn invalidate(&mut self) {
        self.stale = true;
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.children.clear();
        self.stale = true;
    }

    pub fn get(&self, id: NativeId) -> Option<&FolderNode> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: NativeId) -> bool {
        id == ROOT_FOLDER || self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn children(&self, parent_id: NativeId) -> impl Iterator<Item = &FolderNode> {
        self.children
            .get(&parent_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.nodes.get(id))
    }

    /// Child of `parent_id` whose name matches `name` ignoring case.
    pub fn find(&self, name: &str, parent_id: NativeId) -> Option<NativeId> {
        self.children(parent_id)
            .find(|node| eq_unicode_ci(&node.name, name))
            .map(|node| node.id)
    }

    /// Breadth-first search from the root for a folder named `name`.
    pub fn find_anywhere(&self, name: &str) -> Option<NativeId> {
        let mut queue = VecDeque::from([ROOT_FOLDER]);
        let mut seen = HashSet::new();
        while let Some(parent) = queue.pop_front() {
            if !seen.insert(parent) {
                continue;
            }
            for node in self.children(parent) {
                if eq_unicode_ci(&node.name, name) {
                    return Some(node.id);
                }
                queue.push_back(node.id);
            }
        }
        None
    }

    /// Names from the root down to `id`, or `None` when `id` is not reachable.
    pub fn path_of(&self, id: NativeId) -> Option<Vec<String>> {
        let mut names = Vec::new();
        let mut current = id;
        let mut seen = HashSet::new();
        while current != ROOT_FOLDER {
            if !seen.insert(current) {
                return None;
            }
            let node = self.nodes.get(&current)?;
            names.push(node.name.clone());
            current = node.parent_id;
        }
        names.reverse();
        Some(names)
    }

    /// Where tracks go when no folder template applies: the advertised music
    /// folder, else any folder named "Music", else the root.
    pub fn default_parent(&self, advertised: Option<NativeId>) -> NativeId {
        advertised
            .filter(|id| self.nodes.contains_key(id))
            .or_else(|| self.find_anywhere(MUSIC_FOLDER_NAME))
            .unwrap_or(ROOT_FOLDER)
    }

    pub fn snapshot(&self) -> Vec<FolderNode> {
        let mut nodes: Vec<_> = self.nodes.values().cloned().collect();
        nodes.sort_by_key(|n| n.id);
        nodes
    }
}

fn eq_unicode_ci(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(id: NativeId, name: &str, parent_id: NativeId) -> NativeFolder {
        NativeFolder {
            id,
            name: name.to_string(),
            parent_id,
            storage_id: 1,
        }
    }

    fn sample() -> FolderCache {
        let mut cache = FolderCache::new();
        cache.rebuild(vec![
            folder(1, "Media", ROOT_FOLDER),
            folder(2, "music", 1),
            folder(3, "Foo", 2),
            folder(4, "Bar", 3),
            folder(5, "Podcasts", ROOT_FOLDER),
            folder(6, "Bar", 5),
        ]);
        cache
    }

    #[test]
    fn test_find_is_scoped_to_parent_and_case_insensitive() {
        let cache = sample();
        assert_eq!(cache.find("FOO", 2), Some(3));
        assert_eq!(cache.find("bar", 3), Some(4));
        assert_eq!(cache.find("bar", 5), Some(6));
        assert_eq!(cache.find("Foo", ROOT_FOLDER), None);
    }

    #[test]
    fn test_unicode_names_match_ignoring_case() {
        let mut cache = FolderCache::new();
        cache.rebuild(vec![folder(1, "Ärzte", ROOT_FOLDER)]);
        assert_eq!(cache.find("ärzte", ROOT_FOLDER), Some(1));
    }

    #[test]
    fn test_default_parent_prefers_advertised_folder() {
        let cache = sample();
        assert_eq!(cache.default_parent(Some(5)), 5);
    }

    #[test]
    fn test_default_parent_falls_back_to_music_then_root() {
        let cache = sample();
        assert_eq!(cache.default_parent(None), 2);
        // An advertised id the tree does not contain is ignored.
        assert_eq!(cache.default_parent(Some(99)), 2);

        let mut bare = FolderCache::new();
        bare.rebuild(vec![folder(1, "Photos", ROOT_FOLDER)]);
        assert_eq!(bare.default_parent(None), ROOT_FOLDER);
    }

    #[test]
    fn test_path_of_walks_to_root() {
        let cache = sample();
        assert_eq!(
            cache.path_of(4),
            Some(vec![
                "Media".to_string(),
                "music".to_string(),
                "Foo".to_string(),
                "Bar".to_string()
            ])
        );
        assert_eq!(cache.path_of(ROOT_FOLDER), Some(vec![]));
        assert_eq!(cache.path_of(42), None);
    }

    #[test]
    fn test_cycle_does_not_hang() {
        let mut cache = FolderCache::new();
        cache.rebuild(vec![folder(1, "a", 2), folder(2, "b", 1)]);
        assert_eq!(cache.path_of(1), None);
        assert_eq!(cache.find_anywhere("a"), None);
    }

    #[test]
    fn test_staleness_tracking() {
        let mut cache = FolderCache::new();
        assert!(cache.is_stale());
        cache.rebuild(vec![]);
        assert!(!cache.is_stale());
        cache.invalidate();
        assert!(cache.is_stale());
    }
}

//! Sorted entry set of one map.

use crate::error::{CoreError, CoreResult};
use crate::map::MapLayout;
use std::cmp::Ordering;

/// The contents of one map in one version.
///
/// Entries are kept sorted by the map's layout: by key, and for duplicate
/// maps by value within a key. Non-duplicate maps hold at most one entry per
/// key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MapTree {
    layout: MapLayout,
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    mod_txnid: u64,
}

impl MapTree {
    pub(crate) fn new(layout: MapLayout, txnid: u64) -> Self {
        Self {
            layout,
            entries: Vec::new(),
            mod_txnid: txnid,
        }
    }

    pub(crate) fn layout(&self) -> MapLayout {
        self.layout
    }

    pub(crate) fn mod_txnid(&self) -> u64 {
        self.mod_txnid
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn entry(&self, index: usize) -> Option<(&[u8], &[u8])> {
        self.entries
            .get(index)
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    fn key_cmp(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.layout.key_order.compare(a, b)
    }

    fn value_cmp(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.layout.value_order.compare(a, b)
    }

    /// Index of the first entry whose key is not less than `key`.
    pub(crate) fn lower_bound(&self, key: &[u8]) -> usize {
        self.entries
            .partition_point(|(k, _)| self.key_cmp(k, key).is_lt())
    }

    /// Index of the first entry whose key is greater than `key`.
    pub(crate) fn upper_bound(&self, key: &[u8]) -> usize {
        self.entries
            .partition_point(|(k, _)| self.key_cmp(k, key).is_le())
    }

    /// Index of the first entry not less than `(key, value)`.
    pub(crate) fn lower_bound_entry(&self, key: &[u8], value: &[u8]) -> usize {
        self.entries
            .partition_point(|(k, v)| {
                self.layout
                    .compare_entries((k.as_slice(), v.as_slice()), (key, value))
                    .is_lt()
            })
    }

    /// Index of the exact `(key, value)` entry.
    pub(crate) fn find_entry(&self, key: &[u8], value: &[u8]) -> Option<usize> {
        let index = self.lower_bound_entry(key, value);
        let (k, v) = self.entry(index)?;
        let same = self.key_cmp(k, key).is_eq() && self.value_cmp(v, value).is_eq();
        same.then_some(index)
    }

    /// Index range of every entry stored under `key`.
    pub(crate) fn key_range(&self, key: &[u8]) -> std::ops::Range<usize> {
        self.lower_bound(key)..self.upper_bound(key)
    }

    pub(crate) fn same_key(&self, a: &[u8], b: &[u8]) -> bool {
        self.key_cmp(a, b).is_eq()
    }

    /// First value stored under `key`.
    pub(crate) fn get(&self, key: &[u8]) -> Option<&[u8]> {
        let range = self.key_range(key);
        if range.is_empty() {
            return None;
        }
        self.entry(range.start).map(|(_, v)| v)
    }

    /// Inserts or updates an entry.
    ///
    /// Returns false when the exact pair was already present in a duplicate
    /// map, so nothing changed.
    pub(crate) fn put(
        &mut self,
        key: &[u8],
        value: &[u8],
        overwrite: bool,
        txnid: u64,
    ) -> CoreResult<bool> {
        let range = self.key_range(key);
        if !range.is_empty() && !overwrite {
            return Err(CoreError::KeyExists);
        }

        if !self.layout.dup_sort {
            if range.is_empty() {
                self.entries.insert(range.start, (key.to_vec(), value.to_vec()));
            } else {
                self.entries[range.start].1 = value.to_vec();
            }
            self.mod_txnid = txnid;
            return Ok(true);
        }

        if self.find_entry(key, value).is_some() {
            return Ok(false);
        }
        let index = self.lower_bound_entry(key, value);
        self.entries.insert(index, (key.to_vec(), value.to_vec()));
        self.mod_txnid = txnid;
        Ok(true)
    }

    /// Removes `key`, or only the matching duplicate when `value` is given.
    ///
    /// `value` is ignored for non-duplicate maps. Returns whether anything
    /// was removed.
    pub(crate) fn delete(&mut self, key: &[u8], value: Option<&[u8]>, txnid: u64) -> bool {
        let removed = match value {
            Some(value) if self.layout.dup_sort => match self.find_entry(key, value) {
                Some(index) => {
                    self.entries.remove(index);
                    true
                }
                None => false,
            },
            _ => {
                let range = self.key_range(key);
                let removed = !range.is_empty();
                self.entries.drain(range);
                removed
            }
        };
        if removed {
            self.mod_txnid = txnid;
        }
        removed
    }

    pub(crate) fn clear(&mut self, txnid: u64) {
        self.entries.clear();
        self.mod_txnid = txnid;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{KeyOrder, MapFlags};

    fn keys(tree: &MapTree) -> Vec<Vec<u8>> {
        tree.entries().map(|(k, _)| k.to_vec()).collect()
    }

    #[test]
    fn put_keeps_keys_sorted() {
        let mut tree = MapTree::new(MapLayout::default(), 1);
        for key in [b"m".as_slice(), b"a", b"z", b"c"] {
            tree.put(key, b"v", true, 2).unwrap();
        }
        assert_eq!(keys(&tree), vec![b"a".to_vec(), b"c".to_vec(), b"m".to_vec(), b"z".to_vec()]);
        assert_eq!(tree.mod_txnid(), 2);
    }

    #[test]
    fn no_overwrite_keeps_existing_value() {
        let mut tree = MapTree::new(MapLayout::default(), 1);
        tree.put(b"k", b"old", true, 2).unwrap();
        assert!(matches!(tree.put(b"k", b"new", false, 3), Err(CoreError::KeyExists)));
        assert_eq!(tree.get(b"k"), Some(b"old".as_slice()));
        assert_eq!(tree.mod_txnid(), 2);
    }

    #[test]
    fn overwrite_replaces_value() {
        let mut tree = MapTree::new(MapLayout::default(), 1);
        tree.put(b"k", b"old", true, 2).unwrap();
        tree.put(b"k", b"new", true, 3).unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.get(b"k"), Some(b"new".as_slice()));
    }

    #[test]
    fn duplicates_are_sorted_by_value() {
        let mut tree = MapTree::new(MapFlags::new().dup_sort().layout(), 1);
        tree.put(b"k", b"3", true, 2).unwrap();
        tree.put(b"k", b"1", true, 2).unwrap();
        tree.put(b"a", b"9", true, 2).unwrap();
        assert!(!tree.put(b"k", b"1", true, 2).unwrap());

        let all: Vec<_> = tree.entries().map(|(k, v)| (k.to_vec(), v.to_vec())).collect();
        assert_eq!(
            all,
            vec![
                (b"a".to_vec(), b"9".to_vec()),
                (b"k".to_vec(), b"1".to_vec()),
                (b"k".to_vec(), b"3".to_vec()),
            ]
        );
        assert_eq!(tree.key_range(b"k"), 1..3);
        assert_eq!(tree.get(b"k"), Some(b"1".as_slice()));
    }

    #[test]
    fn delete_single_duplicate_or_whole_key() {
        let mut tree = MapTree::new(MapFlags::new().dup_sort().layout(), 1);
        for value in [b"1", b"2", b"3"] {
            tree.put(b"k", value, true, 2).unwrap();
        }
        assert!(tree.delete(b"k", Some(b"2".as_slice()), 3));
        assert!(!tree.delete(b"k", Some(b"2".as_slice()), 4));
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.mod_txnid(), 3);

        assert!(tree.delete(b"k", None, 5));
        assert!(tree.is_empty());
    }

    #[test]
    fn delete_ignores_value_without_duplicates() {
        let mut tree = MapTree::new(MapLayout::default(), 1);
        tree.put(b"k", b"v", true, 2).unwrap();
        assert!(tree.delete(b"k", Some(b"other".as_slice()), 3));
        assert!(!tree.delete(b"k", None, 4));
        assert_eq!(tree.mod_txnid(), 3);
    }

    #[test]
    fn reverse_order_map() {
        let layout = MapFlags::new().key_order(KeyOrder::Reverse).layout();
        let mut tree = MapTree::new(layout, 1);
        for key in [b"ab".as_slice(), b"ba", b"ca"] {
            tree.put(key, b"", true, 2).unwrap();
        }
        assert_eq!(keys(&tree), vec![b"ba".to_vec(), b"ca".to_vec(), b"ab".to_vec()]);
    }

    #[test]
    fn bounds() {
        let mut tree = MapTree::new(MapLayout::default(), 1);
        for key in [b"b".as_slice(), b"d", b"f"] {
            tree.put(key, b"", true, 2).unwrap();
        }
        assert_eq!(tree.lower_bound(b"c"), 1);
        assert_eq!(tree.lower_bound(b"d"), 1);
        assert_eq!(tree.upper_bound(b"d"), 2);
        assert_eq!(tree.lower_bound(b"z"), 3);
    }
}

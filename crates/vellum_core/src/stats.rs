//! Environment statistics and information records.
//!
//! Page counters are estimated from a map's entries and the page size the
//! same way every time, so two identical maps always report identical
//! numbers. They are not a measurement of the data file.

use crate::config::EffectiveGeometry;
use crate::limits;
use crate::store::MapTree;

const PAGE_HEADER: u64 = 20;
const NODE_HEADER: u64 = 8;
const NODE_INDEX: u64 = 2;

/// B-tree shaped counters of one map or of a whole environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MapStat {
    /// Page size in bytes.
    pub page_size: u32,
    /// Height of the tree; 0 for an empty map.
    pub depth: u32,
    /// Internal pages.
    pub branch_pages: u64,
    /// Leaf pages.
    pub leaf_pages: u64,
    /// Pages holding values too large for a leaf.
    pub overflow_pages: u64,
    /// Number of key/value pairs, counting every duplicate.
    pub entries: u64,
    /// Transaction that last modified the map.
    pub mod_txnid: u64,
}

impl MapStat {
    pub(crate) fn estimate(tree: &MapTree, page_size: u32) -> Self {
        let mut stat = Self {
            page_size,
            mod_txnid: tree.mod_txnid(),
            ..Self::default()
        };
        if tree.is_empty() {
            return stat;
        }

        let page = u64::from(page_size);
        let space = page - PAGE_HEADER;
        let leaf_max = limits::leaf_node_max(page_size) as u64;
        let dup_sort = tree.layout().dup_sort;

        let mut leaf_bytes = 0u64;
        let mut key_bytes = 0u64;
        for (key, value) in tree.entries() {
            let (key_len, value_len) = (key.len() as u64, value.len() as u64);
            let mut node = NODE_HEADER + key_len + value_len;
            if node > leaf_max && !dup_sort {
                node = NODE_HEADER + key_len + 8;
                stat.overflow_pages += (value_len + PAGE_HEADER).div_ceil(page);
            }
            leaf_bytes += node + NODE_INDEX;
            key_bytes += key_len;
            stat.entries += 1;
        }

        stat.leaf_pages = leaf_bytes.div_ceil(space).max(1);
        let separator = NODE_HEADER + NODE_INDEX + key_bytes / stat.entries;
        let fanout = (space / separator).max(2);

        stat.depth = 1;
        let mut level = stat.leaf_pages;
        while level > 1 {
            level = level.div_ceil(fanout);
            stat.branch_pages += level;
            stat.depth += 1;
        }
        stat
    }

    /// Adds another map's counters into this one.
    pub(crate) fn accumulate(&mut self, other: &Self) {
        self.depth = self.depth.max(other.depth);
        self.branch_pages += other.branch_pages;
        self.leaf_pages += other.leaf_pages;
        self.overflow_pages += other.overflow_pages;
        self.entries += other.entries;
        self.mod_txnid = self.mod_txnid.max(other.mod_txnid);
    }

    /// Total pages in use.
    #[must_use]
    pub const fn total_pages(&self) -> u64 {
        self.branch_pages + self.leaf_pages + self.overflow_pages
    }
}

/// Environment-wide information as of one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvInfo {
    /// Geometry in force.
    pub geometry: EffectiveGeometry,
    /// Current data file size in bytes.
    pub file_size: u64,
    /// Accounted map size: file size rounded to the geometry.
    pub map_size: u64,
    /// Number of the last page in use.
    pub last_pgno: u64,
    /// Id of the most recent commit.
    pub recent_txnid: u64,
    /// Snapshot id of the oldest active reader, if any.
    pub latter_reader_txnid: Option<u64>,
    /// Snapshot id of the transaction the info was taken with, if any.
    pub self_latter_reader_txnid: Option<u64>,
    /// Active read transactions.
    pub num_readers: u32,
    /// Reader table size.
    pub max_readers: u32,
    /// Named map limit.
    pub max_maps: u32,
    /// Committed bytes not yet fsynced.
    pub unsynced_bytes: u64,
}

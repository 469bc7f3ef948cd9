//! Page-size derived key and value limits.
//!
//! The numbers follow the node layout of a B-tree page: a 20 byte page
//! header, 2 byte node index entries, 8 byte node headers and a 48 byte
//! nested tree record for duplicate keys.

use crate::map::MapLayout;

/// Smallest supported page size.
pub const MIN_PAGE_SIZE: u32 = 256;

/// Largest supported page size.
pub const MAX_PAGE_SIZE: u32 = 65536;

/// Page size used when none is configured.
pub const DEFAULT_PAGE_SIZE: u32 = 4096;

/// Largest value a non-duplicate map accepts.
pub const MAX_VALUE_SIZE: usize = 0x7FF0_0000;

const PAGE_HEADER: usize = 20;
const NODE_HEADER: usize = 8;
const NODE_INDEX: usize = 2;
const NESTED_TREE: usize = 48;
const ORDINAL_MAX: usize = 8;

const fn even_floor(n: usize) -> usize {
    n & !1
}

const fn page_space(page_size: u32) -> usize {
    page_size as usize - PAGE_HEADER
}

/// Largest node that fits a branch page.
#[must_use]
pub const fn branch_node_max(page_size: u32) -> usize {
    even_floor((page_space(page_size) - NODE_INDEX - NODE_HEADER) / 2 - NODE_INDEX)
}

/// Largest node that fits a leaf page inline.
#[must_use]
pub const fn leaf_node_max(page_size: u32) -> usize {
    even_floor(page_space(page_size) / 2) - NODE_INDEX
}

/// Returns true if `page_size` is a supported power of two.
#[must_use]
pub const fn is_valid_page_size(page_size: u32) -> bool {
    page_size.is_power_of_two() && page_size >= MIN_PAGE_SIZE && page_size <= MAX_PAGE_SIZE
}

/// Largest key accepted by a map with `layout`.
#[must_use]
pub fn max_key_size(page_size: u32, layout: MapLayout) -> usize {
    if layout.key_order == crate::map::KeyOrder::Ordinal {
        return ORDINAL_MAX;
    }
    let plain = branch_node_max(page_size) - NODE_HEADER;
    if layout.dup_sort {
        plain.min(leaf_node_max(page_size) - NODE_HEADER - NESTED_TREE)
    } else {
        plain
    }
}

/// Largest value accepted by a map with `layout`.
#[must_use]
pub fn max_value_size(page_size: u32, layout: MapLayout) -> usize {
    if !layout.dup_sort {
        return MAX_VALUE_SIZE;
    }
    if layout.value_order == crate::map::KeyOrder::Ordinal {
        return ORDINAL_MAX;
    }
    max_key_size(page_size, MapLayout::default())
}

//! Map flags and key/value ordering.

use crate::error::{CoreError, CoreResult};
use std::cmp::Ordering;

/// Comparison used to order the keys (or duplicate values) of a map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KeyOrder {
    /// Plain byte-wise comparison.
    #[default]
    Lexicographic,
    /// Byte-wise comparison starting from the last byte.
    Reverse,
    /// Native little-endian unsigned integers of 4 or 8 bytes.
    Ordinal,
}

/// Ordering of duplicate values; shares the key comparisons.
pub type ValueOrder = KeyOrder;

impl KeyOrder {
    /// Compares two byte strings under this order.
    ///
    /// Ordinal operands must already be validated.
    #[must_use]
    pub fn compare(self, a: &[u8], b: &[u8]) -> Ordering {
        match self {
            Self::Lexicographic => a.cmp(b),
            Self::Reverse => a
                .iter()
                .rev()
                .zip(b.iter().rev())
                .map(|(x, y)| x.cmp(y))
                .find(|o| o.is_ne())
                .unwrap_or_else(|| a.len().cmp(&b.len())),
            Self::Ordinal => ordinal(a).cmp(&ordinal(b)),
        }
    }

    /// Checks that `bytes` can be ordered by this comparison.
    pub(crate) fn validate(self, bytes: &[u8], what: &str) -> CoreResult<()> {
        if self == Self::Ordinal && bytes.len() != 4 && bytes.len() != 8 {
            return Err(CoreError::bad_value_size(format!(
                "ordinal {what} must be 4 or 8 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(())
    }

    pub(crate) const fn code(self) -> u8 {
        match self {
            Self::Lexicographic => 0,
            Self::Reverse => 1,
            Self::Ordinal => 2,
        }
    }

    pub(crate) fn from_code(code: u8) -> CoreResult<Self> {
        match code {
            0 => Ok(Self::Lexicographic),
            1 => Ok(Self::Reverse),
            2 => Ok(Self::Ordinal),
            other => Err(CoreError::corrupted(format!("unknown order code {other}"))),
        }
    }
}

fn ordinal(bytes: &[u8]) -> u64 {
    match bytes.len() {
        4 => u64::from(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        8 => u64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]),
        _ => 0,
    }
}

/// Persistent shape of a map: fixed when the map is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MapLayout {
    /// Whether a key may hold several sorted values.
    pub dup_sort: bool,
    /// Key comparison.
    pub key_order: KeyOrder,
    /// Value comparison for duplicates.
    pub value_order: ValueOrder,
}

impl MapLayout {
    /// Compares two entries: keys first, then values for duplicate maps.
    #[must_use]
    pub fn compare_entries(&self, a: (&[u8], &[u8]), b: (&[u8], &[u8])) -> Ordering {
        let by_key = self.key_order.compare(a.0, b.0);
        if by_key.is_ne() || !self.dup_sort {
            return by_key;
        }
        self.value_order.compare(a.1, b.1)
    }
}

/// Flags for [`crate::Transaction::open_map`].
///
/// # Example
///
/// ```rust
/// use vellum_core::{KeyOrder, MapFlags};
///
/// let flags = MapFlags::new().create().dup_sort().key_order(KeyOrder::Ordinal);
/// assert!(flags.create && flags.dup_sort);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MapFlags {
    /// Create the map if it does not exist.
    pub create: bool,
    /// Allow several values per key.
    pub dup_sort: bool,
    /// Key comparison.
    pub key_order: KeyOrder,
    /// Value comparison for duplicates.
    pub value_order: ValueOrder,
    /// Accept the stored layout of an existing map instead of failing on a
    /// mismatch.
    pub accede: bool,
}

impl MapFlags {
    /// Flags that open an existing map with whatever layout it has.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            create: false,
            dup_sort: false,
            key_order: KeyOrder::Lexicographic,
            value_order: KeyOrder::Lexicographic,
            accede: false,
        }
    }

    /// Creates the map if missing.
    #[must_use]
    pub const fn create(mut self) -> Self {
        self.create = true;
        self
    }

    /// Enables duplicate-key mode.
    #[must_use]
    pub const fn dup_sort(mut self) -> Self {
        self.dup_sort = true;
        self
    }

    /// Sets the key comparison.
    #[must_use]
    pub const fn key_order(mut self, order: KeyOrder) -> Self {
        self.key_order = order;
        self
    }

    /// Sets the duplicate value comparison.
    #[must_use]
    pub const fn value_order(mut self, order: ValueOrder) -> Self {
        self.value_order = order;
        self
    }

    /// Accepts whatever layout an existing map has.
    #[must_use]
    pub const fn accede(mut self) -> Self {
        self.accede = true;
        self
    }

    /// Returns the layout these flags request.
    #[must_use]
    pub const fn layout(&self) -> MapLayout {
        MapLayout {
            dup_sort: self.dup_sort,
            key_order: self.key_order,
            value_order: self.value_order,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_compares_from_the_end() {
        let order = KeyOrder::Reverse;
        assert_eq!(order.compare(b"ba", b"ab"), Ordering::Less);
        assert_eq!(order.compare(b"xa", b"a"), Ordering::Greater);
        assert_eq!(order.compare(b"abc", b"abc"), Ordering::Equal);
    }

    #[test]
    fn ordinal_compares_numerically() {
        let order = KeyOrder::Ordinal;
        let small = 2u32.to_le_bytes();
        let large = 256u64.to_le_bytes();
        assert_eq!(order.compare(&small, &large), Ordering::Less);
        assert_eq!(order.compare(&large, &small), Ordering::Greater);
        assert_eq!(order.compare(&7u32.to_le_bytes(), &7u64.to_le_bytes()), Ordering::Equal);
    }

    #[test]
    fn ordinal_rejects_odd_widths() {
        assert!(KeyOrder::Ordinal.validate(&[1, 2, 3], "key").is_err());
        assert!(KeyOrder::Ordinal.validate(&[0; 8], "key").is_ok());
        assert!(KeyOrder::Lexicographic.validate(&[1, 2, 3], "key").is_ok());
    }

    #[test]
    fn entries_compare_values_only_for_duplicates() {
        let plain = MapLayout::default();
        assert_eq!(
            plain.compare_entries((b"k", b"1"), (b"k", b"2")),
            Ordering::Equal
        );

        let dups = MapFlags::new().dup_sort().layout();
        assert_eq!(dups.compare_entries((b"k", b"1"), (b"k", b"2")), Ordering::Less);
        assert_eq!(dups.compare_entries((b"a", b"9"), (b"k", b"0")), Ordering::Less);
    }

    #[test]
    fn order_codes_roundtrip() {
        for order in [KeyOrder::Lexicographic, KeyOrder::Reverse, KeyOrder::Ordinal] {
            assert_eq!(KeyOrder::from_code(order.code()).unwrap(), order);
        }
        assert!(KeyOrder::from_code(9).is_err());
    }
}

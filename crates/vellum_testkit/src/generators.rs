//! Property-based test generators using proptest.

use proptest::prelude::*;
use vellum_core::KeyOrder;

/// One mutation applied to a map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapOp {
    /// Insert or overwrite.
    Put(Vec<u8>, Vec<u8>),
    /// Delete the key if present.
    Delete(Vec<u8>),
}

/// Strategy for generating short keys, so collisions happen often.
pub fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..8)
}

/// Strategy for generating values.
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..64)
}

/// Strategy for generating valid map names.
pub fn map_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for generating ordinal keys of either width.
pub fn ordinal_key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        any::<u32>().prop_map(|n| n.to_le_bytes().to_vec()),
        any::<u64>().prop_map(|n| n.to_le_bytes().to_vec()),
    ]
}

/// Strategy for key orders.
pub fn key_order_strategy() -> impl Strategy<Value = KeyOrder> {
    prop_oneof![
        Just(KeyOrder::Lexicographic),
        Just(KeyOrder::Reverse),
        Just(KeyOrder::Ordinal),
    ]
}

/// Strategy for generating a sequence of map mutations.
pub fn map_ops_strategy(max_ops: usize) -> impl Strategy<Value = Vec<MapOp>> {
    let op = prop_oneof![
        3 => (key_strategy(), value_strategy()).prop_map(|(k, v)| MapOp::Put(k, v)),
        1 => key_strategy().prop_map(MapOp::Delete),
    ];
    prop::collection::vec(op, 0..max_ops)
}

/// Strategy for generating unique key/value pairs.
pub fn unique_pairs_strategy(max: usize) -> impl Strategy<Value = Vec<(Vec<u8>, Vec<u8>)>> {
    prop::collection::btree_map(key_strategy(), value_strategy(), 0..max)
        .prop_map(|map| map.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn keys_are_never_empty(key in key_strategy()) {
            prop_assert!(!key.is_empty());
        }

        #[test]
        fn ordinal_keys_have_integer_width(key in ordinal_key_strategy()) {
            prop_assert!(key.len() == 4 || key.len() == 8);
        }

        #[test]
        fn unique_pairs_are_unique(pairs in unique_pairs_strategy(32)) {
            let mut keys: Vec<_> = pairs.iter().map(|(k, _)| k.clone()).collect();
            keys.dedup();
            prop_assert_eq!(keys.len(), pairs.len());
        }
    }
}

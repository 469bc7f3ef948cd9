//! Property tests: the environment behaves like an ordered map.

use proptest::prelude::*;
use std::collections::BTreeMap;
use vellum_core::{CursorOp, EnvConfig, Environment, KeyOrder, MapFlags};
use vellum_testkit::prelude::*;

fn collect(env: &Environment, name: &str) -> Vec<(Vec<u8>, Vec<u8>)> {
    let txn = env.begin_read().unwrap();
    let map = txn.open_map(Some(name), MapFlags::new()).unwrap();
    let mut cursor = txn.cursor(map).unwrap();
    let mut out = Vec::new();
    while let Some(entry) = cursor.seek(CursorOp::Next).unwrap() {
        out.push(entry);
    }
    out
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn matches_btreemap_model(ops in map_ops_strategy(64)) {
        let env = Environment::open_in_memory(EnvConfig::default()).unwrap();
        let mut model = BTreeMap::new();
        let txn = env.begin_write().unwrap();
        let map = txn.open_map(Some("model"), MapFlags::new().create()).unwrap();
        for op in &ops {
            match op {
                MapOp::Put(k, v) => {
                    txn.put(map, k, v, true).unwrap();
                    model.insert(k.clone(), v.clone());
                }
                MapOp::Delete(k) => {
                    let removed = txn.delete(map, k, None).unwrap();
                    prop_assert_eq!(removed, model.remove(k).is_some());
                }
            }
        }
        txn.commit().unwrap();

        let expected: Vec<_> = model.into_iter().collect();
        prop_assert_eq!(collect(&env, "model"), expected);
    }

    #[test]
    fn aborted_writes_are_invisible(
        committed in unique_pairs_strategy(16),
        aborted in unique_pairs_strategy(16),
    ) {
        let env = Environment::open_in_memory(EnvConfig::default()).unwrap();
        let txn = env.begin_write().unwrap();
        let map = txn.open_map(Some("m"), MapFlags::new().create()).unwrap();
        for (k, v) in &committed {
            txn.put(map, k, v, true).unwrap();
        }
        txn.commit().unwrap();

        let txn = env.begin_write().unwrap();
        for (k, v) in &aborted {
            txn.put(map, k, v, true).unwrap();
        }
        txn.abort().unwrap();

        prop_assert_eq!(collect(&env, "m"), committed);
    }

    #[test]
    fn key_orders_iterate_by_comparator(
        order in key_order_strategy(),
        raw in prop::collection::vec(any::<u32>(), 1..32),
    ) {
        let env = Environment::open_in_memory(EnvConfig::default()).unwrap();
        let txn = env.begin_write().unwrap();
        let flags = MapFlags::new().create().key_order(order);
        let map = txn.open_map(Some("ordered"), flags).unwrap();
        for n in &raw {
            txn.put(map, &n.to_le_bytes(), b"", true).unwrap();
        }
        txn.commit().unwrap();

        let keys: Vec<Vec<u8>> = collect(&env, "ordered").into_iter().map(|(k, _)| k).collect();
        for pair in keys.windows(2) {
            prop_assert_eq!(order.compare(&pair[0], &pair[1]), std::cmp::Ordering::Less);
        }
        let mut distinct = raw.clone();
        distinct.sort_unstable();
        distinct.dedup();
        prop_assert_eq!(keys.len(), distinct.len());
    }

    #[test]
    fn reopen_preserves_contents(pairs in unique_pairs_strategy(48)) {
        let mut test_env = TestEnv::file();
        {
            let txn = test_env.begin_write().unwrap();
            let map = txn.open_map(Some("persisted"), MapFlags::new().create()).unwrap();
            for (k, v) in &pairs {
                txn.put(map, k, v, true).unwrap();
            }
            txn.commit().unwrap();
        }
        test_env.reopen();
        prop_assert_eq!(collect(&test_env, "persisted"), pairs);
    }
}

#[test]
fn ordinal_keys_sort_numerically() {
    with_temp_env(|env| {
        let txn = env.begin_write().unwrap();
        let flags = MapFlags::new().create().key_order(KeyOrder::Ordinal);
        let map = txn.open_map(Some("ints"), flags).unwrap();
        for n in [300u32, 2, 70_000, 1] {
            txn.put(map, &n.to_le_bytes(), b"", true).unwrap();
        }
        txn.commit().unwrap();

        let keys: Vec<u32> = collect(env, "ints")
            .into_iter()
            .map(|(k, _)| u32::from_le_bytes([k[0], k[1], k[2], k[3]]))
            .collect();
        assert_eq!(keys, [1, 2, 300, 70_000]);
    });
}

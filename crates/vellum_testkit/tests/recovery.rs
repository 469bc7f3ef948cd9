//! Crash recovery: a damaged tail never loses a complete commit.

use vellum_core::{EnvConfig, Environment, ErrorKind, MapFlags, MapHandle};
use vellum_testkit::prelude::*;

fn committed_env() -> (TestEnv, u64) {
    let test_env = TestEnv::file();
    scenarios::populate_map(&test_env, "items", 20);
    let len = file_len(&test_env.data_path().unwrap()).unwrap();
    let txn = test_env.begin_write().unwrap();
    let map = txn.open_map(Some("items"), MapFlags::new()).unwrap();
    txn.put(map, b"late", b"commit", true).unwrap();
    txn.commit().unwrap();
    (test_env, len)
}

fn assert_late_commit_lost(test_env: &TestEnv) {
    let txn = test_env.begin_read().unwrap();
    let map = txn.open_map(Some("items"), MapFlags::new()).unwrap();
    assert_eq!(txn.get(map, b"late").unwrap(), None);
    assert_eq!(txn.map_stat(map).unwrap().entries, 20);
}

#[test]
fn torn_frame_rolls_back_to_previous_commit() {
    let (mut test_env, len_before) = committed_env();
    let data = test_env.data_path().unwrap();
    test_env.reopen_after(|_| simulate_crash(&data, CrashPoint::TornFrame { cut: 5 }).unwrap());

    assert_late_commit_lost(&test_env);
    assert_eq!(file_len(&data).unwrap(), len_before);
}

#[test]
fn flipped_checksum_discards_last_frame() {
    let (mut test_env, _) = committed_env();
    let data = test_env.data_path().unwrap();
    test_env.reopen_after(|_| simulate_crash(&data, CrashPoint::FlippedChecksum).unwrap());
    assert_late_commit_lost(&test_env);
}

#[test]
fn trailing_garbage_is_truncated() {
    let (mut test_env, _) = committed_env();
    let data = test_env.data_path().unwrap();
    let len = file_len(&data).unwrap();
    test_env.reopen_after(|_| {
        simulate_crash(&data, CrashPoint::TrailingGarbage { len: 40 }).unwrap();
    });

    assert_eq!(file_len(&data).unwrap(), len);
    let txn = test_env.begin_read().unwrap();
    let map = txn.open_map(Some("items"), MapFlags::new()).unwrap();
    assert_eq!(txn.get(map, b"late").unwrap(), Some(b"commit".to_vec()));
}

#[test]
fn writes_continue_after_recovery() {
    let (mut test_env, _) = committed_env();
    let data = test_env.data_path().unwrap();
    test_env.reopen_after(|_| simulate_crash(&data, CrashPoint::TornFrame { cut: 1 }).unwrap());

    let txn = test_env.begin_write().unwrap();
    txn.put(MapHandle::DEFAULT, b"after", b"crash", true).unwrap();
    txn.commit().unwrap();
    test_env.reopen();

    let txn = test_env.begin_read().unwrap();
    assert_eq!(
        txn.get(MapHandle::DEFAULT, b"after").unwrap(),
        Some(b"crash".to_vec())
    );
}

#[test]
fn not_a_data_file_is_rejected() {
    let test_env = TestEnv::file();
    let target = test_env.scratch("junk.dat").unwrap();
    std::fs::write(&target, vec![0x42; 128]).unwrap();
    let err = Environment::open(&target, EnvConfig::default().no_subdir(true)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Environment);
}

#[test]
fn read_only_open_does_not_repair() {
    let (mut test_env, _) = committed_env();
    let data = test_env.data_path().unwrap();
    let path = test_env.path().unwrap();
    test_env.env.close().unwrap();
    simulate_crash(&data, CrashPoint::TornFrame { cut: 3 }).unwrap();
    let damaged = file_len(&data).unwrap();

    let env = Environment::open(&path, EnvConfig::default().read_only(true)).unwrap();
    let txn = env.begin_read().unwrap();
    let map = txn.open_map(Some("items"), MapFlags::new()).unwrap();
    assert_eq!(txn.get(map, b"late").unwrap(), None);
    assert_eq!(file_len(&data).unwrap(), damaged);
    drop(txn);
    env.close().unwrap();

    test_env.env = Environment::open(&path, EnvConfig::default()).unwrap();
    assert!(file_len(&data).unwrap() < damaged);
}

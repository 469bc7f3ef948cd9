//! Versioned snapshots over a durable commit log.
//!
//! Every committed write transaction becomes one [`Version`]: an immutable
//! catalog of map trees shared by `Arc`. Readers pin a version; the writer
//! builds the next one copy-on-write and publishes it after its commit frame
//! reached the backend.

mod log;
mod tree;

pub(crate) use log::{LogOp, MapName};
pub(crate) use tree::MapTree;

use crate::config::{EffectiveGeometry, Geometry};
use crate::error::{CoreError, CoreResult};
use log::{encode_frame, read_frame, FrameRead, LogHeader, HEADER_LEN};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use vellum_storage::StorageBackend;

/// Snapshot id of a freshly created environment.
pub(crate) const INITIAL_TXNID: u64 = 1;

/// Map name to tree, one entry per map including the default map.
pub(crate) type Catalog = BTreeMap<MapName, Arc<MapTree>>;

/// One committed state of the environment.
#[derive(Debug)]
pub(crate) struct Version {
    pub(crate) txnid: u64,
    pub(crate) maps: Catalog,
    /// Data file length that holds exactly this version.
    pub(crate) durable_len: u64,
}

impl Version {
    fn genesis(durable_len: u64) -> Self {
        let mut maps = Catalog::new();
        maps.insert(
            None,
            Arc::new(MapTree::new(crate::map::MapLayout::default(), INITIAL_TXNID)),
        );
        Self {
            txnid: INITIAL_TXNID,
            maps,
            durable_len,
        }
    }
}

/// Replays one logged op onto a catalog.
fn apply_op(maps: &mut Catalog, op: &LogOp, txnid: u64) -> CoreResult<()> {
    let tree = |maps: &Catalog, name: &MapName| -> CoreResult<Arc<MapTree>> {
        maps.get(name)
            .cloned()
            .ok_or_else(|| CoreError::corrupted(format!("frame {txnid} names unknown map {name:?}")))
    };

    match op {
        LogOp::CreateMap { name, layout } => {
            if name.is_some() && maps.contains_key(name) {
                return Err(CoreError::corrupted(format!(
                    "frame {txnid} creates existing map {name:?}"
                )));
            }
            maps.insert(name.clone(), Arc::new(MapTree::new(*layout, txnid)));
        }
        LogOp::DropMap { name } => {
            if name.is_none() || maps.remove(name).is_none() {
                return Err(CoreError::corrupted(format!(
                    "frame {txnid} drops unknown map {name:?}"
                )));
            }
        }
        LogOp::ClearMap { name } => {
            let mut t = tree(maps, name)?;
            Arc::make_mut(&mut t).clear(txnid);
            maps.insert(name.clone(), t);
        }
        LogOp::Put { name, key, value } => {
            let mut t = tree(maps, name)?;
            Arc::make_mut(&mut t).put(key, value, true, txnid)?;
            maps.insert(name.clone(), t);
        }
        LogOp::Delete { name, key, value } => {
            let mut t = tree(maps, name)?;
            Arc::make_mut(&mut t).delete(key, value.as_deref(), txnid);
            maps.insert(name.clone(), t);
        }
    }
    Ok(())
}

/// Ops that rebuild `version` from an empty environment.
fn live_ops(version: &Version) -> Vec<LogOp> {
    let mut ops = Vec::new();
    for (name, tree) in &version.maps {
        if name.is_some() || tree.layout() != crate::map::MapLayout::default() {
            ops.push(LogOp::CreateMap {
                name: name.clone(),
                layout: tree.layout(),
            });
        }
        for (key, value) in tree.entries() {
            ops.push(LogOp::Put {
                name: name.clone(),
                key: key.to_vec(),
                value: value.to_vec(),
            });
        }
    }
    ops
}

#[derive(Debug)]
struct SyncState {
    unsynced: u64,
    last_sync: Instant,
}

/// The data file of one environment.
pub(crate) struct Store {
    backend: Mutex<Box<dyn StorageBackend>>,
    header: LogHeader,
    geometry: EffectiveGeometry,
    current: RwLock<Arc<Version>>,
    sync: Mutex<SyncState>,
    sync_on_commit: bool,
    read_only: bool,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("geometry", &self.geometry)
            .field("txnid", &self.current.read().txnid)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Opens a store, writing a header into an empty backend or replaying
    /// the frames of an existing one.
    pub(crate) fn open(
        mut backend: Box<dyn StorageBackend>,
        requested: &Geometry,
        sync_on_commit: bool,
        read_only: bool,
    ) -> CoreResult<Self> {
        let size = backend.size()?;
        let (header, geometry, version) = if size == 0 {
            if read_only {
                return Err(CoreError::environment("data file is empty"));
            }
            let geometry = requested.resolve(None)?;
            let header = LogHeader::new(geometry);
            backend.append(&header.encode())?;
            backend.sync()?;
            (header, geometry, Version::genesis(HEADER_LEN as u64))
        } else {
            if size < HEADER_LEN as u64 {
                return Err(CoreError::corrupted(format!(
                    "data file of {size} bytes is shorter than its header"
                )));
            }
            let header = LogHeader::decode(&backend.read_at(0, HEADER_LEN)?)?;
            let geometry = requested.resolve(Some(&header.geometry))?;
            let version = Self::recover(backend.as_mut(), size, read_only)?;
            (header, geometry, version)
        };

        tracing::debug!(
            txnid = version.txnid,
            maps = version.maps.len(),
            durable_len = version.durable_len,
            "store opened"
        );

        Ok(Self {
            backend: Mutex::new(backend),
            header,
            geometry,
            current: RwLock::new(Arc::new(version)),
            sync: Mutex::new(SyncState {
                unsynced: 0,
                last_sync: Instant::now(),
            }),
            sync_on_commit,
            read_only,
        })
    }

    fn recover(
        backend: &mut dyn StorageBackend,
        size: u64,
        read_only: bool,
    ) -> CoreResult<Version> {
        let body_len = usize::try_from(size - HEADER_LEN as u64)
            .map_err(|_| CoreError::environment("data file too large to replay"))?;
        let data = backend.read_at(HEADER_LEN as u64, body_len)?;

        let mut version = Version::genesis(HEADER_LEN as u64);
        let mut offset = 0usize;
        let mut frames = 0usize;
        while offset < data.len() {
            match read_frame(&data[offset..])? {
                FrameRead::Frame { txnid, ops, len } => {
                    if txnid <= version.txnid {
                        return Err(CoreError::corrupted(format!(
                            "frame {txnid} follows frame {}",
                            version.txnid
                        )));
                    }
                    for op in &ops {
                        apply_op(&mut version.maps, op, txnid)?;
                    }
                    version.txnid = txnid;
                    offset += len;
                    frames += 1;
                }
                FrameRead::Torn => break,
            }
        }

        let durable_len = HEADER_LEN as u64 + offset as u64;
        if durable_len < size {
            tracing::warn!(
                torn_bytes = size - durable_len,
                last_txnid = version.txnid,
                "discarding incomplete commit frame"
            );
            if !read_only {
                backend.truncate(durable_len)?;
            }
        }
        tracing::debug!(frames, "replayed commit log");
        version.durable_len = durable_len;
        Ok(version)
    }

    /// Returns the latest committed version.
    pub(crate) fn snapshot(&self) -> Arc<Version> {
        Arc::clone(&self.current.read())
    }

    /// Returns the geometry in force.
    pub(crate) fn geometry(&self) -> EffectiveGeometry {
        self.geometry
    }

    /// Current data file size.
    pub(crate) fn file_size(&self) -> CoreResult<u64> {
        Ok(self.backend.lock().size()?)
    }

    /// Committed bytes not yet fsynced.
    pub(crate) fn unsynced_bytes(&self) -> u64 {
        self.sync.lock().unsynced
    }

    /// Durably appends one commit frame and publishes the resulting version.
    ///
    /// Nothing is published and the file is left at its previous length if
    /// any step fails.
    pub(crate) fn commit(&self, txnid: u64, ops: &[LogOp], maps: Catalog) -> CoreResult<Arc<Version>> {
        if self.read_only {
            return Err(CoreError::usage("environment is read-only"));
        }
        let frame = encode_frame(txnid, ops)?;

        let mut backend = self.backend.lock();
        let size = backend.size()?;
        let required = size + frame.len() as u64;
        if required > self.geometry.upper {
            return Err(CoreError::MapFull {
                required,
                upper: self.geometry.upper,
            });
        }

        let written = match backend.append(&frame) {
            Ok(_) if self.sync_on_commit => backend.sync(),
            Ok(_) => backend.flush(),
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            if let Err(undo) = backend.truncate(size) {
                tracing::warn!(error = %undo, "could not cut back a failed commit frame");
            }
            return Err(err.into());
        }

        let version = Arc::new(Version {
            txnid,
            maps,
            durable_len: required,
        });
        *self.current.write() = Arc::clone(&version);
        drop(backend);

        let mut sync = self.sync.lock();
        if self.sync_on_commit {
            sync.unsynced = 0;
            sync.last_sync = Instant::now();
        } else {
            sync.unsynced += frame.len() as u64;
        }
        Ok(version)
    }

    /// Flushes the data file and fsyncs it when `force` is set or a
    /// threshold is crossed. Returns whether an fsync happened.
    pub(crate) fn sync(&self, force: bool, sync_bytes: u64, sync_period: Duration) -> CoreResult<bool> {
        if self.read_only {
            return Ok(false);
        }
        let mut state = self.sync.lock();
        let due = force
            || (sync_bytes > 0 && state.unsynced >= sync_bytes)
            || (!sync_period.is_zero() && state.unsynced > 0 && state.last_sync.elapsed() >= sync_period);

        let mut backend = self.backend.lock();
        backend.flush()?;
        if !due {
            return Ok(false);
        }
        backend.sync()?;
        state.unsynced = 0;
        state.last_sync = Instant::now();
        Ok(true)
    }

    /// Writes a consistent copy of the latest version into `out`.
    ///
    /// A compacting copy writes only live data as one frame; a plain copy
    /// streams the frames as they are.
    pub(crate) fn copy_to(&self, out: &mut dyn Write, compact: bool, dynamic_size: bool) -> CoreResult<u64> {
        let version = self.snapshot();
        let header = if dynamic_size {
            LogHeader::new(self.header.geometry.dynamic_with_page_size())
        } else {
            self.header
        };

        let mut written = 0u64;
        if compact {
            let encoded = header.encode();
            out.write_all(&encoded)?;
            written += encoded.len() as u64;
            if version.txnid > INITIAL_TXNID {
                let frame = encode_frame(version.txnid, &live_ops(&version))?;
                out.write_all(&frame)?;
                written += frame.len() as u64;
            }
        } else {
            let backend = self.backend.lock();
            if dynamic_size {
                let encoded = header.encode();
                out.write_all(&encoded)?;
                written += encoded.len() as u64;
            } else {
                written += backend.copy_range(0, HEADER_LEN as u64, out)?;
            }
            let frames_len = version.durable_len - HEADER_LEN as u64;
            written += backend.copy_range(HEADER_LEN as u64, frames_len, out)?;
        }
        out.flush()?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{MapFlags, MapLayout};
    use vellum_storage::InMemoryBackend;

    fn open(backend: InMemoryBackend) -> Store {
        Store::open(Box::new(backend), &Geometry::new(), true, false).unwrap()
    }

    fn commit_put(store: &Store, name: Option<&str>, key: &[u8], value: &[u8]) -> Arc<Version> {
        let base = store.snapshot();
        let txnid = base.txnid + 1;
        let mut maps = base.maps.clone();
        let name: MapName = name.map(str::to_string);
        let mut ops = Vec::new();
        if !maps.contains_key(&name) {
            let op = LogOp::CreateMap {
                name: name.clone(),
                layout: MapLayout::default(),
            };
            apply_op(&mut maps, &op, txnid).unwrap();
            ops.push(op);
        }
        let op = LogOp::Put {
            name,
            key: key.to_vec(),
            value: value.to_vec(),
        };
        apply_op(&mut maps, &op, txnid).unwrap();
        ops.push(op);
        store.commit(txnid, &ops, maps).unwrap()
    }

    fn image(store: &Store) -> Vec<u8> {
        let mut out = Vec::new();
        store.copy_to(&mut out, false, false).unwrap();
        out
    }

    #[test]
    fn fresh_store_has_default_map() {
        let store = open(InMemoryBackend::new());
        let version = store.snapshot();
        assert_eq!(version.txnid, INITIAL_TXNID);
        assert!(version.maps.contains_key(&None));
        assert_eq!(version.durable_len, HEADER_LEN as u64);
    }

    #[test]
    fn commit_publishes_new_version() {
        let store = open(InMemoryBackend::new());
        let before = store.snapshot();
        let after = commit_put(&store, Some("users"), b"alice", b"1");

        assert_eq!(after.txnid, before.txnid + 1);
        assert!(!before.maps.contains_key(&Some("users".to_string())));
        let users = &store.snapshot().maps[&Some("users".to_string())];
        assert_eq!(users.get(b"alice"), Some(b"1".as_slice()));
    }

    #[test]
    fn replay_restores_versions() {
        let store = open(InMemoryBackend::new());
        commit_put(&store, Some("users"), b"alice", b"1");
        commit_put(&store, None, b"k", b"v");

        let reopened = open(InMemoryBackend::with_data(image(&store)));
        let version = reopened.snapshot();
        assert_eq!(version.txnid, INITIAL_TXNID + 2);
        assert_eq!(version.maps[&None].get(b"k"), Some(b"v".as_slice()));
        assert_eq!(
            version.maps[&Some("users".to_string())].get(b"alice"),
            Some(b"1".as_slice())
        );
    }

    #[test]
    fn torn_tail_is_discarded() {
        let store = open(InMemoryBackend::new());
        commit_put(&store, None, b"a", b"1");
        let good = image(&store);
        commit_put(&store, None, b"b", b"2");
        let mut torn = image(&store);
        torn.truncate(torn.len() - 3);

        let reopened = open(InMemoryBackend::with_data(torn));
        let version = reopened.snapshot();
        assert_eq!(version.txnid, INITIAL_TXNID + 1);
        assert_eq!(version.maps[&None].get(b"b"), None);
        assert_eq!(version.durable_len, good.len() as u64);
        assert_eq!(reopened.file_size().unwrap(), good.len() as u64);
    }

    #[test]
    fn commit_past_upper_bound_is_map_full() {
        let geometry = Geometry::new().page_size(256).upper(1024);
        let store = Store::open(Box::new(InMemoryBackend::new()), &geometry, true, false).unwrap();
        let base = store.snapshot();
        let ops = vec![LogOp::Put {
            name: None,
            key: b"k".to_vec(),
            value: vec![0u8; 2000],
        }];

        let err = store.commit(base.txnid + 1, &ops, base.maps.clone()).unwrap_err();
        assert!(matches!(err, CoreError::MapFull { upper: 1024, .. }));
        assert_eq!(store.snapshot().txnid, base.txnid);
        assert_eq!(store.file_size().unwrap(), HEADER_LEN as u64);
    }

    #[test]
    fn compact_copy_keeps_only_live_data() {
        let store = open(InMemoryBackend::new());
        for i in 0..20u8 {
            commit_put(&store, Some("m"), b"same-key", &[i; 32]);
        }
        let mut compact = Vec::new();
        store.copy_to(&mut compact, true, false).unwrap();
        assert!(compact.len() < image(&store).len());

        let copy = open(InMemoryBackend::with_data(compact));
        let version = copy.snapshot();
        assert_eq!(version.txnid, store.snapshot().txnid);
        let tree = &version.maps[&Some("m".to_string())];
        assert_eq!(tree.get(b"same-key"), Some([19u8; 32].as_slice()));
    }

    #[test]
    fn compact_copy_keeps_default_map_layout() {
        let store = open(InMemoryBackend::new());
        let base = store.snapshot();
        let mut maps = base.maps.clone();
        let op = LogOp::CreateMap {
            name: None,
            layout: MapFlags::new().dup_sort().layout(),
        };
        apply_op(&mut maps, &op, 2).unwrap();
        store.commit(2, &[op], maps).unwrap();

        let mut compact = Vec::new();
        store.copy_to(&mut compact, true, false).unwrap();
        let copy = open(InMemoryBackend::with_data(compact));
        assert!(copy.snapshot().maps[&None].layout().dup_sort);
    }

    #[test]
    fn dynamic_size_copy_rewrites_geometry() {
        let geometry = Geometry::new().upper(1 << 20);
        let store = Store::open(Box::new(InMemoryBackend::new()), &geometry, true, false).unwrap();
        commit_put(&store, None, b"k", b"v");

        let mut out = Vec::new();
        store.copy_to(&mut out, false, true).unwrap();
        let header = LogHeader::decode(&out).unwrap();
        assert_eq!(header.geometry, EffectiveGeometry::dynamic_default());

        let copy = open(InMemoryBackend::with_data(out));
        assert_eq!(copy.snapshot().maps[&None].get(b"k"), Some(b"v".as_slice()));
    }

    #[test]
    fn read_only_store_rejects_commit_and_keeps_torn_tail() {
        let store = open(InMemoryBackend::new());
        commit_put(&store, None, b"a", b"1");
        let mut torn = image(&store);
        torn.extend_from_slice(&[1, 2, 3]);
        let len = torn.len() as u64;

        let ro = Store::open(
            Box::new(InMemoryBackend::with_data(torn)),
            &Geometry::new(),
            true,
            true,
        )
        .unwrap();
        assert_eq!(ro.file_size().unwrap(), len);
        let base = ro.snapshot();
        assert!(ro.commit(base.txnid + 1, &[], base.maps.clone()).is_err());
    }

    #[test]
    fn auto_sync_thresholds() {
        let store = Store::open(Box::new(InMemoryBackend::new()), &Geometry::new(), false, false).unwrap();
        commit_put(&store, None, b"k", b"v");
        assert!(store.unsynced_bytes() > 0);
        assert!(!store.sync(false, 0, Duration::ZERO).unwrap());
        assert!(store.sync(false, 1, Duration::ZERO).unwrap());
        assert_eq!(store.unsynced_bytes(), 0);
        assert!(store.sync(true, 0, Duration::ZERO).unwrap());
    }
}

//! Transactions: snapshot readers and the single nested-capable writer.

use super::manager::ReaderToken;
use super::state::{StateCell, TransactionState, TxnMode};
use crate::cursor::Cursor;
use crate::env::Environment;
use crate::error::{CoreError, CoreResult};
use crate::limits;
use crate::map::{FrameOwner, MapFlags, MapLayout};
use crate::options::EnvOption;
use crate::stats::MapStat;
use crate::store::{Catalog, LogOp, MapName, MapTree, Version};
use crate::types::{MapHandle, TransactionId};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{debug, warn};

/// Upper bound on the change buffer preallocated for a write transaction.
const MAX_PREALLOCATED_OPS: u64 = 65_536;

/// Working state of one write transaction level.
struct Frame {
    status: Arc<StateCell>,
    maps: Catalog,
    ops: Vec<LogOp>,
    dropped: Vec<MapHandle>,
}

/// State shared by a write transaction and its nested children.
struct TxnShared {
    id: TransactionId,
    owner: ThreadId,
    snapshot: Option<Arc<Version>>,
    reader: Option<ReaderToken>,
    frames: Vec<Frame>,
    epoch: u64,
}

/// A transaction against an [`Environment`].
///
/// Read transactions see the snapshot taken at `begin` (or the last
/// `renew`). A write transaction sees its own uncommitted changes, and a
/// nested transaction additionally sees its parent's.
///
/// Every method takes `&self`; finished transactions reject further use with
/// a usage error. Dropping an unfinished transaction aborts it.
///
/// # Example
///
/// ```rust
/// use vellum_core::{EnvConfig, Environment, MapFlags};
///
/// let env = Environment::open_in_memory(EnvConfig::default()).unwrap();
/// let txn = env.begin_write().unwrap();
/// let users = txn.open_map(Some("users"), MapFlags::new().create()).unwrap();
/// txn.put(users, b"alice", b"admin", true).unwrap();
/// txn.commit().unwrap();
///
/// let reader = env.begin_read().unwrap();
/// let users = reader.open_map(Some("users"), MapFlags::new()).unwrap();
/// assert_eq!(reader.get(users, b"alice").unwrap(), Some(b"admin".to_vec()));
/// ```
pub struct Transaction {
    env: Environment,
    shared: Arc<Mutex<TxnShared>>,
    status: Arc<StateCell>,
    depth: usize,
    mode: TxnMode,
    context: RwLock<Option<Arc<dyn Any + Send + Sync>>>,
}

impl Transaction {
    pub(crate) fn begin_read(env: &Environment) -> CoreResult<Self> {
        env.admit_transaction()?;
        Self::start_read(env).map_err(|err| {
            env.shared().txns.end_active();
            err
        })
    }

    fn start_read(env: &Environment) -> CoreResult<Self> {
        let thread = thread::current().id();
        if env.config().registered_readers && !env.shared().txns.is_registered(thread) {
            return Err(CoreError::usage(
                "thread must call register_thread before reading",
            ));
        }

        let snapshot = env.shared().store.snapshot();
        let reader = env.shared().txns.acquire_reader(snapshot.txnid, thread)?;
        let id = TransactionId::new(snapshot.txnid);
        debug!(txn = %id, "read transaction started");

        Ok(Self::root(
            env,
            TxnShared {
                id,
                owner: thread,
                snapshot: Some(snapshot),
                reader: Some(reader),
                frames: Vec::new(),
                epoch: 0,
            },
            TxnMode::ReadOnly,
        ))
    }

    pub(crate) fn begin_write(env: &Environment) -> CoreResult<Self> {
        env.admit_transaction()?;
        Self::start_write(env).map_err(|err| {
            env.shared().txns.end_active();
            err
        })
    }

    fn start_write(env: &Environment) -> CoreResult<Self> {
        if env.config().read_only {
            return Err(CoreError::usage("environment is read-only"));
        }
        let thread = thread::current().id();
        env.shared().txns.acquire_writer(thread)?;

        let snapshot = env.shared().store.snapshot();
        let id = TransactionId::new(snapshot.txnid).next();
        let capacity = env.option(EnvOption::TxnDpInitial).min(MAX_PREALLOCATED_OPS) as usize;
        let status = Arc::new(StateCell::new(TransactionState::Active));
        let frame = Frame {
            status: Arc::clone(&status),
            maps: snapshot.maps.clone(),
            ops: Vec::with_capacity(capacity),
            dropped: Vec::new(),
        };
        debug!(txn = %id, "write transaction started");

        let shared = TxnShared {
            id,
            owner: thread,
            snapshot: Some(snapshot),
            reader: None,
            frames: vec![frame],
            epoch: 0,
        };
        Ok(Self {
            env: env.clone(),
            shared: Arc::new(Mutex::new(shared)),
            status,
            depth: 0,
            mode: TxnMode::ReadWrite,
            context: RwLock::new(None),
        })
    }

    fn root(env: &Environment, shared: TxnShared, mode: TxnMode) -> Self {
        Self {
            env: env.clone(),
            shared: Arc::new(Mutex::new(shared)),
            status: Arc::new(StateCell::new(TransactionState::Active)),
            depth: 0,
            mode,
            context: RwLock::new(None),
        }
    }

    /// Returns the transaction id.
    ///
    /// A write transaction reports the id its commit will carry; a read
    /// transaction reports the commit its snapshot reflects.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.shared.lock().id
    }

    /// Returns the access mode.
    #[must_use]
    pub fn mode(&self) -> TxnMode {
        self.mode
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.status.get()
    }

    /// Returns true while the transaction accepts operations.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status.get() == TransactionState::Active
    }

    /// Returns the nesting depth; 0 for a top-level transaction.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Returns the environment this transaction belongs to.
    #[must_use]
    pub fn env(&self) -> &Environment {
        &self.env
    }

    fn owner_frame(&self, shared: &TxnShared) -> Option<FrameOwner> {
        (self.mode == TxnMode::ReadWrite).then_some(FrameOwner {
            txn: shared.id,
            depth: self.depth,
        })
    }

    fn check_thread(&self, shared: &TxnShared) -> CoreResult<()> {
        if self.mode == TxnMode::ReadWrite
            && self.env.config().thread_affinity
            && shared.owner != thread::current().id()
        {
            return Err(CoreError::ThreadOwnership { txn: shared.id });
        }
        Ok(())
    }

    fn check_status(&self) -> CoreResult<()> {
        match self.status.get() {
            TransactionState::Active => Ok(()),
            TransactionState::Reset => Err(CoreError::usage("transaction is reset")),
            TransactionState::Committed => Err(CoreError::usage("transaction is committed")),
            TransactionState::Aborted => Err(CoreError::usage("transaction is aborted")),
        }
    }

    /// Locks the shared state for an operation on this transaction.
    fn enter(&self) -> CoreResult<MutexGuard<'_, TxnShared>> {
        let shared = self.shared.lock();
        self.check_status()?;
        self.check_thread(&shared)?;
        if self.mode == TxnMode::ReadWrite && shared.frames.len() > self.depth + 1 {
            return Err(CoreError::usage("a nested transaction is active"));
        }
        Ok(shared)
    }

    fn enter_write(&self) -> CoreResult<MutexGuard<'_, TxnShared>> {
        if self.mode == TxnMode::ReadOnly {
            self.check_status()?;
            return Err(CoreError::usage("transaction is read-only"));
        }
        self.enter()
    }

    fn catalog<'g>(&self, shared: &'g TxnShared) -> CoreResult<&'g Catalog> {
        match self.mode {
            TxnMode::ReadWrite => Ok(&shared.frames[self.depth].maps),
            TxnMode::ReadOnly => shared
                .snapshot
                .as_ref()
                .map(|version| &version.maps)
                .ok_or_else(|| CoreError::usage("transaction has no snapshot")),
        }
    }

    fn resolve(&self, shared: &TxnShared, handle: MapHandle) -> CoreResult<MapName> {
        let name = self
            .env
            .shared()
            .registry
            .resolve(handle, self.owner_frame(shared))?;
        if !self.catalog(shared)?.contains_key(&name) {
            return Err(CoreError::bad_handle(
                handle,
                "map does not exist in this transaction",
            ));
        }
        Ok(name)
    }

    fn tree<'g>(&self, shared: &'g TxnShared, name: &MapName) -> CoreResult<&'g Arc<MapTree>> {
        self.catalog(shared)?
            .get(name)
            .ok_or_else(|| CoreError::usage("map vanished from the transaction"))
    }

    fn check_key(&self, layout: MapLayout, key: &[u8]) -> CoreResult<()> {
        let max = limits::max_key_size(self.env.page_size(), layout);
        if key.len() > max {
            return Err(CoreError::bad_value_size(format!(
                "key of {} bytes exceeds the {max} byte limit",
                key.len()
            )));
        }
        layout.key_order.validate(key, "key")
    }

    fn check_value(&self, layout: MapLayout, value: &[u8]) -> CoreResult<()> {
        let max = limits::max_value_size(self.env.page_size(), layout);
        if value.len() > max {
            return Err(CoreError::bad_value_size(format!(
                "value of {} bytes exceeds the {max} byte limit",
                value.len()
            )));
        }
        if layout.dup_sort {
            layout.value_order.validate(value, "value")?;
        }
        Ok(())
    }

    /// Opens a map by name, or the default map when `name` is `None`.
    ///
    /// Opening the same name twice, from any transaction, yields the same
    /// handle. A handle created by a write transaction becomes usable by
    /// other transactions once that transaction commits.
    ///
    /// An existing map opened with `MapFlags::new()` or with `accede` keeps
    /// its stored layout. An empty map opened with `create` and a different
    /// layout is re-created with that layout.
    ///
    /// # Errors
    ///
    /// - `MapNotFound` if the map does not exist and `flags.create` is unset
    /// - `MapLimit` if creating it would exceed `max_maps`
    /// - `Incompatible` if the stored layout differs and cannot be adopted
    ///   or re-created
    pub fn open_map(&self, name: Option<&str>, flags: MapFlags) -> CoreResult<MapHandle> {
        let mut shared = self.enter()?;
        let requested = flags.layout();
        let key: MapName = name.map(str::to_string);
        let existing = self.catalog(&shared)?.get(&key).map(|tree| (tree.layout(), tree.is_empty()));

        match (name, existing) {
            (_, Some((layout, empty))) => {
                let adopt = flags.accede || flags == MapFlags::new();
                if layout != requested && !adopt {
                    let recreate = self.mode == TxnMode::ReadWrite && flags.create && empty;
                    if !recreate {
                        return Err(CoreError::Incompatible {
                            name: name.unwrap_or("<default>").into(),
                        });
                    }
                    let txnid = shared.id.as_u64();
                    let id = shared.id;
                    let frame = &mut shared.frames[self.depth];
                    if key.is_some() {
                        frame.ops.push(LogOp::DropMap { name: key.clone() });
                    }
                    frame
                        .maps
                        .insert(key.clone(), Arc::new(MapTree::new(requested, txnid)));
                    frame.ops.push(LogOp::CreateMap {
                        name: key,
                        layout: requested,
                    });
                    debug!(txn = %id, map = name.unwrap_or("<default>"), "map re-created");
                }
                match name {
                    None => Ok(MapHandle::DEFAULT),
                    Some(name) => {
                        let owner = self.owner_frame(&shared);
                        Ok(self.env.shared().registry.acquire(name, owner))
                    }
                }
            }
            (Some(name), None) => {
                if !flags.create {
                    return Err(CoreError::MapNotFound { name: name.into() });
                }
                if self.mode == TxnMode::ReadOnly {
                    return Err(CoreError::usage("read-only transaction cannot create maps"));
                }
                let max_maps = self.env.config().max_maps;
                let named = self.catalog(&shared)?.keys().filter(|k| k.is_some()).count();
                if named >= max_maps as usize {
                    return Err(CoreError::MapLimit { max_maps });
                }

                let txnid = shared.id.as_u64();
                let owner = self.owner_frame(&shared);
                let handle = self.env.shared().registry.acquire(name, owner);
                let frame = &mut shared.frames[self.depth];
                frame
                    .maps
                    .insert(key.clone(), Arc::new(MapTree::new(requested, txnid)));
                frame.ops.push(LogOp::CreateMap {
                    name: key,
                    layout: requested,
                });
                frame.dropped.retain(|dropped| *dropped != handle);
                debug!(txn = %shared.id, map = name, "map created");
                Ok(handle)
            }
            (None, None) => Err(CoreError::corrupted("default map is missing")),
        }
    }

    /// Empties a map, or removes it from the environment when `delete` is
    /// set. The default map is only ever emptied.
    ///
    /// A removed map's handle becomes stale once this transaction commits.
    pub fn drop_map(&self, handle: MapHandle, delete: bool) -> CoreResult<()> {
        let mut shared = self.enter_write()?;
        let name = self.resolve(&shared, handle)?;
        let txnid = shared.id.as_u64();
        let frame = &mut shared.frames[self.depth];

        if delete && name.is_some() {
            frame.maps.remove(&name);
            frame.ops.push(LogOp::DropMap { name });
            frame.dropped.push(handle);
            return Ok(());
        }

        let Some(tree) = frame.maps.get_mut(&name) else {
            return Err(CoreError::bad_handle(handle, "map does not exist in this transaction"));
        };
        if !tree.is_empty() {
            Arc::make_mut(tree).clear(txnid);
            frame.ops.push(LogOp::ClearMap { name });
        }
        Ok(())
    }

    /// Looks up the first value stored under `key`.
    ///
    /// An absent key is `Ok(None)`, not an error.
    pub fn get(&self, handle: MapHandle, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        let shared = self.enter()?;
        let name = self.resolve(&shared, handle)?;
        let tree = self.tree(&shared, &name)?;
        self.check_key(tree.layout(), key)?;
        Ok(tree.get(key).map(<[u8]>::to_vec))
    }

    /// Inserts or updates an entry.
    ///
    /// With `overwrite` unset, an existing key fails with `KeyExists` and
    /// nothing changes. In a duplicate map an overwriting put adds `value`
    /// to the key's sorted values.
    pub fn put(&self, handle: MapHandle, key: &[u8], value: &[u8], overwrite: bool) -> CoreResult<()> {
        let mut shared = self.enter_write()?;
        let name = self.resolve(&shared, handle)?;
        let layout = self.tree(&shared, &name)?.layout();
        self.check_key(layout, key)?;
        self.check_value(layout, value)?;
        if !overwrite && self.tree(&shared, &name)?.get(key).is_some() {
            return Err(CoreError::KeyExists);
        }

        let txnid = shared.id.as_u64();
        let frame = &mut shared.frames[self.depth];
        let changed = match frame.maps.get_mut(&name) {
            Some(tree) => Arc::make_mut(tree).put(key, value, overwrite, txnid)?,
            None => return Err(CoreError::bad_handle(handle, "map does not exist in this transaction")),
        };
        if changed {
            frame.ops.push(LogOp::Put {
                name,
                key: key.to_vec(),
                value: value.to_vec(),
            });
        }
        Ok(())
    }

    /// Stores `value` under `key` and returns the value it replaced.
    ///
    /// # Errors
    ///
    /// Returns `MultiValue` if a duplicate key holds more than one value.
    pub fn replace(&self, handle: MapHandle, key: &[u8], value: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        let mut shared = self.enter_write()?;
        let name = self.resolve(&shared, handle)?;
        let tree = self.tree(&shared, &name)?;
        let layout = tree.layout();
        self.check_key(layout, key)?;
        self.check_value(layout, value)?;
        if layout.dup_sort && tree.key_range(key).len() > 1 {
            return Err(CoreError::MultiValue);
        }
        let old = tree.get(key).map(<[u8]>::to_vec);

        let txnid = shared.id.as_u64();
        let frame = &mut shared.frames[self.depth];
        let Some(tree) = frame.maps.get_mut(&name) else {
            return Err(CoreError::bad_handle(handle, "map does not exist in this transaction"));
        };
        let tree = Arc::make_mut(tree);
        if let (true, Some(old)) = (layout.dup_sort, old.as_deref()) {
            tree.delete(key, Some(old), txnid);
            frame.ops.push(LogOp::Delete {
                name: name.clone(),
                key: key.to_vec(),
                value: Some(old.to_vec()),
            });
        }
        tree.put(key, value, true, txnid)?;
        frame.ops.push(LogOp::Put {
            name,
            key: key.to_vec(),
            value: value.to_vec(),
        });
        Ok(old)
    }

    /// Removes `key`, or in a duplicate map only the given `value`.
    ///
    /// Deleting something absent is not an error; the return value tells
    /// whether anything was removed.
    pub fn delete(&self, handle: MapHandle, key: &[u8], value: Option<&[u8]>) -> CoreResult<bool> {
        let mut shared = self.enter_write()?;
        let name = self.resolve(&shared, handle)?;
        let tree = self.tree(&shared, &name)?;
        let layout = tree.layout();
        self.check_key(layout, key)?;
        let value = value.filter(|_| layout.dup_sort);
        let present = match value {
            Some(value) => tree.find_entry(key, value).is_some(),
            None => !tree.key_range(key).is_empty(),
        };
        if !present {
            return Ok(false);
        }

        let txnid = shared.id.as_u64();
        let frame = &mut shared.frames[self.depth];
        if let Some(tree) = frame.maps.get_mut(&name) {
            Arc::make_mut(tree).delete(key, value, txnid);
        }
        frame.ops.push(LogOp::Delete {
            name,
            key: key.to_vec(),
            value: value.map(<[u8]>::to_vec),
        });
        Ok(true)
    }

    /// Opens a cursor over a map.
    pub fn cursor(&self, handle: MapHandle) -> CoreResult<Cursor<'_>> {
        let epoch = self.cursor_epoch(handle)?;
        Ok(Cursor::new(self, handle, epoch))
    }

    /// Validates a cursor target and returns the current snapshot epoch.
    pub(crate) fn cursor_epoch(&self, handle: MapHandle) -> CoreResult<u64> {
        let shared = self.enter()?;
        self.resolve(&shared, handle)?;
        Ok(shared.epoch)
    }

    /// Runs `f` against a map's tree as this transaction sees it.
    pub(crate) fn with_tree<R>(
        &self,
        handle: MapHandle,
        f: impl FnOnce(&MapTree, u64) -> R,
    ) -> CoreResult<R> {
        let shared = self.enter()?;
        let name = self.resolve(&shared, handle)?;
        let tree = self.tree(&shared, &name)?;
        Ok(f(tree, shared.epoch))
    }

    /// Returns page counters for one map.
    pub fn map_stat(&self, handle: MapHandle) -> CoreResult<MapStat> {
        let page_size = self.env.page_size();
        self.with_tree(handle, |tree, _| MapStat::estimate(tree, page_size))
    }

    /// Returns the stored layout of a map.
    pub fn map_flags(&self, handle: MapHandle) -> CoreResult<MapLayout> {
        self.with_tree(handle, |tree, _| tree.layout())
    }

    /// Page counters summed over every map this transaction sees.
    pub(crate) fn total_stat(&self) -> CoreResult<MapStat> {
        let shared = self.enter()?;
        let page_size = self.env.page_size();
        let mut total = MapStat {
            page_size,
            ..MapStat::default()
        };
        for tree in self.catalog(&shared)?.values() {
            total.accumulate(&MapStat::estimate(tree, page_size));
        }
        Ok(total)
    }

    /// Starts a nested transaction that sees this one's changes.
    ///
    /// Until the child finishes, this transaction rejects every operation
    /// except `commit` and `abort`, which first finish the child.
    pub fn begin_nested(&self) -> CoreResult<Transaction> {
        let mut shared = self.enter_write()?;
        let status = Arc::new(StateCell::new(TransactionState::Active));
        let maps = shared.frames[self.depth].maps.clone();
        shared.frames.push(Frame {
            status: Arc::clone(&status),
            maps,
            ops: Vec::new(),
            dropped: Vec::new(),
        });
        debug!(txn = %shared.id, depth = self.depth + 1, "nested transaction started");

        Ok(Self {
            env: self.env.clone(),
            shared: Arc::clone(&self.shared),
            status,
            depth: self.depth + 1,
            mode: TxnMode::ReadWrite,
            context: RwLock::new(None),
        })
    }

    /// Commits the transaction.
    ///
    /// A nested transaction merges into its parent. A top-level write
    /// transaction durably appends its changes and publishes them to new
    /// readers. A read transaction just releases its snapshot. If the commit
    /// fails the transaction is aborted and nothing becomes visible.
    pub fn commit(&self) -> CoreResult<()> {
        let mut shared = self.shared.lock();
        if self.status.get() != TransactionState::Active {
            return self.check_status();
        }
        self.check_thread(&shared)?;

        if self.mode == TxnMode::ReadOnly {
            self.finish_read(&mut shared, TransactionState::Committed);
            return Ok(());
        }

        while shared.frames.len() > self.depth + 1 {
            self.merge_top(&mut shared);
        }
        if self.depth > 0 {
            self.merge_top(&mut shared);
            return Ok(());
        }

        let Some(frame) = shared.frames.pop() else {
            return Err(CoreError::usage("write transaction has no frame"));
        };
        let id = shared.id;
        let root = FrameOwner { txn: id, depth: 0 };
        let registry = &self.env.shared().registry;
        let ops = frame.ops.len();

        match self.env.shared().store.commit(id.as_u64(), &frame.ops, frame.maps) {
            Ok(version) => {
                registry.promote(root, None);
                for handle in frame.dropped {
                    registry.release(handle);
                }
                self.status.set(TransactionState::Committed);
                self.finish_write();
                debug!(txn = %id, ops, "write transaction committed");
                drop(shared);
                self.env.after_commit(&version);
                Ok(())
            }
            Err(err) => {
                registry.discard(root);
                self.status.set(TransactionState::Aborted);
                self.finish_write();
                warn!(txn = %id, error = %err, "commit failed, transaction aborted");
                Err(err)
            }
        }
    }

    /// Merges the innermost frame into its parent.
    fn merge_top(&self, shared: &mut TxnShared) {
        let Some(child) = shared.frames.pop() else {
            return;
        };
        let depth = shared.frames.len();
        let Some(parent) = shared.frames.last_mut() else {
            return;
        };
        parent.maps = child.maps;
        parent.ops.extend(child.ops);
        parent.dropped.extend(child.dropped);
        self.env.shared().registry.promote(
            FrameOwner { txn: shared.id, depth },
            Some(FrameOwner {
                txn: shared.id,
                depth: depth - 1,
            }),
        );
        child.status.set(TransactionState::Committed);
        debug!(txn = %shared.id, depth, "nested transaction committed");
    }

    /// Discards all changes of this transaction and its children.
    pub fn abort(&self) -> CoreResult<()> {
        let mut shared = self.shared.lock();
        if self.status.get().is_terminal() {
            return self.check_status();
        }
        self.check_thread(&shared)?;
        self.abort_locked(&mut shared);
        Ok(())
    }

    fn abort_locked(&self, shared: &mut TxnShared) {
        if self.mode == TxnMode::ReadOnly {
            self.finish_read(shared, TransactionState::Aborted);
            return;
        }
        while shared.frames.len() > self.depth {
            let depth = shared.frames.len() - 1;
            if let Some(frame) = shared.frames.pop() {
                self.env
                    .shared()
                    .registry
                    .discard(FrameOwner { txn: shared.id, depth });
                frame.status.set(TransactionState::Aborted);
            }
        }
        if self.depth == 0 {
            self.finish_write();
        }
        debug!(txn = %shared.id, depth = self.depth, "write transaction aborted");
    }

    fn finish_write(&self) {
        let txns = &self.env.shared().txns;
        txns.release_writer();
        txns.end_active();
    }

    fn finish_read(&self, shared: &mut TxnShared, state: TransactionState) {
        if let Some(token) = shared.reader.take() {
            self.env.shared().txns.release_reader(token);
        }
        shared.snapshot = None;
        shared.epoch += 1;
        self.status.set(state);
        self.env.shared().txns.end_active();
        debug!(txn = %shared.id, ?state, "read transaction finished");
    }

    /// Releases a read transaction's snapshot but keeps the object for
    /// [`Transaction::renew`].
    pub fn reset(&self) -> CoreResult<()> {
        if self.mode == TxnMode::ReadWrite {
            return Err(CoreError::usage("only read transactions can be reset"));
        }
        let mut shared = self.shared.lock();
        match self.status.get() {
            TransactionState::Active => {
                if let Some(token) = shared.reader.take() {
                    self.env.shared().txns.release_reader(token);
                }
                shared.snapshot = None;
                shared.epoch += 1;
                self.status.set(TransactionState::Reset);
                Ok(())
            }
            TransactionState::Reset => Ok(()),
            _ => self.check_status(),
        }
    }

    /// Gives a reset (or active) read transaction a fresh snapshot.
    ///
    /// Cursors bound to the transaction lose their position.
    pub fn renew(&self) -> CoreResult<()> {
        if self.mode == TxnMode::ReadWrite {
            return Err(CoreError::usage("only read transactions can be renewed"));
        }
        if self.status.get().is_terminal() {
            return self.check_status();
        }
        self.env.check_usable()?;
        let thread = thread::current().id();
        let txns = &self.env.shared().txns;
        if self.env.config().registered_readers && !txns.is_registered(thread) {
            return Err(CoreError::usage(
                "thread must call register_thread before reading",
            ));
        }

        let mut shared = self.shared.lock();
        if let Some(token) = shared.reader.take() {
            txns.release_reader(token);
        }
        let snapshot = self.env.shared().store.snapshot();
        let token = match txns.acquire_reader(snapshot.txnid, thread) {
            Ok(token) => token,
            Err(err) => {
                shared.snapshot = None;
                self.status.set(TransactionState::Reset);
                return Err(err);
            }
        };
        shared.id = TransactionId::new(snapshot.txnid);
        shared.snapshot = Some(snapshot);
        shared.reader = Some(token);
        shared.owner = thread;
        shared.epoch += 1;
        self.status.set(TransactionState::Active);
        debug!(txn = %shared.id, "read transaction renewed");
        Ok(())
    }

    /// Attaches an opaque value to this transaction. Last write wins.
    pub fn set_user_context<T: Any + Send + Sync>(&self, context: Arc<T>) {
        *self.context.write() = Some(context);
    }

    /// Returns the attached value if it has type `T`.
    #[must_use]
    pub fn user_context<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.context.read().clone()?.downcast::<T>().ok()
    }

    /// Removes the attached value.
    pub fn clear_user_context(&self) {
        *self.context.write() = None;
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.status.get().is_terminal() {
            return;
        }
        let mut shared = self.shared.lock();
        if !self.status.get().is_terminal() {
            debug!(txn = %shared.id, depth = self.depth, "aborting dropped transaction");
            self.abort_locked(&mut shared);
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.shared.lock().id)
            .field("mode", &self.mode)
            .field("state", &self.status.get())
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

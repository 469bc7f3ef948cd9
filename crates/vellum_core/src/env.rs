//! The environment: one data file shared by every map and transaction.

use crate::config::{EffectiveGeometry, EnvConfig};
use crate::dir::EnvDir;
use crate::error::{CoreError, CoreResult};
use crate::limits;
use crate::map::{MapLayout, MapRegistry};
use crate::options::{EnvOption, OptionTable};
use crate::stats::{EnvInfo, MapStat};
use crate::store::{Store, Version};
use crate::transaction::{Transaction, TxnManager, TxnMode};
use crate::types::MapHandle;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use std::{fmt, process, thread};
use tracing::{debug, info, warn};
use vellum_storage::{FileBackend, InMemoryBackend, StorageBackend};

/// Options for [`Environment::copy_to`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyFlags {
    /// Write only live data instead of the full commit history.
    pub compact: bool,
    /// Give the copy default dynamic geometry instead of this environment's.
    pub force_dynamic_size: bool,
}

impl CopyFlags {
    /// Plain copy.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            compact: false,
            force_dynamic_size: false,
        }
    }

    /// Requests a compacting copy.
    #[must_use]
    pub const fn compact(mut self) -> Self {
        self.compact = true;
        self
    }

    /// Requests default dynamic geometry in the copy.
    #[must_use]
    pub const fn force_dynamic_size(mut self) -> Self {
        self.force_dynamic_size = true;
        self
    }
}

/// Passed to the stall handler when a reader lags too far behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StallNotice {
    /// Id of the commit that was just published.
    pub current_txnid: u64,
    /// Snapshot id held by the oldest live reader.
    pub oldest_reader_txnid: u64,
    /// Distance between the two.
    pub lag: u64,
}

type StallHandler = Arc<dyn Fn(&StallNotice) + Send + Sync>;

pub(crate) struct EnvShared {
    pub(crate) config: EnvConfig,
    pub(crate) store: Store,
    pub(crate) registry: MapRegistry,
    pub(crate) txns: TxnManager,
    options: Mutex<OptionTable>,
    dir: Mutex<Option<EnvDir>>,
    path: Option<PathBuf>,
    closed: AtomicBool,
    pid: AtomicU32,
    context: RwLock<Option<Arc<dyn Any + Send + Sync>>>,
    stall_handler: RwLock<Option<StallHandler>>,
    copy_lock: Mutex<()>,
}

impl Drop for EnvShared {
    fn drop(&mut self) {
        if self.closed.load(Ordering::Acquire) || self.config.read_only {
            return;
        }
        if let Err(err) = self.store.sync(true, 0, Duration::ZERO) {
            warn!(error = %err, "final sync failed");
        }
    }
}

/// An open environment.
///
/// `Environment` is a cheap handle: clones share the same underlying
/// environment and may be sent across threads. Transactions keep the
/// environment alive while they exist.
///
/// # Example
///
/// ```rust,no_run
/// use vellum_core::{EnvConfig, Environment, MapFlags};
///
/// let env = Environment::open("./data", EnvConfig::default().max_maps(8))?;
/// let txn = env.begin_write()?;
/// let map = txn.open_map(Some("events"), MapFlags::new().create())?;
/// txn.put(map, b"2024-01-01", b"launch", true)?;
/// txn.commit()?;
/// env.close()?;
/// # Ok::<(), vellum_core::CoreError>(())
/// ```
#[derive(Clone)]
pub struct Environment {
    inner: Arc<EnvShared>,
}

impl Environment {
    /// Opens (or creates) the environment at `path`.
    ///
    /// # Errors
    ///
    /// Returns a config error for invalid settings and an environment error
    /// if the files cannot be opened, are locked, or are not a valid data
    /// file.
    pub fn open(path: impl AsRef<Path>, config: EnvConfig) -> CoreResult<Self> {
        let config = config.resolve()?;
        let path = path.as_ref();
        let dir = EnvDir::open(path, &config)?;
        let backend = if config.read_only {
            FileBackend::open_read_only(dir.data_path())?
        } else {
            FileBackend::open(dir.data_path())?
        };
        let env = Self::with_backend(Box::new(backend), config, Some(path.to_path_buf()), Some(dir))?;
        info!(
            path = %path.display(),
            txnid = env.inner.store.snapshot().txnid,
            read_only = env.inner.config.read_only,
            "environment opened"
        );
        Ok(env)
    }

    /// Opens a fresh environment that lives only in memory.
    pub fn open_in_memory(config: EnvConfig) -> CoreResult<Self> {
        let config = config.resolve()?;
        if config.read_only {
            return Err(CoreError::config("an in-memory environment cannot be read-only"));
        }
        let env = Self::with_backend(Box::new(InMemoryBackend::new()), config, None, None)?;
        debug!("in-memory environment opened");
        Ok(env)
    }

    fn with_backend(
        backend: Box<dyn StorageBackend>,
        config: EnvConfig,
        path: Option<PathBuf>,
        dir: Option<EnvDir>,
    ) -> CoreResult<Self> {
        let mut options = OptionTable::new(config.max_maps, config.max_readers);
        for (option, value) in config.initial_options() {
            if !matches!(option, EnvOption::MaxMaps | EnvOption::MaxReaders) {
                options.set(option, value)?;
            }
        }
        let store = Store::open(backend, &config.geometry, config.sync_on_commit, config.read_only)?;
        if let Some(dir) = &dir {
            debug!(lock = %dir.lock_path().display(), "environment lock held");
        }
        let inner = EnvShared {
            registry: MapRegistry::new(),
            txns: TxnManager::new(config.writer_policy, config.max_readers),
            options: Mutex::new(options),
            dir: Mutex::new(dir),
            path,
            closed: AtomicBool::new(false),
            pid: AtomicU32::new(process::id()),
            context: RwLock::new(None),
            stall_handler: RwLock::new(None),
            copy_lock: Mutex::new(()),
            store,
            config,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub(crate) fn shared(&self) -> &EnvShared {
        &self.inner
    }

    /// Fails once the environment is closed or the process has forked.
    pub(crate) fn check_usable(&self) -> CoreResult<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(CoreError::EnvironmentClosed);
        }
        let opened_by = self.inner.pid.load(Ordering::Acquire);
        if opened_by != process::id() {
            return Err(CoreError::environment(format!(
                "environment was opened by process {opened_by}; call acknowledge_fork first"
            )));
        }
        Ok(())
    }

    /// Counts a new transaction as active, unless `close` got there first.
    ///
    /// Pairs with [`Environment::close`]: each side publishes its own flag
    /// before reading the other's, so at most one of them proceeds.
    pub(crate) fn admit_transaction(&self) -> CoreResult<()> {
        self.check_usable()?;
        self.inner.txns.begin_active();
        if self.inner.closed.load(Ordering::SeqCst) {
            self.inner.txns.end_active();
            return Err(CoreError::EnvironmentClosed);
        }
        Ok(())
    }

    /// Adopts the environment in a forked child process.
    ///
    /// Until this is called every operation in the child fails with an
    /// environment error.
    pub fn acknowledge_fork(&self) {
        let pid = process::id();
        if self.inner.pid.swap(pid, Ordering::AcqRel) != pid {
            info!(pid, "environment adopted after fork");
        }
    }

    /// Closes the environment, syncing the data file and releasing the lock.
    ///
    /// # Errors
    ///
    /// Returns a usage error while any transaction is still alive.
    pub fn close(&self) -> CoreResult<()> {
        if self
            .inner
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CoreError::EnvironmentClosed);
        }
        let active = self.inner.txns.active_count();
        if active > 0 {
            self.inner.closed.store(false, Ordering::SeqCst);
            return Err(CoreError::usage(format!(
                "cannot close with {active} transaction(s) still active"
            )));
        }
        if !self.inner.config.read_only {
            if let Err(err) = self.inner.store.sync(true, 0, Duration::ZERO) {
                self.inner.closed.store(false, Ordering::SeqCst);
                return Err(err);
            }
        }
        self.inner.dir.lock().take();
        info!(path = ?self.inner.path, "environment closed");
        Ok(())
    }

    /// Returns true until [`Environment::close`] succeeds.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.inner.closed.load(Ordering::Acquire)
    }

    /// Returns the configuration the environment was opened with.
    #[must_use]
    pub fn config(&self) -> &EnvConfig {
        &self.inner.config
    }

    /// Returns the directory or file path, `None` when in memory.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    /// Returns the geometry in force.
    #[must_use]
    pub fn geometry(&self) -> EffectiveGeometry {
        self.inner.store.geometry()
    }

    /// Returns the page size.
    #[must_use]
    pub fn page_size(&self) -> u32 {
        self.inner.store.geometry().page_size
    }

    /// Starts a read transaction on the latest committed snapshot.
    pub fn begin_read(&self) -> CoreResult<Transaction> {
        Transaction::begin_read(self)
    }

    /// Starts the write transaction.
    ///
    /// # Errors
    ///
    /// With [`crate::WriterPolicy::FailFast`], returns `Busy` while another
    /// write transaction is active; with `Block`, waits for it instead.
    pub fn begin_write(&self) -> CoreResult<Transaction> {
        Transaction::begin_write(self)
    }

    /// Starts a transaction of the given mode.
    pub fn begin(&self, mode: TxnMode) -> CoreResult<Transaction> {
        match mode {
            TxnMode::ReadOnly => self.begin_read(),
            TxnMode::ReadWrite => self.begin_write(),
        }
    }

    /// Releases a map handle.
    ///
    /// # Errors
    ///
    /// Returns `BadHandle` for a stale handle or for one created by a write
    /// transaction that has not committed.
    pub fn close_map(&self, handle: MapHandle) -> CoreResult<()> {
        self.check_usable()?;
        self.inner.registry.close(handle)
    }

    /// Allows the calling thread to start read transactions when the
    /// environment requires registered readers. Returns false if it already
    /// was registered.
    pub fn register_thread(&self) -> CoreResult<bool> {
        self.check_usable()?;
        Ok(self.inner.txns.register_thread(thread::current().id()))
    }

    /// Revokes [`Environment::register_thread`]. Returns false if the thread
    /// was not registered.
    ///
    /// # Errors
    ///
    /// Returns `Busy` while the thread still holds a read transaction.
    pub fn unregister_thread(&self) -> CoreResult<bool> {
        self.check_usable()?;
        self.inner.txns.unregister_thread(thread::current().id())
    }

    /// Aggregated page counters over every map.
    ///
    /// Uses `txn`'s view when given, otherwise the latest commit.
    pub fn stat(&self, txn: Option<&Transaction>) -> CoreResult<MapStat> {
        self.check_usable()?;
        if let Some(txn) = txn {
            return txn.total_stat();
        }
        let version = self.inner.store.snapshot();
        Ok(self.version_stat(&version))
    }

    fn version_stat(&self, version: &Version) -> MapStat {
        let page_size = self.page_size();
        let mut total = MapStat {
            page_size,
            ..MapStat::default()
        };
        for tree in version.maps.values() {
            total.accumulate(&MapStat::estimate(tree, page_size));
        }
        total
    }

    /// Environment-wide information.
    pub fn info(&self, txn: Option<&Transaction>) -> CoreResult<EnvInfo> {
        self.check_usable()?;
        let geometry = self.geometry();
        let file_size = self.inner.store.file_size()?;
        let recent_txnid = self.inner.store.snapshot().txnid;
        let self_latter_reader_txnid = txn
            .filter(|t| t.mode() == TxnMode::ReadOnly && t.is_active())
            .map(|t| t.id().as_u64());
        Ok(EnvInfo {
            geometry,
            file_size,
            map_size: geometry.map_size(file_size),
            last_pgno: file_size.div_ceil(u64::from(geometry.page_size)).saturating_sub(1),
            recent_txnid,
            latter_reader_txnid: self.inner.txns.oldest_reader(),
            self_latter_reader_txnid,
            num_readers: self.inner.txns.reader_count(),
            max_readers: self.inner.config.max_readers,
            max_maps: self.inner.config.max_maps,
            unsynced_bytes: self.inner.store.unsynced_bytes(),
        })
    }

    /// Largest key accepted by a plain map.
    #[must_use]
    pub fn max_key_size(&self) -> usize {
        limits::max_key_size(self.page_size(), MapLayout::default())
    }

    /// Largest key accepted by a map with `layout`.
    #[must_use]
    pub fn max_key_size_for(&self, layout: MapLayout) -> usize {
        limits::max_key_size(self.page_size(), layout)
    }

    /// Largest value accepted by a plain map.
    #[must_use]
    pub fn max_value_size(&self) -> usize {
        limits::max_value_size(self.page_size(), MapLayout::default())
    }

    /// Largest value accepted by a map with `layout`.
    #[must_use]
    pub fn max_value_size_for(&self, layout: MapLayout) -> usize {
        limits::max_value_size(self.page_size(), layout)
    }

    /// Sets a runtime option.
    ///
    /// # Errors
    ///
    /// Returns a config error for out-of-range values and for options fixed
    /// at open time.
    pub fn set_option(&self, option: EnvOption, value: u64) -> CoreResult<()> {
        self.check_usable()?;
        self.inner.options.lock().set(option, value)?;
        debug!(%option, value, "option set");
        Ok(())
    }

    /// Sets a runtime option by its snake_case name.
    pub fn set_option_by_name(&self, name: &str, value: u64) -> CoreResult<()> {
        self.set_option(name.parse()?, value)
    }

    /// Reads a runtime option.
    pub fn get_option(&self, option: EnvOption) -> CoreResult<u64> {
        self.check_usable()?;
        Ok(self.option(option))
    }

    pub(crate) fn option(&self, option: EnvOption) -> u64 {
        self.inner.options.lock().get(option)
    }

    /// Restores a runtime option to its default.
    pub fn reset_option(&self, option: EnvOption) -> CoreResult<()> {
        self.check_usable()?;
        self.inner.options.lock().reset(option)
    }

    /// Flushes committed data, fsyncing when `force` is set or the
    /// `sync_bytes` / `sync_period` thresholds are crossed. Returns whether
    /// an fsync happened.
    pub fn sync(&self, force: bool) -> CoreResult<bool> {
        self.check_usable()?;
        let (bytes, period) = self.sync_thresholds();
        self.inner.store.sync(force, bytes, period)
    }

    fn sync_thresholds(&self) -> (u64, Duration) {
        let options = self.inner.options.lock();
        (
            options.get(EnvOption::SyncBytes),
            Duration::from_millis(options.get(EnvOption::SyncPeriod)),
        )
    }

    /// Writes a consistent copy of the latest commit to `out`.
    ///
    /// Copies are serialized; concurrent writers are not blocked.
    pub fn copy_to(&self, out: &mut dyn Write, flags: CopyFlags) -> CoreResult<u64> {
        self.check_usable()?;
        let _guard = self.inner.copy_lock.lock();
        let written = self
            .inner
            .store
            .copy_to(out, flags.compact, flags.force_dynamic_size)?;
        info!(bytes = written, compact = flags.compact, "environment copied");
        Ok(written)
    }

    /// Writes a copy to a new file at `path`.
    ///
    /// # Errors
    ///
    /// Returns a usage error if `path` already exists. A copy that fails
    /// part way removes the file it created.
    pub fn copy_to_path(&self, path: impl AsRef<Path>, flags: CopyFlags) -> CoreResult<u64> {
        let path = path.as_ref();
        let file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(CoreError::usage(format!(
                    "copy destination already exists: {}",
                    path.display()
                )));
            }
            Err(err) => return Err(err.into()),
        };
        self.write_copy(file, flags).map_err(|err| {
            if let Err(cleanup) = fs::remove_file(path) {
                warn!(path = %path.display(), error = %cleanup, "failed to remove partial copy");
            }
            err
        })
    }

    fn write_copy(&self, file: File, flags: CopyFlags) -> CoreResult<u64> {
        let mut out = BufWriter::new(file);
        let written = self.copy_to(&mut out, flags)?;
        let file = out
            .into_inner()
            .map_err(|err| CoreError::Io(err.into_error()))?;
        file.sync_all()?;
        Ok(written)
    }

    /// Installs a callback run after a commit when the oldest reader lags
    /// at least `stall_gap` commits behind.
    pub fn set_stall_handler(&self, handler: impl Fn(&StallNotice) + Send + Sync + 'static) {
        *self.inner.stall_handler.write() = Some(Arc::new(handler));
    }

    /// Removes the stall callback.
    pub fn clear_stall_handler(&self) {
        *self.inner.stall_handler.write() = None;
    }

    /// Attaches an opaque value to the environment. Last write wins.
    pub fn set_user_context<T: Any + Send + Sync>(&self, context: Arc<T>) {
        *self.inner.context.write() = Some(context);
    }

    /// Returns the attached value if it has type `T`.
    #[must_use]
    pub fn user_context<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.inner.context.read().clone()?.downcast::<T>().ok()
    }

    /// Removes the attached value.
    pub fn clear_user_context(&self) {
        *self.inner.context.write() = None;
    }

    /// Post-commit housekeeping: reader lag detection and deferred sync.
    pub(crate) fn after_commit(&self, version: &Version) {
        let gap = self.inner.config.stall_gap;
        if gap > 0 {
            if let Some(oldest) = self.inner.txns.oldest_reader() {
                let lag = version.txnid.saturating_sub(oldest);
                if lag >= gap {
                    let notice = StallNotice {
                        current_txnid: version.txnid,
                        oldest_reader_txnid: oldest,
                        lag,
                    };
                    warn!(lag, oldest_reader = oldest, "reader is lagging behind the writer");
                    let handler = self.inner.stall_handler.read().clone();
                    if let Some(handler) = handler {
                        handler(&notice);
                    }
                }
            }
        }

        if !self.inner.config.sync_on_commit {
            let (bytes, period) = self.sync_thresholds();
            if let Err(err) = self.inner.store.sync(false, bytes, period) {
                warn!(error = %err, "deferred sync failed");
            }
        }
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("path", &self.inner.path)
            .field("open", &self.is_open())
            .field("store", &self.inner.store)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorKind, Geometry, MapFlags, TransactionState, WriterPolicy};
    use std::sync::atomic::AtomicU64;
    use tempfile::tempdir;

    fn put_commit(env: &Environment, key: &[u8], value: &[u8]) {
        let txn = env.begin_write().unwrap();
        txn.put(MapHandle::DEFAULT, key, value, true).unwrap();
        txn.commit().unwrap();
    }

    #[test]
    fn reopen_sees_committed_data() {
        let temp = tempdir().unwrap();
        {
            let env = Environment::open(temp.path(), EnvConfig::default()).unwrap();
            let txn = env.begin_write().unwrap();
            let map = txn.open_map(Some("m"), MapFlags::new().create()).unwrap();
            txn.put(map, b"k", b"v", true).unwrap();
            txn.commit().unwrap();
            env.close().unwrap();
        }

        let env = Environment::open(temp.path(), EnvConfig::default()).unwrap();
        let txn = env.begin_read().unwrap();
        let map = txn.open_map(Some("m"), MapFlags::new()).unwrap();
        assert_eq!(txn.get(map, b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn second_writer_fails_fast() {
        let env = Environment::open_in_memory(EnvConfig::default()).unwrap();
        let _writer = env.begin_write().unwrap();
        let env2 = env.clone();
        let err = std::thread::spawn(move || env2.begin_write().map(|_| ()))
            .join()
            .unwrap()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Busy);
        assert!(err.kind().is_retryable());
    }

    #[test]
    fn blocking_writer_waits_its_turn() {
        let config = EnvConfig::default().writer_policy(WriterPolicy::Block);
        let env = Environment::open_in_memory(config).unwrap();
        let writer = env.begin_write().unwrap();
        let env2 = env.clone();
        let handle = std::thread::spawn(move || {
            let txn = env2.begin_write().unwrap();
            txn.put(MapHandle::DEFAULT, b"second", b"2", true).unwrap();
            txn.commit().unwrap();
        });
        writer.put(MapHandle::DEFAULT, b"first", b"1", true).unwrap();
        writer.commit().unwrap();
        handle.join().unwrap();

        let reader = env.begin_read().unwrap();
        assert!(reader.get(MapHandle::DEFAULT, b"second").unwrap().is_some());
    }

    #[test]
    fn close_refuses_while_transactions_live() {
        let env = Environment::open_in_memory(EnvConfig::default()).unwrap();
        let reader = env.begin_read().unwrap();
        assert_eq!(env.close().unwrap_err().kind(), ErrorKind::Usage);
        reader.abort().unwrap();
        env.close().unwrap();
        assert!(!env.is_open());
        assert!(matches!(env.begin_read().unwrap_err(), CoreError::EnvironmentClosed));
    }

    #[test]
    fn failed_begin_does_not_hold_close_open() {
        let env = Environment::open_in_memory(EnvConfig::default().max_readers(1)).unwrap();
        let writer = env.begin_write().unwrap();
        assert_eq!(env.begin_write().unwrap_err().kind(), ErrorKind::Busy);
        let reader = env.begin_read().unwrap();
        assert_eq!(env.begin_read().unwrap_err().kind(), ErrorKind::Busy);
        writer.abort().unwrap();
        reader.abort().unwrap();
        env.close().unwrap();
    }

    #[test]
    fn close_never_overlaps_a_live_transaction() {
        for _ in 0..20 {
            let env = Environment::open_in_memory(EnvConfig::default()).unwrap();
            let closed = Arc::new(AtomicBool::new(false));
            let barrier = Arc::new(std::sync::Barrier::new(5));

            let workers: Vec<_> = (0..4)
                .map(|i| {
                    let env = env.clone();
                    let closed = Arc::clone(&closed);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        for _ in 0..200 {
                            let begun = if i == 0 { env.begin_write() } else { env.begin_read() };
                            match begun {
                                Ok(txn) => {
                                    assert!(!closed.load(Ordering::SeqCst));
                                    txn.commit().unwrap();
                                }
                                Err(CoreError::EnvironmentClosed) => {
                                    if closed.load(Ordering::SeqCst) {
                                        break;
                                    }
                                }
                                Err(err) => panic!("unexpected error: {err}"),
                            }
                        }
                    })
                })
                .collect();

            barrier.wait();
            loop {
                match env.close() {
                    Ok(()) => {
                        closed.store(true, Ordering::SeqCst);
                        break;
                    }
                    Err(err) if err.kind() == ErrorKind::Usage => thread::yield_now(),
                    Err(err) => panic!("unexpected error: {err}"),
                }
            }
            for worker in workers {
                worker.join().unwrap();
            }
            assert!(matches!(env.begin_read().unwrap_err(), CoreError::EnvironmentClosed));
        }
    }

    #[test]
    fn read_only_environment_rejects_writers() {
        let temp = tempdir().unwrap();
        {
            let env = Environment::open(temp.path(), EnvConfig::default()).unwrap();
            put_commit(&env, b"k", b"v");
            env.close().unwrap();
        }
        let env = Environment::open(temp.path(), EnvConfig::default().read_only(true)).unwrap();
        assert_eq!(env.begin_write().unwrap_err().kind(), ErrorKind::Usage);
        let txn = env.begin_read().unwrap();
        assert_eq!(txn.get(MapHandle::DEFAULT, b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn reader_table_fills_up() {
        let env = Environment::open_in_memory(EnvConfig::default().max_readers(2)).unwrap();
        let _a = env.begin_read().unwrap();
        let _b = env.begin_read().unwrap();
        let err = env.begin_read().unwrap_err();
        assert!(matches!(err, CoreError::ReadersFull { max_readers: 2 }));
    }

    #[test]
    fn registered_readers_must_register() {
        let config = EnvConfig::default().registered_readers(true);
        let env = Environment::open_in_memory(config).unwrap();
        assert_eq!(env.begin_read().unwrap_err().kind(), ErrorKind::Usage);
        assert!(env.register_thread().unwrap());
        assert!(!env.register_thread().unwrap());

        let reader = env.begin_read().unwrap();
        assert_eq!(env.unregister_thread().unwrap_err().kind(), ErrorKind::Busy);
        drop(reader);
        assert!(env.unregister_thread().unwrap());
    }

    #[test]
    fn info_tracks_commits_and_readers() {
        let env = Environment::open_in_memory(EnvConfig::default()).unwrap();
        put_commit(&env, b"a", b"1");
        let reader = env.begin_read().unwrap();
        put_commit(&env, b"b", b"2");

        let info = env.info(Some(&reader)).unwrap();
        assert_eq!(info.recent_txnid, reader.id().as_u64() + 1);
        assert_eq!(info.latter_reader_txnid, Some(reader.id().as_u64()));
        assert_eq!(info.self_latter_reader_txnid, Some(reader.id().as_u64()));
        assert_eq!(info.num_readers, 1);
        assert!(info.map_size >= info.file_size);
    }

    #[test]
    fn stat_counts_entries_across_maps() {
        let env = Environment::open_in_memory(EnvConfig::default()).unwrap();
        let txn = env.begin_write().unwrap();
        let map = txn.open_map(Some("m"), MapFlags::new().create()).unwrap();
        txn.put(map, b"k", b"v", true).unwrap();
        txn.put(MapHandle::DEFAULT, b"k", b"v", true).unwrap();
        assert_eq!(env.stat(Some(&txn)).unwrap().entries, 2);
        assert_eq!(env.stat(None).unwrap().entries, 0);
        txn.commit().unwrap();
        assert_eq!(env.stat(None).unwrap().entries, 2);
    }

    #[test]
    fn options_by_enum_and_name() {
        let env = Environment::open_in_memory(EnvConfig::default()).unwrap();
        env.set_option(EnvOption::SyncBytes, 4096).unwrap();
        assert_eq!(env.get_option(EnvOption::SyncBytes).unwrap(), 4096);
        env.set_option_by_name("sync_period", 250).unwrap();
        assert_eq!(env.get_option(EnvOption::SyncPeriod).unwrap(), 250);
        assert_eq!(
            env.set_option_by_name("no_such_option", 1).unwrap_err().kind(),
            ErrorKind::Config
        );
        assert_eq!(
            env.set_option(EnvOption::MaxMaps, 10).unwrap_err().kind(),
            ErrorKind::Config
        );
        env.reset_option(EnvOption::SyncBytes).unwrap();
        assert_eq!(env.get_option(EnvOption::SyncBytes).unwrap(), 0);
    }

    #[test]
    fn options_given_at_open() {
        let config = EnvConfig::default()
            .option(EnvOption::MaxReaders, 3)
            .option(EnvOption::TxnDpInitial, 512);
        let env = Environment::open_in_memory(config).unwrap();
        assert_eq!(env.config().max_readers, 3);
        assert_eq!(env.get_option(EnvOption::MaxReaders).unwrap(), 3);
        assert_eq!(env.get_option(EnvOption::TxnDpInitial).unwrap(), 512);

        let bad = EnvConfig::default().option(EnvOption::MergeThreshold16Dot16Percent, 1);
        let err = Environment::open_in_memory(bad).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn failed_copy_leaves_no_file_behind() {
        let temp = tempdir().unwrap();
        let env = Environment::open(temp.path().join("src"), EnvConfig::default()).unwrap();
        put_commit(&env, b"k", b"v");
        env.close().unwrap();

        let target = temp.path().join("copy.dat");
        let err = env.copy_to_path(&target, CopyFlags::new()).unwrap_err();
        assert!(matches!(err, CoreError::EnvironmentClosed));
        assert!(!target.exists());
    }

    #[test]
    fn copy_to_path_refuses_existing_file() {
        let temp = tempdir().unwrap();
        let env = Environment::open(temp.path().join("src"), EnvConfig::default()).unwrap();
        put_commit(&env, b"k", b"v");

        let target = temp.path().join("copy.dat");
        env.copy_to_path(&target, CopyFlags::new()).unwrap();
        let err = env.copy_to_path(&target, CopyFlags::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);

        let copy = Environment::open(&target, EnvConfig::default().no_subdir(true)).unwrap();
        let txn = copy.begin_read().unwrap();
        assert_eq!(txn.get(MapHandle::DEFAULT, b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn compact_copy_is_not_larger() {
        let env = Environment::open_in_memory(EnvConfig::default()).unwrap();
        for i in 0..20u32 {
            put_commit(&env, b"k", &i.to_le_bytes());
        }
        let mut plain = Vec::new();
        let mut compact = Vec::new();
        env.copy_to(&mut plain, CopyFlags::new()).unwrap();
        env.copy_to(&mut compact, CopyFlags::new().compact()).unwrap();
        assert!(compact.len() < plain.len());
    }

    #[test]
    fn map_full_rejects_commit() {
        let geometry = Geometry::new().page_size(256).lower(1024).upper(1024);
        let env = Environment::open_in_memory(EnvConfig::default().geometry(geometry)).unwrap();
        let txn = env.begin_write().unwrap();
        for i in 0..40u32 {
            txn.put(MapHandle::DEFAULT, &i.to_be_bytes(), &[7u8; 64], true).unwrap();
        }
        let err = txn.commit().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MapFull);
        assert_eq!(txn.state(), TransactionState::Aborted);

        let reader = env.begin_read().unwrap();
        assert_eq!(reader.get(MapHandle::DEFAULT, &0u32.to_be_bytes()).unwrap(), None);
    }

    #[test]
    fn stall_handler_sees_lagging_reader() {
        let env = Environment::open_in_memory(EnvConfig::default().stall_gap(2)).unwrap();
        let lag = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&lag);
        env.set_stall_handler(move |notice| seen.store(notice.lag, Ordering::SeqCst));

        let _reader = env.begin_read().unwrap();
        put_commit(&env, b"a", b"1");
        assert_eq!(lag.load(Ordering::SeqCst), 0);
        put_commit(&env, b"b", b"2");
        assert_eq!(lag.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn user_context_is_typed() {
        let env = Environment::open_in_memory(EnvConfig::default()).unwrap();
        env.set_user_context(Arc::new(42u32));
        assert_eq!(env.user_context::<u32>().as_deref(), Some(&42));
        assert!(env.user_context::<String>().is_none());
    }

    #[test]
    fn size_limits_follow_page_size() {
        let env = Environment::open_in_memory(EnvConfig::default()).unwrap();
        assert_eq!(env.page_size(), 4096);
        assert_eq!(env.max_key_size(), 2022);
        let dup = MapFlags::new().dup_sort().layout();
        assert!(env.max_key_size_for(dup) < env.max_key_size());
        assert!(env.max_value_size_for(dup) < env.max_value_size());
    }
}

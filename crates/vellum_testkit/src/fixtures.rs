//! Test fixtures and environment helpers.

use std::path::{Path, PathBuf};
use std::sync::Once;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;
use vellum_core::{EnvConfig, Environment, MapFlags, MapHandle};

/// A test environment with automatic cleanup.
pub struct TestEnv {
    /// The environment instance.
    pub env: Environment,
    config: EnvConfig,
    _temp_dir: Option<TempDir>,
}

impl TestEnv {
    /// Creates a new in-memory test environment.
    pub fn memory() -> Self {
        Self::memory_with(EnvConfig::default())
    }

    /// Creates an in-memory test environment with `config`.
    pub fn memory_with(config: EnvConfig) -> Self {
        init_tracing();
        Self {
            env: Environment::open_in_memory(config.clone())
                .expect("Failed to open in-memory environment"),
            config,
            _temp_dir: None,
        }
    }

    /// Creates a new file-based test environment.
    pub fn file() -> Self {
        Self::file_with(EnvConfig::default())
    }

    /// Creates a file-based test environment with `config`.
    pub fn file_with(config: EnvConfig) -> Self {
        init_tracing();
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let env = Environment::open(temp_dir.path().join("env"), config.clone())
            .expect("Failed to open file environment");
        Self {
            env,
            config,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the environment directory if file-based.
    pub fn path(&self) -> Option<PathBuf> {
        self._temp_dir.as_ref().map(|d| d.path().join("env"))
    }

    /// Returns the data file path if file-based.
    pub fn data_path(&self) -> Option<PathBuf> {
        self.path().map(|p| p.join("vellum.dat"))
    }

    /// Returns a scratch path inside the temporary directory.
    pub fn scratch(&self, name: &str) -> Option<PathBuf> {
        self._temp_dir.as_ref().map(|d| d.path().join(name))
    }

    /// Closes and reopens a file-based environment with the same config.
    pub fn reopen(&mut self) {
        let path = self.path().expect("Only file environments can be reopened");
        self.env.close().expect("Failed to close environment");
        self.env = Environment::open(&path, self.config.clone())
            .expect("Failed to reopen environment");
    }

    /// Closes the environment, runs `f` on the directory, then reopens it.
    pub fn reopen_after<F>(&mut self, f: F)
    where
        F: FnOnce(&Path),
    {
        let path = self.path().expect("Only file environments can be reopened");
        self.env.close().expect("Failed to close environment");
        f(&path);
        self.env = Environment::open(&path, self.config.clone())
            .expect("Failed to reopen environment");
    }
}

impl std::ops::Deref for TestEnv {
    type Target = Environment;

    fn deref(&self) -> &Self::Target {
        &self.env
    }
}

/// Runs a test with a temporary in-memory environment.
pub fn with_temp_env<F, R>(f: F) -> R
where
    F: FnOnce(&Environment) -> R,
{
    let test_env = TestEnv::memory();
    f(&test_env.env)
}

/// Runs a test with a temporary file-based environment.
pub fn with_file_env<F, R>(f: F) -> R
where
    F: FnOnce(&Environment, &Path) -> R,
{
    let test_env = TestEnv::file();
    let path = test_env.path().expect("File environment should have a path");
    f(&test_env.env, &path)
}

/// Installs a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to warnings only.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Creates `name` and fills it with `count` entries `key-{i:05}` to
    /// `value-{i}`, committing once.
    pub fn populate_map(env: &Environment, name: &str, count: usize) -> MapHandle {
        let txn = env.begin_write().expect("Failed to begin write");
        let map = txn
            .open_map(Some(name), MapFlags::new().create())
            .expect("Failed to create map");
        for i in 0..count {
            txn.put(map, &key(i), &value(i), true)
                .expect("Failed to put");
        }
        txn.commit().expect("Failed to commit");
        map
    }

    /// Key used by [`populate_map`].
    pub fn key(i: usize) -> Vec<u8> {
        format!("key-{i:05}").into_bytes()
    }

    /// Value used by [`populate_map`].
    pub fn value(i: usize) -> Vec<u8> {
        format!("value-{i}").into_bytes()
    }
}

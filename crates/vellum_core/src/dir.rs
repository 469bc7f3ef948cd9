//! Environment file layout and locking.
//!
//! An environment is a data file plus a lock file:
//!
//! ```text
//! <path>/                 <path>          (no_subdir)
//! ├─ vellum.dat           <path>-lck
//! └─ vellum.lck
//! ```
//!
//! The lock file carries an advisory lock: exclusive for a read-write
//! environment, shared for read-only ones.

use crate::config::EnvConfig;
use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const DATA_FILE: &str = "vellum.dat";
const LOCK_FILE: &str = "vellum.lck";
const LOCK_SUFFIX: &str = "-lck";

/// The files of one open environment. Dropping it releases the lock.
#[derive(Debug)]
pub(crate) struct EnvDir {
    data_path: PathBuf,
    lock_path: PathBuf,
    _lock_file: File,
}

impl EnvDir {
    /// Resolves the layout for `path` and takes the lock.
    ///
    /// # Errors
    ///
    /// Returns an environment error if the files are missing and may not be
    /// created, or if another process holds a conflicting lock.
    pub(crate) fn open(path: &Path, config: &EnvConfig) -> CoreResult<Self> {
        let may_create = config.create_if_missing && !config.read_only;
        let (data_path, lock_path) = if config.no_subdir {
            let mut lock = OsString::from(path.as_os_str());
            lock.push(LOCK_SUFFIX);
            if !path.exists() {
                if !may_create {
                    return Err(missing(path));
                }
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)?;
                }
            }
            (path.to_path_buf(), PathBuf::from(lock))
        } else {
            if !path.exists() {
                if !may_create {
                    return Err(missing(path));
                }
                fs::create_dir_all(path)?;
            }
            if !path.is_dir() {
                return Err(CoreError::environment(format!(
                    "path is not a directory: {}",
                    path.display()
                )));
            }
            if config.read_only && !path.join(DATA_FILE).exists() {
                return Err(missing(&path.join(DATA_FILE)));
            }
            (path.join(DATA_FILE), path.join(LOCK_FILE))
        };

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        let locked = if config.read_only {
            FileExt::try_lock_shared(&lock_file)
        } else {
            FileExt::try_lock_exclusive(&lock_file)
        };
        if locked.is_err() {
            return Err(CoreError::environment(format!(
                "environment is locked by another process: {}",
                lock_path.display()
            )));
        }

        Ok(Self {
            data_path,
            lock_path,
            _lock_file: lock_file,
        })
    }

    /// Path of the data file.
    pub(crate) fn data_path(&self) -> &Path {
        &self.data_path
    }

    /// Path of the lock file.
    pub(crate) fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

fn missing(path: &Path) -> CoreError {
    CoreError::environment(format!("environment does not exist: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_directory_layout() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("env");
        let dir = EnvDir::open(&path, &EnvConfig::default()).unwrap();
        assert_eq!(dir.data_path(), path.join(DATA_FILE));
        assert!(dir.lock_path().exists());
    }

    #[test]
    fn no_subdir_uses_suffixed_lock() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("single.db");
        let dir = EnvDir::open(&path, &EnvConfig::default().no_subdir(true)).unwrap();
        assert_eq!(dir.data_path(), path);
        assert_eq!(dir.lock_path(), temp.path().join("single.db-lck"));
    }

    #[test]
    fn missing_without_create_fails() {
        let temp = tempdir().unwrap();
        let config = EnvConfig::default().create_if_missing(false);
        let err = EnvDir::open(&temp.path().join("absent"), &config).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Environment);
    }

    #[test]
    fn second_writer_is_locked_out() {
        let temp = tempdir().unwrap();
        let _first = EnvDir::open(temp.path(), &EnvConfig::default()).unwrap();
        let err = EnvDir::open(temp.path(), &EnvConfig::default()).unwrap_err();
        assert!(err.to_string().contains("locked"));
    }

    #[test]
    fn readers_share_the_lock() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join(DATA_FILE), b"").unwrap();

        let read_only = EnvConfig::default().read_only(true);
        let _first = EnvDir::open(temp.path(), &read_only).unwrap();
        let _second = EnvDir::open(temp.path(), &read_only).unwrap();
        let err = EnvDir::open(temp.path(), &EnvConfig::default()).unwrap_err();
        assert!(err.to_string().contains("locked"));
    }
}

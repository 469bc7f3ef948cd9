//! Error types for Vellum core.

use crate::types::MapHandle;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Coarse classification of a [`CoreError`].
///
/// Callers branch on the kind rather than on individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad geometry or option.
    Config,
    /// Open, lock or I/O failure of the backing store.
    Environment,
    /// Contention; safe to retry.
    Busy,
    /// A write transaction or cursor was driven from a foreign thread.
    ThreadOwnership,
    /// A named map does not exist.
    MapNotFound,
    /// The environment's map limit is reached.
    MapLimit,
    /// A map handle is stale, unknown or not yet committed.
    BadHandle,
    /// The key (or key/value pair) already exists.
    KeyExists,
    /// Nothing at the requested position.
    NotFound,
    /// The geometry upper bound would be exceeded.
    MapFull,
    /// The API contract was violated.
    Usage,
}

impl ErrorKind {
    /// Returns true if the failed call may succeed when simply retried.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Busy)
    }
}

/// Errors that can occur in Vellum core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] vellum_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid geometry or option value.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },

    /// The environment could not be opened or used.
    #[error("environment error: {message}")]
    Environment {
        /// Description of the problem.
        message: String,
    },

    /// Another write transaction is active.
    #[error("busy: {message}")]
    Busy {
        /// Description of the contention.
        message: String,
    },

    /// Every reader slot is taken.
    #[error("reader table is full ({max_readers} slots)")]
    ReadersFull {
        /// Configured reader limit.
        max_readers: u32,
    },

    /// A transaction was used from a thread other than its owner.
    #[error("transaction {txn} is owned by another thread")]
    ThreadOwnership {
        /// The offending transaction.
        txn: crate::types::TransactionId,
    },

    /// A named map does not exist.
    #[error("map not found: {name}")]
    MapNotFound {
        /// Map name.
        name: String,
    },

    /// Creating a map would exceed the configured limit.
    #[error("map limit reached: at most {max_maps} named maps")]
    MapLimit {
        /// Configured map limit.
        max_maps: u32,
    },

    /// A map handle cannot be used here.
    #[error("bad map handle {handle}: {message}")]
    BadHandle {
        /// The rejected handle.
        handle: MapHandle,
        /// Why it was rejected.
        message: String,
    },

    /// Insert without overwrite hit an existing key.
    #[error("key already exists")]
    KeyExists,

    /// No entry at the requested position.
    #[error("not found")]
    NotFound,

    /// The commit would grow the data file past the geometry upper bound.
    #[error("map full: commit needs {required} bytes, upper bound is {upper}")]
    MapFull {
        /// File size the commit would need.
        required: u64,
        /// Configured upper bound.
        upper: u64,
    },

    /// Operation not permitted in the current state.
    #[error("usage error: {message}")]
    Usage {
        /// Description of the misuse.
        message: String,
    },

    /// The environment was closed.
    #[error("environment is closed")]
    EnvironmentClosed,

    /// An existing map was opened with conflicting flags.
    #[error("map {name} exists with incompatible flags")]
    Incompatible {
        /// Map name, `<default>` for the unnamed map.
        name: String,
    },

    /// `replace` on a duplicate key holding several values.
    #[error("key holds multiple values")]
    MultiValue,

    /// A key or value violates the size rules of its map.
    #[error("bad key or value size: {message}")]
    BadValueSize {
        /// Description of the violation.
        message: String,
    },

    /// The data file is corrupted.
    #[error("data file corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },
}

impl CoreError {
    /// Classifies this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Storage(_) | Self::Io(_) | Self::Environment { .. } | Self::Corrupted { .. } => {
                ErrorKind::Environment
            }
            Self::Config { .. } => ErrorKind::Config,
            Self::Busy { .. } | Self::ReadersFull { .. } => ErrorKind::Busy,
            Self::ThreadOwnership { .. } => ErrorKind::ThreadOwnership,
            Self::MapNotFound { .. } => ErrorKind::MapNotFound,
            Self::MapLimit { .. } => ErrorKind::MapLimit,
            Self::BadHandle { .. } => ErrorKind::BadHandle,
            Self::KeyExists => ErrorKind::KeyExists,
            Self::NotFound => ErrorKind::NotFound,
            Self::MapFull { .. } => ErrorKind::MapFull,
            Self::Usage { .. }
            | Self::EnvironmentClosed
            | Self::Incompatible { .. }
            | Self::MultiValue
            | Self::BadValueSize { .. } => ErrorKind::Usage,
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an environment error.
    pub fn environment(message: impl Into<String>) -> Self {
        Self::Environment {
            message: message.into(),
        }
    }

    /// Creates a busy error.
    pub fn busy(message: impl Into<String>) -> Self {
        Self::Busy {
            message: message.into(),
        }
    }

    /// Creates a bad handle error.
    pub fn bad_handle(handle: MapHandle, message: impl Into<String>) -> Self {
        Self::BadHandle {
            handle,
            message: message.into(),
        }
    }

    /// Creates a usage error.
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    /// Creates a bad value size error.
    pub fn bad_value_size(message: impl Into<String>) -> Self {
        Self::BadValueSize {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }
}

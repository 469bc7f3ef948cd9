//! # Vellum Core
//!
//! Embedded transactional key-value environment.
//!
//! This crate provides:
//! - An [`Environment`] holding any number of named maps in one data file
//! - Snapshot-isolated read transactions alongside a single writer
//! - Nested write transactions that commit into their parent
//! - [`Cursor`]s with ordered and duplicate-aware positioning
//! - Crash recovery that discards an incompletely written commit
//!
//! ## Example
//!
//! ```rust
//! use vellum_core::{CursorOp, EnvConfig, Environment, MapFlags};
//!
//! let env = Environment::open_in_memory(EnvConfig::default()).unwrap();
//!
//! let txn = env.begin_write().unwrap();
//! let tags = txn.open_map(Some("tags"), MapFlags::new().create().dup_sort()).unwrap();
//! txn.put(tags, b"rust", b"systems", true).unwrap();
//! txn.put(tags, b"rust", b"embedded", true).unwrap();
//! txn.commit().unwrap();
//!
//! let reader = env.begin_read().unwrap();
//! let mut cursor = reader.cursor(tags).unwrap();
//! let first = cursor.seek(CursorOp::Set(b"rust")).unwrap();
//! assert_eq!(first, Some((b"rust".to_vec(), b"embedded".to_vec())));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod cursor;
mod dir;
mod env;
mod error;
pub mod limits;
mod map;
mod options;
mod stats;
mod store;
mod transaction;
mod types;

pub use config::{
    EffectiveGeometry, EnvConfig, Geometry, WriterPolicy, DEFAULT_MAX_MAPS, DEFAULT_MAX_READERS,
    MAX_MAPS_LIMIT, MAX_READERS_LIMIT,
};
pub use cursor::{Cursor, CursorOp};
pub use env::{CopyFlags, Environment, StallNotice};
pub use error::{CoreError, CoreResult, ErrorKind};
pub use map::{KeyOrder, MapFlags, MapLayout, ValueOrder};
pub use options::EnvOption;
pub use stats::{EnvInfo, MapStat};
pub use transaction::{Transaction, TransactionState, TxnMode};
pub use types::{KeyValue, MapHandle, TransactionId};

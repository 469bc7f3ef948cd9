//! # Vellum Storage
//!
//! Byte-store backends for the Vellum key-value environment.
//!
//! A backend holds the data file of one environment: a header followed by
//! commit frames. Backends never look inside those bytes; the frame format,
//! recovery and snapshotting all live in `vellum_core`.
//!
//! ## Design Principles
//!
//! - Backends are append-only byte stores (read, append, flush, truncate)
//! - Truncation exists only to cut off a torn tail during recovery
//! - Must be `Send + Sync` so an environment can be shared across threads
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests and ephemeral environments
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use vellum_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"frame").unwrap();
//! assert_eq!(backend.read_at(offset, 5).unwrap(), b"frame");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;

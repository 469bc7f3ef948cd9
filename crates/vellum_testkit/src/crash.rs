//! Crash simulation against an environment's data file.
//!
//! A crash in the middle of a commit leaves a partial frame at the end of
//! the data file. These helpers produce such files so tests can check that
//! reopening restores the last complete commit.

use std::path::Path;
use vellum_storage::{FileBackend, StorageBackend, StorageResult};

/// Ways to damage the tail of a data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// The last commit frame was only partly written.
    TornFrame {
        /// Bytes cut off the end of the file.
        cut: u64,
    },
    /// Garbage was appended after the last complete frame.
    TrailingGarbage {
        /// Number of garbage bytes.
        len: usize,
    },
    /// The checksum of the last frame does not match.
    FlippedChecksum,
}

/// Applies `point` to the data file at `path`.
///
/// The environment owning the file must be closed first.
pub fn simulate_crash(path: &Path, point: CrashPoint) -> StorageResult<()> {
    let mut backend = FileBackend::open(path)?;
    let size = backend.size()?;
    match point {
        CrashPoint::TornFrame { cut } => backend.truncate(size.saturating_sub(cut)),
        CrashPoint::TrailingGarbage { len } => {
            backend.append(&vec![0xAB; len])?;
            backend.sync()
        }
        CrashPoint::FlippedChecksum => {
            if size == 0 {
                return Ok(());
            }
            let last = backend.read_at(size - 1, 1)?;
            backend.truncate(size - 1)?;
            backend.append(&[last[0] ^ 0xFF])?;
            backend.sync()
        }
    }
}

/// Returns the size of the file at `path`.
pub fn file_len(path: &Path) -> StorageResult<u64> {
    FileBackend::open_read_only(path)?.size()
}

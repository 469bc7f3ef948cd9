//! Storage backend trait definition.

use crate::error::StorageResult;
use std::io::Write;

/// Chunk size used when streaming a backend into a writer.
const COPY_CHUNK: usize = 64 * 1024;

/// A low-level byte store holding one environment's data file.
///
/// The environment appends one commit frame per write transaction and reads
/// frames back only during recovery and copy. Backends do not understand
/// frames, headers or maps.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `flush` hands appended data to the OS; `sync` makes it durable
/// - `truncate` never grows the store
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if the range is not fully
    /// inside the store, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the store and returns its offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is read-only or an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size of the store in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Forces data and metadata to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Cuts the store back to `new_size` bytes.
    ///
    /// Used by recovery to discard a torn commit frame.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::TruncateBeyondEnd`] if `new_size` is
    /// larger than the current size, or an I/O error.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Streams `len` bytes starting at `offset` into `out`.
    ///
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the store or writing `out` fails.
    fn copy_range(&self, offset: u64, len: u64, out: &mut dyn Write) -> StorageResult<u64> {
        let mut copied = 0u64;
        while copied < len {
            let chunk = usize::try_from(len - copied).map_or(COPY_CHUNK, |n| n.min(COPY_CHUNK));
            let data = self.read_at(offset + copied, chunk)?;
            out.write_all(&data)?;
            copied += data.len() as u64;
        }
        Ok(copied)
    }
}

//! Writer slot, reader table and thread registration.

use crate::config::WriterPolicy;
use crate::error::{CoreError, CoreResult};
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::ThreadId;

/// A slot held by one read transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReaderToken(usize);

#[derive(Debug, Clone, Copy)]
struct ReaderEntry {
    txnid: u64,
    thread: ThreadId,
}

/// Admission control for transactions.
///
/// ## Single-Writer Guarantee
///
/// The writer slot names the thread that owns the active write transaction.
/// A second `acquire_writer` fails with a busy error or waits on the
/// condition variable, depending on the [`WriterPolicy`]. A thread asking
/// for the slot it already holds always gets a busy error.
#[derive(Debug)]
pub(crate) struct TxnManager {
    policy: WriterPolicy,
    writer: Mutex<Option<ThreadId>>,
    writer_released: Condvar,
    readers: Mutex<Vec<Option<ReaderEntry>>>,
    registered: Mutex<HashSet<ThreadId>>,
    active: AtomicUsize,
    max_readers: u32,
}

impl TxnManager {
    pub(crate) fn new(policy: WriterPolicy, max_readers: u32) -> Self {
        Self {
            policy,
            writer: Mutex::new(None),
            writer_released: Condvar::new(),
            readers: Mutex::new(Vec::new()),
            registered: Mutex::new(HashSet::new()),
            active: AtomicUsize::new(0),
            max_readers,
        }
    }

    pub(crate) fn acquire_writer(&self, thread: ThreadId) -> CoreResult<()> {
        let mut writer = self.writer.lock();
        loop {
            match *writer {
                None => break,
                Some(owner) if owner == thread => {
                    return Err(CoreError::busy(
                        "this thread already owns the write transaction",
                    ));
                }
                Some(_) if self.policy == WriterPolicy::FailFast => {
                    return Err(CoreError::busy("another write transaction is active"));
                }
                Some(_) => self.writer_released.wait(&mut writer),
            }
        }
        *writer = Some(thread);
        Ok(())
    }

    pub(crate) fn release_writer(&self) {
        *self.writer.lock() = None;
        self.writer_released.notify_one();
    }

    pub(crate) fn acquire_reader(&self, txnid: u64, thread: ThreadId) -> CoreResult<ReaderToken> {
        let mut readers = self.readers.lock();
        let entry = Some(ReaderEntry { txnid, thread });
        if let Some(index) = readers.iter().position(Option::is_none) {
            readers[index] = entry;
            return Ok(ReaderToken(index));
        }
        if readers.len() >= self.max_readers as usize {
            return Err(CoreError::ReadersFull {
                max_readers: self.max_readers,
            });
        }
        readers.push(entry);
        Ok(ReaderToken(readers.len() - 1))
    }

    pub(crate) fn release_reader(&self, token: ReaderToken) {
        if let Some(slot) = self.readers.lock().get_mut(token.0) {
            *slot = None;
        }
    }

    /// Snapshot id pinned by the oldest reader.
    pub(crate) fn oldest_reader(&self) -> Option<u64> {
        self.readers.lock().iter().flatten().map(|r| r.txnid).min()
    }

    pub(crate) fn reader_count(&self) -> u32 {
        self.readers.lock().iter().flatten().count() as u32
    }

    pub(crate) fn register_thread(&self, thread: ThreadId) -> bool {
        self.registered.lock().insert(thread)
    }

    pub(crate) fn unregister_thread(&self, thread: ThreadId) -> CoreResult<bool> {
        let holds_reader = self.readers.lock().iter().flatten().any(|r| r.thread == thread);
        if holds_reader {
            return Err(CoreError::busy("thread still holds a read transaction"));
        }
        Ok(self.registered.lock().remove(&thread))
    }

    pub(crate) fn is_registered(&self, thread: ThreadId) -> bool {
        self.registered.lock().contains(&thread)
    }

    pub(crate) fn begin_active(&self) {
        self.active.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn end_active(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

//! Transaction states and modes.

use std::sync::atomic::{AtomicU8, Ordering};

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Read transaction released its snapshot and waits for `renew`.
    Reset,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been aborted.
    Aborted,
}

impl TransactionState {
    /// Returns true once the transaction can no longer be used.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }

    const fn code(self) -> u8 {
        match self {
            Self::Active => 0,
            Self::Reset => 1,
            Self::Committed => 2,
            Self::Aborted => 3,
        }
    }

    const fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Active,
            1 => Self::Reset,
            2 => Self::Committed,
            _ => Self::Aborted,
        }
    }
}

/// Access mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxnMode {
    /// Snapshot reader.
    ReadOnly,
    /// The environment's single writer.
    ReadWrite,
}

/// State shared between a transaction object and its parent's frame stack,
/// so a cascading commit or abort is visible through a child's handle.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: TransactionState) -> Self {
        Self(AtomicU8::new(state.code()))
    }

    pub(crate) fn get(&self) -> TransactionState {
        TransactionState::from_code(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: TransactionState) {
        self.0.store(state.code(), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!TransactionState::Active.is_terminal());
        assert!(!TransactionState::Reset.is_terminal());
        assert!(TransactionState::Committed.is_terminal());
        assert!(TransactionState::Aborted.is_terminal());
    }

    #[test]
    fn cell_tracks_transitions() {
        let cell = StateCell::new(TransactionState::Active);
        cell.set(TransactionState::Reset);
        assert_eq!(cell.get(), TransactionState::Reset);
        cell.set(TransactionState::Committed);
        assert_eq!(cell.get(), TransactionState::Committed);
    }
}

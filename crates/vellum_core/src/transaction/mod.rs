//! Transaction management for Vellum.

mod manager;
mod state;
mod txn;

pub(crate) use manager::TxnManager;
pub use state::{TransactionState, TxnMode};
pub use txn::Transaction;

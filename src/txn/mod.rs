//! Transaction layer implementation

pub mod commit_log;
pub mod transaction;

pub use commit_log::{CommitChange, CommitLog, CommitLogStore, CommitOp};
pub use transaction::{Transaction, TransactionState};

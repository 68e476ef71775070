use minilock_common::TrxId;
use minilock_storage::StorageError;
use thiserror::Error;

use crate::lock::LockId;

pub type ConcurrencyResult<T> = Result<T, ConcurrencyError>;

#[derive(Error, Debug)]
pub enum ConcurrencyError {
    /// Granting the request would close a cycle in the wait-for graph. The
    /// requesting transaction must abort; the core never retries on its own.
    #[error("deadlock detected: transaction {0} must abort")]
    Deadlock(TrxId),

    /// The id names no live transaction (already committed/aborted, or never
    /// begun).
    #[error("transaction {0} not found")]
    TransactionNotFound(TrxId),

    /// The transaction id space is exhausted.
    #[error("transaction id overflow, reached {0}")]
    TrxIdOverflow(u64),

    /// The handle does not name a live lock object.
    #[error("lock handle {0:?} does not name a live lock")]
    InvalidLockHandle(LockId),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

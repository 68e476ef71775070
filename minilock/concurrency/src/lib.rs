//! Concurrency control for the storage engine: a record-granularity lock
//! manager and transaction manager implementing strict two-phase locking.
//!
//! Locks are keyed by page and refined to records with per-slot bitmaps.
//! Requests queue FIFO per page; conflicts are resolved with a hand-rolled
//! semaphore over a condition variable, deadlocks are detected synchronously
//! at request time by walking the wait-for graph, and aborts roll back
//! through an in-memory undo log.

pub mod error;
pub mod manager;

mod lock;
mod trx;

pub use error::{ConcurrencyError, ConcurrencyResult};
pub use lock::{LockId, LockMode};
pub use manager::ConcurrencyManager;
pub use trx::{TrxIdGenerator, UndoRecord};

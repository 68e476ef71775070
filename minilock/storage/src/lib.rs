//! Storage collaborator interface for the minilock concurrency core.
//!
//! The lock manager never touches record bytes directly. Everything it needs
//! from the storage layer goes through the narrow [`SlotStorage`] trait: the
//! implicit-owner field embedded in each record slot, and the value write-back
//! used when a transaction's undo log is replayed on abort.

pub mod error;
pub mod page_store;

pub use error::{StorageError, StorageResult};
use minilock_common::{PageKey, RecordKey, SlotIndex, TableId, TrxId};
pub use page_store::MemPageStore;

/// Slot-level storage interface consumed by the lock and transaction
/// managers.
///
/// Implementations must not call back into the concurrency core: the manager
/// invokes these methods while holding its internal latches.
pub trait SlotStorage: Send + Sync {
    /// Read the implicit-owner field embedded in a record slot.
    /// [`minilock_common::NO_TRX`] means the slot is unstamped.
    fn implicit_owner(&self, page: PageKey, slot: SlotIndex) -> StorageResult<TrxId>;

    /// Stamp the implicit-owner field of a record slot with `trx_id`.
    fn set_implicit_owner(&self, page: PageKey, slot: SlotIndex, trx_id: TrxId)
    -> StorageResult<()>;

    /// Write `value` back into the record identified by `key`. Used by abort
    /// to apply a before-image from the undo log.
    fn apply_value(&self, table_id: TableId, key: RecordKey, value: &[u8]) -> StorageResult<()>;
}

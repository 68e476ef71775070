use minilock_common::{PageKey, RecordKey, SlotIndex, TableId};
use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("record with key {key} not found in table {table_id}")]
    RecordNotFound { table_id: TableId, key: RecordKey },
    #[error("slot {slot} out of range for page {page:?}")]
    SlotOutOfRange { page: PageKey, slot: SlotIndex },
}

use dashmap::DashMap;
use minilock_common::{NO_TRX, PageKey, RecordKey, SLOTS_PER_PAGE, SlotIndex, TableId, TrxId};

use crate::SlotStorage;
use crate::error::{StorageError, StorageResult};

/// In-memory record store implementing [`SlotStorage`].
///
/// Stands in for the pager/B+tree stack in tests and embeddings that bring no
/// disk layer of their own. Records are keyed by `(table_id, key)`; the
/// per-slot implicit-owner fields are kept in a separate page-keyed map so
/// that stamping a slot does not require the record to exist yet.
#[derive(Default)]
pub struct MemPageStore {
    owners: DashMap<PageKey, [TrxId; SLOTS_PER_PAGE]>,
    records: DashMap<(TableId, RecordKey), Vec<u8>>,
}

impl MemPageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a record.
    pub fn insert_record(&self, table_id: TableId, key: RecordKey, value: &[u8]) {
        self.records.insert((table_id, key), value.to_vec());
    }

    /// Read a record's current value.
    pub fn read_record(&self, table_id: TableId, key: RecordKey) -> StorageResult<Vec<u8>> {
        self.records
            .get(&(table_id, key))
            .map(|v| v.clone())
            .ok_or(StorageError::RecordNotFound { table_id, key })
    }

    /// Overwrite an existing record's value.
    pub fn write_record(
        &self,
        table_id: TableId,
        key: RecordKey,
        value: &[u8],
    ) -> StorageResult<()> {
        match self.records.get_mut(&(table_id, key)) {
            Some(mut slot) => {
                slot.clear();
                slot.extend_from_slice(value);
                Ok(())
            }
            None => Err(StorageError::RecordNotFound { table_id, key }),
        }
    }

    fn check_slot(page: PageKey, slot: SlotIndex) -> StorageResult<()> {
        if (slot as usize) < SLOTS_PER_PAGE {
            Ok(())
        } else {
            Err(StorageError::SlotOutOfRange { page, slot })
        }
    }
}

impl SlotStorage for MemPageStore {
    fn implicit_owner(&self, page: PageKey, slot: SlotIndex) -> StorageResult<TrxId> {
        Self::check_slot(page, slot)?;
        Ok(self
            .owners
            .get(&page)
            .map(|slots| slots[slot as usize])
            .unwrap_or(NO_TRX))
    }

    fn set_implicit_owner(
        &self,
        page: PageKey,
        slot: SlotIndex,
        trx_id: TrxId,
    ) -> StorageResult<()> {
        Self::check_slot(page, slot)?;
        self.owners.entry(page).or_insert([NO_TRX; SLOTS_PER_PAGE])[slot as usize] = trx_id;
        Ok(())
    }

    fn apply_value(&self, table_id: TableId, key: RecordKey, value: &[u8]) -> StorageResult<()> {
        self.write_record(table_id, key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_roundtrip() {
        let store = MemPageStore::new();
        store.insert_record(1, 42, b"hello");
        assert_eq!(store.read_record(1, 42).unwrap(), b"hello");
        store.write_record(1, 42, b"world").unwrap();
        assert_eq!(store.read_record(1, 42).unwrap(), b"world");
        assert!(store.read_record(1, 43).is_err());
    }

    #[test]
    fn test_write_missing_record() {
        let store = MemPageStore::new();
        assert!(matches!(
            store.write_record(1, 7, b"x"),
            Err(StorageError::RecordNotFound { table_id: 1, key: 7 })
        ));
    }

    #[test]
    fn test_implicit_owner_field() {
        let store = MemPageStore::new();
        let page = PageKey::new(1, 10);
        // Unstamped pages read back as NO_TRX without being created.
        assert_eq!(store.implicit_owner(page, 3).unwrap(), NO_TRX);
        store.set_implicit_owner(page, 3, 9).unwrap();
        assert_eq!(store.implicit_owner(page, 3).unwrap(), 9);
        assert_eq!(store.implicit_owner(page, 4).unwrap(), NO_TRX);
        store.set_implicit_owner(page, 3, NO_TRX).unwrap();
        assert_eq!(store.implicit_owner(page, 3).unwrap(), NO_TRX);
    }

    #[test]
    fn test_slot_out_of_range() {
        let store = MemPageStore::new();
        let page = PageKey::new(1, 10);
        assert!(store.implicit_owner(page, 64).is_err());
        assert!(store.set_implicit_owner(page, 64, 1).is_err());
    }
}

use std::sync::Arc;

use minilock_common::{PageNum, RecordKey, SLOTS_PER_PAGE, SlotIndex, TableId};
use minilock_concurrency::ConcurrencyManager;
use minilock_storage::MemPageStore;

pub const TABLE: TableId = 1;

/// Keys are laid out densely: key k lives in slot k % SLOTS_PER_PAGE of
/// page k / SLOTS_PER_PAGE.
pub fn page_of(key: RecordKey) -> PageNum {
    key as PageNum / SLOTS_PER_PAGE as PageNum
}

pub fn slot_of(key: RecordKey) -> SlotIndex {
    (key as usize % SLOTS_PER_PAGE) as SlotIndex
}

/// A manager over an in-memory page store seeded with `records` records,
/// each holding the decimal string "0".
pub fn setup(records: RecordKey) -> (Arc<ConcurrencyManager>, Arc<MemPageStore>) {
    let store = Arc::new(MemPageStore::new());
    for key in 0..records {
        store.insert_record(TABLE, key, b"0");
    }
    let manager = Arc::new(ConcurrencyManager::new(store.clone()));
    (manager, store)
}

pub fn read_i64(store: &MemPageStore, key: RecordKey) -> i64 {
    let raw = store.read_record(TABLE, key).unwrap();
    String::from_utf8(raw).unwrap().parse().unwrap()
}

use serde::{Deserialize, Serialize};

/// Internal identifier associated with an open table (database-wide unique).
pub type TableId = i64;

/// Physical page number within a table file.
pub type PageNum = u64;

/// Logical key of a record stored in a leaf page.
pub type RecordKey = i64;

/// In-page slot position of a record. Valid range is `0..SLOTS_PER_PAGE`.
pub type SlotIndex = u32;

/// Internal identifier associated with a transaction (database-wide unique,
/// monotonically increasing, never reused). Valid ids start at 1.
pub type TrxId = u64;

/// Sentinel transaction id. A slot whose implicit-owner field holds `NO_TRX`
/// is unstamped.
pub const NO_TRX: TrxId = 0;

/// Number of record slots per page; fixes the width of [`crate::SlotMask`].
pub const SLOTS_PER_PAGE: usize = 64;

/// Identity of a page. Lock heads are keyed by this pair; it is the
/// granularity at which lock request lists are maintained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageKey {
    pub table_id: TableId,
    pub page_num: PageNum,
}

impl PageKey {
    #[inline]
    pub fn new(table_id: TableId, page_num: PageNum) -> Self {
        Self { table_id, page_num }
    }
}

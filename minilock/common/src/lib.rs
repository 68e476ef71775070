//! Shared types for the minilock concurrency core.
//!
//! This crate holds the identifier aliases and the slot bitmap that are used
//! across both the storage and concurrency layers.

pub mod slot_mask;
pub mod types;

pub use slot_mask::SlotMask;
pub use types::{NO_TRX, PageKey, PageNum, RecordKey, SLOTS_PER_PAGE, SlotIndex, TableId, TrxId};

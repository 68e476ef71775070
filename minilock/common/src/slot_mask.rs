use serde::{Deserialize, Serialize};

use crate::types::{SLOTS_PER_PAGE, SlotIndex};

/// Fixed-width bitmask with one bit per record slot in a page.
///
/// A single lock object carries a `SlotMask` so that several compatible
/// record locks on the same page can be compressed into one object: the mask
/// is the union of the covered slot positions. Two masks that intersect
/// address at least one common record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotMask(u64);

impl SlotMask {
    /// The empty mask, covering no slots.
    pub const EMPTY: SlotMask = SlotMask(0);

    /// Mask covering exactly one slot.
    #[inline]
    pub fn single(slot: SlotIndex) -> Self {
        debug_assert!((slot as usize) < SLOTS_PER_PAGE);
        SlotMask(1u64 << slot)
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn contains(self, slot: SlotIndex) -> bool {
        debug_assert!((slot as usize) < SLOTS_PER_PAGE);
        self.0 & (1u64 << slot) != 0
    }

    /// Whether the two masks cover at least one common slot.
    #[inline]
    pub fn intersects(self, other: SlotMask) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub fn union(self, other: SlotMask) -> SlotMask {
        SlotMask(self.0 | other.0)
    }

    #[inline]
    pub fn insert(&mut self, slot: SlotIndex) {
        debug_assert!((slot as usize) < SLOTS_PER_PAGE);
        self.0 |= 1u64 << slot;
    }

    /// Number of slots covered by the mask.
    #[inline]
    pub fn len(self) -> u32 {
        self.0.count_ones()
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

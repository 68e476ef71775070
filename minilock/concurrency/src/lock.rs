//! Lock table, lock objects, and the wait-for-graph deadlock search.
//!
//! Lock objects live in an arena addressed by stable [`LockId`] indices and
//! are threaded through two FIFO lists: the per-page request list anchored by
//! a lock head, and the owning transaction's lock list. Arrival order is the
//! sole tie-break; no request ever jumps the queue.

use std::collections::{HashMap, HashSet};
use std::ops::{Index, IndexMut};
use std::sync::Arc;

use minilock_common::{PageKey, RecordKey, SlotIndex, SlotMask, TrxId};
use parking_lot::Condvar;

use crate::trx::TrxTable;

/// Requested or granted access mode of a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    /// Two modes conflict unless both are shared.
    #[inline]
    pub fn conflicts(self, other: LockMode) -> bool {
        self == LockMode::Exclusive || other == LockMode::Exclusive
    }
}

/// Stable handle to a lock object in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockId(usize);

/// One lock request/grant record.
pub(crate) struct LockRecord {
    pub(crate) page: PageKey,
    pub(crate) key: RecordKey,
    /// Slots covered by this object. More than one bit is set only after
    /// shared-lock compression merged several grants of the same owner.
    pub(crate) slots: SlotMask,
    pub(crate) mode: LockMode,
    pub(crate) owner: TrxId,
    /// Number of conflicting predecessors this request still waits on.
    /// Zero means the lock is granted (runnable).
    pub(crate) waiting: u32,
    /// Parks the single thread that issued this request. Signalled exactly
    /// when `waiting` reaches zero.
    pub(crate) cond: Arc<Condvar>,
    pub(crate) prev: Option<LockId>,
    pub(crate) next: Option<LockId>,
    pub(crate) next_in_trx: Option<LockId>,
}

impl LockRecord {
    pub(crate) fn new(
        page: PageKey,
        key: RecordKey,
        slot: SlotIndex,
        mode: LockMode,
        owner: TrxId,
    ) -> Self {
        Self {
            page,
            key,
            slots: SlotMask::single(slot),
            mode,
            owner,
            waiting: 0,
            cond: Arc::new(Condvar::new()),
            prev: None,
            next: None,
            next_in_trx: None,
        }
    }

    /// Same-record test: equal key or overlapping slot bitmap. Compression
    /// makes the bitmap the authoritative coverage, so both checks are
    /// needed everywhere a conflict is decided.
    #[inline]
    fn covers_same_record(&self, key: RecordKey, slots: SlotMask) -> bool {
        self.key == key || self.slots.intersects(slots)
    }
}

/// Arena of lock records with an explicit free list. Freed indices are
/// reused; a handle is only valid while its record is live.
pub(crate) struct LockArena {
    records: Vec<Option<LockRecord>>,
    free: Vec<LockId>,
}

impl LockArena {
    fn new() -> Self {
        Self {
            records: Vec::new(),
            free: Vec::new(),
        }
    }

    pub(crate) fn alloc(&mut self, record: LockRecord) -> LockId {
        match self.free.pop() {
            Some(id) => {
                self.records[id.0] = Some(record);
                id
            }
            None => {
                self.records.push(Some(record));
                LockId(self.records.len() - 1)
            }
        }
    }

    pub(crate) fn dealloc(&mut self, id: LockId) {
        debug_assert!(self.records[id.0].is_some());
        self.records[id.0] = None;
        self.free.push(id);
    }

    pub(crate) fn contains(&self, id: LockId) -> bool {
        self.records.get(id.0).is_some_and(|slot| slot.is_some())
    }

    /// Number of live lock records.
    pub(crate) fn live(&self) -> usize {
        self.records.len() - self.free.len()
    }
}

impl Index<LockId> for LockArena {
    type Output = LockRecord;

    fn index(&self, id: LockId) -> &LockRecord {
        self.records[id.0]
            .as_ref()
            .expect("lock id names a freed arena slot")
    }
}

impl IndexMut<LockId> for LockArena {
    fn index_mut(&mut self, id: LockId) -> &mut LockRecord {
        self.records[id.0]
            .as_mut()
            .expect("lock id names a freed arena slot")
    }
}

/// Per-page FIFO anchor. Created on first request against the page and kept
/// (emptied, not removed) for the life of the process.
#[derive(Default)]
struct LockHead {
    head: Option<LockId>,
    tail: Option<LockId>,
}

/// The process-wide lock table: arena plus the page-keyed lock heads.
/// All access happens under the manager's lock-table latch.
pub(crate) struct LockTable {
    pub(crate) arena: LockArena,
    heads: HashMap<PageKey, LockHead>,
}

impl LockTable {
    pub(crate) fn new() -> Self {
        Self {
            arena: LockArena::new(),
            heads: HashMap::new(),
        }
    }

    /// Append a record at the tail of its page list.
    pub(crate) fn append(&mut self, record: LockRecord) -> LockId {
        let page = record.page;
        let id = self.arena.alloc(record);
        let head = self.heads.entry(page).or_default();
        match head.tail {
            Some(tail) => {
                head.tail = Some(id);
                self.arena[tail].next = Some(id);
                self.arena[id].prev = Some(tail);
            }
            None => {
                head.head = Some(id);
                head.tail = Some(id);
            }
        }
        id
    }

    /// Insert a record immediately before `before` in the same page list.
    /// Used to materialize an implicit lock ahead of the request that
    /// discovered it.
    pub(crate) fn insert_before(&mut self, record: LockRecord, before: LockId) -> LockId {
        let page = record.page;
        debug_assert_eq!(page, self.arena[before].page);
        let prev = self.arena[before].prev;
        let id = self.arena.alloc(record);
        self.arena[id].prev = prev;
        self.arena[id].next = Some(before);
        self.arena[before].prev = Some(id);
        match prev {
            Some(p) => self.arena[p].next = Some(id),
            None => {
                self.heads
                    .get_mut(&page)
                    .expect("page list has a lock but no head")
                    .head = Some(id);
            }
        }
        id
    }

    /// Unlink a record from its page list, fixing up the head/tail anchors.
    /// Does not free the arena slot and does not touch the transaction list.
    pub(crate) fn unlink(&mut self, id: LockId) {
        let (page, prev, next) = {
            let rec = &self.arena[id];
            (rec.page, rec.prev, rec.next)
        };
        let head = self
            .heads
            .get_mut(&page)
            .expect("page list has a lock but no head");
        match prev {
            Some(p) => self.arena[p].next = next,
            None => head.head = next,
        }
        match next {
            Some(n) => self.arena[n].prev = prev,
            None => head.tail = prev,
        }
        self.arena[id].prev = None;
        self.arena[id].next = None;
    }

    /// Fast-path scan: a lock already owned by `owner` that covers the
    /// requested record and whose grant subsumes the new request (held lock
    /// exclusive, or request shared).
    pub(crate) fn find_owned_compatible(
        &self,
        page: PageKey,
        key: RecordKey,
        slot: SlotIndex,
        owner: TrxId,
        mode: LockMode,
    ) -> Option<LockId> {
        let head = self.heads.get(&page)?;
        let mut cur = head.head;
        while let Some(id) = cur {
            let rec = &self.arena[id];
            if rec.owner == owner
                && (rec.key == key || rec.slots.contains(slot))
                && (rec.mode == LockMode::Exclusive || mode == LockMode::Shared)
            {
                return Some(id);
            }
            cur = rec.next;
        }
        None
    }

    /// Compression target scan: another granted shared lock of the same
    /// owner on the same page.
    pub(crate) fn find_shared_same_owner(
        &self,
        page: PageKey,
        exclude: LockId,
        owner: TrxId,
    ) -> Option<LockId> {
        let head = self.heads.get(&page)?;
        let mut cur = head.head;
        while let Some(id) = cur {
            let rec = &self.arena[id];
            if id != exclude
                && rec.owner == owner
                && rec.mode == LockMode::Shared
                && rec.waiting == 0
            {
                return Some(id);
            }
            cur = rec.next;
        }
        None
    }

    /// Walk backward (older arrivals) from `of`, collecting the conflicting
    /// predecessors that bind it: either the nearest conflicting exclusive
    /// lock, or the contiguous newest-first run of conflicting shared locks
    /// up to (and excluding) the first exclusive boundary. The returned set
    /// is both the wait count and the recursion frontier of the deadlock
    /// search.
    pub(crate) fn conflicting_predecessors(&self, of: LockId) -> Vec<LockId> {
        let (key, slots, mode, owner, mut cur) = {
            let rec = &self.arena[of];
            (rec.key, rec.slots, rec.mode, rec.owner, rec.prev)
        };
        let mut matched = Vec::new();
        let mut has_shared = false;
        while let Some(id) = cur {
            let pred = &self.arena[id];
            if pred.covers_same_record(key, slots)
                && pred.owner != owner
                && pred.mode.conflicts(mode)
            {
                if pred.mode == LockMode::Exclusive {
                    // The exclusive boundary: already satisfied for the
                    // shared run ahead of it, binding when it is the first
                    // conflict found.
                    if !has_shared {
                        matched.push(id);
                    }
                    break;
                }
                has_shared = true;
                matched.push(id);
            }
            cur = pred.prev;
        }
        matched
    }

    /// Release a granted or abandoned lock: unlink it, wake the successors
    /// whose last conflicting predecessor this was, and free the arena slot.
    pub(crate) fn release(&mut self, id: LockId) {
        let (key, slots, mode, owner, mut cur) = {
            let rec = &self.arena[id];
            (rec.key, rec.slots, rec.mode, rec.owner, rec.next)
        };
        self.unlink(id);

        // Forward scan mirroring the predecessor rule: decrement the first
        // conflicting exclusive successor, or the contiguous run of
        // conflicting shared successors, signalling each one that reaches
        // zero.
        let mut has_shared = false;
        while let Some(sid) = cur {
            let next = self.arena[sid].next;
            let succ = &mut self.arena[sid];
            if succ.covers_same_record(key, slots)
                && succ.owner != owner
                && succ.mode.conflicts(mode)
            {
                if succ.mode == LockMode::Exclusive {
                    if !has_shared && succ.waiting > 0 {
                        succ.waiting -= 1;
                        if succ.waiting == 0 {
                            succ.cond.notify_one();
                        }
                    }
                    break;
                }
                has_shared = true;
                if succ.waiting > 0 {
                    succ.waiting -= 1;
                    if succ.waiting == 0 {
                        succ.cond.notify_one();
                    }
                }
            }
            cur = next;
        }

        self.arena.dealloc(id);
    }

    /// Drop a candidate that was never granted: unlink and free without the
    /// wake scan. No successor can have counted it, because the latch was
    /// held continuously since it was appended.
    pub(crate) fn discard(&mut self, id: LockId) {
        self.unlink(id);
        self.arena.dealloc(id);
    }

    /// Number of live lock objects on one page. Test/debug helper.
    pub(crate) fn page_lock_count(&self, page: PageKey) -> usize {
        let Some(head) = self.heads.get(&page) else {
            return 0;
        };
        let mut count = 0;
        let mut cur = head.head;
        while let Some(id) = cur {
            count += 1;
            cur = self.arena[id].next;
        }
        count
    }
}

/// Wait-for-graph search run synchronously for every new request, from the
/// just-appended `candidate`.
///
/// Returns `None` when a path leads back to `source` (granting would create
/// a cycle: deadlock), otherwise `Some(n)` where `n` is the number of
/// conflicting predecessors the candidate must wait on.
///
/// The graph is walked with an explicit stack over transaction ids: each
/// blocked transaction has exactly one pending request (its last lock), and
/// that request's conflicting predecessors are its out-edges. A visited set
/// bounds the walk on long or converging wait chains.
pub(crate) fn detect_deadlock(
    locks: &LockTable,
    trxs: &TrxTable,
    candidate: LockId,
    source: TrxId,
) -> Option<u32> {
    let preds = locks.conflicting_predecessors(candidate);
    let mut stack: Vec<TrxId> = preds.iter().map(|&id| locks.arena[id].owner).collect();
    let mut visited: HashSet<TrxId> = HashSet::new();

    while let Some(owner) = stack.pop() {
        if owner == source {
            return None;
        }
        if !visited.insert(owner) {
            continue;
        }
        // A transaction's only possible pending request is its most recent
        // lock; if that one is granted the transaction has no out-edges.
        let Some(last) = trxs.last_lock(owner) else {
            continue;
        };
        if locks.arena[last].waiting == 0 {
            continue;
        }
        for pred in locks.conflicting_predecessors(last) {
            stack.push(locks.arena[pred].owner);
        }
    }

    Some(preds.len() as u32)
}

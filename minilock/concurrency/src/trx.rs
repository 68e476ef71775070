//! Transaction table, undo log, and transaction-id generation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use minilock_common::{PageKey, RecordKey, SlotIndex, TableId, TrxId};

use crate::error::ConcurrencyError;
use crate::lock::{LockArena, LockId};

/// One before-image entry in a transaction's undo log.
///
/// Carries the page/slot coordinates alongside the key so that commit and
/// abort can clear the slot's implicit-owner stamp without consulting the
/// index.
#[derive(Debug, Clone)]
pub struct UndoRecord {
    pub table_id: TableId,
    pub page: PageKey,
    pub slot: SlotIndex,
    pub key: RecordKey,
    pub old_value: Vec<u8>,
    pub new_value: Vec<u8>,
}

/// Per-transaction state: the FIFO list of owned locks (threaded through the
/// lock arena via `next_in_trx`) and the ordered undo log.
#[derive(Default)]
pub(crate) struct TrxEntry {
    pub(crate) first_lock: Option<LockId>,
    pub(crate) last_lock: Option<LockId>,
    pub(crate) undo: Vec<UndoRecord>,
}

/// The transaction table. Presence of an entry is what "alive" means; commit
/// and abort remove the entry atomically under the manager's latches.
pub(crate) struct TrxTable {
    entries: HashMap<TrxId, TrxEntry>,
}

impl TrxTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub(crate) fn begin(&mut self, trx_id: TrxId) {
        self.entries.insert(trx_id, TrxEntry::default());
    }

    pub(crate) fn is_alive(&self, trx_id: TrxId) -> bool {
        self.entries.contains_key(&trx_id)
    }

    pub(crate) fn last_lock(&self, trx_id: TrxId) -> Option<LockId> {
        self.entries.get(&trx_id).and_then(|entry| entry.last_lock)
    }

    /// Append a lock at the tail of the owner's list. Returns `false` when
    /// the transaction is not alive (caller error; nothing is linked).
    ///
    /// When the current tail is still waiting, the new lock goes to the
    /// *head* instead and `last_lock` is left untouched: the tail is the
    /// owner's pending request, and the deadlock search follows `last_lock`
    /// to find a blocked transaction's out-edges. The only lock that can
    /// arrive while the owner is blocked is a materialized implicit lock,
    /// which is granted and must not shadow the pending request.
    pub(crate) fn append_lock(&mut self, trx_id: TrxId, lock: LockId, arena: &mut LockArena) -> bool {
        let Some(entry) = self.entries.get_mut(&trx_id) else {
            return false;
        };
        match entry.last_lock {
            Some(tail) if arena[tail].waiting > 0 => {
                arena[lock].next_in_trx = entry.first_lock;
                entry.first_lock = Some(lock);
            }
            Some(tail) => {
                arena[tail].next_in_trx = Some(lock);
                entry.last_lock = Some(lock);
            }
            None => {
                entry.first_lock = Some(lock);
                entry.last_lock = Some(lock);
            }
        }
        true
    }

    /// Remove a lock from the owner's list (used when a freshly granted
    /// shared lock is discarded after compression). The list is singly
    /// linked, so this walks from the head.
    pub(crate) fn unlink_lock(&mut self, trx_id: TrxId, lock: LockId, arena: &mut LockArena) {
        let Some(entry) = self.entries.get_mut(&trx_id) else {
            return;
        };
        let next = arena[lock].next_in_trx;
        if entry.first_lock == Some(lock) {
            entry.first_lock = next;
            if entry.last_lock == Some(lock) {
                entry.last_lock = None;
            }
            arena[lock].next_in_trx = None;
            return;
        }
        let mut cur = entry.first_lock;
        while let Some(id) = cur {
            if arena[id].next_in_trx == Some(lock) {
                arena[id].next_in_trx = next;
                if entry.last_lock == Some(lock) {
                    entry.last_lock = Some(id);
                }
                arena[lock].next_in_trx = None;
                return;
            }
            cur = arena[id].next_in_trx;
        }
    }

    /// Append an undo record. Returns `false` when the transaction is not
    /// alive.
    pub(crate) fn push_undo(&mut self, trx_id: TrxId, record: UndoRecord) -> bool {
        match self.entries.get_mut(&trx_id) {
            Some(entry) => {
                entry.undo.push(record);
                true
            }
            None => false,
        }
    }

    /// Detach and return the entry, ending the transaction's lifetime.
    pub(crate) fn remove(&mut self, trx_id: TrxId) -> Option<TrxEntry> {
        self.entries.remove(&trx_id)
    }
}

/// Allocator for transaction ids: monotonically increasing from 1, never
/// reused.
pub struct TrxIdGenerator {
    counter: AtomicU64,
}

impl TrxIdGenerator {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(1),
        }
    }

    /// Allocate the next id.
    pub fn next(&self) -> Result<TrxId, ConcurrencyError> {
        let mut cur = self.counter.load(Ordering::SeqCst);
        loop {
            if cur == u64::MAX {
                return Err(ConcurrencyError::TrxIdOverflow(cur));
            }
            match self.counter.compare_exchange_weak(
                cur,
                cur + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok(cur),
                Err(actual) => cur = actual,
            }
        }
    }

    /// The next id that would be handed out, without allocating it.
    pub fn current(&self) -> TrxId {
        self.counter.load(Ordering::SeqCst)
    }
}

impl Default for TrxIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

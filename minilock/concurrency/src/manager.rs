//! Public API of the concurrency core: lock acquisition/release and the
//! transaction lifecycle.
//!
//! Two latches protect the two tables. Every path that needs both takes the
//! lock-table latch strictly before the transaction-table latch, and the
//! transaction-table latch is never held across a sleep. The only suspension
//! point in the core is the monitor wait inside [`ConcurrencyManager::lock_acquire`].

use std::sync::Arc;

use minilock_common::{NO_TRX, PageKey, PageNum, RecordKey, SlotIndex, TableId, TrxId};
use minilock_storage::SlotStorage;
use parking_lot::Mutex;

use crate::error::{ConcurrencyError, ConcurrencyResult};
use crate::lock::{LockId, LockMode, LockRecord, LockTable, detect_deadlock};
use crate::trx::{TrxEntry, TrxIdGenerator, TrxTable, UndoRecord};

/// Record-granularity lock manager and transaction manager implementing
/// strict two-phase locking with synchronous deadlock detection, implicit
/// locking, and shared-lock compression.
pub struct ConcurrencyManager {
    /// Lock-table latch. Always taken before `trx_table`.
    lock_table: Mutex<LockTable>,
    /// Transaction-table latch. Nested inside `lock_table` where both are
    /// needed; taken alone otherwise.
    trx_table: Mutex<TrxTable>,
    trx_ids: TrxIdGenerator,
    storage: Arc<dyn SlotStorage>,
}

impl ConcurrencyManager {
    pub fn new(storage: Arc<dyn SlotStorage>) -> Self {
        Self {
            lock_table: Mutex::new(LockTable::new()),
            trx_table: Mutex::new(TrxTable::new()),
            trx_ids: TrxIdGenerator::new(),
            storage,
        }
    }

    /// Begin a new transaction and return its id (>= 1, monotonically
    /// increasing, never reused).
    pub fn trx_begin(&self) -> ConcurrencyResult<TrxId> {
        let trx_id = self.trx_ids.next()?;
        self.trx_table.lock().begin(trx_id);
        Ok(trx_id)
    }

    /// Whether the id names a live (begun, not yet committed/aborted)
    /// transaction. Used by the storage layer to decide whether an implicit
    /// owner stamp is current or stale.
    pub fn is_transaction_alive(&self, trx_id: TrxId) -> bool {
        self.trx_table.lock().is_alive(trx_id)
    }

    /// Acquire a record lock on behalf of `trx_id`, blocking until every
    /// conflicting predecessor has released.
    ///
    /// Returns the handle of the granted lock (which may be a previously
    /// granted object when the fast path or compression applies), or
    /// [`ConcurrencyError::Deadlock`] when granting would close a cycle in
    /// the wait-for graph. After a deadlock error the caller must abort the
    /// transaction itself.
    pub fn lock_acquire(
        &self,
        table_id: TableId,
        page_num: PageNum,
        key: RecordKey,
        slot: SlotIndex,
        trx_id: TrxId,
        mode: LockMode,
    ) -> ConcurrencyResult<LockId> {
        let page = PageKey::new(table_id, page_num);
        let mut locks = self.lock_table.lock();

        if !self.trx_table.lock().is_alive(trx_id) {
            return Err(ConcurrencyError::TransactionNotFound(trx_id));
        }

        // Fast path: a lock this transaction already holds subsumes the
        // request. Nothing is allocated.
        if let Some(held) = locks.find_owned_compatible(page, key, slot, trx_id, mode) {
            return Ok(held);
        }

        // FIFO fairness: every new request goes to the tail of the page
        // list and stays there.
        let candidate = locks.append(LockRecord::new(page, key, slot, mode, trx_id));

        let waiting = loop {
            let mut trxs = self.trx_table.lock();
            match detect_deadlock(&locks, &trxs, candidate, trx_id) {
                None => {
                    // Cycle back to the requester. Unwind the candidate;
                    // implicit-lock materializations already confirmed for
                    // other transactions stay in place.
                    drop(trxs);
                    locks.discard(candidate);
                    return Err(ConcurrencyError::Deadlock(trx_id));
                }
                Some(0) => {
                    // No explicit predecessor. The slot's implicit owner
                    // stamp is the one dependency the graph search cannot
                    // see: materialize it and search again.
                    let stamped = match self.storage.implicit_owner(page, slot) {
                        Ok(owner) => owner,
                        Err(err) => {
                            drop(trxs);
                            locks.discard(candidate);
                            return Err(err.into());
                        }
                    };
                    if stamped != NO_TRX && stamped != trx_id && trxs.is_alive(stamped) {
                        let materialized = locks.insert_before(
                            LockRecord::new(page, key, slot, LockMode::Exclusive, stamped),
                            candidate,
                        );
                        trxs.append_lock(stamped, materialized, &mut locks.arena);
                        continue;
                    }
                    trxs.append_lock(trx_id, candidate, &mut locks.arena);
                    break 0;
                }
                Some(count) => {
                    trxs.append_lock(trx_id, candidate, &mut locks.arena);
                    break count;
                }
            }
        };

        if waiting > 0 {
            // Monitor wait: the lock-table latch is released atomically
            // while the thread sleeps and reacquired on wake, so `waiting`
            // is only ever observed or changed under the latch. Releasers
            // signal exactly when the counter reaches zero.
            locks.arena[candidate].waiting = waiting;
            let cond = Arc::clone(&locks.arena[candidate].cond);
            while locks.arena[candidate].waiting > 0 {
                cond.wait(&mut locks);
            }
        }

        match mode {
            LockMode::Exclusive => {
                // Stamp the slot so later requests can see this ownership
                // without scanning, and so the next writer materializes it.
                self.storage.set_implicit_owner(page, slot, trx_id)?;
                Ok(candidate)
            }
            LockMode::Shared => Ok(self.compress_shared(&mut locks, page, candidate, trx_id)),
        }
    }

    /// Merge a freshly granted shared lock into another granted shared lock
    /// of the same owner on the same page, keeping at most one shared object
    /// per (transaction, page).
    fn compress_shared(
        &self,
        locks: &mut LockTable,
        page: PageKey,
        candidate: LockId,
        trx_id: TrxId,
    ) -> LockId {
        let Some(target) = locks.find_shared_same_owner(page, candidate, trx_id) else {
            return candidate;
        };
        let granted = locks.arena[candidate].slots;
        let merged = locks.arena[target].slots.union(granted);
        locks.arena[target].slots = merged;
        locks.unlink(candidate);
        self.trx_table
            .lock()
            .unlink_lock(trx_id, candidate, &mut locks.arena);
        locks.arena.dealloc(candidate);
        target
    }

    /// Release a single lock, waking any successor whose conflict count
    /// reaches zero as a result.
    ///
    /// Handles are plain arena indices; releasing a handle that was already
    /// freed (and possibly reused) is caller error. Under strict 2PL this
    /// path is only used by a caller backing out of an operation it has not
    /// logged; everything else goes through commit/abort.
    pub fn lock_release(&self, lock: LockId) -> ConcurrencyResult<()> {
        let mut locks = self.lock_table.lock();
        if !locks.arena.contains(lock) {
            return Err(ConcurrencyError::InvalidLockHandle(lock));
        }
        let owner = locks.arena[lock].owner;
        self.trx_table
            .lock()
            .unlink_lock(owner, lock, &mut locks.arena);
        locks.release(lock);
        Ok(())
    }

    /// Commit: release every lock the transaction holds (waking successors),
    /// discard its undo log, and clear its entry. Strict 2PL shrinking phase.
    pub fn trx_commit(&self, trx_id: TrxId) -> ConcurrencyResult<TrxId> {
        let mut locks = self.lock_table.lock();
        let entry = {
            let mut trxs = self.trx_table.lock();
            trxs.remove(trx_id)
                .ok_or(ConcurrencyError::TransactionNotFound(trx_id))?
        };
        self.release_all(&mut locks, &entry);
        self.clear_implicit_stamps(&entry, trx_id)?;
        Ok(trx_id)
    }

    /// Abort: replay the undo log in reverse chronological order against
    /// storage, then release every lock and clear the entry. Rollback runs
    /// before any release so that a waiter waking after this abort never
    /// observes the aborted transaction's writes.
    pub fn trx_abort(&self, trx_id: TrxId) -> ConcurrencyResult<TrxId> {
        let mut locks = self.lock_table.lock();
        let entry = {
            let mut trxs = self.trx_table.lock();
            trxs.remove(trx_id)
                .ok_or(ConcurrencyError::TransactionNotFound(trx_id))?
        };

        let mut rollback = Ok(());
        for record in entry.undo.iter().rev() {
            if let Err(err) = self
                .storage
                .apply_value(record.table_id, record.key, &record.old_value)
            {
                rollback = Err(err);
                break;
            }
        }

        // Locks are released even when rollback hit a storage error, so the
        // rest of the system stays runnable.
        self.release_all(&mut locks, &entry);
        self.clear_implicit_stamps(&entry, trx_id)?;
        rollback?;
        Ok(trx_id)
    }

    /// Record a before-image in the transaction's undo log. Append-only;
    /// ordering is preserved.
    pub fn trx_add_log(&self, trx_id: TrxId, record: UndoRecord) -> ConcurrencyResult<TrxId> {
        if self.trx_table.lock().push_undo(trx_id, record) {
            Ok(trx_id)
        } else {
            Err(ConcurrencyError::TransactionNotFound(trx_id))
        }
    }

    /// Number of live lock objects across all pages. Intended for tests and
    /// debugging.
    pub fn live_lock_count(&self) -> usize {
        self.lock_table.lock().arena.live()
    }

    fn release_all(&self, locks: &mut LockTable, entry: &TrxEntry) {
        let mut cur = entry.first_lock;
        while let Some(id) = cur {
            cur = locks.arena[id].next_in_trx;
            locks.release(id);
        }
    }

    /// Reset the implicit-owner stamp of every slot named in the undo log,
    /// if it still names the finishing transaction. Stamps left by exclusive
    /// locks that never logged a write go stale instead and are filtered by
    /// the aliveness check at materialization time.
    fn clear_implicit_stamps(&self, entry: &TrxEntry, trx_id: TrxId) -> ConcurrencyResult<()> {
        for record in &entry.undo {
            if self.storage.implicit_owner(record.page, record.slot)? == trx_id {
                self.storage
                    .set_implicit_owner(record.page, record.slot, NO_TRX)?;
            }
        }
        Ok(())
    }
}

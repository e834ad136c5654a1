//! Transaction Pool - Bounded Slot Store with Blocking Hand-off
//!
//! The pool is a fixed array of `capacity` slots shared by every generator and
//! every miner. It is the one place in the pipeline where producers and
//! consumers meet, so it is also the one place that needs mutual exclusion.
//!
//! ## Synchronization
//!
//! - A single `Mutex` guards the slot array, the occupied count and the
//!   statistics. A slot is either `None` or a complete `Transaction`; there is
//!   no intermediate state a reader could observe.
//! - `not_full` parks producers while every slot is taken.
//! - `not_empty` parks miners while no slot is taken.
//!
//! Waits use `Condvar::wait_timeout` in slices of [`WAIT_SLICE`] so that a
//! stop signal is honoured within a bounded time even if nobody notifies.
//!
//! ## Reservation order
//!
//! `reserve_batch` picks the highest reward first, then the oldest
//! transaction, then the lowest slot index. Whatever the order, a reserved
//! transaction is removed from its slot in the same critical section, so no
//! two reservations can return the same transaction.

use std::{
    cmp::Reverse,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
};

use crate::{
    error::PoolError,
    service::{ShutdownSignal, WAIT_SLICE},
    state::transaction::Transaction,
};

/// Slot array plus bookkeeping, guarded by the pool mutex.
struct Slots {
    slots: Vec<Option<Transaction>>,
    occupied: usize,
    /// Statistics: total transactions inserted
    stats_inserted: u64,
    /// Statistics: total transactions reserved by miners
    stats_reserved: u64,
    /// Statistics: total transactions handed back by miners
    stats_restored: u64,
}

impl Slots {
    fn place(&mut self, tx: Transaction) -> Result<usize, Transaction> {
        if self.occupied == self.slots.len() {
            return Err(tx);
        }
        let Some(index) = self.slots.iter().position(Option::is_none) else {
            return Err(tx);
        };
        self.slots[index] = Some(tx);
        self.occupied += 1;
        Ok(index)
    }

    fn take_batch(&mut self, max_count: usize) -> Vec<Transaction> {
        if max_count == 0 || self.occupied == 0 {
            return Vec::new();
        }

        let mut candidates: Vec<(usize, u32, u32)> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|tx| (i, tx.reward, tx.age)))
            .collect();
        candidates.sort_unstable_by_key(|&(i, reward, age)| (Reverse(reward), Reverse(age), i));

        let batch: Vec<Transaction> = candidates
            .into_iter()
            .take(max_count)
            .filter_map(|(i, _, _)| self.slots[i].take())
            .collect();

        self.occupied -= batch.len();
        self.stats_reserved += batch.len() as u64;
        batch
    }
}

/// Fixed-capacity transaction pool shared by generators and miners.
pub struct TransactionPool {
    inner: Mutex<Slots>,
    not_full: Condvar,
    not_empty: Condvar,
    capacity: usize,
}

impl TransactionPool {
    /// Creates a pool with `capacity` empty slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Slots {
                slots: vec![None; capacity],
                occupied: 0,
                stats_inserted: 0,
                stats_reserved: 0,
                stats_restored: 0,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    /// Every mutation completes before the guard is released, so a panic in
    /// another holder cannot leave a half-written slot behind.
    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the pool capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of occupied slots.
    pub fn len(&self) -> usize {
        self.lock().occupied
    }

    /// Returns true if no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attempts to place a transaction in a free slot without blocking.
    ///
    /// # Returns
    ///
    /// - `Ok(slot)` with the slot index the transaction now occupies
    /// - `Err(PoolError::Full(tx))` handing the transaction back if no slot is free
    pub fn try_insert(&self, tx: Transaction) -> Result<usize, PoolError> {
        let mut slots = self.lock();
        match slots.place(tx) {
            Ok(index) => {
                slots.stats_inserted += 1;
                drop(slots);
                self.not_empty.notify_one();
                Ok(index)
            }
            Err(tx) => Err(PoolError::Full(tx)),
        }
    }

    /// Places a transaction in a free slot, waiting while the pool is full.
    ///
    /// Returns `Err(PoolError::Interrupted)` if `shutdown` fires first; the
    /// transaction is then dropped without touching the pool.
    pub fn insert(&self, tx: Transaction, shutdown: &ShutdownSignal) -> Result<usize, PoolError> {
        let mut slots = self.lock();
        let mut pending = tx;
        loop {
            if shutdown.is_triggered() {
                return Err(PoolError::Interrupted);
            }
            match slots.place(pending) {
                Ok(index) => {
                    slots.stats_inserted += 1;
                    drop(slots);
                    self.not_empty.notify_one();
                    return Ok(index);
                }
                Err(returned) => pending = returned,
            }
            slots = self
                .not_full
                .wait_timeout(slots, WAIT_SLICE)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Reserves up to `max_count` transactions without blocking.
    ///
    /// The reserved slots are freed in the same critical section. The result
    /// is empty when the pool is empty.
    pub fn try_reserve_batch(&self, max_count: usize) -> Vec<Transaction> {
        let batch = self.lock().take_batch(max_count);
        if !batch.is_empty() {
            self.not_full.notify_all();
        }
        batch
    }

    /// Reserves up to `max_count` transactions, waiting while the pool is empty.
    ///
    /// The returned batch may be shorter than `max_count` if fewer transactions
    /// were outstanding; it is never empty unless `max_count` is zero.
    pub fn reserve_batch(
        &self,
        max_count: usize,
        shutdown: &ShutdownSignal,
    ) -> Result<Vec<Transaction>, PoolError> {
        if max_count == 0 {
            return Ok(Vec::new());
        }
        let mut slots = self.lock();
        loop {
            if shutdown.is_triggered() {
                return Err(PoolError::Interrupted);
            }
            if slots.occupied > 0 {
                let batch = slots.take_batch(max_count);
                drop(slots);
                self.not_full.notify_all();
                return Ok(batch);
            }
            slots = self
                .not_empty
                .wait_timeout(slots, WAIT_SLICE)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Returns whether a transaction with `id` currently occupies a slot.
    pub fn contains(&self, id: u64) -> bool {
        self.lock()
            .slots
            .iter()
            .flatten()
            .any(|tx| tx.id == id)
    }

    /// Puts transactions back into free slots without blocking.
    ///
    /// Used by miners to release a partial batch on shutdown. Returns how many
    /// transactions were restored; the remainder did not fit.
    pub fn restore(&self, transactions: Vec<Transaction>) -> usize {
        let mut slots = self.lock();
        let mut restored = 0;
        for tx in transactions {
            if slots.place(tx).is_err() {
                break;
            }
            restored += 1;
        }
        slots.stats_restored += restored as u64;
        drop(slots);
        if restored > 0 {
            self.not_empty.notify_all();
        }
        restored
    }

    /// Increments the age of every pending transaction.
    pub fn age_pending(&self) {
        let mut slots = self.lock();
        for tx in slots.slots.iter_mut().flatten() {
            tx.age = tx.age.saturating_add(1);
        }
    }

    /// Wakes every thread parked on the pool so it re-checks its stop signal.
    pub fn interrupt(&self) {
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    /// Returns a copy of every slot, in slot order.
    pub fn snapshot(&self) -> Vec<Option<Transaction>> {
        self.lock().slots.clone()
    }

    /// Returns statistics about the pool.
    pub fn stats(&self) -> PoolStats {
        let slots = self.lock();
        PoolStats {
            occupied: slots.occupied,
            capacity: self.capacity,
            total_inserted: slots.stats_inserted,
            total_reserved: slots.stats_reserved,
            total_restored: slots.stats_restored,
        }
    }
}

/// Statistics about the transaction pool.
///
/// `occupied == total_inserted + total_restored - total_reserved` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Current number of occupied slots
    pub occupied: usize,
    /// Maximum capacity
    pub capacity: usize,
    /// Total transactions inserted since creation
    pub total_inserted: u64,
    /// Total transactions reserved since creation
    pub total_reserved: u64,
    /// Total transactions restored by miners since creation
    pub total_restored: u64,
}

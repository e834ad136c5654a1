//! Run-wide counters shared by every service.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

/// Statistics for pipeline monitoring
#[derive(Debug, Clone, Default)]
pub struct ChainStats {
    /// Transactions produced by generators and placed in the pool
    pub transactions_generated: Arc<AtomicU64>,

    /// Blocks written to the block channel
    pub blocks_published: Arc<AtomicU64>,

    /// Block publications that failed
    pub publish_failures: Arc<AtomicU64>,

    /// Reservations that came back short of a full block
    pub underflows: Arc<AtomicU64>,

    /// Blocks appended to the chain
    pub blocks_accepted: Arc<AtomicU64>,

    /// Blocks refused because their link was stale
    pub rejected_stale: Arc<AtomicU64>,

    /// Blocks refused because of a transaction conflict
    pub rejected_conflict: Arc<AtomicU64>,

    /// Blocks refused because the chain was already complete
    pub rejected_complete: Arc<AtomicU64>,

    /// Channel records that were corrupted or incomplete
    pub corrupted_records: Arc<AtomicU64>,
}

impl ChainStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &Arc<AtomicU64>| c.load(Ordering::Relaxed);
        StatsSnapshot {
            transactions_generated: load(&self.transactions_generated),
            blocks_published: load(&self.blocks_published),
            publish_failures: load(&self.publish_failures),
            underflows: load(&self.underflows),
            blocks_accepted: load(&self.blocks_accepted),
            rejected_stale: load(&self.rejected_stale),
            rejected_conflict: load(&self.rejected_conflict),
            rejected_complete: load(&self.rejected_complete),
            corrupted_records: load(&self.corrupted_records),
        }
    }
}

/// Point-in-time copy of [`ChainStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub transactions_generated: u64,
    pub blocks_published: u64,
    pub publish_failures: u64,
    pub underflows: u64,
    pub blocks_accepted: u64,
    pub rejected_stale: u64,
    pub rejected_conflict: u64,
    pub rejected_complete: u64,
    pub corrupted_records: u64,
}

impl StatsSnapshot {
    /// Blocks the validator refused for any reason.
    pub fn blocks_rejected(&self) -> u64 {
        self.rejected_stale + self.rejected_conflict + self.rejected_complete
    }
}

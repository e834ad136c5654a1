//! Validator Service
//!
//! The single reader of the block channel and the only writer of the chain
//! tip and the ledger.
//!
//! ## Per-block flow
//!
//!
//! WaitingForBlock ──recv──► Verifying ──► Accepted ──┐
//!        ▲                       │                   │
//!        │                       └──────► Rejected ──┤
//!        └──────────────── age pending ◄─────────────┘
//!
//!
//! Checks run in a fixed order: link to the current tip, transaction
//! conflicts, then chain completion. The first failing check decides the
//! rejection reason.

use std::{collections::HashSet, sync::Arc};

use slog::Logger;
use tokio::sync::Notify;

use crate::{
    channel::BlockReceiver,
    error::{ChannelError, StartupError, ValidationError},
    mempool::TransactionPool,
    service::{ServiceHandle, ShutdownSignal},
    state::{
        block::Block,
        chain_tip::{ChainTip, ChainTipWriter},
        ledger::Ledger,
    },
    stats::ChainStats,
};

/// Verifies blocks and extends the chain.
pub struct Validator {
    pool: Arc<TransactionPool>,
    tip: ChainTipWriter,
    ledger: Ledger,
    stats: ChainStats,
    completion: Arc<Notify>,
    logger: Logger,
}

impl Validator {
    pub fn new(
        pool: Arc<TransactionPool>,
        tip: ChainTipWriter,
        ledger: Ledger,
        stats: ChainStats,
        completion: Arc<Notify>,
        logger: Logger,
    ) -> Self {
        Self {
            pool,
            tip,
            ledger,
            stats,
            completion,
            logger: logger.new(slog::o!("service" => "validator")),
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn tip(&self) -> Arc<ChainTip> {
        self.tip.current()
    }

    /// Checks a block against the current tip, the pool and the ledger
    /// without changing any of them.
    pub fn verify(&self, block: &Block) -> Result<(), ValidationError> {
        let tip = self.tip.current();
        if !block.extends(&tip.hash) {
            return Err(ValidationError::StaleOrForkedLink {
                expected: tip.hash.clone(),
                found: block.previous_block_hash.clone(),
            });
        }

        let mut seen = HashSet::with_capacity(block.len());
        for tx in block.transactions.iter() {
            if !seen.insert(tx.id) || self.pool.contains(tx.id) || self.ledger.is_committed(tx.id) {
                return Err(ValidationError::TransactionConflict { tx_id: tx.id });
            }
        }

        if self.ledger.is_full() {
            return Err(ValidationError::ChainComplete {
                length: self.ledger.len(),
            });
        }

        Ok(())
    }

    /// Verifies a block and, if it passes, makes it the new tip.
    ///
    /// Pending transactions are aged whatever the outcome.
    pub fn process(&mut self, block: Block) -> Result<Arc<ChainTip>, ValidationError> {
        let outcome = match self.verify(&block) {
            Ok(()) => Ok(self.accept(block)),
            Err(e) => {
                self.reject(&block, &e);
                Err(e)
            }
        };
        self.pool.age_pending();
        outcome
    }

    fn accept(&mut self, block: Block) -> Arc<ChainTip> {
        let tip = self.tip.advance(block.fingerprint());
        ChainStats::bump(&self.stats.blocks_accepted);

        slog::info!(
            self.logger,
            "Block accepted";
            "block_id" => &block.block_id,
            "height" => tip.block_count,
            "hash" => &tip.hash,
        );

        self.ledger.append(block);
        if self.ledger.is_full() {
            slog::info!(self.logger, "Chain complete"; "length" => self.ledger.len());
            self.completion.notify_one();
        }
        tip
    }

    fn reject(&self, block: &Block, reason: &ValidationError) {
        let counter = match reason {
            ValidationError::StaleOrForkedLink { .. } => &self.stats.rejected_stale,
            ValidationError::TransactionConflict { .. } => &self.stats.rejected_conflict,
            ValidationError::ChainComplete { .. } => &self.stats.rejected_complete,
        };
        ChainStats::bump(counter);
        slog::debug!(
            self.logger,
            "Block rejected";
            "block_id" => &block.block_id,
            "reason" => %reason,
        );
    }

    /// Spawns the validator on a dedicated thread. The handle yields the
    /// ledger once the validator stops.
    pub fn spawn(self, receiver: BlockReceiver) -> Result<ServiceHandle<Ledger>, StartupError> {
        ServiceHandle::spawn("validator", move |shutdown| self.run(receiver, &shutdown))
    }

    fn run(mut self, mut receiver: BlockReceiver, shutdown: &ShutdownSignal) -> Ledger {
        slog::info!(
            self.logger,
            "Validator started";
            "chain_length" => self.ledger.capacity(),
            "tx_per_block" => receiver.tx_per_block(),
        );

        loop {
            match receiver.recv(shutdown) {
                Ok(block) => match self.process(block) {
                    Ok(_) => {}
                    // Already logged and counted by reject
                    Err(_) => {}
                },
                Err(e @ (ChannelError::Corrupted(_) | ChannelError::Truncated { .. })) => {
                    ChainStats::bump(&self.stats.corrupted_records);
                    slog::warn!(self.logger, "Discarded block record"; "error" => %e);
                }
                Err(ChannelError::Interrupted) => break,
                Err(ChannelError::Disconnected) => {
                    slog::info!(self.logger, "All miners gone, validator stopping");
                    break;
                }
            }
        }

        let tip = self.tip.current();
        slog::info!(
            self.logger,
            "Validator shutting down";
            "blocks" => self.ledger.len(),
            "tip" => &tip.hash,
        );
        self.ledger
    }
}

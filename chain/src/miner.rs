//! Miner Service
//!
//! A miner repeatedly reserves a batch of transactions, links it to the chain
//! tip it observed and publishes the block on the block channel.
//!
//! ## Short batches
//!
//! The pool may hold fewer transactions than a block needs. The miner keeps
//! whatever it reserved and tops the batch up on the next pass, backing off
//! between attempts. A partial batch is never published. When the miner is
//! stopped, the held transactions go back to the pool.
//!
//! ## Races
//!
//! Several miners can assemble against the same tip. The validator accepts
//! whichever block reaches it first; the others fail the link check.

use std::{mem, sync::Arc, time::Duration};

use slog::Logger;

use crate::{
    channel::BlockSender,
    error::{BlockError, ChannelError, PoolError, StartupError},
    mempool::TransactionPool,
    service::{ServiceHandle, ShutdownSignal},
    state::{
        block::{Block, BlockTransactions},
        chain_tip::ChainTipReader,
        now,
        transaction::Transaction,
    },
    stats::ChainStats,
};

/// One miner and the batch it is currently filling.
pub struct MinerWorker {
    id: u32,
    pool: Arc<TransactionPool>,
    tip: ChainTipReader,
    sender: BlockSender,
    backoff: Duration,
    stats: ChainStats,
    logger: Logger,
    held: Vec<Transaction>,
    sequence: u64,
}

impl MinerWorker {
    pub fn new(
        id: u32,
        pool: Arc<TransactionPool>,
        tip: ChainTipReader,
        sender: BlockSender,
        backoff: Duration,
        stats: ChainStats,
        logger: Logger,
    ) -> Self {
        let tx_per_block = sender.tx_per_block();
        Self {
            id,
            pool,
            tip,
            sender,
            backoff,
            stats,
            logger: logger.new(slog::o!("miner" => id)),
            held: Vec::with_capacity(tx_per_block),
            sequence: 0,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Transactions reserved but not yet published.
    pub fn held(&self) -> &[Transaction] {
        &self.held
    }

    /// Spawns the miner on a dedicated thread.
    ///
    /// The handle yields the number of blocks this miner published.
    pub fn spawn(self) -> Result<ServiceHandle<u64>, StartupError> {
        let name = format!("miner-{}", self.id);
        ServiceHandle::spawn(name, move |shutdown| self.run(&shutdown))
    }

    /// Tops up the held batch and, once it is complete, assembles a block
    /// against the current chain tip.
    ///
    /// # Returns
    ///
    /// - `Ok(block)` when a full batch was assembled
    /// - `Err(PoolError::Underflow)` when the batch is still short; the
    ///   reserved transactions stay held for the next attempt
    /// - `Err(PoolError::Interrupted)` when `shutdown` fired while waiting
    pub fn assemble(&mut self, shutdown: &ShutdownSignal) -> Result<Block, PoolError> {
        let tx_per_block = self.sender.tx_per_block();
        let tip = self.tip.load();

        let wanted = tx_per_block.saturating_sub(self.held.len());
        let batch = self.pool.reserve_batch(wanted, shutdown)?;
        self.held.extend(batch);

        if self.held.len() < tx_per_block {
            return Err(PoolError::Underflow {
                reserved: self.held.len(),
                wanted: tx_per_block,
            });
        }

        let transactions = BlockTransactions::new(mem::take(&mut self.held), tx_per_block)
            .map_err(|BlockError::SizeMismatch { expected, actual }| PoolError::Underflow {
                reserved: actual,
                wanted: expected,
            })?;

        let block_id = block_id(self.id, self.sequence);
        self.sequence += 1;

        Ok(Block::new(block_id, tip.hash.clone(), now(), transactions, 0))
    }

    fn run(mut self, shutdown: &ShutdownSignal) -> u64 {
        let mut published = 0u64;

        slog::info!(
            self.logger,
            "Miner started";
            "tx_per_block" => self.sender.tx_per_block(),
        );

        while !shutdown.is_triggered() {
            match self.assemble(shutdown) {
                Ok(block) => match self.sender.send(&block, shutdown) {
                    Ok(()) => {
                        published += 1;
                        ChainStats::bump(&self.stats.blocks_published);
                        slog::debug!(
                            self.logger,
                            "Block published";
                            "block_id" => &block.block_id,
                            "previous_hash" => &block.previous_block_hash,
                        );
                    }
                    Err(ChannelError::Interrupted | ChannelError::Disconnected) => {
                        // Not written, so the transactions are still ours
                        self.held = block.transactions.into_inner();
                        break;
                    }
                    Err(e) => {
                        ChainStats::bump(&self.stats.publish_failures);
                        slog::error!(
                            self.logger,
                            "Failed to publish block";
                            "block_id" => &block.block_id,
                            "error" => %e,
                        );
                    }
                },
                Err(PoolError::Underflow { reserved, wanted }) => {
                    ChainStats::bump(&self.stats.underflows);
                    slog::debug!(
                        self.logger,
                        "Pool underflow, holding partial batch";
                        "reserved" => reserved,
                        "wanted" => wanted,
                    );
                    if !shutdown.sleep(self.backoff) {
                        break;
                    }
                }
                Err(PoolError::Interrupted) => break,
                Err(e) => {
                    slog::warn!(self.logger, "Reservation failed"; "error" => %e);
                }
            }
        }

        self.release_held();

        slog::info!(
            self.logger,
            "Miner shutting down";
            "published" => published,
        );
        published
    }

    /// Hands held transactions back to the pool.
    fn release_held(&mut self) {
        if self.held.is_empty() {
            return;
        }
        let held = mem::take(&mut self.held);
        let total = held.len();
        let restored = self.pool.restore(held);
        if restored < total {
            slog::warn!(
                self.logger,
                "Pool full, dropped held transactions";
                "restored" => restored,
                "dropped" => total - restored,
            );
        } else {
            slog::debug!(self.logger, "Restored held transactions"; "count" => restored);
        }
    }
}

/// Id of the `sequence`-th block assembled by miner `miner`. Always fits in
/// [`BLOCK_ID_LEN`](crate::state::block::BLOCK_ID_LEN) bytes.
fn block_id(miner: u32, sequence: u64) -> String {
    format!("BLK-{miner}-{sequence}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::{block_channel, codec},
        state::block::{BLOCK_ID_LEN, genesis_hash},
    };
    use std::{thread, time::Instant};

    fn quiet_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn create_tx(id: u64, reward: u32) -> Transaction {
        Transaction::new(id, 1, 2, 10, reward, 1_700_000_000)
    }

    fn create_miner(
        pool: &Arc<TransactionPool>,
        tx_per_block: usize,
        channel_capacity: usize,
    ) -> (MinerWorker, crate::channel::BlockReceiver, ChainStats) {
        let (tip, _writer) = ChainTipReader::new();
        let (sender, receiver) = block_channel(tx_per_block, channel_capacity);
        let stats = ChainStats::new();
        let miner = MinerWorker::new(
            5,
            Arc::clone(pool),
            tip,
            sender,
            Duration::from_millis(5),
            stats.clone(),
            quiet_logger(),
        );
        (miner, receiver, stats)
    }

    #[test]
    fn test_assemble_full_block() {
        let pool = Arc::new(TransactionPool::new(5));
        for id in 1..=5 {
            pool.try_insert(create_tx(id, 1)).unwrap();
        }
        let (mut miner, _rx, _stats) = create_miner(&pool, 3, 4);

        let block = miner.assemble(&ShutdownSignal::new()).unwrap();
        assert_eq!(block.len(), 3);
        assert_eq!(block.block_id, "BLK-5-0");
        assert_eq!(block.previous_block_hash, genesis_hash());
        assert_eq!(block.nonce, 0);
        assert_eq!(pool.len(), 2);
        assert!(miner.held().is_empty());

        let next = pool.try_insert(create_tx(6, 1));
        assert!(next.is_ok());
        let block = miner.assemble(&ShutdownSignal::new()).unwrap();
        assert_eq!(block.block_id, "BLK-5-1");
    }

    #[test]
    fn test_underflow_holds_partial_batch() {
        let pool = Arc::new(TransactionPool::new(5));
        pool.try_insert(create_tx(1, 1)).unwrap();
        pool.try_insert(create_tx(2, 1)).unwrap();
        let (mut miner, _rx, _stats) = create_miner(&pool, 3, 4);

        let err = miner.assemble(&ShutdownSignal::new()).unwrap_err();
        assert!(matches!(
            err,
            PoolError::Underflow {
                reserved: 2,
                wanted: 3
            }
        ));
        assert_eq!(miner.held().len(), 2);
        assert!(pool.is_empty());

        // Topping up needs only the missing transaction
        pool.try_insert(create_tx(3, 1)).unwrap();
        pool.try_insert(create_tx(4, 1)).unwrap();
        let block = miner.assemble(&ShutdownSignal::new()).unwrap();
        assert_eq!(block.len(), 3);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_miner_publishes_and_stops() {
        let pool = Arc::new(TransactionPool::new(8));
        for id in 1..=6 {
            pool.try_insert(create_tx(id, 1)).unwrap();
        }
        let (miner, mut receiver, stats) = create_miner(&pool, 3, 4);
        let mut handle = miner.spawn().unwrap();

        let stop = ShutdownSignal::new();
        let first = receiver.recv(&stop).unwrap();
        let second = receiver.recv(&stop).unwrap();
        assert_ne!(first.block_id, second.block_id);

        let published = handle.shutdown().unwrap();
        assert_eq!(published, 2);
        assert_eq!(stats.snapshot().blocks_published, 2);
    }

    #[test]
    fn test_held_batch_restored_on_stop() {
        let pool = Arc::new(TransactionPool::new(5));
        pool.try_insert(create_tx(1, 1)).unwrap();
        let (miner, _rx, stats) = create_miner(&pool, 3, 4);
        let mut handle = miner.spawn().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while stats.snapshot().underflows == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert!(stats.snapshot().underflows > 0);

        handle.shutdown().unwrap();
        assert!(pool.contains(1));
        assert_eq!(pool.stats().total_restored, 1);
        assert_eq!(stats.snapshot().blocks_published, 0);
    }

    #[test]
    fn test_unsent_block_restored_on_stop() {
        let pool = Arc::new(TransactionPool::new(8));
        for id in 1..=4 {
            pool.try_insert(create_tx(id, 1)).unwrap();
        }
        // Room for one record, and nobody reads it
        let (miner, _rx, stats) = create_miner(&pool, 2, 1);
        let mut handle = miner.spawn().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while (stats.snapshot().blocks_published == 0 || !pool.is_empty())
            && Instant::now() < deadline
        {
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(stats.snapshot().blocks_published, 1);
        assert!(pool.is_empty());

        // Second block is assembled and stuck waiting for channel room
        thread::sleep(Duration::from_millis(30));
        let published = handle.shutdown().unwrap();

        assert_eq!(published, 1);
        assert_eq!(pool.stats().total_restored, 2);
        assert!(pool.contains(3));
        assert!(pool.contains(4));
        assert_eq!(stats.snapshot().publish_failures, 0);
    }

    #[test]
    fn test_longest_block_id_fits_record() {
        let id = block_id(u32::MAX, u64::MAX);
        assert_eq!(id, "BLK-4294967295-18446744073709551615");
        assert!(id.len() <= BLOCK_ID_LEN);

        let pool = Arc::new(TransactionPool::new(2));
        pool.try_insert(create_tx(1, 1)).unwrap();
        let (mut miner, _rx, _stats) = create_miner(&pool, 1, 1);
        let mut block = miner.assemble(&ShutdownSignal::new()).unwrap();
        block.block_id = id;
        assert!(codec::encode(&block).is_ok());
    }
}

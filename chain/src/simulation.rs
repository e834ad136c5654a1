//! Simulation Supervisor
//!
//! Wires the pool, the block channel, the chain tip and the statistics
//! together and starts every service on its own thread.
//!
//! ## Shutdown order
//!
//! Generators and miners are stopped first and joined, so miners can hand
//! their held batches back to a pool that still exists. The validator is
//! stopped last and returns the ledger. Shared state is released only after
//! every thread has been joined.

use std::{sync::Arc, time::Duration};

use slog::Logger;
use tokio::sync::Notify;

use crate::{
    channel::block_channel,
    config::SimulationConfig,
    error::StartupError,
    generator::TransactionGenerator,
    mempool::{PoolStats, TransactionPool},
    miner::MinerWorker,
    service::ServiceHandle,
    state::{
        chain_tip::{ChainTip, ChainTipReader},
        ledger::Ledger,
    },
    stats::{ChainStats, StatsSnapshot},
    validator::Validator,
};

/// Outcome of a finished run.
#[derive(Debug, Clone)]
pub struct SimulationReport {
    /// Blocks accepted during the run, in chain order
    pub ledger: Ledger,
    /// Counters at the moment every service had stopped
    pub stats: StatsSnapshot,
    /// Pool state at the same moment
    pub pool: PoolStats,
}

/// A running simulation.
pub struct Simulation {
    config: SimulationConfig,
    pool: Arc<TransactionPool>,
    tip: ChainTipReader,
    stats: ChainStats,
    completion: Arc<Notify>,
    generators: Vec<ServiceHandle<u64>>,
    miners: Vec<ServiceHandle<u64>>,
    validator: ServiceHandle<Ledger>,
    logger: Logger,
}

impl Simulation {
    /// Starts the validator, then the miners, then the generators.
    ///
    /// Fails if a count in `config` is zero or above its limit, or if a
    /// thread cannot be spawned.
    /// Services started before a spawn failure are stopped when their
    /// handles drop.
    pub fn start(config: SimulationConfig, logger: Logger) -> Result<Self, StartupError> {
        config.validate_counts()?;

        let pool = Arc::new(TransactionPool::new(config.pool_capacity));
        let (tip, tip_writer) = ChainTipReader::new();
        let (sender, receiver) = block_channel(config.tx_per_block, config.channel_capacity);
        let stats = ChainStats::new();
        let completion = Arc::new(Notify::new());

        slog::info!(
            logger,
            "Starting simulation";
            "producers" => config.num_producers,
            "miners" => config.num_miners,
            "pool_capacity" => config.pool_capacity,
            "tx_per_block" => config.tx_per_block,
            "chain_length" => config.chain_length,
        );

        let validator = Validator::new(
            Arc::clone(&pool),
            tip_writer,
            Ledger::new(config.chain_length, config.tx_per_block),
            stats.clone(),
            Arc::clone(&completion),
            logger.clone(),
        )
        .spawn(receiver)?;

        let backoff = Duration::from_millis(config.miner_backoff_ms);
        // Counts are bounded by validate_counts, so ids stay within u32
        let miners = (1u32..)
            .take(config.num_miners)
            .map(|id| {
                MinerWorker::new(
                    id,
                    Arc::clone(&pool),
                    tip.clone(),
                    sender.clone(),
                    backoff,
                    stats.clone(),
                    logger.clone(),
                )
                .spawn()
            })
            .collect::<Result<Vec<_>, _>>()?;
        // Miners hold the only senders from here on
        drop(sender);

        let generators = (1u32..)
            .take(config.num_producers)
            .map(|id| {
                TransactionGenerator::new(id, config.generator).spawn(
                    Arc::clone(&pool),
                    stats.clone(),
                    logger.clone(),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            config,
            pool,
            tip,
            stats,
            completion,
            generators,
            miners,
            validator,
            logger,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Notified once when the chain reaches its configured length.
    pub fn completion(&self) -> Arc<Notify> {
        Arc::clone(&self.completion)
    }

    /// Returns true once the chain holds `chain_length` blocks.
    pub fn is_complete(&self) -> bool {
        self.tip.load().block_count >= self.config.chain_length as u64
    }

    /// Blocks the calling thread until the chain is complete or `timeout`
    /// elapses. Returns whether the chain completed.
    pub fn wait_for_completion(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while !self.is_complete() {
            if std::time::Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        true
    }

    pub fn tip(&self) -> Arc<ChainTip> {
        self.tip.load()
    }

    pub fn pool(&self) -> &Arc<TransactionPool> {
        &self.pool
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Logs pool occupancy and, at debug level, every pending transaction.
    pub fn log_pool_snapshot(&self) {
        let pool_stats = self.pool.stats();
        let stats = self.stats.snapshot();
        let tip = self.tip.load();

        slog::info!(
            self.logger,
            "Pool status";
            "occupied" => pool_stats.occupied,
            "capacity" => pool_stats.capacity,
            "total_inserted" => pool_stats.total_inserted,
            "total_reserved" => pool_stats.total_reserved,
            "blocks_accepted" => stats.blocks_accepted,
            "blocks_rejected" => stats.blocks_rejected(),
            "height" => tip.block_count,
        );

        for (slot, tx) in self.pool.snapshot().iter().enumerate() {
            if let Some(tx) = tx {
                slog::debug!(
                    self.logger,
                    "Pending transaction";
                    "slot" => slot,
                    "tx_id" => tx.id,
                    "reward" => tx.reward,
                    "age" => tx.age,
                );
            }
        }
    }

    /// Stops every service, joins them and returns what the run produced.
    pub fn shutdown(mut self) -> SimulationReport {
        slog::info!(self.logger, "Shutting down simulation");

        for handle in self.generators.iter().chain(self.miners.iter()) {
            handle.stop();
        }
        self.pool.interrupt();

        // A panicked service is logged by join_logged and counts as zero
        let mut inserted = 0;
        for handle in &mut self.generators {
            inserted += handle.join_logged(&self.logger).unwrap_or_default();
        }
        let mut published = 0;
        for handle in &mut self.miners {
            published += handle.join_logged(&self.logger).unwrap_or_default();
        }

        self.validator.stop();
        let ledger = match self.validator.join_logged(&self.logger) {
            Some(ledger) => ledger,
            None => {
                slog::error!(self.logger, "Validator ledger lost");
                Ledger::new(self.config.chain_length, self.config.tx_per_block)
            }
        };

        let report = SimulationReport {
            ledger,
            stats: self.stats.snapshot(),
            pool: self.pool.stats(),
        };

        slog::info!(
            self.logger,
            "Simulation stopped";
            "inserted" => inserted,
            "published" => published,
            "blocks" => report.ledger.len(),
            "rejected" => report.stats.blocks_rejected(),
            "pending" => report.pool.occupied,
        );
        report
    }
}

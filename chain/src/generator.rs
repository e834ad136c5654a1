//! Transaction Generator Service
//!
//! Each generator runs on its own thread and feeds synthetic transactions into
//! the shared pool at a fixed pace. It never touches blocks or the chain tip.
//!
//! ## Backpressure
//!
//! A generator first tries a non-blocking insert. When the pool is full it
//! logs the condition and falls back to the blocking insert, so a transaction
//! is never dropped while the run is live.

use std::{sync::Arc, time::Duration};

use rand::Rng;
use slog::Logger;

use crate::{
    config::GeneratorParams,
    error::{PoolError, StartupError},
    mempool::TransactionPool,
    service::{ServiceHandle, ShutdownSignal},
    state::{now, transaction::Transaction},
    stats::ChainStats,
};

/// Highest receiver id a generated transaction can address.
pub const MAX_RECEIVER_ID: u32 = 1000;

/// Highest value a generated transaction can carry.
pub const MAX_VALUE: u32 = 100;

/// Produces transactions for one generator instance.
#[derive(Debug, Clone)]
pub struct TransactionGenerator {
    id: u32,
    params: GeneratorParams,
    counter: u32,
}

impl TransactionGenerator {
    pub fn new(id: u32, params: GeneratorParams) -> Self {
        Self {
            id,
            params,
            counter: 0,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Number of transactions built so far.
    pub fn produced(&self) -> u32 {
        self.counter
    }

    /// Builds the next transaction. Ids are unique per generator and strictly
    /// increasing.
    pub fn next_transaction<R: Rng>(&mut self, rng: &mut R) -> Transaction {
        let id = Transaction::compose_id(self.id, self.counter);
        self.counter = self.counter.wrapping_add(1);
        Transaction::new(
            id,
            self.id,
            rng.gen_range(1..=MAX_RECEIVER_ID),
            rng.gen_range(1..=MAX_VALUE),
            self.params.reward,
            now(),
        )
    }

    /// Spawns the generator on a dedicated thread.
    ///
    /// The handle yields the number of transactions placed in the pool.
    pub fn spawn(
        self,
        pool: Arc<TransactionPool>,
        stats: ChainStats,
        logger: Logger,
    ) -> Result<ServiceHandle<u64>, StartupError> {
        let name = format!("generator-{}", self.id);
        let logger = logger.new(slog::o!("generator" => self.id));
        ServiceHandle::spawn(name, move |shutdown| {
            self.run(&pool, &stats, &shutdown, &logger)
        })
    }

    fn run(
        mut self,
        pool: &TransactionPool,
        stats: &ChainStats,
        shutdown: &ShutdownSignal,
        logger: &Logger,
    ) -> u64 {
        let interval = Duration::from_millis(self.params.interval_ms);
        let mut rng = rand::thread_rng();
        let mut inserted = 0u64;

        slog::info!(
            logger,
            "Transaction generator started";
            "reward" => self.params.reward,
            "interval_ms" => self.params.interval_ms,
        );

        while !shutdown.is_triggered() {
            let tx = self.next_transaction(&mut rng);
            let placed = match pool.try_insert(tx) {
                Ok(slot) => Ok(slot),
                Err(PoolError::Full(tx)) => {
                    slog::debug!(
                        logger,
                        "Pool full, waiting for a free slot";
                        "tx_id" => tx.id,
                    );
                    pool.insert(tx, shutdown)
                }
                Err(e) => Err(e),
            };

            match placed {
                Ok(slot) => {
                    inserted += 1;
                    ChainStats::bump(&stats.transactions_generated);
                    slog::trace!(
                        logger,
                        "Transaction added to pool";
                        "tx_id" => tx.id,
                        "slot" => slot,
                    );
                }
                Err(PoolError::Interrupted) => break,
                Err(e) => {
                    slog::warn!(logger, "Transaction not placed"; "tx_id" => tx.id, "error" => %e);
                }
            }

            if !shutdown.sleep(interval) {
                break;
            }
        }

        slog::info!(
            logger,
            "Transaction generator shutting down";
            "inserted" => inserted,
        );
        inserted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};
    use std::{collections::HashSet, thread, time::Instant};

    fn quiet_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn fast_params() -> GeneratorParams {
        GeneratorParams {
            reward: 2,
            interval_ms: 1,
        }
    }

    #[test]
    fn test_transaction_fields() {
        let mut generator = TransactionGenerator::new(7, fast_params());
        let mut rng = StdRng::seed_from_u64(42);

        for counter in 0..200 {
            let tx = generator.next_transaction(&mut rng);
            assert_eq!(tx.id, Transaction::compose_id(7, counter));
            assert_eq!(tx.sender_id, 7);
            assert!((1..=MAX_RECEIVER_ID).contains(&tx.receiver_id));
            assert!((1..=MAX_VALUE).contains(&tx.value));
            assert_eq!(tx.reward, 2);
            assert_eq!(tx.age, 0);
        }
        assert_eq!(generator.produced(), 200);
    }

    #[test]
    fn test_ids_unique_across_generators() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut a = TransactionGenerator::new(1, fast_params());
        let mut b = TransactionGenerator::new(2, fast_params());

        let mut ids = HashSet::new();
        for _ in 0..100 {
            assert!(ids.insert(a.next_transaction(&mut rng).id));
            assert!(ids.insert(b.next_transaction(&mut rng).id));
        }
    }

    #[test]
    fn test_generator_fills_pool_and_stops() {
        let pool = Arc::new(TransactionPool::new(4));
        let stats = ChainStats::new();
        let mut handle = TransactionGenerator::new(3, fast_params())
            .spawn(Arc::clone(&pool), stats.clone(), quiet_logger())
            .unwrap();

        // Pool fills up and the generator parks on the blocking insert
        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.len() < 4 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(pool.len(), 4);
        thread::sleep(Duration::from_millis(30));
        assert!(handle.is_running());

        let inserted = handle.shutdown().unwrap();
        assert_eq!(inserted, 4);
        assert_eq!(stats.snapshot().transactions_generated, 4);
        assert!(!handle.is_running());
    }

    #[test]
    fn test_blocked_generator_resumes_after_reservation() {
        let pool = Arc::new(TransactionPool::new(2));
        let mut handle = TransactionGenerator::new(1, fast_params())
            .spawn(Arc::clone(&pool), ChainStats::new(), quiet_logger())
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.len() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        let first = pool.try_reserve_batch(2);
        assert_eq!(first.len(), 2);

        while pool.stats().total_inserted < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        let inserted = handle.shutdown().unwrap();
        assert!(inserted >= 3);
        // No partial transaction is left behind: every slot is empty or whole
        assert_eq!(
            pool.snapshot().iter().flatten().count(),
            pool.len()
        );
    }
}

//! Block Channel - Many Writers, One Reader
//!
//! Carries assembled blocks from miners to the validator as fixed-size byte
//! records over a lock-free `rtrb` ring buffer.
//!
//! ## Whole-record delivery
//!
//! A writer takes the write lock, waits for room for an entire record, copies
//! it into one write chunk and commits the chunk in a single step. The reader
//! only consumes once a whole record is buffered. Between the two, the
//! reader can never observe part of a block.
//!
//! ## Ordering
//!
//! Records come out in the order writers committed them, which is not
//! necessarily the order miners started assembling.

use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use rtrb::{Consumer, Producer, RingBuffer};

use crate::{
    channel::codec::{self, CodecError},
    error::ChannelError,
    service::{Backoff, ShutdownSignal},
    state::block::Block,
};

/// Creates a channel for blocks of `tx_per_block` transactions that buffers
/// up to `capacity_records` whole records.
///
/// The ring is allocated up front. Callers keep `tx_per_block` within
/// [`codec::MAX_TX_PER_BLOCK`]; `SimulationConfig::validate_counts` enforces
/// that together with a bound on `capacity_records`.
pub fn block_channel(tx_per_block: usize, capacity_records: usize) -> (BlockSender, BlockReceiver) {
    let record_len = codec::record_len(tx_per_block);
    let ring_len = record_len.saturating_mul(capacity_records.max(1));
    let (producer, consumer) = RingBuffer::<u8>::new(ring_len);
    (
        BlockSender {
            producer: Arc::new(Mutex::new(producer)),
            tx_per_block,
            record_len,
        },
        BlockReceiver {
            consumer,
            tx_per_block,
            record_len,
            scratch: vec![0u8; record_len],
        },
    )
}

/// Write side of the block channel. Cloned once per miner.
#[derive(Clone)]
pub struct BlockSender {
    producer: Arc<Mutex<Producer<u8>>>,
    tx_per_block: usize,
    record_len: usize,
}

impl BlockSender {
    pub fn tx_per_block(&self) -> usize {
        self.tx_per_block
    }

    /// Encodes and publishes a block.
    ///
    /// Waits while another writer is publishing or the buffer has no room for
    /// a whole record. Returns [`ChannelError::Interrupted`] if `shutdown`
    /// fires first, in which case nothing was written.
    pub fn send(&self, block: &Block, shutdown: &ShutdownSignal) -> Result<(), ChannelError> {
        if block.len() != self.tx_per_block {
            return Err(ChannelError::Corrupted(CodecError::CountMismatch {
                expected: self.tx_per_block,
                actual: block.len(),
            }));
        }
        let record = codec::encode(block)?;
        self.send_record(&record, shutdown)
    }

    /// Publishes an already encoded record.
    ///
    /// Only records of exactly the channel's record length are accepted, so a
    /// partial frame can never be queued.
    pub fn send_record(&self, record: &[u8], shutdown: &ShutdownSignal) -> Result<(), ChannelError> {
        if record.len() != self.record_len {
            return Err(ChannelError::Truncated {
                expected: self.record_len,
                actual: record.len(),
            });
        }

        let mut backoff = Backoff::new();
        let mut producer = self.acquire(shutdown, &mut backoff)?;

        backoff.reset();
        while producer.slots() < self.record_len {
            if producer.is_abandoned() {
                return Err(ChannelError::Disconnected);
            }
            if shutdown.is_triggered() {
                return Err(ChannelError::Interrupted);
            }
            backoff.snooze();
        }

        let available = producer.slots();
        let mut chunk = producer
            .write_chunk(self.record_len)
            .map_err(|_| ChannelError::Truncated {
                expected: self.record_len,
                actual: available,
            })?;
        let (first, second) = chunk.as_mut_slices();
        let split = first.len();
        first.copy_from_slice(&record[..split]);
        second.copy_from_slice(&record[split..]);
        chunk.commit_all();
        Ok(())
    }

    /// Takes the write lock, giving up if `shutdown` fires while another
    /// writer holds it.
    fn acquire(
        &self,
        shutdown: &ShutdownSignal,
        backoff: &mut Backoff,
    ) -> Result<MutexGuard<'_, Producer<u8>>, ChannelError> {
        loop {
            match self.producer.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(poisoned)) => return Ok(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => {
                    if shutdown.is_triggered() {
                        return Err(ChannelError::Interrupted);
                    }
                    backoff.snooze();
                }
            }
        }
    }
}

/// Read side of the block channel. There is exactly one.
pub struct BlockReceiver {
    consumer: Consumer<u8>,
    tx_per_block: usize,
    record_len: usize,
    scratch: Vec<u8>,
}

impl BlockReceiver {
    pub fn tx_per_block(&self) -> usize {
        self.tx_per_block
    }

    /// Number of whole records waiting to be read.
    pub fn pending_records(&self) -> usize {
        self.consumer.slots() / self.record_len
    }

    /// Waits for the next whole record and decodes it.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::Corrupted`] if the record did not decode; the record
    ///   is consumed and the next call reads the following one
    /// - [`ChannelError::Truncated`] if only part of a record was buffered when
    ///   the wait ended; those bytes are discarded
    /// - [`ChannelError::Interrupted`] / [`ChannelError::Disconnected`] when
    ///   the wait ended with nothing buffered
    pub fn recv(&mut self, shutdown: &ShutdownSignal) -> Result<Block, ChannelError> {
        let mut backoff = Backoff::new();
        while self.consumer.slots() < self.record_len {
            if shutdown.is_triggered() {
                self.discard_partial()?;
                return Err(ChannelError::Interrupted);
            }
            if self.consumer.is_abandoned() && self.consumer.slots() < self.record_len {
                self.discard_partial()?;
                return Err(ChannelError::Disconnected);
            }
            backoff.snooze();
        }
        self.read_record()
    }

    /// Reads a record if a whole one is buffered, without waiting.
    pub fn try_recv(&mut self) -> Result<Option<Block>, ChannelError> {
        if self.consumer.slots() < self.record_len {
            return Ok(None);
        }
        self.read_record().map(Some)
    }

    fn read_record(&mut self) -> Result<Block, ChannelError> {
        let available = self.consumer.slots();
        let chunk = self
            .consumer
            .read_chunk(self.record_len)
            .map_err(|_| ChannelError::Truncated {
                expected: self.record_len,
                actual: available,
            })?;
        let (first, second) = chunk.as_slices();
        self.scratch[..first.len()].copy_from_slice(first);
        self.scratch[first.len()..].copy_from_slice(second);
        chunk.commit_all();

        Ok(codec::decode(&self.scratch, self.tx_per_block)?)
    }

    /// Drops any bytes short of a whole record.
    fn discard_partial(&mut self) -> Result<(), ChannelError> {
        let partial = self.consumer.slots();
        if partial == 0 {
            return Ok(());
        }
        if let Ok(chunk) = self.consumer.read_chunk(partial) {
            chunk.commit_all();
        }
        Err(ChannelError::Truncated {
            expected: self.record_len,
            actual: partial,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{
        block::{BlockTransactions, genesis_hash},
        transaction::Transaction,
    };
    use std::{collections::HashSet, thread, time::Duration};

    fn create_block(miner: u32, seq: u64, tx_per_block: usize) -> Block {
        let txs = (0..tx_per_block as u32)
            .map(|i| {
                Transaction::new(
                    Transaction::compose_id(miner, seq as u32 * 100 + i),
                    miner,
                    i + 1,
                    10 + i,
                    1,
                    1_700_000_000,
                )
            })
            .collect();
        Block::new(
            format!("BLK-{miner}-{seq}"),
            genesis_hash(),
            1_700_000_000 + seq,
            BlockTransactions::new(txs, tx_per_block).unwrap(),
            0,
        )
    }

    #[test]
    fn test_send_and_receive() {
        let (sender, mut receiver) = block_channel(3, 2);
        let stop = ShutdownSignal::new();
        let block = create_block(1, 0, 3);

        sender.send(&block, &stop).unwrap();
        assert_eq!(receiver.pending_records(), 1);

        let received = receiver.recv(&stop).unwrap();
        assert_eq!(received, block);
        assert_eq!(receiver.pending_records(), 0);
    }

    #[test]
    fn test_fifo_in_commit_order() {
        let (sender, mut receiver) = block_channel(2, 4);
        let stop = ShutdownSignal::new();
        let blocks: Vec<Block> = (0..3).map(|s| create_block(1, s, 2)).collect();
        for b in &blocks {
            sender.send(b, &stop).unwrap();
        }
        for b in &blocks {
            assert_eq!(&receiver.recv(&stop).unwrap(), b);
        }
    }

    #[test]
    fn test_wrong_size_block_refused() {
        let (sender, _receiver) = block_channel(3, 1);
        let block = create_block(1, 0, 2);
        assert!(matches!(
            sender.send(&block, &ShutdownSignal::new()),
            Err(ChannelError::Corrupted(CodecError::CountMismatch { .. }))
        ));
    }

    #[test]
    fn test_partial_record_refused() {
        let (sender, mut receiver) = block_channel(1, 1);
        let record = codec::encode(&create_block(1, 0, 1)).unwrap();
        assert!(matches!(
            sender.send_record(&record[..record.len() - 3], &ShutdownSignal::new()),
            Err(ChannelError::Truncated { .. })
        ));
        assert!(receiver.try_recv().unwrap().is_none());
    }

    #[test]
    fn test_corrupted_record_skipped() {
        let (sender, mut receiver) = block_channel(1, 2);
        let stop = ShutdownSignal::new();
        let good = create_block(1, 1, 1);

        let mut bad = codec::encode(&create_block(1, 0, 1)).unwrap();
        bad[..4].copy_from_slice(b"JUNK");
        sender.send_record(&bad, &stop).unwrap();
        sender.send(&good, &stop).unwrap();

        assert!(matches!(
            receiver.recv(&stop),
            Err(ChannelError::Corrupted(CodecError::BadMagic))
        ));
        assert_eq!(receiver.recv(&stop).unwrap(), good);
    }

    #[test]
    fn test_writer_blocks_when_full_and_interrupts() {
        let (sender, _receiver) = block_channel(1, 1);
        let stop = ShutdownSignal::new();
        sender.send(&create_block(1, 0, 1), &stop).unwrap();

        let blocked = sender.clone();
        let signal = stop.clone();
        let writer = thread::spawn(move || blocked.send(&create_block(1, 1, 1), &signal));
        thread::sleep(Duration::from_millis(30));
        assert!(!writer.is_finished());

        stop.trigger();
        assert!(matches!(
            writer.join().unwrap(),
            Err(ChannelError::Interrupted)
        ));
    }

    #[test]
    fn test_reader_interrupted_and_disconnected() {
        let (sender, mut receiver) = block_channel(1, 1);
        let stop = ShutdownSignal::new();
        stop.trigger();
        assert!(matches!(receiver.recv(&stop), Err(ChannelError::Interrupted)));

        drop(sender);
        assert!(matches!(
            receiver.recv(&ShutdownSignal::new()),
            Err(ChannelError::Disconnected)
        ));
    }

    #[test]
    fn test_concurrent_writers_deliver_whole_records() {
        const WRITERS: u32 = 4;
        const PER_WRITER: u64 = 50;

        let (sender, mut receiver) = block_channel(3, 2);
        let stop = ShutdownSignal::new();

        let writers: Vec<_> = (0..WRITERS)
            .map(|w| {
                let sender = sender.clone();
                let stop = stop.clone();
                thread::spawn(move || {
                    for s in 0..PER_WRITER {
                        sender.send(&create_block(w, s, 3), &stop).unwrap();
                    }
                })
            })
            .collect();

        let mut ids = HashSet::new();
        for _ in 0..(WRITERS as u64 * PER_WRITER) {
            let block = receiver.recv(&stop).unwrap();
            assert_eq!(block.len(), 3);
            assert!(ids.insert(block.block_id));
        }
        for w in writers {
            w.join().unwrap();
        }
        assert!(receiver.try_recv().unwrap().is_none());
    }
}

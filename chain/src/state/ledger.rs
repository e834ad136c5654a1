//! Append-only record of accepted blocks.
//!
//! The ledger has room for exactly `chain_length` blocks. It also keeps the
//! ids of every committed transaction so the validator can refuse a block
//! that spends a transaction twice.

use std::{
    collections::HashSet,
    io::{Read, Write},
};

use crate::{
    channel::codec::{self, CodecError},
    state::block::Block,
};

/// Magic bytes opening an exported ledger file.
pub const LEDGER_MAGIC: [u8; 4] = *b"DEIL";

#[derive(Debug, Clone)]
pub struct Ledger {
    blocks: Vec<Block>,
    committed: HashSet<u64>,
    capacity: usize,
    tx_per_block: usize,
}

impl Ledger {
    pub fn new(capacity: usize, tx_per_block: usize) -> Self {
        Self {
            blocks: Vec::with_capacity(capacity),
            committed: HashSet::new(),
            capacity,
            tx_per_block,
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn tx_per_block(&self) -> usize {
        self.tx_per_block
    }

    /// Returns true once `capacity` blocks have been appended.
    pub fn is_full(&self) -> bool {
        self.blocks.len() >= self.capacity
    }

    /// Returns whether a transaction id was committed by an earlier block.
    pub fn is_committed(&self, tx_id: u64) -> bool {
        self.committed.contains(&tx_id)
    }

    /// Appends an accepted block. Returns false, leaving the ledger
    /// untouched, when the ledger is already full.
    pub fn append(&mut self, block: Block) -> bool {
        if self.is_full() {
            return false;
        }
        self.committed
            .extend(block.transactions.iter().map(|tx| tx.id));
        self.blocks.push(block);
        true
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn last(&self) -> Option<&Block> {
        self.blocks.last()
    }

    /// Writes the ledger as a header followed by one wire record per block.
    pub fn export<W: Write>(&self, mut writer: W) -> Result<(), CodecError> {
        writer.write_all(&LEDGER_MAGIC)?;
        writer.write_all(&(self.tx_per_block as u32).to_le_bytes())?;
        for block in &self.blocks {
            codec::write_record(&mut writer, block)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Reads a ledger written by [`Ledger::export`].
    ///
    /// A trailing partial record is reported as [`CodecError::Truncated`]. A
    /// header claiming more than [`codec::MAX_TX_PER_BLOCK`] transactions per
    /// block is rejected with [`CodecError::CountMismatch`].
    pub fn import<R: Read>(mut reader: R) -> Result<Self, CodecError> {
        let mut header = [0u8; 8];
        reader.read_exact(&mut header).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => CodecError::Truncated {
                expected: header.len(),
                actual: 0,
            },
            _ => CodecError::Io(e),
        })?;
        if header[..4] != LEDGER_MAGIC {
            return Err(CodecError::BadMagic);
        }
        let tx_per_block = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        if tx_per_block > codec::MAX_TX_PER_BLOCK {
            return Err(CodecError::CountMismatch {
                expected: codec::MAX_TX_PER_BLOCK,
                actual: tx_per_block,
            });
        }

        let mut blocks = Vec::new();
        while let Some(block) = codec::read_record(&mut reader, tx_per_block)? {
            blocks.push(block);
        }

        let mut ledger = Ledger::new(blocks.len(), tx_per_block);
        for block in blocks {
            ledger.append(block);
        }
        Ok(ledger)
    }
}

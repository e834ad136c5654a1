use std::{hash::Hash, hash::Hasher, ops::Deref};

use crate::{error::BlockError, state::transaction::Transaction};

/// Maximum length, in bytes, of a block id. Fits the longest miner id,
/// `BLK-4294967295-18446744073709551615`.
pub const BLOCK_ID_LEN: usize = 36;

/// Length of a block fingerprint rendered as lowercase hex.
pub const HASH_HEX_LEN: usize = blake3::OUT_LEN * 2;

/// Returns the fingerprint the chain starts from (all zeros).
pub fn genesis_hash() -> String {
    "0".repeat(HASH_HEX_LEN)
}

/// [`BlockTransactions`] is the transaction list of a block.
///
/// Its length is checked against the configured transactions-per-block when
/// it is built, so a block can never carry a partial batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockTransactions(Vec<Transaction>);

impl BlockTransactions {
    pub fn new(transactions: Vec<Transaction>, tx_per_block: usize) -> Result<Self, BlockError> {
        if transactions.len() != tx_per_block {
            return Err(BlockError::SizeMismatch {
                expected: tx_per_block,
                actual: transactions.len(),
            });
        }
        Ok(Self(transactions))
    }

    pub fn into_inner(self) -> Vec<Transaction> {
        self.0
    }
}

impl Deref for BlockTransactions {
    type Target = [Transaction];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// [`Block`] is a batch of reserved transactions linked to the chain tip a
/// miner observed when it assembled the batch.
#[derive(Clone, Debug)]
pub struct Block {
    /// Unique id assigned by the miner
    pub block_id: String,
    /// Fingerprint of the chain tip at assembly time
    pub previous_block_hash: String,
    /// Assembly time, seconds since the Unix epoch
    pub timestamp: u64,
    /// Exactly `tx_per_block` transactions
    pub transactions: BlockTransactions,
    /// Proof-of-work nonce. Always zero, no search is performed.
    pub nonce: u64,
}

impl Block {
    pub fn new(
        block_id: String,
        previous_block_hash: String,
        timestamp: u64,
        transactions: BlockTransactions,
        nonce: u64,
    ) -> Self {
        Self {
            block_id,
            previous_block_hash,
            timestamp,
            transactions,
            nonce,
        }
    }

    /// Computes the fingerprint of the block: the BLAKE3 digest of every field,
    /// transactions included, as lowercase hex.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.block_id.as_bytes());
        hasher.update(self.previous_block_hash.as_bytes());
        hasher.update(&self.timestamp.to_le_bytes());
        for (i, tx) in self.transactions.iter().enumerate() {
            hasher.update(&(i as u32).to_le_bytes());
            tx.hash_into(&mut hasher);
        }
        hasher.update(&self.nonce.to_le_bytes());
        hex::encode(hasher.finalize().as_bytes())
    }

    /// Returns the number of transactions in the block
    #[inline]
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Returns whether the block extends the given chain tip fingerprint
    pub fn extends(&self, tip_hash: &str) -> bool {
        self.previous_block_hash == tip_hash
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint() == other.fingerprint()
    }
}

impl Eq for Block {}

impl Hash for Block {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fingerprint().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txs(ids: &[u64]) -> Vec<Transaction> {
        ids.iter()
            .map(|&id| Transaction::new(id, 1, 2, 10, 1, 1_700_000_000))
            .collect()
    }

    #[test]
    fn test_block_transactions_size_checked() {
        assert!(BlockTransactions::new(txs(&[1, 2, 3]), 3).is_ok());

        let err = BlockTransactions::new(txs(&[1, 2]), 3).unwrap_err();
        assert!(matches!(
            err,
            BlockError::SizeMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_fingerprint_is_fixed_width_hex() {
        let block = Block::new(
            "BLK-0-0".into(),
            genesis_hash(),
            1,
            BlockTransactions::new(txs(&[1]), 1).unwrap(),
            0,
        );
        let fp = block.fingerprint();
        assert_eq!(fp.len(), HASH_HEX_LEN);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp, block.fingerprint());
    }

    #[test]
    fn test_fingerprint_covers_transactions() {
        let a = Block::new(
            "BLK-0-0".into(),
            genesis_hash(),
            1,
            BlockTransactions::new(txs(&[1, 2]), 2).unwrap(),
            0,
        );
        let b = Block::new(
            "BLK-0-0".into(),
            genesis_hash(),
            1,
            BlockTransactions::new(txs(&[1, 3]), 2).unwrap(),
            0,
        );
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_ne!(a, b);
    }

    #[test]
    fn test_extends() {
        let block = Block::new(
            "BLK-0-0".into(),
            genesis_hash(),
            1,
            BlockTransactions::new(txs(&[1]), 1).unwrap(),
            0,
        );
        assert!(block.extends(&genesis_hash()));
        assert!(!block.extends(&block.fingerprint()));
    }
}

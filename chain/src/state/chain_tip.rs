use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::state::block::genesis_hash;

/// [`ChainTip`] is the fingerprint of the last accepted block together with
/// the number of blocks accepted so far.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainTip {
    pub hash: String,
    pub block_count: u64,
}

impl ChainTip {
    pub fn genesis() -> Self {
        Self {
            hash: genesis_hash(),
            block_count: 0,
        }
    }
}

/// Wait-free reader for the chain tip.
///
/// Miners take a snapshot before reserving transactions. The snapshot may be
/// one block behind by the time the block reaches the validator, which is
/// how competing miners lose the race.
#[derive(Clone)]
pub struct ChainTipReader {
    inner: Arc<ArcSwap<ChainTip>>,
}

impl ChainTipReader {
    /// Creates a reader/writer pair starting from the genesis tip.
    pub fn new() -> (Self, ChainTipWriter) {
        let shared = Arc::new(ArcSwap::from_pointee(ChainTip::genesis()));
        (
            Self {
                inner: Arc::clone(&shared),
            },
            ChainTipWriter { inner: shared },
        )
    }

    /// Load the current tip snapshot.
    pub fn load(&self) -> Arc<ChainTip> {
        self.inner.load_full()
    }
}

/// Writer for the chain tip. Not cloneable, owned by the validator.
pub struct ChainTipWriter {
    inner: Arc<ArcSwap<ChainTip>>,
}

impl ChainTipWriter {
    /// Moves the tip to `hash` and bumps the block count in one store, so
    /// readers never see a hash paired with the wrong count.
    pub fn advance(&self, hash: String) -> Arc<ChainTip> {
        let next = Arc::new(ChainTip {
            hash,
            block_count: self.inner.load().block_count + 1,
        });
        self.inner.store(Arc::clone(&next));
        next
    }

    /// Current tip as seen by the writer.
    pub fn current(&self) -> Arc<ChainTip> {
        self.inner.load_full()
    }

    /// Returns a new reader sharing this tip.
    pub fn reader(&self) -> ChainTipReader {
        ChainTipReader {
            inner: Arc::clone(&self.inner),
        }
    }
}

//! Error types shared across the pipeline.
//!
//! Per-block and per-transaction failures are local: components log them,
//! count them and keep looping. Only [`ConfigError`] and [`StartupError`]
//! abort a run.

use thiserror::Error;

use crate::{channel::codec::CodecError, state::transaction::Transaction};

/// Errors raised by the transaction pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No free slot. Carries the rejected transaction back to the producer.
    #[error("transaction pool is full")]
    Full(Transaction),

    /// A reservation returned fewer transactions than a block needs
    #[error("pool underflow: reserved {reserved} of {wanted} transactions")]
    Underflow { reserved: usize, wanted: usize },

    /// The caller's stop signal fired while waiting
    #[error("pool wait interrupted by shutdown")]
    Interrupted,
}

/// Errors raised when building a block.
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("block must hold exactly {expected} transactions, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
}

/// Errors raised by the block channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// A whole record arrived but did not decode
    #[error("corrupted block record: {0}")]
    Corrupted(#[from] CodecError),

    /// Only part of a record was buffered when the reader gave up
    #[error("incomplete block record: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// The caller's stop signal fired while waiting
    #[error("channel wait interrupted by shutdown")]
    Interrupted,

    /// The other end of the channel was dropped
    #[error("block channel disconnected")]
    Disconnected,
}

/// Reasons the validator refuses a block.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The block was assembled against a tip that is no longer current
    #[error("stale or forked link: tip is {expected}, block extends {found}")]
    StaleOrForkedLink { expected: String, found: String },

    /// A transaction is duplicated, still pending, or already committed
    #[error("transaction {tx_id} conflicts with pool or chain state")]
    TransactionConflict { tx_id: u64 },

    /// The chain already holds its configured number of blocks
    #[error("chain already complete at {length} blocks")]
    ChainComplete { length: usize },
}

/// Configuration errors. Always fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {field} must be positive")]
    Invalid { field: &'static str },

    #[error("invalid configuration: {field} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },

    #[error("failed to load configuration: {0}")]
    Load(String),

    #[error("incorrect format in legacy configuration file: {0}")]
    Legacy(String),
}

/// Errors that prevent the pipeline from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

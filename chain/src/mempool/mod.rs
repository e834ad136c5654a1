//! Mempool - Shared Transaction Pool
//!
//! Generators insert synthetic transactions, miners reserve them in batches
//! and the validator looks up membership while checking blocks.
//!
//! ## Architecture
//!
//!
//! Generator ──insert──►  ┌────────────────┐  ◄──reserve_batch── Miner
//! Generator ──insert──►  │ TransactionPool│  ◄──reserve_batch── Miner
//!                        └────────────────┘  ◄──contains──────── Validator
//!
//! ## Thread Safety
//!
//! The pool is shared through an `Arc`. All slot mutation happens under a
//! single mutex; producers and consumers park on two condition variables
//! instead of polling.

mod pool;

pub use pool::{PoolStats, TransactionPool};

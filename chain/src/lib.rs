//! DEIChain - a threaded proof-of-work network simulator.
//!
//! Transaction generators fill a bounded [`mempool::TransactionPool`], miners
//! reserve batches from it and publish blocks over a byte-oriented
//! [`channel`], and a single [`validator::Validator`] links accepted blocks
//! into the chain.
//!
//!
//! Generator ─┐                        ┌─ Miner ─┐
//! Generator ─┼─► TransactionPool ◄────┼─ Miner ─┼─► BlockChannel ─► Validator ─► Ledger
//! Generator ─┘                        └─ Miner ─┘                        │
//!                                        ▲                               │
//!                                        └────────── ChainTip ◄──────────┘
//!
//!
//! [`simulation::Simulation`] starts and stops the whole pipeline.

pub mod channel;
pub mod config;
pub mod error;
pub mod generator;
pub mod mempool;
pub mod miner;
pub mod service;
pub mod simulation;
pub mod state;
pub mod stats;
pub mod validator;

pub use config::{GeneratorParams, SimulationConfig};
pub use simulation::{Simulation, SimulationReport};

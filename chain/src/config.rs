//! Simulation configuration.

use std::{fs, path::Path};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::{channel::codec::MAX_TX_PER_BLOCK, error::ConfigError};

/// Generators used when a legacy config file, which has no producer count,
/// is loaded.
pub const DEFAULT_PRODUCERS: usize = 2;

/// Allowed generator reward range.
pub const REWARD_RANGE: (u32, u32) = (1, 3);

/// Allowed generator interval range, in milliseconds.
pub const INTERVAL_RANGE_MS: (u64, u64) = (200, 3000);

/// Most generators, and separately most miners, a run may start.
pub const MAX_WORKERS: usize = 1024;

/// Largest transaction pool.
pub const MAX_POOL_CAPACITY: usize = 1 << 20;

/// Longest chain a run may target.
pub const MAX_CHAIN_LENGTH: usize = 100_000;

/// Most whole records the block channel may buffer.
pub const MAX_CHANNEL_CAPACITY: usize = 64;

/// Parameters handed to every transaction generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorParams {
    /// Reward attached to each generated transaction
    pub reward: u32,
    /// Delay between two transactions, in milliseconds
    pub interval_ms: u64,
}

impl Default for GeneratorParams {
    fn default() -> Self {
        Self {
            reward: 1,
            interval_ms: 500,
        }
    }
}

/// Configuration for a simulation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Number of transaction generators
    pub num_producers: usize,
    /// Number of miner threads
    pub num_miners: usize,
    /// Slots in the transaction pool
    pub pool_capacity: usize,
    /// Transactions carried by every block
    pub tx_per_block: usize,
    /// Blocks to accept before the run completes
    pub chain_length: usize,
    /// Generator reward and pacing
    #[serde(default)]
    pub generator: GeneratorParams,
    /// Whole block records the channel buffers
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Miner pause after a short reservation, in milliseconds
    #[serde(default = "default_miner_backoff_ms")]
    pub miner_backoff_ms: u64,
    /// Seconds between pool reports from the supervisor
    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,
}

fn default_channel_capacity() -> usize {
    2
}

fn default_miner_backoff_ms() -> u64 {
    100
}

fn default_report_interval_secs() -> u64 {
    10
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            num_producers: DEFAULT_PRODUCERS,
            num_miners: 2,
            pool_capacity: 16,
            tx_per_block: 4,
            chain_length: 10,
            generator: GeneratorParams::default(),
            channel_capacity: default_channel_capacity(),
            miner_backoff_ms: default_miner_backoff_ms(),
            report_interval_secs: default_report_interval_secs(),
        }
    }
}

impl SimulationConfig {
    /// Load configuration from a file path.
    ///
    /// Environment variables with the `DEICHAIN_` prefix override file values,
    /// using `__` to reach nested keys (`DEICHAIN_SIMULATION__NUM_MINERS=4`).
    /// The result is validated.
    ///
    /// # Example config (TOML)
    /// ```toml
    /// [simulation]
    /// num_producers = 2
    /// num_miners = 3
    /// pool_capacity = 20
    /// tx_per_block = 4
    /// chain_length = 10
    ///
    /// [simulation.generator]
    /// reward = 2
    /// interval_ms = 500
    /// ```
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let figment = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Figment::new().merge(Toml::file(path)),
            Some(ext) => {
                return Err(ConfigError::Load(format!(
                    "Unsupported config file format: {ext}. Use .toml"
                )));
            }
            None => {
                return Err(ConfigError::Load(
                    "Config file must have a .toml extension".into(),
                ));
            }
        };

        let config: SimulationConfig = figment
            .merge(Env::prefixed("DEICHAIN_").split("__"))
            .extract_inner("simulation")
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load a legacy configuration file: four whitespace separated integers,
    /// `NUM_MINERS POOL_SIZE TRANSACTIONS_PER_BLOCK BLOCKCHAIN_BLOCKS`.
    ///
    /// Fields missing from the legacy format take their defaults.
    pub fn from_legacy_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| ConfigError::Load(format!("{}: {e}", path.display())))?;
        Self::parse_legacy(&contents)
    }

    /// Parses the legacy four-integer format. See [`Self::from_legacy_path`].
    pub fn parse_legacy(contents: &str) -> Result<Self, ConfigError> {
        let mut values = contents.split_whitespace().map(|token| {
            token
                .parse::<i64>()
                .map_err(|_| ConfigError::Legacy(format!("`{token}` is not an integer")))
        });
        let mut next = |field: &'static str| -> Result<usize, ConfigError> {
            let value = values
                .next()
                .ok_or_else(|| ConfigError::Legacy(format!("missing {field}")))??;
            usize::try_from(value).map_err(|_| ConfigError::Invalid { field })
        };

        let defaults = Self::default();
        let config = Self {
            num_miners: next("num_miners")?,
            pool_capacity: next("pool_capacity")?,
            tx_per_block: next("tx_per_block")?,
            chain_length: next("chain_length")?,
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks that every count and generator parameter is in range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_counts()?;

        let (min, max) = REWARD_RANGE;
        if !(min..=max).contains(&self.generator.reward) {
            return Err(ConfigError::OutOfRange {
                field: "generator.reward",
                value: self.generator.reward as u64,
                min: min as u64,
                max: max as u64,
            });
        }
        let (min, max) = INTERVAL_RANGE_MS;
        if !(min..=max).contains(&self.generator.interval_ms) {
            return Err(ConfigError::OutOfRange {
                field: "generator.interval_ms",
                value: self.generator.interval_ms,
                min,
                max,
            });
        }
        Ok(())
    }

    /// Checks only that every count lies in `1..=max` for its field.
    /// Generator pacing is left alone so in-process callers can run faster
    /// than an operator may.
    pub fn validate_counts(&self) -> Result<(), ConfigError> {
        let counts = [
            ("num_producers", self.num_producers, MAX_WORKERS),
            ("num_miners", self.num_miners, MAX_WORKERS),
            ("pool_capacity", self.pool_capacity, MAX_POOL_CAPACITY),
            ("tx_per_block", self.tx_per_block, MAX_TX_PER_BLOCK),
            ("chain_length", self.chain_length, MAX_CHAIN_LENGTH),
            ("channel_capacity", self.channel_capacity, MAX_CHANNEL_CAPACITY),
        ];
        for (field, value, max) in counts {
            if value == 0 {
                return Err(ConfigError::Invalid { field });
            }
            if value > max {
                return Err(ConfigError::OutOfRange {
                    field,
                    value: value as u64,
                    min: 1,
                    max: max as u64,
                });
            }
        }
        if self.report_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "report_interval_secs",
            });
        }
        Ok(())
    }

    /// Layers this configuration under environment overrides, for callers
    /// that build a config in code.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        let config: SimulationConfig = Figment::from(Serialized::defaults(self))
            .merge(Env::prefixed("DEICHAIN_SIMULATION__").split("__"))
            .extract()
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

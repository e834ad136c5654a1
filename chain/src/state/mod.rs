use std::time::{SystemTime, UNIX_EPOCH};

pub mod block;
pub mod chain_tip;
pub mod ledger;
pub mod transaction;

/// Seconds since the Unix epoch. A clock set before 1970 reads as zero.
pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

use std::hash::{Hash, Hasher};

/// [`Transaction`] represents a synthetic value transfer produced by a
/// transaction generator and parked in the pool until a miner reserves it.
///
/// Pool slots hold `Option<Transaction>`, so an occupied slot is `Some` and
/// a free slot is `None`. Once written, only `age` changes, and only while
/// the transaction sits in the pool.
#[derive(Debug, Clone, Copy)]
pub struct Transaction {
    /// Unique id, `(generator_id << 32) | counter`
    pub id: u64,
    /// Id of the generator that produced the transaction
    pub sender_id: u32,
    /// Receiving account
    pub receiver_id: u32,
    /// Transferred value
    pub value: u32,
    /// Reward offered to the miner. Higher rewards are reserved first.
    pub reward: u32,
    /// Number of validator rounds the transaction has waited in the pool
    pub age: u32,
    /// Creation time, seconds since the Unix epoch
    pub timestamp: u64,
}

impl Transaction {
    pub fn new(
        id: u64,
        sender_id: u32,
        receiver_id: u32,
        value: u32,
        reward: u32,
        timestamp: u64,
    ) -> Self {
        Self {
            id,
            sender_id,
            receiver_id,
            value,
            reward,
            age: 0,
            timestamp,
        }
    }

    /// Builds the id a generator assigns to its `counter`-th transaction.
    #[inline]
    pub fn compose_id(generator_id: u32, counter: u32) -> u64 {
        ((generator_id as u64) << 32) | counter as u64
    }

    /// Returns the generator half of the id.
    #[inline]
    pub fn generator_id(&self) -> u32 {
        (self.id >> 32) as u32
    }

    /// Feeds every field into a running block hash.
    pub(crate) fn hash_into(&self, hasher: &mut blake3::Hasher) {
        hasher.update(&self.id.to_le_bytes());
        hasher.update(&self.sender_id.to_le_bytes());
        hasher.update(&self.receiver_id.to_le_bytes());
        hasher.update(&self.value.to_le_bytes());
        hasher.update(&self.reward.to_le_bytes());
        hasher.update(&self.age.to_le_bytes());
        hasher.update(&self.timestamp.to_le_bytes());
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Transaction {}

impl Hash for Transaction {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_id_keeps_generator_and_counter() {
        let id = Transaction::compose_id(7, 42);
        let tx = Transaction::new(id, 7, 1, 10, 2, 0);
        assert_eq!(tx.generator_id(), 7);
        assert_eq!(tx.id & 0xFFFF_FFFF, 42);
    }

    #[test]
    fn test_identity_is_id() {
        let a = Transaction::new(1, 1, 2, 3, 1, 100);
        let mut b = Transaction::new(1, 9, 9, 9, 3, 200);
        b.age = 5;
        assert_eq!(a, b);
        assert_ne!(a, Transaction::new(2, 1, 2, 3, 1, 100));
    }
}

//! Fixed-size binary record for a block.
//!
//! Layout (little-endian):
//!
//! | Field                               | Bytes               |
//! |-------------------------------------|---------------------|
//! | magic `DEIB`                        | 4                   |
//! | block id, NUL padded                | [`BLOCK_ID_LEN`]    |
//! | previous block fingerprint (hex)    | [`HASH_HEX_LEN`]    |
//! | timestamp                           | 8                   |
//! | transaction count                   | 4                   |
//! | transactions                        | count × [`TX_RECORD_LEN`] |
//! | nonce                               | 8                   |
//!
//! The record length depends only on the transactions-per-block setting, so
//! a reader always knows how many bytes make up the next block.

use std::io::{self, Read, Write};

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

use crate::state::{
    block::{BLOCK_ID_LEN, Block, BlockTransactions, HASH_HEX_LEN},
    transaction::Transaction,
};

/// Magic bytes opening every block record.
pub const BLOCK_MAGIC: [u8; 4] = *b"DEIB";

/// Size of one encoded transaction.
pub const TX_RECORD_LEN: usize = 8 + 4 * 5 + 8;

/// Largest transactions-per-block value a record may carry.
pub const MAX_TX_PER_BLOCK: usize = 4096;

const HEADER_LEN: usize = BLOCK_MAGIC.len() + BLOCK_ID_LEN + HASH_HEX_LEN + 8 + 4;
const TRAILER_LEN: usize = 8;

/// Errors produced while encoding or decoding a block record.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("record truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("bad record magic")]
    BadMagic,

    #[error("{field} is {len} bytes, limit is {max}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("{field} is not valid text")]
    InvalidText { field: &'static str },

    #[error("record holds {actual} transactions, expected {expected}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Returns the size in bytes of a block record carrying `tx_per_block`
/// transactions. Saturates instead of overflowing for absurd counts.
#[inline]
pub const fn record_len(tx_per_block: usize) -> usize {
    tx_per_block
        .saturating_mul(TX_RECORD_LEN)
        .saturating_add(HEADER_LEN + TRAILER_LEN)
}

fn check_tx_per_block(tx_per_block: usize) -> Result<(), CodecError> {
    if tx_per_block > MAX_TX_PER_BLOCK {
        return Err(CodecError::CountMismatch {
            expected: MAX_TX_PER_BLOCK,
            actual: tx_per_block,
        });
    }
    Ok(())
}

/// Encodes a block into a fixed-size record.
pub fn encode(block: &Block) -> Result<BytesMut, CodecError> {
    let tx_count = block.transactions.len();
    let mut buf = BytesMut::with_capacity(record_len(tx_count));

    buf.put_slice(&BLOCK_MAGIC);
    put_fixed(&mut buf, "block id", block.block_id.as_bytes(), BLOCK_ID_LEN)?;
    put_fixed(
        &mut buf,
        "previous block hash",
        block.previous_block_hash.as_bytes(),
        HASH_HEX_LEN,
    )?;
    buf.put_u64_le(block.timestamp);
    buf.put_u32_le(tx_count as u32);
    for tx in block.transactions.iter() {
        buf.put_u64_le(tx.id);
        buf.put_u32_le(tx.sender_id);
        buf.put_u32_le(tx.receiver_id);
        buf.put_u32_le(tx.value);
        buf.put_u32_le(tx.reward);
        buf.put_u32_le(tx.age);
        buf.put_u64_le(tx.timestamp);
    }
    buf.put_u64_le(block.nonce);

    debug_assert_eq!(buf.len(), record_len(tx_count));
    Ok(buf)
}

/// Decodes a record that must carry exactly `tx_per_block` transactions.
///
/// A slice shorter than [`record_len`] is reported as truncated; it is never
/// interpreted as a block.
pub fn decode(bytes: &[u8], tx_per_block: usize) -> Result<Block, CodecError> {
    check_tx_per_block(tx_per_block)?;
    let expected = record_len(tx_per_block);
    if bytes.len() < expected {
        return Err(CodecError::Truncated {
            expected,
            actual: bytes.len(),
        });
    }

    let mut buf = &bytes[..expected];
    let mut magic = [0u8; 4];
    buf.copy_to_slice(&mut magic);
    if magic != BLOCK_MAGIC {
        return Err(CodecError::BadMagic);
    }

    let block_id = get_fixed(&mut buf, "block id", BLOCK_ID_LEN)?;
    let previous_block_hash = get_fixed(&mut buf, "previous block hash", HASH_HEX_LEN)?;
    let timestamp = buf.get_u64_le();
    let tx_count = buf.get_u32_le() as usize;
    if tx_count != tx_per_block {
        return Err(CodecError::CountMismatch {
            expected: tx_per_block,
            actual: tx_count,
        });
    }

    let mut transactions = Vec::with_capacity(tx_count);
    for _ in 0..tx_count {
        let id = buf.get_u64_le();
        let sender_id = buf.get_u32_le();
        let receiver_id = buf.get_u32_le();
        let value = buf.get_u32_le();
        let reward = buf.get_u32_le();
        let age = buf.get_u32_le();
        let timestamp = buf.get_u64_le();
        let mut tx = Transaction::new(id, sender_id, receiver_id, value, reward, timestamp);
        tx.age = age;
        transactions.push(tx);
    }
    let nonce = buf.get_u64_le();

    let transactions = BlockTransactions::new(transactions, tx_per_block).map_err(|_| {
        CodecError::CountMismatch {
            expected: tx_per_block,
            actual: tx_count,
        }
    })?;

    Ok(Block::new(
        block_id,
        previous_block_hash,
        timestamp,
        transactions,
        nonce,
    ))
}

/// Writes one record to a byte stream.
pub fn write_record<W: Write>(writer: &mut W, block: &Block) -> Result<(), CodecError> {
    let record = encode(block)?;
    writer.write_all(&record)?;
    Ok(())
}

/// Reads one record from a byte stream.
///
/// Returns `Ok(None)` on a clean end of stream at a record boundary and
/// [`CodecError::Truncated`] when the stream ends inside a record.
pub fn read_record<R: Read>(reader: &mut R, tx_per_block: usize) -> Result<Option<Block>, CodecError> {
    // Bounded before the record buffer is allocated
    check_tx_per_block(tx_per_block)?;
    let expected = record_len(tx_per_block);
    let mut record = vec![0u8; expected];
    let mut filled = 0;
    while filled < expected {
        match reader.read(&mut record[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CodecError::Io(e)),
        }
    }
    match filled {
        0 => Ok(None),
        n if n < expected => Err(CodecError::Truncated {
            expected,
            actual: n,
        }),
        _ => decode(&record, tx_per_block).map(Some),
    }
}

fn put_fixed(
    buf: &mut BytesMut,
    field: &'static str,
    value: &[u8],
    width: usize,
) -> Result<(), CodecError> {
    if value.len() > width {
        return Err(CodecError::FieldTooLong {
            field,
            len: value.len(),
            max: width,
        });
    }
    buf.put_slice(value);
    buf.put_bytes(0, width - value.len());
    Ok(())
}

fn get_fixed(buf: &mut &[u8], field: &'static str, width: usize) -> Result<String, CodecError> {
    let raw = &buf[..width];
    let end = raw.iter().position(|&b| b == 0).unwrap_or(width);
    let text = std::str::from_utf8(&raw[..end])
        .map_err(|_| CodecError::InvalidText { field })?
        .to_owned();
    buf.advance(width);
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::block::genesis_hash;

    fn sample_block(tx_per_block: usize) -> Block {
        let txs = (0..tx_per_block as u64)
            .map(|i| {
                let mut tx = Transaction::new(
                    Transaction::compose_id(3, i as u32),
                    3,
                    100 + i as u32,
                    50 + i as u32,
                    (i % 3) as u32 + 1,
                    1_700_000_000 + i,
                );
                tx.age = i as u32 * 2;
                tx
            })
            .collect();
        Block::new(
            "BLK-3-17".into(),
            genesis_hash(),
            1_700_000_123,
            BlockTransactions::new(txs, tx_per_block).unwrap(),
            0,
        )
    }

    #[test]
    fn test_record_len_is_fixed() {
        let block = sample_block(4);
        let record = encode(&block).unwrap();
        assert_eq!(record.len(), record_len(4));
        assert_eq!(record_len(0), HEADER_LEN + TRAILER_LEN);
    }

    #[test]
    fn test_round_trip_preserves_transactions() {
        let block = sample_block(5);
        let record = encode(&block).unwrap();
        let decoded = decode(&record, 5).unwrap();

        assert_eq!(decoded.block_id, block.block_id);
        assert_eq!(decoded.previous_block_hash, block.previous_block_hash);
        assert_eq!(decoded.timestamp, block.timestamp);
        assert_eq!(decoded.nonce, block.nonce);
        for (a, b) in decoded.transactions.iter().zip(block.transactions.iter()) {
            assert_eq!(
                (a.id, a.sender_id, a.receiver_id, a.value, a.reward, a.age),
                (b.id, b.sender_id, b.receiver_id, b.value, b.reward, b.age)
            );
            assert_eq!(a.timestamp, b.timestamp);
        }
        assert_eq!(decoded.fingerprint(), block.fingerprint());
    }

    #[test]
    fn test_short_record_rejected() {
        let record = encode(&sample_block(3)).unwrap();
        let err = decode(&record[..record.len() - 1], 3).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { actual, .. } if actual == record.len() - 1));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut record = encode(&sample_block(2)).unwrap();
        record[0] = b'X';
        assert!(matches!(decode(&record, 2), Err(CodecError::BadMagic)));
    }

    #[test]
    fn test_count_mismatch_rejected() {
        let record = encode(&sample_block(2)).unwrap();
        // The header claims 2 transactions; a reader expecting 1 must not accept it
        assert!(matches!(
            decode(&record, 1),
            Err(CodecError::CountMismatch {
                expected: 1,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_over_long_block_id_rejected() {
        let mut block = sample_block(1);
        block.block_id = "x".repeat(BLOCK_ID_LEN + 1);
        assert!(matches!(
            encode(&block),
            Err(CodecError::FieldTooLong { field: "block id", .. })
        ));
    }

    #[test]
    fn test_invalid_text_rejected() {
        let mut record = encode(&sample_block(1)).unwrap();
        record[BLOCK_MAGIC.len()] = 0xFF;
        assert!(matches!(
            decode(&record, 1),
            Err(CodecError::InvalidText { field: "block id" })
        ));
    }

    #[test]
    fn test_stream_read_and_truncation() {
        let a = sample_block(2);
        let mut stream = Vec::new();
        write_record(&mut stream, &a).unwrap();
        write_record(&mut stream, &a).unwrap();
        stream.truncate(stream.len() - 10);

        let mut reader = stream.as_slice();
        assert!(read_record(&mut reader, 2).unwrap().is_some());
        assert!(matches!(
            read_record(&mut reader, 2),
            Err(CodecError::Truncated { .. })
        ));

        let mut empty: &[u8] = &[];
        assert!(read_record(&mut empty, 2).unwrap().is_none());
    }

    #[test]
    fn test_oversized_tx_per_block_rejected_before_reading() {
        assert_eq!(record_len(usize::MAX / 8), usize::MAX);

        let mut reader: &[u8] = b"DEIB0123";
        assert!(matches!(
            read_record(&mut reader, MAX_TX_PER_BLOCK + 1),
            Err(CodecError::CountMismatch {
                expected: MAX_TX_PER_BLOCK,
                ..
            })
        ));
        // Nothing was consumed
        assert_eq!(reader.len(), 8);

        assert!(matches!(
            decode(&[], usize::MAX),
            Err(CodecError::CountMismatch { .. })
        ));
    }
}

//! Single-block fast path for 33-byte records
//!
//! A compressed public key plus the `0x80` marker and the 64-bit length fits
//! in one 64-byte block, so each record costs exactly one compression. This
//! is the per-thread algorithm the device kernel runs.

use crate::sha256::{state_to_digest, transform, IV};
use crate::{Hash, Record, BLOCK_LEN, RECORD_LEN};

/// Bit length of a record, stored in the last 8 bytes of its padded block
pub const RECORD_BIT_LEN: u64 = (RECORD_LEN as u64) * 8;

/// Build the padded SHA-256 block for one record
pub fn padded_block(record: &Record) -> [u8; BLOCK_LEN] {
    let mut block = [0u8; BLOCK_LEN];
    block[..RECORD_LEN].copy_from_slice(record);
    block[RECORD_LEN] = 0x80;
    block[BLOCK_LEN - 8..].copy_from_slice(&RECORD_BIT_LEN.to_be_bytes());
    block
}

/// Hash one record with a single compression from the IV
#[inline]
pub fn hash_record(record: &Record) -> Hash {
    let mut state = IV;
    transform(&mut state, &padded_block(record));
    state_to_digest(&state)
}

/// Borrow the `index`-th record out of a packed buffer
///
/// Returns `None` if the buffer does not hold that many whole records.
pub fn record_at(input: &[u8], index: usize) -> Option<&Record> {
    let start = index.checked_mul(RECORD_LEN)?;
    let end = start.checked_add(RECORD_LEN)?;
    input.get(start..end)?.try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GENERATOR_RECORD;
    use proptest::prelude::*;

    #[test]
    fn test_padded_block_layout() {
        let block = padded_block(&GENERATOR_RECORD);
        assert_eq!(&block[..RECORD_LEN], &GENERATOR_RECORD[..]);
        assert_eq!(block[33], 0x80);
        assert!(block[34..56].iter().all(|&b| b == 0));
        // 264 bits = 0x0108
        assert_eq!(&block[56..], &[0, 0, 0, 0, 0, 0, 0x01, 0x08]);
    }

    #[test]
    fn test_generator_record_vector() {
        assert_eq!(
            hex::encode(hash_record(&GENERATOR_RECORD)),
            "0f715baf5d4c2ed329785cef29e562f73488c8a2bb9dbc5700b361d54b9b0554"
        );
    }

    #[test]
    fn test_last_byte_variants() {
        let mut record = GENERATOR_RECORD;
        record[32] = 0x00;
        assert_eq!(
            hex::encode(hash_record(&record)),
            "849bceac86db70ea24200adcbc31bd0eef2dce5524735763af968b7bb2b8355d"
        );
        record[32] = 0xff;
        assert_eq!(
            hex::encode(hash_record(&record)),
            "5aa5391366c1fb1caf7cb5d70580e4379c9684e3e655e27f9d769b1d7e9d0d65"
        );
    }

    #[test]
    fn test_record_at() {
        let mut input = vec![0u8; RECORD_LEN * 3];
        input[RECORD_LEN * 2] = 7;
        assert_eq!(record_at(&input, 2).map(|r| r[0]), Some(7));
        assert!(record_at(&input, 3).is_none());
        assert!(record_at(&input[..RECORD_LEN * 2 + 1], 2).is_none());
        assert!(record_at(&input, usize::MAX).is_none());
    }

    proptest! {
        /// Property: the single-block path agrees with the streaming engine
        #[test]
        fn fast_path_matches_streaming(record in prop::array::uniform32(any::<u8>()), last in any::<u8>()) {
            let mut full = [0u8; RECORD_LEN];
            full[..32].copy_from_slice(&record);
            full[32] = last;
            prop_assert_eq!(hash_record(&full), crate::hash(&full));
        }
    }
}

//! Cross-check device digests against the CPU engine
//!
//! A kernel bug can corrupt any subset of records, so every digest is
//! recomputed and compared. Nothing here samples.

use std::fmt;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::session::AcceleratorSession;
use crate::{Hash, Result, DIGEST_LEN, RECORD_LEN};

/// One record whose device digest differs from the CPU digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    /// Record index within the batch
    pub index: usize,
    /// Digest from the CPU engine
    pub expected: Hash,
    /// Digest from the device
    pub actual: Hash,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "record {}: expected {}, got {}",
            self.index,
            hex::encode(self.expected),
            hex::encode(self.actual)
        )
    }
}

/// Outcome of a full comparison
#[derive(Debug, Clone, Default)]
pub struct VerificationReport {
    /// Records compared
    pub records: usize,
    /// Every record that differed, in index order
    pub mismatches: Vec<Mismatch>,
}

impl VerificationReport {
    /// True when every digest matched
    #[inline]
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty()
    }

    /// Lowest-index mismatch, if any
    pub fn first_mismatch(&self) -> Option<&Mismatch> {
        self.mismatches.first()
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.first_mismatch() {
            None => write!(f, "{} records verified", self.records),
            Some(first) => write!(
                f,
                "{} of {} records mismatched; first at {}",
                self.mismatches.len(),
                self.records,
                first
            ),
        }
    }
}

/// Recompute every record of `input` and compare against `device_output`
///
/// # Errors
/// [`crate::Error::Layout`] unless the buffers hold `33 * N` and `32 * N` bytes.
pub fn compare_digests(input: &[u8], device_output: &[u8]) -> Result<VerificationReport> {
    let records = keyhash::record_count(input, device_output)?;

    // par_iter over indexed chunks keeps the collected order by index
    let mismatches: Vec<Mismatch> = input
        .par_chunks_exact(RECORD_LEN)
        .zip(device_output.par_chunks_exact(DIGEST_LEN))
        .enumerate()
        .filter_map(|(index, (record, actual))| {
            let expected = keyhash::hash(record);
            (expected.as_slice() != actual).then(|| {
                let mut digest = [0u8; DIGEST_LEN];
                digest.copy_from_slice(actual);
                Mismatch { index, expected, actual: digest }
            })
        })
        .collect();

    Ok(VerificationReport { records, mismatches })
}

/// Hash `input` on the device and compare every digest with the CPU engine
///
/// # Errors
/// Layout errors from the CPU side, or any dispatch error from the device.
pub fn verify_session(session: &mut AcceleratorSession, input: &[u8]) -> Result<VerificationReport> {
    if input.len() % RECORD_LEN != 0 {
        return Err(keyhash::Error::RecordLayout { input_len: input.len(), output_len: 0 }.into());
    }
    let count = input.len() / RECORD_LEN;
    let mut output = vec![0u8; count * DIGEST_LEN];
    session.hash_batch(input, &mut output, count)?;

    let report = compare_digests(input, &output)?;
    if report.is_clean() {
        info!("{}", report);
    } else {
        warn!("{}", report);
    }
    Ok(report)
}

/// Packed input of `count` copies of [`keyhash::GENERATOR_RECORD`], record
/// `i` with its last byte replaced by `i mod 256`
pub fn scenario_records(count: usize) -> Vec<u8> {
    let mut input = Vec::with_capacity(count * RECORD_LEN);
    for i in 0..count {
        let mut record = keyhash::GENERATOR_RECORD;
        record[RECORD_LEN - 1] = (i % 256) as u8;
        input.extend_from_slice(&record);
    }
    input
}

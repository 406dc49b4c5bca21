//! Incremental SHA-256 compression engine
//!
//! This is the CPU reference for every digest the device produces. The block
//! compression in [`transform`] is the exact bit-level algorithm the CUDA
//! kernel reproduces per record, so any change here must be mirrored there.

use std::io;

use crate::{Hash, BLOCK_LEN, DIGEST_LEN};

/// Initial hash value (FIPS 180-4, section 5.3.3)
pub const IV: [u32; 8] = [
    0x6a09e667, 0xbb67ae85, 0x3c6ef372, 0xa54ff53a,
    0x510e527f, 0x9b05688c, 0x1f83d9ab, 0x5be0cd19,
];

/// Round constants (FIPS 180-4, section 4.2.2)
pub const K: [u32; 64] = [
    0x428a2f98, 0x71374491, 0xb5c0fbcf, 0xe9b5dba5, 0x3956c25b, 0x59f111f1, 0x923f82a4, 0xab1c5ed5,
    0xd807aa98, 0x12835b01, 0x243185be, 0x550c7dc3, 0x72be5d74, 0x80deb1fe, 0x9bdc06a7, 0xc19bf174,
    0xe49b69c1, 0xefbe4786, 0x0fc19dc6, 0x240ca1cc, 0x2de92c6f, 0x4a7484aa, 0x5cb0a9dc, 0x76f988da,
    0x983e5152, 0xa831c66d, 0xb00327c8, 0xbf597fc7, 0xc6e00bf3, 0xd5a79147, 0x06ca6351, 0x14292967,
    0x27b70a85, 0x2e1b2138, 0x4d2c6dfc, 0x53380d13, 0x650a7354, 0x766a0abb, 0x81c2c92e, 0x92722c85,
    0xa2bfe8a1, 0xa81a664b, 0xc24b8b70, 0xc76c51a3, 0xd192e819, 0xd6990624, 0xf40e3585, 0x106aa070,
    0x19a4c116, 0x1e376c08, 0x2748774c, 0x34b0bcb5, 0x391c0cb3, 0x4ed8aa4a, 0x5b9cca4f, 0x682e6ff3,
    0x748f82ee, 0x78a5636f, 0x84c87814, 0x8cc70208, 0x90befffa, 0xa4506ceb, 0xbef9a3f7, 0xc67178f2,
];

#[inline(always)]
fn ch(x: u32, y: u32, z: u32) -> u32 {
    (x & y) ^ (!x & z)
}

#[inline(always)]
fn maj(x: u32, y: u32, z: u32) -> u32 {
    (x & y) ^ (x & z) ^ (y & z)
}

#[inline(always)]
fn big_sigma0(x: u32) -> u32 {
    x.rotate_right(2) ^ x.rotate_right(13) ^ x.rotate_right(22)
}

#[inline(always)]
fn big_sigma1(x: u32) -> u32 {
    x.rotate_right(6) ^ x.rotate_right(11) ^ x.rotate_right(25)
}

#[inline(always)]
fn small_sigma0(x: u32) -> u32 {
    x.rotate_right(7) ^ x.rotate_right(18) ^ (x >> 3)
}

#[inline(always)]
fn small_sigma1(x: u32) -> u32 {
    x.rotate_right(17) ^ x.rotate_right(19) ^ (x >> 10)
}

/// Compress one 64-byte block into `state`
///
/// The block is read as sixteen big-endian words, expanded to the 64-word
/// message schedule, and run through 64 rounds. The working variables are
/// added back into `state` modulo 2^32.
pub fn transform(state: &mut [u32; 8], block: &[u8; BLOCK_LEN]) {
    compress(state, block);
}

/// Slice form of [`transform`]; `block` must be exactly [`BLOCK_LEN`] bytes.
fn compress(state: &mut [u32; 8], block: &[u8]) {
    debug_assert_eq!(block.len(), BLOCK_LEN);

    let mut w = [0u32; 64];
    for (word, bytes) in w.iter_mut().zip(block.chunks_exact(4)) {
        *word = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    }
    for i in 16..64 {
        w[i] = small_sigma1(w[i - 2])
            .wrapping_add(w[i - 7])
            .wrapping_add(small_sigma0(w[i - 15]))
            .wrapping_add(w[i - 16]);
    }

    let [mut a, mut b, mut c, mut d, mut e, mut f, mut g, mut h] = *state;

    for i in 0..64 {
        let t1 = h
            .wrapping_add(big_sigma1(e))
            .wrapping_add(ch(e, f, g))
            .wrapping_add(K[i])
            .wrapping_add(w[i]);
        let t2 = big_sigma0(a).wrapping_add(maj(a, b, c));
        h = g;
        g = f;
        f = e;
        e = d.wrapping_add(t1);
        d = c;
        c = b;
        b = a;
        a = t1.wrapping_add(t2);
    }

    for (word, v) in state.iter_mut().zip([a, b, c, d, e, f, g, h]) {
        *word = word.wrapping_add(v);
    }
}

/// Serialize the eight state words big-endian
pub(crate) fn state_to_digest(state: &[u32; 8]) -> Hash {
    let mut out = [0u8; DIGEST_LEN];
    for (bytes, word) in out.chunks_exact_mut(4).zip(state) {
        bytes.copy_from_slice(&word.to_be_bytes());
    }
    out
}

/// Streaming SHA-256 hasher
///
/// Holds the running digest, the total byte count and a partial block. The
/// partial block always holds exactly `count % 64` valid bytes between calls,
/// which is what makes the output independent of how input is chunked.
#[derive(Clone, Debug)]
pub struct Sha256 {
    state: [u32; 8],
    count: u64,
    buffer: [u8; BLOCK_LEN],
}

impl Sha256 {
    /// Create a hasher in the initial state
    pub fn new() -> Self {
        Self {
            state: IV,
            count: 0,
            buffer: [0u8; BLOCK_LEN],
        }
    }

    /// Reset to the initial state, discarding any absorbed input
    pub fn init(&mut self) {
        self.state = IV;
        self.count = 0;
    }

    /// Total number of bytes absorbed so far
    #[inline]
    pub fn len(&self) -> u64 {
        self.count
    }

    /// True if nothing has been absorbed since the last reset
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Absorb `data` into the message
    pub fn update(&mut self, data: &[u8]) {
        let mut data = data;
        let buffered = (self.count % BLOCK_LEN as u64) as usize;
        self.count = self.count.wrapping_add(data.len() as u64);

        if buffered > 0 {
            let need = BLOCK_LEN - buffered;
            if data.len() < need {
                self.buffer[buffered..buffered + data.len()].copy_from_slice(data);
                return;
            }
            self.buffer[buffered..].copy_from_slice(&data[..need]);
            compress(&mut self.state, &self.buffer);
            data = &data[need..];
        }

        let mut blocks = data.chunks_exact(BLOCK_LEN);
        for block in &mut blocks {
            compress(&mut self.state, block);
        }

        let rest = blocks.remainder();
        self.buffer[..rest.len()].copy_from_slice(rest);
    }

    /// Pad, run the last compression(s) and return the digest
    ///
    /// Consumes the hasher; use [`Sha256::finalize_reset`] to keep it.
    pub fn finalize(mut self) -> Hash {
        self.finish()
    }

    /// Return the digest and reset the hasher for a new message
    pub fn finalize_reset(&mut self) -> Hash {
        let digest = self.clone().finish();
        self.init();
        digest
    }

    fn finish(&mut self) -> Hash {
        let bit_len = self.count.wrapping_mul(8);
        let mut used = (self.count % BLOCK_LEN as u64) as usize;

        self.buffer[used] = 0x80;
        used += 1;

        // Not enough room for the length: flush this block and pad a fresh one.
        if used > BLOCK_LEN - 8 {
            self.buffer[used..].fill(0);
            compress(&mut self.state, &self.buffer);
            used = 0;
        }

        self.buffer[used..BLOCK_LEN - 8].fill(0);
        self.buffer[BLOCK_LEN - 8..].copy_from_slice(&bit_len.to_be_bytes());
        compress(&mut self.state, &self.buffer);

        state_to_digest(&self.state)
    }
}

impl Default for Sha256 {
    fn default() -> Self {
        Self::new()
    }
}

impl io::Write for Sha256 {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use sha2::Digest;

    fn oracle(data: &[u8]) -> Hash {
        sha2::Sha256::digest(data).into()
    }

    fn one_shot(data: &[u8]) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hasher.finalize()
    }

    #[test]
    fn test_empty_string() {
        assert_eq!(
            hex::encode(one_shot(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_fips_vectors() {
        assert_eq!(
            hex::encode(one_shot(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(
            hex::encode(one_shot(b"abcdbcdecdefdefgefghfghighijhijkijkljklmklmnlmnomnopnopq")),
            "248d6a61d20638b8e5c026930c3e6039a33ce45964ff2167f6ecedd419db06c1"
        );
    }

    #[test]
    fn test_million_a() {
        let mut hasher = Sha256::new();
        let chunk = [b'a'; 1000];
        for _ in 0..1000 {
            hasher.update(&chunk);
        }
        assert_eq!(
            hex::encode(hasher.finalize()),
            "cdc76e5c9914fb9281a1c7e284d73e67f1809a48a497200e046d39ccc7112cd0"
        );
    }

    #[test]
    fn test_padding_boundaries() {
        // 55 bytes fits the length in the same block, 56 does not, 64 is a full block
        assert_eq!(
            hex::encode(one_shot(&[b'a'; 55])),
            "9f4390f8d30c2dd92ec9f095b65e2b9ae9b0a925a5258e241c9f1e910f734318"
        );
        assert_eq!(
            hex::encode(one_shot(&[b'a'; 56])),
            "b35439a4ac6f0948b6d6f9e3c6af0f5f590ce20f1bde7090ef7970686ec6738a"
        );
        assert_eq!(
            hex::encode(one_shot(&[b'a'; 64])),
            "ffe054fe7ae0cb6dc65c3af9b61d5209f439851db43d0ba5997337df154668eb"
        );
        for len in 0..200 {
            let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
            assert_eq!(one_shot(&data), oracle(&data), "length {}", len);
        }
    }

    #[test]
    fn test_transform_single_block_from_iv() {
        // "abc" padded by hand is one block
        let mut block = [0u8; BLOCK_LEN];
        block[..3].copy_from_slice(b"abc");
        block[3] = 0x80;
        block[63] = 24;

        let mut state = IV;
        transform(&mut state, &block);
        assert_eq!(state_to_digest(&state), oracle(b"abc"));
    }

    #[test]
    fn test_byte_at_a_time() {
        let data: Vec<u8> = (0..1000u32).map(|i| (i * 7 + 3) as u8).collect();
        let mut hasher = Sha256::new();
        for byte in &data {
            hasher.update(std::slice::from_ref(byte));
        }
        assert_eq!(hasher.len(), 1000);
        assert_eq!(hasher.finalize(), oracle(&data));
    }

    #[test]
    fn test_init_discards_input() {
        let mut hasher = Sha256::new();
        hasher.update(b"garbage that must not leak into the digest");
        hasher.init();
        assert!(hasher.is_empty());
        hasher.update(b"abc");
        assert_eq!(hasher.finalize(), oracle(b"abc"));
    }

    #[test]
    fn test_finalize_reset() {
        let mut hasher = Sha256::new();
        hasher.update(b"hello");
        let first = hasher.finalize_reset();
        hasher.update(b"hello");
        let second = hasher.finalize_reset();
        assert_eq!(first, second);
        assert_eq!(first, oracle(b"hello"));
        assert!(hasher.is_empty());
    }

    #[test]
    fn test_io_write() {
        let data = vec![0x5au8; 4096];
        let mut hasher = Sha256::new();
        io::copy(&mut &data[..], &mut hasher).unwrap();
        assert_eq!(hasher.finalize(), oracle(&data));
    }

    proptest! {
        /// Property: any partition into consecutive chunks gives the one-shot digest
        #[test]
        fn chunk_invariance(
            data in prop::collection::vec(any::<u8>(), 0..1024),
            cuts in prop::collection::vec(any::<usize>(), 0..16),
        ) {
            let mut points: Vec<usize> = cuts
                .into_iter()
                .map(|c| if data.is_empty() { 0 } else { c % data.len() })
                .collect();
            points.push(0);
            points.push(data.len());
            points.sort_unstable();
            points.dedup();

            let mut hasher = Sha256::new();
            for pair in points.windows(2) {
                hasher.update(&data[pair[0]..pair[1]]);
            }

            prop_assert_eq!(hasher.finalize(), one_shot(&data));
        }

        /// Property: digests agree with an independent implementation
        #[test]
        fn matches_oracle(data in prop::collection::vec(any::<u8>(), 0..4096)) {
            prop_assert_eq!(one_shot(&data), oracle(&data));
        }
    }
}

//! Device kernel source and the contract the host relies on
//!
//! # Kernel contract
//!
//! Any PTX handed to a session must export one entry point named
//! [`KERNEL_ENTRY_POINT`] taking, in order:
//! 1. `const unsigned char *input` - packed 33-byte records
//! 2. `unsigned char *output` - packed 32-byte digests
//! 3. `unsigned int count` - number of records
//!
//! Thread `blockIdx.x * blockDim.x + threadIdx.x` hashes the record with that
//! index and writes its digest at `output + 32 * index`. Threads past `count`
//! must return without touching memory; the last block is usually partial.
//!
//! # Built-in kernel
//!
//! [`SHA256_KERNEL_SOURCE`] is a CUDA C implementation of that contract. A
//! record always fits one padded block, so each thread builds the block in
//! registers and runs one compression from the IV:
//!
//! ```text
//! bytes  0..33   record
//! byte   33      0x80
//! bytes 34..56   zero
//! bytes 56..64   bit length 264, big-endian
//! ```
//!
//! This mirrors `keyhash::hash_record` word for word.

use std::path::{Path, PathBuf};

use cudarc::nvrtc::compile_ptx;
use tracing::debug;

use crate::{Error, Result};

/// Name of the kernel function every module must export
pub const KERNEL_ENTRY_POINT: &str = "sha256_kernel";

/// CUDA C source of the built-in per-record SHA-256 kernel
pub const SHA256_KERNEL_SOURCE: &str = r#"
__constant__ unsigned int SHA256_K[64] = {
    0x428a2f98, 0x71374491, 0xb5c0fbcf, 0xe9b5dba5, 0x3956c25b, 0x59f111f1, 0x923f82a4, 0xab1c5ed5,
    0xd807aa98, 0x12835b01, 0x243185be, 0x550c7dc3, 0x72be5d74, 0x80deb1fe, 0x9bdc06a7, 0xc19bf174,
    0xe49b69c1, 0xefbe4786, 0x0fc19dc6, 0x240ca1cc, 0x2de92c6f, 0x4a7484aa, 0x5cb0a9dc, 0x76f988da,
    0x983e5152, 0xa831c66d, 0xb00327c8, 0xbf597fc7, 0xc6e00bf3, 0xd5a79147, 0x06ca6351, 0x14292967,
    0x27b70a85, 0x2e1b2138, 0x4d2c6dfc, 0x53380d13, 0x650a7354, 0x766a0abb, 0x81c2c92e, 0x92722c85,
    0xa2bfe8a1, 0xa81a664b, 0xc24b8b70, 0xc76c51a3, 0xd192e819, 0xd6990624, 0xf40e3585, 0x106aa070,
    0x19a4c116, 0x1e376c08, 0x2748774c, 0x34b0bcb5, 0x391c0cb3, 0x4ed8aa4a, 0x5b9cca4f, 0x682e6ff3,
    0x748f82ee, 0x78a5636f, 0x84c87814, 0x8cc70208, 0x90befffa, 0xa4506ceb, 0xbef9a3f7, 0xc67178f2
};

__constant__ unsigned int SHA256_IV[8] = {
    0x6a09e667, 0xbb67ae85, 0x3c6ef372, 0xa54ff53a,
    0x510e527f, 0x9b05688c, 0x1f83d9ab, 0x5be0cd19
};

#define ROTR32(x, n) (((x) >> (n)) | ((x) << (32 - (n))))
#define CH(x, y, z) (((x) & (y)) ^ (~(x) & (z)))
#define MAJ(x, y, z) (((x) & (y)) ^ ((x) & (z)) ^ ((y) & (z)))
#define BSIG0(x) (ROTR32(x, 2) ^ ROTR32(x, 13) ^ ROTR32(x, 22))
#define BSIG1(x) (ROTR32(x, 6) ^ ROTR32(x, 11) ^ ROTR32(x, 25))
#define SSIG0(x) (ROTR32(x, 7) ^ ROTR32(x, 18) ^ ((x) >> 3))
#define SSIG1(x) (ROTR32(x, 17) ^ ROTR32(x, 19) ^ ((x) >> 10))

#define RECORD_LEN 33
#define DIGEST_LEN 32

// One thread per record. Grid: (ceil(count / block), 1, 1)
extern "C" __global__ void sha256_kernel(
    const unsigned char *input,
    unsigned char *output,
    unsigned int count
) {
    const unsigned int idx = blockIdx.x * blockDim.x + threadIdx.x;
    if (idx >= count) return;

    const unsigned char *record = input + (unsigned long long)idx * RECORD_LEN;
    unsigned int w[64];

    // Bytes 0..32 -> words 0..7 (big-endian)
    #pragma unroll
    for (int i = 0; i < 8; i++) {
        w[i] = ((unsigned int)record[4 * i] << 24)
             | ((unsigned int)record[4 * i + 1] << 16)
             | ((unsigned int)record[4 * i + 2] << 8)
             | ((unsigned int)record[4 * i + 3]);
    }

    // Byte 32 followed by the 0x80 marker
    w[8] = ((unsigned int)record[32] << 24) | 0x00800000u;

    #pragma unroll
    for (int i = 9; i < 15; i++) {
        w[i] = 0;
    }

    // Message length in bits; the high word (w[14]) is zero
    w[15] = RECORD_LEN * 8;

    #pragma unroll
    for (int i = 16; i < 64; i++) {
        w[i] = SSIG1(w[i - 2]) + w[i - 7] + SSIG0(w[i - 15]) + w[i - 16];
    }

    unsigned int a = SHA256_IV[0];
    unsigned int b = SHA256_IV[1];
    unsigned int c = SHA256_IV[2];
    unsigned int d = SHA256_IV[3];
    unsigned int e = SHA256_IV[4];
    unsigned int f = SHA256_IV[5];
    unsigned int g = SHA256_IV[6];
    unsigned int h = SHA256_IV[7];

    #pragma unroll
    for (int i = 0; i < 64; i++) {
        const unsigned int t1 = h + BSIG1(e) + CH(e, f, g) + SHA256_K[i] + w[i];
        const unsigned int t2 = BSIG0(a) + MAJ(a, b, c);
        h = g;
        g = f;
        f = e;
        e = d + t1;
        d = c;
        c = b;
        b = a;
        a = t1 + t2;
    }

    unsigned int digest[8];
    digest[0] = a + SHA256_IV[0];
    digest[1] = b + SHA256_IV[1];
    digest[2] = c + SHA256_IV[2];
    digest[3] = d + SHA256_IV[3];
    digest[4] = e + SHA256_IV[4];
    digest[5] = f + SHA256_IV[5];
    digest[6] = g + SHA256_IV[6];
    digest[7] = h + SHA256_IV[7];

    unsigned char *out = output + (unsigned long long)idx * DIGEST_LEN;

    #pragma unroll
    for (int i = 0; i < 8; i++) {
        out[4 * i]     = (unsigned char)(digest[i] >> 24);
        out[4 * i + 1] = (unsigned char)(digest[i] >> 16);
        out[4 * i + 2] = (unsigned char)(digest[i] >> 8);
        out[4 * i + 3] = (unsigned char)(digest[i]);
    }
}
"#;

/// Where a session gets its kernel PTX from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum KernelSource {
    /// PTX text file on disk
    PtxFile(PathBuf),
    /// PTX text already in memory
    Ptx(String),
    /// [`SHA256_KERNEL_SOURCE`], compiled to PTX with NVRTC
    #[default]
    Builtin,
}

impl KernelSource {
    /// PTX file source
    pub fn ptx_file(path: impl AsRef<Path>) -> Self {
        Self::PtxFile(path.as_ref().to_path_buf())
    }

    /// Produce the PTX text for the JIT linker
    ///
    /// # Errors
    /// [`Error::KernelSourceRead`] if the file cannot be read,
    /// [`Error::Compilation`] if NVRTC is missing or rejects the built-in source.
    pub fn load_ptx(&self) -> Result<String> {
        match self {
            Self::PtxFile(path) => {
                debug!("Reading kernel PTX from {}", path.display());
                std::fs::read_to_string(path).map_err(|source| Error::KernelSourceRead {
                    path: path.clone(),
                    source,
                })
            }
            Self::Ptx(text) => Ok(text.clone()),
            Self::Builtin => builtin_ptx(),
        }
    }

    /// Short label for logs
    pub fn describe(&self) -> String {
        match self {
            Self::PtxFile(path) => format!("ptx file {}", path.display()),
            Self::Ptx(text) => format!("in-memory ptx ({} bytes)", text.len()),
            Self::Builtin => "built-in CUDA kernel".to_string(),
        }
    }
}

/// Compile the built-in kernel to PTX text
pub fn builtin_ptx() -> Result<String> {
    debug!("Compiling built-in SHA-256 CUDA kernel with NVRTC");
    // NVRTC is loaded lazily and panics when the library is missing.
    let compiled = std::panic::catch_unwind(|| compile_ptx(SHA256_KERNEL_SOURCE))
        .map_err(|_| Error::Compilation("NVRTC library could not be loaded".into()))?;
    let ptx = compiled.map_err(|e| Error::Compilation(format!("{:?}", e)))?;
    Ok(ptx.to_src())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_exports_entry_point() {
        let signature = format!("extern \"C\" __global__ void {}(", KERNEL_ENTRY_POINT);
        assert!(SHA256_KERNEL_SOURCE.contains(&signature));
    }

    #[test]
    fn test_kernel_constants_match_cpu_engine() {
        for k in keyhash::K {
            assert!(
                SHA256_KERNEL_SOURCE.contains(&format!("0x{:08x}", k)),
                "round constant 0x{:08x} missing from kernel",
                k
            );
        }
        for iv in keyhash::IV {
            assert!(SHA256_KERNEL_SOURCE.contains(&format!("0x{:08x}", iv)));
        }
    }

    #[test]
    fn test_missing_ptx_file() {
        let source = KernelSource::ptx_file("/nonexistent/keyhash/sha256_kernel.ptx");
        let err = source.load_ptx().unwrap_err();
        assert!(matches!(err, Error::KernelSourceRead { .. }));
        assert!(err.is_setup());
    }

    #[test]
    fn test_in_memory_ptx_passthrough() {
        let source = KernelSource::Ptx(".version 7.0\n".into());
        assert_eq!(source.load_ptx().unwrap(), ".version 7.0\n");
        assert!(source.describe().contains("13 bytes"));
    }

    #[test]
    fn test_builtin_compiles_when_nvrtc_present() {
        match builtin_ptx() {
            Ok(ptx) => {
                assert!(ptx.contains(".entry sha256_kernel"));
            }
            Err(e) => eprintln!("Skipping NVRTC test - {}", e),
        }
    }
}

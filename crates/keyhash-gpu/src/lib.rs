//! CUDA batch SHA-256 for 33-byte public-key records
//!
//! This crate hashes packed compressed public keys on a CUDA device:
//! - Session lifecycle: device context, JIT-linked kernel, teardown
//! - Batch dispatch with one thread per record and per-launch device memory
//! - Built-in CUDA C kernel, or caller-supplied PTX
//! - Full CPU cross-check of device output
//!
//! # Architecture
//!
//! 1. **Expensive setup once**: [`AcceleratorSession::initialize`] opens
//!    device 0 and JIT-links the kernel at optimization level 4
//! 2. **Self-contained calls**: every dispatch allocates, copies, launches,
//!    synchronizes, reads back and releases; nothing carries over
//! 3. **Scoped resources**: device memory and handles are released on drop,
//!    on every exit path
//! 4. **Bit-identical output**: the kernel matches `keyhash` for every record
//!
//! # Example
//!
//! ```no_run
//! use keyhash_gpu::{AcceleratorSession, KernelSource};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut session = AcceleratorSession::open(&KernelSource::Builtin)?;
//!
//! let records = vec![keyhash::GENERATOR_RECORD; 1024];
//! let digests = session.hash_records(&records)?;
//! assert_eq!(digests[0], keyhash::hash(&keyhash::GENERATOR_RECORD));
//!
//! session.teardown();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod kernel;
pub mod session;
pub mod verify;

mod buffer;
mod jit;

pub use config::{DispatchConfig, JitConfig};
pub use dispatch::{hash_batch, LaunchGeometry};
pub use error::{BufferRole, Error, LinkStage, Result};
pub use jit::JitReport;
pub use kernel::{builtin_ptx, KernelSource, KERNEL_ENTRY_POINT, SHA256_KERNEL_SOURCE};
pub use session::{AcceleratorSession, DEVICE_ORDINAL};
pub use verify::{compare_digests, scenario_records, verify_session, Mismatch, VerificationReport};

pub use keyhash::{Hash, Record, DIGEST_LEN, RECORD_LEN};

// Re-export cudarc types used in the public surface
pub use cudarc::driver::LaunchConfig;

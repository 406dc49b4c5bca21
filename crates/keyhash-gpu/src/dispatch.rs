//! Batch dispatch: one self-contained device round trip per call
//!
//! # Steps per launch
//!
//! 1. Allocate device input (`33 * n`) and output (`32 * n`) regions
//! 2. Copy records host to device
//! 3. Launch `ceil(n / block_size)` blocks of `block_size` threads
//! 4. Synchronize
//! 5. Copy digests device to host
//! 6. Release both regions (on drop, also on every error path)
//!
//! Calls larger than `max_records_per_launch` run these steps once per
//! in-order sub-range. The first failure aborts the call; `output` is then
//! unspecified. Nothing is retried.

use cudarc::driver::{LaunchConfig, PushKernelArg};
use tracing::{debug, trace};

use crate::buffer::DeviceRegion;
use crate::error::BufferRole;
use crate::session::{AcceleratorSession, DeviceSession};
use crate::{Error, Result, DIGEST_LEN, RECORD_LEN};

/// Grid and block dimensions for one launch
///
/// Every record maps to exactly one thread. When the record count is not a
/// multiple of the block size, the surplus threads in the last block find
/// their index out of range and exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchGeometry {
    /// Number of blocks
    pub grid: u32,
    /// Threads per block
    pub block: u32,
}

impl LaunchGeometry {
    /// Geometry for `records` threads in blocks of `block_size`
    pub fn for_records(records: u32, block_size: u32) -> Self {
        Self {
            grid: records.div_ceil(block_size),
            block: block_size,
        }
    }

    /// Total threads launched
    #[inline]
    pub fn threads(&self) -> u64 {
        u64::from(self.grid) * u64::from(self.block)
    }

    /// Threads that will find no record to hash
    #[inline]
    pub fn idle_threads(&self, records: u32) -> u64 {
        self.threads() - u64::from(records)
    }
}

impl From<LaunchGeometry> for LaunchConfig {
    fn from(geometry: LaunchGeometry) -> Self {
        LaunchConfig {
            grid_dim: (geometry.grid, 1, 1),
            block_dim: (geometry.block, 1, 1),
            shared_mem_bytes: 0,
        }
    }
}

/// Hash `count` packed records on the device
///
/// On success, `output[32*i..32*i+32]` is the SHA-256 of
/// `input[33*i..33*i+33]` for every `i < count`.
///
/// # Errors
/// - [`Error::NotInitialized`], [`Error::EmptyBatch`], [`Error::BufferSize`]
///   before any device work
/// - [`Error::Allocation`], [`Error::Transfer`], [`Error::Launch`],
///   [`Error::Execution`], [`Error::Readback`] from the device round trip
///
/// None of these affect the session; it stays usable for the next call.
pub fn hash_batch(
    session: &mut AcceleratorSession,
    input: &[u8],
    output: &mut [u8],
    count: usize,
) -> Result<()> {
    let config = *session.dispatch_config();
    let device = session.device()?;

    if count == 0 {
        return Err(Error::EmptyBatch);
    }
    let input_len = count
        .checked_mul(RECORD_LEN)
        .ok_or_else(|| Error::buffer_size(BufferRole::Input, usize::MAX, input.len()))?;
    if input.len() != input_len {
        return Err(Error::buffer_size(BufferRole::Input, input_len, input.len()));
    }
    let output_len = count * DIGEST_LEN;
    if output.len() != output_len {
        return Err(Error::buffer_size(BufferRole::Output, output_len, output.len()));
    }

    let per_launch = config.max_records_per_launch;
    let launches = count.div_ceil(per_launch);
    debug!(
        "Dispatching {} records in {} launch(es) of up to {}",
        count, launches, per_launch
    );

    for (records, digests) in input
        .chunks(per_launch * RECORD_LEN)
        .zip(output.chunks_mut(per_launch * DIGEST_LEN))
    {
        launch_records(device, config.block_size, records, digests)?;
    }

    Ok(())
}

/// One acquire/copy/launch/sync/readback/release cycle
fn launch_records(
    device: &DeviceSession,
    block_size: u32,
    input: &[u8],
    output: &mut [u8],
) -> Result<()> {
    let count = input.len() / RECORD_LEN;
    // Bounded by max_records_per_launch, which validate() keeps within a u32
    // count and the grid limit.
    let count_u32 = u32::try_from(count)
        .map_err(|_| Error::InvalidConfig(format!("{} records exceed one launch", count)))?;
    let geometry = LaunchGeometry::for_records(count_u32, block_size);
    trace!(
        "Launch config: grid={}, block={}, idle threads={}",
        geometry.grid,
        geometry.block,
        geometry.idle_threads(count_u32)
    );

    let stream = &device.stream;

    // 1. Allocate device regions (released on drop)
    let mut d_input = DeviceRegion::alloc(stream, input.len())?;
    let mut d_output = DeviceRegion::alloc(stream, output.len())?;

    // 2. Transfer records to GPU
    d_input.upload(input)?;

    // 3. Launch kernel
    unsafe {
        stream
            .launch_builder(&device.kernel)
            .arg(d_input.as_slice())
            .arg(d_output.as_mut_slice())
            .arg(&count_u32)
            .launch(LaunchConfig::from(geometry))
            .map_err(|e| Error::Launch(format!("{:?}", e)))?;
    }

    // 4. Synchronize stream to ensure kernel completion
    stream
        .synchronize()
        .map_err(|e| Error::Execution(format!("{:?}", e)))?;

    // 5. Transfer digests back
    d_output.download(output)?;

    trace!("GPU batch of {} records completed", count);
    Ok(())
}

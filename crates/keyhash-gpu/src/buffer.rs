//! Device memory regions scoped to one launch

use crate::{Error, Result};
use cudarc::driver::{CudaSlice, CudaStream};
use std::sync::Arc;

/// A device byte region with automatic release
///
/// Owns device memory and frees it when dropped, so every exit from a
/// dispatch (including `?` on a failed copy or launch) releases what that
/// dispatch acquired. Failures map to the per-call error they represent.
pub(crate) struct DeviceRegion {
    slice: CudaSlice<u8>,
    stream: Arc<CudaStream>,
}

impl DeviceRegion {
    /// Allocate `len` zeroed bytes on the stream's device
    ///
    /// # Errors
    /// [`Error::Allocation`] if the driver cannot provide the memory
    pub fn alloc(stream: &Arc<CudaStream>, len: usize) -> Result<Self> {
        let slice = stream
            .alloc_zeros::<u8>(len)
            .map_err(|e| Error::allocation(len, e))?;

        Ok(Self { slice, stream: stream.clone() })
    }

    /// Region length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.slice.len()
    }

    /// Get immutable reference to the underlying CudaSlice
    #[inline]
    pub fn as_slice(&self) -> &CudaSlice<u8> {
        &self.slice
    }

    /// Get mutable reference to the underlying CudaSlice
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut CudaSlice<u8> {
        &mut self.slice
    }

    /// Copy `src` from the host into this region
    ///
    /// # Errors
    /// [`Error::Transfer`] on a length mismatch or driver failure
    pub fn upload(&mut self, src: &[u8]) -> Result<()> {
        if src.len() != self.len() {
            return Err(Error::Transfer(format!(
                "Source length {} does not match region length {}",
                src.len(),
                self.len()
            )));
        }

        self.stream
            .memcpy_htod(src, &mut self.slice)
            .map_err(|e| Error::Transfer(format!("{:?}", e)))
    }

    /// Copy this region back into `dst`
    ///
    /// # Errors
    /// [`Error::Readback`] on a length mismatch or driver failure
    pub fn download(&self, dst: &mut [u8]) -> Result<()> {
        if dst.len() != self.len() {
            return Err(Error::Readback(format!(
                "Destination length {} does not match region length {}",
                dst.len(),
                self.len()
            )));
        }

        self.stream
            .memcpy_dtoh(&self.slice, dst)
            .map_err(|e| Error::Readback(format!("{:?}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cudarc::driver::CudaContext;

    fn try_stream() -> Option<Arc<CudaStream>> {
        match std::panic::catch_unwind(|| CudaContext::new(0)) {
            Ok(Ok(ctx)) => Some(ctx.default_stream()),
            _ => {
                eprintln!("Skipping GPU test - no GPU available");
                None
            }
        }
    }

    #[test]
    fn test_region_roundtrip() {
        if let Some(stream) = try_stream() {
            let original: Vec<u8> = (0..=255).collect();
            let mut region = DeviceRegion::alloc(&stream, original.len()).unwrap();
            region.upload(&original).unwrap();

            let mut back = vec![0u8; original.len()];
            region.download(&mut back).unwrap();
            assert_eq!(back, original);
        }
    }

    #[test]
    fn test_region_length_mismatch() {
        if let Some(stream) = try_stream() {
            let mut region = DeviceRegion::alloc(&stream, 64).unwrap();
            assert!(matches!(region.upload(&[0u8; 63]), Err(Error::Transfer(_))));

            let mut dst = vec![0u8; 65];
            assert!(matches!(region.download(&mut dst), Err(Error::Readback(_))));
        }
    }

    #[test]
    fn test_region_starts_zeroed() {
        if let Some(stream) = try_stream() {
            let region = DeviceRegion::alloc(&stream, 128).unwrap();
            let mut dst = vec![0xFFu8; 128];
            region.download(&mut dst).unwrap();
            assert!(dst.iter().all(|&b| b == 0));
        }
    }
}

//! Accelerator session: device context and loaded kernel
//!
//! A session is `Uninitialized` until [`AcceleratorSession::initialize`]
//! succeeds, then `Initialized` until [`AcceleratorSession::teardown`] (or
//! drop). The context, module and kernel handles exist exactly while the
//! session is initialized; they live in one `Option` so there is no state in
//! which some of them are set and others are not.
//!
//! Initialization JIT-compiles the kernel, which is expensive. Do it once per
//! process per kernel variant and reuse the session for every batch.

use std::panic;
use std::sync::Arc;

use cudarc::driver::{sys, CudaContext, CudaFunction, CudaModule, CudaStream, DriverError};
use cudarc::nvrtc::Ptx;
use tracing::{debug, info, warn};

use crate::config::{DispatchConfig, JitConfig};
use crate::jit::{self, JitReport};
use crate::kernel::{KernelSource, KERNEL_ENTRY_POINT};
use crate::{dispatch, Error, Hash, Record, Result};

/// Device ordinal used by every session
pub const DEVICE_ORDINAL: usize = 0;

/// Handles owned by an initialized session
///
/// Field order is release order: kernel, module, stream, context.
pub(crate) struct DeviceSession {
    pub kernel: CudaFunction,
    pub module: Arc<CudaModule>,
    pub stream: Arc<CudaStream>,
    pub ctx: Arc<CudaContext>,
    pub device_name: String,
    pub report: JitReport,
}

/// Owner of one device context and its SHA-256 kernel
///
/// Dispatch takes `&mut self`: the context and in-flight allocations are not
/// safe for concurrent use, so one session serves one host thread at a time.
pub struct AcceleratorSession {
    jit: JitConfig,
    dispatch: DispatchConfig,
    device: Option<DeviceSession>,
}

impl AcceleratorSession {
    /// Create an uninitialized session
    pub fn new(jit: JitConfig, dispatch: DispatchConfig) -> Self {
        Self { jit, dispatch, device: None }
    }

    /// Create and initialize a session with default settings
    pub fn open(source: &KernelSource) -> Result<Self> {
        let mut session = Self::default();
        session.initialize(source)?;
        Ok(session)
    }

    /// Whether the kernel is loaded and dispatch is possible
    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.device.is_some()
    }

    /// Name of the device, once initialized
    pub fn device_name(&self) -> Option<&str> {
        self.device.as_ref().map(|d| d.device_name.as_str())
    }

    /// Link timing and info log from the last successful initialize
    pub fn jit_report(&self) -> Option<&JitReport> {
        self.device.as_ref().map(|d| &d.report)
    }

    /// JIT settings used by `initialize`
    pub fn jit_config(&self) -> &JitConfig {
        &self.jit
    }

    /// Launch settings used by dispatch
    pub fn dispatch_config(&self) -> &DispatchConfig {
        &self.dispatch
    }

    /// Replace the launch settings
    ///
    /// Takes effect on the next dispatch; the loaded kernel is unaffected.
    pub fn set_dispatch_config(&mut self, dispatch: DispatchConfig) -> Result<()> {
        dispatch.validate()?;
        self.dispatch = dispatch;
        Ok(())
    }

    /// Open device 0, JIT-link the kernel and resolve its entry point
    ///
    /// The kernel source is resolved first (file read or NVRTC compile) so
    /// a bad path fails without touching the driver. On any failure nothing
    /// is retained and the session stays uninitialized.
    ///
    /// # Errors
    /// - [`Error::AlreadyInitialized`] if called twice without `teardown`
    /// - any setup error (see [`Error::is_setup`])
    pub fn initialize(&mut self, source: &KernelSource) -> Result<()> {
        if self.is_initialized() {
            return Err(Error::AlreadyInitialized);
        }
        self.jit.validate()?;
        self.dispatch.validate()?;

        info!("Initializing SHA-256 session from {}", source.describe());
        let ptx = source.load_ptx()?;

        let ctx = open_context(DEVICE_ORDINAL)?;
        let device_name = ctx.name().unwrap_or_else(|e| {
            warn!("Failed to get device name: {:?}", e);
            format!("cuda:{}", DEVICE_ORDINAL)
        });
        info!("CUDA device initialized: {}", device_name);

        let image = jit::link_ptx(&ctx, &ptx, &self.jit)?;

        debug!("Loading SHA-256 CUDA module");
        let module = ctx
            .load_module(Ptx::from_binary(image.cubin))
            .map_err(|e| Error::ModuleLoad(format!("{:?}", e)))?;

        debug!("Loading {} function", KERNEL_ENTRY_POINT);
        let kernel = module
            .load_function(KERNEL_ENTRY_POINT)
            .map_err(|e| Error::EntryPointNotFound {
                name: KERNEL_ENTRY_POINT.to_string(),
                message: format!("{:?}", e),
            })?;

        let stream = ctx.default_stream();

        self.device = Some(DeviceSession {
            kernel,
            module,
            stream,
            ctx,
            device_name,
            report: image.report,
        });
        debug!("Created SHA-256 GPU session");
        Ok(())
    }

    /// Release kernel, module and context; no-op when uninitialized
    pub fn teardown(&mut self) {
        let Some(device) = self.device.take() else {
            return;
        };

        let DeviceSession { kernel, module, stream, ctx, device_name, .. } = device;
        if let Err(e) = stream.synchronize() {
            warn!("Stream sync during teardown failed: {:?}", e);
        }
        drop(kernel);
        drop(module);
        drop(stream);
        drop(ctx);
        debug!("Released SHA-256 session on {}", device_name);
    }

    /// Hash `count` packed records from `input` into `output`
    ///
    /// See [`dispatch::hash_batch`].
    pub fn hash_batch(&mut self, input: &[u8], output: &mut [u8], count: usize) -> Result<()> {
        dispatch::hash_batch(self, input, output, count)
    }

    /// Hash a slice of records, returning one digest per record
    pub fn hash_records(&mut self, records: &[Record]) -> Result<Vec<Hash>> {
        let mut digests = vec![[0u8; keyhash::DIGEST_LEN]; records.len()];
        self.hash_batch(records.as_flattened(), digests.as_flattened_mut(), records.len())?;
        Ok(digests)
    }

    /// Handles for dispatch
    pub(crate) fn device(&self) -> Result<&DeviceSession> {
        self.device.as_ref().ok_or(Error::NotInitialized)
    }
}

impl Default for AcceleratorSession {
    fn default() -> Self {
        Self::new(JitConfig::default(), DispatchConfig::default())
    }
}

impl Drop for AcceleratorSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for AcceleratorSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcceleratorSession")
            .field("initialized", &self.is_initialized())
            .field("device_name", &self.device_name())
            .field("jit", &self.jit)
            .field("dispatch", &self.dispatch)
            .finish()
    }
}

/// Create the context for `ordinal`, classifying driver failures
fn open_context(ordinal: usize) -> Result<Arc<CudaContext>> {
    debug!("Initializing CUDA device {}", ordinal);
    // The driver library is loaded lazily and panics when absent.
    let created = panic::catch_unwind(|| CudaContext::new(ordinal))
        .map_err(|_| Error::DriverUnavailable("CUDA driver library could not be loaded".into()))?;
    created.map_err(|e| classify_context_error(ordinal, e))
}

fn classify_context_error(device_id: usize, err: DriverError) -> Error {
    match err.0 {
        sys::CUresult::CUDA_ERROR_NO_DEVICE | sys::CUresult::CUDA_ERROR_INVALID_DEVICE => {
            Error::DeviceNotFound { device_id }
        }
        sys::CUresult::CUDA_ERROR_NOT_INITIALIZED
        | sys::CUresult::CUDA_ERROR_SYSTEM_DRIVER_MISMATCH
        | sys::CUresult::CUDA_ERROR_COMPAT_NOT_SUPPORTED_ON_DEVICE => {
            Error::DriverUnavailable(format!("{:?}", err))
        }
        _ => Error::ContextCreation { device_id, message: format!("{:?}", err) },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_uninitialized() {
        let session = AcceleratorSession::default();
        assert!(!session.is_initialized());
        assert!(session.device_name().is_none());
        assert!(session.jit_report().is_none());
    }

    #[test]
    fn test_teardown_uninitialized_is_noop() {
        let mut session = AcceleratorSession::default();
        session.teardown();
        session.teardown();
        assert!(!session.is_initialized());
    }

    #[test]
    fn test_dispatch_requires_initialize() {
        let mut session = AcceleratorSession::default();
        let mut output = [0u8; 32];
        let err = session.hash_batch(&keyhash::GENERATOR_RECORD, &mut output, 1).unwrap_err();
        assert!(matches!(err, Error::NotInitialized));
        assert!(err.is_per_call());
    }

    #[test]
    fn test_missing_kernel_file_leaves_session_uninitialized() {
        let mut session = AcceleratorSession::default();
        let err = session
            .initialize(&KernelSource::ptx_file("/nonexistent/ptx/sha256_kernel_full.ptx"))
            .unwrap_err();
        assert!(matches!(err, Error::KernelSourceRead { .. }));
        assert!(!session.is_initialized());
    }

    #[test]
    fn test_invalid_config_rejected_before_device() {
        let mut session =
            AcceleratorSession::new(JitConfig::default().with_optimization_level(9), DispatchConfig::default());
        let err = session.initialize(&KernelSource::Ptx(String::new())).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));

        let mut session = AcceleratorSession::default();
        assert!(session
            .set_dispatch_config(DispatchConfig::default().with_block_size(0))
            .is_err());
        assert_eq!(session.dispatch_config().block_size, 128);
    }

    #[test]
    fn test_context_error_classification() {
        let err = classify_context_error(0, DriverError(sys::CUresult::CUDA_ERROR_NO_DEVICE));
        assert!(matches!(err, Error::DeviceNotFound { device_id: 0 }));

        let err = classify_context_error(0, DriverError(sys::CUresult::CUDA_ERROR_SYSTEM_DRIVER_MISMATCH));
        assert!(matches!(err, Error::DriverUnavailable(_)));

        let err = classify_context_error(0, DriverError(sys::CUresult::CUDA_ERROR_NOT_INITIALIZED));
        assert!(err.is_setup());

        let err = classify_context_error(0, DriverError(sys::CUresult::CUDA_ERROR_OUT_OF_MEMORY));
        assert!(matches!(err, Error::ContextCreation { .. }));
    }

    #[test]
    fn test_initialize_twice_rejected() {
        let mut session = AcceleratorSession::default();
        if session.initialize(&KernelSource::Builtin).is_err() {
            eprintln!("Skipping GPU test - no GPU available");
            return;
        }
        assert!(matches!(session.initialize(&KernelSource::Builtin), Err(Error::AlreadyInitialized)));
        assert!(session.is_initialized());

        session.teardown();
        assert!(!session.is_initialized());
        session.initialize(&KernelSource::Builtin).unwrap();
        assert!(session.jit_report().is_some());
    }
}

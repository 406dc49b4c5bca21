//! PTX JIT linking with optimization and log capture
//!
//! `CudaContext::load_module` JIT-compiles PTX with driver defaults and no
//! diagnostics. Session setup instead drives the driver linker directly so
//! it can request the maximum optimization level and keep bounded info and
//! error logs. The linked cubin is copied out and loaded through cudarc as a
//! binary image.

use std::ffi::{c_uint, c_void, CString};
use std::ptr;

use cudarc::driver::{sys, CudaContext};
use tracing::{debug, info};

use crate::config::JitConfig;
use crate::error::LinkStage;
use crate::{Error, Result};

/// Name the linker reports for the PTX input in its logs
const PTX_INPUT_NAME: &str = "sha256_kernel.ptx";

/// Outcome of a successful link
#[derive(Debug, Clone, Default)]
pub struct JitReport {
    /// Wall-clock time the driver spent compiling and linking
    pub wall_time_ms: f32,
    /// Linker info log (register usage, spills, ...)
    pub info_log: String,
    /// Size of the linked image in bytes
    pub image_size: usize,
}

/// Linked device image plus its report
pub(crate) struct LinkedImage {
    pub cubin: Vec<u8>,
    pub report: JitReport,
}

/// Owns a `CUlinkState`; destroyed on every exit path
struct LinkState(sys::CUlinkState);

impl Drop for LinkState {
    fn drop(&mut self) {
        if !self.0.is_null() {
            // SAFETY: the handle came from a successful cuLinkCreate and is destroyed once.
            unsafe {
                let _ = sys::cuLinkDestroy(self.0);
            }
        }
    }
}

/// Text of a NUL-terminated log buffer
fn log_text(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).trim_end().to_string()
}

/// JIT-compile and link `ptx` for the device owning `ctx`
///
/// # Errors
/// [`Error::Link`] with the failing stage and the linker's error log.
pub(crate) fn link_ptx(ctx: &CudaContext, ptx: &str, config: &JitConfig) -> Result<LinkedImage> {
    config.validate()?;
    ctx.bind_to_thread()
        .map_err(|e| Error::link(LinkStage::BindContext, e, String::new()))?;

    let source = CString::new(ptx).map_err(|e| Error::link(LinkStage::AddData, e, String::new()))?;
    let source_name = CString::new(PTX_INPUT_NAME)
        .map_err(|e| Error::link(LinkStage::AddData, e, String::new()))?;

    let log_size = config.log_buffer_size;
    let mut info_log = vec![0u8; log_size];
    let mut error_log = vec![0u8; log_size];

    // Option and value arrays must outlive the link state; `state` is declared
    // after them and therefore dropped first.
    let mut options = [
        sys::CUjit_option::CU_JIT_WALL_TIME,
        sys::CUjit_option::CU_JIT_INFO_LOG_BUFFER,
        sys::CUjit_option::CU_JIT_INFO_LOG_BUFFER_SIZE_BYTES,
        sys::CUjit_option::CU_JIT_ERROR_LOG_BUFFER,
        sys::CUjit_option::CU_JIT_ERROR_LOG_BUFFER_SIZE_BYTES,
        sys::CUjit_option::CU_JIT_LOG_VERBOSE,
        sys::CUjit_option::CU_JIT_OPTIMIZATION_LEVEL,
    ];
    let mut values: [*mut c_void; 7] = [
        ptr::null_mut(),
        info_log.as_mut_ptr().cast(),
        log_size as *mut c_void,
        error_log.as_mut_ptr().cast(),
        log_size as *mut c_void,
        usize::from(config.verbose) as *mut c_void,
        config.optimization_level as usize as *mut c_void,
    ];

    let mut raw = ptr::null_mut();
    // SAFETY: option/value arrays have equal length and outlive the state.
    unsafe {
        sys::cuLinkCreate_v2(
            options.len() as c_uint,
            options.as_mut_ptr(),
            values.as_mut_ptr(),
            &mut raw,
        )
    }
    .result()
    .map_err(|e| Error::link(LinkStage::Create, e, log_text(&error_log)))?;
    let state = LinkState(raw);

    debug!("Adding {} bytes of PTX to linker", ptx.len());
    // SAFETY: `source` is NUL-terminated and its length includes the terminator.
    unsafe {
        sys::cuLinkAddData_v2(
            state.0,
            sys::CUjitInputType::CU_JIT_INPUT_PTX,
            source.as_ptr() as *mut c_void,
            source.as_bytes_with_nul().len(),
            source_name.as_ptr(),
            0,
            ptr::null_mut(),
            ptr::null_mut(),
        )
    }
    .result()
    .map_err(|e| Error::link(LinkStage::AddData, e, log_text(&error_log)))?;

    let mut cubin_ptr: *mut c_void = ptr::null_mut();
    let mut cubin_size: usize = 0;
    // SAFETY: out-pointers are valid locals.
    unsafe { sys::cuLinkComplete(state.0, &mut cubin_ptr, &mut cubin_size) }
        .result()
        .map_err(|e| Error::link(LinkStage::Complete, e, log_text(&error_log)))?;

    if cubin_ptr.is_null() || cubin_size == 0 {
        return Err(Error::link(LinkStage::Complete, "empty image", log_text(&error_log)));
    }

    // The image is owned by the link state; copy it before the state is destroyed.
    // SAFETY: the driver reports `cubin_size` readable bytes at `cubin_ptr`.
    let cubin = unsafe { std::slice::from_raw_parts(cubin_ptr as *const u8, cubin_size) }.to_vec();
    drop(state);

    // CU_JIT_WALL_TIME is written back into its value slot as an f32.
    let wall_time_ms = f32::from_bits(values[0] as usize as u32);
    let report = JitReport {
        wall_time_ms,
        info_log: log_text(&info_log),
        image_size: cubin.len(),
    };

    info!("CUDA link completed in {:.3} ms ({} byte image)", report.wall_time_ms, report.image_size);
    if !report.info_log.is_empty() {
        debug!("Linker output:\n{}", report.info_log);
    }

    Ok(LinkedImage { cubin, report })
}

//! Error types for session setup and batch dispatch

use std::path::PathBuf;

/// Result type for GPU operations
pub type Result<T> = std::result::Result<T, Error>;

/// Which host buffer failed a size check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferRole {
    /// Packed 33-byte records
    Input,
    /// Packed 32-byte digests
    Output,
}

impl std::fmt::Display for BufferRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Input => f.write_str("input"),
            Self::Output => f.write_str("output"),
        }
    }
}

/// Step of the JIT link that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStage {
    /// Making the context current on this thread
    BindContext,
    /// `cuLinkCreate`
    Create,
    /// `cuLinkAddData` (PTX parse and compile)
    AddData,
    /// `cuLinkComplete`
    Complete,
}

impl std::fmt::Display for LinkStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::BindContext => "bind context",
            Self::Create => "create linker",
            Self::AddData => "add PTX",
            Self::Complete => "complete link",
        };
        f.write_str(name)
    }
}

/// GPU operation errors
///
/// Setup variants mean the session never became usable. Per-call variants
/// abort one dispatch and leave the session usable.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The CUDA driver library could not be loaded or initialized
    #[error("CUDA driver unavailable: {0}")]
    DriverUnavailable(String),

    /// No device at the requested ordinal
    #[error("No CUDA device at ordinal {device_id}")]
    DeviceNotFound {
        /// Device ordinal
        device_id: usize,
    },

    /// Context creation on an existing device failed
    #[error("Failed to create CUDA context on device {device_id}: {message}")]
    ContextCreation {
        /// Device ordinal
        device_id: usize,
        /// Error message
        message: String,
    },

    /// Kernel source file could not be read
    #[error("Failed to read kernel source {}: {source}", path.display())]
    KernelSourceRead {
        /// Path that was read
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// NVRTC compilation of the built-in kernel failed
    #[error("Kernel compilation failed: {0}")]
    Compilation(String),

    /// JIT linking of the PTX failed
    #[error("JIT link failed at {stage}: {message}\n{log}")]
    Link {
        /// Failing step
        stage: LinkStage,
        /// Driver error
        message: String,
        /// Linker error log (may be empty)
        log: String,
    },

    /// Loading the linked image as a module failed
    #[error("Module load failed: {0}")]
    ModuleLoad(String),

    /// The module has no function with the kernel's entry-point name
    #[error("Kernel entry point `{name}` not found: {message}")]
    EntryPointNotFound {
        /// Entry-point name looked up
        name: String,
        /// Driver error
        message: String,
    },

    /// `initialize` was called on a session that is already initialized
    #[error("Session is already initialized")]
    AlreadyInitialized,

    /// Dispatch on a session that is not initialized
    #[error("Session is not initialized")]
    NotInitialized,

    /// Dispatch with a record count of zero
    #[error("Batch must contain at least one record")]
    EmptyBatch,

    /// Host buffer length does not match the record count
    #[error("Invalid {which} buffer size: expected {expected} bytes, got {actual}")]
    BufferSize {
        /// Buffer that failed the check
        which: BufferRole,
        /// Required length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Device memory allocation failed
    #[error("GPU memory allocation of {size} bytes failed: {message}")]
    Allocation {
        /// Requested size
        size: usize,
        /// Error message
        message: String,
    },

    /// Host-to-device copy failed
    #[error("Host-to-device transfer failed: {0}")]
    Transfer(String),

    /// Kernel launch was rejected
    #[error("Kernel launch failed: {0}")]
    Launch(String),

    /// Kernel faulted or synchronization failed
    #[error("Kernel execution failed: {0}")]
    Execution(String),

    /// Device-to-host copy failed
    #[error("Device-to-host readback failed: {0}")]
    Readback(String),

    /// Configuration value out of range or unparsable
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Packed buffers rejected by the CPU engine
    #[error(transparent)]
    Layout(#[from] keyhash::Error),
}

impl Error {
    /// Create an allocation error
    #[inline]
    pub fn allocation(size: usize, err: cudarc::driver::DriverError) -> Self {
        Self::Allocation { size, message: format!("{:?}", err) }
    }

    /// Create a link error with the linker's error log attached
    #[inline]
    pub fn link(stage: LinkStage, err: impl std::fmt::Debug, log: String) -> Self {
        Self::Link { stage, message: format!("{:?}", err), log }
    }

    /// Create a buffer size error
    #[inline]
    pub fn buffer_size(which: BufferRole, expected: usize, actual: usize) -> Self {
        Self::BufferSize { which, expected, actual }
    }

    /// True for failures that leave the session unusable
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            Self::DriverUnavailable(_)
                | Self::DeviceNotFound { .. }
                | Self::ContextCreation { .. }
                | Self::KernelSourceRead { .. }
                | Self::Compilation(_)
                | Self::Link { .. }
                | Self::ModuleLoad(_)
                | Self::EntryPointNotFound { .. }
        )
    }

    /// True for failures confined to one call
    ///
    /// Config, layout and lifecycle rejections happen before any session
    /// state changes, so they count here even when raised by `initialize`.
    /// Every variant is exactly one of setup or per-call.
    pub fn is_per_call(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig(_)
                | Self::Layout(_)
                | Self::AlreadyInitialized
                | Self::NotInitialized
                | Self::EmptyBatch
                | Self::BufferSize { .. }
                | Self::Allocation { .. }
                | Self::Transfer(_)
                | Self::Launch(_)
                | Self::Execution(_)
                | Self::Readback(_)
        )
    }
}

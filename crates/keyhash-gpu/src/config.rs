//! Tunables for JIT compilation and batch dispatch
//!
//! Everything is a call-site parameter; there is no configuration file.
//! Both structs derive serde so an embedding application can load them from
//! its own configuration, and `from_env()` applies `KEYHASH_*` overrides on
//! top of the defaults.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::{Error, Result};

/// Environment override for [`JitConfig::optimization_level`]
pub const ENV_JIT_OPT_LEVEL: &str = "KEYHASH_JIT_OPT_LEVEL";
/// Environment override for [`JitConfig::log_buffer_size`]
pub const ENV_JIT_LOG_BYTES: &str = "KEYHASH_JIT_LOG_BYTES";
/// Environment override for [`DispatchConfig::block_size`]
pub const ENV_BLOCK_SIZE: &str = "KEYHASH_BLOCK_SIZE";
/// Environment override for [`DispatchConfig::max_records_per_launch`]
pub const ENV_MAX_RECORDS_PER_LAUNCH: &str = "KEYHASH_MAX_RECORDS_PER_LAUNCH";

/// Highest optimization level accepted by the CUDA JIT
pub const MAX_OPTIMIZATION_LEVEL: u32 = 4;

/// Hardware limit on threads per block
pub const MAX_BLOCK_SIZE: u32 = 1024;

/// Hardware limit on blocks in the x dimension of a grid
pub const MAX_GRID_DIM_X: u32 = (1 << 31) - 1;

/// Settings for the PTX JIT link performed by `initialize`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JitConfig {
    /// `CU_JIT_OPTIMIZATION_LEVEL`, 0..=4
    pub optimization_level: u32,
    /// Size of each of the info and error log buffers in bytes
    pub log_buffer_size: usize,
    /// Ask the linker for verbose info output
    pub verbose: bool,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            optimization_level: MAX_OPTIMIZATION_LEVEL,
            log_buffer_size: 8 * 1024,
            verbose: true,
        }
    }
}

impl JitConfig {
    /// Defaults with `KEYHASH_JIT_*` environment overrides applied
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(level) = env_override(ENV_JIT_OPT_LEVEL)? {
            config.optimization_level = level;
        }
        if let Some(bytes) = env_override(ENV_JIT_LOG_BYTES)? {
            config.log_buffer_size = bytes;
        }
        config.validate()?;
        Ok(config)
    }

    /// Set the optimization level
    pub fn with_optimization_level(mut self, level: u32) -> Self {
        self.optimization_level = level;
        self
    }

    /// Set the size of each log buffer
    pub fn with_log_buffer_size(mut self, bytes: usize) -> Self {
        self.log_buffer_size = bytes;
        self
    }

    /// Enable or disable verbose linker output
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Check ranges
    pub fn validate(&self) -> Result<()> {
        if self.optimization_level > MAX_OPTIMIZATION_LEVEL {
            return Err(Error::InvalidConfig(format!(
                "optimization_level {} exceeds {}",
                self.optimization_level, MAX_OPTIMIZATION_LEVEL
            )));
        }
        if self.log_buffer_size == 0 {
            return Err(Error::InvalidConfig("log_buffer_size must be non-zero".into()));
        }
        Ok(())
    }
}

/// Launch tuning for batch dispatch
///
/// `block_size` trades occupancy against register pressure. The SHA-256
/// kernel keeps the 64-word schedule and eight working variables in
/// registers (about 40 per thread), so 128 threads per block lets several
/// blocks stay resident on each SM. It never affects results.
///
/// `max_records_per_launch` bounds a single launch. Larger calls are split
/// into consecutive launches over in-order sub-ranges. A full launch must fit
/// in [`MAX_GRID_DIM_X`] blocks of `block_size` threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Threads per block
    pub block_size: u32,
    /// Records hashed by one kernel launch
    pub max_records_per_launch: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            block_size: 128,
            max_records_per_launch: 1 << 24,
        }
    }
}

impl DispatchConfig {
    /// Defaults with `KEYHASH_BLOCK_SIZE` / `KEYHASH_MAX_RECORDS_PER_LAUNCH` applied
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(block_size) = env_override(ENV_BLOCK_SIZE)? {
            config.block_size = block_size;
        }
        if let Some(max) = env_override(ENV_MAX_RECORDS_PER_LAUNCH)? {
            config.max_records_per_launch = max;
        }
        config.validate()?;
        Ok(config)
    }

    /// Set threads per block
    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    /// Set the per-launch record limit
    pub fn with_max_records_per_launch(mut self, max: usize) -> Self {
        self.max_records_per_launch = max;
        self
    }

    /// Check ranges
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 || self.block_size > MAX_BLOCK_SIZE {
            return Err(Error::InvalidConfig(format!(
                "block_size {} outside 1..={}",
                self.block_size, MAX_BLOCK_SIZE
            )));
        }
        // The kernel takes the record count as a u32.
        if self.max_records_per_launch == 0 || self.max_records_per_launch > u32::MAX as usize {
            return Err(Error::InvalidConfig(format!(
                "max_records_per_launch {} outside 1..={}",
                self.max_records_per_launch,
                u32::MAX
            )));
        }
        let grid = self.max_records_per_launch.div_ceil(self.block_size as usize);
        if grid > MAX_GRID_DIM_X as usize {
            return Err(Error::InvalidConfig(format!(
                "max_records_per_launch {} needs {} blocks of {}, above the grid limit {}",
                self.max_records_per_launch, grid, self.block_size, MAX_GRID_DIM_X
            )));
        }
        Ok(())
    }
}

fn env_override<T: FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::InvalidConfig(format!("{}={:?} is not a valid value", name, raw))),
        Err(_) => Ok(None),
    }
}

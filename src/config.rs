use thiserror::Error;

use crate::pipeline::TransferParams;
use crate::retry::RetryPolicy;

pub const MIB: u64 = 1024 * 1024;
pub const DEFAULT_BLOCK_SIZE: u64 = 4 * MIB;
pub const DEFAULT_FILES_PER_PIPELINE: usize = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("block size must be greater than zero")]
    ZeroBlockSize,
    #[error("reader and worker counts must be greater than zero")]
    ZeroConcurrency,
    #[error("files_per_pipeline must be greater than zero")]
    ZeroFanOut,
}

/// Knobs for a transfer run. Target-specific limits (page alignment, block
/// caps) are enforced by the targets themselves during preprocess.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub block_size: u64,
    pub num_readers: usize,
    pub num_workers: usize,
    pub files_per_pipeline: usize,
    pub md5: bool,
    pub keep_dir_structure: bool,
    pub target_aliases: Vec<String>,
    pub use_exact_name_match: bool,
    /// Buffer slabs shared by the pipeline; 0 derives a default from the
    /// thread counts.
    pub pool_size: usize,
    pub retry: RetryPolicy,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            num_readers: num_cpus::get(),
            num_workers: num_cpus::get(),
            files_per_pipeline: DEFAULT_FILES_PER_PIPELINE,
            md5: false,
            keep_dir_structure: true,
            target_aliases: Vec::new(),
            use_exact_name_match: false,
            pool_size: 0,
            retry: RetryPolicy::default(),
        }
    }
}

impl TransferConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_size == 0 {
            return Err(ConfigError::ZeroBlockSize);
        }
        if self.num_readers == 0 || self.num_workers == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.files_per_pipeline == 0 {
            return Err(ConfigError::ZeroFanOut);
        }
        Ok(())
    }

    pub fn effective_pool_size(&self) -> usize {
        if self.pool_size > 0 {
            self.pool_size
        } else {
            (self.num_readers + self.num_workers) * 2
        }
    }

    pub fn transfer_params(&self) -> TransferParams {
        TransferParams {
            block_size: self.block_size,
            num_readers: self.num_readers,
            num_workers: self.num_workers,
            pool_size: self.effective_pool_size(),
            md5: self.md5,
            retry: self.retry,
        }
    }
}

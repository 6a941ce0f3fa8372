//! Options shared by every vault handler

use keepsake_core::{ReadSeek, Result, MAX_MMAP_SIZE};
use keepsake_pipeline::MmapPipeline;
use std::fs::File;
use std::path::Path;

/// Default cap on the number of parents a differencing chain may have
pub const DEFAULT_MAX_CHAIN_DEPTH: usize = 16;

/// Configuration for opening a vault
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Use memory mapping for container files
    pub use_mmap: bool,
    /// Maximum number of parent images behind a differencing image
    pub max_chain_depth: usize,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            use_mmap: true,
            max_chain_depth: DEFAULT_MAX_CHAIN_DEPTH,
        }
    }
}

impl VaultConfig {
    /// Read container files through ordinary file I/O
    pub fn without_mmap(mut self) -> Self {
        self.use_mmap = false;
        self
    }

    /// Override the chain depth cap
    pub fn with_max_chain_depth(mut self, depth: usize) -> Self {
        self.max_chain_depth = depth;
        self
    }

    /// Open a container file as the backing stream of a vault
    ///
    /// Files too large to map are read through ordinary file I/O even when
    /// `use_mmap` is set.
    pub fn open_backing(&self, path: &Path) -> Result<(Box<dyn ReadSeek>, u64)> {
        let file = File::open(path)?;
        let length = file.metadata()?.len();

        let stream: Box<dyn ReadSeek> = if self.use_mmap && length <= MAX_MMAP_SIZE {
            Box::new(MmapPipeline::from_file(&file)?)
        } else {
            Box::new(file)
        };

        Ok((stream, length))
    }
}

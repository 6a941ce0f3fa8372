//! Core types for Keepsake

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Serializable description of an opened vault
///
/// Differencing images carry their parent's summary, so the whole chain can
/// be reported from the top-level image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultSummary {
    /// Human-readable format name
    pub format: String,

    /// Logical size in bytes
    pub length: u64,

    /// Logical sector size in bytes
    pub sector_size: u32,

    /// Storage mode, for formats that have one ("fixed", "dynamic", ...)
    pub storage_mode: Option<String>,

    /// Backing file, when opened from a path
    pub path: Option<String>,

    /// Creation timestamp recorded in the container
    pub created: Option<DateTime<Utc>>,

    /// Unique identifier recorded in the container
    pub unique_id: Option<String>,

    /// Application that created the container
    pub creator: Option<String>,

    /// Block size for sparse containers
    pub block_size: Option<u32>,

    /// Allocated blocks / total blocks for sparse containers
    pub allocated_blocks: Option<(u64, u64)>,

    /// Summary of the parent image for differencing containers
    pub parent: Option<Box<VaultSummary>>,
}

impl VaultSummary {
    /// Create a summary with only the mandatory fields
    pub fn new(format: impl Into<String>, length: u64) -> Self {
        Self {
            format: format.into(),
            length,
            sector_size: 512,
            storage_mode: None,
            path: None,
            created: None,
            unique_id: None,
            creator: None,
            block_size: None,
            allocated_blocks: None,
            parent: None,
        }
    }

    /// Set the storage mode
    pub fn with_storage_mode(mut self, mode: impl Into<String>) -> Self {
        self.storage_mode = Some(mode.into());
        self
    }

    /// Set the backing path
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set the creation timestamp
    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = Some(created);
        self
    }

    /// Set the unique identifier
    pub fn with_unique_id(mut self, id: impl Into<String>) -> Self {
        self.unique_id = Some(id.into());
        self
    }

    /// Set the creator description
    pub fn with_creator(mut self, creator: impl Into<String>) -> Self {
        self.creator = Some(creator.into());
        self
    }

    /// Set block allocation statistics
    pub fn with_blocks(mut self, block_size: u32, allocated: u64, total: u64) -> Self {
        self.block_size = Some(block_size);
        self.allocated_blocks = Some((allocated, total));
        self
    }

    /// Attach the parent summary
    pub fn with_parent(mut self, parent: VaultSummary) -> Self {
        self.parent = Some(Box::new(parent));
        self
    }

    /// Number of images in the chain starting at this one
    pub fn chain_depth(&self) -> usize {
        1 + self.parent.as_ref().map_or(0, |p| p.chain_depth())
    }
}

impl fmt::Display for VaultSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.format, format_size(self.length))?;
        if let Some(ref mode) = self.storage_mode {
            write!(f, " {}", mode)?;
        }
        if let Some(ref path) = self.path {
            write!(f, " @ {}", path)?;
        }
        Ok(())
    }
}

/// Format size in human-readable format
pub fn format_size(size: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = size as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

//! # Keepsake Pipeline
//!
//! Stream adapters shared by the vault handlers:
//! - **PartialPipeline**: Bounded window into a stream (fixed image data region)
//! - **MmapPipeline**: Memory-mapped container file
//! - **SectorPipeline**: `Read + Seek` view over any sector reader
//!
//! ## Example
//!
//! ```rust,no_run
//! use keepsake_pipeline::{MmapPipeline, PartialPipeline};
//! use std::io::Read;
//! use std::path::Path;
//!
//! let mmap = MmapPipeline::open(Path::new("fixed.vhd")).unwrap();
//! let data_len = mmap.len() - 512;
//!
//! // Everything but the trailing footer
//! let mut disk = PartialPipeline::new(mmap, 0, data_len).unwrap();
//!
//! let mut boot = [0u8; 512];
//! disk.read_exact(&mut boot).unwrap();
//! ```

pub mod mmap;
pub mod partial;
pub mod sector;

pub use mmap::MmapPipeline;
pub use partial::PartialPipeline;
pub use sector::SectorPipeline;

//! Core traits for Keepsake

use crate::{error::Result, types::VaultSummary};
use std::io::{Read, Seek};

/// Trait for disk image vaults (containers)
pub trait Vault: Send + Sync {
    /// Get a human-readable identifier for this vault type
    fn identify(&self) -> &str;

    /// Get the total size of the logical disk in bytes
    fn length(&self) -> u64;

    /// Get a readable and seekable stream to the vault content
    fn content(&mut self) -> &mut dyn ReadSeek;

    /// Describe the vault for reporting
    fn summary(&self) -> VaultSummary {
        VaultSummary::new(self.identify(), self.length())
    }
}

/// Sector-addressed read access to a logical disk
///
/// This is the contract filesystem decoders and tooling consume. Reads take
/// `&self`; implementations serialize access to their backing stream so a
/// reader can be shared between threads.
pub trait SectorReader: Send + Sync {
    /// Size of one logical sector in bytes
    fn sector_size(&self) -> u32;

    /// Number of addressable sectors
    fn sector_count(&self) -> u64;

    /// Read `count` sectors starting at `start`
    ///
    /// Ranges reaching past [`sector_count`](Self::sector_count) fail with
    /// [`Error::Addressing`](crate::Error::Addressing).
    fn read_sectors(&self, start: u64, count: u32) -> Result<Vec<u8>>;

    /// Logical size in bytes
    fn byte_length(&self) -> u64 {
        self.sector_count() * self.sector_size() as u64
    }
}

impl<T: SectorReader + ?Sized> SectorReader for std::sync::Arc<T> {
    fn sector_size(&self) -> u32 {
        (**self).sector_size()
    }

    fn sector_count(&self) -> u64 {
        (**self).sector_count()
    }

    fn read_sectors(&self, start: u64, count: u32) -> Result<Vec<u8>> {
        (**self).read_sectors(start, count)
    }
}

/// Combined trait for Read + Seek
pub trait ReadSeek: Read + Seek + Send {}

/// Blanket implementation for any type that implements Read + Seek
impl<T: Read + Seek + Send> ReadSeek for T {}

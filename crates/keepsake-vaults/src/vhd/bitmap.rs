//! Per-block sector bitmaps
//!
//! Every allocated block starts with a bitmap holding one bit per sector,
//! most significant bit first. In a differencing image a set bit means the
//! sector is stored in this image; a clear bit defers to the parent.

use super::read_exact_at;
use keepsake_core::{checked_multiply_u64, ReadSeek, Result, SECTOR_SIZE};

/// Bitmap of one block, as read from disk
#[derive(Debug, Clone)]
pub struct DirtyBitmap {
    bits: Vec<u8>,
}

impl DirtyBitmap {
    /// Wrap raw bitmap bytes
    pub fn from_bytes(bits: Vec<u8>) -> Self {
        Self { bits }
    }

    /// True when `sector_in_block` is stored in this image
    pub fn is_dirty(&self, sector_in_block: u32) -> bool {
        let byte = (sector_in_block / 8) as usize;
        let mask = 1u8 << (7 - sector_in_block % 8);
        self.bits.get(byte).is_some_and(|b| b & mask != 0)
    }

    /// Length of the run starting at `start` whose bits all equal the bit at
    /// `start`, capped at `max`
    pub fn run_len(&self, start: u32, max: u32) -> u32 {
        let value = self.is_dirty(start);
        let mut len = 1;
        while len < max && self.is_dirty(start + len) == value {
            len += 1;
        }
        len
    }

    /// Number of set bits among the first `sectors` sectors
    pub fn dirty_count(&self, sectors: u32) -> u32 {
        (0..sectors).filter(|&s| self.is_dirty(s)).count() as u32
    }
}

/// Reads block bitmaps for one image
#[derive(Debug, Clone, Copy)]
pub struct BitmapTracker {
    sectors_per_block: u32,
    bitmap_sectors: u32,
}

impl BitmapTracker {
    pub fn new(sectors_per_block: u32) -> Self {
        let bitmap_bytes = sectors_per_block.div_ceil(8);
        Self {
            sectors_per_block,
            bitmap_sectors: bitmap_bytes.div_ceil(SECTOR_SIZE),
        }
    }

    /// Sectors occupied by each block's bitmap, padding included
    pub fn bitmap_sectors(&self) -> u32 {
        self.bitmap_sectors
    }

    pub fn sectors_per_block(&self) -> u32 {
        self.sectors_per_block
    }

    /// Read the bitmap of the block whose bitmap starts at `block_sector`
    pub fn read(&self, stream: &mut dyn ReadSeek, block_sector: u64) -> Result<DirtyBitmap> {
        let offset = checked_multiply_u64(block_sector, SECTOR_SIZE as u64, "bitmap offset")?;
        let mut bits = vec![0u8; self.bitmap_sectors as usize * SECTOR_SIZE as usize];
        read_exact_at(stream, offset, &mut bits)?;
        Ok(DirtyBitmap::from_bytes(bits))
    }

    /// Test a single sector's bit
    pub fn is_dirty(
        &self,
        stream: &mut dyn ReadSeek,
        block_sector: u64,
        sector_in_block: u32,
    ) -> Result<bool> {
        Ok(self.read(stream, block_sector)?.is_dirty(sector_in_block))
    }
}

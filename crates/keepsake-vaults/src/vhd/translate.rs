//! Logical to physical sector translation

use super::types::{BlockAllocationTable, VhdType};
use keepsake_core::{Error, Result};

/// Nominal block length used to bound segments of fixed images
const FIXED_SECTORS_PER_BLOCK: u32 = 4096;

/// Where a logical sector lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Translation {
    pub block_index: u64,
    pub sector_in_block: u32,
    /// Physical sector in this image's container, `None` for unallocated blocks
    pub physical_sector: Option<u64>,
    /// The sector's data is stored in this image
    ///
    /// False for unallocated blocks (zeros, or the parent in a differencing
    /// image) and for clear bitmap bits of a differencing block.
    pub allocated: bool,
}

/// Maps logical sectors onto a container's layout
#[derive(Debug, Clone)]
pub struct BlockAddressTranslator {
    mode: VhdType,
    sector_count: u64,
    sectors_per_block: u32,
    bitmap_sectors: u32,
    bat: Option<BlockAllocationTable>,
}

impl BlockAddressTranslator {
    /// Identity mapping of a fixed image
    pub fn new_fixed(sector_count: u64) -> Self {
        Self {
            mode: VhdType::Fixed,
            sector_count,
            sectors_per_block: FIXED_SECTORS_PER_BLOCK,
            bitmap_sectors: 0,
            bat: None,
        }
    }

    /// Block mapping of a dynamic or differencing image
    pub fn new_sparse(
        mode: VhdType,
        sector_count: u64,
        sectors_per_block: u32,
        bitmap_sectors: u32,
        bat: BlockAllocationTable,
    ) -> Self {
        Self {
            mode,
            sector_count,
            sectors_per_block,
            bitmap_sectors,
            bat: Some(bat),
        }
    }

    pub fn sector_count(&self) -> u64 {
        self.sector_count
    }

    pub fn sectors_per_block(&self) -> u32 {
        self.sectors_per_block
    }

    pub fn bat(&self) -> Option<&BlockAllocationTable> {
        self.bat.as_ref()
    }

    /// Reject requests reaching past the last sector
    pub fn check_range(&self, start: u64, count: u32) -> Result<()> {
        match start.checked_add(count as u64) {
            Some(end) if end <= self.sector_count => Ok(()),
            _ => Err(Error::addressing(
                start.saturating_add(count.saturating_sub(1) as u64),
                self.sector_count,
            )),
        }
    }

    /// Block index and offset inside the block
    pub fn split(&self, sector: u64) -> (u64, u32) {
        let spb = self.sectors_per_block as u64;
        (sector / spb, (sector % spb) as u32)
    }

    /// Sectors from `sector` to the end of its block, capped at `remaining`
    pub fn segment_len(&self, sector: u64, remaining: u64) -> u32 {
        let (_, sector_in_block) = self.split(sector);
        let to_block_end = (self.sectors_per_block - sector_in_block) as u64;
        remaining.min(to_block_end) as u32
    }

    /// Translate without consulting bitmaps
    ///
    /// Allocated blocks of a differencing image report `allocated = true`
    /// here; use [`translate_with`](Self::translate_with) for the bitmap.
    pub fn locate(&self, sector: u64) -> Result<Translation> {
        self.translate_with(sector, |_, _| Ok(true))
    }

    /// Translate `sector`, asking `is_dirty(block_sector, sector_in_block)`
    /// for the bitmap bit of allocated differencing blocks
    pub fn translate_with<F>(&self, sector: u64, mut is_dirty: F) -> Result<Translation>
    where
        F: FnMut(u64, u32) -> Result<bool>,
    {
        if sector >= self.sector_count {
            return Err(Error::addressing(sector, self.sector_count));
        }
        let (block_index, sector_in_block) = self.split(sector);

        let bat = match (&self.bat, self.mode) {
            (None, _) | (_, VhdType::Fixed) => {
                return Ok(Translation {
                    block_index,
                    sector_in_block,
                    physical_sector: Some(sector),
                    allocated: true,
                })
            }
            (Some(bat), _) => bat,
        };

        let Some(block_sector) = bat.block_sector(block_index)? else {
            return Ok(Translation {
                block_index,
                sector_in_block,
                physical_sector: None,
                allocated: false,
            });
        };

        let physical = block_sector + self.bitmap_sectors as u64 + sector_in_block as u64;
        let allocated = match self.mode {
            VhdType::Differencing => is_dirty(block_sector, sector_in_block)?,
            _ => true,
        };

        Ok(Translation {
            block_index,
            sector_in_block,
            physical_sector: Some(physical),
            allocated,
        })
    }
}

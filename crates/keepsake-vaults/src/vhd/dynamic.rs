//! Dynamic header and Block Allocation Table loader

use super::checksum::{self, DYNAMIC_CHECKSUM};
use super::read_exact_at;
use super::types::{
    BlockAllocationTable, VhdDynamicHeader, VhdFooter, FIXED_DATA_OFFSET, VHD_VERSION,
};
use keepsake_core::{
    align_up_u64, checked_add_u64, validate_allocation_size, Error, ReadSeek, Result,
    MAX_ALLOCATION_SIZE, SECTOR_SIZE,
};
use std::io::SeekFrom;

/// The BAT occupies whole 4 KiB pages on disk
pub const BAT_GRANULARITY: u64 = 4096;

/// Load the dynamic header and BAT of a dynamic or differencing image
pub fn load(
    stream: &mut dyn ReadSeek,
    footer: &VhdFooter,
) -> Result<(VhdDynamicHeader, BlockAllocationTable)> {
    if footer.data_offset == FIXED_DATA_OFFSET {
        return Err(Error::corrupt("Dynamic VHD has no dynamic header offset"));
    }

    let mut bytes = [0u8; VhdDynamicHeader::SIZE];
    read_exact_at(stream, footer.data_offset, &mut bytes)?;

    let header = VhdDynamicHeader::parse(&bytes)?;
    if !checksum::verify(&bytes, DYNAMIC_CHECKSUM) {
        return Err(Error::corrupt(
            "VHD dynamic header checksum verification failed",
        ));
    }
    if header.header_version != VHD_VERSION {
        return Err(Error::UnsupportedVersion {
            structure: "dynamic header",
            version: header.header_version,
        });
    }

    let block_size = header.block_size;
    if block_size == 0 || !block_size.is_power_of_two() || block_size % SECTOR_SIZE != 0 {
        return Err(Error::corrupt(format!(
            "Invalid VHD block size {}",
            block_size
        )));
    }

    let required = footer.current_size.div_ceil(block_size as u64);
    if (header.max_table_entries as u64) < required {
        return Err(Error::corrupt(format!(
            "BAT has {} entries, disk of {} bytes needs {}",
            header.max_table_entries, footer.current_size, required
        )));
    }

    let bat = read_bat(stream, &header)?;
    tracing::debug!(
        entries = bat.len(),
        allocated = bat.allocated_count(),
        block_size,
        "Loaded block allocation table"
    );

    Ok((header, bat))
}

fn read_bat(stream: &mut dyn ReadSeek, header: &VhdDynamicHeader) -> Result<BlockAllocationTable> {
    let entries = header.max_table_entries as u64;
    let needed = entries * 4;
    let span = align_up_u64(needed, BAT_GRANULARITY, "BAT span")?;

    let stream_len = stream.seek(SeekFrom::End(0))?;
    let available = stream_len.saturating_sub(header.table_offset);
    let span = span.min(available);
    if span < needed {
        return Err(Error::corrupt(format!(
            "BAT at offset {} needs {} bytes, only {} remain",
            header.table_offset, needed, available
        )));
    }
    checked_add_u64(header.table_offset, span, "BAT end")?;

    let len = validate_allocation_size(span, MAX_ALLOCATION_SIZE, "BAT")?;
    let mut bytes = vec![0u8; len];
    read_exact_at(stream, header.table_offset, &mut bytes)?;

    BlockAllocationTable::parse(&bytes, entries as usize)
}

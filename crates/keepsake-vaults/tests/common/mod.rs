//! Synthetic VHD images for integration tests
//!
//! Images are encoded here field by field, independently of the crate's own
//! structure encoders.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const SECTOR: usize = 512;
pub const FIXED: u32 = 2;
pub const DYNAMIC: u32 = 3;
pub const DIFFERENCING: u32 = 4;
pub const VERSION: u32 = 0x0001_0000;

/// Ones' complement of the byte sum, skipping the checksum field
pub fn checksum(bytes: &[u8], field: usize) -> u32 {
    let sum = bytes
        .iter()
        .enumerate()
        .filter(|(i, _)| !(field..field + 4).contains(i))
        .fold(0u32, |acc, (_, &b)| acc.wrapping_add(b as u32));
    !sum
}

fn put_u32(bytes: &mut [u8], at: usize, value: u32) {
    bytes[at..at + 4].copy_from_slice(&value.to_be_bytes());
}

fn put_u64(bytes: &mut [u8], at: usize, value: u64) {
    bytes[at..at + 8].copy_from_slice(&value.to_be_bytes());
}

/// A footer with a valid checksum
pub fn footer(disk_type: u32, current_size: u64, data_offset: u64, uuid: [u8; 16]) -> [u8; 512] {
    let mut bytes = [0u8; 512];
    bytes[0..8].copy_from_slice(b"conectix");
    put_u32(&mut bytes, 8, 2);
    put_u32(&mut bytes, 12, VERSION);
    put_u64(&mut bytes, 16, data_offset);
    put_u32(&mut bytes, 24, 0x2000_0000);
    bytes[28..32].copy_from_slice(b"kpsk");
    put_u32(&mut bytes, 32, 0x0001_0000);
    bytes[36..40].copy_from_slice(b"Wi2k");
    put_u64(&mut bytes, 40, current_size);
    put_u64(&mut bytes, 48, current_size);
    bytes[56..60].copy_from_slice(&[0x00, 0x80, 0x10, 0x3F]);
    put_u32(&mut bytes, 60, disk_type);
    bytes[68..84].copy_from_slice(&uuid);
    restamp_footer(&mut bytes);
    bytes
}

/// Recompute the checksum of a footer after editing it
pub fn restamp_footer(bytes: &mut [u8]) {
    let sum = checksum(&bytes[..512], 64);
    put_u32(bytes, 64, sum);
}

/// Sector `s` of the pattern is filled with `seed + s`
pub fn pattern(seed: u8, sectors: usize) -> Vec<u8> {
    (0..sectors)
        .flat_map(|s| std::iter::repeat(seed.wrapping_add(s as u8)).take(SECTOR))
        .collect()
}

/// A fixed image holding `data`
pub fn fixed(data: &[u8], uuid: [u8; 16]) -> Vec<u8> {
    let mut image = data.to_vec();
    image.extend_from_slice(&footer(FIXED, data.len() as u64, u64::MAX, uuid));
    image
}

pub fn utf16be(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(|u| u.to_be_bytes()).collect()
}

/// Write `bytes` to `dir/name`
pub fn write(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

struct Block {
    bitmap: Vec<u8>,
    data: Vec<u8>,
}

/// Builder for dynamic and differencing images
///
/// Layout: footer copy, dynamic header, BAT padded to 4 KiB, locator
/// payloads, blocks in index order, footer.
pub struct SparseBuilder {
    disk_type: u32,
    size: u64,
    block_size: u32,
    uuid: [u8; 16],
    parent_uuid: [u8; 16],
    parent_name: Option<String>,
    locators: Vec<([u8; 4], Vec<u8>, Option<u64>)>,
    blocks: BTreeMap<u64, Block>,
}

impl SparseBuilder {
    pub fn dynamic(size: u64, block_size: u32) -> Self {
        Self::new(DYNAMIC, size, block_size)
    }

    pub fn differencing(size: u64, block_size: u32) -> Self {
        Self::new(DIFFERENCING, size, block_size)
    }

    fn new(disk_type: u32, size: u64, block_size: u32) -> Self {
        Self {
            disk_type,
            size,
            block_size,
            uuid: [0x11; 16],
            parent_uuid: [0; 16],
            parent_name: None,
            locators: Vec::new(),
            blocks: BTreeMap::new(),
        }
    }

    pub fn uuid(mut self, uuid: [u8; 16]) -> Self {
        self.uuid = uuid;
        self
    }

    pub fn parent_uuid(mut self, uuid: [u8; 16]) -> Self {
        self.parent_uuid = uuid;
        self
    }

    pub fn parent_name(mut self, name: &str) -> Self {
        self.parent_name = Some(name.to_string());
        self
    }

    /// Add a locator with a raw payload
    pub fn locator(mut self, code: &[u8; 4], payload: Vec<u8>) -> Self {
        self.locators.push((*code, payload, None));
        self
    }

    /// Add a locator whose payload is recorded at `offset` but never written
    pub fn dangling_locator(mut self, code: &[u8; 4], length: u32, offset: u64) -> Self {
        self.locators.push((*code, vec![0; length as usize], Some(offset)));
        self
    }

    fn sectors_per_block(&self) -> u64 {
        (self.block_size as usize / SECTOR) as u64
    }

    fn bitmap_bytes(&self) -> usize {
        let bytes = (self.sectors_per_block() as usize).div_ceil(8);
        bytes.div_ceil(SECTOR) * SECTOR
    }

    fn block_mut(&mut self, index: u64) -> &mut Block {
        let bitmap_bytes = self.bitmap_bytes();
        let block_size = self.block_size as usize;
        self.blocks.entry(index).or_insert_with(|| Block {
            bitmap: vec![0; bitmap_bytes],
            data: vec![0; block_size],
        })
    }

    /// Allocate a block without marking any sector
    pub fn allocate(mut self, index: u64) -> Self {
        self.block_mut(index);
        self
    }

    /// Store `data` from `first_sector` on and mark those sectors dirty
    pub fn sectors(mut self, first_sector: u64, data: &[u8]) -> Self {
        let spb = self.sectors_per_block();
        for (i, chunk) in data.chunks(SECTOR).enumerate() {
            let sector = first_sector + i as u64;
            let sib = (sector % spb) as usize;
            let block = self.block_mut(sector / spb);
            block.data[sib * SECTOR..sib * SECTOR + chunk.len()].copy_from_slice(chunk);
            block.bitmap[sib / 8] |= 0x80 >> (sib % 8);
        }
        self
    }

    /// Store data in a block but leave its bitmap bits clear
    pub fn hidden_sectors(mut self, first_sector: u64, data: &[u8]) -> Self {
        let spb = self.sectors_per_block();
        for (i, chunk) in data.chunks(SECTOR).enumerate() {
            let sector = first_sector + i as u64;
            let sib = (sector % spb) as usize;
            let block = self.block_mut(sector / spb);
            block.data[sib * SECTOR..sib * SECTOR + chunk.len()].copy_from_slice(chunk);
        }
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let entries = self.size.div_ceil(self.block_size as u64) as usize;
        let bat_span = (entries * 4).div_ceil(4096) * 4096;
        let table_offset = 512 + 1024;

        let mut image = vec![0u8; table_offset + bat_span];
        image[table_offset..].fill(0xFF);

        // Locator payloads, each in its own sector-aligned slot
        let mut locator_entries = Vec::new();
        for (code, payload, dangling) in &self.locators {
            let space = payload.len().div_ceil(SECTOR).max(1) * SECTOR;
            if let Some(offset) = dangling {
                locator_entries.push((*code, space as u32, payload.len() as u32, *offset));
                continue;
            }
            let offset = image.len();
            image.resize(offset + space, 0);
            image[offset..offset + payload.len()].copy_from_slice(payload);
            locator_entries.push((*code, space as u32, payload.len() as u32, offset as u64));
        }

        for (index, block) in &self.blocks {
            let start = image.len();
            let entry = (start / SECTOR) as u32;
            let at = table_offset + *index as usize * 4;
            image[at..at + 4].copy_from_slice(&entry.to_be_bytes());
            image.extend_from_slice(&block.bitmap);
            image.extend_from_slice(&block.data);
        }

        let mut header = [0u8; 1024];
        header[0..8].copy_from_slice(b"cxsparse");
        put_u64(&mut header, 8, u64::MAX);
        put_u64(&mut header, 16, table_offset as u64);
        put_u32(&mut header, 24, VERSION);
        put_u32(&mut header, 28, entries as u32);
        put_u32(&mut header, 32, self.block_size);
        header[40..56].copy_from_slice(&self.parent_uuid);
        if let Some(name) = &self.parent_name {
            let encoded = utf16be(name);
            header[64..64 + encoded.len()].copy_from_slice(&encoded);
        }
        for (slot, (code, space, length, offset)) in locator_entries.iter().enumerate() {
            let at = 576 + slot * 24;
            header[at..at + 4].copy_from_slice(code);
            put_u32(&mut header, at + 4, *space);
            put_u32(&mut header, at + 8, *length);
            put_u64(&mut header, at + 16, *offset);
        }
        let sum = checksum(&header, 36);
        put_u32(&mut header, 36, sum);
        image[512..1536].copy_from_slice(&header);

        let footer = footer(self.disk_type, self.size, 512, self.uuid);
        image[0..512].copy_from_slice(&footer);
        image.extend_from_slice(&footer);
        image
    }
}

//! VHD on-disk structures
//!
//! Every multi-byte field is big-endian on disk. Structures are decoded field
//! by field from byte slices and encoded the same way.

use chrono::{DateTime, TimeZone, Utc};
use keepsake_core::{Error, Result, SECTOR_SIZE};
use uuid::Uuid;

/// The only footer and dynamic header version we interpret
pub const VHD_VERSION: u32 = 0x0001_0000;

/// BAT entry marking a block that was never allocated
pub const UNALLOCATED: u32 = 0xFFFF_FFFF;

/// Footer data offset of a fixed image
pub const FIXED_DATA_OFFSET: u64 = u64::MAX;

/// Seconds between the Unix epoch and 2000-01-01T00:00:00Z
const VHD_EPOCH: i64 = 946_684_800;

fn be_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([bytes[at], bytes[at + 1]])
}

fn be_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn be_u64(bytes: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    u64::from_be_bytes(raw)
}

fn fourcc(code: u32) -> String {
    code.to_be_bytes()
        .iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
        .collect()
}

/// Storage mode of a VHD
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum VhdType {
    None = 0,
    Deprecated1 = 1,
    Fixed = 2,
    Dynamic = 3,
    Differencing = 4,
    Deprecated5 = 5,
    Deprecated6 = 6,
}

impl VhdType {
    /// Parse the disk type field
    pub fn from_u32(value: u32) -> Result<Self> {
        match value {
            0 => Ok(VhdType::None),
            1 => Ok(VhdType::Deprecated1),
            2 => Ok(VhdType::Fixed),
            3 => Ok(VhdType::Dynamic),
            4 => Ok(VhdType::Differencing),
            5 => Ok(VhdType::Deprecated5),
            6 => Ok(VhdType::Deprecated6),
            other => Err(Error::UnsupportedStorageMode(other)),
        }
    }

    /// Fixed, dynamic and differencing images can be opened
    pub fn is_readable(&self) -> bool {
        matches!(self, VhdType::Fixed | VhdType::Dynamic | VhdType::Differencing)
    }

    /// Images carrying a dynamic header and a BAT
    pub fn is_sparse(&self) -> bool {
        matches!(self, VhdType::Dynamic | VhdType::Differencing)
    }

    /// Lower-case mode name
    pub fn name(&self) -> &'static str {
        match self {
            VhdType::None => "none",
            VhdType::Fixed => "fixed",
            VhdType::Dynamic => "dynamic",
            VhdType::Differencing => "differencing",
            VhdType::Deprecated1 | VhdType::Deprecated5 | VhdType::Deprecated6 => "deprecated",
        }
    }
}

/// Disk geometry (CHS addressing)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskGeometry {
    pub cylinders: u16,
    pub heads: u8,
    pub sectors: u8,
}

impl DiskGeometry {
    /// Parse the packed 4-byte geometry field
    pub fn parse(bytes: &[u8]) -> Self {
        Self {
            cylinders: be_u16(bytes, 0),
            heads: bytes[2],
            sectors: bytes[3],
        }
    }

    /// Pack the geometry field
    pub fn to_bytes(&self) -> [u8; 4] {
        let cyl = self.cylinders.to_be_bytes();
        [cyl[0], cyl[1], self.heads, self.sectors]
    }

    /// Sectors addressable through CHS
    pub fn total_sectors(&self) -> u64 {
        self.cylinders as u64 * self.heads as u64 * self.sectors as u64
    }
}

/// VHD footer (512 bytes)
///
/// Present at the end of every VHD. Dynamic and differencing images also
/// carry a mirror copy at offset 0.
#[derive(Debug, Clone)]
pub struct VhdFooter {
    pub cookie: [u8; 8],
    pub features: u32,
    pub version: u32,
    pub data_offset: u64,
    pub timestamp: u32,
    pub creator_app: [u8; 4],
    pub creator_version: u32,
    pub creator_os: u32,
    pub original_size: u64,
    pub current_size: u64,
    pub geometry: DiskGeometry,
    pub disk_type: VhdType,
    pub checksum: u32,
    pub uuid: [u8; 16],
    pub saved_state: u8,
    pub reserved: [u8; 427],
}

impl VhdFooter {
    /// Footer cookie "conectix"
    pub const COOKIE: &'static [u8; 8] = b"conectix";

    /// Size of the footer in bytes
    pub const SIZE: usize = 512;

    /// Decode a footer
    ///
    /// Checks the cookie only; checksum and version are the codec's job.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(Error::invalid_vault("VHD footer too small"));
        }
        if &bytes[0..8] != Self::COOKIE {
            return Err(Error::invalid_vault(format!(
                "Invalid VHD footer cookie: expected 'conectix', got '{}'",
                String::from_utf8_lossy(&bytes[0..8])
            )));
        }

        let mut cookie = [0u8; 8];
        cookie.copy_from_slice(&bytes[0..8]);
        let mut creator_app = [0u8; 4];
        creator_app.copy_from_slice(&bytes[28..32]);
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&bytes[68..84]);
        let mut reserved = [0u8; 427];
        reserved.copy_from_slice(&bytes[85..512]);

        Ok(Self {
            cookie,
            features: be_u32(bytes, 8),
            version: be_u32(bytes, 12),
            data_offset: be_u64(bytes, 16),
            timestamp: be_u32(bytes, 24),
            creator_app,
            creator_version: be_u32(bytes, 32),
            creator_os: be_u32(bytes, 36),
            original_size: be_u64(bytes, 40),
            current_size: be_u64(bytes, 48),
            geometry: DiskGeometry::parse(&bytes[56..60]),
            disk_type: VhdType::from_u32(be_u32(bytes, 60))?,
            checksum: be_u32(bytes, 64),
            uuid,
            saved_state: bytes[84],
            reserved,
        })
    }

    /// Encode the footer
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..8].copy_from_slice(&self.cookie);
        bytes[8..12].copy_from_slice(&self.features.to_be_bytes());
        bytes[12..16].copy_from_slice(&self.version.to_be_bytes());
        bytes[16..24].copy_from_slice(&self.data_offset.to_be_bytes());
        bytes[24..28].copy_from_slice(&self.timestamp.to_be_bytes());
        bytes[28..32].copy_from_slice(&self.creator_app);
        bytes[32..36].copy_from_slice(&self.creator_version.to_be_bytes());
        bytes[36..40].copy_from_slice(&self.creator_os.to_be_bytes());
        bytes[40..48].copy_from_slice(&self.original_size.to_be_bytes());
        bytes[48..56].copy_from_slice(&self.current_size.to_be_bytes());
        bytes[56..60].copy_from_slice(&self.geometry.to_bytes());
        bytes[60..64].copy_from_slice(&(self.disk_type as u32).to_be_bytes());
        bytes[64..68].copy_from_slice(&self.checksum.to_be_bytes());
        bytes[68..84].copy_from_slice(&self.uuid);
        bytes[84] = self.saved_state;
        bytes[85..512].copy_from_slice(&self.reserved);
        bytes
    }

    /// Number of addressable logical sectors
    pub fn sector_count(&self) -> u64 {
        self.current_size / SECTOR_SIZE as u64
    }

    /// Creation time
    pub fn created(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(VHD_EPOCH + self.timestamp as i64, 0).single()
    }

    /// Unique identifier of this image
    pub fn unique_id(&self) -> Uuid {
        Uuid::from_bytes(self.uuid)
    }

    /// Creator as "app version (host)", e.g. "vpc 5.3 (Wi2k)"
    pub fn creator(&self) -> String {
        format!(
            "{} {}.{} ({})",
            String::from_utf8_lossy(&self.creator_app).trim_end_matches(['\0', ' ']),
            self.creator_version >> 16,
            self.creator_version & 0xFFFF,
            fourcc(self.creator_os)
        )
    }
}

/// Encoding family of a parent locator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformCode {
    /// Unused slot
    None,
    /// `Wi2r`: relative path, plain text (deprecated)
    WindowsRelative,
    /// `Wi2k`: absolute path, plain text (deprecated)
    WindowsAbsolute,
    /// `W2ru`: relative path, UTF-16
    WindowsRelativeUnicode,
    /// `W2ku`: absolute path, UTF-16
    WindowsAbsoluteUnicode,
    /// `Mac `: Mac OS alias record
    MacAlias,
    /// `MacX`: file URI
    MacUri,
    /// Anything else
    Unknown(u32),
}

impl PlatformCode {
    pub fn from_u32(value: u32) -> Self {
        match &value.to_be_bytes() {
            [0, 0, 0, 0] => PlatformCode::None,
            b"Wi2r" => PlatformCode::WindowsRelative,
            b"Wi2k" => PlatformCode::WindowsAbsolute,
            b"W2ru" => PlatformCode::WindowsRelativeUnicode,
            b"W2ku" => PlatformCode::WindowsAbsoluteUnicode,
            b"Mac " => PlatformCode::MacAlias,
            b"MacX" => PlatformCode::MacUri,
            _ => PlatformCode::Unknown(value),
        }
    }

    pub fn to_u32(&self) -> u32 {
        let code: &[u8; 4] = match self {
            PlatformCode::None => return 0,
            PlatformCode::Unknown(value) => return *value,
            PlatformCode::WindowsRelative => b"Wi2r",
            PlatformCode::WindowsAbsolute => b"Wi2k",
            PlatformCode::WindowsRelativeUnicode => b"W2ru",
            PlatformCode::WindowsAbsoluteUnicode => b"W2ku",
            PlatformCode::MacAlias => b"Mac ",
            PlatformCode::MacUri => b"MacX",
        };
        u32::from_be_bytes(*code)
    }
}

/// One of the eight parent locator records of a dynamic header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentLocatorEntry {
    pub platform_code: PlatformCode,
    pub data_space: u32,
    pub data_length: u32,
    pub reserved: u32,
    pub data_offset: u64,
}

impl ParentLocatorEntry {
    /// Size of one entry in bytes
    pub const SIZE: usize = 24;

    /// An unused slot
    pub const EMPTY: Self = Self {
        platform_code: PlatformCode::None,
        data_space: 0,
        data_length: 0,
        reserved: 0,
        data_offset: 0,
    };

    pub fn parse(bytes: &[u8]) -> Self {
        Self {
            platform_code: PlatformCode::from_u32(be_u32(bytes, 0)),
            data_space: be_u32(bytes, 4),
            data_length: be_u32(bytes, 8),
            reserved: be_u32(bytes, 12),
            data_offset: be_u64(bytes, 16),
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.platform_code.to_u32().to_be_bytes());
        bytes[4..8].copy_from_slice(&self.data_space.to_be_bytes());
        bytes[8..12].copy_from_slice(&self.data_length.to_be_bytes());
        bytes[12..16].copy_from_slice(&self.reserved.to_be_bytes());
        bytes[16..24].copy_from_slice(&self.data_offset.to_be_bytes());
        bytes
    }

    /// The slot names a parent
    pub fn is_populated(&self) -> bool {
        self.platform_code != PlatformCode::None
    }
}

/// VHD dynamic header (1024 bytes)
///
/// Located at the footer's data offset in dynamic and differencing images.
#[derive(Debug, Clone)]
pub struct VhdDynamicHeader {
    pub cookie: [u8; 8],
    pub data_offset: u64,
    pub table_offset: u64,
    pub header_version: u32,
    pub max_table_entries: u32,
    pub block_size: u32,
    pub checksum: u32,
    pub parent_uuid: [u8; 16],
    pub parent_timestamp: u32,
    pub reserved1: u32,
    /// UTF-16BE, NUL padded
    pub parent_unicode_name: [u8; 512],
    pub parent_locators: [ParentLocatorEntry; 8],
    pub reserved2: [u8; 256],
}

impl VhdDynamicHeader {
    /// Dynamic header cookie "cxsparse"
    pub const COOKIE: &'static [u8; 8] = b"cxsparse";

    /// Size of the dynamic header in bytes
    pub const SIZE: usize = 1024;

    /// Decode a dynamic header
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(Error::corrupt("VHD dynamic header too small"));
        }
        if &bytes[0..8] != Self::COOKIE {
            return Err(Error::corrupt(format!(
                "Invalid VHD dynamic header cookie: expected 'cxsparse', got '{}'",
                String::from_utf8_lossy(&bytes[0..8])
            )));
        }

        let mut cookie = [0u8; 8];
        cookie.copy_from_slice(&bytes[0..8]);
        let mut parent_uuid = [0u8; 16];
        parent_uuid.copy_from_slice(&bytes[40..56]);
        let mut parent_unicode_name = [0u8; 512];
        parent_unicode_name.copy_from_slice(&bytes[64..576]);
        let mut parent_locators = [ParentLocatorEntry::EMPTY; 8];
        for (i, entry) in parent_locators.iter_mut().enumerate() {
            let at = 576 + i * ParentLocatorEntry::SIZE;
            *entry = ParentLocatorEntry::parse(&bytes[at..at + ParentLocatorEntry::SIZE]);
        }
        let mut reserved2 = [0u8; 256];
        reserved2.copy_from_slice(&bytes[768..1024]);

        Ok(Self {
            cookie,
            data_offset: be_u64(bytes, 8),
            table_offset: be_u64(bytes, 16),
            header_version: be_u32(bytes, 24),
            max_table_entries: be_u32(bytes, 28),
            block_size: be_u32(bytes, 32),
            checksum: be_u32(bytes, 36),
            parent_uuid,
            parent_timestamp: be_u32(bytes, 56),
            reserved1: be_u32(bytes, 60),
            parent_unicode_name,
            parent_locators,
            reserved2,
        })
    }

    /// Encode the dynamic header
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..8].copy_from_slice(&self.cookie);
        bytes[8..16].copy_from_slice(&self.data_offset.to_be_bytes());
        bytes[16..24].copy_from_slice(&self.table_offset.to_be_bytes());
        bytes[24..28].copy_from_slice(&self.header_version.to_be_bytes());
        bytes[28..32].copy_from_slice(&self.max_table_entries.to_be_bytes());
        bytes[32..36].copy_from_slice(&self.block_size.to_be_bytes());
        bytes[36..40].copy_from_slice(&self.checksum.to_be_bytes());
        bytes[40..56].copy_from_slice(&self.parent_uuid);
        bytes[56..60].copy_from_slice(&self.parent_timestamp.to_be_bytes());
        bytes[60..64].copy_from_slice(&self.reserved1.to_be_bytes());
        bytes[64..576].copy_from_slice(&self.parent_unicode_name);
        for (i, entry) in self.parent_locators.iter().enumerate() {
            let at = 576 + i * ParentLocatorEntry::SIZE;
            bytes[at..at + ParentLocatorEntry::SIZE].copy_from_slice(&entry.to_bytes());
        }
        bytes[768..1024].copy_from_slice(&self.reserved2);
        bytes
    }

    /// Parent file name recorded in the header, if any
    pub fn parent_name(&self) -> Option<String> {
        let (name, _) =
            encoding_rs::UTF_16BE.decode_without_bom_handling(&self.parent_unicode_name);
        let name = name.trim_end_matches('\0');
        (!name.is_empty()).then(|| name.to_string())
    }

    /// Unique identifier the parent had when this child was created
    pub fn parent_unique_id(&self) -> Uuid {
        Uuid::from_bytes(self.parent_uuid)
    }

    /// Sectors per block
    pub fn sectors_per_block(&self) -> u32 {
        self.block_size / SECTOR_SIZE
    }
}

/// Block Allocation Table
///
/// One entry per logical block: the physical sector where the block's
/// bitmap starts, or [`UNALLOCATED`].
#[derive(Debug, Clone)]
pub struct BlockAllocationTable {
    entries: Vec<u32>,
}

impl BlockAllocationTable {
    /// Decode `entry_count` big-endian pointers from `bytes`
    pub fn parse(bytes: &[u8], entry_count: usize) -> Result<Self> {
        if bytes.len() < entry_count * 4 {
            return Err(Error::corrupt(format!(
                "BAT holds {} bytes, {} entries need {}",
                bytes.len(),
                entry_count,
                entry_count * 4
            )));
        }

        let entries = bytes
            .chunks_exact(4)
            .take(entry_count)
            .map(|chunk| be_u32(chunk, 0))
            .collect();

        Ok(Self { entries })
    }

    /// Build a table from decoded entries
    pub fn from_entries(entries: Vec<u32>) -> Self {
        Self { entries }
    }

    /// Physical sector of a block, `None` when unallocated
    ///
    /// Indices at or beyond the table length are an addressing error.
    pub fn block_sector(&self, block_index: u64) -> Result<Option<u64>> {
        let entry = usize::try_from(block_index)
            .ok()
            .and_then(|i| self.entries.get(i))
            .ok_or_else(|| Error::addressing(block_index, self.entries.len() as u64))?;

        Ok((*entry != UNALLOCATED).then_some(*entry as u64))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the table has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of allocated blocks
    pub fn allocated_count(&self) -> usize {
        self.entries.iter().filter(|&&e| e != UNALLOCATED).count()
    }
}

//! VHD (Virtual Hard Disk) vault implementation
//!
//! This module implements support for the Microsoft VHD disk image format.
//!
//! ## Supported Formats
//!
//! - **Fixed VHD**: Data stored contiguously, footer at the end
//! - **Dynamic VHD**: Sparse format using a Block Allocation Table (BAT)
//! - **Differencing VHD**: Sparse copy-on-write overlay on a parent image
//!
//! ## Format Overview
//!
//! ```text
//! fixed:        [ data ........................ ][ footer ]
//! dynamic:      [ footer copy ][ dynamic header ][ BAT ][ block ]...[ footer ]
//! block:        [ sector bitmap ][ data sectors ]
//! ```
//!
//! Unallocated blocks of a dynamic image read as zeros. In a differencing
//! image they, and every sector whose bitmap bit is clear, are read from
//! the parent at the same logical sector.

pub mod bitmap;
pub mod checksum;
pub mod dynamic;
pub mod footer;
pub mod parent;
pub mod translate;
pub mod types;

use bitmap::{BitmapTracker, DirtyBitmap};
use keepsake_core::{Error, ReadSeek, Result, SectorReader, Vault, VaultSummary, SECTOR_SIZE};
use keepsake_pipeline::{PartialPipeline, SectorPipeline};
use parent::ChainContext;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use translate::{BlockAddressTranslator, Translation};
use types::{BlockAllocationTable, VhdDynamicHeader, VhdFooter, VhdType};

use crate::VaultConfig;

/// Seek to `offset` and fill `buf`
pub(crate) fn read_exact_at(stream: &mut dyn ReadSeek, offset: u64, buf: &mut [u8]) -> Result<()> {
    stream.seek(SeekFrom::Start(offset))?;
    stream.read_exact(buf)?;
    Ok(())
}

/// An opened VHD image, including its parent chain
///
/// Headers and the BAT are parsed once at open and never change. The
/// backing stream sits behind a mutex so reads can run from several
/// threads; no lock is held while a parent is read.
pub struct VhdImage {
    stream: Mutex<Option<Box<dyn ReadSeek>>>,
    footer: VhdFooter,
    header: Option<VhdDynamicHeader>,
    translator: BlockAddressTranslator,
    tracker: Option<BitmapTracker>,
    parent: Option<Box<VhdImage>>,
    path: Option<PathBuf>,
}

impl VhdImage {
    /// Open a VHD file and, for differencing images, its parents
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be opened
    /// - The footer, dynamic header or BAT is invalid or corrupted
    /// - A parent cannot be found, does not match, or the chain loops
    pub fn open(path: &Path, config: &VaultConfig) -> Result<Self> {
        let mut ctx = ChainContext::new(config.max_chain_depth);
        let image = Self::open_in_chain(path, config, &mut ctx)?;

        tracing::info!(
            path = %path.display(),
            mode = image.footer.disk_type.name(),
            size = image.footer.current_size,
            chain = ctx.depth(),
            "Opened VHD image"
        );
        Ok(image)
    }

    /// Open an image held in any seekable stream of `len` bytes
    ///
    /// Relative parent locators are resolved against `base_dir`, or the
    /// current directory when none is given.
    /// The stream itself counts as the first image of the chain, so the
    /// depth limit matches [`open`](Self::open).
    pub fn from_stream<R>(
        stream: R,
        len: u64,
        base_dir: Option<&Path>,
        config: &VaultConfig,
    ) -> Result<Self>
    where
        R: Read + Seek + Send + 'static,
    {
        let mut ctx = ChainContext::new(config.max_chain_depth);
        ctx.enter_unnamed()?;
        let base_dir = base_dir.unwrap_or_else(|| Path::new(""));
        Self::assemble(Box::new(stream), len, base_dir, config, &mut ctx)
    }

    /// Open one link of a chain; parents recurse through here
    pub(crate) fn open_in_chain(
        path: &Path,
        config: &VaultConfig,
        ctx: &mut ChainContext,
    ) -> Result<Self> {
        ctx.enter(path)?;
        let (stream, len) = config.open_backing(path)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));

        let mut image = Self::assemble(stream, len, base_dir, config, ctx)?;
        image.path = Some(path.to_path_buf());
        Ok(image)
    }

    fn assemble(
        mut stream: Box<dyn ReadSeek>,
        len: u64,
        base_dir: &Path,
        config: &VaultConfig,
        ctx: &mut ChainContext,
    ) -> Result<Self> {
        let footer = footer::read_footer(&mut *stream, len)?;
        let sector_count = footer.sector_count();

        match footer.disk_type {
            VhdType::Fixed => {
                footer::check_fixed_length(&footer, len)?;
                let window: Box<dyn ReadSeek> =
                    Box::new(PartialPipeline::new(stream, 0, footer.current_size)?);

                Ok(Self {
                    stream: Mutex::new(Some(window)),
                    footer,
                    header: None,
                    translator: BlockAddressTranslator::new_fixed(sector_count),
                    tracker: None,
                    parent: None,
                    path: None,
                })
            }
            VhdType::Dynamic | VhdType::Differencing => {
                let (header, bat) = dynamic::load(&mut *stream, &footer)?;
                let tracker = BitmapTracker::new(header.sectors_per_block());
                let translator = BlockAddressTranslator::new_sparse(
                    footer.disk_type,
                    sector_count,
                    tracker.sectors_per_block(),
                    tracker.bitmap_sectors(),
                    bat,
                );

                let parent = if footer.disk_type == VhdType::Differencing {
                    let parent = parent::resolve_parent(
                        &mut *stream,
                        &header,
                        &footer,
                        base_dir,
                        config,
                        ctx,
                    )?;
                    Some(Box::new(parent))
                } else {
                    None
                };

                Ok(Self {
                    stream: Mutex::new(Some(stream)),
                    footer,
                    header: Some(header),
                    translator,
                    tracker: Some(tracker),
                    parent,
                    path: None,
                })
            }
            other => Err(Error::UnsupportedStorageMode(other as u32)),
        }
    }

    /// Get the VHD footer
    pub fn footer(&self) -> &VhdFooter {
        &self.footer
    }

    /// Get the dynamic header (dynamic and differencing images)
    pub fn dynamic_header(&self) -> Option<&VhdDynamicHeader> {
        self.header.as_ref()
    }

    /// Get the block allocation table (dynamic and differencing images)
    pub fn bat(&self) -> Option<&BlockAllocationTable> {
        self.translator.bat()
    }

    /// The opened parent of a differencing image
    pub fn parent(&self) -> Option<&VhdImage> {
        self.parent.as_deref()
    }

    /// File this image was opened from
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// This image followed by each ancestor
    pub fn chain(&self) -> impl Iterator<Item = &VhdImage> {
        std::iter::successors(Some(self), |image| image.parent())
    }

    /// Sectors per block (nominal 4096 for fixed images)
    pub fn sectors_per_block(&self) -> u32 {
        self.translator.sectors_per_block()
    }

    pub fn identify(&self) -> &'static str {
        match self.footer.disk_type {
            VhdType::Fixed => "Microsoft VHD (Fixed)",
            VhdType::Dynamic => "Microsoft VHD (Dynamic)",
            VhdType::Differencing => "Microsoft VHD (Differencing)",
            _ => "Microsoft VHD",
        }
    }

    /// Translate a logical sector, reading the block bitmap when needed
    pub fn translate(&self, sector: u64) -> Result<Translation> {
        self.translator.translate_with(sector, |block_sector, sector_in_block| {
            let tracker = self.sparse_tracker()?;
            self.with_stream(|stream| tracker.is_dirty(stream, block_sector, sector_in_block))
        })
    }

    /// True when `sector` is stored in this image rather than zero-filled
    /// or inherited from the parent
    pub fn is_dirty(&self, sector: u64) -> Result<bool> {
        Ok(self.translate(sector)?.allocated)
    }

    /// Bitmap of a block, `None` when the block is unallocated
    pub fn block_bitmap(&self, block_index: u64) -> Result<Option<DirtyBitmap>> {
        let (Some(bat), Some(tracker)) = (self.bat(), self.tracker.as_ref()) else {
            return Err(Error::unsupported("Fixed images have no block bitmaps"));
        };
        match bat.block_sector(block_index)? {
            Some(block_sector) => {
                let bitmap = self.with_stream(|stream| tracker.read(stream, block_sector))?;
                Ok(Some(bitmap))
            }
            None => Ok(None),
        }
    }

    /// Release the backing stream of this image and its parents
    ///
    /// Closing twice is harmless. Reads after close fail.
    pub fn close(&self) {
        let mut guard = self.stream.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.take().is_some() {
            tracing::debug!(path = ?self.path, "Closed VHD image");
        }
        drop(guard);

        if let Some(parent) = &self.parent {
            parent.close();
        }
    }

    /// True once [`close`](Self::close) has run
    pub fn is_closed(&self) -> bool {
        self.lock()
            .map(|guard| guard.is_none())
            .unwrap_or(true)
    }

    /// Describe this image and its parents
    pub fn summary(&self) -> VaultSummary {
        let mut summary = VaultSummary::new(self.identify(), self.footer.current_size)
            .with_storage_mode(self.footer.disk_type.name())
            .with_unique_id(self.footer.unique_id().to_string())
            .with_creator(self.footer.creator());

        if let Some(created) = self.footer.created() {
            summary = summary.with_created(created);
        }
        if let Some(path) = &self.path {
            summary = summary.with_path(path.display().to_string());
        }
        if let (Some(header), Some(bat)) = (&self.header, self.bat()) {
            summary = summary.with_blocks(
                header.block_size,
                bat.allocated_count() as u64,
                bat.len() as u64,
            );
        }
        if let Some(parent) = &self.parent {
            summary = summary.with_parent(parent.summary());
        }
        summary
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Box<dyn ReadSeek>>>> {
        self.stream
            .lock()
            .map_err(|_| Error::invalid_operation("VHD stream lock poisoned"))
    }

    fn with_stream<T>(&self, f: impl FnOnce(&mut dyn ReadSeek) -> Result<T>) -> Result<T> {
        let mut guard = self.lock()?;
        let stream = guard
            .as_mut()
            .ok_or_else(|| Error::invalid_operation("VHD image is closed"))?;
        f(&mut **stream)
    }

    fn sparse_tracker(&self) -> Result<&BitmapTracker> {
        self.tracker
            .as_ref()
            .ok_or_else(|| Error::invalid_operation("Image has no block bitmaps"))
    }

    fn parent_image(&self) -> Result<&VhdImage> {
        self.parent
            .as_deref()
            .ok_or_else(|| Error::invalid_operation("Differencing image has no parent"))
    }

    fn read_physical(&self, physical_sector: u64, buf: &mut [u8]) -> Result<()> {
        let offset = physical_sector * SECTOR_SIZE as u64;
        self.with_stream(|stream| read_exact_at(stream, offset, buf))
    }

    /// Fill `buf` with `count` sectors starting at `start`
    fn read_into(&self, start: u64, count: u32, buf: &mut [u8]) -> Result<()> {
        self.translator.check_range(start, count)?;
        if self.is_closed() {
            return Err(Error::invalid_operation("VHD image is closed"));
        }

        if self.footer.disk_type == VhdType::Fixed {
            return self.read_physical(start, buf);
        }

        let end = start + count as u64;
        let mut sector = start;
        let mut offset = 0usize;
        while sector < end {
            let len = self.translator.segment_len(sector, end - sector);
            let bytes = len as usize * SECTOR_SIZE as usize;
            self.read_segment(sector, len, &mut buf[offset..offset + bytes])?;
            sector += len as u64;
            offset += bytes;
        }
        Ok(())
    }

    /// Read a run of sectors that stays inside one block
    fn read_segment(&self, sector: u64, count: u32, buf: &mut [u8]) -> Result<()> {
        let location = self.translator.locate(sector)?;

        let Some(physical) = location.physical_sector else {
            return match self.footer.disk_type {
                VhdType::Differencing => self.parent_image()?.read_into(sector, count, buf),
                _ => {
                    buf.fill(0);
                    Ok(())
                }
            };
        };

        if self.footer.disk_type != VhdType::Differencing {
            return self.read_physical(physical, buf);
        }

        let tracker = self.sparse_tracker()?;
        let first = location.sector_in_block;
        let block_sector = physical - tracker.bitmap_sectors() as u64 - first as u64;
        let bitmap = self.with_stream(|stream| tracker.read(stream, block_sector))?;

        let mut done = 0u32;
        while done < count {
            let run = bitmap.run_len(first + done, count - done);
            let from = done as usize * SECTOR_SIZE as usize;
            let to = (done + run) as usize * SECTOR_SIZE as usize;
            let part = &mut buf[from..to];

            if bitmap.is_dirty(first + done) {
                self.read_physical(physical + done as u64, part)?;
            } else {
                self.parent_image()?
                    .read_into(sector + done as u64, run, part)?;
            }
            done += run;
        }
        Ok(())
    }
}

impl SectorReader for VhdImage {
    fn sector_size(&self) -> u32 {
        SECTOR_SIZE
    }

    fn sector_count(&self) -> u64 {
        self.translator.sector_count()
    }

    fn read_sectors(&self, start: u64, count: u32) -> Result<Vec<u8>> {
        self.translator.check_range(start, count)?;
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; count as usize * SECTOR_SIZE as usize];
        self.read_into(start, count, &mut buf)?;
        Ok(buf)
    }
}

impl std::fmt::Debug for VhdImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VhdImage")
            .field("mode", &self.footer.disk_type)
            .field("size", &self.footer.current_size)
            .field("path", &self.path)
            .field("parent", &self.parent)
            .finish()
    }
}

/// VHD vault - Microsoft Virtual Hard Disk container
///
/// Wraps a shared [`VhdImage`] and exposes its logical disk as a byte
/// stream through [`Vault::content`].
pub struct VhdVault {
    image: Arc<VhdImage>,
    content: SectorPipeline<Arc<VhdImage>>,
}

impl VhdVault {
    /// Open a VHD vault from a file path
    pub fn open(path: &Path, config: VaultConfig) -> Result<Self> {
        Ok(Self::from_image(VhdImage::open(path, &config)?))
    }

    /// Wrap an already opened image
    pub fn from_image(image: VhdImage) -> Self {
        let image = Arc::new(image);
        Self {
            content: SectorPipeline::new(Arc::clone(&image)),
            image,
        }
    }

    /// The underlying image, shareable with other readers
    pub fn image(&self) -> &Arc<VhdImage> {
        &self.image
    }

    /// Check if this is a dynamic or differencing VHD
    pub fn is_dynamic(&self) -> bool {
        self.image.footer().disk_type.is_sparse()
    }
}

impl Vault for VhdVault {
    fn identify(&self) -> &str {
        self.image.identify()
    }

    fn length(&self) -> u64 {
        self.image.byte_length()
    }

    fn content(&mut self) -> &mut dyn ReadSeek {
        &mut self.content
    }

    fn summary(&self) -> VaultSummary {
        self.image.summary()
    }
}

impl SectorReader for VhdVault {
    fn sector_size(&self) -> u32 {
        self.image.sector_size()
    }

    fn sector_count(&self) -> u64 {
        self.image.sector_count()
    }

    fn read_sectors(&self, start: u64, count: u32) -> Result<Vec<u8>> {
        self.image.read_sectors(start, count)
    }
}

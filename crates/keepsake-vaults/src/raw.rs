//! Raw vault - Direct sector image container
//!
//! This module implements the simplest vault type: a raw sector image with no
//! container metadata. It is also the fallback when no other format matches.
//! Common file extensions: .img, .ima, .flp, .vfd, .dsk, .iso

use crate::VaultConfig;
use keepsake_core::{Error, ReadSeek, Result, SectorReader, Vault, VaultSummary, SECTOR_SIZE};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Raw vault - a simple passthrough to the underlying file
///
/// # Example
///
/// ```rust,no_run
/// use keepsake_vaults::{RawVault, VaultConfig};
/// use keepsake_core::{SectorReader, Vault};
/// use std::path::Path;
///
/// let vault = RawVault::open(Path::new("disk.img"), VaultConfig::default()).unwrap();
/// println!("Vault type: {}", vault.identify());
/// println!("Sectors: {}", vault.sector_count());
/// ```
pub struct RawVault {
    pipeline: Mutex<Box<dyn ReadSeek>>,
    length: u64,
    path: Option<PathBuf>,
}

impl RawVault {
    /// Open a raw vault from a file path
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or accessed
    pub fn open(path: &Path, config: VaultConfig) -> Result<Self> {
        let (pipeline, length) = config.open_backing(path)?;
        tracing::debug!(path = %path.display(), length, "Opened raw image");

        Ok(Self {
            pipeline: Mutex::new(pipeline),
            length,
            path: Some(path.to_path_buf()),
        })
    }

    /// Create a new raw vault from any readable and seekable stream
    pub fn from_stream<R: Read + Seek + Send + 'static>(stream: R, length: u64) -> Self {
        Self {
            pipeline: Mutex::new(Box::new(stream)),
            length,
            path: None,
        }
    }
}

impl Vault for RawVault {
    fn identify(&self) -> &str {
        "Raw sector image"
    }

    fn length(&self) -> u64 {
        self.length
    }

    fn content(&mut self) -> &mut dyn ReadSeek {
        let pipeline = match self.pipeline.get_mut() {
            Ok(pipeline) => pipeline,
            Err(poisoned) => poisoned.into_inner(),
        };
        &mut **pipeline
    }

    fn summary(&self) -> VaultSummary {
        let summary = VaultSummary::new(self.identify(), self.length);
        match &self.path {
            Some(path) => summary.with_path(path.display().to_string()),
            None => summary,
        }
    }
}

impl SectorReader for RawVault {
    fn sector_size(&self) -> u32 {
        SECTOR_SIZE
    }

    /// Whole sectors only; a trailing partial sector is not addressable
    fn sector_count(&self) -> u64 {
        self.length / SECTOR_SIZE as u64
    }

    fn read_sectors(&self, start: u64, count: u32) -> Result<Vec<u8>> {
        let limit = self.sector_count();
        match start.checked_add(count as u64) {
            Some(end) if end <= limit => {}
            _ => {
                return Err(Error::addressing(
                    start.saturating_add(count.saturating_sub(1) as u64),
                    limit,
                ))
            }
        }

        let mut buf = vec![0u8; count as usize * SECTOR_SIZE as usize];
        if count == 0 {
            return Ok(buf);
        }

        let mut pipeline = self
            .pipeline
            .lock()
            .map_err(|_| Error::invalid_operation("Raw stream lock poisoned"))?;
        // Leave the content cursor where the caller put it
        let cursor = pipeline.stream_position()?;
        pipeline.seek(SeekFrom::Start(start * SECTOR_SIZE as u64))?;
        pipeline.read_exact(&mut buf)?;
        pipeline.seek(SeekFrom::Start(cursor))?;

        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use tempfile::NamedTempFile;

    #[test]
    fn test_raw_vault_from_stream() {
        let data: Vec<u8> = (0..100).collect();
        let vault = RawVault::from_stream(Cursor::new(data), 100);

        assert_eq!(vault.identify(), "Raw sector image");
        assert_eq!(vault.length(), 100);
        assert_eq!(vault.sector_count(), 0);
    }

    #[test]
    fn test_raw_vault_content_seek() {
        let data: Vec<u8> = (0..100).collect();
        let mut vault = RawVault::from_stream(Cursor::new(data), 100);

        vault.content().seek(SeekFrom::Start(50)).unwrap();
        let mut buf = [0u8; 5];
        vault.content().read_exact(&mut buf).unwrap();

        assert_eq!(&buf, &[50, 51, 52, 53, 54]);
    }

    #[test]
    fn test_sector_reads_keep_content_cursor() {
        let data: Vec<u8> = (0..4 * 512u32).map(|i| (i / 512) as u8).collect();
        let mut vault = RawVault::from_stream(Cursor::new(data), 4 * 512);

        vault.content().seek(SeekFrom::Start(10)).unwrap();
        assert_eq!(vault.read_sectors(2, 2).unwrap()[512], 3);
        assert_eq!(vault.content().stream_position().unwrap(), 10);
    }

    #[test]
    fn test_partial_trailing_sector() {
        let vault = RawVault::from_stream(Cursor::new(vec![7u8; 1100]), 1100);
        assert_eq!(vault.sector_count(), 2);
        assert!(vault.read_sectors(1, 1).is_ok());
        assert!(matches!(
            vault.read_sectors(2, 1),
            Err(Error::Addressing { sector: 2, limit: 2 })
        ));
        assert!(vault.read_sectors(2, 0).unwrap().is_empty());
    }

    #[test]
    fn test_raw_vault_open_file() {
        let mut tmpfile = NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0u8..=255).cycle().take(1024).collect();
        tmpfile.write_all(&data).unwrap();
        tmpfile.flush().unwrap();

        for config in [VaultConfig::default(), VaultConfig::default().without_mmap()] {
            let vault = RawVault::open(tmpfile.path(), config).unwrap();
            assert_eq!(vault.length(), 1024);
            assert_eq!(vault.read_sectors(1, 1).unwrap(), data[512..].to_vec());
            assert!(vault.summary().path.is_some());
        }
    }
}

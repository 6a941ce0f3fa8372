//! Byte stream view over a sector reader

use keepsake_core::SectorReader;
use std::io::{self, Read, Seek, SeekFrom};

/// Number of sectors fetched per underlying request
const CHUNK_SECTORS: u32 = 128;

/// Presents any [`SectorReader`] as a `Read + Seek` byte stream.
///
/// Reads are served from a chunk of whole sectors fetched through
/// `read_sectors`, so callers may read at arbitrary byte offsets and lengths
/// while the source only ever sees sector-aligned requests.
pub struct SectorPipeline<S: SectorReader> {
    source: S,
    length: u64,
    position: u64,
    chunk_start: u64,
    chunk: Vec<u8>,
}

impl<S: SectorReader> SectorPipeline<S> {
    /// Wrap a sector reader
    pub fn new(source: S) -> Self {
        let length = source.byte_length();
        Self {
            source,
            length,
            position: 0,
            chunk_start: 0,
            chunk: Vec::new(),
        }
    }

    /// Access the wrapped sector reader
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Logical length in bytes
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Current byte position
    pub fn position(&self) -> u64 {
        self.position
    }

    fn chunk_contains(&self, pos: u64) -> bool {
        pos >= self.chunk_start && pos < self.chunk_start + self.chunk.len() as u64
    }

    fn fill_chunk(&mut self, pos: u64) -> io::Result<()> {
        let sector_size = self.source.sector_size() as u64;
        let first = pos / sector_size;
        let available = self.source.sector_count() - first;
        let count = available.min(CHUNK_SECTORS as u64) as u32;

        self.chunk = self.source.read_sectors(first, count)?;
        self.chunk_start = first * sector_size;
        Ok(())
    }
}

impl<S: SectorReader> Read for SectorPipeline<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.position >= self.length || buf.is_empty() {
            return Ok(0);
        }

        if !self.chunk_contains(self.position) {
            self.fill_chunk(self.position)?;
        }

        let offset = (self.position - self.chunk_start) as usize;
        let available = self.chunk.len() - offset;
        let to_copy = buf.len().min(available);
        buf[..to_copy].copy_from_slice(&self.chunk[offset..offset + to_copy]);
        self.position += to_copy as u64;

        Ok(to_copy)
    }
}

impl<S: SectorReader> Seek for SectorPipeline<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(offset) => self.length.checked_add_signed(offset),
            SeekFrom::Current(offset) => self.position.checked_add_signed(offset),
        };

        match new_pos {
            Some(p) if p <= self.length => {
                self.position = p;
                Ok(p)
            }
            Some(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Seek beyond end of disk",
            )),
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Seek before beginning of disk",
            )),
        }
    }
}

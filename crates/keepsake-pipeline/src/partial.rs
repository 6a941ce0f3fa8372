//! Partial pipeline - a bounded window into a stream

use std::io::{self, Read, Seek, SeekFrom};

/// A pipeline that exposes `[start, start + length)` of an underlying stream.
///
/// Fixed VHD images use it to hide the trailing footer: the window covers
/// exactly the logical disk, so a read can never stray into metadata.
///
/// # Example
///
/// ```rust
/// use keepsake_pipeline::PartialPipeline;
/// use std::io::{Cursor, Read};
///
/// let container = vec![0xAAu8; 1024 + 512];
/// let mut disk = PartialPipeline::new(Cursor::new(container), 0, 1024).unwrap();
///
/// let mut all = Vec::new();
/// disk.read_to_end(&mut all).unwrap();
/// assert_eq!(all.len(), 1024);
/// ```
pub struct PartialPipeline<R: Read + Seek> {
    inner: R,
    start: u64,
    length: u64,
    position: u64,
}

impl<R: Read + Seek> PartialPipeline<R> {
    /// Create a new window over `inner`
    ///
    /// # Errors
    ///
    /// Returns an error if `start + length` overflows or the window start
    /// cannot be reached.
    pub fn new(mut inner: R, start: u64, length: u64) -> io::Result<Self> {
        if start.checked_add(length).is_none() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Partial pipeline window overflows",
            ));
        }
        inner.seek(SeekFrom::Start(start))?;

        Ok(Self {
            inner,
            start,
            length,
            position: 0,
        })
    }

    /// Get the start offset of this window in the inner stream
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Get the length of this window
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Get the current position within this window
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Get the remaining bytes from current position to end
    pub fn remaining(&self) -> u64 {
        self.length.saturating_sub(self.position)
    }

    /// Give back the inner stream
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Seek> Read for PartialPipeline<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let to_read = (buf.len() as u64).min(self.remaining()) as usize;
        if to_read == 0 {
            return Ok(0);
        }

        // The inner stream may be shared with other readers; always reposition.
        self.inner.seek(SeekFrom::Start(self.start + self.position))?;
        let bytes_read = self.inner.read(&mut buf[..to_read])?;
        self.position += bytes_read as u64;

        Ok(bytes_read)
    }
}

impl<R: Read + Seek> Seek for PartialPipeline<R> {
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
                "Seek beyond end of partial pipeline",
            )),
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Seek before beginning of partial pipeline",
            )),
        }
    }
}

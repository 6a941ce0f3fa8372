//! Footer codec
//!
//! Dynamic and differencing images keep a mirror of the footer at offset 0.
//! Both copies are checked independently and the first one that validates
//! is used.

use super::checksum::{self, FOOTER_CHECKSUM};
use super::read_exact_at;
use super::types::{VhdFooter, VhdType, VHD_VERSION};
use keepsake_core::{Error, ReadSeek, Result};

/// Read and validate the footer of a VHD container of `stream_len` bytes
///
/// # Errors
///
/// - [`Error::InvalidVault`] when neither copy carries the footer cookie
/// - [`Error::CorruptContainer`] when a cookie is present but no copy
///   passes its checksum
/// - [`Error::UnsupportedVersion`] / [`Error::UnsupportedStorageMode`]
///   for footers this reader does not interpret
pub fn read_footer(stream: &mut dyn ReadSeek, stream_len: u64) -> Result<VhdFooter> {
    if stream_len < (VhdFooter::SIZE - 1) as u64 {
        return Err(Error::invalid_vault(format!(
            "File too small to be a VHD ({} bytes)",
            stream_len
        )));
    }

    let leading = if stream_len >= VhdFooter::SIZE as u64 {
        let mut bytes = [0u8; VhdFooter::SIZE];
        read_exact_at(stream, 0, &mut bytes)?;
        Some(bytes)
    } else {
        None
    };

    // Odd-length containers carry a 511-byte trailer; the last byte is zero.
    let trailer_len = if stream_len % 2 == 1 {
        VhdFooter::SIZE - 1
    } else {
        VhdFooter::SIZE
    };
    let mut trailing = [0u8; VhdFooter::SIZE];
    read_exact_at(
        stream,
        stream_len - trailer_len as u64,
        &mut trailing[..trailer_len],
    )?;

    select_footer(leading.as_ref(), &trailing)
}

/// Pick the copy to trust from the leading and trailing candidates
pub fn select_footer(
    leading: Option<&[u8; VhdFooter::SIZE]>,
    trailing: &[u8; VhdFooter::SIZE],
) -> Result<VhdFooter> {
    let candidates = [("leading", leading), ("trailing", Some(trailing))];

    let mut cookie_seen = false;
    let mut chosen = None;
    for (name, bytes) in candidates {
        let Some(bytes) = bytes else { continue };
        if &bytes[0..8] != VhdFooter::COOKIE {
            tracing::debug!(copy = name, "No footer cookie");
            continue;
        }
        cookie_seen = true;
        if !checksum::verify(bytes, FOOTER_CHECKSUM) {
            tracing::debug!(
                copy = name,
                stored = checksum::stored(bytes, FOOTER_CHECKSUM),
                computed = checksum::compute(bytes, FOOTER_CHECKSUM),
                "Footer checksum mismatch"
            );
            continue;
        }
        chosen = Some(bytes);
        break;
    }

    let bytes = match chosen {
        Some(bytes) => bytes,
        None if cookie_seen => {
            return Err(Error::corrupt(
                "VHD footer checksum verification failed for every copy",
            ))
        }
        None => return Err(Error::invalid_vault("No VHD footer cookie found")),
    };

    let version = u32::from_be_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
    if version != VHD_VERSION {
        return Err(Error::UnsupportedVersion {
            structure: "footer",
            version,
        });
    }

    let footer = VhdFooter::parse(bytes)?;
    if !footer.disk_type.is_readable() {
        return Err(Error::UnsupportedStorageMode(footer.disk_type as u32));
    }

    Ok(footer)
}

/// Check that a fixed image holds its whole data region
pub(crate) fn check_fixed_length(footer: &VhdFooter, stream_len: u64) -> Result<()> {
    debug_assert_eq!(footer.disk_type, VhdType::Fixed);
    let needed = footer
        .current_size
        .checked_add((VhdFooter::SIZE - 1) as u64)
        .ok_or_else(|| Error::corrupt("Fixed VHD size overflows"))?;
    if stream_len < needed {
        return Err(Error::corrupt(format!(
            "Fixed VHD of {} bytes is truncated to {} bytes",
            footer.current_size, stream_len
        )));
    }
    Ok(())
}

//! Security validation constants and helpers
//!
//! Limits and checked arithmetic applied to values read from untrusted
//! container metadata before they size an allocation or address the stream.

use crate::Error;

/// Logical sector size of every container Keepsake reads
pub const SECTOR_SIZE: u32 = 512;

/// Maximum allocation size for single buffer (256 MB)
pub const MAX_ALLOCATION_SIZE: usize = 256 * 1024 * 1024;

/// Maximum size of a parent locator payload
pub const MAX_LOCATOR_BYTES: u32 = 64 * 1024;

/// Maximum file size for memory mapping (16 GB - practical limit for most systems)
pub const MAX_MMAP_SIZE: u64 = 16 * 1024 * 1024 * 1024;

/// Validate that a size is within allocation limits
///
/// # Security
/// Prevents memory exhaustion from malicious disk images
pub fn validate_allocation_size(size: u64, limit: usize, context: &str) -> crate::Result<usize> {
    if size > limit as u64 {
        return Err(Error::corrupt(format!(
            "{} size {} exceeds limit {}",
            context, size, limit
        )));
    }

    size.try_into()
        .map_err(|_| Error::corrupt(format!("{} size exceeds platform limits", context)))
}

/// Safely multiply two u64 values with overflow checking
pub fn checked_multiply_u64(a: u64, b: u64, context: &str) -> crate::Result<u64> {
    a.checked_mul(b)
        .ok_or_else(|| Error::corrupt(format!("{}: multiplication overflow", context)))
}

/// Safely add two u64 values with overflow checking
pub fn checked_add_u64(a: u64, b: u64, context: &str) -> crate::Result<u64> {
    a.checked_add(b)
        .ok_or_else(|| Error::corrupt(format!("{}: addition overflow", context)))
}

/// Round `value` up to a multiple of `align` (which must be non-zero)
pub fn align_up_u64(value: u64, align: u64, context: &str) -> crate::Result<u64> {
    let rem = value % align;
    if rem == 0 {
        Ok(value)
    } else {
        checked_add_u64(value, align - rem, context)
    }
}

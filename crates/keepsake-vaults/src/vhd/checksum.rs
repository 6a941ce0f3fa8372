//! Ones'-complement checksum shared by the footer and the dynamic header

use std::ops::Range;

/// Checksum field of the footer
pub const FOOTER_CHECKSUM: Range<usize> = 64..68;

/// Checksum field of the dynamic header
pub const DYNAMIC_CHECKSUM: Range<usize> = 36..40;

/// Compute the checksum of `bytes` as if `field` were zero.
///
/// The value is the ones' complement of the sum of every byte outside the
/// checksum field.
pub fn compute(bytes: &[u8], field: Range<usize>) -> u32 {
    let sum = bytes
        .iter()
        .enumerate()
        .filter(|(i, _)| !field.contains(i))
        .fold(0u32, |sum, (_, &b)| sum.wrapping_add(b as u32));
    !sum
}

/// Checksum stored big-endian in `field`
pub fn stored(bytes: &[u8], field: Range<usize>) -> u32 {
    let f = &bytes[field];
    u32::from_be_bytes([f[0], f[1], f[2], f[3]])
}

/// True when the stored checksum matches a fresh computation
pub fn verify(bytes: &[u8], field: Range<usize>) -> bool {
    stored(bytes, field.clone()) == compute(bytes, field)
}

/// Recompute the checksum and write it into `field`
pub fn stamp(bytes: &mut [u8], field: Range<usize>) {
    let checksum = compute(bytes, field.clone());
    bytes[field].copy_from_slice(&checksum.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_all_zero_footer() {
        let bytes = [0u8; 512];
        assert_eq!(compute(&bytes, FOOTER_CHECKSUM), 0xFFFF_FFFF);
        assert!(!verify(&bytes, FOOTER_CHECKSUM));
    }

    #[test]
    fn test_checksum_field_is_ignored() {
        let mut bytes = [1u8; 512];
        let before = compute(&bytes, FOOTER_CHECKSUM);
        bytes[64..68].copy_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD]);
        assert_eq!(compute(&bytes, FOOTER_CHECKSUM), before);
        // 508 bytes of value 1
        assert_eq!(before, !508u32);
    }

    #[test]
    fn test_single_bit_flip_detected() {
        let mut bytes = [0u8; 1024];
        bytes[0..8].copy_from_slice(b"cxsparse");
        stamp(&mut bytes, DYNAMIC_CHECKSUM);
        assert!(verify(&bytes, DYNAMIC_CHECKSUM));

        bytes[100] ^= 0x01;
        assert!(!verify(&bytes, DYNAMIC_CHECKSUM));
    }

    proptest! {
        #[test]
        fn prop_stamp_then_verify(mut bytes in prop::collection::vec(any::<u8>(), 512)) {
            stamp(&mut bytes, FOOTER_CHECKSUM);
            prop_assert!(verify(&bytes, FOOTER_CHECKSUM));
        }

        #[test]
        fn prop_dynamic_stamp_then_verify(mut bytes in prop::collection::vec(any::<u8>(), 1024)) {
            stamp(&mut bytes, DYNAMIC_CHECKSUM);
            prop_assert!(verify(&bytes, DYNAMIC_CHECKSUM));
        }
    }
}

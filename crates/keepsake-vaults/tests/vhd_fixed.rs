//! Fixed images and footer validation through the public API

mod common;

use common::{fixed, footer, pattern, restamp_footer, write, SparseBuilder, FIXED, SECTOR};
use keepsake_core::{Error, SectorReader, Vault};
use keepsake_vaults::{open_vault, VaultConfig, VhdImage};
use std::io::{Cursor, Read};

const MIB: usize = 1024 * 1024;

#[test]
fn test_one_mebibyte_fixed_image() {
    let dir = tempfile::tempdir().unwrap();
    let data = pattern(0, MIB / SECTOR);
    let path = write(dir.path(), "disk.vhd", &fixed(&data, [1; 16]));

    let image = VhdImage::open(&path, &VaultConfig::default()).unwrap();
    assert_eq!(image.sector_count(), 2048);
    assert_eq!(image.read_sectors(2047, 1).unwrap(), data[2047 * SECTOR..]);
    assert!(matches!(
        image.read_sectors(2048, 1),
        Err(Error::Addressing {
            sector: 2048,
            limit: 2048
        })
    ));
    assert!(matches!(
        image.read_sectors(2040, 16),
        Err(Error::Addressing { .. })
    ));
}

#[test]
fn test_mmap_and_file_io_agree() {
    let dir = tempfile::tempdir().unwrap();
    let data = pattern(9, 64);
    let path = write(dir.path(), "disk.vhd", &fixed(&data, [1; 16]));

    let mapped = VhdImage::open(&path, &VaultConfig::default()).unwrap();
    let plain = VhdImage::open(&path, &VaultConfig::default().without_mmap()).unwrap();
    assert_eq!(
        mapped.read_sectors(0, 64).unwrap(),
        plain.read_sectors(0, 64).unwrap()
    );
}

#[test]
fn test_content_stream_hides_footer() {
    let dir = tempfile::tempdir().unwrap();
    let data = pattern(3, 16);
    let path = write(dir.path(), "disk.vhd", &fixed(&data, [1; 16]));

    let mut vault = open_vault(&path, VaultConfig::default()).unwrap();
    assert_eq!(vault.identify(), "Microsoft VHD (Fixed)");
    assert_eq!(vault.length(), 16 * SECTOR as u64);

    let mut all = Vec::new();
    vault.content().read_to_end(&mut all).unwrap();
    assert_eq!(all, data);
}

#[test]
fn test_odd_length_container() {
    let data = pattern(0, 8);
    let mut image = fixed(&data, [1; 16]);
    image.pop();
    let len = image.len() as u64;

    let image = VhdImage::from_stream(Cursor::new(image), len, None, &VaultConfig::default())
        .unwrap();
    assert_eq!(image.sector_count(), 8);
    assert_eq!(image.read_sectors(7, 1).unwrap(), data[7 * SECTOR..]);
}

#[test]
fn test_truncated_fixed_image() {
    let data = pattern(0, 8);
    let mut image = data[..4 * SECTOR].to_vec();
    image.extend_from_slice(&footer(FIXED, data.len() as u64, u64::MAX, [1; 16]));
    let len = image.len() as u64;

    assert!(matches!(
        VhdImage::from_stream(Cursor::new(image), len, None, &VaultConfig::default()),
        Err(Error::CorruptContainer(_))
    ));
}

#[test]
fn test_leading_copy_corrupt_trailing_valid() {
    let mut image = SparseBuilder::dynamic(8 * 4096, 4096)
        .sectors(3, &pattern(50, 1))
        .build();
    image[40] ^= 0xFF;
    let len = image.len() as u64;

    let image = VhdImage::from_stream(Cursor::new(image), len, None, &VaultConfig::default())
        .unwrap();
    assert_eq!(image.read_sectors(3, 1).unwrap(), pattern(50, 1));
}

#[test]
fn test_trailing_copy_corrupt_leading_valid() {
    let mut image = SparseBuilder::dynamic(8 * 4096, 4096).build();
    let len = image.len();
    image[len - 100] ^= 0xFF;

    let image = VhdImage::from_stream(Cursor::new(image), len as u64, None, &VaultConfig::default())
        .unwrap();
    assert_eq!(image.sector_count(), 64);
}

#[test]
fn test_both_copies_corrupt() {
    let mut image = SparseBuilder::dynamic(8 * 4096, 4096).build();
    let len = image.len();
    image[40] ^= 0xFF;
    image[len - 512 + 40] ^= 0xFF;

    assert!(matches!(
        VhdImage::from_stream(Cursor::new(image), len as u64, None, &VaultConfig::default()),
        Err(Error::CorruptContainer(_))
    ));
}

#[test]
fn test_unsupported_version_and_mode() {
    let data = pattern(0, 4);

    let mut image = fixed(&data, [1; 16]);
    let at = data.len();
    image[at + 12..at + 16].copy_from_slice(&0x0002_0000u32.to_be_bytes());
    restamp_footer(&mut image[at..]);
    let len = image.len() as u64;
    assert!(matches!(
        VhdImage::from_stream(Cursor::new(image), len, None, &VaultConfig::default()),
        Err(Error::UnsupportedVersion { .. })
    ));

    for mode in [0u32, 1, 5, 6] {
        let mut image = data.clone();
        image.extend_from_slice(&footer(mode, data.len() as u64, u64::MAX, [1; 16]));
        let len = image.len() as u64;
        assert!(matches!(
            VhdImage::from_stream(Cursor::new(image), len, None, &VaultConfig::default()),
            Err(Error::UnsupportedStorageMode(m)) if m == mode
        ));
    }
}

#[test]
fn test_not_a_vhd() {
    let image = vec![0u8; 4096];
    let err = VhdImage::from_stream(Cursor::new(image), 4096, None, &VaultConfig::default())
        .unwrap_err();
    assert!(err.is_format_mismatch());
}

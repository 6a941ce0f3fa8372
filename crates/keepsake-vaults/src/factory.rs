//! Vault factory for automatic format detection
//!
//! This module provides automatic detection and opening of disk image formats.

use crate::{RawVault, VaultConfig, VhdVault};
use keepsake_core::{Result, Vault};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Detected vault type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultType {
    /// Raw sector image (.img, .dsk, .iso, etc.)
    Raw,
    /// Microsoft VHD format
    Vhd,
}

impl VaultType {
    /// Get a human-readable name for this vault type
    pub fn name(&self) -> &'static str {
        match self {
            VaultType::Raw => "Raw Sector Image",
            VaultType::Vhd => "Microsoft VHD",
        }
    }

    /// Parse a format name as given on a command line
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "raw" | "img" => Some(VaultType::Raw),
            "vhd" => Some(VaultType::Vhd),
            _ => None,
        }
    }
}

/// Magic bytes of the VHD footer
const VHD_MAGIC: &[u8] = b"conectix";

/// Look for the VHD cookie at the start and in the trailing footer
fn has_vhd_cookie(file: &mut File, file_size: u64) -> bool {
    let mut magic = [0u8; 8];
    if file.read_exact(&mut magic).is_ok() && &magic[..] == VHD_MAGIC {
        return true;
    }

    // Odd-length images carry a 511-byte footer
    let trailer = if file_size % 2 == 1 { 511 } else { 512 };
    if file_size < trailer {
        return false;
    }
    file.seek(SeekFrom::Start(file_size - trailer)).is_ok()
        && file.read_exact(&mut magic).is_ok()
        && &magic[..] == VHD_MAGIC
}

/// Detect the vault type from a file path
///
/// Uses magic bytes for detection, falling back to file extension.
pub fn detect_vault_type(path: &Path) -> Result<VaultType> {
    let mut file = File::open(path)?;
    let file_size = file.metadata()?.len();

    if has_vhd_cookie(&mut file, file_size) {
        return Ok(VaultType::Vhd);
    }

    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        if ext.eq_ignore_ascii_case("vhd") {
            return Ok(VaultType::Vhd);
        }
    }

    Ok(VaultType::Raw)
}

/// Open any supported vault format with automatic detection
///
/// Formats are tried in turn: VHD when detected, then raw. A VHD that fails
/// to open is logged and the file is served as a raw image instead; use
/// [`open_vault_as`] to get the VHD error.
///
/// # Example
///
/// ```rust,no_run
/// use keepsake_vaults::factory::open_vault;
/// use keepsake_vaults::VaultConfig;
/// use std::path::Path;
///
/// let vault = open_vault(Path::new("disk.vhd"), VaultConfig::default()).unwrap();
/// println!("Vault type: {}", vault.identify());
/// println!("Size: {} bytes", vault.length());
/// ```
pub fn open_vault(path: &Path, config: VaultConfig) -> Result<Box<dyn Vault>> {
    if detect_vault_type(path)? == VaultType::Vhd {
        match VhdVault::open(path, config.clone()) {
            Ok(vault) => return Ok(Box::new(vault)),
            Err(err) if err.is_format_mismatch() => {
                tracing::debug!(path = %path.display(), error = %err, "Not a VHD");
            }
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "VHD open failed, falling back to raw"
                );
            }
        }
    }

    open_vault_as(path, VaultType::Raw, config)
}

/// Open a vault with a specific type (skip auto-detection)
///
/// Use this when you know the vault type or want to force a specific handler.
pub fn open_vault_as(
    path: &Path,
    vault_type: VaultType,
    config: VaultConfig,
) -> Result<Box<dyn Vault>> {
    match vault_type {
        VaultType::Raw => Ok(Box::new(RawVault::open(path, config)?)),
        VaultType::Vhd => Ok(Box::new(VhdVault::open(path, config)?)),
    }
}

/// Get information about supported vault types
pub fn supported_formats() -> Vec<(&'static str, &'static [&'static str])> {
    vec![
        ("Raw Sector Image", &["img", "ima", "flp", "vfd", "dsk", "iso", "bin", "raw", "dd"]),
        ("Microsoft VHD", &["vhd"]),
    ]
}

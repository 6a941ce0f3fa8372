//! # Keepsake Vaults
//!
//! Container format handlers for the Keepsake preservation toolkit.
//!
//! This crate provides implementations of disk image container formats:
//! - **RawVault**: Plain sector images (.img, .ima, .flp, .vfd, .dsk, .iso)
//! - **VhdVault**: Microsoft VHD format (Fixed, Dynamic and Differencing)
//!
//! ## Example
//!
//! ```rust,no_run
//! use keepsake_vaults::factory::open_vault;
//! use keepsake_vaults::VaultConfig;
//! use std::path::Path;
//!
//! // Open any supported format with auto-detection
//! let vault = open_vault(Path::new("disk.vhd"), VaultConfig::default()).unwrap();
//!
//! println!("Type: {}", vault.identify());
//! println!("Size: {} bytes", vault.length());
//! ```

pub mod config;
pub mod factory;
pub mod raw;
pub mod vhd;

pub use config::{VaultConfig, DEFAULT_MAX_CHAIN_DEPTH};
pub use factory::{detect_vault_type, open_vault, open_vault_as, supported_formats, VaultType};
pub use raw::RawVault;
pub use vhd::{VhdImage, VhdVault};

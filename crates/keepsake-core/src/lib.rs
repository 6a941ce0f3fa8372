//! # Keepsake Core
//!
//! Core traits, types, and error handling for the Keepsake preservation toolkit.
//!
//! This crate provides the foundational abstractions for reading disk images:
//! - **Vaults**: Container formats (Raw, VHD)
//! - **Sector readers**: Sector-addressed access to a logical disk, the
//!   contract consumed by filesystem decoders and tooling
//!
//! ## Example
//!
//! ```rust,no_run
//! use keepsake_core::{Result, SectorReader, Vault};
//!
//! fn first_sector(vault: &dyn Vault, disk: &dyn SectorReader) -> Result<Vec<u8>> {
//!     println!("Vault type: {}", vault.identify());
//!     println!("Vault size: {} bytes", vault.length());
//!     disk.read_sectors(0, 1)
//! }
//! ```

pub mod error;
pub mod security;
pub mod traits;
pub mod types;

// Re-export commonly used items
pub use error::{Error, Result};
pub use security::*;
pub use traits::{ReadSeek, SectorReader, Vault};
pub use types::{format_size, VaultSummary};

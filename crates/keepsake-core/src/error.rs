//! Keepsake error types

use thiserror::Error;

/// The main error type for Keepsake operations
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error from the underlying storage
    #[error("Pipeline I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The data is not a vault of the requested format
    #[error("Invalid vault format: {0}")]
    InvalidVault(String),

    /// A structure of the container failed its integrity checks
    #[error("Corrupt container: {0}")]
    CorruptContainer(String),

    /// An on-disk structure carries a version we refuse to interpret
    #[error("Unsupported {structure} version 0x{version:08X}")]
    UnsupportedVersion {
        /// Name of the structure carrying the version field
        structure: &'static str,
        /// Raw version value
        version: u32,
    },

    /// The container declares a storage mode we cannot read
    #[error("Unsupported storage mode: {0}")]
    UnsupportedStorageMode(u32),

    /// No locator of a differencing image named a usable parent
    #[error("Parent image not found: {0}")]
    ParentNotFound(String),

    /// A parent image was found but does not match its child
    #[error("Parent image mismatch: child has {expected} sectors, parent has {actual}")]
    ParentMismatch {
        /// Sector count of the child image
        expected: u64,
        /// Sector count of the candidate parent
        actual: u64,
    },

    /// A logical sector or block lies outside the declared bounds
    #[error("Sector {sector} is out of bounds (limit {limit})")]
    Addressing {
        /// Offending sector or block index
        sector: u64,
        /// Exclusive upper bound
        limit: u64,
    },

    /// Unsupported format or feature
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Invalid operation or state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

/// Result type alias for Keepsake operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an invalid vault error
    pub fn invalid_vault(msg: impl Into<String>) -> Self {
        Error::InvalidVault(msg.into())
    }

    /// Create a corrupt container error
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Error::CorruptContainer(msg.into())
    }

    /// Create a parent-not-found error
    pub fn parent_not_found(msg: impl Into<String>) -> Self {
        Error::ParentNotFound(msg.into())
    }

    /// Create an addressing error
    pub fn addressing(sector: u64, limit: u64) -> Self {
        Error::Addressing { sector, limit }
    }

    /// Create an unsupported error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Error::Unsupported(msg.into())
    }

    /// Create an invalid operation error
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Error::InvalidOperation(msg.into())
    }

    /// True when the error only says "this is not a vault of that format".
    ///
    /// Detectors use this to decide whether trying the next format is the
    /// expected outcome or worth a warning.
    pub fn is_format_mismatch(&self) -> bool {
        matches!(self, Error::InvalidVault(_))
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(inner) => inner,
            Error::Addressing { .. } => std::io::Error::new(std::io::ErrorKind::InvalidInput, err),
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_mismatch_classification() {
        assert!(Error::invalid_vault("no cookie").is_format_mismatch());
        assert!(!Error::corrupt("bad checksum").is_format_mismatch());
        assert!(!Error::addressing(10, 5).is_format_mismatch());
    }

    #[test]
    fn test_into_io_error_keeps_kind() {
        let io: std::io::Error = Error::Io(std::io::ErrorKind::UnexpectedEof.into()).into();
        assert_eq!(io.kind(), std::io::ErrorKind::UnexpectedEof);

        let io: std::io::Error = Error::addressing(9, 8).into();
        assert_eq!(io.kind(), std::io::ErrorKind::InvalidInput);

        let io: std::io::Error = Error::corrupt("bitmap").into();
        assert_eq!(io.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_error_messages() {
        let err = Error::UnsupportedVersion {
            structure: "footer",
            version: 0x0002_0000,
        };
        assert_eq!(err.to_string(), "Unsupported footer version 0x00020000");

        let err = Error::ParentMismatch {
            expected: 2048,
            actual: 4096,
        };
        assert!(err.to_string().contains("2048"));
        assert!(err.to_string().contains("4096"));

        assert_eq!(
            Error::addressing(2048, 2048).to_string(),
            "Sector 2048 is out of bounds (limit 2048)"
        );
    }
}

//! Error taxonomy for HPKG containers.

use std::io;
use std::sync::Arc;
use thiserror::Error;

/// All errors produced by the HPKG library.
///
/// The type is `Clone` so a single in-flight block read can hand the same
/// failure to every caller awaiting it; foreign errors are kept behind `Arc`.
#[derive(Error, Debug, Clone)]
pub enum HpkgError {
    /// The leading header token is not the `hpkg` magic.
    #[error("Invalid magic: expected \"hpkg\", found {found:?}")]
    Format { found: String },

    /// A required header option is missing or malformed, or the length
    /// fields do not fit the file.
    #[error("Header error: {0}")]
    Header(String),

    /// The metadata tail could not be parsed or serialized.
    #[error("Metadata error: {0}")]
    Metadata(Arc<serde_json::Error>),

    /// A descriptor has no payload to write.
    #[error("Block {0} has no payload")]
    MissingBlock(usize),

    /// Open, stat, read or write failure, including short reads.
    #[error("IO error: {0}")]
    Io(Arc<io::Error>),
}

/// Convenience alias for `Result<T, HpkgError>`.
pub type Result<T> = std::result::Result<T, HpkgError>;

impl HpkgError {
    pub fn header(reason: impl Into<String>) -> Self {
        Self::Header(reason.into())
    }

    /// `true` for failures that say the bytes are not a usable container,
    /// as opposed to the environment failing underneath us.
    pub fn is_format_violation(&self) -> bool {
        matches!(self, Self::Format { .. } | Self::Header(_) | Self::Metadata(_))
    }
}

impl From<io::Error> for HpkgError {
    fn from(source: io::Error) -> Self {
        Self::Io(Arc::new(source))
    }
}

impl From<serde_json::Error> for HpkgError {
    fn from(source: serde_json::Error) -> Self {
        Self::Metadata(Arc::new(source))
    }
}

/// Build the I/O error reported when fewer than `expected` bytes are available.
pub(crate) fn short_read(start: u64, expected: usize, available: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("short read at offset {start}: wanted {expected} bytes, got {available}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_convert_and_clone() {
        let err: HpkgError = short_read(10, 4, 1).into();
        let copy = err.clone();
        assert!(matches!(copy, HpkgError::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));
        assert!(!err.is_format_violation());
    }

    #[test]
    fn format_and_header_errors_are_violations() {
        assert!(HpkgError::Format { found: "zip".into() }.is_format_violation());
        assert!(HpkgError::header("missing tail_length").is_format_violation());
        let json = serde_json::from_slice::<serde_json::Value>(b"{").unwrap_err();
        assert!(HpkgError::from(json).is_format_violation());
    }
}

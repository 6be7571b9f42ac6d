//! Error types for RaStore operations
//!
//! Every contract violation the engine can detect (type mismatch on append,
//! out-of-bounds access, unsupported variant combinations, stale identity
//! references, corrupted segment files) is reported as a [`StoreError`].
//! Nothing is silently repaired.

use std::path::PathBuf;

use thiserror::Error;

/// RaStore error types with detailed context
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// I/O operation failed
    #[error("I/O error{}: {message} ({kind})", fmt_path(.path))]
    Io {
        /// The file path where the error occurred
        path: Option<PathBuf>,
        /// The underlying I/O error kind
        kind: std::io::ErrorKind,
        /// Human-readable description
        message: String,
    },

    /// Checksum verification of a segment file failed
    #[error(
        "Checksum mismatch in {}: expected 0x{expected:08x}, got 0x{actual:08x}",
        .path.display()
    )]
    ChecksumMismatch {
        /// Segment file where the checksum failed
        path: PathBuf,
        /// Checksum stored in the segment header
        expected: u32,
        /// Checksum computed over the payload
        actual: u32,
    },

    /// Segment magic bytes not found at the start of a file
    #[error(
        "Magic bytes not found in {}: found {:02x}{:02x}{:02x}{:02x}",
        .path.display(), .found[0], .found[1], .found[2], .found[3]
    )]
    NoMagicFound {
        /// File being read
        path: PathBuf,
        /// Bytes actually found
        found: [u8; 4],
    },

    /// A binary value or type encoding could not be decoded
    #[error("Corrupt encoding at offset {offset}: {reason}")]
    CorruptEncoding {
        /// Byte offset inside the buffer being decoded
        offset: usize,
        /// Description of the problem
        reason: String,
    },

    /// A value's type is not a valid subtype of the required type
    #[error(" *** Type mismatch\n     Expected: {expected}\n     Received: {received}")]
    TypeMismatch {
        /// Rendered target type
        expected: String,
        /// Rendered offending type
        received: String,
    },

    /// Row, field or element index outside the valid range
    #[error("Index {index} out of bounds for length {length}")]
    OutOfBounds {
        /// Requested index
        index: i64,
        /// Length of the indexed object
        length: i64,
    },

    /// Variant combination that the engine does not implement
    #[error("Not yet supported: {what}")]
    Unsupported {
        /// What was attempted
        what: String,
    },

    /// A cached identity points at a value that has already been dropped
    #[error("Requested value no longer present (url id {url_id}, value id {value_id})")]
    StaleReference {
        /// Url id of the owning saved graph, -1 for local values
        url_id: i64,
        /// Value id within that url
        value_id: i64,
    },

    /// A local value id that was never registered
    #[error("Unknown local value id {value_id}")]
    UnknownValueId {
        /// The id that failed to resolve
        value_id: i64,
    },

    /// Malformed construction input (field lists, arities, duplicate unique keys)
    #[error("Malformed input: {reason}")]
    Malformed {
        /// Description of the problem
        reason: String,
    },

    /// Engine configuration failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

fn fmt_path(path: &Option<PathBuf>) -> String {
    match path {
        Some(p) => format!(" in {}", p.display()),
        None => String::new(),
    }
}

impl StoreError {
    /// Wrap an I/O error with the path it happened on.
    pub(crate) fn io_at(path: impl Into<PathBuf>, err: std::io::Error, what: &str) -> Self {
        StoreError::Io {
            path: Some(path.into()),
            kind: err.kind(),
            message: format!("{}: {}", what, err),
        }
    }

    pub(crate) fn unsupported(what: impl Into<String>) -> Self {
        StoreError::Unsupported { what: what.into() }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        StoreError::Malformed { reason: reason.into() }
    }

    pub(crate) fn corrupt(offset: usize, reason: impl Into<String>) -> Self {
        StoreError::CorruptEncoding { offset, reason: reason.into() }
    }
}

/// Convert std::io::Error to StoreError::Io
impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io {
            path: None,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Result type alias for RaStore operations
pub type StoreResult<T> = Result<T, StoreError>;

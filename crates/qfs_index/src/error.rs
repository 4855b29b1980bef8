//! Error types for the filesystem index.
//!
//! The taxonomy follows the engine contract: structural errors (bad offsets,
//! arena overflow) indicate index corruption and propagate to the caller,
//! which may decide to abort; content errors (malformed pk3s, bad shader
//! syntax) are logged at warning level and the offending resource is skipped;
//! cache errors are always recoverable and just force a rescan.

use camino::Utf8PathBuf;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FsError>;

/// Category tag attached to warning-level log records, so the host can tell
/// which indexing stage produced a complaint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    General,
    Extract,
    Pk3File,
    ShaderFile,
    CrosshairFile,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::General => "general",
            ErrorCategory::Extract => "extract",
            ErrorCategory::Pk3File => "pk3file",
            ErrorCategory::ShaderFile => "shaderfile",
            ErrorCategory::CrosshairFile => "crosshairfile",
        }
    }
}

/// Errors surfaced by index operations.
#[derive(Error, Debug)]
pub enum FsError {
    /// Filesystem I/O failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from the pk3 container layer.
    #[error("pk3 error: {0}")]
    Pk3(#[from] qfs_pk3::Pk3Error),

    /// An arena offset did not resolve to a live record. Indicates index
    /// corruption; continuing would compound the damage.
    #[error("invalid {what} offset {offset} (arena holds {len} entries)")]
    InvalidOffset {
        what: &'static str,
        offset: u32,
        len: u32,
    },

    /// A null offset was passed where a live record is required.
    #[error("unexpected null {what} offset")]
    NullOffset { what: &'static str },

    /// The arena reached its maximum entry count.
    #[error("{what} arena is full")]
    ArenaFull { what: &'static str },

    /// A string offset did not resolve inside the string pile.
    #[error("invalid string offset {offset}")]
    InvalidString { offset: u32 },

    /// Hash table created with a bucket count the hashing scheme cannot index.
    #[error("bucket count {0} exceeds maximum")]
    BucketCountTooLarge(usize),

    /// Cache blob carries a different version tag; a full rescan is needed.
    #[error("cache version mismatch: expected {expected:?}, found {found:?}")]
    CacheVersionMismatch { expected: String, found: String },

    /// Cache blob failed structural validation.
    #[error("corrupt cache: {0}")]
    CacheCorrupt(String),

    /// A scanned path was not valid UTF-8 and cannot become a qpath.
    #[error("path is not valid UTF-8: {0}")]
    PathNotUtf8(std::path::PathBuf),

    /// A source directory could not be scanned at all.
    #[error("cannot scan source directory {path}: {source}")]
    SourceDirUnreadable {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    /// Extracted file data did not match the indexed size.
    #[error("short read extracting {qpath}: got {got} of {expected} bytes")]
    ShortExtract {
        qpath: String,
        got: usize,
        expected: usize,
    },

    /// A custom sourcetype id is out of range or already registered.
    #[error("invalid custom sourcetype registration: {0}")]
    InvalidSourcetype(String),
}

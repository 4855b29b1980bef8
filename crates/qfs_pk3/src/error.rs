//! Error types for pk3 container parsing.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Pk3Error>;

/// Errors that can occur while parsing or reading a pk3 archive.
///
/// All of these are content-level errors: a malformed archive is skipped by
/// the indexer with a warning, never escalated to a fatal condition.
#[derive(Error, Debug)]
pub enum Pk3Error {
    /// Filesystem I/O failed while reading the archive.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No end-of-central-directory signature found in the archive tail.
    #[error("end of central directory record not found")]
    EocdNotFound,

    /// The archive spans multiple disks, which pk3s never do.
    #[error("multi-disk archives are not supported")]
    MultiDisk,

    /// A structure signature did not match the expected value.
    #[error("bad {structure} signature {found:#010x} at offset {offset}")]
    BadSignature {
        structure: &'static str,
        found: u32,
        offset: u64,
    },

    /// The central directory location or size points outside the file.
    #[error("central directory out of bounds (offset {offset}, size {size}, file {file_size})")]
    CentralDirectoryBounds { offset: u64, size: u64, file_size: u64 },

    /// The central directory buffer ended before the claimed entry count.
    #[error("truncated central directory: {parsed} of {claimed} entries")]
    TruncatedCentralDirectory { parsed: usize, claimed: usize },

    /// A member name is not valid UTF-8.
    #[error("entry name at index {index} is not valid UTF-8")]
    InvalidEntryName { index: usize },

    /// Attempted to open a member with a compression method other than
    /// stored or deflate.
    #[error("unsupported compression method {0}")]
    UnsupportedMethod(u16),

    /// Attempted to open an encrypted member.
    #[error("encrypted entries are not supported")]
    Encrypted,
}

//! Pk3 (zip) container support for the qfs virtual filesystem.
//!
//! Pk3 archives are standard zip files used as distributable content
//! containers. This crate parses the central directory structure without
//! extracting anything, computes the archive's identity hash, and exposes
//! streaming decompression for individual members:
//!
//! - [`CentralDirectory::read`] locates the end-of-central-directory record
//!   (scanning backward past any trailing comment), then enumerates entries.
//! - [`CentralDirectory::identity_hash`] checksums the raw central-directory
//!   bytes. Two pk3s are "the same" for pure-list and download purposes iff
//!   this hash matches, independent of file path.
//! - [`Pk3EntryReader`] incrementally decompresses one member (stored and
//!   deflate methods only).

mod central_dir;
mod error;
mod reader;

pub use central_dir::{CentralDirectory, Pk3Compression, Pk3Entry};
pub use error::{Pk3Error, Result};
pub use reader::Pk3EntryReader;

//! Virtual filesystem index.
//!
//! Builds and queries an index of game content spread across source
//! directories, pk3 archives, and pk3dir trees. Records live in relocatable
//! arenas referenced by offset, so the whole index can be flattened into a
//! versioned binary cache and reloaded without fixups. On top of the index
//! sit a multi-criteria precedence resolver (mod dir, pure list, current
//! map, archive ordering), shader and crosshair content indexes, and
//! restartable iteration cursors.
//!
//! Typical lifecycle:
//!
//! ```no_run
//! use camino::Utf8Path;
//! use qfs_index::{FsIndex, LookupFlags, SanityLimit};
//!
//! # fn main() -> qfs_index::Result<()> {
//! let mut fs = FsIndex::new("baseq3")?;
//! fs.begin_refresh();
//! fs.load_directory(0, Utf8Path::new("/opt/game"), &mut SanityLimit::default())?;
//!
//! if let Some(file) = fs.general_lookup("maps/q3dm17.bsp", LookupFlags::empty(), false)? {
//!     let _data = fs.read_file(file)?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod arena;
mod cache;
mod error;
pub mod hashtable;
mod index;
mod iterate;
mod lookup;
pub mod qpath;
mod record;
mod sanity;
mod scan;
mod shader;
mod strings;

pub use arena::{Arena, ArenaPtr, CacheRecord, StringId};
pub use cache::QFS_CACHE_VERSION;
pub use error::{ErrorCategory, FsError, Result};
pub use index::{
    FsIndex, FsStats, SourceType, FIRST_CUSTOM_SOURCETYPE_ID, MAX_CUSTOM_SOURCETYPES,
};
pub use iterate::{FileIterator, Pk3Iterator, ShaderIterator};
pub use lookup::{LookupCategory, LookupFlags};
pub use record::{
    CrosshairRecord, DirectSource, DirectoryRecord, FileFlags, FileRecord, FileSource,
    Pk3MemberSource, Pk3Tallies, ShaderRecord,
};
pub use sanity::{SanityLimit, SANITY_HASH_BUCKETS, SANITY_MAX_PER_HASH_BUCKET};
pub use shader::{parse_shader_blocks, ShaderBlock, ShaderParseError};
pub use strings::StringRepo;

//! Binary index cache.
//!
//! The whole index is flattened into one versioned blob: magic, version
//! string, statistics, the string repository, the five arenas, and the five
//! hash tables, in that fixed order. Because records reference each other
//! only by arena offset and string id, no fixups are needed on import.
//!
//! Import never trusts the blob: the version must match exactly and every
//! offset in every record is bounds-checked before the index is handed to
//! the caller. Any failure is reported as an error the caller treats as a
//! cache miss, falling back to a full rescan; a bad cache is never fatal.

use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use camino::Utf8Path;
use std::io::{BufReader, BufWriter, Read, Write};
use tracing::info;

use crate::arena::{Arena, ArenaPtr, StringId};
use crate::error::{FsError, Result};
use crate::index::{FsIndex, FsStats};
use crate::record::{CrosshairRecord, DirectoryRecord, FileRecord, FileSource, ShaderRecord};

/// Bump whenever any serialized layout, hash function, or table geometry
/// changes; an old cache must never be partially understood.
pub const QFS_CACHE_VERSION: &str = "qfs-cache-v1";

const CACHE_MAGIC: &[u8; 8] = b"QFSCACHE";

/// Upper bound on the stored version string, to reject garbage lengths
/// before allocating.
const MAX_VERSION_LEN: u32 = 64;

fn write_stats<W: Write>(writer: &mut W, stats: &FsStats) -> std::io::Result<()> {
    writer.write_u32::<LE>(stats.valid_pk3_count)?;
    writer.write_u32::<LE>(stats.pk3_subfile_count)?;
    writer.write_u32::<LE>(stats.shader_file_count)?;
    writer.write_u32::<LE>(stats.shader_count)?;
    writer.write_u32::<LE>(stats.total_file_count)?;
    writer.write_u32::<LE>(stats.cacheable_file_count)
}

fn read_stats<R: Read>(reader: &mut R) -> std::io::Result<FsStats> {
    Ok(FsStats {
        valid_pk3_count: reader.read_u32::<LE>()?,
        pk3_subfile_count: reader.read_u32::<LE>()?,
        shader_file_count: reader.read_u32::<LE>()?,
        shader_count: reader.read_u32::<LE>()?,
        total_file_count: reader.read_u32::<LE>()?,
        cacheable_file_count: reader.read_u32::<LE>()?,
    })
}

impl FsIndex {
    /// Serialize the index to a writer.
    pub fn export_cache<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(CACHE_MAGIC)?;
        writer.write_u32::<LE>(QFS_CACHE_VERSION.len() as u32)?;
        writer.write_all(QFS_CACHE_VERSION.as_bytes())?;

        writer.write_u32::<LE>(self.refresh_count)?;
        write_stats(writer, &self.total_stats)?;

        self.strings.export(writer)?;
        self.file_arena.export(writer)?;
        self.shader_arena.export(writer)?;
        self.crosshair_arena.export(writer)?;
        self.directory_arena.export(writer)?;
        self.pk3_hash_arena.export(writer)?;

        self.files.export(writer)?;
        self.directories.export(writer)?;
        self.shaders.export(writer)?;
        self.crosshairs.export(writer)?;
        self.pk3_hash_lookup.export(writer)?;
        Ok(())
    }

    /// Write the cache blob to a file, replacing any existing one.
    pub fn export_cache_file(&self, path: &Utf8Path) -> Result<()> {
        let mut writer = BufWriter::new(std::fs::File::create(path)?);
        self.export_cache(&mut writer)?;
        writer.flush()?;
        info!(%path, bytes = self.memory_use_estimate(), "index cache written");
        Ok(())
    }

    /// Deserialize an index from a reader. Errors indicate a stale or
    /// damaged cache; the caller should fall back to a fresh scan.
    pub fn import_cache<R: Read>(reader: &mut R, base_mod_dir: &str) -> Result<FsIndex> {
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if &magic != CACHE_MAGIC {
            return Err(FsError::CacheCorrupt("bad magic".to_owned()));
        }
        let version_len = reader.read_u32::<LE>()?;
        if version_len > MAX_VERSION_LEN {
            return Err(FsError::CacheCorrupt(format!(
                "version length {version_len} out of range"
            )));
        }
        let mut version = vec![0u8; version_len as usize];
        reader.read_exact(&mut version)?;
        let version = String::from_utf8(version)
            .map_err(|_| FsError::CacheCorrupt("version is not utf-8".to_owned()))?;
        if version != QFS_CACHE_VERSION {
            return Err(FsError::CacheVersionMismatch {
                expected: QFS_CACHE_VERSION.to_owned(),
                found: version,
            });
        }

        let mut fs = FsIndex::new(base_mod_dir)?;
        // Advance past every stamp stored in the blob: imported records
        // start stale and only a refresh over the real tree reactivates
        // the ones still present on disk.
        fs.refresh_count = reader.read_u32::<LE>()?.wrapping_add(1);
        fs.total_stats = read_stats(reader)?;

        fs.strings.import(reader)?;
        fs.file_arena.import(reader)?;
        fs.shader_arena.import(reader)?;
        fs.crosshair_arena.import(reader)?;
        fs.directory_arena.import(reader)?;
        fs.pk3_hash_arena.import(reader)?;

        fs.files.import(&fs.file_arena, reader)?;
        fs.directories.import(&fs.directory_arena, reader)?;
        fs.shaders.import(&fs.shader_arena, reader)?;
        fs.crosshairs.import(&fs.crosshair_arena, reader)?;
        fs.pk3_hash_lookup.import(&fs.pk3_hash_arena, reader)?;

        validate_imported(&fs)?;
        Ok(fs)
    }

    /// Load the cache blob from a file.
    pub fn import_cache_file(path: &Utf8Path, base_mod_dir: &str) -> Result<FsIndex> {
        let mut reader = BufReader::new(std::fs::File::open(path)?);
        let fs = FsIndex::import_cache(&mut reader, base_mod_dir)?;
        info!(%path, files = fs.total_stats.total_file_count, "index cache loaded");
        Ok(fs)
    }
}

fn check_string(fs: &FsIndex, id: StringId, what: &str) -> Result<()> {
    if fs.strings.contains(id) {
        Ok(())
    } else {
        Err(FsError::CacheCorrupt(format!(
            "{what} string id {} out of bounds",
            id.raw()
        )))
    }
}

fn check_link<T>(arena: &Arena<T>, ptr: ArenaPtr<T>, what: &str) -> Result<()> {
    if ptr.is_null() || arena.contains(ptr) {
        Ok(())
    } else {
        Err(FsError::CacheCorrupt(format!(
            "{what} link {} out of bounds",
            ptr.raw()
        )))
    }
}

fn check_ref<T>(arena: &Arena<T>, ptr: ArenaPtr<T>, what: &str) -> Result<()> {
    if arena.contains(ptr) {
        Ok(())
    } else {
        Err(FsError::CacheCorrupt(format!(
            "{what} reference {} out of bounds",
            ptr.raw()
        )))
    }
}

/// Walk every imported record and bounds-check all offsets, so a corrupted
/// cache fails here instead of deep inside a later lookup.
fn validate_imported(fs: &FsIndex) -> Result<()> {
    for ptr in fs.file_arena.ptrs() {
        let record: &FileRecord = fs.file_arena.get(ptr)?;
        check_link(&fs.file_arena, record.next, "file next")?;
        check_link(&fs.file_arena, record.next_in_directory, "file sibling")?;
        check_string(fs, record.qp_dir, "file dir")?;
        check_string(fs, record.qp_name, "file name")?;
        check_string(fs, record.qp_ext, "file ext")?;
        match &record.source {
            FileSource::Direct(direct) => {
                check_string(fs, direct.os_path, "file os path")?;
                check_string(fs, direct.qp_mod, "file mod dir")?;
                check_string(fs, direct.pk3dir, "file pk3dir")?;
            }
            FileSource::Pk3Member(member) => {
                check_ref(&fs.file_arena, member.source_pk3, "member parent")?;
                let parent = fs.file_arena.get(member.source_pk3)?;
                if parent.direct().is_none() {
                    return Err(FsError::CacheCorrupt(
                        "member parent is not a direct file".to_owned(),
                    ));
                }
            }
            FileSource::Custom(_) => {
                // Custom-sourced files are never cached.
                return Err(FsError::CacheCorrupt(
                    "custom-sourced file in cache".to_owned(),
                ));
            }
        }
    }
    for ptr in fs.shader_arena.ptrs() {
        let record: &ShaderRecord = fs.shader_arena.get(ptr)?;
        check_link(&fs.shader_arena, record.next, "shader next")?;
        check_string(fs, record.shader_name, "shader name")?;
        check_ref(&fs.file_arena, record.source_file, "shader source")?;
        if record.start_position > record.end_position {
            return Err(FsError::CacheCorrupt("inverted shader range".to_owned()));
        }
    }
    for ptr in fs.crosshair_arena.ptrs() {
        let record: &CrosshairRecord = fs.crosshair_arena.get(ptr)?;
        check_link(&fs.crosshair_arena, record.next, "crosshair next")?;
        check_ref(&fs.file_arena, record.source_file, "crosshair source")?;
    }
    for ptr in fs.directory_arena.ptrs() {
        let record: &DirectoryRecord = fs.directory_arena.get(ptr)?;
        check_link(&fs.directory_arena, record.next, "directory next")?;
        check_link(&fs.directory_arena, record.peer_directory, "directory peer")?;
        check_link(&fs.directory_arena, record.sub_directory, "directory child")?;
        check_link(&fs.file_arena, record.sub_file, "directory file")?;
        check_string(fs, record.qp_dir, "directory path")?;
    }
    for ptr in fs.pk3_hash_arena.ptrs() {
        let record = fs.pk3_hash_arena.get(ptr)?;
        check_link(&fs.pk3_hash_arena, record.next, "pk3 hash next")?;
        check_ref(&fs.file_arena, record.pk3, "pk3 hash target")?;
    }
    Ok(())
}

//! Index record types.
//!
//! All records live in arenas and reference each other (and interned
//! strings) by offset only, so the whole set is relocatable and can be
//! flattened into the binary cache. The file record is a tagged sum: shared
//! qpath/size/flag fields plus a source variant describing where the bytes
//! actually come from.

use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use std::io::{Read, Write};

use bitflags::bitflags;

use crate::arena::{ArenaPtr, CacheRecord, StringId};
use crate::hashtable::HashNode;

bitflags! {
    /// Classification flags on a file record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FileFlags: u16 {
        /// Other content (pk3 members, shaders, crosshairs) is linked to
        /// this file.
        const LINKED_CONTENT = 1;
        /// Pk3 located in a download directory.
        const DOWNLOAD_PK3 = 2;
        /// Pk3 available for pure/download lists, but contents not indexed.
        const REFONLY_PK3 = 4;
        /// Pk3 indexed normally but omitted from file listings.
        const NOLIST_PK3 = 8;
    }
}

impl FileFlags {
    /// Pk3 from any of the special directories (downloads, refonly, nolist).
    pub fn is_special_pk3(self) -> bool {
        self.intersects(FileFlags::DOWNLOAD_PK3 | FileFlags::REFONLY_PK3 | FileFlags::NOLIST_PK3)
    }
}

/// Resource tallies for a direct pk3 file, kept for statistics and for
/// reactivating cached pk3s without reparsing them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pk3Tallies {
    pub pk3_subfile_count: u32,
    pub shader_file_count: u32,
    pub shader_count: u32,
}

/// Source variant of a file backed by a real filesystem path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectSource {
    /// Which search-path source root this file came from.
    pub source_dir_id: u8,
    /// Full OS path, interned like any other string.
    pub os_path: StringId,
    pub os_timestamp: u32,
    /// Owning mod directory name ("baseq3", "mymod", ...).
    pub qp_mod: StringId,
    /// Name of the containing pk3dir, or empty.
    pub pk3dir: StringId,
    /// Refresh generation stamp. The file is active only while this equals
    /// the index's current generation.
    pub refresh_count: u32,
    /// Central-directory identity hash when this file is a valid pk3, else 0.
    pub pk3_hash: u64,
    pub tallies: Pk3Tallies,
}

/// Source variant of a file stored inside a pk3 archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pk3MemberSource {
    /// Owning direct pk3 file. Invariant: resolves to a `Direct` record
    /// with a nonzero `pk3_hash`.
    pub source_pk3: ArenaPtr<FileRecord>,
    /// Offset of the member's local header inside the archive.
    pub header_position: u32,
    pub compressed_size: u32,
    /// Zip compression method (0 stored, 8 deflate).
    pub compression_method: u16,
}

/// Where a file's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSource {
    Direct(DirectSource),
    Pk3Member(Pk3MemberSource),
    /// Application-registered sourcetype; behavior is dispatched through the
    /// custom sourcetype registry.
    Custom(u8),
}

const SOURCETYPE_DIRECT: u8 = 1;
const SOURCETYPE_PK3: u8 = 2;

/// One indexed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub(crate) next: ArenaPtr<FileRecord>,
    /// Sibling link in the owning directory record's file chain.
    pub(crate) next_in_directory: ArenaPtr<FileRecord>,

    /// Qpath components, each interned. Directory includes its trailing
    /// slash; extension includes its leading dot; either may be empty.
    pub qp_dir: StringId,
    pub qp_name: StringId,
    pub qp_ext: StringId,

    pub filesize: u32,
    pub flags: FileFlags,
    pub source: FileSource,
}

impl FileRecord {
    pub fn direct(&self) -> Option<&DirectSource> {
        match &self.source {
            FileSource::Direct(direct) => Some(direct),
            _ => None,
        }
    }

    pub fn pk3_member(&self) -> Option<&Pk3MemberSource> {
        match &self.source {
            FileSource::Pk3Member(member) => Some(member),
            _ => None,
        }
    }

    /// True for a direct file that parsed as a valid pk3 archive.
    pub fn is_pk3(&self) -> bool {
        matches!(&self.source, FileSource::Direct(d) if d.pk3_hash != 0)
    }
}

impl HashNode for FileRecord {
    fn next(&self) -> ArenaPtr<Self> {
        self.next
    }
    fn set_next(&mut self, next: ArenaPtr<Self>) {
        self.next = next;
    }
}

impl CacheRecord for FileRecord {
    fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u32::<LE>(self.next.raw())?;
        writer.write_u32::<LE>(self.next_in_directory.raw())?;
        writer.write_u32::<LE>(self.qp_dir.raw())?;
        writer.write_u32::<LE>(self.qp_name.raw())?;
        writer.write_u32::<LE>(self.qp_ext.raw())?;
        writer.write_u32::<LE>(self.filesize)?;
        writer.write_u16::<LE>(self.flags.bits())?;
        match &self.source {
            FileSource::Direct(d) => {
                writer.write_u8(SOURCETYPE_DIRECT)?;
                writer.write_u8(d.source_dir_id)?;
                writer.write_u32::<LE>(d.os_path.raw())?;
                writer.write_u32::<LE>(d.os_timestamp)?;
                writer.write_u32::<LE>(d.qp_mod.raw())?;
                writer.write_u32::<LE>(d.pk3dir.raw())?;
                writer.write_u32::<LE>(d.refresh_count)?;
                writer.write_u64::<LE>(d.pk3_hash)?;
                writer.write_u32::<LE>(d.tallies.pk3_subfile_count)?;
                writer.write_u32::<LE>(d.tallies.shader_file_count)?;
                writer.write_u32::<LE>(d.tallies.shader_count)?;
            }
            FileSource::Pk3Member(m) => {
                writer.write_u8(SOURCETYPE_PK3)?;
                writer.write_u32::<LE>(m.source_pk3.raw())?;
                writer.write_u32::<LE>(m.header_position)?;
                writer.write_u32::<LE>(m.compressed_size)?;
                writer.write_u16::<LE>(m.compression_method)?;
            }
            FileSource::Custom(id) => {
                writer.write_u8(*id)?;
            }
        }
        Ok(())
    }

    fn read_from<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let next = ArenaPtr::from_raw(reader.read_u32::<LE>()?);
        let next_in_directory = ArenaPtr::from_raw(reader.read_u32::<LE>()?);
        let qp_dir = StringId(reader.read_u32::<LE>()?);
        let qp_name = StringId(reader.read_u32::<LE>()?);
        let qp_ext = StringId(reader.read_u32::<LE>()?);
        let filesize = reader.read_u32::<LE>()?;
        let flags = FileFlags::from_bits_retain(reader.read_u16::<LE>()?);
        let source = match reader.read_u8()? {
            SOURCETYPE_DIRECT => FileSource::Direct(DirectSource {
                source_dir_id: reader.read_u8()?,
                os_path: StringId(reader.read_u32::<LE>()?),
                os_timestamp: reader.read_u32::<LE>()?,
                qp_mod: StringId(reader.read_u32::<LE>()?),
                pk3dir: StringId(reader.read_u32::<LE>()?),
                refresh_count: reader.read_u32::<LE>()?,
                pk3_hash: reader.read_u64::<LE>()?,
                tallies: Pk3Tallies {
                    pk3_subfile_count: reader.read_u32::<LE>()?,
                    shader_file_count: reader.read_u32::<LE>()?,
                    shader_count: reader.read_u32::<LE>()?,
                },
            }),
            SOURCETYPE_PK3 => FileSource::Pk3Member(Pk3MemberSource {
                source_pk3: ArenaPtr::from_raw(reader.read_u32::<LE>()?),
                header_position: reader.read_u32::<LE>()?,
                compressed_size: reader.read_u32::<LE>()?,
                compression_method: reader.read_u16::<LE>()?,
            }),
            id => FileSource::Custom(id),
        };
        Ok(FileRecord {
            next,
            next_in_directory,
            qp_dir,
            qp_name,
            qp_ext,
            filesize,
            flags,
            source,
        })
    }
}

/// Secondary index entry for one shader block inside a shader script file.
/// Points back at the source file with a byte range; owns no data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderRecord {
    pub(crate) next: ArenaPtr<ShaderRecord>,
    pub shader_name: StringId,
    pub source_file: ArenaPtr<FileRecord>,
    pub start_position: u32,
    pub end_position: u32,
}

impl HashNode for ShaderRecord {
    fn next(&self) -> ArenaPtr<Self> {
        self.next
    }
    fn set_next(&mut self, next: ArenaPtr<Self>) {
        self.next = next;
    }
}

impl CacheRecord for ShaderRecord {
    fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u32::<LE>(self.next.raw())?;
        writer.write_u32::<LE>(self.shader_name.raw())?;
        writer.write_u32::<LE>(self.source_file.raw())?;
        writer.write_u32::<LE>(self.start_position)?;
        writer.write_u32::<LE>(self.end_position)
    }
    fn read_from<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        Ok(ShaderRecord {
            next: ArenaPtr::from_raw(reader.read_u32::<LE>()?),
            shader_name: StringId(reader.read_u32::<LE>()?),
            source_file: ArenaPtr::from_raw(reader.read_u32::<LE>()?),
            start_position: reader.read_u32::<LE>()?,
            end_position: reader.read_u32::<LE>()?,
        })
    }
}

/// Secondary index entry keyed by crosshair image content hash, so identical
/// images supplied by different pk3s collapse to one logical entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrosshairRecord {
    pub(crate) next: ArenaPtr<CrosshairRecord>,
    pub content_hash: u64,
    pub source_file: ArenaPtr<FileRecord>,
}

impl HashNode for CrosshairRecord {
    fn next(&self) -> ArenaPtr<Self> {
        self.next
    }
    fn set_next(&mut self, next: ArenaPtr<Self>) {
        self.next = next;
    }
}

impl CacheRecord for CrosshairRecord {
    fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u32::<LE>(self.next.raw())?;
        writer.write_u64::<LE>(self.content_hash)?;
        writer.write_u32::<LE>(self.source_file.raw())
    }
    fn read_from<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        Ok(CrosshairRecord {
            next: ArenaPtr::from_raw(reader.read_u32::<LE>()?),
            content_hash: reader.read_u64::<LE>()?,
            source_file: ArenaPtr::from_raw(reader.read_u32::<LE>()?),
        })
    }
}

/// One record per directory qpath, forming a tree used purely for
/// iteration, never for resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRecord {
    pub(crate) next: ArenaPtr<DirectoryRecord>,
    /// Directory qpath including trailing slash; empty for the root.
    pub qp_dir: StringId,
    pub(crate) peer_directory: ArenaPtr<DirectoryRecord>,
    pub(crate) sub_file: ArenaPtr<FileRecord>,
    pub(crate) sub_directory: ArenaPtr<DirectoryRecord>,
}

impl HashNode for DirectoryRecord {
    fn next(&self) -> ArenaPtr<Self> {
        self.next
    }
    fn set_next(&mut self, next: ArenaPtr<Self>) {
        self.next = next;
    }
}

impl CacheRecord for DirectoryRecord {
    fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u32::<LE>(self.next.raw())?;
        writer.write_u32::<LE>(self.qp_dir.raw())?;
        writer.write_u32::<LE>(self.peer_directory.raw())?;
        writer.write_u32::<LE>(self.sub_file.raw())?;
        writer.write_u32::<LE>(self.sub_directory.raw())
    }
    fn read_from<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        Ok(DirectoryRecord {
            next: ArenaPtr::from_raw(reader.read_u32::<LE>()?),
            qp_dir: StringId(reader.read_u32::<LE>()?),
            peer_directory: ArenaPtr::from_raw(reader.read_u32::<LE>()?),
            sub_file: ArenaPtr::from_raw(reader.read_u32::<LE>()?),
            sub_directory: ArenaPtr::from_raw(reader.read_u32::<LE>()?),
        })
    }
}

/// Entry in the pk3-hash lookup table, mapping an identity hash bucket to a
/// direct pk3 file. Used to answer "which pk3 carries hash H" for download
/// and pure-list comparisons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pk3HashEntry {
    pub(crate) next: ArenaPtr<Pk3HashEntry>,
    pub pk3: ArenaPtr<FileRecord>,
}

impl HashNode for Pk3HashEntry {
    fn next(&self) -> ArenaPtr<Self> {
        self.next
    }
    fn set_next(&mut self, next: ArenaPtr<Self>) {
        self.next = next;
    }
}

impl CacheRecord for Pk3HashEntry {
    fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u32::<LE>(self.next.raw())?;
        writer.write_u32::<LE>(self.pk3.raw())
    }
    fn read_from<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        Ok(Pk3HashEntry {
            next: ArenaPtr::from_raw(reader.read_u32::<LE>()?),
            pk3: ArenaPtr::from_raw(reader.read_u32::<LE>()?),
        })
    }
}

/// Fold a 64-bit content hash into the 32-bit bucket hash used by the
/// tables that key on it.
pub(crate) fn fold_hash(hash: u64) -> u32 {
    (hash ^ (hash >> 32)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_direct() -> FileRecord {
        FileRecord {
            next: ArenaPtr::from_raw(3),
            next_in_directory: ArenaPtr::from_raw(9),
            qp_dir: StringId(10),
            qp_name: StringId(20),
            qp_ext: StringId(30),
            filesize: 1234,
            flags: FileFlags::LINKED_CONTENT | FileFlags::DOWNLOAD_PK3,
            source: FileSource::Direct(DirectSource {
                source_dir_id: 1,
                os_path: StringId(40),
                os_timestamp: 777,
                qp_mod: StringId(50),
                pk3dir: StringId::EMPTY,
                refresh_count: 2,
                pk3_hash: 0xdead_beef_cafe_f00d,
                tallies: Pk3Tallies {
                    pk3_subfile_count: 5,
                    shader_file_count: 1,
                    shader_count: 8,
                },
            }),
        }
    }

    #[test]
    fn file_record_round_trips_both_variants() {
        let direct = sample_direct();
        let member = FileRecord {
            next: ArenaPtr::NULL,
            next_in_directory: ArenaPtr::NULL,
            qp_dir: StringId(1),
            qp_name: StringId(2),
            qp_ext: StringId(3),
            filesize: 99,
            flags: FileFlags::empty(),
            source: FileSource::Pk3Member(Pk3MemberSource {
                source_pk3: ArenaPtr::from_raw(7),
                header_position: 4096,
                compressed_size: 64,
                compression_method: 8,
            }),
        };

        for record in [direct, member] {
            let mut blob = Vec::new();
            record.write_to(&mut blob).unwrap();
            let restored = FileRecord::read_from(&mut blob.as_slice()).unwrap();
            assert_eq!(restored, record);
        }
    }

    #[test]
    fn special_pk3_classification() {
        assert!(FileFlags::DOWNLOAD_PK3.is_special_pk3());
        assert!(FileFlags::REFONLY_PK3.is_special_pk3());
        assert!(FileFlags::NOLIST_PK3.is_special_pk3());
        assert!(!FileFlags::LINKED_CONTENT.is_special_pk3());
    }

    #[test]
    fn is_pk3_requires_direct_with_hash() {
        let mut record = sample_direct();
        assert!(record.is_pk3());
        if let FileSource::Direct(d) = &mut record.source {
            d.pk3_hash = 0;
        }
        assert!(!record.is_pk3());
    }
}

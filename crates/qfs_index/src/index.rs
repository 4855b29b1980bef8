//! The filesystem index aggregate.
//!
//! `FsIndex` owns the arenas, the string repository, and the five hash
//! tables (files, directories, shaders, crosshairs, pk3-hash lookup). It is
//! an explicitly constructed context object: create one at startup, call
//! [`FsIndex::begin_refresh`] plus [`FsIndex::load_directory`] per source
//! root on every refresh cycle, and drop it on shutdown. Nothing here is
//! thread-safe by contract; the index has a single logical owner and is
//! only mutated during refresh.

use camino::Utf8Path;
use std::collections::HashMap;
use std::io::Read;

use qfs_pk3::{Pk3Compression, Pk3EntryReader};

use crate::arena::{Arena, ArenaPtr, StringId};
use crate::error::{FsError, Result};
use crate::hashtable::HashTable;
use crate::record::{
    CrosshairRecord, DirectoryRecord, FileRecord, FileSource, Pk3HashEntry, ShaderRecord,
};
use crate::strings::StringRepo;

pub(crate) const FILE_TABLE_BUCKETS: usize = 32768;
pub(crate) const DIRECTORY_TABLE_BUCKETS: usize = 8192;
pub(crate) const SHADER_TABLE_BUCKETS: usize = 32768;
pub(crate) const CROSSHAIR_TABLE_BUCKETS: usize = 256;
pub(crate) const PK3_HASH_TABLE_BUCKETS: usize = 4096;

/// Buffer size for streaming pk3 member extraction.
const EXTRACT_BUFFER_SIZE: usize = 65536;

/// The set of custom sourcetypes is bounded and known at compile time.
pub const MAX_CUSTOM_SOURCETYPES: usize = 2;

/// Sourcetype ids 1 and 2 are reserved for the builtin direct and
/// pk3-member sources.
pub const FIRST_CUSTOM_SOURCETYPE_ID: u8 = 3;

/// Pluggable behavior for application-registered file sources.
///
/// The builtin direct and pk3-member sourcetypes are implemented directly
/// by [`FsIndex`]; custom ones are dispatched through this trait.
pub trait SourceType {
    fn id(&self) -> u8;
    fn is_active(&self, fs: &FsIndex, file: &FileRecord) -> bool;
    fn mod_dir(&self, fs: &FsIndex, file: &FileRecord) -> String;
    fn read_data(&self, fs: &FsIndex, file: &FileRecord) -> Result<Vec<u8>>;
}

/// Running statistics over indexed content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FsStats {
    pub valid_pk3_count: u32,
    pub pk3_subfile_count: u32,
    pub shader_file_count: u32,
    pub shader_count: u32,
    pub total_file_count: u32,
    pub cacheable_file_count: u32,
}

/// Pure-list and current-map state applied during lookups. Never cached;
/// it belongs to the connection, not the index.
#[derive(Debug, Default)]
pub(crate) struct PureState {
    pub connected_server_pure_state: i32,
    pub hashes: Vec<u64>,
    positions: HashMap<u64, u32>,
    pub names: Vec<String>,
}

impl PureState {
    /// True when a server pure list constrains lookups.
    pub fn active(&self) -> bool {
        self.connected_server_pure_state > 0 && !self.hashes.is_empty()
    }

    /// 0-based position of a pk3 hash in the approved list.
    pub fn position(&self, hash: u64) -> Option<u32> {
        self.positions.get(&hash).copied()
    }

    pub fn set_loaded_paks(&mut self, hashes: Vec<u64>, names: Vec<String>) {
        self.positions = hashes
            .iter()
            .enumerate()
            .map(|(index, &hash)| (hash, index as u32))
            .collect();
        self.hashes = hashes;
        self.names = names;
    }

    pub fn clear(&mut self) {
        *self = PureState::default();
    }
}

/// The filesystem index.
pub struct FsIndex {
    pub(crate) strings: StringRepo,

    pub(crate) file_arena: Arena<FileRecord>,
    pub(crate) shader_arena: Arena<ShaderRecord>,
    pub(crate) crosshair_arena: Arena<CrosshairRecord>,
    pub(crate) directory_arena: Arena<DirectoryRecord>,
    pub(crate) pk3_hash_arena: Arena<Pk3HashEntry>,

    pub(crate) files: HashTable<FileRecord>,
    pub(crate) directories: HashTable<DirectoryRecord>,
    pub(crate) shaders: HashTable<ShaderRecord>,
    pub(crate) crosshairs: HashTable<CrosshairRecord>,
    pub(crate) pk3_hash_lookup: HashTable<Pk3HashEntry>,

    /// Refresh generation. Direct files are active only while their stamp
    /// matches; bumping this implicitly deactivates everything not re-found.
    pub(crate) refresh_count: u32,

    custom_sourcetypes: Vec<Box<dyn SourceType>>,

    pub total_stats: FsStats,
    pub active_stats: FsStats,
    pub new_stats: FsStats,

    /// Base game directory name used by mod precedence ("baseq3" style).
    pub(crate) base_mod_dir: String,
    /// Current mod directory, if any.
    pub(crate) current_mod_dir: Option<String>,

    pub(crate) pure: PureState,
    /// Pk3 carrying the currently loaded map, for map-affinity precedence.
    pub(crate) current_map_pk3: ArenaPtr<FileRecord>,
}

impl FsIndex {
    /// Create an empty index. `base_mod_dir` is the always-present base
    /// content directory; the current mod can be changed later.
    pub fn new(base_mod_dir: &str) -> Result<Self> {
        Ok(FsIndex {
            strings: StringRepo::new()?,
            file_arena: Arena::new("file"),
            shader_arena: Arena::new("shader"),
            crosshair_arena: Arena::new("crosshair"),
            directory_arena: Arena::new("directory"),
            pk3_hash_arena: Arena::new("pk3 hash"),
            files: HashTable::new(FILE_TABLE_BUCKETS)?,
            directories: HashTable::new(DIRECTORY_TABLE_BUCKETS)?,
            shaders: HashTable::new(SHADER_TABLE_BUCKETS)?,
            crosshairs: HashTable::new(CROSSHAIR_TABLE_BUCKETS)?,
            pk3_hash_lookup: HashTable::new(PK3_HASH_TABLE_BUCKETS)?,
            refresh_count: 0,
            custom_sourcetypes: Vec::new(),
            total_stats: FsStats::default(),
            active_stats: FsStats::default(),
            new_stats: FsStats::default(),
            base_mod_dir: base_mod_dir.to_owned(),
            current_mod_dir: None,
            pure: PureState::default(),
            current_map_pk3: ArenaPtr::NULL,
        })
    }

    /// Register a custom sourcetype. At most [`MAX_CUSTOM_SOURCETYPES`] may
    /// exist and ids below [`FIRST_CUSTOM_SOURCETYPE_ID`] are reserved.
    pub fn register_sourcetype(&mut self, sourcetype: Box<dyn SourceType>) -> Result<()> {
        if sourcetype.id() < FIRST_CUSTOM_SOURCETYPE_ID {
            return Err(FsError::InvalidSourcetype(format!(
                "id {} is reserved",
                sourcetype.id()
            )));
        }
        if self.custom_sourcetypes.len() >= MAX_CUSTOM_SOURCETYPES {
            return Err(FsError::InvalidSourcetype(
                "custom sourcetype registry is full".to_owned(),
            ));
        }
        if self
            .custom_sourcetypes
            .iter()
            .any(|existing| existing.id() == sourcetype.id())
        {
            return Err(FsError::InvalidSourcetype(format!(
                "id {} already registered",
                sourcetype.id()
            )));
        }
        self.custom_sourcetypes.push(sourcetype);
        Ok(())
    }

    fn custom_sourcetype(&self, id: u8) -> Option<&dyn SourceType> {
        self.custom_sourcetypes
            .iter()
            .find(|st| st.id() == id)
            .map(|st| st.as_ref())
    }

    /// Current refresh generation.
    pub fn refresh_count(&self) -> u32 {
        self.refresh_count
    }

    /// Begin a refresh cycle: bump the generation and clear per-refresh
    /// statistics. Follow with one `load_directory` call per source root.
    pub fn begin_refresh(&mut self) {
        self.refresh_count += 1;
        self.active_stats = FsStats::default();
        self.new_stats = FsStats::default();
    }

    /// Wipe everything back to the freshly-constructed state.
    pub fn reset(&mut self) {
        self.strings.reset();
        self.file_arena.reset();
        self.shader_arena.reset();
        self.crosshair_arena.reset();
        self.directory_arena.reset();
        self.pk3_hash_arena.reset();
        self.files.reset();
        self.directories.reset();
        self.shaders.reset();
        self.crosshairs.reset();
        self.pk3_hash_lookup.reset();
        self.refresh_count = 0;
        self.total_stats = FsStats::default();
        self.active_stats = FsStats::default();
        self.new_stats = FsStats::default();
        self.pure.clear();
        self.current_map_pk3 = ArenaPtr::NULL;
    }

    /// Resolve an interned string.
    pub fn string(&self, id: StringId) -> Result<&str> {
        self.strings.get(id)
    }

    pub fn file(&self, ptr: ArenaPtr<FileRecord>) -> Result<&FileRecord> {
        self.file_arena.get(ptr)
    }

    pub fn shader(&self, ptr: ArenaPtr<ShaderRecord>) -> Result<&ShaderRecord> {
        self.shader_arena.get(ptr)
    }

    pub fn crosshair(&self, ptr: ArenaPtr<CrosshairRecord>) -> Result<&CrosshairRecord> {
        self.crosshair_arena.get(ptr)
    }

    /// The direct file that physically backs a record: a pk3 member's owning
    /// archive, or the file itself. Custom-sourced files have no base file.
    pub fn base_file(&self, ptr: ArenaPtr<FileRecord>) -> Result<Option<ArenaPtr<FileRecord>>> {
        let record = self.file_arena.get(ptr)?;
        match &record.source {
            FileSource::Direct(_) => Ok(Some(ptr)),
            FileSource::Pk3Member(member) => Ok(Some(member.source_pk3)),
            FileSource::Custom(_) => Ok(None),
        }
    }

    /// Whether a record participates in lookups this generation.
    pub fn is_file_active(&self, ptr: ArenaPtr<FileRecord>) -> Result<bool> {
        let record = self.file_arena.get(ptr)?;
        match &record.source {
            FileSource::Direct(direct) => Ok(direct.refresh_count == self.refresh_count),
            FileSource::Pk3Member(member) => {
                let parent = self.file_arena.get(member.source_pk3)?;
                match &parent.source {
                    FileSource::Direct(direct) => {
                        Ok(direct.refresh_count == self.refresh_count)
                    }
                    // Invariant violation; treat as inactive rather than
                    // trusting a corrupt parent link.
                    _ => Ok(false),
                }
            }
            FileSource::Custom(id) => Ok(self
                .custom_sourcetype(*id)
                .map(|st| st.is_active(self, record))
                .unwrap_or(false)),
        }
    }

    /// True when the file came from a pk3 in a download directory.
    pub fn from_download_pk3(&self, ptr: ArenaPtr<FileRecord>) -> Result<bool> {
        match self.base_file(ptr)? {
            Some(base) => Ok(self
                .file_arena
                .get(base)?
                .flags
                .contains(crate::record::FileFlags::DOWNLOAD_PK3)),
            None => Ok(false),
        }
    }

    /// Owning mod directory name for precedence decisions.
    pub fn mod_dir(&self, ptr: ArenaPtr<FileRecord>) -> Result<String> {
        let record = self.file_arena.get(ptr)?;
        match &record.source {
            FileSource::Direct(direct) => Ok(self.strings.get(direct.qp_mod)?.to_owned()),
            FileSource::Pk3Member(member) => self.mod_dir(member.source_pk3),
            FileSource::Custom(id) => Ok(self
                .custom_sourcetype(*id)
                .map(|st| st.mod_dir(self, record))
                .unwrap_or_default()),
        }
    }

    /// Full qpath of a record.
    pub fn file_qpath(&self, ptr: ArenaPtr<FileRecord>) -> Result<String> {
        let record = self.file_arena.get(ptr)?;
        Ok(crate::qpath::join_qpath(
            self.strings.get(record.qp_dir)?,
            self.strings.get(record.qp_name)?,
            self.strings.get(record.qp_ext)?,
        ))
    }

    /// Debug formatting: qpath optionally prefixed with the mod directory
    /// and the owning pk3.
    pub fn file_to_string(
        &self,
        ptr: ArenaPtr<FileRecord>,
        include_mod: bool,
        include_pk3_origin: bool,
    ) -> Result<String> {
        let record = self.file_arena.get(ptr)?;
        let mut out = String::new();
        if include_mod {
            let mod_dir = self.mod_dir(ptr)?;
            if !mod_dir.is_empty() {
                out.push_str(&mod_dir);
                out.push('/');
            }
        }
        if include_pk3_origin {
            if let FileSource::Pk3Member(member) = &record.source {
                let pk3 = self.file_arena.get(member.source_pk3)?;
                out.push_str(self.strings.get(pk3.qp_name)?);
                out.push_str(self.strings.get(pk3.qp_ext)?);
                out.push_str("->");
            }
        }
        out.push_str(&self.file_qpath(ptr)?);
        Ok(out)
    }

    /// Extract a file's contents.
    pub fn read_file(&self, ptr: ArenaPtr<FileRecord>) -> Result<Vec<u8>> {
        let record = self.file_arena.get(ptr)?;
        match &record.source {
            FileSource::Direct(direct) => {
                let os_path = self.strings.get(direct.os_path)?;
                let data = std::fs::read(os_path)?;
                if data.len() != record.filesize as usize {
                    return Err(FsError::ShortExtract {
                        qpath: self.file_qpath(ptr)?,
                        got: data.len(),
                        expected: record.filesize as usize,
                    });
                }
                Ok(data)
            }
            FileSource::Pk3Member(member) => {
                let parent = self.file_arena.get(member.source_pk3)?;
                let direct = parent.direct().ok_or(FsError::InvalidOffset {
                    what: "pk3 parent",
                    offset: member.source_pk3.raw(),
                    len: self.file_arena.len(),
                })?;
                let os_path = self.strings.get(direct.os_path)?;
                let file = std::fs::File::open(os_path)?;
                let reader = Pk3EntryReader::open_raw(
                    file,
                    member.header_position,
                    Pk3Compression::from_method(member.compression_method),
                    member.compressed_size,
                    record.filesize,
                    EXTRACT_BUFFER_SIZE,
                )?;
                let data = reader.read_to_vec()?;
                if data.len() != record.filesize as usize {
                    return Err(FsError::ShortExtract {
                        qpath: self.file_qpath(ptr)?,
                        got: data.len(),
                        expected: record.filesize as usize,
                    });
                }
                Ok(data)
            }
            FileSource::Custom(id) => match self.custom_sourcetype(*id) {
                Some(st) => st.read_data(self, record),
                None => Err(FsError::InvalidSourcetype(format!(
                    "no sourcetype registered for id {}",
                    id
                ))),
            },
        }
    }

    /// Open a streaming reader over a pk3 member without buffering the whole
    /// file, for incremental consumers like audio codecs.
    pub fn open_pk3_member(
        &self,
        ptr: ArenaPtr<FileRecord>,
        input_buffer_size: usize,
    ) -> Result<Pk3EntryReader<std::fs::File>> {
        let record = self.file_arena.get(ptr)?;
        let member = record.pk3_member().ok_or(FsError::InvalidSourcetype(
            "open_pk3_member on a non-pk3-member file".to_owned(),
        ))?;
        let parent = self.file_arena.get(member.source_pk3)?;
        let direct = parent.direct().ok_or(FsError::InvalidOffset {
            what: "pk3 parent",
            offset: member.source_pk3.raw(),
            len: self.file_arena.len(),
        })?;
        let file = std::fs::File::open(self.strings.get(direct.os_path)?)?;
        Ok(Pk3EntryReader::open_raw(
            file,
            member.header_position,
            Pk3Compression::from_method(member.compression_method),
            member.compressed_size,
            record.filesize,
            input_buffer_size,
        )?)
    }

    /// Extract the byte range of one shader block.
    pub fn read_shader(&self, ptr: ArenaPtr<ShaderRecord>) -> Result<Vec<u8>> {
        let shader = self.shader_arena.get(ptr)?;
        let data = self.read_file(shader.source_file)?;
        let start = shader.start_position as usize;
        let end = shader.end_position as usize;
        if start > end || end > data.len() {
            return Err(FsError::CacheCorrupt(format!(
                "shader range {}..{} outside file of {} bytes",
                start,
                end,
                data.len()
            )));
        }
        Ok(data[start..end].to_vec())
    }

    /// Rough memory footprint, for info prints and cache sizing.
    pub fn memory_use_estimate(&self) -> u64 {
        use std::mem::size_of;
        self.strings.byte_size() as u64
            + self.file_arena.len() as u64 * size_of::<FileRecord>() as u64
            + self.shader_arena.len() as u64 * size_of::<ShaderRecord>() as u64
            + self.crosshair_arena.len() as u64 * size_of::<CrosshairRecord>() as u64
            + self.directory_arena.len() as u64 * size_of::<DirectoryRecord>() as u64
            + self.pk3_hash_arena.len() as u64 * size_of::<Pk3HashEntry>() as u64
    }

    // ----- connection state mutators -----

    /// Change the active mod directory used by precedence decisions.
    pub fn set_current_mod_dir(&mut self, mod_dir: Option<&str>) {
        self.current_mod_dir = mod_dir.map(str::to_owned);
    }

    /// Record the pk3 carrying the currently loaded map so lookups can
    /// prefer content bundled alongside it.
    pub fn register_current_map(&mut self, name: Option<&str>) -> Result<()> {
        self.current_map_pk3 = match name {
            None => ArenaPtr::NULL,
            Some(name) => {
                let qpath = format!("maps/{}.bsp", name);
                let flags = crate::lookup::LookupFlags::IGNORE_CURRENT_MAP
                    | crate::lookup::LookupFlags::IGNORE_PURE_LIST;
                match self.general_lookup(&qpath, flags, false)? {
                    Some(map_file) => self.base_file(map_file)?.unwrap_or(ArenaPtr::NULL),
                    None => ArenaPtr::NULL,
                }
            }
        };
        Ok(())
    }

    /// Connected-server pure state: positive = pure list in effect.
    pub fn set_connected_server_pure_state(&mut self, sv_pure: i32) {
        self.pure.connected_server_pure_state = sv_pure;
    }

    pub fn connected_server_pure_state(&self) -> i32 {
        self.pure.connected_server_pure_state
    }

    /// Install the server's approved pk3 list. `hash_list` is whitespace
    /// separated decimal hashes in server load order; `name_list` is the
    /// matching pk3 names, kept for diagnostics.
    pub fn set_pure_server_loaded_paks(&mut self, hash_list: &str, name_list: &str) {
        let hashes: Vec<u64> = hash_list
            .split_ascii_whitespace()
            .filter_map(|token| token.parse().ok())
            .collect();
        let names: Vec<String> = name_list
            .split_ascii_whitespace()
            .map(str::to_owned)
            .collect();
        tracing::info!(
            count = hashes.len(),
            "installing server pure list"
        );
        self.pure.set_loaded_paks(hashes, names);
    }

    /// Hashes from the last installed pure list, in server load order.
    pub fn pure_server_pak_hashes(&self) -> &[u64] {
        &self.pure.hashes
    }

    /// Pk3 names from the last installed pure list, for diagnostics.
    pub fn pure_server_pak_names(&self) -> &[String] {
        &self.pure.names
    }

    /// Drop all per-connection state (pure list, current map).
    pub fn disconnect_cleanup(&mut self) {
        self.pure.clear();
        self.current_map_pk3 = ArenaPtr::NULL;
    }

    /// Find an indexed pk3 by identity hash.
    pub fn pk3_by_hash(&self, hash: u64) -> Result<Option<ArenaPtr<FileRecord>>> {
        let mut iter = self.pk3_hash_lookup.iterate(crate::record::fold_hash(hash));
        while let Some(entry_ptr) = self.pk3_hash_lookup.next(&self.pk3_hash_arena, &mut iter)? {
            let entry = self.pk3_hash_arena.get(entry_ptr)?;
            let pk3 = self.file_arena.get(entry.pk3)?;
            if let Some(direct) = pk3.direct() {
                if direct.pk3_hash == hash {
                    return Ok(Some(entry.pk3));
                }
            }
        }
        Ok(None)
    }

    /// Find an active crosshair by image content hash. Several pk3s may ship
    /// the same image; any active copy satisfies the hash.
    pub fn crosshair_by_hash(&self, hash: u64) -> Result<Option<ArenaPtr<CrosshairRecord>>> {
        let mut iter = self.crosshairs.iterate(crate::record::fold_hash(hash));
        while let Some(entry_ptr) = self.crosshairs.next(&self.crosshair_arena, &mut iter)? {
            let entry = self.crosshair_arena.get(entry_ptr)?;
            if entry.content_hash == hash && self.is_file_active(entry.source_file)? {
                return Ok(Some(entry_ptr));
            }
        }
        Ok(None)
    }

    /// Read a direct file from disk into memory, used during content
    /// indexing where the record is not yet linked.
    pub(crate) fn read_os_file(&self, os_path: &Utf8Path) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        std::fs::File::open(os_path)?.read_to_end(&mut data)?;
        Ok(data)
    }
}

impl std::fmt::Debug for FsIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsIndex")
            .field("files", &self.file_arena.len())
            .field("shaders", &self.shader_arena.len())
            .field("crosshairs", &self.crosshair_arena.len())
            .field("directories", &self.directory_arena.len())
            .field("refresh_count", &self.refresh_count)
            .field("total_stats", &self.total_stats)
            .finish()
    }
}

//! Source directory scanning.
//!
//! A refresh walks each source root, registering every file found under a
//! mod directory. Pk3 archives get their central directory parsed and each
//! member registered as a child record; shader scripts and crosshair images
//! are content-indexed as they are discovered. Files already present in the
//! index are matched by OS path and reactivated without reparsing when their
//! size and timestamp are unchanged, which is what makes cached startups
//! fast.

use camino::Utf8Path;
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};
use walkdir::WalkDir;

use qfs_pk3::{CentralDirectory, Pk3Entry, Pk3EntryReader};

use crate::arena::ArenaPtr;
use crate::error::{ErrorCategory, FsError, Result};
use crate::index::FsIndex;
use crate::qpath::{
    fs_string_hash, qpath_eq, split_leading_directory, sanitize, QpathParts, MAX_QPATH,
};
use crate::record::{
    fold_hash, DirectSource, DirectoryRecord, FileFlags, FileRecord, FileSource, Pk3HashEntry,
    Pk3MemberSource, Pk3Tallies, ShaderRecord,
};
use crate::sanity::SanityLimit;
use crate::shader::parse_shader_blocks;

/// Buffer size for member reads during content indexing.
const SCAN_READ_BUFFER: usize = 32768;

/// Largest shader script or crosshair image the indexer will read back.
const MAX_CONTENT_FILE_SIZE: u32 = 16 << 20;

/// Directory holding crosshair images, relative to the mod root.
const CROSSHAIR_DIR: &str = "crosshairs/";

fn os_timestamp(metadata: &std::fs::Metadata) -> u32 {
    metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|duration| duration.as_secs() as u32)
        .unwrap_or(0)
}

fn has_extension(path: &str, ext: &str) -> bool {
    // Byte-wise suffix compare; a char-boundary slice would panic on
    // multibyte filenames.
    let (path, ext) = (path.as_bytes(), ext.as_bytes());
    path.len() > ext.len() && path[path.len() - ext.len()..].eq_ignore_ascii_case(ext)
}

/// Flags implied by the special second-level pk3 directories.
fn special_pk3_flags(component: &str) -> Option<FileFlags> {
    if component.eq_ignore_ascii_case("downloads") {
        Some(FileFlags::DOWNLOAD_PK3)
    } else if component.eq_ignore_ascii_case("refonly") {
        Some(FileFlags::REFONLY_PK3)
    } else if component.eq_ignore_ascii_case("nolist") {
        Some(FileFlags::NOLIST_PK3)
    } else {
        None
    }
}

impl FsIndex {
    /// Scan one source root and register everything found under it.
    ///
    /// Call between [`FsIndex::begin_refresh`] and using the index; files
    /// from earlier generations that are not re-found stay in the arenas but
    /// become inactive.
    pub fn load_directory(
        &mut self,
        source_dir_id: u8,
        root: &Utf8Path,
        sanity: &mut SanityLimit,
    ) -> Result<()> {
        std::fs::read_dir(root).map_err(|source| FsError::SourceDirUnreadable {
            path: root.to_owned(),
            source,
        })?;

        for entry in WalkDir::new(root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(
                        category = ErrorCategory::General.as_str(),
                        %root,
                        "skipping unreadable entry: {err}"
                    );
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(path) = Utf8Path::from_path(entry.path()) else {
                warn!(
                    category = ErrorCategory::General.as_str(),
                    path = %entry.path().display(),
                    "skipping non-utf8 path"
                );
                continue;
            };
            let Ok(rel) = path.strip_prefix(root) else {
                continue;
            };
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    warn!(
                        category = ErrorCategory::General.as_str(),
                        %path,
                        "skipping file with unreadable metadata: {err}"
                    );
                    continue;
                }
            };
            if let Err(err) = self.load_file(source_dir_id, path, rel, &metadata, sanity) {
                warn!(
                    category = ErrorCategory::General.as_str(),
                    %path,
                    "failed to index file: {err}"
                );
            }
        }
        Ok(())
    }

    fn load_file(
        &mut self,
        source_dir_id: u8,
        os_path: &Utf8Path,
        rel: &Utf8Path,
        metadata: &std::fs::Metadata,
        sanity: &mut SanityLimit,
    ) -> Result<()> {
        let rel_str = sanitize(rel.as_str());
        let (mod_dir, rest) = split_leading_directory(&rel_str);
        // Files directly in the source root belong to no mod and are skipped.
        if mod_dir.is_empty() || rest.is_empty() {
            return Ok(());
        }
        if metadata.len() > u32::MAX as u64 {
            warn!(
                category = ErrorCategory::General.as_str(),
                %os_path,
                "file exceeds 4GB limit"
            );
            return Ok(());
        }
        let filesize = metadata.len() as u32;
        let timestamp = os_timestamp(metadata);

        let (first, inner) = split_leading_directory(rest);

        // Contents of a mod/x.pk3dir/ directory behave like pk3 members but
        // live loose on disk.
        if has_extension(first, ".pk3dir") && !inner.is_empty() {
            return self.register_loose_file(
                source_dir_id,
                os_path,
                timestamp,
                filesize,
                mod_dir,
                first,
                inner,
                FileFlags::empty(),
                sanity,
            );
        }

        // Pk3s directly inside a special second-level directory.
        if let Some(flags) = special_pk3_flags(first) {
            if has_extension(inner, ".pk3") && !inner.contains('/') {
                return self.register_pk3(
                    source_dir_id,
                    os_path,
                    timestamp,
                    filesize,
                    mod_dir,
                    inner,
                    flags,
                    sanity,
                );
            }
        }

        if has_extension(rest, ".pk3") {
            return self.register_pk3(
                source_dir_id,
                os_path,
                timestamp,
                filesize,
                mod_dir,
                rest,
                FileFlags::empty(),
                sanity,
            );
        }

        self.register_loose_file(
            source_dir_id,
            os_path,
            timestamp,
            filesize,
            mod_dir,
            "",
            rest,
            FileFlags::empty(),
            sanity,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn register_loose_file(
        &mut self,
        source_dir_id: u8,
        os_path: &Utf8Path,
        timestamp: u32,
        filesize: u32,
        mod_dir: &str,
        pk3dir: &str,
        qpath: &str,
        flags: FileFlags,
        sanity: &mut SanityLimit,
    ) -> Result<()> {
        if qpath.len() > MAX_QPATH {
            warn!(
                category = ErrorCategory::General.as_str(),
                %os_path,
                "qpath exceeds {MAX_QPATH} bytes"
            );
            return Ok(());
        }
        let parts = QpathParts::split(qpath, false);
        let (ptr, reused) = self.register_direct(
            source_dir_id,
            os_path,
            timestamp,
            filesize,
            mod_dir,
            pk3dir,
            &parts,
            flags,
        )?;
        if reused {
            return Ok(());
        }

        // Content-index fresh shader scripts and crosshair images.
        let is_shader = qpath_eq(parts.dir(), "scripts/")
            && (qpath_eq(parts.ext(), ".shader") || qpath_eq(parts.ext(), ".mtr"));
        let is_crosshair = qpath_eq(parts.dir(), CROSSHAIR_DIR);
        if !is_shader && !is_crosshair {
            return Ok(());
        }
        if filesize > MAX_CONTENT_FILE_SIZE || !sanity.charge_read(filesize as u64) {
            return Ok(());
        }
        let data = match self.read_os_file(os_path) {
            Ok(data) => data,
            Err(err) => {
                warn!(
                    category = ErrorCategory::Extract.as_str(),
                    %os_path,
                    "content read failed: {err}"
                );
                return Ok(());
            }
        };
        if is_shader {
            self.index_shader_file(ptr, &data, sanity)?;
        } else {
            self.index_crosshair_file(ptr, &data, sanity)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn register_pk3(
        &mut self,
        source_dir_id: u8,
        os_path: &Utf8Path,
        timestamp: u32,
        filesize: u32,
        mod_dir: &str,
        qpath: &str,
        flags: FileFlags,
        sanity: &mut SanityLimit,
    ) -> Result<()> {
        if qpath.len() > MAX_QPATH {
            warn!(
                category = ErrorCategory::Pk3File.as_str(),
                %os_path,
                "pk3 qpath exceeds {MAX_QPATH} bytes"
            );
            return Ok(());
        }
        // Pk3s keep their extension in the name; ".pk3" is meaningful to the
        // indexer, not to lookups.
        let parts = QpathParts::split(qpath, true);
        let (ptr, reused) = self.register_direct(
            source_dir_id,
            os_path,
            timestamp,
            filesize,
            mod_dir,
            "",
            &parts,
            flags,
        )?;

        if reused {
            // Members and content records from the previous generation are
            // still linked; only the statistics need replaying.
            let record = self.file_arena.get(ptr)?;
            if let Some(direct) = record.direct() {
                if direct.pk3_hash != 0 {
                    let tallies = direct.tallies;
                    self.active_stats.valid_pk3_count += 1;
                    // Members ride along with their reactivated parent.
                    self.active_stats.total_file_count += tallies.pk3_subfile_count;
                    self.active_stats.cacheable_file_count += tallies.pk3_subfile_count;
                    self.add_tallies_active(&tallies);
                }
            }
            return Ok(());
        }

        self.index_pk3_contents(ptr, os_path, flags, sanity)
    }

    /// Register or reactivate a direct file. Returns the record and whether
    /// an unchanged existing record was reused.
    #[allow(clippy::too_many_arguments)]
    fn register_direct(
        &mut self,
        source_dir_id: u8,
        os_path: &Utf8Path,
        timestamp: u32,
        filesize: u32,
        mod_dir: &str,
        pk3dir: &str,
        parts: &QpathParts,
        flags: FileFlags,
    ) -> Result<(ArenaPtr<FileRecord>, bool)> {
        let hash = fs_string_hash(parts.name(), parts.ext());

        let mut existing = ArenaPtr::NULL;
        let mut iter = self.files.iterate(hash);
        while let Some(candidate) = self.files.next(&self.file_arena, &mut iter)? {
            let record = self.file_arena.get(candidate)?;
            if let Some(direct) = record.direct() {
                if self.strings.get(direct.os_path)? == os_path.as_str() {
                    existing = candidate;
                    if direct.os_timestamp == timestamp && record.filesize == filesize {
                        break;
                    }
                }
            }
        }
        if !existing.is_null() {
            let refresh_count = self.refresh_count;
            let record = self.file_arena.get_mut(existing)?;
            let unchanged = record.filesize == filesize
                && record
                    .direct()
                    .map(|d| d.os_timestamp == timestamp)
                    .unwrap_or(false);
            if unchanged {
                if let FileSource::Direct(direct) = &mut record.source {
                    direct.refresh_count = refresh_count;
                }
                self.active_stats.total_file_count += 1;
                self.active_stats.cacheable_file_count += 1;
                return Ok((existing, true));
            }
            // Changed on disk: the old record goes stale and a fresh one is
            // registered, so pk3 members pointing at the old record stay
            // inactive rather than referencing wrong offsets.
            debug!(%os_path, "file changed on disk, reindexing");
        }

        let qp_mod = self.strings.intern(mod_dir)?;
        let qp_pk3dir = self.strings.intern(pk3dir)?;
        let os_path_id = self.strings.intern(os_path.as_str())?;
        let source = FileSource::Direct(DirectSource {
            source_dir_id,
            os_path: os_path_id,
            os_timestamp: timestamp,
            qp_mod,
            pk3dir: qp_pk3dir,
            refresh_count: self.refresh_count,
            pk3_hash: 0,
            tallies: Pk3Tallies::default(),
        });
        let ptr = self.create_file_record(parts, filesize, flags, source)?;
        self.count_new_file(true);
        Ok((ptr, false))
    }

    /// Register a file supplied by a custom sourcetype. Custom files are
    /// always active per their sourcetype and never cached.
    pub fn register_custom_file(
        &mut self,
        sourcetype_id: u8,
        qpath: &str,
        filesize: u32,
    ) -> Result<ArenaPtr<FileRecord>> {
        if sourcetype_id < crate::index::FIRST_CUSTOM_SOURCETYPE_ID {
            return Err(FsError::InvalidSourcetype(format!(
                "id {} is reserved",
                sourcetype_id
            )));
        }
        let parts = QpathParts::split(qpath, false);
        let ptr = self.create_file_record(
            &parts,
            filesize,
            FileFlags::empty(),
            FileSource::Custom(sourcetype_id),
        )?;
        self.count_new_file(false);
        Ok(ptr)
    }

    fn index_pk3_contents(
        &mut self,
        pk3_ptr: ArenaPtr<FileRecord>,
        os_path: &Utf8Path,
        flags: FileFlags,
        sanity: &mut SanityLimit,
    ) -> Result<()> {
        let mut file = std::fs::File::open(os_path)?;
        let central_dir = match CentralDirectory::read(&mut file) {
            Ok(central_dir) => central_dir,
            Err(err) => {
                warn!(
                    category = ErrorCategory::Pk3File.as_str(),
                    %os_path,
                    "not a valid pk3: {err}"
                );
                return Ok(());
            }
        };

        let identity_hash = central_dir.identity_hash();
        if let FileSource::Direct(direct) = &mut self.file_arena.get_mut(pk3_ptr)?.source {
            direct.pk3_hash = identity_hash;
        }
        let hash_entry = self.pk3_hash_arena.alloc(Pk3HashEntry {
            next: ArenaPtr::NULL,
            pk3: pk3_ptr,
        })?;
        self.pk3_hash_lookup
            .insert(&mut self.pk3_hash_arena, hash_entry, fold_hash(identity_hash))?;

        self.total_stats.valid_pk3_count += 1;
        self.new_stats.valid_pk3_count += 1;
        self.active_stats.valid_pk3_count += 1;

        // Refonly pk3s exist for hash comparisons; their contents stay dark.
        if flags.contains(FileFlags::REFONLY_PK3) {
            self.file_arena.get_mut(pk3_ptr)?.flags |= FileFlags::LINKED_CONTENT;
            return Ok(());
        }

        sanity.enter_pk3(os_path.as_str());
        let mut tallies = Pk3Tallies::default();

        for entry in &central_dir.entries {
            if entry.is_directory() {
                continue;
            }
            if entry.encrypted || !entry.compression.is_supported() {
                debug!(%os_path, member = %entry.name, "skipping unextractable member");
                continue;
            }
            if entry.name.len() > MAX_QPATH {
                debug!(%os_path, "skipping member with oversized qpath");
                continue;
            }
            let parts = QpathParts::split(&entry.name, false);
            if parts.name().is_empty() && parts.ext().is_empty() {
                continue;
            }
            let member_hash = fs_string_hash(parts.name(), parts.ext());
            if !sanity.check_hash(member_hash) {
                continue;
            }
            let record_cost = std::mem::size_of::<FileRecord>() + entry.name.len();
            if !sanity.charge_index(record_cost as u64) {
                continue;
            }

            let member_ptr = self.create_file_record(
                &parts,
                entry.uncompressed_size,
                FileFlags::empty(),
                FileSource::Pk3Member(Pk3MemberSource {
                    source_pk3: pk3_ptr,
                    header_position: entry.local_header_offset,
                    compressed_size: entry.compressed_size,
                    compression_method: entry.compression.method(),
                }),
            )?;
            self.count_new_file(true);
            tallies.pk3_subfile_count += 1;
            self.total_stats.pk3_subfile_count += 1;
            self.new_stats.pk3_subfile_count += 1;
            self.active_stats.pk3_subfile_count += 1;

            let is_shader = qpath_eq(parts.dir(), "scripts/")
                && (qpath_eq(parts.ext(), ".shader") || qpath_eq(parts.ext(), ".mtr"));
            let is_crosshair = qpath_eq(parts.dir(), CROSSHAIR_DIR);
            if !is_shader && !is_crosshair {
                continue;
            }
            if entry.uncompressed_size > MAX_CONTENT_FILE_SIZE
                || !sanity.charge_read(entry.uncompressed_size as u64)
            {
                continue;
            }
            let data = match read_member(&mut file, entry) {
                Ok(data) => data,
                Err(err) => {
                    warn!(
                        category = ErrorCategory::Extract.as_str(),
                        %os_path,
                        member = %entry.name,
                        "member read failed: {err}"
                    );
                    continue;
                }
            };
            if is_shader {
                let shader_count = self.index_shader_file(member_ptr, &data, sanity)?;
                if shader_count > 0 {
                    tallies.shader_file_count += 1;
                    tallies.shader_count += shader_count;
                }
            } else {
                self.index_crosshair_file(member_ptr, &data, sanity)?;
            }
        }

        let record = self.file_arena.get_mut(pk3_ptr)?;
        record.flags |= FileFlags::LINKED_CONTENT;
        if let FileSource::Direct(direct) = &mut record.source {
            direct.tallies = tallies;
        }
        Ok(())
    }

    /// Parse shader blocks out of one script and register them. Returns the
    /// number of blocks indexed.
    fn index_shader_file(
        &mut self,
        file_ptr: ArenaPtr<FileRecord>,
        data: &[u8],
        sanity: &mut SanityLimit,
    ) -> Result<u32> {
        let (blocks, parse_error) = parse_shader_blocks(data);
        if let Some(err) = parse_error {
            // Blocks before the malformed one still register.
            let qpath = self.file_qpath(file_ptr)?;
            warn!(
                category = ErrorCategory::ShaderFile.as_str(),
                %qpath,
                salvaged = blocks.len(),
                "shader parse stopped early: {err}"
            );
        }
        let mut indexed = 0u32;
        for block in &blocks {
            let cost = std::mem::size_of::<ShaderRecord>() + block.name.len();
            if !sanity.charge_index(cost as u64) {
                break;
            }
            let hash = fs_string_hash(&block.name, "");
            if !sanity.check_hash(hash) {
                continue;
            }
            let shader_name = self.strings.intern(&block.name)?;
            let ptr = self.shader_arena.alloc(ShaderRecord {
                next: ArenaPtr::NULL,
                shader_name,
                source_file: file_ptr,
                start_position: block.start,
                end_position: block.end,
            })?;
            self.shaders.insert(&mut self.shader_arena, ptr, hash)?;
            indexed += 1;
        }
        if indexed > 0 {
            self.file_arena.get_mut(file_ptr)?.flags |= FileFlags::LINKED_CONTENT;
            self.total_stats.shader_file_count += 1;
            self.new_stats.shader_file_count += 1;
            self.active_stats.shader_file_count += 1;
            self.total_stats.shader_count += indexed;
            self.new_stats.shader_count += indexed;
            self.active_stats.shader_count += indexed;
        }
        Ok(indexed)
    }

    /// Hash a crosshair image and register it under its content hash, so the
    /// same image shipped by several pk3s resolves to one logical crosshair.
    fn index_crosshair_file(
        &mut self,
        file_ptr: ArenaPtr<FileRecord>,
        data: &[u8],
        sanity: &mut SanityLimit,
    ) -> Result<()> {
        let content_hash = xxhash_rust::xxh3::xxh3_64(data);
        if !sanity.check_hash(fold_hash(content_hash)) {
            return Ok(());
        }
        let cost = std::mem::size_of::<crate::record::CrosshairRecord>();
        if !sanity.charge_index(cost as u64) {
            return Ok(());
        }
        let ptr = self.crosshair_arena.alloc(crate::record::CrosshairRecord {
            next: ArenaPtr::NULL,
            content_hash,
            source_file: file_ptr,
        })?;
        self.crosshairs
            .insert(&mut self.crosshair_arena, ptr, fold_hash(content_hash))?;
        self.file_arena.get_mut(file_ptr)?.flags |= FileFlags::LINKED_CONTENT;
        Ok(())
    }

    /// Create a file record, insert it in the lookup table, and link it into
    /// the directory tree.
    fn create_file_record(
        &mut self,
        parts: &QpathParts,
        filesize: u32,
        flags: FileFlags,
        source: FileSource,
    ) -> Result<ArenaPtr<FileRecord>> {
        let qp_dir = self.strings.intern(parts.dir())?;
        let qp_name = self.strings.intern(parts.name())?;
        let qp_ext = self.strings.intern(parts.ext())?;
        let ptr = self.file_arena.alloc(FileRecord {
            next: ArenaPtr::NULL,
            next_in_directory: ArenaPtr::NULL,
            qp_dir,
            qp_name,
            qp_ext,
            filesize,
            flags,
            source,
        })?;
        self.files
            .insert(&mut self.file_arena, ptr, fs_string_hash(parts.name(), parts.ext()))?;
        self.link_file_into_directory(parts.dir(), ptr)?;
        Ok(ptr)
    }

    fn count_new_file(&mut self, cacheable: bool) {
        self.total_stats.total_file_count += 1;
        self.new_stats.total_file_count += 1;
        self.active_stats.total_file_count += 1;
        if cacheable {
            self.total_stats.cacheable_file_count += 1;
            self.new_stats.cacheable_file_count += 1;
            self.active_stats.cacheable_file_count += 1;
        }
    }

    fn add_tallies_active(&mut self, tallies: &Pk3Tallies) {
        self.active_stats.pk3_subfile_count += tallies.pk3_subfile_count;
        self.active_stats.shader_file_count += tallies.shader_file_count;
        self.active_stats.shader_count += tallies.shader_count;
    }

    pub(crate) fn find_directory(&self, dir: &str) -> Result<Option<ArenaPtr<DirectoryRecord>>> {
        let hash = fs_string_hash(dir, "");
        let mut iter = self.directories.iterate(hash);
        while let Some(ptr) = self.directories.next(&self.directory_arena, &mut iter)? {
            let record = self.directory_arena.get(ptr)?;
            if qpath_eq(self.strings.get(record.qp_dir)?, dir) {
                return Ok(Some(ptr));
            }
        }
        Ok(None)
    }

    /// Find or create the directory record for a qpath directory, creating
    /// missing parents up to the root.
    fn register_directory(&mut self, dir: &str) -> Result<ArenaPtr<DirectoryRecord>> {
        if let Some(ptr) = self.find_directory(dir)? {
            return Ok(ptr);
        }
        let parent = if dir.is_empty() {
            ArenaPtr::NULL
        } else {
            let trimmed = &dir[..dir.len() - 1];
            let parent_dir = match trimmed.rfind('/') {
                Some(pos) => &dir[..pos + 1],
                None => "",
            };
            self.register_directory(parent_dir)?
        };

        let qp_dir = self.strings.intern(dir)?;
        let ptr = self.directory_arena.alloc(DirectoryRecord {
            next: ArenaPtr::NULL,
            qp_dir,
            peer_directory: ArenaPtr::NULL,
            sub_file: ArenaPtr::NULL,
            sub_directory: ArenaPtr::NULL,
        })?;
        self.directories
            .insert(&mut self.directory_arena, ptr, fs_string_hash(dir, ""))?;

        if !parent.is_null() {
            let parent_record = self.directory_arena.get_mut(parent)?;
            let head = parent_record.sub_directory;
            parent_record.sub_directory = ptr;
            self.directory_arena.get_mut(ptr)?.peer_directory = head;
        }
        Ok(ptr)
    }

    fn link_file_into_directory(
        &mut self,
        dir: &str,
        file_ptr: ArenaPtr<FileRecord>,
    ) -> Result<()> {
        let dir_ptr = self.register_directory(dir)?;
        let dir_record = self.directory_arena.get_mut(dir_ptr)?;
        let head = dir_record.sub_file;
        dir_record.sub_file = file_ptr;
        self.file_arena.get_mut(file_ptr)?.next_in_directory = head;
        Ok(())
    }
}

fn read_member(file: &mut std::fs::File, entry: &Pk3Entry) -> qfs_pk3::Result<Vec<u8>> {
    Pk3EntryReader::open(file, entry, SCAN_READ_BUFFER)?.read_to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::FsIndex;
    use camino::Utf8PathBuf;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn write_pk3(path: &std::path::Path, members: &[(&str, &[u8])]) {
        let file = std::fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        for (name, data) in members {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    fn utf8(path: &std::path::Path) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(path.to_path_buf()).unwrap()
    }

    #[test]
    fn indexes_loose_files_and_pk3_members() {
        let root = tempfile::tempdir().unwrap();
        let base = root.path().join("baseq3");
        std::fs::create_dir_all(base.join("textures")).unwrap();
        std::fs::write(base.join("textures/wall.tga"), b"img").unwrap();
        write_pk3(
            &base.join("pak0.pk3"),
            &[
                ("sound/feedback/hit.wav", b"RIFF".as_slice()),
                ("scripts/common.shader", b"textures/a { }\ntextures/b { }\n"),
            ],
        );

        let mut fs = FsIndex::new("baseq3").unwrap();
        fs.begin_refresh();
        fs.load_directory(0, &utf8(root.path()), &mut SanityLimit::default())
            .unwrap();

        // 1 loose file + 1 pk3 + 2 members.
        assert_eq!(fs.total_stats.total_file_count, 4);
        assert_eq!(fs.total_stats.valid_pk3_count, 1);
        assert_eq!(fs.total_stats.pk3_subfile_count, 2);
        assert_eq!(fs.total_stats.shader_count, 2);
        assert_eq!(fs.total_stats.shader_file_count, 1);
    }

    #[test]
    fn unchanged_files_are_reactivated_not_duplicated() {
        let root = tempfile::tempdir().unwrap();
        let base = root.path().join("baseq3");
        std::fs::create_dir_all(&base).unwrap();
        write_pk3(&base.join("pak0.pk3"), &[("maps/q3dm17.bsp", b"BSP".as_slice())]);

        let mut fs = FsIndex::new("baseq3").unwrap();
        let mut sanity = SanityLimit::default();
        fs.begin_refresh();
        fs.load_directory(0, &utf8(root.path()), &mut sanity).unwrap();
        let total_after_first = fs.total_stats.total_file_count;

        fs.begin_refresh();
        fs.load_directory(0, &utf8(root.path()), &mut SanityLimit::default())
            .unwrap();

        assert_eq!(fs.total_stats.total_file_count, total_after_first);
        assert_eq!(fs.new_stats.total_file_count, 0);
        assert_eq!(fs.active_stats.valid_pk3_count, 1);
        assert_eq!(fs.active_stats.pk3_subfile_count, 1);
    }

    #[test]
    fn changed_pk3_goes_stale_and_is_reindexed() {
        let root = tempfile::tempdir().unwrap();
        let base = root.path().join("baseq3");
        std::fs::create_dir_all(&base).unwrap();
        let pk3_path = base.join("pak0.pk3");
        write_pk3(&pk3_path, &[("maps/old.bsp", b"OLD".as_slice())]);

        let mut fs = FsIndex::new("baseq3").unwrap();
        fs.begin_refresh();
        fs.load_directory(0, &utf8(root.path()), &mut SanityLimit::default())
            .unwrap();

        write_pk3(&pk3_path, &[("maps/new.bsp", b"NEWDATA".as_slice())]);
        // Force a timestamp difference; some filesystems have coarse mtimes.
        let new_time = std::time::SystemTime::now() + std::time::Duration::from_secs(10);
        let file = std::fs::File::options().append(true).open(&pk3_path).unwrap();
        file.set_modified(new_time).unwrap();
        drop(file);

        fs.begin_refresh();
        fs.load_directory(0, &utf8(root.path()), &mut SanityLimit::default())
            .unwrap();

        // Old pk3 record and its member are stale; new ones are active.
        let mut found_old = false;
        let mut found_new = false;
        for ptr in fs.file_arena.ptrs() {
            let record = fs.file_arena.get(ptr).unwrap();
            let name = fs.strings.get(record.qp_name).unwrap().to_owned();
            let active = fs.is_file_active(ptr).unwrap();
            match name.as_str() {
                "old" => {
                    found_old = true;
                    assert!(!active);
                }
                "new" => {
                    found_new = true;
                    assert!(active);
                }
                _ => {}
            }
        }
        assert!(found_old && found_new);
    }

    #[test]
    fn special_directories_set_pk3_flags() {
        let root = tempfile::tempdir().unwrap();
        let base = root.path().join("baseq3");
        std::fs::create_dir_all(base.join("downloads")).unwrap();
        std::fs::create_dir_all(base.join("refonly")).unwrap();
        write_pk3(
            &base.join("downloads/dl.pk3"),
            &[("maps/dl.bsp", b"BSP".as_slice())],
        );
        write_pk3(
            &base.join("refonly/ref.pk3"),
            &[("maps/ref.bsp", b"BSP".as_slice())],
        );

        let mut fs = FsIndex::new("baseq3").unwrap();
        fs.begin_refresh();
        fs.load_directory(0, &utf8(root.path()), &mut SanityLimit::default())
            .unwrap();

        let mut download_flagged = false;
        let mut refonly_members = 0;
        for ptr in fs.file_arena.ptrs() {
            let record = fs.file_arena.get(ptr).unwrap();
            let name = fs.strings.get(record.qp_name).unwrap();
            if name == "dl.pk3" {
                download_flagged = record.flags.contains(FileFlags::DOWNLOAD_PK3);
            }
            if name == "ref" {
                refonly_members += 1;
            }
        }
        assert!(download_flagged);
        // Refonly pk3s are hashed but their members are never indexed.
        assert_eq!(refonly_members, 0);
        assert_eq!(fs.total_stats.valid_pk3_count, 2);
        assert_eq!(fs.total_stats.pk3_subfile_count, 1);
    }

    #[test]
    fn pk3dir_contents_are_indexed_as_loose_members() {
        let root = tempfile::tempdir().unwrap();
        let base = root.path().join("baseq3");
        std::fs::create_dir_all(base.join("assets.pk3dir/textures")).unwrap();
        std::fs::write(base.join("assets.pk3dir/textures/wall.tga"), b"img").unwrap();

        let mut fs = FsIndex::new("baseq3").unwrap();
        fs.begin_refresh();
        fs.load_directory(0, &utf8(root.path()), &mut SanityLimit::default())
            .unwrap();

        let mut found = false;
        for ptr in fs.file_arena.ptrs() {
            let record = fs.file_arena.get(ptr).unwrap();
            if fs.strings.get(record.qp_name).unwrap() == "wall" {
                found = true;
                assert_eq!(fs.strings.get(record.qp_dir).unwrap(), "textures/");
                let direct = record.direct().unwrap();
                assert_eq!(fs.strings.get(direct.pk3dir).unwrap(), "assets.pk3dir");
            }
        }
        assert!(found);
    }

    #[test]
    fn multibyte_filenames_are_indexed_without_panicking() {
        let root = tempfile::tempdir().unwrap();
        let base = root.path().join("baseq3");
        std::fs::create_dir_all(&base).unwrap();
        // 7 bytes; a char-boundary suffix slice for ".pk3" lands inside
        // the multibyte character.
        std::fs::write(base.join("ab日cd"), b"data").unwrap();

        let mut fs = FsIndex::new("baseq3").unwrap();
        fs.begin_refresh();
        fs.load_directory(0, &utf8(root.path()), &mut SanityLimit::default())
            .unwrap();

        assert_eq!(fs.total_stats.total_file_count, 1);
        assert!(fs
            .general_lookup("ab日cd", crate::lookup::LookupFlags::empty(), false)
            .unwrap()
            .is_some());
    }

    #[test]
    fn partially_malformed_shader_scripts_keep_their_valid_blocks() {
        let root = tempfile::tempdir().unwrap();
        let base = root.path().join("baseq3");
        std::fs::create_dir_all(base.join("scripts")).unwrap();
        std::fs::write(
            base.join("scripts/bad.shader"),
            b"textures/good { map a.tga }\nbroken {\n map b.tga\n",
        )
        .unwrap();

        let mut fs = FsIndex::new("baseq3").unwrap();
        fs.begin_refresh();
        fs.load_directory(0, &utf8(root.path()), &mut SanityLimit::default())
            .unwrap();

        assert_eq!(fs.total_stats.shader_count, 1);
        assert!(fs
            .shader_lookup("textures/good", crate::lookup::LookupFlags::empty(), false)
            .unwrap()
            .is_some());
    }

    #[test]
    fn crosshair_lookup_resolves_active_content_hashes() {
        let root = tempfile::tempdir().unwrap();
        let base = root.path().join("baseq3");
        std::fs::create_dir_all(base.join("crosshairs")).unwrap();
        std::fs::write(base.join("crosshairs/dot.tga"), b"TGADATA").unwrap();

        let mut fs = FsIndex::new("baseq3").unwrap();
        fs.begin_refresh();
        fs.load_directory(0, &utf8(root.path()), &mut SanityLimit::default())
            .unwrap();

        let hash = xxhash_rust::xxh3::xxh3_64(b"TGADATA");
        let found = fs.crosshair_by_hash(hash).unwrap().unwrap();
        let record = fs.crosshair(found).unwrap();
        assert_eq!(record.content_hash, hash);
        assert!(fs.is_file_active(record.source_file).unwrap());
        assert!(fs.crosshair_by_hash(hash ^ 1).unwrap().is_none());

        // Once the image vanishes from disk the hash stops resolving.
        std::fs::remove_file(base.join("crosshairs/dot.tga")).unwrap();
        fs.begin_refresh();
        fs.load_directory(0, &utf8(root.path()), &mut SanityLimit::default())
            .unwrap();
        assert!(fs.crosshair_by_hash(hash).unwrap().is_none());
    }

    #[test]
    fn crosshair_images_are_indexed_by_content_hash() {
        let root = tempfile::tempdir().unwrap();
        let base = root.path().join("baseq3");
        std::fs::create_dir_all(base.join("crosshairs")).unwrap();
        std::fs::write(base.join("crosshairs/dot.tga"), b"TGADATA").unwrap();
        std::fs::create_dir_all(root.path().join("mymod/crosshairs")).unwrap();
        // Identical content under a different mod collapses to the same hash.
        std::fs::write(root.path().join("mymod/crosshairs/dot2.tga"), b"TGADATA").unwrap();

        let mut fs = FsIndex::new("baseq3").unwrap();
        fs.begin_refresh();
        fs.load_directory(0, &utf8(root.path()), &mut SanityLimit::default())
            .unwrap();

        assert_eq!(fs.crosshair_arena.len(), 2);
        let first = fs.crosshair_arena.get(ArenaPtr::from_raw(1)).unwrap();
        let second = fs.crosshair_arena.get(ArenaPtr::from_raw(2)).unwrap();
        assert_eq!(first.content_hash, second.content_hash);
    }
}

//! Active-file resolution.
//!
//! A lookup gathers every active record in the matching name bucket and
//! builds a composite sort key per candidate, written as a byte stream. The
//! candidate whose key compares lexicographically highest wins. The key
//! layout encodes, from highest to lowest precedence: pure-list position,
//! current-map affinity, per-category sourcetype ordering, special-pk3
//! classification, mod directory precedence, direct-vs-pk3 ordering with the
//! owning archive name, and finally the full sortable filename. Client and
//! server must resolve the same name to the same content hash or pure
//! validation fails, so the criterion order is a compatibility contract;
//! do not reorder it.

use bitflags::bitflags;
use tracing::debug;

use crate::arena::ArenaPtr;
use crate::error::Result;
use crate::index::FsIndex;
use crate::qpath::{fs_string_hash, qpath_eq, QpathParts};
use crate::record::{FileFlags, FileRecord, FileSource, ShaderRecord};

bitflags! {
    /// Modifiers accepted by every lookup operation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LookupFlags: u32 {
        /// Resolve as if no server pure list were in effect.
        const IGNORE_PURE_LIST = 1;
        /// Allow direct (non-pk3) files even while a pure list is active.
        const PURE_ALLOW_DIRECT_SOURCE = 2;
        /// Disable the current-map affinity criterion.
        const IGNORE_CURRENT_MAP = 4;
        /// Only direct-on-disk files may match.
        const DIRECT_SOURCE_ONLY = 8;
        /// Only pk3 members may match.
        const PK3_SOURCE_ONLY = 16;
        /// Exclude content sourced from download-folder pk3s.
        const NO_DOWNLOAD_FOLDER = 32;
        /// Consider `.dds` in image extension priority.
        const ENABLE_DDS = 64;
        /// Consider `.mtr` shader scripts, ranked above `.shader`.
        const ENABLE_MTR = 128;
    }
}

/// Lookup family, selecting the per-category pieces of the sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupCategory {
    General,
    Shader,
    Image,
    Sound,
    VmModule,
}

/// Image extensions in priority order; dds only participates with
/// [`LookupFlags::ENABLE_DDS`].
const IMAGE_EXT_PRIORITY: &[&str] = &[".dds", ".tga", ".jpg", ".jpeg", ".png", ".pcx", ".bmp"];

const SOUND_EXT_PRIORITY: &[&str] = &[".wav", ".ogg"];

/// Mod directory precedence ranks.
const MOD_RANK_CURRENT: u8 = 3;
const MOD_RANK_BASE: u8 = 2;
const MOD_RANK_OTHER: u8 = 1;
const MOD_RANK_NONE: u8 = 0;

fn push_sortable(key: &mut Vec<u8>, text: &str) {
    for &byte in text.as_bytes() {
        let folded = byte.to_ascii_lowercase();
        key.push(if folded == b'\\' { b'/' } else { folded });
    }
    key.push(0);
}

impl FsIndex {
    /// Resolve a general file by full qpath. `Ok(None)` means no active
    /// candidate passed the flag filters.
    pub fn general_lookup(
        &self,
        qpath: &str,
        flags: LookupFlags,
        debug_trace: bool,
    ) -> Result<Option<ArenaPtr<FileRecord>>> {
        let parts = QpathParts::split(qpath, false);
        self.resolve_file(
            parts.dir(),
            parts.name(),
            parts.ext(),
            LookupCategory::General,
            flags,
            debug_trace,
        )
    }

    /// Resolve an image, trying the requested extension first and then the
    /// standard priority list.
    pub fn image_lookup(
        &self,
        qpath: &str,
        flags: LookupFlags,
        debug_trace: bool,
    ) -> Result<Option<ArenaPtr<FileRecord>>> {
        let parts = QpathParts::split(qpath, false);
        if !parts.ext().is_empty() {
            if let Some(found) = self.resolve_file(
                parts.dir(),
                parts.name(),
                parts.ext(),
                LookupCategory::Image,
                flags,
                debug_trace,
            )? {
                return Ok(Some(found));
            }
        }
        for ext in IMAGE_EXT_PRIORITY {
            if qpath_eq(ext, ".dds") && !flags.contains(LookupFlags::ENABLE_DDS) {
                continue;
            }
            if qpath_eq(ext, parts.ext()) {
                continue;
            }
            if let Some(found) = self.resolve_file(
                parts.dir(),
                parts.name(),
                ext,
                LookupCategory::Image,
                flags,
                debug_trace,
            )? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Resolve a sound, preferring wav over ogg.
    pub fn sound_lookup(
        &self,
        qpath: &str,
        flags: LookupFlags,
        debug_trace: bool,
    ) -> Result<Option<ArenaPtr<FileRecord>>> {
        let parts = QpathParts::split(qpath, false);
        for ext in SOUND_EXT_PRIORITY {
            if let Some(found) = self.resolve_file(
                parts.dir(),
                parts.name(),
                ext,
                LookupCategory::Sound,
                flags,
                debug_trace,
            )? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Resolve an executable module. Pure servers never accept direct VM
    /// files, regardless of other flags.
    pub fn vm_lookup(
        &self,
        qpath: &str,
        flags: LookupFlags,
        debug_trace: bool,
    ) -> Result<Option<ArenaPtr<FileRecord>>> {
        let parts = QpathParts::split(qpath, false);
        self.resolve_file(
            parts.dir(),
            parts.name(),
            parts.ext(),
            LookupCategory::VmModule,
            flags,
            debug_trace,
        )
    }

    /// Resolve the active shader block for a shader name.
    pub fn shader_lookup(
        &self,
        name: &str,
        flags: LookupFlags,
        debug_trace: bool,
    ) -> Result<Option<ArenaPtr<ShaderRecord>>> {
        let hash = fs_string_hash(name, "");
        let mut best: Option<(Vec<u8>, ArenaPtr<ShaderRecord>)> = None;

        let mut iter = self.shaders.iterate(hash);
        while let Some(ptr) = self.shaders.next(&self.shader_arena, &mut iter)? {
            let shader = self.shader_arena.get(ptr)?;
            if !qpath_eq(self.strings.get(shader.shader_name)?, name) {
                continue;
            }
            let source_file = shader.source_file;
            if !self.is_file_active(source_file)? {
                continue;
            }
            let file = self.file_arena.get(source_file)?;
            let is_mtr = qpath_eq(self.strings.get(file.qp_ext)?, ".mtr");
            if is_mtr && !flags.contains(LookupFlags::ENABLE_MTR) {
                continue;
            }
            if !self.candidate_allowed(file, LookupCategory::Shader, flags)? {
                continue;
            }

            let mut key = Vec::with_capacity(64);
            // Mtr scripts outrank plain shader scripts when enabled.
            key.push(if is_mtr { 2 } else { 1 });
            self.write_sort_key(&mut key, source_file, file, LookupCategory::Shader, flags)?;
            // Earlier block in the same file wins.
            key.extend_from_slice(&(u32::MAX - shader.start_position).to_be_bytes());

            if debug_trace {
                debug!(
                    shader = name,
                    source = %self.file_to_string(source_file, true, true)?,
                    key = %hex_key(&key),
                    "shader lookup candidate"
                );
            }
            if best.as_ref().map(|(k, _)| key > *k).unwrap_or(true) {
                best = Some((key, ptr));
            }
        }
        Ok(best.map(|(_, ptr)| ptr))
    }

    /// Core resolver: one (dir, name, ext) triple, one category.
    pub(crate) fn resolve_file(
        &self,
        dir: &str,
        name: &str,
        ext: &str,
        category: LookupCategory,
        flags: LookupFlags,
        debug_trace: bool,
    ) -> Result<Option<ArenaPtr<FileRecord>>> {
        let hash = fs_string_hash(name, ext);
        let mut best: Option<(Vec<u8>, ArenaPtr<FileRecord>)> = None;

        let mut iter = self.files.iterate(hash);
        while let Some(ptr) = self.files.next(&self.file_arena, &mut iter)? {
            let record = self.file_arena.get(ptr)?;
            if !qpath_eq(self.strings.get(record.qp_name)?, name)
                || !qpath_eq(self.strings.get(record.qp_ext)?, ext)
                || !qpath_eq(self.strings.get(record.qp_dir)?, dir)
            {
                continue;
            }
            if !self.is_file_active(ptr)? {
                continue;
            }
            if !self.candidate_allowed(record, category, flags)? {
                continue;
            }

            let mut key = Vec::with_capacity(64);
            self.write_sort_key(&mut key, ptr, record, category, flags)?;
            if debug_trace {
                debug!(
                    candidate = %self.file_to_string(ptr, true, true)?,
                    key = %hex_key(&key),
                    "lookup candidate"
                );
            }
            if best.as_ref().map(|(k, _)| key > *k).unwrap_or(true) {
                best = Some((key, ptr));
            }
        }
        Ok(best.map(|(_, ptr)| ptr))
    }

    /// Flag-based exclusion filters, applied before key construction.
    fn candidate_allowed(
        &self,
        record: &FileRecord,
        category: LookupCategory,
        flags: LookupFlags,
    ) -> Result<bool> {
        match &record.source {
            FileSource::Direct(_) => {
                if flags.contains(LookupFlags::PK3_SOURCE_ONLY) {
                    return Ok(false);
                }
                // The download pk3 itself is a direct record carrying the
                // flag, not a member under one.
                if flags.contains(LookupFlags::NO_DOWNLOAD_FOLDER)
                    && record.flags.contains(FileFlags::DOWNLOAD_PK3)
                {
                    return Ok(false);
                }
            }
            FileSource::Pk3Member(member) => {
                if flags.contains(LookupFlags::DIRECT_SOURCE_ONLY) {
                    return Ok(false);
                }
                if flags.contains(LookupFlags::NO_DOWNLOAD_FOLDER) {
                    let parent = self.file_arena.get(member.source_pk3)?;
                    if parent.flags.contains(FileFlags::DOWNLOAD_PK3) {
                        return Ok(false);
                    }
                }
            }
            FileSource::Custom(_) => {
                if flags.contains(LookupFlags::PK3_SOURCE_ONLY)
                    || flags.contains(LookupFlags::DIRECT_SOURCE_ONLY)
                {
                    return Ok(false);
                }
            }
        }

        if self.pure.active() && !flags.contains(LookupFlags::IGNORE_PURE_LIST) {
            match &record.source {
                FileSource::Pk3Member(member) => {
                    let parent = self.file_arena.get(member.source_pk3)?;
                    let hash = parent.direct().map(|d| d.pk3_hash).unwrap_or(0);
                    if self.pure.position(hash).is_none() {
                        return Ok(false);
                    }
                }
                FileSource::Direct(_) | FileSource::Custom(_) => {
                    if category == LookupCategory::VmModule
                        || !flags.contains(LookupFlags::PURE_ALLOW_DIRECT_SOURCE)
                    {
                        return Ok(false);
                    }
                }
            }
        }
        Ok(true)
    }

    /// Append the composite sort key for one candidate. Higher bytes win.
    fn write_sort_key(
        &self,
        key: &mut Vec<u8>,
        ptr: ArenaPtr<FileRecord>,
        record: &FileRecord,
        category: LookupCategory,
        flags: LookupFlags,
    ) -> Result<()> {
        // 1. Pure-list position. Earlier list entries outrank later ones.
        let pure_rank = if self.pure.active() && !flags.contains(LookupFlags::IGNORE_PURE_LIST) {
            match &record.source {
                FileSource::Pk3Member(member) => {
                    let parent = self.file_arena.get(member.source_pk3)?;
                    let hash = parent.direct().map(|d| d.pk3_hash).unwrap_or(0);
                    self.pure
                        .position(hash)
                        .map(|pos| u32::MAX - pos)
                        .unwrap_or(0)
                }
                _ => 0,
            }
        } else {
            0
        };
        key.extend_from_slice(&pure_rank.to_be_bytes());

        // 2. Current-map affinity.
        let map_affinity = if !flags.contains(LookupFlags::IGNORE_CURRENT_MAP)
            && !self.current_map_pk3.is_null()
            && self.base_file(ptr)? == Some(self.current_map_pk3)
        {
            1u8
        } else {
            0
        };
        key.push(map_affinity);

        // 3. Sourcetype ordering per category. Sounds and VMs prefer pk3
        // content so loose files cannot shadow pure-verifiable copies.
        let sourcetype_rank = match category {
            LookupCategory::Sound | LookupCategory::VmModule => match &record.source {
                FileSource::Pk3Member(_) => 2u8,
                FileSource::Direct(_) => 1,
                FileSource::Custom(_) => 0,
            },
            _ => 0,
        };
        key.push(sourcetype_rank);

        // 4. Special-pk3 classification: normal content outranks content
        // from download/refonly/nolist pk3s.
        let special = match &record.source {
            FileSource::Pk3Member(member) => {
                let parent = self.file_arena.get(member.source_pk3)?;
                parent.flags.is_special_pk3()
            }
            _ => record.flags.is_special_pk3(),
        };
        key.push(if special { 0u8 } else { 1 });

        // 5. Mod directory precedence.
        let mod_dir = self.mod_dir(ptr)?;
        let mod_rank = if mod_dir.is_empty() {
            MOD_RANK_NONE
        } else if self
            .current_mod_dir
            .as_deref()
            .map(|current| qpath_eq(current, &mod_dir))
            .unwrap_or(false)
        {
            MOD_RANK_CURRENT
        } else if qpath_eq(&self.base_mod_dir, &mod_dir) {
            MOD_RANK_BASE
        } else {
            MOD_RANK_OTHER
        };
        key.push(mod_rank);

        // 6. Direct beats pk3; among archives, the lexicographically later
        // archive name wins (pak9 over pak0). Pk3dir contents rank with
        // direct files but carry their pk3dir name.
        match &record.source {
            FileSource::Direct(direct) => {
                key.push(2);
                push_sortable(key, self.strings.get(direct.pk3dir)?);
            }
            FileSource::Pk3Member(member) => {
                key.push(1);
                let parent = self.file_arena.get(member.source_pk3)?;
                push_sortable(key, self.strings.get(parent.qp_name)?);
            }
            FileSource::Custom(_) => {
                key.push(0);
                push_sortable(key, "");
            }
        }

        // 7. Deterministic tiebreak: sortable filename, then position inside
        // the archive, then the record handle itself.
        push_sortable(key, &self.file_qpath(ptr)?);
        let header_position = record
            .pk3_member()
            .map(|member| member.header_position)
            .unwrap_or(0);
        key.extend_from_slice(&header_position.to_be_bytes());
        key.extend_from_slice(&(u32::MAX - ptr.raw()).to_be_bytes());
        Ok(())
    }
}

fn hex_key(key: &[u8]) -> String {
    let mut out = String::with_capacity(key.len() * 2);
    for byte in key {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sanity::SanityLimit;
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

    /// Two pk3s both carrying sound/weapon.wav: one in the current mod, one
    /// in base.
    fn two_mod_index() -> (tempfile::TempDir, crate::index::FsIndex) {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("baseq3")).unwrap();
        std::fs::create_dir_all(root.path().join("mymod")).unwrap();
        write_pk3(
            &root.path().join("baseq3/pak_base.pk3"),
            &[("sound/weapon.wav", b"BASE".as_slice())],
        );
        write_pk3(
            &root.path().join("mymod/pak_mod.pk3"),
            &[("sound/weapon.wav", b"MOD".as_slice())],
        );

        let mut fs = crate::index::FsIndex::new("baseq3").unwrap();
        fs.set_current_mod_dir(Some("mymod"));
        fs.begin_refresh();
        fs.load_directory(0, &utf8(root.path()), &mut SanityLimit::default())
            .unwrap();
        (root, fs)
    }

    fn pk3_hash_by_name(fs: &crate::index::FsIndex, name: &str) -> u64 {
        for ptr in fs.file_arena.ptrs() {
            let record = fs.file_arena.get(ptr).unwrap();
            if fs.strings.get(record.qp_name).unwrap() == name {
                return record.direct().unwrap().pk3_hash;
            }
        }
        panic!("pk3 {name} not found");
    }

    #[test]
    fn current_mod_beats_base_mod() {
        let (_root, fs) = two_mod_index();
        let winner = fs
            .general_lookup("sound/weapon.wav", LookupFlags::empty(), false)
            .unwrap()
            .unwrap();
        assert_eq!(fs.read_file(winner).unwrap(), b"MOD");
    }

    #[test]
    fn pure_list_overrides_mod_precedence() {
        let (_root, mut fs) = two_mod_index();
        let base_hash = pk3_hash_by_name(&fs, "pak_base.pk3");
        fs.set_connected_server_pure_state(1);
        fs.set_pure_server_loaded_paks(&base_hash.to_string(), "pak_base");

        let winner = fs
            .general_lookup("sound/weapon.wav", LookupFlags::empty(), false)
            .unwrap()
            .unwrap();
        assert_eq!(fs.read_file(winner).unwrap(), b"BASE");

        // Ignoring the pure list restores mod precedence.
        let winner = fs
            .general_lookup("sound/weapon.wav", LookupFlags::IGNORE_PURE_LIST, false)
            .unwrap()
            .unwrap();
        assert_eq!(fs.read_file(winner).unwrap(), b"MOD");
    }

    #[test]
    fn pure_list_naming_nothing_relevant_yields_not_found() {
        let (_root, mut fs) = two_mod_index();
        fs.set_connected_server_pure_state(1);
        fs.set_pure_server_loaded_paks("12345", "unrelated");
        assert!(fs
            .general_lookup("sound/weapon.wav", LookupFlags::empty(), false)
            .unwrap()
            .is_none());
    }

    #[test]
    fn earlier_pure_list_position_wins() {
        let (_root, mut fs) = two_mod_index();
        let base_hash = pk3_hash_by_name(&fs, "pak_base.pk3");
        let mod_hash = pk3_hash_by_name(&fs, "pak_mod.pk3");
        fs.set_connected_server_pure_state(1);
        fs.set_pure_server_loaded_paks(
            &format!("{base_hash} {mod_hash}"),
            "pak_base pak_mod",
        );
        let winner = fs
            .general_lookup("sound/weapon.wav", LookupFlags::empty(), false)
            .unwrap()
            .unwrap();
        assert_eq!(fs.read_file(winner).unwrap(), b"BASE");
    }

    #[test]
    fn source_only_flags_filter_candidates() {
        let root = tempfile::tempdir().unwrap();
        let base = root.path().join("baseq3");
        std::fs::create_dir_all(base.join("maps")).unwrap();
        std::fs::write(base.join("maps/q3dm17.bsp"), b"LOOSE").unwrap();
        write_pk3(
            &base.join("pak0.pk3"),
            &[("maps/q3dm17.bsp", b"PACKED".as_slice())],
        );

        let mut fs = crate::index::FsIndex::new("baseq3").unwrap();
        fs.begin_refresh();
        fs.load_directory(0, &utf8(root.path()), &mut SanityLimit::default())
            .unwrap();

        let direct = fs
            .general_lookup("maps/q3dm17.bsp", LookupFlags::DIRECT_SOURCE_ONLY, false)
            .unwrap()
            .unwrap();
        assert_eq!(fs.read_file(direct).unwrap(), b"LOOSE");

        let packed = fs
            .general_lookup("maps/q3dm17.bsp", LookupFlags::PK3_SOURCE_ONLY, false)
            .unwrap()
            .unwrap();
        assert_eq!(fs.read_file(packed).unwrap(), b"PACKED");

        // Unconstrained, direct-on-disk wins within the same mod.
        let winner = fs
            .general_lookup("maps/q3dm17.bsp", LookupFlags::empty(), false)
            .unwrap()
            .unwrap();
        assert_eq!(fs.read_file(winner).unwrap(), b"LOOSE");
    }

    #[test]
    fn no_download_folder_excludes_download_sourced_records() {
        let root = tempfile::tempdir().unwrap();
        let base = root.path().join("baseq3");
        std::fs::create_dir_all(base.join("downloads")).unwrap();
        write_pk3(
            &base.join("downloads/dl.pk3"),
            &[("textures/dl.tga", b"DL".as_slice())],
        );

        let mut fs = crate::index::FsIndex::new("baseq3").unwrap();
        fs.begin_refresh();
        fs.load_directory(0, &utf8(root.path()), &mut SanityLimit::default())
            .unwrap();

        // Members are excluded through their parent's flag.
        assert!(fs
            .general_lookup("textures/dl.tga", LookupFlags::empty(), false)
            .unwrap()
            .is_some());
        assert!(fs
            .general_lookup("textures/dl.tga", LookupFlags::NO_DOWNLOAD_FOLDER, false)
            .unwrap()
            .is_none());

        // The archive itself is a direct record carrying the flag.
        assert!(fs
            .resolve_file(
                "",
                "dl.pk3",
                "",
                LookupCategory::General,
                LookupFlags::empty(),
                false
            )
            .unwrap()
            .is_some());
        assert!(fs
            .resolve_file(
                "",
                "dl.pk3",
                "",
                LookupCategory::General,
                LookupFlags::NO_DOWNLOAD_FOLDER,
                false
            )
            .unwrap()
            .is_none());
    }

    #[test]
    fn sound_lookup_prefers_wav_then_falls_back_to_ogg() {
        let root = tempfile::tempdir().unwrap();
        let base = root.path().join("baseq3");
        std::fs::create_dir_all(&base).unwrap();
        write_pk3(
            &base.join("pak0.pk3"),
            &[
                ("sound/feedback/hit.wav", b"WAV".as_slice()),
                ("sound/feedback/hit.ogg", b"OGG".as_slice()),
                ("sound/music/theme.ogg", b"THEME".as_slice()),
            ],
        );

        let mut fs = crate::index::FsIndex::new("baseq3").unwrap();
        fs.begin_refresh();
        fs.load_directory(0, &utf8(root.path()), &mut SanityLimit::default())
            .unwrap();

        let hit = fs
            .sound_lookup("sound/feedback/hit", LookupFlags::empty(), false)
            .unwrap()
            .unwrap();
        assert_eq!(fs.read_file(hit).unwrap(), b"WAV");

        let theme = fs
            .sound_lookup("sound/music/theme.wav", LookupFlags::empty(), false)
            .unwrap()
            .unwrap();
        assert_eq!(fs.read_file(theme).unwrap(), b"THEME");
    }

    #[test]
    fn image_lookup_follows_extension_priority() {
        let root = tempfile::tempdir().unwrap();
        let base = root.path().join("baseq3");
        std::fs::create_dir_all(&base).unwrap();
        write_pk3(
            &base.join("pak0.pk3"),
            &[
                ("textures/wall.png", b"PNG".as_slice()),
                ("textures/wall.tga", b"TGA".as_slice()),
                ("textures/wall.dds", b"DDS".as_slice()),
            ],
        );

        let mut fs = crate::index::FsIndex::new("baseq3").unwrap();
        fs.begin_refresh();
        fs.load_directory(0, &utf8(root.path()), &mut SanityLimit::default())
            .unwrap();

        let plain = fs
            .image_lookup("textures/wall", LookupFlags::empty(), false)
            .unwrap()
            .unwrap();
        assert_eq!(fs.read_file(plain).unwrap(), b"TGA");

        let dds = fs
            .image_lookup("textures/wall", LookupFlags::ENABLE_DDS, false)
            .unwrap()
            .unwrap();
        assert_eq!(fs.read_file(dds).unwrap(), b"DDS");

        // An explicit extension is tried first.
        let explicit = fs
            .image_lookup("textures/wall.png", LookupFlags::empty(), false)
            .unwrap()
            .unwrap();
        assert_eq!(fs.read_file(explicit).unwrap(), b"PNG");
    }

    #[test]
    fn shader_lookup_resolves_block_and_respects_mtr_flag() {
        let root = tempfile::tempdir().unwrap();
        let base = root.path().join("baseq3");
        std::fs::create_dir_all(&base).unwrap();
        write_pk3(
            &base.join("pak0.pk3"),
            &[
                (
                    "scripts/common.shader",
                    b"textures/wall { map a.tga }\n".as_slice(),
                ),
                (
                    "scripts/common.mtr",
                    b"textures/wall { map b.tga }\n".as_slice(),
                ),
            ],
        );

        let mut fs = crate::index::FsIndex::new("baseq3").unwrap();
        fs.begin_refresh();
        fs.load_directory(0, &utf8(root.path()), &mut SanityLimit::default())
            .unwrap();

        let plain = fs
            .shader_lookup("textures/wall", LookupFlags::empty(), false)
            .unwrap()
            .unwrap();
        let body = fs.read_shader(plain).unwrap();
        assert!(body.windows(5).any(|w| w == b"a.tga"));

        let mtr = fs
            .shader_lookup("textures/wall", LookupFlags::ENABLE_MTR, false)
            .unwrap()
            .unwrap();
        let body = fs.read_shader(mtr).unwrap();
        assert!(body.windows(5).any(|w| w == b"b.tga"));
    }

    #[test]
    fn resolution_is_deterministic() {
        let (_root, fs) = two_mod_index();
        let first = fs
            .general_lookup("sound/weapon.wav", LookupFlags::empty(), false)
            .unwrap();
        for _ in 0..16 {
            let again = fs
                .general_lookup("sound/weapon.wav", LookupFlags::empty(), false)
                .unwrap();
            assert_eq!(again, first);
        }
    }

    #[test]
    fn current_map_affinity_prefers_map_pk3() {
        let root = tempfile::tempdir().unwrap();
        let base = root.path().join("baseq3");
        std::fs::create_dir_all(&base).unwrap();
        // Both pk3s carry the texture; only one carries the map. The map pk3
        // sorts last alphabetically so affinity is what flips the result.
        write_pk3(
            &base.join("pak_a.pk3"),
            &[
                ("maps/arena.bsp", b"BSP".as_slice()),
                ("textures/arena/floor.tga", b"MAPPK3".as_slice()),
            ],
        );
        write_pk3(
            &base.join("pak_z.pk3"),
            &[("textures/arena/floor.tga", b"OTHER".as_slice())],
        );

        let mut fs = crate::index::FsIndex::new("baseq3").unwrap();
        fs.begin_refresh();
        fs.load_directory(0, &utf8(root.path()), &mut SanityLimit::default())
            .unwrap();

        let winner = fs
            .general_lookup("textures/arena/floor.tga", LookupFlags::empty(), false)
            .unwrap()
            .unwrap();
        assert_eq!(fs.read_file(winner).unwrap(), b"OTHER");

        fs.register_current_map(Some("arena")).unwrap();
        let winner = fs
            .general_lookup("textures/arena/floor.tga", LookupFlags::empty(), false)
            .unwrap()
            .unwrap();
        assert_eq!(fs.read_file(winner).unwrap(), b"MAPPK3");

        fs.register_current_map(None).unwrap();
        let winner = fs
            .general_lookup("textures/arena/floor.tga", LookupFlags::empty(), false)
            .unwrap()
            .unwrap();
        assert_eq!(fs.read_file(winner).unwrap(), b"OTHER");
    }
}

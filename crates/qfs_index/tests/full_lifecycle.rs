//! End-to-end lifecycle tests: scan, resolve, cache round trip, refresh
//! staleness, and adversarial archive handling.

use camino::Utf8PathBuf;
use std::io::Write;
use zip::write::SimpleFileOptions;

use qfs_index::{FsIndex, LookupFlags, SanityLimit};

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
fn scan_cache_reload_refresh_resolve() {
    let root = tempfile::tempdir().unwrap();
    let base = root.path().join("baseq3");
    std::fs::create_dir_all(base.join("maps")).unwrap();
    std::fs::write(base.join("maps/q3dm17.bsp"), b"LOOSEBSP").unwrap();
    write_pk3(
        &base.join("pak0.pk3"),
        &[
            ("sound/feedback/hit.wav", b"RIFF0".as_slice()),
            ("scripts/base.shader", b"textures/base/wall { map wall.tga }\n"),
            ("textures/base/wall.tga", b"TGA"),
        ],
    );

    let mut fs = FsIndex::new("baseq3").unwrap();
    fs.begin_refresh();
    fs.load_directory(0, &utf8(root.path()), &mut SanityLimit::default())
        .unwrap();

    let cache_path = root.path().join("fscache.bin");
    fs.export_cache_file(&utf8(&cache_path)).unwrap();

    // Cold start from the cache, then a refresh over the unchanged tree.
    let mut reloaded = FsIndex::import_cache_file(&utf8(&cache_path), "baseq3").unwrap();
    reloaded.begin_refresh();
    reloaded
        .load_directory(0, &utf8(root.path()), &mut SanityLimit::default())
        .unwrap();

    // Nothing was reparsed, everything resolves.
    assert_eq!(reloaded.new_stats.total_file_count, 0);
    let wav = reloaded
        .general_lookup("sound/feedback/hit.wav", LookupFlags::empty(), false)
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.read_file(wav).unwrap(), b"RIFF0");
    let shader = reloaded
        .shader_lookup("textures/base/wall", LookupFlags::empty(), false)
        .unwrap()
        .unwrap();
    let body = reloaded.read_shader(shader).unwrap();
    assert!(body.starts_with(b"textures/base/wall"));
    let map = reloaded
        .general_lookup("maps/q3dm17.bsp", LookupFlags::empty(), false)
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.read_file(map).unwrap(), b"LOOSEBSP");

    // The pk3 is findable by identity hash, and members stream back out.
    let pk3 = reloaded.base_file(wav).unwrap().unwrap();
    let hash = reloaded.file(pk3).unwrap().direct().unwrap().pk3_hash;
    assert_eq!(reloaded.pk3_by_hash(hash).unwrap(), Some(pk3));
    assert!(reloaded.pk3_by_hash(hash ^ 1).unwrap().is_none());

    let mut reader = reloaded.open_pk3_member(wav, 4096).unwrap();
    let mut streamed = Vec::new();
    std::io::Read::read_to_end(&mut reader, &mut streamed).unwrap();
    assert_eq!(streamed, b"RIFF0");
}

#[test]
fn files_missing_after_refresh_become_inactive() {
    let root = tempfile::tempdir().unwrap();
    let base = root.path().join("baseq3");
    std::fs::create_dir_all(base.join("cfg")).unwrap();
    std::fs::write(base.join("cfg/autoexec.cfg"), b"seta x 1\n").unwrap();

    let mut fs = FsIndex::new("baseq3").unwrap();
    fs.begin_refresh();
    fs.load_directory(0, &utf8(root.path()), &mut SanityLimit::default())
        .unwrap();
    assert!(fs
        .general_lookup("cfg/autoexec.cfg", LookupFlags::empty(), false)
        .unwrap()
        .is_some());

    std::fs::remove_file(base.join("cfg/autoexec.cfg")).unwrap();
    fs.begin_refresh();
    fs.load_directory(0, &utf8(root.path()), &mut SanityLimit::default())
        .unwrap();

    // The record still exists in the arena, but it is no longer active.
    assert!(fs
        .general_lookup("cfg/autoexec.cfg", LookupFlags::empty(), false)
        .unwrap()
        .is_none());
    assert_eq!(fs.active_stats.total_file_count, 0);
}

#[test]
fn adversarial_member_counts_hit_sanity_budgets_without_crashing() {
    let root = tempfile::tempdir().unwrap();
    let base = root.path().join("baseq3");
    std::fs::create_dir_all(&base).unwrap();

    // Many same-named members across directories share one name hash; the
    // per-hash cap stops them long before the full count registers.
    let names: Vec<String> = (0..300).map(|i| format!("dir{i}/same.dat")).collect();
    let members: Vec<(&str, &[u8])> = names
        .iter()
        .map(|name| (name.as_str(), b"x".as_slice()))
        .collect();
    write_pk3(&base.join("flood.pk3"), &members);

    let mut fs = FsIndex::new("baseq3").unwrap();
    fs.begin_refresh();
    fs.load_directory(0, &utf8(root.path()), &mut SanityLimit::default())
        .unwrap();
    assert_eq!(
        fs.total_stats.pk3_subfile_count,
        qfs_index::SANITY_MAX_PER_HASH_BUCKET as u32
    );

    // A near-zero memory budget rejects registrations entirely; the scan
    // still completes and the pk3 itself is indexed.
    let mut starved = FsIndex::new("baseq3").unwrap();
    starved.begin_refresh();
    starved
        .load_directory(0, &utf8(root.path()), &mut SanityLimit::new(16, 16))
        .unwrap();
    assert_eq!(starved.total_stats.valid_pk3_count, 1);
    assert_eq!(starved.total_stats.pk3_subfile_count, 0);
}

#[test]
fn custom_sourcetype_files_resolve_and_extract() {
    use qfs_index::{FileRecord, SourceType};

    struct MemorySource;

    impl SourceType for MemorySource {
        fn id(&self) -> u8 {
            3
        }
        fn is_active(&self, _fs: &FsIndex, _file: &FileRecord) -> bool {
            true
        }
        fn mod_dir(&self, _fs: &FsIndex, _file: &FileRecord) -> String {
            String::new()
        }
        fn read_data(&self, _fs: &FsIndex, _file: &FileRecord) -> qfs_index::Result<Vec<u8>> {
            Ok(b"seta sv_pure 1\n".to_vec())
        }
    }

    let mut fs = FsIndex::new("baseq3").unwrap();
    fs.register_sourcetype(Box::new(MemorySource)).unwrap();
    fs.begin_refresh();
    fs.register_custom_file(3, "builtin/default.cfg", 15).unwrap();

    let found = fs
        .general_lookup("builtin/default.cfg", LookupFlags::empty(), false)
        .unwrap()
        .unwrap();
    assert_eq!(fs.read_file(found).unwrap(), b"seta sv_pure 1\n");

    // Reserved ids are rejected in both registration paths.
    assert!(fs.register_custom_file(2, "x/y.cfg", 1).is_err());
    assert!(fs.register_sourcetype(Box::new(MemorySource)).is_err());
}

#[test]
fn resolution_is_stable_across_cache_round_trip() {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(root.path().join("baseq3")).unwrap();
    std::fs::create_dir_all(root.path().join("mymod")).unwrap();
    write_pk3(
        &root.path().join("baseq3/pak_base.pk3"),
        &[("gfx/logo.tga", b"BASE".as_slice())],
    );
    write_pk3(
        &root.path().join("mymod/zpak.pk3"),
        &[("gfx/logo.tga", b"MOD".as_slice())],
    );

    let mut fs = FsIndex::new("baseq3").unwrap();
    fs.set_current_mod_dir(Some("mymod"));
    fs.begin_refresh();
    fs.load_directory(0, &utf8(root.path()), &mut SanityLimit::default())
        .unwrap();
    let before = fs
        .general_lookup("gfx/logo.tga", LookupFlags::empty(), false)
        .unwrap()
        .unwrap();
    let before_data = fs.read_file(before).unwrap();

    let mut blob = Vec::new();
    fs.export_cache(&mut blob).unwrap();
    let mut restored = FsIndex::import_cache(&mut blob.as_slice(), "baseq3").unwrap();
    restored.set_current_mod_dir(Some("mymod"));
    restored.begin_refresh();
    restored
        .load_directory(0, &utf8(root.path()), &mut SanityLimit::default())
        .unwrap();

    let after = restored
        .general_lookup("gfx/logo.tga", LookupFlags::empty(), false)
        .unwrap()
        .unwrap();
    assert_eq!(restored.read_file(after).unwrap(), before_data);
    assert_eq!(before_data, b"MOD");
}

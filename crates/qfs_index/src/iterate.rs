//! Iteration cursors.
//!
//! Three cursor families share one pattern: open a cursor scoped to a single
//! bucket (one directory, one pk3 hash, one shader name) or to everything,
//! then step it with `advance`, which returns whether another record was
//! found. Cursors hold no borrow of the index; the index must simply not be
//! mutated while one is live, and restarting means re-opening. Cursors yield
//! stale records too; callers filter with [`FsIndex::is_file_active`] when
//! they only want the current generation.

use crate::arena::ArenaPtr;
use crate::error::Result;
use crate::hashtable::TableIter;
use crate::index::FsIndex;
use crate::qpath::{fs_string_hash, qpath_eq};
use crate::record::{
    fold_hash, DirectoryRecord, FileRecord, Pk3HashEntry, ShaderRecord,
};

/// Cursor over files in the directory tree.
#[derive(Debug)]
pub struct FileIterator {
    /// Next file in the current sibling chain.
    cursor: ArenaPtr<FileRecord>,
    /// Directories still to visit (depth-first when recursive).
    pending_dirs: Vec<ArenaPtr<DirectoryRecord>>,
    recursive: bool,
    current: ArenaPtr<FileRecord>,
}

impl FileIterator {
    /// Open a cursor over one directory's files. Returns `None` when the
    /// directory was never registered.
    pub fn open(fs: &FsIndex, dir: &str, recursive: bool) -> Result<Option<FileIterator>> {
        let Some(dir_ptr) = fs.find_directory(dir)? else {
            return Ok(None);
        };
        Ok(Some(FileIterator {
            cursor: ArenaPtr::NULL,
            pending_dirs: vec![dir_ptr],
            recursive,
            current: ArenaPtr::NULL,
        }))
    }

    /// Open a cursor over every registered file, swept directory by
    /// directory from the root.
    pub fn open_all(fs: &FsIndex) -> Result<FileIterator> {
        let root = fs.find_directory("")?;
        Ok(FileIterator {
            cursor: ArenaPtr::NULL,
            pending_dirs: root.into_iter().collect(),
            recursive: true,
            current: ArenaPtr::NULL,
        })
    }

    /// Step to the next file. Returns false at the end of the sequence.
    pub fn advance(&mut self, fs: &FsIndex) -> Result<bool> {
        loop {
            if !self.cursor.is_null() {
                self.current = self.cursor;
                self.cursor = fs.file_arena.get(self.cursor)?.next_in_directory;
                return Ok(true);
            }
            let Some(dir_ptr) = self.pending_dirs.pop() else {
                self.current = ArenaPtr::NULL;
                return Ok(false);
            };
            let dir = fs.directory_arena.get(dir_ptr)?;
            self.cursor = dir.sub_file;
            if self.recursive {
                let mut child = dir.sub_directory;
                while !child.is_null() {
                    self.pending_dirs.push(child);
                    child = fs.directory_arena.get(child)?.peer_directory;
                }
            }
        }
    }

    /// The record the last successful `advance` landed on.
    pub fn current(&self) -> ArenaPtr<FileRecord> {
        self.current
    }
}

/// Cursor over indexed pk3 archives.
#[derive(Debug)]
pub struct Pk3Iterator {
    iter: TableIter<Pk3HashEntry>,
    /// Hash filter for bucket-scoped cursors; bucket collisions are skipped.
    hash: Option<u64>,
    current: ArenaPtr<FileRecord>,
}

impl Pk3Iterator {
    /// Open a cursor over pk3s carrying one identity hash.
    pub fn open(fs: &FsIndex, hash: u64) -> Pk3Iterator {
        Pk3Iterator {
            iter: fs.pk3_hash_lookup.iterate(fold_hash(hash)),
            hash: Some(hash),
            current: ArenaPtr::NULL,
        }
    }

    /// Open a cursor over every indexed pk3.
    pub fn open_all(fs: &FsIndex) -> Pk3Iterator {
        Pk3Iterator {
            iter: fs.pk3_hash_lookup.iterate_all(),
            hash: None,
            current: ArenaPtr::NULL,
        }
    }

    pub fn advance(&mut self, fs: &FsIndex) -> Result<bool> {
        while let Some(entry_ptr) = fs
            .pk3_hash_lookup
            .next(&fs.pk3_hash_arena, &mut self.iter)?
        {
            let entry = fs.pk3_hash_arena.get(entry_ptr)?;
            if let Some(want) = self.hash {
                let pk3 = fs.file_arena.get(entry.pk3)?;
                let found = pk3.direct().map(|d| d.pk3_hash).unwrap_or(0);
                if found != want {
                    continue;
                }
            }
            self.current = entry.pk3;
            return Ok(true);
        }
        self.current = ArenaPtr::NULL;
        Ok(false)
    }

    /// The pk3 file record the cursor is on.
    pub fn current(&self) -> ArenaPtr<FileRecord> {
        self.current
    }
}

/// Cursor over shader records.
#[derive(Debug)]
pub struct ShaderIterator {
    iter: TableIter<ShaderRecord>,
    name: Option<String>,
    current: ArenaPtr<ShaderRecord>,
}

impl ShaderIterator {
    /// Open a cursor over every indexed block with the given shader name.
    pub fn open(fs: &FsIndex, name: &str) -> ShaderIterator {
        ShaderIterator {
            iter: fs.shaders.iterate(fs_string_hash(name, "")),
            name: Some(name.to_owned()),
            current: ArenaPtr::NULL,
        }
    }

    /// Open a cursor over every indexed shader block.
    pub fn open_all(fs: &FsIndex) -> ShaderIterator {
        ShaderIterator {
            iter: fs.shaders.iterate_all(),
            name: None,
            current: ArenaPtr::NULL,
        }
    }

    pub fn advance(&mut self, fs: &FsIndex) -> Result<bool> {
        while let Some(ptr) = fs.shaders.next(&fs.shader_arena, &mut self.iter)? {
            if let Some(name) = &self.name {
                let shader = fs.shader_arena.get(ptr)?;
                if !qpath_eq(fs.strings.get(shader.shader_name)?, name) {
                    continue;
                }
            }
            self.current = ptr;
            return Ok(true);
        }
        self.current = ArenaPtr::NULL;
        Ok(false)
    }

    pub fn current(&self) -> ArenaPtr<ShaderRecord> {
        self.current
    }
}

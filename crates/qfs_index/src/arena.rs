//! Arena storage for index records.
//!
//! Every record in the index lives in a typed arena and is referenced by a
//! relative offset ([`ArenaPtr`]), never by native address. Offset 0 is the
//! null sentinel. Allocations are never individually freed; the arena only
//! grows or is reset wholesale, matching the "whole index is rebuilt or
//! reloaded" lifecycle. Because records reference each other purely through
//! offsets, the arenas can be flattened to a byte stream and reloaded with
//! every offset still valid.
//!
//! Bounds checking is centralized in [`Arena::get`] / [`Arena::get_mut`]:
//! an out-of-range offset is reported as index corruption rather than
//! silently producing garbage.

use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use std::io::{Read, Write};
use std::marker::PhantomData;

use crate::error::{FsError, Result};

/// Records that can be flattened into the binary cache.
///
/// Implementations must write a fixed, self-describing encoding; the cache
/// version tag is bumped whenever any of them changes.
pub trait CacheRecord: Sized {
    fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()>;
    fn read_from<R: Read>(reader: &mut R) -> std::io::Result<Self>;
}

/// Relative offset of a record inside its arena. 0 is the null sentinel;
/// live records are 1-based.
pub struct ArenaPtr<T> {
    raw: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ArenaPtr<T> {
    pub const NULL: ArenaPtr<T> = ArenaPtr {
        raw: 0,
        _marker: PhantomData,
    };

    pub fn from_raw(raw: u32) -> Self {
        ArenaPtr {
            raw,
            _marker: PhantomData,
        }
    }

    pub fn raw(self) -> u32 {
        self.raw
    }

    pub fn is_null(self) -> bool {
        self.raw == 0
    }
}

// Manual impls: derive would bound them on T.
impl<T> Clone for ArenaPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for ArenaPtr<T> {}
impl<T> PartialEq for ArenaPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}
impl<T> Eq for ArenaPtr<T> {}
impl<T> std::fmt::Debug for ArenaPtr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ArenaPtr({})", self.raw)
    }
}
impl<T> Default for ArenaPtr<T> {
    fn default() -> Self {
        Self::NULL
    }
}

/// Growable typed arena with offset-based access.
#[derive(Debug)]
pub struct Arena<T> {
    items: Vec<T>,
    what: &'static str,
}

/// Hard cap on entries per arena. A single refresh can never legitimately
/// produce this many records; hitting it indicates a runaway scan.
const MAX_ARENA_ENTRIES: u32 = 1 << 24;

impl<T> Arena<T> {
    pub fn new(what: &'static str) -> Self {
        Arena {
            items: Vec::new(),
            what,
        }
    }

    /// Store a record and return its offset.
    pub fn alloc(&mut self, value: T) -> Result<ArenaPtr<T>> {
        if self.items.len() as u32 >= MAX_ARENA_ENTRIES {
            return Err(FsError::ArenaFull { what: self.what });
        }
        self.items.push(value);
        Ok(ArenaPtr::from_raw(self.items.len() as u32))
    }

    /// Resolve an offset to a record reference.
    pub fn get(&self, ptr: ArenaPtr<T>) -> Result<&T> {
        if ptr.is_null() {
            return Err(FsError::NullOffset { what: self.what });
        }
        self.items
            .get(ptr.raw() as usize - 1)
            .ok_or(FsError::InvalidOffset {
                what: self.what,
                offset: ptr.raw(),
                len: self.items.len() as u32,
            })
    }

    /// Resolve an offset that may legitimately be null.
    pub fn get_opt(&self, ptr: ArenaPtr<T>) -> Result<Option<&T>> {
        if ptr.is_null() {
            return Ok(None);
        }
        self.get(ptr).map(Some)
    }

    pub fn get_mut(&mut self, ptr: ArenaPtr<T>) -> Result<&mut T> {
        if ptr.is_null() {
            return Err(FsError::NullOffset { what: self.what });
        }
        let len = self.items.len() as u32;
        self.items
            .get_mut(ptr.raw() as usize - 1)
            .ok_or(FsError::InvalidOffset {
                what: self.what,
                offset: ptr.raw(),
                len,
            })
    }

    /// True when the offset resolves to a live record.
    pub fn contains(&self, ptr: ArenaPtr<T>) -> bool {
        !ptr.is_null() && ptr.raw() as usize <= self.items.len()
    }

    pub fn len(&self) -> u32 {
        self.items.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Offsets of all live records, in allocation order.
    pub fn ptrs(&self) -> impl Iterator<Item = ArenaPtr<T>> {
        (1..=self.items.len() as u32).map(ArenaPtr::from_raw)
    }

    /// Release everything. Outstanding offsets become invalid.
    pub fn reset(&mut self) {
        self.items.clear();
    }
}

impl<T: CacheRecord> Arena<T> {
    pub fn export<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u32::<LE>(self.items.len() as u32)?;
        for item in &self.items {
            item.write_to(writer)?;
        }
        Ok(())
    }

    pub fn import<R: Read>(&mut self, reader: &mut R) -> Result<()> {
        let count = reader.read_u32::<LE>()?;
        if count > MAX_ARENA_ENTRIES {
            return Err(FsError::CacheCorrupt(format!(
                "{} arena claims {} entries",
                self.what, count
            )));
        }
        self.items.clear();
        self.items.reserve(count.min(1 << 16) as usize);
        for _ in 0..count {
            self.items.push(T::read_from(reader)?);
        }
        Ok(())
    }
}

/// Interned string id: byte offset into the [`StringPile`]. Offset 0 is the
/// empty string, which doubles as the "absent" value for optional fields
/// like extensions and pk3dir names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StringId(pub(crate) u32);

impl StringId {
    pub const EMPTY: StringId = StringId(0);

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Byte arena holding every interned string exactly once.
///
/// Strings are stored NUL-terminated; ids are byte offsets, stable across
/// export/import. Deduplication lives in [`crate::strings::StringRepo`].
#[derive(Debug)]
pub struct StringPile {
    data: Vec<u8>,
}

const MAX_PILE_SIZE: usize = 1 << 28;

impl StringPile {
    pub fn new() -> Self {
        // Offset 0 is the empty string.
        StringPile { data: vec![0] }
    }

    /// Copy a string into the pile. No deduplication at this level.
    pub fn alloc(&mut self, text: &str) -> Result<StringId> {
        if text.is_empty() {
            return Ok(StringId::EMPTY);
        }
        if self.data.len() + text.len() + 1 > MAX_PILE_SIZE {
            return Err(FsError::ArenaFull { what: "string pile" });
        }
        let offset = self.data.len() as u32;
        self.data.extend_from_slice(text.as_bytes());
        self.data.push(0);
        Ok(StringId(offset))
    }

    /// Resolve an id to its string.
    pub fn get(&self, id: StringId) -> Result<&str> {
        let start = id.0 as usize;
        if start >= self.data.len() {
            return Err(FsError::InvalidString { offset: id.0 });
        }
        let tail = &self.data[start..];
        let end = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or(FsError::InvalidString { offset: id.0 })?;
        std::str::from_utf8(&tail[..end]).map_err(|_| FsError::InvalidString { offset: id.0 })
    }

    /// True when the id points at a plausible string start. Used by cache
    /// validation; `get` still performs the full check.
    pub fn contains(&self, id: StringId) -> bool {
        (id.0 as usize) < self.data.len()
    }

    pub fn byte_size(&self) -> usize {
        self.data.len()
    }

    pub fn reset(&mut self) {
        self.data.clear();
        self.data.push(0);
    }

    pub fn export<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u32::<LE>(self.data.len() as u32)?;
        writer.write_all(&self.data)?;
        Ok(())
    }

    pub fn import<R: Read>(&mut self, reader: &mut R) -> Result<()> {
        let size = reader.read_u32::<LE>()? as usize;
        if size == 0 || size > MAX_PILE_SIZE {
            return Err(FsError::CacheCorrupt(format!(
                "string pile claims {} bytes",
                size
            )));
        }
        let mut data = vec![0u8; size];
        reader.read_exact(&mut data)?;
        if data[0] != 0 || *data.last().unwrap_or(&1) != 0 {
            return Err(FsError::CacheCorrupt(
                "string pile not NUL-framed".to_owned(),
            ));
        }
        self.data = data;
        Ok(())
    }
}

impl Default for StringPile {
    fn default() -> Self {
        Self::new()
    }
}

//! String repository.
//!
//! Qpath components recur across thousands of records (the same directory
//! and extension strings appear in every pk3), so the index stores each
//! distinct string once. The repository is a hash table over the string
//! pile: interning returns the existing id when the hashed text matches an
//! entry byte-for-byte, and copies the text otherwise.

use std::io::{Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt, LE};

use crate::arena::{Arena, ArenaPtr, CacheRecord, StringId, StringPile};
use crate::error::Result;
use crate::hashtable::{HashNode, HashTable};
use crate::qpath::fs_string_hash;

const STRING_TABLE_BUCKETS: usize = 4096;

#[derive(Debug)]
pub(crate) struct StringEntry {
    next: ArenaPtr<StringEntry>,
    id: StringId,
}

impl HashNode for StringEntry {
    fn next(&self) -> ArenaPtr<Self> {
        self.next
    }
    fn set_next(&mut self, next: ArenaPtr<Self>) {
        self.next = next;
    }
}

impl CacheRecord for StringEntry {
    fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u32::<LE>(self.next.raw())?;
        writer.write_u32::<LE>(self.id.raw())
    }
    fn read_from<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        Ok(StringEntry {
            next: ArenaPtr::from_raw(reader.read_u32::<LE>()?),
            id: StringId(reader.read_u32::<LE>()?),
        })
    }
}

#[derive(Debug)]
pub struct StringRepo {
    pile: StringPile,
    entries: Arena<StringEntry>,
    table: HashTable<StringEntry>,
}

impl StringRepo {
    pub fn new() -> Result<Self> {
        Ok(StringRepo {
            pile: StringPile::new(),
            entries: Arena::new("string entry"),
            table: HashTable::new(STRING_TABLE_BUCKETS)?,
        })
    }

    /// Intern a string, returning the id of the single stored copy.
    ///
    /// The lookup hash is case-folded (shared with qpath hashing) but
    /// equality is exact, so differently-cased strings intern separately
    /// while still landing in the same bucket.
    pub fn intern(&mut self, text: &str) -> Result<StringId> {
        if text.is_empty() {
            return Ok(StringId::EMPTY);
        }

        let hash = fs_string_hash(text, "");
        let mut iter = self.table.iterate(hash);
        while let Some(ptr) = self.table.next(&self.entries, &mut iter)? {
            let id = self.entries.get(ptr)?.id;
            if self.pile.get(id)? == text {
                return Ok(id);
            }
        }

        let id = self.pile.alloc(text)?;
        let ptr = self.entries.alloc(StringEntry {
            next: ArenaPtr::NULL,
            id,
        })?;
        self.table.insert(&mut self.entries, ptr, hash)?;
        Ok(id)
    }

    /// Resolve an interned id.
    pub fn get(&self, id: StringId) -> Result<&str> {
        self.pile.get(id)
    }

    /// True when the id points inside the pile. Used by cache validation.
    pub fn contains(&self, id: StringId) -> bool {
        self.pile.contains(id)
    }

    pub fn byte_size(&self) -> usize {
        self.pile.byte_size()
    }

    pub fn reset(&mut self) {
        self.pile.reset();
        self.entries.reset();
        self.table.reset();
    }

    pub fn export<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        self.pile.export(writer)?;
        self.entries.export(writer)?;
        self.table.export(writer)
    }

    pub fn import<R: Read>(&mut self, reader: &mut R) -> Result<()> {
        self.pile.import(reader)?;
        self.entries.import(reader)?;
        self.table.import(&self.entries, reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut repo = StringRepo::new().unwrap();
        let a = repo.intern("textures/base/").unwrap();
        let b = repo.intern("textures/base/").unwrap();
        assert_eq!(a, b);
        assert_eq!(repo.get(a).unwrap(), "textures/base/");
    }

    #[test]
    fn distinct_strings_get_distinct_ids() {
        let mut repo = StringRepo::new().unwrap();
        let a = repo.intern(".wav").unwrap();
        let b = repo.intern(".ogg").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn case_differs_interns_separately() {
        // Same bucket (case-folded hash), different stored strings.
        let mut repo = StringRepo::new().unwrap();
        let lower = repo.intern("maps/").unwrap();
        let upper = repo.intern("MAPS/").unwrap();
        assert_ne!(lower, upper);
        assert_eq!(repo.get(upper).unwrap(), "MAPS/");
    }

    #[test]
    fn empty_string_is_the_sentinel() {
        let mut repo = StringRepo::new().unwrap();
        let id = repo.intern("").unwrap();
        assert!(id.is_empty());
        assert_eq!(repo.get(id).unwrap(), "");
    }

    #[test]
    fn survives_export_import() {
        let mut repo = StringRepo::new().unwrap();
        let ids: Vec<_> = ["sound/", "hit", ".wav", "baseq3"]
            .iter()
            .map(|s| repo.intern(s).unwrap())
            .collect();

        let mut blob = Vec::new();
        repo.export(&mut blob).unwrap();
        let mut restored = StringRepo::new().unwrap();
        restored.import(&mut blob.as_slice()).unwrap();

        for (text, id) in ["sound/", "hit", ".wav", "baseq3"].iter().zip(&ids) {
            assert_eq!(restored.get(*id).unwrap(), *text);
        }
        // Interning after import still deduplicates against imported data.
        assert_eq!(restored.intern("hit").unwrap(), ids[1]);
    }
}

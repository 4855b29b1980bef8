//! Open hash table whose entries live in an [`Arena`].
//!
//! Buckets hold the head offset of a singly linked list threaded through the
//! records themselves (the `next` link every [`HashNode`] embeds). Insertion
//! prepends, so within a bucket the newest entry is found first; the
//! resolver's tie-breaking relies on that ordering. Entries are never
//! removed; staleness is handled by generation stamps, not deletion.

use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use std::io::{Read, Write};

use crate::arena::{Arena, ArenaPtr};
use crate::error::{FsError, Result};

/// Largest bucket count the hashing scheme can index without overflow.
pub const MAX_BUCKETS: usize = 10 << 20;

/// Records that can be chained into a hash table bucket.
pub trait HashNode: Sized {
    fn next(&self) -> ArenaPtr<Self>;
    fn set_next(&mut self, next: ArenaPtr<Self>);
}

/// Hash table keyed by a 32-bit content hash, bucket lists in the arena.
#[derive(Debug)]
pub struct HashTable<T> {
    buckets: Vec<ArenaPtr<T>>,
    utilization: u32,
}

impl<T: HashNode> HashTable<T> {
    pub fn new(bucket_count: usize) -> Result<Self> {
        if bucket_count == 0 || bucket_count > MAX_BUCKETS {
            return Err(FsError::BucketCountTooLarge(bucket_count));
        }
        Ok(HashTable {
            buckets: vec![ArenaPtr::NULL; bucket_count],
            utilization: 0,
        })
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Number of entries inserted since creation or import.
    pub fn utilization(&self) -> u32 {
        self.utilization
    }

    fn bucket_index(&self, hash: u32) -> usize {
        (hash as usize) % self.buckets.len()
    }

    /// Prepend an already-allocated record to its hash bucket.
    pub fn insert(&mut self, arena: &mut Arena<T>, ptr: ArenaPtr<T>, hash: u32) -> Result<()> {
        let index = self.bucket_index(hash);
        let head = self.buckets[index];
        arena.get_mut(ptr)?.set_next(head);
        self.buckets[index] = ptr;
        self.utilization += 1;
        Ok(())
    }

    /// Begin iteration over the bucket matching `hash`.
    pub fn iterate(&self, hash: u32) -> TableIter<T> {
        TableIter {
            current: self.buckets[self.bucket_index(hash)],
            next_bucket: None,
        }
    }

    /// Begin iteration over every bucket in order.
    pub fn iterate_all(&self) -> TableIter<T> {
        TableIter {
            current: ArenaPtr::NULL,
            next_bucket: Some(0),
        }
    }

    /// Advance an iterator, returning the next entry offset.
    ///
    /// The table and arena must not be mutated while a cursor is live;
    /// sequences are restartable only by re-opening.
    pub fn next(&self, arena: &Arena<T>, iter: &mut TableIter<T>) -> Result<Option<ArenaPtr<T>>> {
        loop {
            if !iter.current.is_null() {
                let ptr = iter.current;
                iter.current = arena.get(ptr)?.next();
                return Ok(Some(ptr));
            }
            match iter.next_bucket {
                Some(bucket) if bucket < self.buckets.len() => {
                    iter.current = self.buckets[bucket];
                    iter.next_bucket = Some(bucket + 1);
                }
                _ => return Ok(None),
            }
        }
    }

    pub fn reset(&mut self) {
        for bucket in &mut self.buckets {
            *bucket = ArenaPtr::NULL;
        }
        self.utilization = 0;
    }

    pub fn export<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u32::<LE>(self.buckets.len() as u32)?;
        writer.write_u32::<LE>(self.utilization)?;
        for bucket in &self.buckets {
            writer.write_u32::<LE>(bucket.raw())?;
        }
        Ok(())
    }

    /// Reload bucket heads, validating each against the arena that now holds
    /// the imported entries.
    pub fn import<R: Read>(&mut self, arena: &Arena<T>, reader: &mut R) -> Result<()> {
        let bucket_count = reader.read_u32::<LE>()? as usize;
        if bucket_count == 0 || bucket_count > MAX_BUCKETS {
            return Err(FsError::CacheCorrupt(format!(
                "hash table claims {} buckets",
                bucket_count
            )));
        }
        let utilization = reader.read_u32::<LE>()?;
        let mut buckets = Vec::with_capacity(bucket_count);
        for _ in 0..bucket_count {
            let ptr = ArenaPtr::from_raw(reader.read_u32::<LE>()?);
            if !ptr.is_null() && !arena.contains(ptr) {
                return Err(FsError::CacheCorrupt(format!(
                    "bucket head {} out of range",
                    ptr.raw()
                )));
            }
            buckets.push(ptr);
        }
        self.buckets = buckets;
        self.utilization = utilization;
        Ok(())
    }
}

/// Cursor over one bucket or the whole table. Holds no borrow of the table,
/// matching the restart-by-reopen contract: callers pass the table and arena
/// to each `next` call.
#[derive(Debug)]
pub struct TableIter<T> {
    current: ArenaPtr<T>,
    /// `None` for single-bucket iteration, `Some(next)` in iterate-all mode.
    next_bucket: Option<usize>,
}

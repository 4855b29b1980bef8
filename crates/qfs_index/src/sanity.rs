//! Sanity limits for a single scan.
//!
//! A crafted or corrupt pk3 can claim absurd resource counts in its central
//! directory. Rather than trusting those numbers, every resource accepted
//! during a scan is charged against budgets held by one `SanityLimit`, and
//! a fixed-size per-hash counter array caps how many same-hash resources a
//! suspicious archive may contribute. When a budget runs out, further data
//! from that category is dropped with a single warning per archive; the
//! scan itself always completes.

use tracing::warn;

use crate::error::ErrorCategory;

pub const SANITY_HASH_BUCKETS: usize = 32768;
pub const SANITY_MAX_PER_HASH_BUCKET: u8 = 128;

/// Default budget for index record memory contributed by one scan.
pub const DEFAULT_INDEX_MEMORY: u64 = 64 << 20;
/// Default budget for bytes read back out of archives during content
/// indexing (shader parsing, crosshair hashing).
pub const DEFAULT_DATA_READ: u64 = 256 << 20;

#[derive(Debug)]
pub struct SanityLimit {
    index_memory: u64,
    data_read: u64,
    hash_buckets: Box<[u8; SANITY_HASH_BUCKETS]>,
    /// Archive currently being indexed, for warning attribution.
    current_pk3: Option<String>,
    warned: bool,
}

impl SanityLimit {
    pub fn new(index_memory: u64, data_read: u64) -> Self {
        SanityLimit {
            index_memory,
            data_read,
            hash_buckets: Box::new([0; SANITY_HASH_BUCKETS]),
            current_pk3: None,
            warned: false,
        }
    }

    /// Point warnings at the archive being indexed. Resets the once-per-pk3
    /// warning latch.
    pub fn enter_pk3(&mut self, name: &str) {
        self.current_pk3 = Some(name.to_owned());
        self.warned = false;
    }

    /// Charge `size` bytes of index memory. False means the budget is
    /// exhausted and the resource must be dropped.
    pub fn charge_index(&mut self, size: u64) -> bool {
        if size > self.index_memory {
            self.warn_once("index memory budget exhausted");
            return false;
        }
        self.index_memory -= size;
        true
    }

    /// Charge `size` bytes of content read budget.
    pub fn charge_read(&mut self, size: u64) -> bool {
        if size > self.data_read {
            self.warn_once("data read budget exhausted");
            return false;
        }
        self.data_read -= size;
        true
    }

    /// Count one resource against its hash bucket. False once an archive has
    /// contributed too many same-hash resources.
    pub fn check_hash(&mut self, hash: u32) -> bool {
        let bucket = &mut self.hash_buckets[hash as usize % SANITY_HASH_BUCKETS];
        if *bucket >= SANITY_MAX_PER_HASH_BUCKET {
            self.warn_once("per-hash resource cap reached");
            return false;
        }
        *bucket += 1;
        true
    }

    fn warn_once(&mut self, reason: &str) {
        if !self.warned {
            warn!(
                category = ErrorCategory::Pk3File.as_str(),
                pk3 = self.current_pk3.as_deref().unwrap_or("<none>"),
                "{reason}; dropping further resources from this source"
            );
            self.warned = true;
        }
    }
}

impl Default for SanityLimit {
    fn default() -> Self {
        SanityLimit::new(DEFAULT_INDEX_MEMORY, DEFAULT_DATA_READ)
    }
}

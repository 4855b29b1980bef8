//! Central directory parsing.
//!
//! A zip archive ends with an end-of-central-directory (EOCD) record, which
//! may be followed by a variable-length comment. The EOCD is located by
//! scanning backward from the end of the file for its signature, then the
//! central directory itself is read in one block so the raw bytes are
//! available for the identity hash.

use byteorder::{ReadBytesExt, LE};
use std::io::{Cursor, Read, Seek, SeekFrom};
use tracing::trace;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{Pk3Error, Result};

const EOCD_SIGNATURE: u32 = 0x0605_4b50;
const CENTRAL_HEADER_SIGNATURE: u32 = 0x0201_4b50;

/// Fixed portion of the EOCD record, excluding the trailing comment.
const EOCD_FIXED_SIZE: u64 = 22;

/// Maximum zip comment length, per the format (u16 length field).
const MAX_COMMENT_SIZE: u64 = 0xffff;

/// Fixed portion of a central directory file header.
const CENTRAL_HEADER_FIXED_SIZE: usize = 46;

/// Compression method of a pk3 member.
///
/// Only stored and deflate are supported for extraction; anything else is
/// preserved as `Other` so the indexer can skip the entry with a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pk3Compression {
    Stored,
    Deflate,
    Other(u16),
}

impl Pk3Compression {
    pub fn from_method(method: u16) -> Self {
        match method {
            0 => Pk3Compression::Stored,
            8 => Pk3Compression::Deflate,
            other => Pk3Compression::Other(other),
        }
    }

    pub fn method(self) -> u16 {
        match self {
            Pk3Compression::Stored => 0,
            Pk3Compression::Deflate => 8,
            Pk3Compression::Other(other) => other,
        }
    }

    pub fn is_supported(self) -> bool {
        !matches!(self, Pk3Compression::Other(_))
    }
}

/// One member of a pk3 archive, as described by its central directory header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pk3Entry {
    /// Member name as stored in the archive. Forward slashes, no leading slash
    /// by convention; nothing is normalized here.
    pub name: String,
    pub compression: Pk3Compression,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    /// Offset of the member's local header from the start of the archive.
    pub local_header_offset: u32,
    /// Set when the general-purpose flag marks the entry as encrypted.
    pub encrypted: bool,
}

impl Pk3Entry {
    /// Directory placeholders carry no data and are never indexed.
    pub fn is_directory(&self) -> bool {
        self.name.ends_with('/')
    }
}

/// Parsed central directory of a pk3 archive.
#[derive(Debug)]
pub struct CentralDirectory {
    pub entries: Vec<Pk3Entry>,
    /// Raw central directory bytes, kept for the identity hash.
    raw_bytes: Vec<u8>,
}

impl CentralDirectory {
    /// Locate and parse the central directory of an archive.
    ///
    /// Structural problems (missing EOCD, bad signatures, out-of-bounds
    /// directory) fail the whole archive; the caller treats that as a
    /// content error and skips the pk3.
    pub fn read<R: Read + Seek>(source: &mut R) -> Result<Self> {
        let file_size = source.seek(SeekFrom::End(0))?;
        let (eocd_offset, tail) = find_eocd(source, file_size)?;

        let mut eocd = Cursor::new(&tail[..]);
        let _signature = eocd.read_u32::<LE>()?;
        let disk_number = eocd.read_u16::<LE>()?;
        let cd_start_disk = eocd.read_u16::<LE>()?;
        let _entries_on_disk = eocd.read_u16::<LE>()?;
        let total_entries = eocd.read_u16::<LE>()?;
        let cd_size = eocd.read_u32::<LE>()? as u64;
        let cd_offset = eocd.read_u32::<LE>()? as u64;

        if disk_number != 0 || cd_start_disk != 0 {
            return Err(Pk3Error::MultiDisk);
        }
        if cd_offset.checked_add(cd_size).map_or(true, |end| end > eocd_offset) {
            return Err(Pk3Error::CentralDirectoryBounds {
                offset: cd_offset,
                size: cd_size,
                file_size,
            });
        }

        let mut raw_bytes = vec![0u8; cd_size as usize];
        source.seek(SeekFrom::Start(cd_offset))?;
        source.read_exact(&mut raw_bytes)?;

        let entries = parse_entries(&raw_bytes, total_entries as usize)?;
        trace!(
            entries = entries.len(),
            cd_size,
            "central directory parsed"
        );

        Ok(CentralDirectory { entries, raw_bytes })
    }

    /// Identity hash of the archive: a checksum over the raw central
    /// directory bytes, not the member contents. Renaming the archive or
    /// touching timestamps outside the central directory does not change it.
    pub fn identity_hash(&self) -> u64 {
        xxh3_64(&self.raw_bytes)
    }

    /// Size in bytes of the raw central directory.
    pub fn raw_size(&self) -> usize {
        self.raw_bytes.len()
    }
}

/// Scan backward from the end of the file for the EOCD signature.
///
/// Returns the offset of the record and its fixed 22-byte portion.
fn find_eocd<R: Read + Seek>(source: &mut R, file_size: u64) -> Result<(u64, Vec<u8>)> {
    if file_size < EOCD_FIXED_SIZE {
        return Err(Pk3Error::EocdNotFound);
    }

    let scan_size = (EOCD_FIXED_SIZE + MAX_COMMENT_SIZE).min(file_size);
    let scan_start = file_size - scan_size;
    let mut tail = vec![0u8; scan_size as usize];
    source.seek(SeekFrom::Start(scan_start))?;
    source.read_exact(&mut tail)?;

    let signature = EOCD_SIGNATURE.to_le_bytes();
    let last_candidate = tail.len() - EOCD_FIXED_SIZE as usize;
    for pos in (0..=last_candidate).rev() {
        if tail[pos..pos + 4] == signature {
            let offset = scan_start + pos as u64;
            return Ok((offset, tail[pos..pos + EOCD_FIXED_SIZE as usize].to_vec()));
        }
    }

    Err(Pk3Error::EocdNotFound)
}

fn parse_entries(raw: &[u8], claimed: usize) -> Result<Vec<Pk3Entry>> {
    let mut cursor = Cursor::new(raw);
    let mut entries = Vec::with_capacity(claimed.min(raw.len() / CENTRAL_HEADER_FIXED_SIZE));

    for index in 0..claimed {
        let header_start = cursor.position();
        if raw.len() as u64 - header_start < CENTRAL_HEADER_FIXED_SIZE as u64 {
            return Err(Pk3Error::TruncatedCentralDirectory {
                parsed: entries.len(),
                claimed,
            });
        }

        let signature = cursor.read_u32::<LE>()?;
        if signature != CENTRAL_HEADER_SIGNATURE {
            return Err(Pk3Error::BadSignature {
                structure: "central directory header",
                found: signature,
                offset: header_start,
            });
        }

        let _version_made_by = cursor.read_u16::<LE>()?;
        let _version_needed = cursor.read_u16::<LE>()?;
        let flags = cursor.read_u16::<LE>()?;
        let method = cursor.read_u16::<LE>()?;
        let _mod_time = cursor.read_u16::<LE>()?;
        let _mod_date = cursor.read_u16::<LE>()?;
        let _crc32 = cursor.read_u32::<LE>()?;
        let compressed_size = cursor.read_u32::<LE>()?;
        let uncompressed_size = cursor.read_u32::<LE>()?;
        let name_len = cursor.read_u16::<LE>()? as usize;
        let extra_len = cursor.read_u16::<LE>()? as usize;
        let comment_len = cursor.read_u16::<LE>()? as usize;
        let _disk_start = cursor.read_u16::<LE>()?;
        let _internal_attrs = cursor.read_u16::<LE>()?;
        let _external_attrs = cursor.read_u32::<LE>()?;
        let local_header_offset = cursor.read_u32::<LE>()?;

        let name_start = cursor.position() as usize;
        let variable_len = name_len + extra_len + comment_len;
        if name_start + variable_len > raw.len() {
            return Err(Pk3Error::TruncatedCentralDirectory {
                parsed: entries.len(),
                claimed,
            });
        }

        let name = std::str::from_utf8(&raw[name_start..name_start + name_len])
            .map_err(|_| Pk3Error::InvalidEntryName { index })?
            .to_owned();
        cursor.set_position((name_start + variable_len) as u64);

        entries.push(Pk3Entry {
            name,
            compression: Pk3Compression::from_method(method),
            compressed_size,
            uncompressed_size,
            local_header_offset,
            encrypted: flags & 0x1 != 0,
        });
    }

    Ok(entries)
}

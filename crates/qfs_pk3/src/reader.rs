//! Streaming extraction of individual pk3 members.

use byteorder::{ReadBytesExt, LE};
use flate2::bufread::DeflateDecoder;
use std::io::{BufReader, Read, Seek, SeekFrom, Take};

use crate::central_dir::{Pk3Compression, Pk3Entry};
use crate::error::{Pk3Error, Result};

const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4b50;

/// Fixed portion of a local file header.
const LOCAL_HEADER_FIXED_SIZE: u64 = 30;

/// Incremental reader for one pk3 member.
///
/// Wraps the archive source in a bounded, buffered reader and decompresses
/// on demand. A read of 0 bytes indicates the end of the member data; the
/// reader never yields more than the declared uncompressed size even if the
/// compressed stream would produce more.
#[derive(Debug)]
pub struct Pk3EntryReader<R: Read + Seek> {
    inner: Inner<R>,
    remaining: u64,
}

#[derive(Debug)]
enum Inner<R: Read + Seek> {
    Stored(BufReader<Take<R>>),
    Deflate(DeflateDecoder<BufReader<Take<R>>>),
}

impl<R: Read + Seek> Pk3EntryReader<R> {
    /// Open a member described by a central directory entry.
    ///
    /// `input_buffer_size` sizes the read buffer over the compressed stream;
    /// small values keep memory low for sequential config reads, larger ones
    /// help bulk extraction.
    pub fn open(source: R, entry: &Pk3Entry, input_buffer_size: usize) -> Result<Self> {
        if entry.encrypted {
            return Err(Pk3Error::Encrypted);
        }
        Self::open_raw(
            source,
            entry.local_header_offset,
            entry.compression,
            entry.compressed_size,
            entry.uncompressed_size,
            input_buffer_size,
        )
    }

    /// Open a member from raw central-directory fields.
    ///
    /// Used by the filesystem index, which stores these fields in its own
    /// records rather than keeping [`Pk3Entry`] values alive.
    pub fn open_raw(
        mut source: R,
        local_header_offset: u32,
        compression: Pk3Compression,
        compressed_size: u32,
        uncompressed_size: u32,
        input_buffer_size: usize,
    ) -> Result<Self> {
        if let Pk3Compression::Other(method) = compression {
            return Err(Pk3Error::UnsupportedMethod(method));
        }

        source.seek(SeekFrom::Start(local_header_offset as u64))?;
        let signature = source.read_u32::<LE>()?;
        if signature != LOCAL_HEADER_SIGNATURE {
            return Err(Pk3Error::BadSignature {
                structure: "local file header",
                found: signature,
                offset: local_header_offset as u64,
            });
        }

        let _version_needed = source.read_u16::<LE>()?;
        let flags = source.read_u16::<LE>()?;
        if flags & 0x1 != 0 {
            return Err(Pk3Error::Encrypted);
        }
        let _method = source.read_u16::<LE>()?;
        let _mod_time = source.read_u16::<LE>()?;
        let _mod_date = source.read_u16::<LE>()?;
        let _crc32 = source.read_u32::<LE>()?;
        let _compressed_size = source.read_u32::<LE>()?;
        let _uncompressed_size = source.read_u32::<LE>()?;
        let name_len = source.read_u16::<LE>()? as i64;
        let extra_len = source.read_u16::<LE>()? as i64;

        // Local header name/extra fields may differ from the central
        // directory; skip whatever is actually present.
        debug_assert!(LOCAL_HEADER_FIXED_SIZE == 30);
        source.seek(SeekFrom::Current(name_len + extra_len))?;

        let buffer_size = input_buffer_size.clamp(512, 1 << 20);
        let bounded = BufReader::with_capacity(buffer_size, source.take(compressed_size as u64));

        let inner = match compression {
            Pk3Compression::Stored => Inner::Stored(bounded),
            Pk3Compression::Deflate => Inner::Deflate(DeflateDecoder::new(bounded)),
            Pk3Compression::Other(method) => return Err(Pk3Error::UnsupportedMethod(method)),
        };

        Ok(Pk3EntryReader {
            inner,
            remaining: uncompressed_size as u64,
        })
    }

    /// Uncompressed bytes not yet read.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Read the entire member into memory, verifying the declared size.
    pub fn read_to_vec(mut self) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(self.remaining as usize);
        std::io::Read::read_to_end(&mut self, &mut data)?;
        if self.remaining != 0 {
            return Err(Pk3Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "member data ended early",
            )));
        }
        Ok(data)
    }
}

impl<R: Read + Seek> Read for Pk3EntryReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let limit = (buf.len() as u64).min(self.remaining) as usize;
        let read = match &mut self.inner {
            Inner::Stored(reader) => reader.read(&mut buf[..limit])?,
            Inner::Deflate(decoder) => decoder.read(&mut buf[..limit])?,
        };
        self.remaining -= read as u64;
        Ok(read)
    }
}

//! The header buffer: a bounded, forward-only view of header bytes.
//!
//! Header parsing runs over one of two realizations with the same surface:
//! an in-memory buffer holding the entire (decoded) header, which can report
//! the CRC-32 of all its bytes, or a paged window over a larger header that
//! holds one page at a time and cannot. The selector picks the in-memory
//! form whenever the header fits in a single page.

use std::io::{self, Read, Seek, SeekFrom};

use crate::options::ReaderOptions;
use crate::{Error, Result};

/// Default page size for the paged realization (16 MiB).
pub const DEFAULT_PAGE_SIZE: usize = 16 << 20;

/// Compaction threshold: a page is refilled when fewer than this many bytes
/// remain before a multi-byte read.
const COMPACT_THRESHOLD: usize = 8;

/// A bounded, forward-only reader over the bytes of one header.
pub struct HeaderBuffer<R> {
    inner: Inner<R>,
}

enum Inner<R> {
    InMemory {
        data: Vec<u8>,
        pos: usize,
    },
    Paged {
        source: R,
        start: u64,
        len: u64,
        fetched: u64,
        page: Vec<u8>,
        pos: usize,
        page_size: usize,
    },
}

impl<R> HeaderBuffer<R> {
    /// Wraps an already-materialized header, e.g. the output of the
    /// encoded-header bootstrap.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            inner: Inner::InMemory { data, pos: 0 },
        }
    }

    /// CRC-32 over all header bytes. Only the in-memory realization can
    /// answer; the paged one has already discarded earlier pages.
    pub fn crc32(&self) -> Option<u32> {
        match &self.inner {
            Inner::InMemory { data, .. } => Some(crc32fast::hash(data)),
            Inner::Paged { .. } => None,
        }
    }

    /// Bytes consumed since the start of the header.
    pub fn position(&self) -> u64 {
        match &self.inner {
            Inner::InMemory { pos, .. } => *pos as u64,
            Inner::Paged {
                fetched, page, pos, ..
            } => fetched - (page.len() - pos) as u64,
        }
    }

    /// Total header length.
    pub fn len(&self) -> u64 {
        match &self.inner {
            Inner::InMemory { data, .. } => data.len() as u64,
            Inner::Paged { len, .. } => *len,
        }
    }

    /// True when no bytes remain.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Bytes still readable.
    pub fn remaining(&self) -> u64 {
        self.len() - self.position()
    }
}

impl<R: Read + Seek> HeaderBuffer<R> {
    /// Opens a header region of `len` bytes at absolute offset `start`.
    ///
    /// Selects the in-memory realization when the region fits in one page,
    /// checking the allocation against the configured memory ceiling first.
    pub fn new(source: R, start: u64, len: u64, opts: &ReaderOptions) -> Result<Self> {
        Self::new_with_page_size(source, start, len, DEFAULT_PAGE_SIZE, opts)
    }

    /// Opens a header region with an explicit page size.
    pub fn new_with_page_size(
        mut source: R,
        start: u64,
        len: u64,
        page_size: usize,
        opts: &ReaderOptions,
    ) -> Result<Self> {
        source.seek(SeekFrom::Start(start))?;
        if len <= page_size as u64 {
            opts.check_allocation(len)?;
            let mut data = vec![0u8; len as usize];
            source
                .read_exact(&mut data)
                .map_err(|_| Error::corrupt("header extends past end of archive"))?;
            return Ok(Self::from_vec(data));
        }
        Ok(Self {
            inner: Inner::Paged {
                source,
                start,
                len,
                fetched: 0,
                page: Vec::new(),
                pos: 0,
                page_size,
            },
        })
    }

    /// Restarts reading from the first header byte.
    pub fn rewind(&mut self) -> Result<()> {
        match &mut self.inner {
            Inner::InMemory { pos, .. } => *pos = 0,
            Inner::Paged {
                source,
                start,
                fetched,
                page,
                pos,
                ..
            } => {
                source.seek(SeekFrom::Start(*start))?;
                *fetched = 0;
                page.clear();
                *pos = 0;
            }
        }
        Ok(())
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.get(&mut buf)?;
        Ok(buf[0])
    }

    /// Reads a little-endian u16.
    pub fn read_u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.get(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    /// Reads a little-endian u32.
    pub fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.get(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Reads a little-endian u64.
    pub fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.get(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Reads a 7z variable-length unsigned integer.
    pub fn read_uint64(&mut self) -> Result<u64> {
        super::reader::read_uint64(self).map_err(|_| Error::corrupt("truncated integer"))
    }

    /// Reads the all-defined-or-bitmap form of `count` booleans.
    pub fn read_all_or_bits(&mut self, count: usize) -> Result<Vec<bool>> {
        super::reader::read_all_or_bits(self, count)
            .map_err(|_| Error::corrupt("truncated bitmap"))
    }

    /// Reads a dense MSB-first bitmap of `count` booleans.
    pub fn read_bits(&mut self, count: usize) -> Result<Vec<bool>> {
        super::reader::read_bits(self, count).map_err(|_| Error::corrupt("truncated bitmap"))
    }

    /// Fills `buf` exactly, failing with a corruption error on underflow.
    pub fn get(&mut self, buf: &mut [u8]) -> Result<()> {
        if (buf.len() as u64) > self.remaining() {
            return Err(Error::corrupt("unexpected end of header"));
        }
        self.read_exact(buf)
            .map_err(|_| Error::corrupt("unexpected end of header"))
    }

    /// Skips `n` bytes, failing on underflow.
    pub fn skip(&mut self, n: u64) -> Result<()> {
        if n > self.remaining() {
            return Err(Error::corrupt("unexpected end of header"));
        }
        let mut left = n;
        let mut scratch = [0u8; 512];
        while left > 0 {
            let step = left.min(scratch.len() as u64) as usize;
            self.read_exact(&mut scratch[..step])
                .map_err(|_| Error::corrupt("unexpected end of header"))?;
            left -= step as u64;
        }
        Ok(())
    }

    /// Skips forward to an absolute header position. Used to restore the
    /// enclosing limit after a self-delimiting property block.
    pub fn skip_to(&mut self, target: u64) -> Result<()> {
        let pos = self.position();
        if target < pos {
            return Err(Error::corrupt("property block overran its declared size"));
        }
        self.skip(target - pos)
    }

    /// Refills the page, keeping any unread tail at the front.
    fn refill(&mut self) -> io::Result<usize> {
        match &mut self.inner {
            Inner::InMemory { .. } => Ok(0),
            Inner::Paged {
                source,
                len,
                fetched,
                page,
                pos,
                page_size,
                ..
            } => {
                if page.len() - *pos >= COMPACT_THRESHOLD {
                    return Ok(page.len() - *pos);
                }
                // Compact: move the unread tail to the page start.
                page.drain(..*pos);
                *pos = 0;

                let want = (*page_size - page.len()).min((*len - *fetched) as usize);
                if want == 0 {
                    return Ok(page.len());
                }
                let old = page.len();
                page.resize(old + want, 0);
                let mut filled = 0;
                while filled < want {
                    let n = source.read(&mut page[old + filled..])?;
                    if n == 0 {
                        break;
                    }
                    filled += n;
                }
                page.truncate(old + filled);
                *fetched += filled as u64;
                Ok(page.len())
            }
        }
    }
}

impl<R: Read + Seek> Read for HeaderBuffer<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let page_exhausted =
            matches!(&self.inner, Inner::Paged { page, pos, .. } if *pos == page.len());
        if page_exhausted {
            self.refill()?;
        }
        match &mut self.inner {
            Inner::InMemory { data, pos } => {
                let available = &data[*pos..];
                let n = available.len().min(buf.len());
                buf[..n].copy_from_slice(&available[..n]);
                *pos += n;
                Ok(n)
            }
            Inner::Paged { page, pos, .. } => {
                let available = &page[*pos..];
                let n = available.len().min(buf.len());
                buf[..n].copy_from_slice(&available[..n]);
                *pos += n;
                Ok(n)
            }
        }
    }
}

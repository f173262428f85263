//! Entry metadata from the files-info block.
//!
//! Every property inside files-info carries its own size prefix, so a parser
//! that does not understand a tag can skip it and forward compatibility is
//! preserved. The buffer limit is restored after each property regardless of
//! how much of it the parser consumed.

use std::io::{Read, Seek};

use crate::options::ReaderOptions;
use crate::timestamp::Timestamp;
use crate::{Error, Result};

use super::buffer::HeaderBuffer;
use super::property_id;

/// One file entry of the archive.
#[derive(Debug, Clone, Default)]
pub struct FileEntry {
    /// Path within the archive, `/`-separated.
    pub name: String,
    /// Whether the entry carries a data stream.
    pub has_stream: bool,
    /// Whether the entry is a directory.
    pub is_directory: bool,
    /// Whether the entry is a delete marker from a differential backup.
    pub is_anti: bool,
    /// Uncompressed size in bytes; zero for streamless entries.
    pub size: u64,
    /// CRC-32 of the uncompressed content where known.
    pub crc: Option<u32>,
    /// Creation time.
    pub ctime: Option<Timestamp>,
    /// Last-access time.
    pub atime: Option<Timestamp>,
    /// Last-modification time.
    pub mtime: Option<Timestamp>,
    /// Windows attribute bits.
    pub attributes: Option<u32>,
}

impl FileEntry {
    /// True for entries that are neither directories nor anti-items.
    pub fn is_file(&self) -> bool {
        !self.is_directory && !self.is_anti
    }

    /// True when the read-only attribute bit is set.
    pub fn is_readonly(&self) -> bool {
        self.attributes
            .is_some_and(|a| a & super::attributes::READONLY != 0)
    }
}

/// Parses the files-info block into entries.
///
/// `unpack_sizes` and `digests` hold the per-substream data already read
/// from the streams section; they are assigned to entries with streams in
/// order.
pub fn parse_files_info<R: Read + Seek>(
    b: &mut HeaderBuffer<R>,
    unpack_sizes: &[u64],
    digests: &[Option<u32>],
    opts: &ReaderOptions,
) -> Result<Vec<FileEntry>> {
    let num_files = b.read_uint64()?;
    if num_files > b.len().saturating_mul(8) {
        return Err(Error::corrupt("file count exceeds header size"));
    }
    opts.check_allocation(num_files.saturating_mul(100))?;
    let num_files = usize::try_from(num_files)
        .map_err(|_| Error::corrupt("file count out of range"))?;

    let mut entries: Vec<FileEntry> = Vec::with_capacity(num_files.min(1 << 16));
    entries.resize_with(num_files, FileEntry::default);

    let mut empty_streams: Option<Vec<bool>> = None;
    let mut empty_files: Vec<bool> = Vec::new();
    let mut anti_items: Vec<bool> = Vec::new();

    loop {
        let prop = b.read_u8()?;
        if prop == property_id::END {
            break;
        }
        let size = b.read_uint64()?;
        if size > b.remaining() {
            return Err(Error::corrupt("property block exceeds header"));
        }
        let end = b.position() + size;

        match prop {
            property_id::EMPTY_STREAM => {
                empty_streams = Some(b.read_bits(num_files)?);
            }

            property_id::EMPTY_FILE => {
                let empties = count_empty(&empty_streams, "empty-file")?;
                empty_files = b.read_bits(empties)?;
            }

            property_id::ANTI => {
                let empties = count_empty(&empty_streams, "anti")?;
                anti_items = b.read_bits(empties)?;
            }

            property_id::NAME => {
                if size % 2 != 1 {
                    return Err(Error::corrupt("name block has even size"));
                }
                let external = b.read_u8()?;
                if external != 0 {
                    return Err(Error::unsupported("external entry names"));
                }
                for entry in &mut entries {
                    entry.name = read_name(b, end, opts)?;
                }
                if b.position() != end {
                    return Err(Error::corrupt("name block size mismatch"));
                }
            }

            property_id::CTIME => {
                parse_times(b, &mut entries, |e, t| e.ctime = Some(t))?;
            }
            property_id::ATIME => {
                parse_times(b, &mut entries, |e, t| e.atime = Some(t))?;
            }
            property_id::MTIME => {
                parse_times(b, &mut entries, |e, t| e.mtime = Some(t))?;
            }

            property_id::WIN_ATTRIBUTES => {
                let defined = b.read_all_or_bits(entries.len())?;
                let external = b.read_u8()?;
                if external != 0 {
                    return Err(Error::unsupported("external attributes"));
                }
                for (entry, has_attr) in entries.iter_mut().zip(defined) {
                    if has_attr {
                        entry.attributes = Some(b.read_u32()?);
                    }
                }
            }

            // kDummy padding and unknown future tags are self-delimiting.
            _ => {}
        }

        b.skip_to(end)?;
    }

    apply_stream_flags(&mut entries, &empty_streams, &empty_files, &anti_items);
    assign_substreams(&mut entries, unpack_sizes, digests)?;

    if opts.use_default_name_for_unnamed_entries {
        if let Some(default) = opts.default_entry_name.as_deref() {
            for entry in entries.iter_mut().filter(|e| e.name.is_empty()) {
                entry.name = default.to_string();
            }
        }
    }

    Ok(entries)
}

fn count_empty(empty_streams: &Option<Vec<bool>>, what: &str) -> Result<usize> {
    match empty_streams {
        Some(bits) => Ok(bits.iter().filter(|&&b| b).count()),
        None => Err(Error::corrupt(format!(
            "{what} bitmap appears before the empty-stream bitmap"
        ))),
    }
}

fn read_name<R: Read + Seek>(
    b: &mut HeaderBuffer<R>,
    block_end: u64,
    opts: &ReaderOptions,
) -> Result<String> {
    let mut units: Vec<u16> = Vec::new();
    loop {
        if b.position() + 2 > block_end {
            return Err(Error::corrupt("entry name not null-terminated"));
        }
        let unit = b.read_u16()?;
        if unit == 0 {
            break;
        }
        if units.len() >= opts.max_entry_name_length {
            return Err(Error::corrupt(format!(
                "entry name longer than {} code units",
                opts.max_entry_name_length
            )));
        }
        units.push(unit);
    }
    String::from_utf16(&units).map_err(|_| Error::corrupt("entry name is not valid UTF-16"))
}

fn parse_times<R: Read + Seek, F>(
    b: &mut HeaderBuffer<R>,
    entries: &mut [FileEntry],
    mut set: F,
) -> Result<()>
where
    F: FnMut(&mut FileEntry, Timestamp),
{
    let defined = b.read_all_or_bits(entries.len())?;
    let external = b.read_u8()?;
    if external != 0 {
        return Err(Error::unsupported("external timestamps"));
    }
    for (entry, has_time) in entries.iter_mut().zip(defined) {
        if has_time {
            set(entry, Timestamp::from_ntfs(b.read_u64()?));
        }
    }
    Ok(())
}

fn apply_stream_flags(
    entries: &mut [FileEntry],
    empty_streams: &Option<Vec<bool>>,
    empty_files: &[bool],
    anti_items: &[bool],
) {
    let Some(empty_streams) = empty_streams else {
        for entry in entries.iter_mut() {
            entry.has_stream = true;
        }
        return;
    };

    let mut empty_idx = 0;
    for (entry, &is_empty) in entries.iter_mut().zip(empty_streams) {
        if is_empty {
            entry.has_stream = false;
            let is_empty_file = empty_files.get(empty_idx).copied().unwrap_or(false);
            entry.is_anti = anti_items.get(empty_idx).copied().unwrap_or(false);
            entry.is_directory = !is_empty_file;
            empty_idx += 1;
        } else {
            entry.has_stream = true;
        }
    }
}

fn assign_substreams(
    entries: &mut [FileEntry],
    unpack_sizes: &[u64],
    digests: &[Option<u32>],
) -> Result<()> {
    let mut stream_idx = 0;
    for entry in entries.iter_mut().filter(|e| e.has_stream) {
        let size = unpack_sizes
            .get(stream_idx)
            .copied()
            .ok_or_else(|| Error::corrupt("more stream entries than substreams"))?;
        entry.size = size;
        entry.crc = digests.get(stream_idx).copied().flatten();
        stream_idx += 1;
    }
    Ok(())
}

//! Reading archives: the [`Reader`] handle and its extractor.
//!
//! The extractor walks entries through a solid stream without speculative
//! decompression. Within one folder, each entry gets a length-bounded,
//! CRC-checked view of the single folder decoder; views queue up in order
//! and the oldest must be drained before the next becomes visible. Random
//! access re-queues views from the folder's first entry when the target lies
//! behind the cursor, and skips forward by queueing the entries in between
//! otherwise.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::rc::Rc;

use log::debug;

use crate::checksum::{shared_count, SharedCount};
use crate::codec::{folder_decoder, CodecRegistry};
use crate::format::archive::Archive;
use crate::format::files::FileEntry;
use crate::format::parser::read_archive;
use crate::format::SIGNATURE_HEADER_SIZE;
use crate::options::ReaderOptions;
use crate::{Error, Result};

/// A bounded view of the underlying source, seeking before every read so
/// the handle can be shared with the next folder's slice.
struct SliceReader<R> {
    source: Rc<RefCell<R>>,
    pos: u64,
    end: u64,
    counter: SharedCount,
}

impl<R: Read + Seek> Read for SliceReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.end {
            return Ok(0);
        }
        let want = buf
            .len()
            .min(usize::try_from(self.end - self.pos).unwrap_or(usize::MAX));
        let mut source = self.source.borrow_mut();
        source.seek(SeekFrom::Start(self.pos))?;
        let n = source.read(&mut buf[..want])?;
        self.pos += n as u64;
        self.counter.set(self.counter.get() + n as u64);
        Ok(n)
    }
}

/// An entry's pending view of the folder stream: how many bytes it still
/// owns and the checksum accumulated so far.
struct PendingEntry {
    index: usize,
    size: u64,
    remaining: u64,
    hasher: crc32fast::Hasher,
    expected_crc: Option<u32>,
}

impl PendingEntry {
    fn new(index: usize, entry: &FileEntry) -> Self {
        Self {
            index,
            size: entry.size,
            remaining: entry.size,
            hasher: crc32fast::Hasher::new(),
            expected_crc: entry.crc,
        }
    }

    fn consumed(&self) -> u64 {
        self.size - self.remaining
    }

    fn verify(&self) -> Result<()> {
        if let Some(expected) = self.expected_crc {
            let actual = self.hasher.clone().finalize();
            if actual != expected {
                return Err(Error::corrupt(format!(
                    "entry {} checksum mismatch: expected {expected:#010x}, got {actual:#010x}",
                    self.index
                )));
            }
        }
        Ok(())
    }
}

/// A handle for reading one 7z archive.
///
/// Dropping the reader closes the underlying source and wipes any cached
/// password bytes. The handle is single-threaded; two readers over two
/// independent sources are unrelated.
pub struct Reader<R> {
    source: Rc<RefCell<R>>,
    archive: Archive,
    options: ReaderOptions,
    registry: CodecRegistry,
    current_entry: Option<usize>,
    current_folder: Option<usize>,
    folder_reader: Option<Box<dyn Read>>,
    deferred: VecDeque<PendingEntry>,
    compressed_counter: SharedCount,
    uncompressed_bytes_read: u64,
}

impl<R> std::fmt::Debug for Reader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("current_entry", &self.current_entry)
            .field("current_folder", &self.current_folder)
            .field("uncompressed_bytes_read", &self.uncompressed_bytes_read)
            .finish_non_exhaustive()
    }
}

impl Reader<File> {
    /// Opens an archive file with default options.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_path_with_options(path, ReaderOptions::default())
    }

    /// Opens an archive file. When default names for unnamed entries are
    /// requested and no default was set, the file stem provides one.
    pub fn open_path_with_options(
        path: impl AsRef<Path>,
        mut options: ReaderOptions,
    ) -> Result<Self> {
        let path = path.as_ref();
        if options.use_default_name_for_unnamed_entries
            && options.default_entry_name.is_none()
        {
            options.default_entry_name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned());
        }
        let file = File::open(path)?;
        Self::open(file, options)
    }
}

impl<R: Read + Seek + 'static> Reader<R> {
    /// Opens an archive from any seekable byte source.
    pub fn open(mut source: R, options: ReaderOptions) -> Result<Self> {
        let registry = CodecRegistry::new();
        let archive = read_archive(&mut source, &options, &registry)?;
        debug!(
            "opened archive: {} entries, {} folders, {} pack streams",
            archive.entries.len(),
            archive.folders.len(),
            archive.pack_sizes.len()
        );
        Ok(Self {
            source: Rc::new(RefCell::new(source)),
            archive,
            options,
            registry,
            current_entry: None,
            current_folder: None,
            folder_reader: None,
            deferred: VecDeque::new(),
            compressed_counter: shared_count(),
            uncompressed_bytes_read: 0,
        })
    }

    /// The parsed archive model.
    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    /// All entries in declaration order.
    pub fn entries(&self) -> &[FileEntry] {
        &self.archive.entries
    }

    /// The entry the cursor is on, if any.
    pub fn current_entry(&self) -> Option<&FileEntry> {
        self.current_entry.map(|i| &self.archive.entries[i])
    }

    /// Compressed bytes pulled from the source so far.
    pub fn compressed_bytes_read(&self) -> u64 {
        self.compressed_counter.get()
    }

    /// Uncompressed bytes handed to the caller so far.
    pub fn uncompressed_bytes_read(&self) -> u64 {
        self.uncompressed_bytes_read
    }

    /// Advances to the next entry, returning its index, or `None` past the
    /// last entry.
    pub fn next_entry(&mut self) -> Result<Option<usize>> {
        let index = self.current_entry.map_or(0, |i| i + 1);
        if index >= self.archive.entries.len() {
            self.current_entry = Some(self.archive.entries.len());
            return Ok(None);
        }
        self.stage_entry(index)?;
        Ok(Some(index))
    }

    /// Random access: positions the cursor on `index` so the next reads
    /// return that entry's content from the start.
    ///
    /// Reaching backward, or forward past a partially-consumed entry within
    /// the same folder, reopens the folder and replays it from its first
    /// entry; reaching forward otherwise queues the entries in between for
    /// draining.
    pub fn seek_to_entry(&mut self, index: usize) -> Result<&FileEntry> {
        if index >= self.archive.entries.len() {
            return Err(Error::IllegalArgument(format!(
                "entry index {index} out of range ({} entries)",
                self.archive.entries.len()
            )));
        }

        if !self.archive.entries[index].has_stream {
            self.current_entry = Some(index);
            return Ok(&self.archive.entries[index]);
        }

        let folder = self.archive.stream_map.entry_folder[index]
            .ok_or_else(|| Error::corrupt("stream entry without a folder"))?;

        if self.current_folder != Some(folder) {
            self.open_folder(folder)?;
            self.queue_entries(folder, self.first_entry_of(folder)?, index)?;
        } else {
            let current = self.current_entry.unwrap_or(0);
            let consumed = self
                .deferred
                .iter()
                .find(|p| p.index == current)
                .map_or(0, PendingEntry::consumed);
            if index < current || consumed > 0 {
                self.open_folder(folder)?;
                self.queue_entries(folder, self.first_entry_of(folder)?, index)?;
            } else if index > current {
                self.queue_entries(folder, current + 1, index)?;
            }
            // index == current with nothing consumed: already staged.
        }

        self.current_entry = Some(index);
        Ok(&self.archive.entries[index])
    }

    /// Reads content of the current entry. Returns 0 at entry EOF and for
    /// entries without a stream.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Some(current) = self.current_entry else {
            return Ok(0);
        };
        if buf.is_empty()
            || current >= self.archive.entries.len()
            || !self.archive.entries[current].has_stream
        {
            return Ok(0);
        }

        // Solid skipping: everything queued before the current entry must be
        // drained through the folder decoder first.
        while self.deferred.front().is_some_and(|p| p.index != current) {
            self.drain_head()?;
        }

        let Some(pending) = self.deferred.front_mut() else {
            return Ok(0);
        };
        if pending.remaining == 0 {
            return Ok(0);
        }

        let reader = self
            .folder_reader
            .as_mut()
            .ok_or_else(|| Error::corrupt("entry staged without a folder reader"))?;
        let want = buf
            .len()
            .min(usize::try_from(pending.remaining).unwrap_or(usize::MAX));
        let n = reader.read(&mut buf[..want]).map_err(Error::from_stream)?;
        if n == 0 {
            return Err(Error::corrupt("entry content truncated"));
        }

        pending.hasher.update(&buf[..n]);
        pending.remaining -= n as u64;
        self.uncompressed_bytes_read += n as u64;

        if pending.remaining == 0 {
            pending.verify()?;
        }
        Ok(n)
    }

    /// Reads the current entry's remaining content to a vector.
    pub fn read_to_vec(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            let n = self.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        Ok(out)
    }

    /// An [`io::Read`] adapter over the current entry.
    pub fn entry_reader(&mut self) -> EntryReader<'_, R> {
        EntryReader { reader: self }
    }

    fn stage_entry(&mut self, index: usize) -> Result<()> {
        self.current_entry = Some(index);
        let entry = &self.archive.entries[index];
        if !entry.has_stream {
            return Ok(());
        }

        let folder = self.archive.stream_map.entry_folder[index]
            .ok_or_else(|| Error::corrupt("stream entry without a folder"))?;

        if self.current_folder != Some(folder) {
            self.open_folder(folder)?;
        }
        let entry = &self.archive.entries[index];
        self.deferred.push_back(PendingEntry::new(index, entry));
        Ok(())
    }

    /// Opens a folder's decoder stack over its packed byte range, releasing
    /// the previous folder's stack and queue.
    fn open_folder(&mut self, folder_index: usize) -> Result<()> {
        self.folder_reader = None;
        self.deferred.clear();

        let folder = &self.archive.folders[folder_index];
        let first_pack = self.archive.stream_map.folder_first_pack_stream[folder_index];
        let offset = SIGNATURE_HEADER_SIZE + self.archive.folder_pack_offset(folder_index);
        let size = self.archive.pack_sizes[first_pack];

        let slice = SliceReader {
            source: Rc::clone(&self.source),
            pos: offset,
            end: offset + size,
            counter: self.compressed_counter.clone(),
        };

        let stack = folder_decoder(
            &self.registry,
            Box::new(slice),
            folder,
            self.options.password.as_ref(),
            self.options.max_memory_limit_kib,
        )?;

        self.folder_reader = Some(stack);
        self.current_folder = Some(folder_index);
        Ok(())
    }

    fn first_entry_of(&self, folder_index: usize) -> Result<usize> {
        self.archive.stream_map.folder_first_entry[folder_index]
            .ok_or_else(|| Error::corrupt("folder carries no entries"))
    }

    /// Queues pending views for every stream entry of `folder` in
    /// `from..=to`, in entry order.
    fn queue_entries(&mut self, folder: usize, from: usize, to: usize) -> Result<()> {
        for i in from..=to {
            let entry = &self.archive.entries[i];
            if entry.has_stream && self.archive.stream_map.entry_folder[i] == Some(folder) {
                self.deferred.push_back(PendingEntry::new(i, entry));
            }
        }
        Ok(())
    }

    /// Fully consumes the oldest queued view and discards it.
    fn drain_head(&mut self) -> Result<()> {
        let reader = self
            .folder_reader
            .as_mut()
            .ok_or_else(|| Error::corrupt("entry staged without a folder reader"))?;

        let Some(pending) = self.deferred.front_mut() else {
            return Ok(());
        };

        let mut scratch = [0u8; 8192];
        while pending.remaining > 0 {
            let want = scratch
                .len()
                .min(usize::try_from(pending.remaining).unwrap_or(usize::MAX));
            let n = reader
                .read(&mut scratch[..want])
                .map_err(Error::from_stream)?;
            if n == 0 {
                return Err(Error::corrupt("entry content truncated while skipping"));
            }
            pending.hasher.update(&scratch[..n]);
            pending.remaining -= n as u64;
        }
        pending.verify()?;
        self.deferred.pop_front();
        Ok(())
    }
}

/// [`io::Read`] adapter borrowed from [`Reader::entry_reader`].
pub struct EntryReader<'a, R> {
    reader: &'a mut Reader<R>,
}

impl<R: Read + Seek + 'static> Read for EntryReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf).map_err(|e| match e {
            Error::Io(io) => io,
            other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_slice_reader_bounds_and_counts() {
        let data: Vec<u8> = (0..=99).collect();
        let source = Rc::new(RefCell::new(Cursor::new(data)));
        let counter = shared_count();
        let mut slice = SliceReader {
            source,
            pos: 10,
            end: 20,
            counter: counter.clone(),
        };
        let mut out = Vec::new();
        slice.read_to_end(&mut out).unwrap();
        assert_eq!(out, (10..20).collect::<Vec<u8>>());
        assert_eq!(counter.get(), 10);
    }

    #[test]
    fn test_slice_reader_interleaved_slices_share_source() {
        let data: Vec<u8> = (0..=99).collect();
        let source = Rc::new(RefCell::new(Cursor::new(data)));
        let counter = shared_count();
        let mut a = SliceReader {
            source: Rc::clone(&source),
            pos: 0,
            end: 4,
            counter: counter.clone(),
        };
        let mut b = SliceReader {
            source,
            pos: 50,
            end: 54,
            counter,
        };

        let mut buf = [0u8; 2];
        a.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0, 1]);
        b.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [50, 51]);
        a.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [2, 3]);
    }

    #[test]
    fn test_pending_entry_crc_verification() {
        let entry = FileEntry {
            name: "x".into(),
            has_stream: true,
            size: 3,
            crc: Some(crc32fast::hash(b"abc")),
            ..Default::default()
        };
        let mut pending = PendingEntry::new(0, &entry);
        pending.hasher.update(b"abc");
        pending.remaining = 0;
        assert!(pending.verify().is_ok());

        let mut bad = PendingEntry::new(0, &entry);
        bad.hasher.update(b"abd");
        bad.remaining = 0;
        assert!(matches!(bad.verify(), Err(Error::Corrupt(_))));
    }
}

//! Writing archives: the [`Writer`] handle and its encoder pipelines.
//!
//! Entries are recorded in declaration order. Content streams through a
//! pipeline opened lazily on the first byte: a counting sink over the
//! output channel, wrapped in each of the entry's methods from the pack
//! side out, with a CRC/length stage innermost. Per entry the writer tracks
//! packed bytes, per-coder output sizes, and the plain CRC-32; the header
//! is serialized after the last entry, followed by the 32-byte signature
//! header.

mod header_encode;
mod options;

pub use options::{WriteMethod, WriteOptions};

use std::cell::RefCell;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::rc::Rc;

use log::debug;

use crate::checksum::{shared_count, shared_crc, SharedCount, SharedCrc};
use crate::codec::{CodecRegistry, EncoderCtx, FinishWrite};
use crate::crypto::AesMaterial;
use crate::format::header::StartHeader;
use crate::format::SIGNATURE_HEADER_SIZE;
use crate::timestamp::Timestamp;
use crate::{Error, Result};

/// Metadata for an entry about to be written.
#[derive(Debug, Clone, Default)]
pub struct NewEntry {
    /// Path within the archive, `/`-separated.
    pub name: String,
    /// Whether the entry is a directory.
    pub is_directory: bool,
    /// Whether the entry is a delete marker for differential backups.
    pub is_anti: bool,
    /// Creation time.
    pub ctime: Option<Timestamp>,
    /// Last-access time.
    pub atime: Option<Timestamp>,
    /// Last-modification time.
    pub mtime: Option<Timestamp>,
    /// Windows attribute bits.
    pub attributes: Option<u32>,
}

impl NewEntry {
    /// A regular file entry.
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// A directory entry.
    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_directory: true,
            ..Default::default()
        }
    }

    /// A delete marker.
    pub fn anti(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_anti: true,
            ..Default::default()
        }
    }

    /// Sets the modification time.
    pub fn mtime(mut self, time: Timestamp) -> Self {
        self.mtime = Some(time);
        self
    }

    /// Sets the creation time.
    pub fn ctime(mut self, time: Timestamp) -> Self {
        self.ctime = Some(time);
        self
    }

    /// Sets the access time.
    pub fn atime(mut self, time: Timestamp) -> Self {
        self.atime = Some(time);
        self
    }

    /// Sets Windows attribute bits.
    pub fn attributes(mut self, attributes: u32) -> Self {
        self.attributes = Some(attributes);
        self
    }
}

/// One coder of a written folder, in decode order.
pub(crate) struct CoderRecord {
    pub(crate) method_id: Vec<u8>,
    pub(crate) properties: Vec<u8>,
    pub(crate) unpack_size: u64,
}

/// A fully written entry awaiting header serialization.
pub(crate) struct EntryRecord {
    pub(crate) meta: NewEntry,
    pub(crate) has_stream: bool,
    pub(crate) size: u64,
    pub(crate) crc: u32,
    pub(crate) pack_size: u64,
    pub(crate) coders: Vec<CoderRecord>,
}

/// Pipeline bookkeeping for the entry currently open.
struct OpenEntry {
    meta: NewEntry,
    pipeline: Option<Box<dyn FinishWrite>>,
    pack_count: SharedCount,
    stage_counts: Vec<SharedCount>,
    stage_specs: Vec<(Vec<u8>, Vec<u8>)>,
    crc: SharedCrc,
}

/// Outcome of [`Writer::finish`].
#[derive(Debug, Clone, Copy)]
pub struct WriteResult {
    /// Entries recorded.
    pub entries_written: usize,
    /// Total uncompressed bytes.
    pub uncompressed_size: u64,
    /// Total packed bytes, excluding headers.
    pub packed_size: u64,
}

/// A handle for writing one 7z archive.
pub struct Writer<W> {
    output: Rc<RefCell<W>>,
    options: WriteOptions,
    registry: CodecRegistry,
    entries: Vec<EntryRecord>,
    current: Option<OpenEntry>,
    payload_written: u64,
    finished: bool,
}

impl Writer<File> {
    /// Creates an archive file with default options.
    pub fn create_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::create_path_with_options(path, WriteOptions::default())
    }

    /// Creates an archive file.
    pub fn create_path_with_options(
        path: impl AsRef<Path>,
        options: WriteOptions,
    ) -> Result<Self> {
        let file = File::create(path)?;
        Self::create(file, options)
    }
}

impl<W: Write + Seek + 'static> Writer<W> {
    /// Starts an archive on any seekable sink. Space for the signature
    /// header is reserved immediately; the header itself is written last,
    /// when its CRC is known.
    pub fn create(mut output: W, options: WriteOptions) -> Result<Self> {
        options.validate()?;
        output.seek(SeekFrom::Start(0))?;
        output.write_all(&[0u8; SIGNATURE_HEADER_SIZE as usize])?;
        Ok(Self {
            output: Rc::new(RefCell::new(output)),
            options,
            registry: CodecRegistry::new(),
            entries: Vec::new(),
            current: None,
            payload_written: 0,
            finished: false,
        })
    }

    /// Begins a new entry, closing any entry still open.
    pub fn put_entry(&mut self, meta: NewEntry) -> Result<()> {
        self.check_open()?;
        if self.current.is_some() {
            self.close_entry()?;
        }
        self.current = Some(OpenEntry {
            meta,
            pipeline: None,
            pack_count: shared_count(),
            stage_counts: Vec::new(),
            stage_specs: Vec::new(),
            crc: shared_crc(),
        });
        Ok(())
    }

    /// Streams content into the open entry.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.check_open()?;
        let current = self
            .current
            .as_mut()
            .ok_or_else(|| Error::IllegalArgument("no entry is open".into()))?;
        if data.is_empty() {
            return Ok(());
        }
        if current.meta.is_directory || current.meta.is_anti {
            return Err(Error::IllegalArgument(
                "directories and delete markers carry no content".into(),
            ));
        }

        if current.pipeline.is_none() {
            let chain = self.options.coder_chain();
            let built = open_pipeline(
                &self.registry,
                &self.options,
                Rc::clone(&self.output),
                &chain,
                current.crc.clone(),
                current.pack_count.clone(),
            )?;
            current.pipeline = Some(built.pipeline);
            current.stage_counts = built.stage_counts;
            current.stage_specs = built.stage_specs;
        }

        current
            .pipeline
            .as_mut()
            .expect("pipeline was just installed")
            .write_all(data)?;
        Ok(())
    }

    /// Finalizes the open entry, recording its sizes and checksum.
    pub fn close_entry(&mut self) -> Result<()> {
        self.check_open()?;
        let Some(current) = self.current.take() else {
            return Ok(());
        };

        let mut record = EntryRecord {
            meta: current.meta,
            has_stream: false,
            size: 0,
            crc: 0,
            pack_size: 0,
            coders: Vec::new(),
        };

        if let Some(pipeline) = current.pipeline {
            pipeline.finish()?;

            let size = current
                .stage_counts
                .last()
                .map_or(0, |count| count.get());
            if size > 0 {
                record.has_stream = true;
                record.size = size;
                record.crc = current.crc.borrow().clone().finalize();
                record.pack_size = current.pack_count.get();
                record.coders = current
                    .stage_specs
                    .into_iter()
                    .zip(current.stage_counts)
                    .map(|((method_id, properties), count)| CoderRecord {
                        method_id,
                        properties,
                        unpack_size: count.get(),
                    })
                    .collect();
                self.payload_written += record.pack_size;
            }
        }

        self.entries.push(record);
        Ok(())
    }

    /// Records an entry and its whole content in one call.
    pub fn add_bytes(&mut self, meta: NewEntry, data: &[u8]) -> Result<()> {
        self.put_entry(meta)?;
        self.write(data)?;
        self.close_entry()
    }

    /// Records an entry, streaming its content from a reader.
    pub fn add_stream(&mut self, meta: NewEntry, reader: &mut impl Read) -> Result<()> {
        self.put_entry(meta)?;
        let mut chunk = [0u8; 8192];
        loop {
            let n = reader.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            self.write(&chunk[..n])?;
        }
        self.close_entry()
    }

    /// Serializes the header, writes the signature header, and returns the
    /// underlying sink.
    pub fn finish(mut self) -> Result<(W, WriteResult)> {
        self.check_open()?;
        if self.current.is_some() {
            self.close_entry()?;
        }
        self.finished = true;

        let header = header_encode::serialize_header(&self.entries)?;
        let (next_header_offset, next_header) = if self.options.wants_encoded_header() {
            self.encode_header(&header)?
        } else {
            (self.payload_written, header)
        };

        let next_header_crc = crc32fast::hash(&next_header);
        {
            let mut output = self.output.borrow_mut();
            output.seek(SeekFrom::Start(
                SIGNATURE_HEADER_SIZE + next_header_offset,
            ))?;
            output.write_all(&next_header)?;
            output.seek(SeekFrom::Start(0))?;
            StartHeader::write(
                &mut *output,
                next_header_offset,
                next_header.len() as u64,
                next_header_crc,
            )?;
            output.flush()?;
        }

        let result = WriteResult {
            entries_written: self.entries.len(),
            uncompressed_size: self.entries.iter().map(|e| e.size).sum(),
            packed_size: self.entries.iter().map(|e| e.pack_size).sum(),
        };
        debug!(
            "finished archive: {} entries, {} -> {} bytes",
            result.entries_written, result.uncompressed_size, result.packed_size
        );

        let output = Rc::try_unwrap(self.output)
            .map_err(|_| Error::IllegalArgument("output sink still borrowed".into()))?
            .into_inner();
        Ok((output, result))
    }

    /// Runs the plain header through the configured header pipeline and
    /// returns the `kEncodedHeader` block referencing it.
    fn encode_header(&mut self, plain: &[u8]) -> Result<(u64, Vec<u8>)> {
        let chain = self.options.header_coder_chain();
        let header_crc = crc32fast::hash(plain);
        let stream_pos = self.payload_written;

        let pack_count = shared_count();
        let built = open_pipeline(
            &self.registry,
            &self.options,
            Rc::clone(&self.output),
            &chain,
            shared_crc(),
            pack_count.clone(),
        )?;
        let mut pipeline = built.pipeline;
        pipeline.write_all(plain)?;
        pipeline.finish()?;

        let pack_size = pack_count.get();
        self.payload_written += pack_size;

        let coders: Vec<CoderRecord> = built
            .stage_specs
            .into_iter()
            .zip(built.stage_counts)
            .map(|((method_id, properties), count)| CoderRecord {
                method_id,
                properties,
                unpack_size: count.get(),
            })
            .collect();

        let block = header_encode::serialize_encoded_header_block(
            stream_pos,
            pack_size,
            &coders,
            header_crc,
        )?;
        Ok((self.payload_written, block))
    }

    fn check_open(&self) -> Result<()> {
        if self.finished {
            return Err(Error::IllegalArgument("writer already finished".into()));
        }
        Ok(())
    }
}

/// A finished pipeline plus the counters observing its stage boundaries.
struct BuiltPipeline {
    pipeline: Box<dyn FinishWrite>,
    /// Bytes written into each coder's encoder, i.e. that coder's decoded
    /// output size, in decode order.
    stage_counts: Vec<SharedCount>,
    /// Method id and properties per coder, in decode order.
    stage_specs: Vec<(Vec<u8>, Vec<u8>)>,
}

/// Assembles the encoder pipeline for a coder chain given in decode order
/// (pack side first). Encoders compose outside-in, so the chain is applied
/// front to back on top of the output sink.
fn open_pipeline<W: Write + Seek + 'static>(
    registry: &CodecRegistry,
    options: &WriteOptions,
    output: Rc<RefCell<W>>,
    chain: &[Vec<u8>],
    crc: SharedCrc,
    pack_count: SharedCount,
) -> Result<BuiltPipeline> {
    let aes_material = if options.password.is_some() {
        Some(
            options
                .aes_material
                .clone()
                .unwrap_or_else(AesMaterial::generate),
        )
    } else {
        None
    };
    let ctx = EncoderCtx {
        level: options.level,
        dict_size: options.dict_size,
        password: options.password.as_ref(),
        aes_material: aes_material.as_ref(),
    };

    for method_id in chain {
        registry.accepts(method_id, &ctx)?;
    }

    let mut sink: Box<dyn FinishWrite> = Box::new(ArchiveSink { inner: output });
    sink = Box::new(CountingStage {
        inner: sink,
        counter: pack_count,
    });

    let mut stage_counts = Vec::with_capacity(chain.len());
    let mut stage_specs = Vec::with_capacity(chain.len());

    for method_id in chain {
        let (wrapped, properties) = registry.encode(method_id, sink, &ctx)?;
        let counter = shared_count();
        sink = Box::new(CountingStage {
            inner: wrapped,
            counter: counter.clone(),
        });
        stage_counts.push(counter);
        stage_specs.push((method_id.clone(), properties));
    }

    sink = Box::new(CrcStage { inner: sink, crc });

    Ok(BuiltPipeline {
        pipeline: sink,
        stage_counts,
        stage_specs,
    })
}

/// Bottom of every pipeline: appends to the shared output sink.
struct ArchiveSink<W> {
    inner: Rc<RefCell<W>>,
}

impl<W: Write> Write for ArchiveSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.borrow_mut().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.borrow_mut().flush()
    }
}

impl<W: Write> FinishWrite for ArchiveSink<W> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        self.inner.borrow_mut().flush()
    }
}

/// Counts bytes flowing into the stage beneath.
struct CountingStage {
    inner: Box<dyn FinishWrite>,
    counter: SharedCount,
}

impl Write for CountingStage {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.counter.set(self.counter.get() + n as u64);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl FinishWrite for CountingStage {
    fn finish(self: Box<Self>) -> io::Result<()> {
        self.inner.finish()
    }
}

/// Accumulates the plain-content CRC at the top of the pipeline.
struct CrcStage {
    inner: Box<dyn FinishWrite>,
    crc: SharedCrc,
}

impl Write for CrcStage {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.crc.borrow_mut().update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl FinishWrite for CrcStage {
    fn finish(self: Box<Self>) -> io::Result<()> {
        self.inner.finish()
    }
}

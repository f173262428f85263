//! Stream structures of the 7z header: pack info, folders, and substreams.
//!
//! A folder is the solid-compression unit: an ordered list of coders wired
//! together by bind pairs, fed by externally packed streams, producing one
//! final output stream that concatenates one or more file bodies.

use std::io::{Read, Seek};

use crate::options::ReaderOptions;
use crate::{Error, Result};

use super::buffer::HeaderBuffer;
use super::property_id;

/// Preallocation cap for vectors sized from untrusted counts. Larger counts
/// still parse; the vector just grows as elements actually arrive.
const PREALLOC_CAP: usize = 1 << 16;

fn capped(n: u64) -> usize {
    (n as usize).min(PREALLOC_CAP)
}

/// Largest unpack size accepted. Sizes above the signed 64-bit range would
/// read back as negative lengths in other implementations.
const MAX_UNPACK_SIZE: u64 = i64::MAX as u64;

/// Information about the packed (compressed) streams region.
#[derive(Debug, Clone, Default)]
pub struct PackInfo {
    /// Offset of the first pack stream, relative to the end of the
    /// signature header.
    pub pack_pos: u64,
    /// Size of each pack stream, in order.
    pub pack_sizes: Vec<u64>,
    /// Optional CRC-32 per pack stream.
    pub pack_crcs: Vec<Option<u32>>,
}

impl PackInfo {
    /// Parses a PackInfo block. The buffer is positioned just after the
    /// `kPackInfo` tag.
    pub fn parse<R: Read + Seek>(
        b: &mut HeaderBuffer<R>,
        opts: &ReaderOptions,
    ) -> Result<Self> {
        let pack_pos = b.read_uint64()?;
        let num_streams = b.read_uint64()?;
        if num_streams > b.len().saturating_mul(8) {
            return Err(Error::corrupt("pack stream count exceeds header size"));
        }
        opts.check_allocation(num_streams.saturating_mul(16))?;

        let mut pack_sizes: Vec<u64> = Vec::with_capacity(capped(num_streams));
        let mut pack_crcs: Vec<Option<u32>> = Vec::new();

        loop {
            match b.read_u8()? {
                property_id::END => break,

                property_id::SIZE => {
                    for _ in 0..num_streams {
                        let size = b.read_uint64()?;
                        if size > MAX_UNPACK_SIZE {
                            return Err(Error::corrupt("negative pack size"));
                        }
                        pack_sizes.push(size);
                    }
                }

                property_id::CRC => {
                    let defined = b.read_all_or_bits(num_streams as usize)?;
                    pack_crcs = Vec::with_capacity(capped(num_streams));
                    for has_crc in defined {
                        pack_crcs.push(if has_crc { Some(b.read_u32()?) } else { None });
                    }
                }

                other => {
                    return Err(Error::corrupt(format!(
                        "unexpected tag {other:#04x} in pack info"
                    )));
                }
            }
        }

        if pack_sizes.len() as u64 != num_streams {
            return Err(Error::corrupt("pack stream sizes missing"));
        }
        if pack_crcs.is_empty() {
            pack_crcs = vec![None; pack_sizes.len()];
        }

        Ok(Self {
            pack_pos,
            pack_sizes,
            pack_crcs,
        })
    }

    /// Number of pack streams.
    pub fn num_streams(&self) -> usize {
        self.pack_sizes.len()
    }

    /// Total size of the packed region in bytes.
    pub fn total_packed_size(&self) -> u64 {
        self.pack_sizes.iter().sum()
    }
}

/// One node in a folder's codec pipeline.
#[derive(Debug, Clone)]
pub struct Coder {
    /// Variable-length method identifier (1 to 15 bytes).
    pub method_id: Vec<u8>,
    /// Number of input streams. The engine accepts only 1.
    pub num_in_streams: u64,
    /// Number of output streams. The engine accepts only 1.
    pub num_out_streams: u64,
    /// Codec-specific properties, e.g. the LZMA2 dictionary-size byte.
    pub properties: Option<Vec<u8>>,
}

/// A directed edge: output stream `out_index` feeds input stream `in_index`.
/// Both indices are folder-local, enumerating all coders' inputs and,
/// independently, all outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindPair {
    /// Consuming input stream index.
    pub in_index: u64,
    /// Producing output stream index.
    pub out_index: u64,
}

/// A solid-compression unit: a pipeline of coders and its wiring.
#[derive(Debug, Clone)]
pub struct Folder {
    /// Coders in declaration order.
    pub coders: Vec<Coder>,
    /// Edges wiring coder outputs to coder inputs.
    pub bind_pairs: Vec<BindPair>,
    /// Input stream indices fed from the packed region, in pack order.
    pub packed_streams: Vec<u64>,
    /// Unpack size of each coder output, in declaration order.
    pub unpack_sizes: Vec<u64>,
    /// Expected CRC-32 of the folder's final output.
    pub unpack_crc: Option<u32>,
    /// Number of files carried by this folder's output. Defaults to 1 and
    /// is overwritten from the substreams block.
    pub num_substreams: u64,
    /// Coder indices in decode order: the packed-stream side first, the
    /// final output last. Computed by [`Folder::finish`].
    pub ordered_coders: Vec<usize>,
}

impl Folder {
    /// Parses one folder record.
    pub fn parse<R: Read + Seek>(
        b: &mut HeaderBuffer<R>,
        opts: &ReaderOptions,
    ) -> Result<Self> {
        let num_coders = b.read_uint64()?;
        if num_coders == 0 {
            return Err(Error::corrupt("folder with no coders"));
        }
        opts.check_allocation(num_coders.saturating_mul(32))?;

        let mut coders = Vec::with_capacity(capped(num_coders));
        for _ in 0..num_coders {
            coders.push(Self::parse_coder(b, opts)?);
        }

        let total_in = coders.len() as u64;
        let total_out = coders.len() as u64;

        let num_bind_pairs = total_out - 1;
        let mut bind_pairs = Vec::with_capacity(capped(num_bind_pairs));
        for _ in 0..num_bind_pairs {
            let in_index = b.read_uint64()?;
            let out_index = b.read_uint64()?;
            if in_index >= total_in || out_index >= total_out {
                return Err(Error::corrupt(format!(
                    "bind pair ({in_index}, {out_index}) out of range"
                )));
            }
            bind_pairs.push(BindPair {
                in_index,
                out_index,
            });
        }

        for (i, bp) in bind_pairs.iter().enumerate() {
            for other in &bind_pairs[i + 1..] {
                if bp.in_index == other.in_index || bp.out_index == other.out_index {
                    return Err(Error::corrupt("duplicate bind pair index"));
                }
            }
        }

        let num_packed = total_in - num_bind_pairs;
        let mut packed_streams = Vec::with_capacity(capped(num_packed));
        if num_packed == 1 {
            // The single external input is the one no bind pair consumes.
            let unbound = (0..total_in)
                .find(|&i| bind_pairs.iter().all(|bp| bp.in_index != i))
                .ok_or_else(|| Error::corrupt("folder has no external input"))?;
            packed_streams.push(unbound);
        } else {
            for _ in 0..num_packed {
                let idx = b.read_uint64()?;
                if idx >= total_in {
                    return Err(Error::corrupt("packed stream index out of range"));
                }
                packed_streams.push(idx);
            }
        }

        Ok(Self {
            coders,
            bind_pairs,
            packed_streams,
            unpack_sizes: Vec::new(),
            unpack_crc: None,
            num_substreams: 1,
            ordered_coders: Vec::new(),
        })
    }

    fn parse_coder<R: Read + Seek>(
        b: &mut HeaderBuffer<R>,
        opts: &ReaderOptions,
    ) -> Result<Coder> {
        let flags = b.read_u8()?;
        let id_size = (flags & 0x0F) as usize;
        let is_complex = flags & 0x10 != 0;
        let has_properties = flags & 0x20 != 0;
        if flags & 0x80 != 0 {
            return Err(Error::unsupported("alternate coder methods"));
        }
        if id_size == 0 {
            return Err(Error::corrupt("empty coder method id"));
        }

        let mut method_id = vec![0u8; id_size];
        b.get(&mut method_id)?;

        let (num_in_streams, num_out_streams) = if is_complex {
            (b.read_uint64()?, b.read_uint64()?)
        } else {
            (1, 1)
        };
        if num_in_streams != 1 || num_out_streams != 1 {
            return Err(Error::unsupported(format!(
                "coder with {num_in_streams} inputs and {num_out_streams} outputs"
            )));
        }

        let properties = if has_properties {
            let size = b.read_uint64()?;
            opts.check_allocation(size)?;
            if size > b.remaining() {
                return Err(Error::corrupt("coder properties exceed header"));
            }
            let mut props = vec![0u8; size as usize];
            b.get(&mut props)?;
            Some(props)
        } else {
            None
        };

        Ok(Coder {
            method_id,
            num_in_streams,
            num_out_streams,
            properties,
        })
    }

    /// Total input streams across all coders.
    pub fn total_in_streams(&self) -> u64 {
        self.coders.iter().map(|c| c.num_in_streams).sum()
    }

    /// Total output streams across all coders.
    pub fn total_out_streams(&self) -> u64 {
        self.coders.iter().map(|c| c.num_out_streams).sum()
    }

    /// Index of the coder whose output is the folder's final output: the
    /// one output no bind pair consumes.
    pub fn final_output_index(&self) -> Result<usize> {
        (0..self.coders.len())
            .find(|&i| self.bind_pairs.iter().all(|bp| bp.out_index != i as u64))
            .ok_or_else(|| Error::corrupt("folder has no final output"))
    }

    /// The folder's logical size: the unpack size of its final output.
    pub fn unpack_size(&self) -> u64 {
        self.ordered_coders
            .last()
            .and_then(|&i| self.unpack_sizes.get(i))
            .copied()
            .unwrap_or(0)
    }

    /// Validates the wiring and precomputes the decode order.
    ///
    /// The order follows bind pairs backwards from the final output to the
    /// coder fed by the packed stream, then reverses, so decoders can be
    /// stacked front to back.
    pub fn finish(&mut self) -> Result<()> {
        if self.unpack_sizes.len() != self.coders.len() {
            return Err(Error::corrupt("folder missing unpack sizes"));
        }
        for &size in &self.unpack_sizes {
            if size > MAX_UNPACK_SIZE {
                return Err(Error::corrupt("negative unpack size"));
            }
        }

        let final_coder = self.final_output_index()?;
        let mut order = vec![final_coder];
        let mut current = final_coder as u64;
        loop {
            // With single-stream coders, input index i belongs to coder i.
            match self
                .bind_pairs
                .iter()
                .find(|bp| bp.in_index == current)
            {
                Some(bp) => {
                    current = bp.out_index;
                    if order.contains(&(current as usize)) {
                        return Err(Error::corrupt("cycle in folder bind pairs"));
                    }
                    order.push(current as usize);
                }
                None => break,
            }
        }
        if order.len() != self.coders.len() {
            return Err(Error::corrupt("disconnected coder in folder"));
        }
        order.reverse();
        self.ordered_coders = order;
        Ok(())
    }
}

/// Folder definitions from the unpack-info block.
#[derive(Debug, Clone, Default)]
pub struct UnpackInfo {
    /// Folders in declaration order.
    pub folders: Vec<Folder>,
}

impl UnpackInfo {
    /// Parses an UnpackInfo block. The buffer is positioned just after the
    /// `kUnpackInfo` tag.
    pub fn parse<R: Read + Seek>(
        b: &mut HeaderBuffer<R>,
        opts: &ReaderOptions,
    ) -> Result<Self> {
        let mut folders: Vec<Folder> = Vec::new();

        loop {
            match b.read_u8()? {
                property_id::END => break,

                property_id::FOLDER => {
                    let num_folders = b.read_uint64()?;
                    opts.check_allocation(num_folders.saturating_mul(60))?;
                    let external = b.read_u8()?;
                    if external != 0 {
                        return Err(Error::unsupported("external folder definitions"));
                    }
                    folders.reserve(capped(num_folders));
                    for _ in 0..num_folders {
                        folders.push(Folder::parse(b, opts)?);
                    }
                }

                property_id::CODERS_UNPACK_SIZE => {
                    for folder in &mut folders {
                        let count = folder.total_out_streams() as usize;
                        folder.unpack_sizes = Vec::with_capacity(count);
                        for _ in 0..count {
                            folder.unpack_sizes.push(b.read_uint64()?);
                        }
                    }
                }

                property_id::CRC => {
                    let defined = b.read_all_or_bits(folders.len())?;
                    for (folder, has_crc) in folders.iter_mut().zip(defined) {
                        if has_crc {
                            folder.unpack_crc = Some(b.read_u32()?);
                        }
                    }
                }

                other => {
                    return Err(Error::corrupt(format!(
                        "unexpected tag {other:#04x} in unpack info"
                    )));
                }
            }
        }

        for folder in &mut folders {
            folder.finish()?;
        }

        Ok(Self { folders })
    }

    /// Number of folders.
    pub fn num_folders(&self) -> usize {
        self.folders.len()
    }
}

/// Per-file stream information within folders.
#[derive(Debug, Clone, Default)]
pub struct SubStreamsInfo {
    /// Number of files carried by each folder's output.
    pub num_unpack_streams: Vec<u64>,
    /// Unpack size of every substream, across all folders in order.
    pub unpack_sizes: Vec<u64>,
    /// CRC-32 of every substream where known.
    pub digests: Vec<Option<u32>>,
}

impl SubStreamsInfo {
    /// Parses a SubStreamsInfo block against the already-parsed folders.
    pub fn parse<R: Read + Seek>(
        b: &mut HeaderBuffer<R>,
        folders: &mut [Folder],
        opts: &ReaderOptions,
    ) -> Result<Self> {
        let mut counts = vec![1u64; folders.len()];
        let mut unpack_sizes: Vec<u64> = Vec::new();
        let mut digests: Vec<Option<u32>> = Vec::new();
        let mut sizes_read = false;

        loop {
            match b.read_u8()? {
                property_id::END => break,

                property_id::NUM_UNPACK_STREAM => {
                    let mut total = 0u64;
                    for count in counts.iter_mut() {
                        *count = b.read_uint64()?;
                        total = total.saturating_add(*count);
                    }
                    if total > b.len().saturating_mul(8) {
                        return Err(Error::corrupt(
                            "substream count exceeds header size",
                        ));
                    }
                    opts.check_allocation(total.saturating_mul(12))?;
                }

                property_id::SIZE => {
                    sizes_read = true;
                    for (folder, &count) in folders.iter().zip(&counts) {
                        if count == 0 {
                            continue;
                        }
                        // The last size in each folder is implicit.
                        let folder_size = folder.unpack_size();
                        let mut consumed = 0u64;
                        for _ in 0..count - 1 {
                            let size = b.read_uint64()?;
                            consumed = consumed
                                .checked_add(size)
                                .ok_or_else(|| Error::corrupt("substream size overflow"))?;
                            if consumed > folder_size {
                                return Err(Error::corrupt(
                                    "substream sizes exceed folder size",
                                ));
                            }
                            unpack_sizes.push(size);
                        }
                        unpack_sizes.push(folder_size - consumed);
                    }
                }

                property_id::CRC => {
                    // Substreams covered by a folder CRC do not repeat it.
                    let mut wanted = 0usize;
                    for (folder, &count) in folders.iter().zip(&counts) {
                        if folder.unpack_crc.is_none() || count != 1 {
                            wanted += count as usize;
                        }
                    }
                    let defined = b.read_all_or_bits(wanted)?;
                    let mut defined_iter = defined.into_iter();
                    for (folder, &count) in folders.iter().zip(&counts) {
                        if folder.unpack_crc.is_some() && count == 1 {
                            digests.push(folder.unpack_crc);
                        } else {
                            for _ in 0..count {
                                let has_crc = defined_iter.next().unwrap_or(false);
                                digests
                                    .push(if has_crc { Some(b.read_u32()?) } else { None });
                            }
                        }
                    }
                }

                other => {
                    return Err(Error::corrupt(format!(
                        "unexpected tag {other:#04x} in substreams info"
                    )));
                }
            }
        }

        if !sizes_read {
            for (folder, &count) in folders.iter().zip(&counts) {
                match count {
                    0 => {}
                    1 => unpack_sizes.push(folder.unpack_size()),
                    _ => return Err(Error::corrupt("missing substream sizes")),
                }
            }
        }

        if digests.is_empty() {
            for (folder, &count) in folders.iter().zip(&counts) {
                if count == 1 {
                    digests.push(folder.unpack_crc);
                } else {
                    digests.extend(std::iter::repeat(None).take(count as usize));
                }
            }
        }

        for (folder, &count) in folders.iter_mut().zip(&counts) {
            folder.num_substreams = count;
        }

        Ok(Self {
            num_unpack_streams: counts,
            unpack_sizes,
            digests,
        })
    }

    /// Builds the implicit form used when the header omits the block: one
    /// substream per folder, inheriting the folder size and CRC.
    pub fn implicit(folders: &[Folder]) -> Self {
        Self {
            num_unpack_streams: vec![1; folders.len()],
            unpack_sizes: folders.iter().map(|f| f.unpack_size()).collect(),
            digests: folders.iter().map(|f| f.unpack_crc).collect(),
        }
    }

    /// Total number of substreams.
    pub fn total_streams(&self) -> u64 {
        self.num_unpack_streams.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::buffer::HeaderBuffer;
    use crate::format::reader::write_uint64;
    use std::io::Cursor;

    fn buffer(data: Vec<u8>) -> HeaderBuffer<Cursor<Vec<u8>>> {
        HeaderBuffer::from_vec(data)
    }

    fn uv(buf: &mut Vec<u8>, value: u64) {
        write_uint64(buf, value).unwrap();
    }

    #[test]
    fn test_pack_info_basic() {
        let mut data = Vec::new();
        uv(&mut data, 100); // pack_pos
        uv(&mut data, 2); // streams
        data.push(property_id::SIZE);
        uv(&mut data, 50);
        uv(&mut data, 75);
        data.push(property_id::END);

        let info = PackInfo::parse(&mut buffer(data), &ReaderOptions::default()).unwrap();
        assert_eq!(info.pack_pos, 100);
        assert_eq!(info.pack_sizes, [50, 75]);
        assert_eq!(info.total_packed_size(), 125);
        assert_eq!(info.pack_crcs, [None, None]);
    }

    #[test]
    fn test_pack_info_partial_crcs() {
        let mut data = Vec::new();
        uv(&mut data, 0);
        uv(&mut data, 3);
        data.push(property_id::SIZE);
        uv(&mut data, 10);
        uv(&mut data, 20);
        uv(&mut data, 30);
        data.push(property_id::CRC);
        data.push(0x00); // dense bitmap
        data.push(0b1010_0000);
        data.extend_from_slice(&0x11111111u32.to_le_bytes());
        data.extend_from_slice(&0x33333333u32.to_le_bytes());
        data.push(property_id::END);

        let info = PackInfo::parse(&mut buffer(data), &ReaderOptions::default()).unwrap();
        assert_eq!(
            info.pack_crcs,
            [Some(0x11111111), None, Some(0x33333333)]
        );
    }

    #[test]
    fn test_pack_info_missing_sizes_rejected() {
        let mut data = Vec::new();
        uv(&mut data, 0);
        uv(&mut data, 2);
        data.push(property_id::END);

        let err = PackInfo::parse(&mut buffer(data), &ReaderOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
    }

    #[test]
    fn test_pack_info_truncated_uvarint() {
        let data = vec![0x00, 0x80]; // pack_pos, then a uvarint cut mid-encoding
        let err = PackInfo::parse(&mut buffer(data), &ReaderOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
    }

    fn encode_single_coder_folder() -> Vec<u8> {
        let mut data = Vec::new();
        uv(&mut data, 1); // one coder
        data.push(0x21); // 1-byte id, has properties
        data.push(0x21); // LZMA2
        uv(&mut data, 1); // property size
        data.push(0x18); // dict-size byte
        data
    }

    #[test]
    fn test_folder_single_coder() {
        let data = encode_single_coder_folder();
        let mut folder = Folder::parse(&mut buffer(data), &ReaderOptions::default()).unwrap();
        assert_eq!(folder.coders.len(), 1);
        assert_eq!(folder.coders[0].method_id, [0x21]);
        assert_eq!(folder.packed_streams, [0]);
        folder.unpack_sizes = vec![1000];
        folder.finish().unwrap();
        assert_eq!(folder.ordered_coders, [0]);
        assert_eq!(folder.unpack_size(), 1000);
    }

    #[test]
    fn test_folder_chain_decode_order() {
        // Two coders: coder 0 output feeds coder 1 input; coder 0 reads the
        // packed stream, coder 1 produces the final output.
        let mut data = Vec::new();
        uv(&mut data, 2);
        data.push(0x01); // coder 0: 1-byte id, no properties
        data.push(0x00); // copy
        data.push(0x01); // coder 1: 1-byte id
        data.push(0x03); // delta
        uv(&mut data, 1); // bind pair: in_index=1 (coder 1 input)
        uv(&mut data, 0); // out_index=0 (coder 0 output)

        let mut folder = Folder::parse(&mut buffer(data), &ReaderOptions::default()).unwrap();
        assert_eq!(folder.packed_streams, [0]);
        folder.unpack_sizes = vec![500, 400];
        folder.finish().unwrap();
        assert_eq!(folder.ordered_coders, [0, 1]);
        assert_eq!(folder.final_output_index().unwrap(), 1);
        assert_eq!(folder.unpack_size(), 400);
    }

    #[test]
    fn test_folder_rejects_multi_stream_coder() {
        let mut data = Vec::new();
        uv(&mut data, 1);
        data.push(0x14); // 4-byte id, complex
        data.extend_from_slice(&[0x03, 0x03, 0x01, 0x1B]);
        uv(&mut data, 4); // inputs
        uv(&mut data, 1); // outputs

        let err = Folder::parse(&mut buffer(data), &ReaderOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn test_folder_rejects_alternate_methods() {
        let mut data = Vec::new();
        uv(&mut data, 1);
        data.push(0x81); // alternate flag
        data.push(0x00);

        let err = Folder::parse(&mut buffer(data), &ReaderOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn test_folder_rejects_zero_coders() {
        let mut data = Vec::new();
        uv(&mut data, 0);
        let err = Folder::parse(&mut buffer(data), &ReaderOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
    }

    #[test]
    fn test_folder_rejects_out_of_range_bind_pair() {
        let mut data = Vec::new();
        uv(&mut data, 2);
        data.push(0x01);
        data.push(0x00);
        data.push(0x01);
        data.push(0x03);
        uv(&mut data, 5); // in_index out of range
        uv(&mut data, 0);

        let err = Folder::parse(&mut buffer(data), &ReaderOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
    }

    fn test_folder(size: u64, crc: Option<u32>) -> Folder {
        Folder {
            coders: vec![Coder {
                method_id: vec![0x21],
                num_in_streams: 1,
                num_out_streams: 1,
                properties: None,
            }],
            bind_pairs: vec![],
            packed_streams: vec![0],
            unpack_sizes: vec![size],
            unpack_crc: crc,
            num_substreams: 1,
            ordered_coders: vec![0],
        }
    }

    #[test]
    fn test_unpack_info_roundtrip_fields() {
        let mut data = Vec::new();
        data.push(property_id::FOLDER);
        uv(&mut data, 1);
        data.push(0x00); // inline
        data.extend_from_slice(&encode_single_coder_folder());
        data.push(property_id::CODERS_UNPACK_SIZE);
        uv(&mut data, 1000);
        data.push(property_id::CRC);
        data.push(0x01); // all defined
        data.extend_from_slice(&0xDEADBEEFu32.to_le_bytes());
        data.push(property_id::END);

        let info = UnpackInfo::parse(&mut buffer(data), &ReaderOptions::default()).unwrap();
        assert_eq!(info.num_folders(), 1);
        assert_eq!(info.folders[0].unpack_sizes, [1000]);
        assert_eq!(info.folders[0].unpack_crc, Some(0xDEADBEEF));
        assert_eq!(info.folders[0].ordered_coders, [0]);
    }

    #[test]
    fn test_unpack_info_rejects_external() {
        let mut data = Vec::new();
        data.push(property_id::FOLDER);
        uv(&mut data, 1);
        data.push(0x01); // external
        let err = UnpackInfo::parse(&mut buffer(data), &ReaderOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn test_substreams_defaults() {
        let mut folders = vec![test_folder(1000, Some(7)), test_folder(2000, None)];
        let data = vec![property_id::END];
        let info =
            SubStreamsInfo::parse(&mut buffer(data), &mut folders, &ReaderOptions::default())
                .unwrap();
        assert_eq!(info.num_unpack_streams, [1, 1]);
        assert_eq!(info.unpack_sizes, [1000, 2000]);
        assert_eq!(info.digests, [Some(7), None]);
        assert_eq!(info.total_streams(), 2);
    }

    #[test]
    fn test_substreams_solid_folder_sizes() {
        let mut folders = vec![test_folder(1500, None), test_folder(500, None)];
        let mut data = Vec::new();
        data.push(property_id::NUM_UNPACK_STREAM);
        uv(&mut data, 2);
        uv(&mut data, 1);
        data.push(property_id::SIZE);
        uv(&mut data, 1000); // the 500 remainder is implicit
        data.push(property_id::END);

        let info =
            SubStreamsInfo::parse(&mut buffer(data), &mut folders, &ReaderOptions::default())
                .unwrap();
        assert_eq!(info.num_unpack_streams, [2, 1]);
        assert_eq!(info.unpack_sizes, [1000, 500, 500]);
        assert_eq!(folders[0].num_substreams, 2);
    }

    #[test]
    fn test_substreams_sizes_exceeding_folder_rejected() {
        let mut folders = vec![test_folder(100, None)];
        let mut data = Vec::new();
        data.push(property_id::NUM_UNPACK_STREAM);
        uv(&mut data, 2);
        data.push(property_id::SIZE);
        uv(&mut data, 300); // larger than the folder itself
        data.push(property_id::END);

        let err =
            SubStreamsInfo::parse(&mut buffer(data), &mut folders, &ReaderOptions::default())
                .unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
    }

    #[test]
    fn test_substreams_crc_inherits_folder_crc() {
        let mut folders = vec![test_folder(100, Some(0xAA)), test_folder(200, None)];
        let mut data = Vec::new();
        data.push(property_id::CRC);
        data.push(0x01); // all defined for the one stream still needing one
        data.extend_from_slice(&0xBBu32.to_le_bytes());
        data.push(property_id::END);

        let info =
            SubStreamsInfo::parse(&mut buffer(data), &mut folders, &ReaderOptions::default())
                .unwrap();
        assert_eq!(info.digests, [Some(0xAA), Some(0xBB)]);
    }
}

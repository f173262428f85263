//! First-pass header walk: sanity checks and statistics.
//!
//! Before any per-entry structure is materialized, the header tree is walked
//! once without building objects. The walk counts folders, coders, streams,
//! substreams and entries, validates the structural rules a later pass will
//! rely on, and keeps a running memory estimate that is checked against the
//! configured ceiling as each count is read. A hostile header claiming a
//! billion folders is rejected at the claim, not after the allocation.

use std::io::{Read, Seek};

use crate::options::ReaderOptions;
use crate::{Error, Result};

use super::buffer::HeaderBuffer;
use super::property_id;

/// Counters and bitmaps collected by the sanity pass.
#[derive(Debug, Clone, Default)]
pub struct HeaderStats {
    /// Number of pack streams (P).
    pub pack_streams: u64,
    /// Offset of the packed region relative to the end of the signature
    /// header.
    pub pack_pos: u64,
    /// Sum of all pack stream sizes.
    pub pack_total: u64,
    /// Number of folders (F).
    pub folders: u64,
    /// Number of coders (C).
    pub coders: u64,
    /// Total coder output streams (O).
    pub out_streams: u64,
    /// Total coder input streams (I).
    pub in_streams: u64,
    /// Number of file entries (E).
    pub entries: u64,
    /// Output-stream count per folder, needed to walk the size lists.
    pub folder_out_counts: Vec<u64>,
    /// Which folders advertise a CRC.
    pub folder_crcs: Vec<bool>,
    /// Substream count per folder; defaults to one each.
    pub substreams: Vec<u64>,
}

impl HeaderStats {
    /// Conservative estimate of the memory the materialized header will
    /// pin, in bytes.
    pub fn estimated_bytes(&self) -> u64 {
        let p = u128::from(self.pack_streams);
        let f = u128::from(self.folders);
        let c = u128::from(self.coders);
        let o = u128::from(self.out_streams);
        let i = u128::from(self.in_streams);
        let e = u128::from(self.entries);

        let estimate = 16 * p
            + p / 8
            + f * 30
            + c * 22
            + o.saturating_sub(f) * 16
            + 8 * (i + f).saturating_sub(o)
            + 8 * o
            + e * 100
            + 8 * f
            + 8 * p
            + 4 * e;
        u64::try_from(2 * estimate).unwrap_or(u64::MAX)
    }

    fn check_ceiling(&self, opts: &ReaderOptions) -> Result<()> {
        let needed_kib = self.estimated_bytes() / 1024;
        if needed_kib > opts.max_memory_limit_kib {
            return Err(Error::MemoryLimit {
                needed_kib,
                limit_kib: opts.max_memory_limit_kib,
            });
        }
        Ok(())
    }

    /// Total substream count across folders.
    pub fn total_substreams(&self) -> u64 {
        self.substreams.iter().sum()
    }
}

/// Largest value accepted where other implementations use signed sizes.
const MAX_SIZE: u64 = i64::MAX as u64;

/// Walks a full header. The buffer is positioned just after the `kHeader`
/// tag; `payload_len` is the size of the packed-streams region available in
/// the underlying source.
pub fn scan_header<R: Read + Seek>(
    b: &mut HeaderBuffer<R>,
    payload_len: u64,
    opts: &ReaderOptions,
) -> Result<HeaderStats> {
    let mut stats = HeaderStats::default();

    loop {
        match b.read_u8()? {
            property_id::END => break,

            property_id::ARCHIVE_PROPERTIES => skip_archive_properties(b)?,

            property_id::ADDITIONAL_STREAMS_INFO => {
                return Err(Error::unsupported("additional streams info"));
            }

            property_id::MAIN_STREAMS_INFO => {
                scan_streams_info(b, payload_len, opts, &mut stats)?;
            }

            property_id::FILES_INFO => scan_files_info(b, opts, &mut stats)?,

            property_id::START_POS => {
                return Err(Error::unsupported("start-pos property"));
            }

            other => {
                return Err(Error::corrupt(format!(
                    "unexpected tag {other:#04x} in header"
                )));
            }
        }
    }

    Ok(stats)
}

/// Walks a bare streams-info block, as found in an encoded header. The
/// buffer is positioned just after the `kEncodedHeader` tag.
pub fn scan_streams_info_block<R: Read + Seek>(
    b: &mut HeaderBuffer<R>,
    payload_len: u64,
    opts: &ReaderOptions,
) -> Result<HeaderStats> {
    let mut stats = HeaderStats::default();
    scan_streams_info(b, payload_len, opts, &mut stats)?;
    Ok(stats)
}

fn scan_streams_info<R: Read + Seek>(
    b: &mut HeaderBuffer<R>,
    payload_len: u64,
    opts: &ReaderOptions,
    stats: &mut HeaderStats,
) -> Result<()> {
    loop {
        match b.read_u8()? {
            property_id::END => break,

            property_id::PACK_INFO => scan_pack_info(b, payload_len, opts, stats)?,

            property_id::UNPACK_INFO => scan_unpack_info(b, opts, stats)?,

            property_id::SUBSTREAMS_INFO => scan_substreams_info(b, opts, stats)?,

            other => {
                return Err(Error::corrupt(format!(
                    "unexpected tag {other:#04x} in streams info"
                )));
            }
        }
    }

    // Every folder draws exactly one packed stream; reject a short supply.
    if stats.pack_streams < stats.folders {
        return Err(Error::corrupt(format!(
            "{} folders but only {} pack streams",
            stats.folders, stats.pack_streams
        )));
    }
    if stats.substreams.is_empty() && stats.folders > 0 {
        stats.substreams = vec![1; stats.folders as usize];
    }

    Ok(())
}

fn scan_pack_info<R: Read + Seek>(
    b: &mut HeaderBuffer<R>,
    payload_len: u64,
    opts: &ReaderOptions,
    stats: &mut HeaderStats,
) -> Result<()> {
    stats.pack_pos = b.read_uint64()?;
    if stats.pack_pos > payload_len {
        return Err(Error::corrupt("pack position past end of archive"));
    }

    stats.pack_streams = b.read_uint64()?;
    if stats.pack_streams > b.len().saturating_mul(8) {
        return Err(Error::corrupt("pack stream count exceeds header size"));
    }
    stats.check_ceiling(opts)?;

    loop {
        match b.read_u8()? {
            property_id::END => break,

            property_id::SIZE => {
                let mut total = 0u64;
                for _ in 0..stats.pack_streams {
                    let size = b.read_uint64()?;
                    if size > MAX_SIZE {
                        return Err(Error::corrupt("negative pack size"));
                    }
                    total = total
                        .checked_add(size)
                        .ok_or_else(|| Error::corrupt("pack sizes overflow"))?;
                }
                if stats.pack_pos.saturating_add(total) > payload_len {
                    return Err(Error::corrupt("pack streams past end of archive"));
                }
                stats.pack_total = total;
            }

            property_id::CRC => {
                let defined = b.read_all_or_bits(stats.pack_streams as usize)?;
                let count = defined.iter().filter(|&&d| d).count();
                b.skip(4 * count as u64)?;
            }

            other => {
                return Err(Error::corrupt(format!(
                    "unexpected tag {other:#04x} in pack info"
                )));
            }
        }
    }

    Ok(())
}

fn scan_unpack_info<R: Read + Seek>(
    b: &mut HeaderBuffer<R>,
    opts: &ReaderOptions,
    stats: &mut HeaderStats,
) -> Result<()> {
    loop {
        match b.read_u8()? {
            property_id::END => break,

            property_id::FOLDER => {
                let num_folders = b.read_uint64()?;
                stats.folders = num_folders;
                stats.check_ceiling(opts)?;

                let external = b.read_u8()?;
                if external != 0 {
                    return Err(Error::unsupported("external folder definitions"));
                }

                for _ in 0..num_folders {
                    scan_folder(b, opts, stats)?;
                }
            }

            property_id::CODERS_UNPACK_SIZE => {
                for &out_count in &stats.folder_out_counts {
                    for _ in 0..out_count {
                        if b.read_uint64()? > MAX_SIZE {
                            return Err(Error::corrupt("negative unpack size"));
                        }
                    }
                }
            }

            property_id::CRC => {
                stats.folder_crcs = b.read_all_or_bits(stats.folders as usize)?;
                let count = stats.folder_crcs.iter().filter(|&&d| d).count();
                b.skip(4 * count as u64)?;
            }

            other => {
                return Err(Error::corrupt(format!(
                    "unexpected tag {other:#04x} in unpack info"
                )));
            }
        }
    }

    Ok(())
}

fn scan_folder<R: Read + Seek>(
    b: &mut HeaderBuffer<R>,
    opts: &ReaderOptions,
    stats: &mut HeaderStats,
) -> Result<()> {
    let num_coders = b.read_uint64()?;
    if num_coders == 0 {
        return Err(Error::corrupt("folder with no coders"));
    }

    let mut total_in = 0u64;
    let mut total_out = 0u64;

    for _ in 0..num_coders {
        let flags = b.read_u8()?;
        if flags & 0x80 != 0 {
            return Err(Error::unsupported("alternate coder methods"));
        }
        let id_size = u64::from(flags & 0x0F);
        if id_size == 0 {
            return Err(Error::corrupt("empty coder method id"));
        }
        b.skip(id_size)?;

        let (ins, outs) = if flags & 0x10 != 0 {
            (b.read_uint64()?, b.read_uint64()?)
        } else {
            (1, 1)
        };
        if ins != 1 || outs != 1 {
            return Err(Error::unsupported(format!(
                "coder with {ins} inputs and {outs} outputs"
            )));
        }
        total_in += ins;
        total_out += outs;

        if flags & 0x20 != 0 {
            let props_size = b.read_uint64()?;
            if props_size > b.remaining() {
                return Err(Error::corrupt("coder properties exceed header"));
            }
            b.skip(props_size)?;
        }
    }

    if total_out == 0 {
        return Err(Error::corrupt("folder with no outputs"));
    }

    let num_bind_pairs = total_out - 1;
    for _ in 0..num_bind_pairs {
        let in_index = b.read_uint64()?;
        let out_index = b.read_uint64()?;
        if in_index >= total_in || out_index >= total_out {
            return Err(Error::corrupt("bind pair index out of range"));
        }
    }

    let num_packed = total_in - num_bind_pairs;
    if num_packed == 0 {
        return Err(Error::corrupt("folder draws no packed streams"));
    }
    if num_packed > 1 {
        for _ in 0..num_packed {
            if b.read_uint64()? >= total_in {
                return Err(Error::corrupt("packed stream index out of range"));
            }
        }
    }

    stats.coders += num_coders;
    stats.in_streams += total_in;
    stats.out_streams += total_out;
    stats.folder_out_counts.push(total_out);
    stats.check_ceiling(opts)?;

    Ok(())
}

fn scan_substreams_info<R: Read + Seek>(
    b: &mut HeaderBuffer<R>,
    opts: &ReaderOptions,
    stats: &mut HeaderStats,
) -> Result<()> {
    let folders = stats.folders as usize;
    let mut counts = vec![1u64; folders];

    loop {
        match b.read_u8()? {
            property_id::END => break,

            property_id::NUM_UNPACK_STREAM => {
                let mut total = 0u64;
                for count in counts.iter_mut() {
                    *count = b.read_uint64()?;
                    total = total.saturating_add(*count);
                }
                // A header of L bytes cannot describe more than 8L streams.
                if total > b.len().saturating_mul(8) {
                    return Err(Error::corrupt("substream count exceeds header size"));
                }
                opts.check_allocation(total.saturating_mul(12))?;
            }

            property_id::SIZE => {
                for &count in &counts {
                    for _ in 0..count.saturating_sub(1) {
                        if b.read_uint64()? > MAX_SIZE {
                            return Err(Error::corrupt("negative substream size"));
                        }
                    }
                }
            }

            property_id::CRC => {
                let mut wanted = 0usize;
                for (idx, &count) in counts.iter().enumerate() {
                    let folder_has_crc =
                        stats.folder_crcs.get(idx).copied().unwrap_or(false);
                    if !folder_has_crc || count != 1 {
                        wanted += count as usize;
                    }
                }
                let defined = b.read_all_or_bits(wanted)?;
                let present = defined.iter().filter(|&&d| d).count();
                b.skip(4 * present as u64)?;
            }

            other => {
                return Err(Error::corrupt(format!(
                    "unexpected tag {other:#04x} in substreams info"
                )));
            }
        }
    }

    stats.substreams = counts;
    Ok(())
}

fn scan_files_info<R: Read + Seek>(
    b: &mut HeaderBuffer<R>,
    opts: &ReaderOptions,
    stats: &mut HeaderStats,
) -> Result<()> {
    stats.entries = b.read_uint64()?;
    stats.check_ceiling(opts)?;
    // A header of L bytes cannot describe more than 8L entries.
    if stats.entries > b.len().saturating_mul(8) {
        return Err(Error::corrupt("file count exceeds header size"));
    }
    let num_files = usize::try_from(stats.entries)
        .map_err(|_| Error::corrupt("file count out of range"))?;

    let mut empty_count: Option<usize> = None;

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
            property_id::NAME => {
                if size % 2 != 1 {
                    return Err(Error::corrupt("name block has even size"));
                }
            }

            property_id::EMPTY_STREAM => {
                let bits = b.read_bits(num_files)?;
                empty_count = Some(bits.iter().filter(|&&e| e).count());
            }

            property_id::EMPTY_FILE | property_id::ANTI => {
                let empties = empty_count.ok_or_else(|| {
                    Error::corrupt("bitmap appears before the empty-stream bitmap")
                })?;
                if size < (empties as u64).div_ceil(8) {
                    return Err(Error::corrupt("bitmap shorter than its entry count"));
                }
            }

            property_id::START_POS => {
                return Err(Error::unsupported("start-pos property"));
            }

            _ => {}
        }

        b.skip_to(end)?;
    }

    Ok(())
}

fn skip_archive_properties<R: Read + Seek>(b: &mut HeaderBuffer<R>) -> Result<()> {
    loop {
        let prop = b.read_u8()?;
        if prop == property_id::END {
            return Ok(());
        }
        let size = b.read_uint64()?;
        b.skip(size)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::reader::write_uint64;
    use std::io::Cursor;

    fn buffer(data: Vec<u8>) -> HeaderBuffer<Cursor<Vec<u8>>> {
        HeaderBuffer::from_vec(data)
    }

    fn uv(buf: &mut Vec<u8>, value: u64) {
        write_uint64(buf, value).unwrap();
    }

    fn minimal_streams_info(pack_size: u64, unpack_size: u64) -> Vec<u8> {
        let mut data = Vec::new();
        data.push(property_id::PACK_INFO);
        uv(&mut data, 0); // pack_pos
        uv(&mut data, 1); // one stream
        data.push(property_id::SIZE);
        uv(&mut data, pack_size);
        data.push(property_id::END);

        data.push(property_id::UNPACK_INFO);
        data.push(property_id::FOLDER);
        uv(&mut data, 1);
        data.push(0x00); // inline
        uv(&mut data, 1); // one coder
        data.push(0x01); // 1-byte id, simple
        data.push(0x00); // copy
        data.push(property_id::CODERS_UNPACK_SIZE);
        uv(&mut data, unpack_size);
        data.push(property_id::END);

        data.push(property_id::END);
        data
    }

    #[test]
    fn test_scan_counts() {
        let mut data = Vec::new();
        data.push(property_id::MAIN_STREAMS_INFO);
        data.extend_from_slice(&minimal_streams_info(100, 300));

        data.push(property_id::FILES_INFO);
        uv(&mut data, 1);
        data.push(property_id::END);

        data.push(property_id::END);

        let stats =
            scan_header(&mut buffer(data), 1000, &ReaderOptions::default()).unwrap();
        assert_eq!(stats.pack_streams, 1);
        assert_eq!(stats.folders, 1);
        assert_eq!(stats.coders, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.substreams, [1]);
    }

    #[test]
    fn test_additional_streams_rejected() {
        let data = vec![property_id::ADDITIONAL_STREAMS_INFO];
        let err = scan_header(&mut buffer(data), 0, &ReaderOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn test_pack_region_bounds_checked() {
        let mut data = Vec::new();
        data.push(property_id::MAIN_STREAMS_INFO);
        data.extend_from_slice(&minimal_streams_info(500, 300));
        data.push(property_id::END);

        // Payload is only 100 bytes; the pack stream claims 500.
        let err = scan_header(&mut buffer(data), 100, &ReaderOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
    }

    #[test]
    fn test_folder_demand_exceeds_pack_supply() {
        let mut data = Vec::new();
        data.push(property_id::MAIN_STREAMS_INFO);
        // Pack info: zero streams.
        data.push(property_id::PACK_INFO);
        uv(&mut data, 0);
        uv(&mut data, 0);
        data.push(property_id::END);
        // One folder, which needs one packed stream.
        data.push(property_id::UNPACK_INFO);
        data.push(property_id::FOLDER);
        uv(&mut data, 1);
        data.push(0x00);
        uv(&mut data, 1);
        data.push(0x01);
        data.push(0x00);
        data.push(property_id::CODERS_UNPACK_SIZE);
        uv(&mut data, 10);
        data.push(property_id::END);
        data.push(property_id::END);
        data.push(property_id::END);

        let err = scan_header(&mut buffer(data), 1000, &ReaderOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
    }

    #[test]
    fn test_huge_folder_claim_hits_memory_ceiling() {
        let mut data = Vec::new();
        data.push(property_id::MAIN_STREAMS_INFO);
        data.push(property_id::PACK_INFO);
        uv(&mut data, 0);
        uv(&mut data, 1);
        data.push(property_id::SIZE);
        uv(&mut data, 10);
        data.push(property_id::END);
        data.push(property_id::UNPACK_INFO);
        data.push(property_id::FOLDER);
        uv(&mut data, 1 << 30); // a billion folders
        data.push(0x00);

        let opts = ReaderOptions::new().max_memory_limit_kib(64).unwrap();
        let err = scan_header(&mut buffer(data), u64::MAX, &opts).unwrap_err();
        assert!(matches!(err, Error::MemoryLimit { .. }));
    }

    #[test]
    fn test_huge_folder_claim_without_ceiling_is_corrupt() {
        let mut data = Vec::new();
        data.push(property_id::MAIN_STREAMS_INFO);
        data.push(property_id::PACK_INFO);
        uv(&mut data, 0);
        uv(&mut data, 1);
        data.push(property_id::SIZE);
        uv(&mut data, 10);
        data.push(property_id::END);
        data.push(property_id::UNPACK_INFO);
        data.push(property_id::FOLDER);
        uv(&mut data, 1 << 30);
        data.push(0x00);
        // The folder records never arrive; the walk runs out of bytes.

        let err =
            scan_header(&mut buffer(data), u64::MAX, &ReaderOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
    }

    #[test]
    fn test_archive_properties_skipped() {
        let mut data = Vec::new();
        data.push(property_id::ARCHIVE_PROPERTIES);
        data.push(0x30); // some property type
        uv(&mut data, 2);
        data.extend_from_slice(&[0xAA, 0xBB]);
        data.push(property_id::END); // end of archive properties
        data.push(property_id::END); // end of header

        let stats = scan_header(&mut buffer(data), 0, &ReaderOptions::default()).unwrap();
        assert_eq!(stats.entries, 0);
    }

    #[test]
    fn test_start_pos_rejected() {
        let data = vec![property_id::START_POS];
        let err = scan_header(&mut buffer(data), 0, &ReaderOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn test_estimate_formula() {
        let stats = HeaderStats {
            pack_streams: 2,
            folders: 2,
            coders: 2,
            out_streams: 2,
            in_streams: 2,
            entries: 3,
            ..Default::default()
        };
        // 2*(16*2 + 0 + 60 + 44 + 0 + 16 + 16 + 300 + 16 + 16 + 12) = 2*512
        assert_eq!(stats.estimated_bytes(), 1024);
    }
}

//! Header serialization: the NID grammar, written back out.

use crate::format::property_id;
use crate::format::reader::{write_all_or_bits, write_bits, write_uint64};
use crate::timestamp::Timestamp;
use crate::Result;

use super::{CoderRecord, EntryRecord};

fn uv(out: &mut Vec<u8>, value: u64) -> Result<()> {
    write_uint64(out, value)?;
    Ok(())
}

/// Appends a self-delimiting files-info property: tag, size, body.
fn push_sized_property(out: &mut Vec<u8>, tag: u8, body: &[u8]) -> Result<()> {
    out.push(tag);
    uv(out, body.len() as u64)?;
    out.extend_from_slice(body);
    Ok(())
}

/// Serializes the complete plain header for the recorded entries.
pub(crate) fn serialize_header(entries: &[EntryRecord]) -> Result<Vec<u8>> {
    let mut header = vec![property_id::HEADER];

    let stream_entries: Vec<&EntryRecord> =
        entries.iter().filter(|e| e.has_stream).collect();

    header.push(property_id::MAIN_STREAMS_INFO);
    if !stream_entries.is_empty() {
        header.push(property_id::PACK_INFO);
        uv(&mut header, 0)?; // pack_pos: content streams start the region
        uv(&mut header, stream_entries.len() as u64)?;
        header.push(property_id::SIZE);
        for entry in &stream_entries {
            uv(&mut header, entry.pack_size)?;
        }
        header.push(property_id::END);

        header.push(property_id::UNPACK_INFO);
        header.push(property_id::FOLDER);
        uv(&mut header, stream_entries.len() as u64)?;
        header.push(0); // folders inline
        for entry in &stream_entries {
            write_folder(&mut header, &entry.coders)?;
        }
        header.push(property_id::CODERS_UNPACK_SIZE);
        for entry in &stream_entries {
            for coder in &entry.coders {
                uv(&mut header, coder.unpack_size)?;
            }
        }
        header.push(property_id::CRC);
        header.push(1); // every folder output has a digest
        for entry in &stream_entries {
            header.extend_from_slice(&entry.crc.to_le_bytes());
        }
        header.push(property_id::END);

        // One substream per folder and a folder CRC for each: the
        // substreams block would carry no information.
    }
    header.push(property_id::END);

    serialize_files_info(&mut header, entries)?;

    header.push(property_id::END);
    Ok(header)
}

/// Serializes one folder definition: its coders in decode order, chained
/// with one bind pair per adjacent pair. The single external input needs no
/// explicit packed-stream index.
fn write_folder(out: &mut Vec<u8>, coders: &[CoderRecord]) -> Result<()> {
    uv(out, coders.len() as u64)?;

    for coder in coders {
        let mut flags = coder.method_id.len() as u8;
        if !coder.properties.is_empty() {
            flags |= 0x20;
        }
        out.push(flags);
        out.extend_from_slice(&coder.method_id);
        if !coder.properties.is_empty() {
            uv(out, coder.properties.len() as u64)?;
            out.extend_from_slice(&coder.properties);
        }
    }

    // Bind pairs: coder i consumes coder i-1's output.
    for i in 1..coders.len() as u64 {
        uv(out, i)?; // in_index
        uv(out, i - 1)?; // out_index
    }

    Ok(())
}

fn serialize_files_info(header: &mut Vec<u8>, entries: &[EntryRecord]) -> Result<()> {
    header.push(property_id::FILES_INFO);
    uv(header, entries.len() as u64)?;

    if !entries.is_empty() {
        let empties: Vec<bool> = entries.iter().map(|e| !e.has_stream).collect();
        if empties.iter().any(|&e| e) {
            let mut body = Vec::new();
            write_bits(&mut body, &empties)?;
            push_sized_property(header, property_id::EMPTY_STREAM, &body)?;

            let empty_files: Vec<bool> = entries
                .iter()
                .filter(|e| !e.has_stream)
                .map(|e| !e.meta.is_directory)
                .collect();
            if empty_files.iter().any(|&f| f) {
                let mut body = Vec::new();
                write_bits(&mut body, &empty_files)?;
                push_sized_property(header, property_id::EMPTY_FILE, &body)?;
            }

            let anti: Vec<bool> = entries
                .iter()
                .filter(|e| !e.has_stream)
                .map(|e| e.meta.is_anti)
                .collect();
            if anti.iter().any(|&a| a) {
                let mut body = Vec::new();
                write_bits(&mut body, &anti)?;
                push_sized_property(header, property_id::ANTI, &body)?;
            }
        }

        let mut names = vec![0u8]; // inline
        for entry in entries {
            for unit in entry.meta.name.encode_utf16() {
                names.extend_from_slice(&unit.to_le_bytes());
            }
            names.extend_from_slice(&[0, 0]);
        }
        push_sized_property(header, property_id::NAME, &names)?;

        write_times(header, entries, property_id::CTIME, |e| e.meta.ctime)?;
        write_times(header, entries, property_id::ATIME, |e| e.meta.atime)?;
        write_times(header, entries, property_id::MTIME, |e| e.meta.mtime)?;

        let has_attrs: Vec<bool> =
            entries.iter().map(|e| e.meta.attributes.is_some()).collect();
        if has_attrs.iter().any(|&a| a) {
            let mut body = Vec::new();
            write_all_or_bits(&mut body, &has_attrs)?;
            body.push(0); // inline
            for entry in entries {
                if let Some(attrs) = entry.meta.attributes {
                    body.extend_from_slice(&attrs.to_le_bytes());
                }
            }
            push_sized_property(header, property_id::WIN_ATTRIBUTES, &body)?;
        }
    }

    header.push(property_id::END);
    Ok(())
}

fn write_times(
    header: &mut Vec<u8>,
    entries: &[EntryRecord],
    tag: u8,
    get: impl Fn(&EntryRecord) -> Option<Timestamp>,
) -> Result<()> {
    let defined: Vec<bool> = entries.iter().map(|e| get(e).is_some()).collect();
    if !defined.iter().any(|&d| d) {
        return Ok(());
    }

    let mut body = Vec::new();
    write_all_or_bits(&mut body, &defined)?;
    body.push(0); // inline
    for entry in entries {
        if let Some(time) = get(entry) {
            body.extend_from_slice(&time.as_ntfs().to_le_bytes());
        }
    }
    push_sized_property(header, tag, &body)
}

/// Serializes the `kEncodedHeader` block: a single-folder streams-info
/// locating and describing the encoded header stream.
pub(crate) fn serialize_encoded_header_block(
    stream_pos: u64,
    pack_size: u64,
    coders: &[CoderRecord],
    header_crc: u32,
) -> Result<Vec<u8>> {
    let mut block = vec![property_id::ENCODED_HEADER];

    block.push(property_id::PACK_INFO);
    uv(&mut block, stream_pos)?;
    uv(&mut block, 1)?;
    block.push(property_id::SIZE);
    uv(&mut block, pack_size)?;
    block.push(property_id::END);

    block.push(property_id::UNPACK_INFO);
    block.push(property_id::FOLDER);
    uv(&mut block, 1)?;
    block.push(0); // inline
    write_folder(&mut block, coders)?;
    block.push(property_id::CODERS_UNPACK_SIZE);
    for coder in coders {
        uv(&mut block, coder.unpack_size)?;
    }
    block.push(property_id::CRC);
    block.push(1);
    block.extend_from_slice(&header_crc.to_le_bytes());
    block.push(property_id::END);

    block.push(property_id::END);
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::write::NewEntry;

    fn stream_record(name: &str, data: &[u8]) -> EntryRecord {
        EntryRecord {
            meta: NewEntry::file(name),
            has_stream: true,
            size: data.len() as u64,
            crc: crc32fast::hash(data),
            pack_size: data.len() as u64,
            coders: vec![CoderRecord {
                method_id: crate::codec::method::COPY.to_vec(),
                properties: Vec::new(),
                unpack_size: data.len() as u64,
            }],
        }
    }

    #[test]
    fn test_empty_header_bytes() {
        let header = serialize_header(&[]).unwrap();
        assert_eq!(header, [0x01, 0x04, 0x00, 0x05, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_single_entry_header_parses_back() {
        use crate::format::buffer::HeaderBuffer;
        use crate::options::ReaderOptions;
        use std::io::Cursor;

        let record = stream_record("a.txt", b"hello\n");
        let header = serialize_header(&[record]).unwrap();

        // The serialized grammar must survive our own pass A.
        let mut b = HeaderBuffer::<Cursor<Vec<u8>>>::from_vec(header.clone());
        b.skip(1).unwrap();
        let stats =
            crate::format::stats::scan_header(&mut b, 1000, &ReaderOptions::default())
                .unwrap();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.folders, 1);
    }

    #[test]
    fn test_directory_and_file_bitmaps() {
        let dir = EntryRecord {
            meta: NewEntry::directory("d"),
            has_stream: false,
            size: 0,
            crc: 0,
            pack_size: 0,
            coders: Vec::new(),
        };
        let file = stream_record("f", b"x");
        let header = serialize_header(&[dir, file]).unwrap();

        // kEmptyStream must be present with the first entry marked.
        let pos = header
            .iter()
            .position(|&b| b == property_id::EMPTY_STREAM)
            .unwrap();
        // tag, size (1), bitmap byte with MSB set
        assert_eq!(header[pos + 1], 1);
        assert_eq!(header[pos + 2] & 0b1000_0000, 0b1000_0000);
    }

    #[test]
    fn test_encoded_block_shape() {
        let coder = CoderRecord {
            method_id: crate::codec::method::LZMA2.to_vec(),
            properties: vec![0x18],
            unpack_size: 100,
        };
        let block = serialize_encoded_header_block(50, 40, &[coder], 0xABCD).unwrap();
        assert_eq!(block[0], property_id::ENCODED_HEADER);
        assert_eq!(block[1], property_id::PACK_INFO);
        assert_eq!(*block.last().unwrap(), property_id::END);
    }
}

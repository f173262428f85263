//! The parsed archive model and the derived stream map.

use crate::Result;

use super::files::FileEntry;
use super::streams::{Folder, PackInfo, SubStreamsInfo};

/// Everything the header describes, immutable once built.
#[derive(Debug, Clone, Default)]
pub struct Archive {
    /// Offset of the packed region relative to the end of the signature
    /// header.
    pub pack_pos: u64,
    /// Size of each pack stream.
    pub pack_sizes: Vec<u64>,
    /// Optional CRC-32 per pack stream.
    pub pack_crcs: Vec<Option<u32>>,
    /// Folders in declaration order.
    pub folders: Vec<Folder>,
    /// Per-substream sizes and digests.
    pub substreams: SubStreamsInfo,
    /// File entries in declaration order.
    pub entries: Vec<FileEntry>,
    /// Index structures derived from the above.
    pub stream_map: StreamMap,
}

impl Archive {
    /// Assembles the model and derives the stream map.
    pub fn assemble(
        pack_info: PackInfo,
        folders: Vec<Folder>,
        substreams: SubStreamsInfo,
        entries: Vec<FileEntry>,
    ) -> Result<Self> {
        let stream_map = StreamMap::build(&pack_info, &folders, &entries);
        Ok(Self {
            pack_pos: pack_info.pack_pos,
            pack_sizes: pack_info.pack_sizes,
            pack_crcs: pack_info.pack_crcs,
            folders,
            substreams,
            entries,
            stream_map,
        })
    }

    /// Number of file entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the archive holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up an entry index by exact name.
    pub fn entry_index_by_name(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    /// Absolute offset of a folder's first pack stream, given the position
    /// where the packed region begins in the file.
    pub fn folder_pack_offset(&self, folder_index: usize) -> u64 {
        let first = self.stream_map.folder_first_pack_stream[folder_index];
        self.pack_pos + self.stream_map.pack_stream_offsets[first]
    }
}

/// Index arrays tying entries, folders and pack streams together.
#[derive(Debug, Clone, Default)]
pub struct StreamMap {
    /// Index of each folder's first pack stream: the prefix sum of
    /// per-folder pack-stream counts.
    pub folder_first_pack_stream: Vec<usize>,
    /// Byte offset of each pack stream within the packed region.
    pub pack_stream_offsets: Vec<u64>,
    /// Index of the first entry carried by each folder, where any.
    pub folder_first_entry: Vec<Option<usize>>,
    /// Folder carrying each entry; `None` for entries with no stream that
    /// precede any folder content.
    pub entry_folder: Vec<Option<usize>>,
}

impl StreamMap {
    /// Derives the map from parsed structures.
    pub fn build(pack_info: &PackInfo, folders: &[Folder], entries: &[FileEntry]) -> Self {
        let mut folder_first_pack_stream = Vec::with_capacity(folders.len());
        let mut next_pack = 0usize;
        for folder in folders {
            folder_first_pack_stream.push(next_pack);
            next_pack += folder.packed_streams.len();
        }

        let mut pack_stream_offsets = Vec::with_capacity(pack_info.pack_sizes.len());
        let mut offset = 0u64;
        for &size in &pack_info.pack_sizes {
            pack_stream_offsets.push(offset);
            offset += size;
        }

        let mut folder_first_entry = vec![None; folders.len()];
        let mut entry_folder = Vec::with_capacity(entries.len());

        // Walk entries in order, assigning stream-bearing entries to folders
        // until each folder's substream quota is spent. A streamless entry
        // inside a folder's run still belongs to that folder; one before any
        // folder content belongs to none.
        let mut folder_index: Option<usize> = None;
        let mut remaining = 0u64;
        let mut next_folder = 0usize;

        for (i, entry) in entries.iter().enumerate() {
            if entry.has_stream {
                if remaining == 0 {
                    folder_index = None;
                    while next_folder < folders.len() {
                        let quota = folders[next_folder].num_substreams;
                        if quota > 0 {
                            folder_index = Some(next_folder);
                            remaining = quota;
                            folder_first_entry[next_folder] = Some(i);
                            next_folder += 1;
                            break;
                        }
                        next_folder += 1;
                    }
                }
                entry_folder.push(folder_index);
                remaining = remaining.saturating_sub(1);
            } else {
                entry_folder.push(if remaining > 0 { folder_index } else { None });
            }
        }

        Self {
            folder_first_pack_stream,
            pack_stream_offsets,
            folder_first_entry,
            entry_folder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::streams::Coder;

    fn folder(substreams: u64, packed: usize) -> Folder {
        Folder {
            coders: vec![Coder {
                method_id: vec![0x00],
                num_in_streams: 1,
                num_out_streams: 1,
                properties: None,
            }],
            bind_pairs: vec![],
            packed_streams: (0..packed as u64).collect(),
            unpack_sizes: vec![100],
            unpack_crc: None,
            num_substreams: substreams,
            ordered_coders: vec![0],
        }
    }

    fn entry(name: &str, has_stream: bool) -> FileEntry {
        FileEntry {
            name: name.into(),
            has_stream,
            is_directory: !has_stream,
            ..Default::default()
        }
    }

    #[test]
    fn test_pack_prefix_sums() {
        let pack_info = PackInfo {
            pack_pos: 0,
            pack_sizes: vec![10, 20, 30],
            pack_crcs: vec![None; 3],
        };
        let folders = vec![folder(1, 1), folder(1, 2)];
        let entries = vec![entry("a", true), entry("b", true)];

        let map = StreamMap::build(&pack_info, &folders, &entries);
        assert_eq!(map.folder_first_pack_stream, [0, 1]);
        assert_eq!(map.pack_stream_offsets, [0, 10, 30]);
    }

    #[test]
    fn test_entry_folder_assignment_solid() {
        let pack_info = PackInfo {
            pack_pos: 0,
            pack_sizes: vec![10, 20],
            pack_crcs: vec![None; 2],
        };
        // First folder carries two files, second folder one.
        let folders = vec![folder(2, 1), folder(1, 1)];
        let entries = vec![
            entry("dir", false), // before any folder content
            entry("a", true),
            entry("mid", false), // inside folder 0's run
            entry("b", true),
            entry("c", true),
            entry("tail", false), // after all quotas are spent
        ];

        let map = StreamMap::build(&pack_info, &folders, &entries);
        assert_eq!(
            map.entry_folder,
            [None, Some(0), Some(0), Some(0), Some(1), None]
        );
        assert_eq!(map.folder_first_entry, [Some(1), Some(4)]);
    }

    #[test]
    fn test_zero_quota_folder_skipped() {
        let pack_info = PackInfo {
            pack_pos: 0,
            pack_sizes: vec![10, 20],
            pack_crcs: vec![None; 2],
        };
        let folders = vec![folder(0, 1), folder(1, 1)];
        let entries = vec![entry("a", true)];

        let map = StreamMap::build(&pack_info, &folders, &entries);
        assert_eq!(map.entry_folder, [Some(1)]);
        assert_eq!(map.folder_first_entry, [None, Some(0)]);
    }

    #[test]
    fn test_folder_pack_offset() {
        let pack_info = PackInfo {
            pack_pos: 7,
            pack_sizes: vec![10, 20],
            pack_crcs: vec![None; 2],
        };
        let folders = vec![folder(1, 1), folder(1, 1)];
        let entries = vec![entry("a", true), entry("b", true)];
        let archive = Archive::assemble(
            pack_info,
            folders,
            SubStreamsInfo::default(),
            entries,
        )
        .unwrap();

        assert_eq!(archive.folder_pack_offset(0), 7);
        assert_eq!(archive.folder_pack_offset(1), 17);
    }
}

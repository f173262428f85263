//! The 32-byte signature header at the start of every 7z archive.

use std::io::{Read, Write};

use crate::{Error, Result};

use super::reader::{read_u32_le, read_u64_le, read_u8};
use super::{SIGNATURE, VERSION_MAJOR, VERSION_MINOR};

/// Integrity verdict for a parsed start header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartHeaderIntegrity {
    /// The stored CRC matches the 20 bytes it covers.
    Valid,
    /// The stored CRC and all 20 covered bytes are zero. The archive was
    /// probably truncated or wiped mid-write; recovery may be attempted.
    ZeroedOut,
    /// The stored CRC does not match.
    Mismatch {
        /// CRC stored in the file.
        stored: u32,
        /// CRC computed over the covered bytes.
        computed: u32,
    },
}

/// The start header: locates and checksums the "next header" at the end of
/// the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartHeader {
    /// Format version, major part.
    pub version_major: u8,
    /// Format version, minor part.
    pub version_minor: u8,
    /// Offset of the next header, relative to the end of the signature
    /// header.
    pub next_header_offset: u64,
    /// Size of the next header in bytes.
    pub next_header_size: u64,
    /// CRC-32 of the next header bytes.
    pub next_header_crc: u32,
}

impl StartHeader {
    /// Parses the signature header from the start of `r`.
    ///
    /// Validates the magic and the major version, then reads the start
    /// header fields. CRC verification is reported, not enforced, so the
    /// caller can route a zeroed-out header into the recovery scan.
    pub fn parse<R: Read>(r: &mut R) -> Result<(Self, StartHeaderIntegrity)> {
        let mut magic = [0u8; 6];
        r.read_exact(&mut magic)
            .map_err(|_| Error::BadSignature("file shorter than the 7z magic".into()))?;
        if magic != *SIGNATURE {
            return Err(Error::BadSignature(format!(
                "bad magic {:02x?}",
                magic
            )));
        }

        let version_major = read_u8(r)?;
        let version_minor = read_u8(r)?;
        if version_major != VERSION_MAJOR {
            return Err(Error::BadSignature(format!(
                "unsupported major version {version_major}"
            )));
        }

        let stored_crc = read_u32_le(r)?;

        let mut covered = [0u8; 20];
        r.read_exact(&mut covered)
            .map_err(|_| Error::corrupt("truncated start header"))?;
        let computed_crc = crc32fast::hash(&covered);

        let integrity = if computed_crc == stored_crc {
            StartHeaderIntegrity::Valid
        } else if stored_crc == 0 && covered.iter().all(|&b| b == 0) {
            StartHeaderIntegrity::ZeroedOut
        } else {
            StartHeaderIntegrity::Mismatch {
                stored: stored_crc,
                computed: computed_crc,
            }
        };

        let mut fields = &covered[..];
        let next_header_offset = read_u64_le(&mut fields)?;
        let next_header_size = read_u64_le(&mut fields)?;
        let next_header_crc = read_u32_le(&mut fields)?;

        Ok((
            Self {
                version_major,
                version_minor,
                next_header_offset,
                next_header_size,
                next_header_crc,
            },
            integrity,
        ))
    }

    /// Absolute byte position where the next header begins.
    pub fn next_header_position(&self) -> u64 {
        super::SIGNATURE_HEADER_SIZE + self.next_header_offset
    }

    /// Serializes a complete 32-byte signature header.
    ///
    /// The start-header CRC covers the 20 bytes that follow it.
    pub fn write<W: Write>(
        w: &mut W,
        next_header_offset: u64,
        next_header_size: u64,
        next_header_crc: u32,
    ) -> Result<()> {
        let mut covered = [0u8; 20];
        covered[0..8].copy_from_slice(&next_header_offset.to_le_bytes());
        covered[8..16].copy_from_slice(&next_header_size.to_le_bytes());
        covered[16..20].copy_from_slice(&next_header_crc.to_le_bytes());

        w.write_all(SIGNATURE)?;
        w.write_all(&[VERSION_MAJOR, VERSION_MINOR])?;
        w.write_all(&crc32fast::hash(&covered).to_le_bytes())?;
        w.write_all(&covered)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn build_header(offset: u64, size: u64, crc: u32) -> Vec<u8> {
        let mut data = Vec::new();
        StartHeader::write(&mut data, offset, size, crc).unwrap();
        data
    }

    #[test]
    fn test_roundtrip() {
        let data = build_header(100, 50, 0xDEADBEEF);
        assert_eq!(data.len(), 32);

        let (header, integrity) = StartHeader::parse(&mut Cursor::new(&data)).unwrap();
        assert_eq!(integrity, StartHeaderIntegrity::Valid);
        assert_eq!(header.version_major, 0);
        assert_eq!(header.version_minor, 2);
        assert_eq!(header.next_header_offset, 100);
        assert_eq!(header.next_header_size, 50);
        assert_eq!(header.next_header_crc, 0xDEADBEEF);
        assert_eq!(header.next_header_position(), 132);
    }

    #[test]
    fn test_bad_magic() {
        let mut data = build_header(0, 0, 0);
        data[0] = 0x50;
        let err = StartHeader::parse(&mut Cursor::new(&data)).unwrap_err();
        assert!(matches!(err, Error::BadSignature(_)));
    }

    #[test]
    fn test_unsupported_major_version() {
        let mut data = build_header(0, 0, 0);
        data[6] = 1;
        let err = StartHeader::parse(&mut Cursor::new(&data)).unwrap_err();
        assert!(matches!(err, Error::BadSignature(_)));
    }

    #[test]
    fn test_crc_mismatch_reported() {
        let mut data = build_header(100, 50, 0);
        data[12] ^= 0xFF;
        let (_, integrity) = StartHeader::parse(&mut Cursor::new(&data)).unwrap();
        assert!(matches!(integrity, StartHeaderIntegrity::Mismatch { .. }));
    }

    #[test]
    fn test_zeroed_out_detected() {
        let mut data = build_header(0, 0, 0);
        // Wipe the CRC; the covered fields are already all zero.
        data[8..12].fill(0);
        let (_, integrity) = StartHeader::parse(&mut Cursor::new(&data)).unwrap();
        assert_eq!(integrity, StartHeaderIntegrity::ZeroedOut);
    }

    #[test]
    fn test_truncated() {
        let data = [0x37u8, 0x7A, 0xBC, 0xAF, 0x27, 0x1C, 0x00];
        let err = StartHeader::parse(&mut Cursor::new(&data)).unwrap_err();
        assert!(err.to_string().contains("I/O") || matches!(err, Error::Io(_) | Error::Corrupt(_)));
    }
}

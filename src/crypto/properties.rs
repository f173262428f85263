//! Layout of the AES coder's properties byte string.
//!
//! Byte 0 carries the key-derivation cycles power in its low 6 bits and the
//! salt/IV presence flags in its top 2 bits. When either flag is set, byte 1
//! carries `salt_size - 1` in its high nibble and `iv_size - 1` in its low
//! nibble, followed by the salt bytes and then the IV bytes. The IV is
//! zero-padded to the 16-byte AES block.

use crate::{Error, Result};

/// Parsed AES coder properties.
#[derive(Debug, Clone)]
pub struct AesProperties {
    /// Key derivation iteration exponent; `0x3F` selects the direct key
    /// schedule.
    pub cycles_power: u8,
    /// Salt for key derivation, up to 16 bytes.
    pub salt: Vec<u8>,
    /// Initialization vector, zero-padded to 16 bytes.
    pub iv: [u8; 16],
}

impl AesProperties {
    /// Parses the coder property bytes.
    pub fn parse(properties: &[u8]) -> Result<Self> {
        let first = *properties
            .first()
            .ok_or_else(|| Error::corrupt("AES coder without properties"))?;

        let cycles_power = first & 0x3F;
        let has_salt = first & 0x80 != 0;
        let has_iv = first & 0x40 != 0;

        let (salt_size, iv_size, mut offset) = if has_salt || has_iv {
            let second = *properties
                .get(1)
                .ok_or_else(|| Error::corrupt("AES properties missing size byte"))?;
            let salt_size = if has_salt {
                ((second >> 4) & 0x0F) as usize + 1
            } else {
                0
            };
            let iv_size = if has_iv {
                (second & 0x0F) as usize + 1
            } else {
                0
            };
            (salt_size, iv_size, 2usize)
        } else {
            (0, 0, 1)
        };

        if properties.len() < offset + salt_size + iv_size {
            return Err(Error::corrupt(format!(
                "AES properties truncated: {} bytes, need {}",
                properties.len(),
                offset + salt_size + iv_size
            )));
        }

        let salt = properties[offset..offset + salt_size].to_vec();
        offset += salt_size;

        let mut iv = [0u8; 16];
        let iv_len = iv_size.min(16);
        iv[..iv_len].copy_from_slice(&properties[offset..offset + iv_len]);

        Ok(Self {
            cycles_power,
            salt,
            iv,
        })
    }

    /// Encodes properties for writing into a coder record.
    pub fn encode(&self) -> Vec<u8> {
        let salt_size = self.salt.len().min(16);
        let iv_size = 16usize;

        let mut first = self.cycles_power & 0x3F;
        if salt_size > 0 {
            first |= 0x80;
        }
        first |= 0x40; // the IV is always written

        let second = (((salt_size.max(1) - 1) as u8) << 4) | ((iv_size - 1) as u8);

        let mut out = Vec::with_capacity(2 + salt_size + iv_size);
        out.push(first);
        out.push(if salt_size > 0 {
            second
        } else {
            (iv_size - 1) as u8
        });
        out.extend_from_slice(&self.salt[..salt_size]);
        out.extend_from_slice(&self.iv);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let props = AesProperties {
            cycles_power: 19,
            salt: vec![1, 2, 3, 4, 5, 6, 7, 8],
            iv: [9; 16],
        };
        let encoded = props.encode();
        let parsed = AesProperties::parse(&encoded).unwrap();
        assert_eq!(parsed.cycles_power, 19);
        assert_eq!(parsed.salt, props.salt);
        assert_eq!(parsed.iv, props.iv);
    }

    #[test]
    fn test_no_salt_no_iv() {
        // A single byte with both flags clear.
        let parsed = AesProperties::parse(&[0x13]).unwrap();
        assert_eq!(parsed.cycles_power, 0x13);
        assert!(parsed.salt.is_empty());
        assert_eq!(parsed.iv, [0u8; 16]);
    }

    #[test]
    fn test_short_iv_zero_padded() {
        // IV flag set, iv_size = 8.
        let mut data = vec![0x40 | 19, 0x07];
        data.extend_from_slice(&[0xAA; 8]);
        let parsed = AesProperties::parse(&data).unwrap();
        assert_eq!(&parsed.iv[..8], &[0xAA; 8]);
        assert_eq!(&parsed.iv[8..], &[0u8; 8]);
    }

    #[test]
    fn test_truncated_rejected() {
        // Salt flag promises 8 bytes that are not there.
        let err = AesProperties::parse(&[0x80 | 19, 0x70]).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
    }

    #[test]
    fn test_empty_rejected() {
        assert!(matches!(
            AesProperties::parse(&[]),
            Err(Error::Corrupt(_))
        ));
    }

    #[test]
    fn test_direct_key_marker() {
        let parsed = AesProperties::parse(&[0x3F]).unwrap();
        assert_eq!(parsed.cycles_power, 0x3F);
    }
}

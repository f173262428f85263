//! LZMA and LZMA2 coders, backed by `lzma-rust2`.

use std::io::{self, Read, Write};

use crate::{Error, Result};

use super::{DecoderCtx, EncoderCtx, FinishWrite};

/// Decoder factory for classic LZMA. Properties are five bytes: the lc/lp/pb
/// byte followed by the little-endian dictionary size.
pub fn decode_lzma(input: Box<dyn Read>, ctx: &DecoderCtx<'_>) -> Result<Box<dyn Read>> {
    if ctx.properties.len() < 5 {
        return Err(Error::corrupt("LZMA properties shorter than 5 bytes"));
    }
    let props_byte = ctx.properties[0];
    let dict_size = u32::from_le_bytes(ctx.properties[1..5].try_into().unwrap());
    check_dict_limit(dict_size, ctx.memory_limit_kib)?;

    let reader = lzma_rust2::LzmaReader::new_with_props(
        input,
        ctx.uncompressed_len,
        props_byte,
        dict_size,
        None,
    )
    .map_err(|e| Error::corrupt(format!("bad LZMA properties: {e}")))?;
    Ok(Box::new(reader))
}

/// Decoder factory for LZMA2. The single property byte encodes the
/// dictionary size.
pub fn decode_lzma2(input: Box<dyn Read>, ctx: &DecoderCtx<'_>) -> Result<Box<dyn Read>> {
    let prop = *ctx
        .properties
        .first()
        .ok_or_else(|| Error::corrupt("LZMA2 properties missing"))?;
    let dict_size = decode_dict_size(prop)?;
    check_dict_limit(dict_size, ctx.memory_limit_kib)?;

    let reader = lzma_rust2::Lzma2Reader::new(input, dict_size, None);
    Ok(Box::new(reader))
}

fn check_dict_limit(dict_size: u32, memory_limit_kib: u64) -> Result<()> {
    let needed_kib = u64::from(dict_size).div_ceil(1024);
    if needed_kib > memory_limit_kib {
        return Err(Error::MemoryLimit {
            needed_kib,
            limit_kib: memory_limit_kib,
        });
    }
    Ok(())
}

/// Decodes the LZMA2 dictionary-size property byte.
///
/// Even values select `2^(n/2 + 12)`, odd values `3 * 2^(n/2 + 11)`;
/// 40 is the 4 GiB - 1 ceiling.
pub fn decode_dict_size(prop: u8) -> Result<u32> {
    if prop > 40 {
        return Err(Error::corrupt(format!(
            "invalid LZMA2 dictionary property {prop}"
        )));
    }
    if prop == 40 {
        return Ok(u32::MAX);
    }
    let shift = u32::from(prop) / 2 + 12;
    Ok(if prop % 2 == 0 {
        1u32 << shift
    } else {
        3u32 << (shift - 1)
    })
}

/// Encodes a dictionary size as the LZMA2 property byte, rounding up to the
/// nearest representable size.
pub fn encode_dict_size(dict_size: u32) -> u8 {
    for prop in 0..=40u8 {
        if decode_dict_size(prop).unwrap_or(u32::MAX) >= dict_size {
            return prop;
        }
    }
    40
}

/// Dictionary size for a compression level, clamped to `[64 KiB, 64 MiB]`.
fn level_dict_size(level: u32) -> u32 {
    1u32 << (16 + level.min(10))
}

/// Encoder factory for LZMA2.
pub fn encode_lzma2(
    sink: Box<dyn FinishWrite>,
    ctx: &EncoderCtx<'_>,
) -> Result<(Box<dyn FinishWrite>, Vec<u8>)> {
    let dict_size = ctx.dict_size.unwrap_or_else(|| level_dict_size(ctx.level));

    let mut options = lzma_rust2::Lzma2Options::with_preset(ctx.level.min(9));
    options.lzma_options.dict_size = dict_size;

    let buffer = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let writer = lzma_rust2::Lzma2Writer::new(ChunkSink(buffer.clone()), options);

    let properties = vec![encode_dict_size(dict_size)];
    Ok((
        Box::new(Lzma2Encoder {
            encoder: writer,
            buffer,
            inner: sink,
        }),
        properties,
    ))
}

/// Collects encoder output chunks for forwarding to the next stage.
struct ChunkSink(std::rc::Rc<std::cell::RefCell<Vec<u8>>>);

impl Write for ChunkSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct Lzma2Encoder {
    encoder: lzma_rust2::Lzma2Writer<ChunkSink>,
    buffer: std::rc::Rc<std::cell::RefCell<Vec<u8>>>,
    inner: Box<dyn FinishWrite>,
}

impl Lzma2Encoder {
    fn forward(&mut self) -> io::Result<()> {
        let mut buffer = self.buffer.borrow_mut();
        if !buffer.is_empty() {
            self.inner.write_all(&buffer)?;
            buffer.clear();
        }
        Ok(())
    }
}

impl Write for Lzma2Encoder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.encoder.write(buf)?;
        self.forward()?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.forward()?;
        self.inner.flush()
    }
}

impl FinishWrite for Lzma2Encoder {
    fn finish(self: Box<Self>) -> io::Result<()> {
        let Lzma2Encoder {
            encoder,
            buffer,
            mut inner,
        } = *self;
        encoder
            .finish()
            .map_err(|e| io::Error::other(e.to_string()))?;
        let tail = buffer.borrow();
        if !tail.is_empty() {
            inner.write_all(&tail)?;
        }
        drop(tail);
        inner.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dict_size_table() {
        assert_eq!(decode_dict_size(0).unwrap(), 4096);
        assert_eq!(decode_dict_size(1).unwrap(), 6144);
        assert_eq!(decode_dict_size(2).unwrap(), 8192);
        assert_eq!(decode_dict_size(18).unwrap(), 2 * 1024 * 1024);
        assert_eq!(decode_dict_size(40).unwrap(), u32::MAX);
        assert!(decode_dict_size(41).is_err());
    }

    #[test]
    fn test_dict_size_roundtrip() {
        for prop in 0..=40u8 {
            let size = decode_dict_size(prop).unwrap();
            assert_eq!(encode_dict_size(size), prop);
        }
    }

    #[test]
    fn test_dict_size_rounds_up() {
        assert_eq!(encode_dict_size(5000), 1); // next size up is 6 KiB
        assert_eq!(encode_dict_size(7000), 2); // next size up is 8 KiB
    }

    #[test]
    fn test_lzma_missing_properties() {
        let ctx = DecoderCtx {
            uncompressed_len: 0,
            properties: &[0x5D],
            password: None,
            memory_limit_kib: u64::MAX,
        };
        let err = match decode_lzma(Box::new(std::io::Cursor::new(Vec::new())), &ctx) {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(matches!(err, Error::Corrupt(_)));
    }

    #[test]
    fn test_dictionary_checked_against_memory_limit() {
        let ctx = DecoderCtx {
            uncompressed_len: 0,
            properties: &[40], // 4 GiB dictionary
            password: None,
            memory_limit_kib: 1024,
        };
        let err = match decode_lzma2(Box::new(std::io::Cursor::new(Vec::new())), &ctx) {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(matches!(err, Error::MemoryLimit { .. }));
    }
}

//! BZip2 coder, backed by the `bzip2` crate.

use std::io::{self, Read, Write};

use bzip2::Compression;
use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;

use crate::Result;

use super::{DecoderCtx, EncoderCtx, FinishWrite};

/// Decoder factory for BZip2.
pub fn decode(input: Box<dyn Read>, _ctx: &DecoderCtx<'_>) -> Result<Box<dyn Read>> {
    Ok(Box::new(BzDecoder::new(input)))
}

/// Encoder factory for BZip2. Levels are clamped to the 1..=9 block sizes.
pub fn encode(
    sink: Box<dyn FinishWrite>,
    ctx: &EncoderCtx<'_>,
) -> Result<(Box<dyn FinishWrite>, Vec<u8>)> {
    let writer = BzEncoder::new(sink, Compression::new(ctx.level.clamp(1, 9)));
    Ok((Box::new(Bzip2Encoder { inner: writer }), Vec::new()))
}

struct Bzip2Encoder {
    inner: BzEncoder<Box<dyn FinishWrite>>,
}

impl Write for Bzip2Encoder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl FinishWrite for Bzip2Encoder {
    fn finish(self: Box<Self>) -> io::Result<()> {
        let sink = self.inner.finish()?;
        sink.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_bzip2_roundtrip_via_bzip2_crate() {
        let data = b"bzip2 roundtrip payload bzip2 roundtrip payload";

        let mut encoder = BzEncoder::new(Vec::new(), Compression::new(9));
        encoder.write_all(data).unwrap();
        let compressed = encoder.finish().unwrap();

        let ctx = DecoderCtx {
            uncompressed_len: data.len() as u64,
            properties: &[],
            password: None,
            memory_limit_kib: u64::MAX,
        };
        let mut decoder = decode(Box::new(Cursor::new(compressed)), &ctx).unwrap();
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }
}

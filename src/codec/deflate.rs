//! Deflate and Deflate64 coders.
//!
//! Deflate round-trips through `flate2` (zlib-rs backend). Deflate64 is
//! decode-only: the format has no maintained encoder, and archives are only
//! ever read with it.

use std::io::{self, BufReader, Read, Write};

use flate2::Compression;
use flate2::bufread::DeflateDecoder as FlateDecoder;
use flate2::write::DeflateEncoder as FlateEncoder;

use crate::Result;

use super::{DecoderCtx, EncoderCtx, FinishWrite};

/// Decoder factory for Deflate.
pub fn decode(input: Box<dyn Read>, _ctx: &DecoderCtx<'_>) -> Result<Box<dyn Read>> {
    Ok(Box::new(FlateDecoder::new(BufReader::new(input))))
}

/// Decoder factory for Deflate64.
pub fn decode64(input: Box<dyn Read>, _ctx: &DecoderCtx<'_>) -> Result<Box<dyn Read>> {
    Ok(Box::new(deflate64::Deflate64Decoder::new(input)))
}

/// Encoder factory for Deflate.
pub fn encode(
    sink: Box<dyn FinishWrite>,
    ctx: &EncoderCtx<'_>,
) -> Result<(Box<dyn FinishWrite>, Vec<u8>)> {
    let writer = FlateEncoder::new(sink, Compression::new(ctx.level.min(9)));
    Ok((Box::new(DeflateEncoder { inner: writer }), Vec::new()))
}

struct DeflateEncoder {
    inner: FlateEncoder<Box<dyn FinishWrite>>,
}

impl Write for DeflateEncoder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl FinishWrite for DeflateEncoder {
    fn finish(self: Box<Self>) -> io::Result<()> {
        let sink = self.inner.finish()?;
        sink.finish()
    }
}

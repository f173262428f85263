//! The Copy coder: stored data, no transformation.

use std::io::{self, Read, Write};

use crate::Result;

use super::{BoundedReader, DecoderCtx, EncoderCtx, FinishWrite};

/// Decoder factory: an identity reader bounded to the declared size.
pub fn decode(input: Box<dyn Read>, ctx: &DecoderCtx<'_>) -> Result<Box<dyn Read>> {
    Ok(Box::new(BoundedReader::new(input, ctx.uncompressed_len)))
}

/// Encoder factory: an identity writer with no properties.
pub fn encode(
    sink: Box<dyn FinishWrite>,
    _ctx: &EncoderCtx<'_>,
) -> Result<(Box<dyn FinishWrite>, Vec<u8>)> {
    Ok((Box::new(CopyEncoder { inner: sink }), Vec::new()))
}

struct CopyEncoder {
    inner: Box<dyn FinishWrite>,
}

impl Write for CopyEncoder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl FinishWrite for CopyEncoder {
    fn finish(self: Box<Self>) -> io::Result<()> {
        self.inner.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_copy_decode_bounds() {
        let ctx = DecoderCtx {
            uncompressed_len: 5,
            properties: &[],
            password: None,
            memory_limit_kib: u64::MAX,
        };
        let mut r = decode(Box::new(Cursor::new(b"hello world".to_vec())), &ctx).unwrap();
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello");
    }
}

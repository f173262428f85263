//! Codec infrastructure: method ids, the registry, and decoder stacks.
//!
//! The container engine treats codecs as external collaborators behind a
//! narrow seam: a decoder wraps a `Read` in a `Read`, an encoder wraps a
//! finishable `Write` in a finishable `Write`. The registry maps a coder's
//! variable-length method id to those factories and can be extended with
//! [`CodecRegistry::add_decoder`] / [`CodecRegistry::add_encoder`].

pub mod bzip2;
pub mod copy;
pub mod deflate;
pub mod filters;
pub mod lzma;

use std::io::{self, Read, Write};

use crate::checksum::CrcVerifyReader;
use crate::crypto::{AesMaterial, Password};
use crate::format::streams::Folder;
use crate::{Error, Result};

/// Method ids of the supported coders.
pub mod method {
    /// Copy (stored, no transformation).
    pub const COPY: &[u8] = &[0x00];
    /// Delta filter.
    pub const DELTA: &[u8] = &[0x03];
    /// LZMA.
    pub const LZMA: &[u8] = &[0x03, 0x01, 0x01];
    /// LZMA2.
    pub const LZMA2: &[u8] = &[0x21];
    /// Deflate.
    pub const DEFLATE: &[u8] = &[0x04, 0x01, 0x08];
    /// Deflate64.
    pub const DEFLATE64: &[u8] = &[0x04, 0x01, 0x09];
    /// BZip2.
    pub const BZIP2: &[u8] = &[0x04, 0x02, 0x02];
    /// BCJ x86 branch filter.
    pub const BCJ_X86: &[u8] = &[0x03, 0x03, 0x01, 0x03];
    /// BCJ PowerPC branch filter.
    pub const BCJ_PPC: &[u8] = &[0x03, 0x03, 0x02, 0x05];
    /// BCJ IA-64 branch filter.
    pub const BCJ_IA64: &[u8] = &[0x03, 0x03, 0x04, 0x01];
    /// BCJ ARM branch filter.
    pub const BCJ_ARM: &[u8] = &[0x03, 0x03, 0x05, 0x01];
    /// BCJ ARM Thumb branch filter.
    pub const BCJ_ARM_THUMB: &[u8] = &[0x03, 0x03, 0x07, 0x01];
    /// BCJ SPARC branch filter.
    pub const BCJ_SPARC: &[u8] = &[0x03, 0x03, 0x08, 0x05];
    /// AES-256-CBC with SHA-256 key derivation.
    pub const AES256_SHA256: &[u8] = &[0x06, 0xF1, 0x07, 0x01];

    /// Human-readable name for a method id.
    pub fn name(id: &[u8]) -> &'static str {
        match id {
            COPY => "Copy",
            DELTA => "Delta",
            LZMA => "LZMA",
            LZMA2 => "LZMA2",
            DEFLATE => "Deflate",
            DEFLATE64 => "Deflate64",
            BZIP2 => "BZip2",
            BCJ_X86 => "BCJ x86",
            BCJ_PPC => "BCJ PowerPC",
            BCJ_IA64 => "BCJ IA-64",
            BCJ_ARM => "BCJ ARM",
            BCJ_ARM_THUMB => "BCJ ARM Thumb",
            BCJ_SPARC => "BCJ SPARC",
            AES256_SHA256 => "AES-256",
            _ => "unknown",
        }
    }
}

/// Context handed to a decoder factory.
pub struct DecoderCtx<'a> {
    /// Size of this coder's decoded output.
    pub uncompressed_len: u64,
    /// Coder properties from the header.
    pub properties: &'a [u8],
    /// Password, when the archive handle has one.
    pub password: Option<&'a Password>,
    /// Memory ceiling in KiB for codec-internal allocations.
    pub memory_limit_kib: u64,
}

/// Context handed to an encoder factory.
pub struct EncoderCtx<'a> {
    /// Compression level, method-specific scale.
    pub level: u32,
    /// Dictionary size override for LZMA-family methods.
    pub dict_size: Option<u32>,
    /// Password for the AES coder.
    pub password: Option<&'a Password>,
    /// Key material for the AES coder.
    pub aes_material: Option<&'a AesMaterial>,
}

/// A `Write` that must be finished to flush codec-internal state, then
/// finishes the stages beneath it.
pub trait FinishWrite: Write {
    /// Completes this stage and every stage it wraps.
    fn finish(self: Box<Self>) -> io::Result<()>;
}

/// Decoder factory: wraps a compressed byte stream in a decoding reader.
pub type DecodeFn = fn(Box<dyn Read>, &DecoderCtx<'_>) -> Result<Box<dyn Read>>;

/// Encoder factory: wraps the output channel in an encoding writer and
/// returns the coder properties to record in the header.
pub type EncodeFn =
    fn(Box<dyn FinishWrite>, &EncoderCtx<'_>) -> Result<(Box<dyn FinishWrite>, Vec<u8>)>;

/// Maps method ids to codec factories.
pub struct CodecRegistry {
    decoders: Vec<(Vec<u8>, DecodeFn)>,
    encoders: Vec<(Vec<u8>, EncodeFn)>,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        let mut registry = Self {
            decoders: Vec::new(),
            encoders: Vec::new(),
        };

        registry.add_decoder(method::COPY, copy::decode);
        registry.add_decoder(method::LZMA, lzma::decode_lzma);
        registry.add_decoder(method::LZMA2, lzma::decode_lzma2);
        registry.add_decoder(method::DEFLATE, deflate::decode);
        registry.add_decoder(method::DEFLATE64, deflate::decode64);
        registry.add_decoder(method::BZIP2, bzip2::decode);
        registry.add_decoder(method::DELTA, filters::decode_delta);
        registry.add_decoder(method::BCJ_X86, filters::decode_bcj_x86);
        registry.add_decoder(method::BCJ_PPC, filters::decode_bcj_ppc);
        registry.add_decoder(method::BCJ_IA64, filters::decode_bcj_ia64);
        registry.add_decoder(method::BCJ_ARM, filters::decode_bcj_arm);
        registry.add_decoder(method::BCJ_ARM_THUMB, filters::decode_bcj_arm_thumb);
        registry.add_decoder(method::BCJ_SPARC, filters::decode_bcj_sparc);
        registry.add_decoder(method::AES256_SHA256, decode_aes);

        registry.add_encoder(method::COPY, copy::encode);
        registry.add_encoder(method::LZMA2, lzma::encode_lzma2);
        registry.add_encoder(method::DEFLATE, deflate::encode);
        registry.add_encoder(method::BZIP2, bzip2::encode);
        registry.add_encoder(method::AES256_SHA256, encode_aes);

        registry
    }
}

impl CodecRegistry {
    /// Creates a registry with the built-in codec set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a decoder factory for a method id.
    pub fn add_decoder(&mut self, method_id: &[u8], decode: DecodeFn) {
        self.decoders.retain(|(id, _)| id != method_id);
        self.decoders.push((method_id.to_vec(), decode));
    }

    /// Registers (or replaces) an encoder factory for a method id.
    pub fn add_encoder(&mut self, method_id: &[u8], encode: EncodeFn) {
        self.encoders.retain(|(id, _)| id != method_id);
        self.encoders.push((method_id.to_vec(), encode));
    }

    /// Wraps `input` in the decoder for `method_id`.
    pub fn decode(
        &self,
        method_id: &[u8],
        input: Box<dyn Read>,
        ctx: &DecoderCtx<'_>,
    ) -> Result<Box<dyn Read>> {
        let decode = self
            .decoders
            .iter()
            .find(|(id, _)| id == method_id)
            .map(|(_, f)| f)
            .ok_or_else(|| {
                Error::unsupported(format!("decoder for method {method_id:02x?}"))
            })?;
        decode(input, ctx)
    }

    /// Wraps `sink` in the encoder for `method_id`, returning the writer and
    /// the coder properties.
    pub fn encode(
        &self,
        method_id: &[u8],
        sink: Box<dyn FinishWrite>,
        ctx: &EncoderCtx<'_>,
    ) -> Result<(Box<dyn FinishWrite>, Vec<u8>)> {
        let encode = self
            .encoders
            .iter()
            .find(|(id, _)| id == method_id)
            .map(|(_, f)| f)
            .ok_or_else(|| {
                Error::IllegalArgument(format!(
                    "no encoder for method {method_id:02x?}"
                ))
            })?;
        encode(sink, ctx)
    }

    /// Checks whether an entry could be encoded with `method_id` under the
    /// given context, without building a pipeline.
    pub fn accepts(&self, method_id: &[u8], ctx: &EncoderCtx<'_>) -> Result<()> {
        if !self.encoders.iter().any(|(id, _)| id == method_id) {
            return Err(Error::IllegalArgument(format!(
                "no encoder for method {method_id:02x?}"
            )));
        }
        if method_id == method::AES256_SHA256 && ctx.password.is_none() {
            return Err(Error::PasswordRequired);
        }
        Ok(())
    }
}

fn decode_aes(input: Box<dyn Read>, ctx: &DecoderCtx<'_>) -> Result<Box<dyn Read>> {
    let password = ctx.password.ok_or(Error::PasswordRequired)?;
    let reader = crate::crypto::Aes256CbcReader::new(input, ctx.properties, password)?;
    Ok(Box::new(reader))
}

fn encode_aes(
    sink: Box<dyn FinishWrite>,
    ctx: &EncoderCtx<'_>,
) -> Result<(Box<dyn FinishWrite>, Vec<u8>)> {
    let password = ctx.password.ok_or(Error::PasswordRequired)?;
    let material = ctx
        .aes_material
        .ok_or_else(|| Error::IllegalArgument("AES encoder without key material".into()))?;
    let writer = crate::crypto::Aes256CbcWriter::new(sink, material, password)?;
    let properties = material.properties();
    Ok((Box::new(AesStage { inner: writer }), properties))
}

struct AesStage {
    inner: crate::crypto::Aes256CbcWriter<Box<dyn FinishWrite>>,
}

impl Write for AesStage {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl FinishWrite for AesStage {
    fn finish(self: Box<Self>) -> io::Result<()> {
        let sink = self.inner.finish()?;
        sink.finish()
    }
}

/// A reader that serves exactly `len` bytes from its inner reader.
///
/// Reporting EOF early is a corruption signal: if the inner stream dries up
/// with bytes still owed, the read fails instead of returning a short count
/// forever.
pub struct BoundedReader<R> {
    inner: R,
    remaining: u64,
}

impl<R: Read> BoundedReader<R> {
    /// Bounds `inner` to `len` bytes.
    pub fn new(inner: R, len: u64) -> Self {
        Self {
            inner,
            remaining: len,
        }
    }

    /// Bytes still owed.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl<R: Read> Read for BoundedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }
        let want = buf
            .len()
            .min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let n = self.inner.read(&mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("stream ended {} bytes early", self.remaining),
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Builds the decoder stack for one folder over its packed byte stream.
///
/// Coders are applied in the folder's precomputed topological order, each
/// bounded to its own declared output size. When the folder advertises a
/// CRC the final stream verifies it at EOF. The result is length-bounded to
/// the folder's unpack size.
pub fn folder_decoder(
    registry: &CodecRegistry,
    packed: Box<dyn Read>,
    folder: &Folder,
    password: Option<&Password>,
    memory_limit_kib: u64,
) -> Result<Box<dyn Read>> {
    let mut stream = packed;

    for &coder_index in &folder.ordered_coders {
        let coder = &folder.coders[coder_index];
        let ctx = DecoderCtx {
            uncompressed_len: folder.unpack_sizes[coder_index],
            properties: coder.properties.as_deref().unwrap_or(&[]),
            password,
            memory_limit_kib,
        };
        let decoded = registry.decode(&coder.method_id, stream, &ctx)?;
        stream = Box::new(BoundedReader::new(decoded, ctx.uncompressed_len));
    }

    if let Some(expected) = folder.unpack_crc {
        stream = Box::new(CrcVerifyReader::new(stream, expected));
    }

    Ok(stream)
}

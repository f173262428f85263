//! Delta and BCJ branch-conversion filters.
//!
//! Filters are reversible transforms applied before compression to improve
//! ratios: Delta for sampled data, BCJ for CPU branch offsets. The engine
//! only ever decodes them; `lzma-rust2` provides the filter readers.

use std::io::Read;

use lzma_rust2::filter::bcj::BcjReader;
use lzma_rust2::filter::delta::DeltaReader;

use crate::Result;

use super::DecoderCtx;

/// Decoder factory for the Delta filter. The single property byte stores
/// `distance - 1`.
pub fn decode_delta(input: Box<dyn Read>, ctx: &DecoderCtx<'_>) -> Result<Box<dyn Read>> {
    let distance = ctx
        .properties
        .first()
        .map(|&b| b as usize + 1)
        .unwrap_or(1);
    Ok(Box::new(DeltaReader::new(input, distance)))
}

/// Decoder factory for the x86 BCJ filter.
pub fn decode_bcj_x86(input: Box<dyn Read>, _ctx: &DecoderCtx<'_>) -> Result<Box<dyn Read>> {
    Ok(Box::new(BcjReader::new_x86(input, 0)))
}

/// Decoder factory for the PowerPC BCJ filter.
pub fn decode_bcj_ppc(input: Box<dyn Read>, _ctx: &DecoderCtx<'_>) -> Result<Box<dyn Read>> {
    Ok(Box::new(BcjReader::new_ppc(input, 0)))
}

/// Decoder factory for the IA-64 BCJ filter.
pub fn decode_bcj_ia64(input: Box<dyn Read>, _ctx: &DecoderCtx<'_>) -> Result<Box<dyn Read>> {
    Ok(Box::new(BcjReader::new_ia64(input, 0)))
}

/// Decoder factory for the ARM BCJ filter.
pub fn decode_bcj_arm(input: Box<dyn Read>, _ctx: &DecoderCtx<'_>) -> Result<Box<dyn Read>> {
    Ok(Box::new(BcjReader::new_arm(input, 0)))
}

/// Decoder factory for the ARM Thumb BCJ filter.
pub fn decode_bcj_arm_thumb(
    input: Box<dyn Read>,
    _ctx: &DecoderCtx<'_>,
) -> Result<Box<dyn Read>> {
    Ok(Box::new(BcjReader::new_arm_thumb(input, 0)))
}

/// Decoder factory for the SPARC BCJ filter.
pub fn decode_bcj_sparc(input: Box<dyn Read>, _ctx: &DecoderCtx<'_>) -> Result<Box<dyn Read>> {
    Ok(Box::new(BcjReader::new_sparc(input, 0)))
}

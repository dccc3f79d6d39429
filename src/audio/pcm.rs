//! # PCM Encoding
//!
//! Conversion between the pipeline's internal sample representation
//! (normalized `f32` in [-1.0, 1.0]) and the wire format expected by the
//! realtime API: 16-bit signed little-endian PCM, base64-encoded inside JSON.
//!
//! ## Quantization:
//! Samples are scaled by 32768 and rounded to the nearest integer, then
//! clamped to [-32768, 32767]. Decoding divides by 32768. A round trip is
//! therefore accurate to within one quantization step (1/32768).

use crate::error::{PipelineError, PipelineResult};
use base64::prelude::*;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Scale between normalized floats and 16-bit integers.
pub const PCM16_SCALE: f32 = 32768.0;

/// Convert one normalized sample to a 16-bit integer.
pub fn float_to_i16(sample: f32) -> i16 {
    let clamped = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
    (clamped * PCM16_SCALE).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Convert one 16-bit integer back to a normalized sample.
pub fn i16_to_float(sample: i16) -> f32 {
    sample as f32 / PCM16_SCALE
}

/// Encode normalized samples as 16-bit little-endian PCM bytes.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        // Writing into a Vec cannot fail.
        let _ = bytes.write_i16::<LittleEndian>(float_to_i16(sample));
    }
    bytes
}

/// Decode 16-bit little-endian PCM bytes into normalized samples.
///
/// ## Errors:
/// An odd byte count cannot be split into whole samples and is rejected
/// rather than silently truncated.
pub fn decode_pcm16(bytes: &[u8]) -> PipelineResult<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(PipelineError::Decode(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }

    let mut cursor = Cursor::new(bytes);
    let mut samples = Vec::with_capacity(bytes.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(i16_to_float(sample));
    }
    Ok(samples)
}

pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64_STANDARD.encode(bytes)
}

pub fn decode_base64(text: &str) -> PipelineResult<Vec<u8>> {
    Ok(BASE64_STANDARD.decode(text)?)
}

//! Float <-> 16-bit little-endian PCM conversion

use crate::error::CodecError;

/// Scale for negative samples (`-1.0` maps to `i16::MIN`)
const NEG_SCALE: f32 = 32768.0;

/// Scale for positive samples (`1.0` maps to `i16::MAX`)
const POS_SCALE: f32 = 32767.0;

/// Convert one float sample to a signed 16-bit sample.
///
/// Clamps to `[-1, 1]` first. NaN maps to zero.
#[inline]
pub fn sample_to_i16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    let scaled = if s < 0.0 { s * NEG_SCALE } else { s * POS_SCALE };
    // `as` saturates and maps NaN to 0
    scaled.round() as i16
}

/// Convert one signed 16-bit sample back to `[-1, 1]`.
#[inline]
pub fn sample_from_i16(sample: i16) -> f32 {
    if sample < 0 {
        sample as f32 / NEG_SCALE
    } else {
        sample as f32 / POS_SCALE
    }
}

/// Encode float samples as 16-bit little-endian PCM.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        out.extend_from_slice(&sample_to_i16(s).to_le_bytes());
    }
    out
}

/// Encode already-quantized samples as little-endian bytes.
pub fn i16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Decode 16-bit little-endian PCM into float samples.
///
/// Fails with [`CodecError::MalformedInput`] on an odd byte count.
pub fn decode_pcm16(bytes: &[u8]) -> Result<Vec<f32>, CodecError> {
    if bytes.len() % 2 != 0 {
        return Err(CodecError::MalformedInput(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| sample_from_i16(i16::from_le_bytes([pair[0], pair[1]])))
        .collect())
}

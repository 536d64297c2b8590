//! JPEG encoding of camera snapshots

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ExtendedColorType, RgbImage};

use crate::error::CodecError;

/// Encode an RGB frame as JPEG.
///
/// When `max_dimension` is set, frames larger than it on either side are
/// downscaled (aspect preserved) before encoding.
pub fn encode_jpeg(
    frame: &RgbImage,
    quality: u8,
    max_dimension: Option<u32>,
) -> Result<Vec<u8>, CodecError> {
    if frame.width() == 0 || frame.height() == 0 {
        return Err(CodecError::EncodingFailed("zero-sized frame".to_string()));
    }

    let scaled;
    let frame = match max_dimension {
        Some(max) if frame.width() > max || frame.height() > max => {
            let ratio = max as f32 / frame.width().max(frame.height()) as f32;
            let w = ((frame.width() as f32 * ratio).round() as u32).max(1);
            let h = ((frame.height() as f32 * ratio).round() as u32).max(1);
            scaled = image::imageops::resize(frame, w, h, FilterType::Triangle);
            &scaled
        }
        _ => frame,
    };

    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    encoder
        .encode(frame.as_raw(), frame.width(), frame.height(), ExtendedColorType::Rgb8)
        .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;

    Ok(buf)
}

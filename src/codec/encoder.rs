//! PCM16 capture encoder
//!
//! Turns capture windows into transport-ready media packets.

use crate::codec::pcm::i16_to_le_bytes;
use crate::codec::text::buffer_to_transport_text;
use crate::error::CodecError;
use crate::protocol::{EncodedMediaPacket, MediaKind};

/// PCM16 encoder with frame statistics
pub struct Pcm16Encoder {
    sample_rate: u32,
    /// Frame counter for statistics
    frames_encoded: u64,
    /// Total raw PCM bytes produced
    bytes_produced: u64,
}

impl Pcm16Encoder {
    /// Create an encoder tagging packets with `sample_rate`
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frames_encoded: 0,
            bytes_produced: 0,
        }
    }

    /// Encode quantized samples into an audio packet.
    pub fn encode(&mut self, samples: &[i16]) -> Result<EncodedMediaPacket, CodecError> {
        let pcm = i16_to_le_bytes(samples);
        let packet = EncodedMediaPacket::new(
            MediaKind::Audio {
                sample_rate: self.sample_rate,
            },
            buffer_to_transport_text(&pcm),
        )?;

        self.frames_encoded += 1;
        self.bytes_produced += pcm.len() as u64;

        Ok(packet)
    }

    /// Sample rate packets are tagged with
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Get statistics
    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
            average_frame_size: if self.frames_encoded > 0 {
                self.bytes_produced as f32 / self.frames_encoded as f32
            } else {
                0.0
            },
        }
    }

    /// Reset statistics
    pub fn reset_stats(&mut self) {
        self.frames_encoded = 0;
        self.bytes_produced = 0;
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
    pub average_frame_size: f32,
}

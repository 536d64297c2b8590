//! PCM16 playback decoder
//!
//! Decodes inbound transport-text chunks into float samples, counting
//! malformed chunks instead of failing the stream.

use crate::codec::pcm::decode_pcm16;
use crate::codec::text::transport_text_to_buffer;
use crate::error::CodecError;

/// PCM16 decoder with statistics
#[derive(Default)]
pub struct Pcm16Decoder {
    /// Chunks decoded
    chunks_decoded: u64,
    /// Chunks dropped as malformed
    chunks_malformed: u64,
    /// Total samples produced
    samples_produced: u64,
}

impl Pcm16Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a transport-text chunk into raw PCM bytes.
    ///
    /// The bytes are validated (even length) but not converted, so the
    /// scheduler can own the float conversion.
    pub fn decode_text(&mut self, text: &str) -> Result<Vec<u8>, CodecError> {
        let bytes = transport_text_to_buffer(text).map_err(|e| self.malformed(e))?;
        if bytes.len() % 2 != 0 {
            return Err(self.malformed(CodecError::MalformedInput(format!(
                "PCM16 payload has odd length {}",
                bytes.len()
            ))));
        }
        Ok(bytes)
    }

    /// Decode PCM bytes into float samples.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<Vec<f32>, CodecError> {
        let samples = decode_pcm16(bytes).map_err(|e| self.malformed(e))?;
        self.chunks_decoded += 1;
        self.samples_produced += samples.len() as u64;
        Ok(samples)
    }

    fn malformed(&mut self, e: CodecError) -> CodecError {
        self.chunks_malformed += 1;
        e
    }

    /// Get statistics
    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            chunks_decoded: self.chunks_decoded,
            chunks_malformed: self.chunks_malformed,
            samples_produced: self.samples_produced,
        }
    }

    /// Reset statistics
    pub fn reset_stats(&mut self) {
        self.chunks_decoded = 0;
        self.chunks_malformed = 0;
        self.samples_produced = 0;
    }
}

/// Decoder statistics
#[derive(Debug, Clone, Default)]
pub struct DecoderStats {
    pub chunks_decoded: u64,
    pub chunks_malformed: u64,
    pub samples_produced: u64,
}

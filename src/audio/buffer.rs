//! Audio frames and fixed-window assembly
//!
//! Device callbacks deliver blocks of whatever size the host picks. The
//! capture path needs windows of exactly `window` samples, independent of
//! that block size, so blocks are accumulated here and drained window by
//! window.

use std::time::Duration;

use crate::codec::pcm::{i16_to_le_bytes, sample_to_i16};

/// Mono PCM16 frame produced from one capture window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Signed 16-bit samples
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Capture timestamp in microseconds since the pipeline started
    pub timestamp: u64,
    /// Window sequence number (counts muted windows too)
    pub sequence: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32, timestamp: u64, sequence: u32) -> Self {
        Self {
            samples,
            sample_rate,
            timestamp,
            sequence,
        }
    }

    /// Quantize float samples into a frame
    pub fn from_f32(samples: &[f32], sample_rate: u32, timestamp: u64, sequence: u32) -> Self {
        Self::new(
            samples.iter().map(|&s| sample_to_i16(s)).collect(),
            sample_rate,
            timestamp,
            sequence,
        )
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Frame duration
    pub fn duration(&self) -> Duration {
        samples_to_duration(self.samples.len(), self.sample_rate)
    }

    /// Little-endian PCM16 bytes
    pub fn to_le_bytes(&self) -> Vec<u8> {
        i16_to_le_bytes(&self.samples)
    }
}

/// Exact duration of `samples` at `sample_rate`, in whole nanoseconds
pub fn samples_to_duration(samples: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos((samples as u128 * 1_000_000_000 / sample_rate as u128) as u64)
}

/// Whole samples needed to cover `duration` at `sample_rate`, rounded up
pub fn duration_to_samples(duration: Duration, sample_rate: u32) -> u64 {
    (duration.as_nanos() * sample_rate as u128).div_ceil(1_000_000_000) as u64
}

/// Accumulates arbitrary blocks into fixed-size windows
pub struct WindowAssembler {
    window: usize,
    pending: Vec<f32>,
}

impl WindowAssembler {
    /// `window` is clamped to at least one sample
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            pending: Vec::with_capacity(window),
        }
    }

    /// Append a block, calling `on_window` once per completed window
    pub fn push(&mut self, mut samples: &[f32], mut on_window: impl FnMut(&[f32])) {
        while !samples.is_empty() {
            let take = (self.window - self.pending.len()).min(samples.len());
            self.pending.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.pending.len() == self.window {
                on_window(&self.pending);
                self.pending.clear();
            }
        }
    }

    /// Drop any partial window
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Samples waiting for the current window to fill
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn window_len(&self) -> usize {
        self.window
    }
}

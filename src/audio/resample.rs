//! Sample-rate conversion and channel down-mix
//!
//! Hosts rarely open at exactly 16 kHz / 24 kHz, so capture blocks are
//! converted on the fly and playback segments are converted once at
//! scheduling time. Linear interpolation is enough for speech.

/// Average interleaved channels into mono
pub fn downmix_to_mono(interleaved: &[f32], channels: u16) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    if channels == 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// One-shot linear resampling of a complete mono buffer
pub fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == 0 || to_rate == 0 || from_rate == to_rate || input.is_empty() {
        return input.to_vec();
    }

    let frames_out = (input.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    resample_to_len(input, from_rate, to_rate, frames_out)
}

/// Linear resampling to exactly `frames_out` samples.
///
/// Output sample `i` reads input position `i * from_rate / to_rate`; reads
/// past the end hold the last input sample.
pub fn resample_to_len(input: &[f32], from_rate: u32, to_rate: u32, frames_out: usize) -> Vec<f32> {
    let Some(last) = input.len().checked_sub(1) else {
        return vec![0.0; frames_out];
    };
    if from_rate == to_rate && frames_out == input.len() {
        return input.to_vec();
    }

    let step = if from_rate == 0 || to_rate == 0 {
        input.len() as f64 / frames_out.max(1) as f64
    } else {
        from_rate as f64 / to_rate as f64
    };

    (0..frames_out)
        .map(|i| {
            let t = i as f64 * step;
            let i0 = (t.floor() as usize).min(last);
            let i1 = (i0 + 1).min(last);
            let frac = (t - i0 as f64).min(1.0) as f32;
            input[i0] + (input[i1] - input[i0]) * frac
        })
        .collect()
}

/// Streaming linear resampler that keeps its phase across blocks
pub struct LinearResampler {
    from_rate: u32,
    to_rate: u32,
    /// Read position relative to the start of the next block; -1.0..0.0 means
    /// interpolating between the previous block's last sample and the next block
    pos: f64,
    last: f32,
}

impl LinearResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            from_rate,
            to_rate,
            pos: 0.0,
            last: 0.0,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.from_rate == self.to_rate || self.from_rate == 0 || self.to_rate == 0
    }

    /// Convert one block, appending to `out`
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        if self.is_passthrough() {
            out.extend_from_slice(input);
            return;
        }
        if input.is_empty() {
            return;
        }

        let step = self.from_rate as f64 / self.to_rate as f64;
        let len = input.len() as f64;

        while self.pos < len - 1.0 {
            let sample = if self.pos < 0.0 {
                let frac = (self.pos + 1.0) as f32;
                self.last + (input[0] - self.last) * frac
            } else {
                let i0 = self.pos.floor() as usize;
                let frac = (self.pos - i0 as f64) as f32;
                input[i0] + (input[i0 + 1] - input[i0]) * frac
            };
            out.push(sample);
            self.pos += step;
        }

        self.last = input[input.len() - 1];
        self.pos -= len;
    }

    pub fn reset(&mut self) {
        self.pos = 0.0;
        self.last = 0.0;
    }
}

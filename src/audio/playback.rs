//! Gapless playback scheduling for inbound agent audio
//!
//! Every decoded chunk is placed on the output clock at the next free sample
//! position, which then advances by the chunk's sample count, so consecutive
//! chunks play back to back. Positions are whole samples at the playback
//! rate; durations are only derived from them for reporting. If the clock
//! has already passed the next position the chunk starts immediately instead
//! of in the past. An interruption flushes everything scheduled and disarms
//! the clock until `init` is called again.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::audio::buffer::samples_to_duration;
use crate::codec::decoder::DecoderStats;
use crate::codec::Pcm16Decoder;
use crate::error::{AudioError, Result};

/// Decoded mono audio placed at an absolute position on the output clock
#[derive(Debug, Clone)]
pub struct PlaybackSegment {
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
    /// First sample's position on the sink clock, in samples at `sample_rate`
    pub start_position: u64,
}

impl PlaybackSegment {
    /// Position right after the last sample; the next segment starts here
    pub fn end_position(&self) -> u64 {
        self.start_position + self.samples.len() as u64
    }

    pub fn start(&self) -> Duration {
        samples_to_duration(self.start_position as usize, self.sample_rate)
    }

    pub fn duration(&self) -> Duration {
        samples_to_duration(self.samples.len(), self.sample_rate)
    }

    pub fn end(&self) -> Duration {
        samples_to_duration(self.end_position() as usize, self.sample_rate)
    }
}

/// Open output stream with its own monotonic clock
pub trait PlaybackSink: Send {
    /// Current clock position in samples at the rate the sink was opened
    /// with. Never behind what has actually been played.
    fn position(&self) -> u64;

    /// Play `segment` starting at `segment.start_position`
    fn schedule(&mut self, segment: PlaybackSegment);

    /// Silence everything scheduled or playing, immediately
    fn stop_all(&mut self);
}

/// Hardware seam for speaker output
pub trait PlaybackOutput: Send {
    /// Open the output for mono audio at `sample_rate`
    fn open(&mut self, sample_rate: u32) -> std::result::Result<Box<dyn PlaybackSink>, AudioError>;
}

/// Scheduler statistics
#[derive(Debug, Clone, Default)]
pub struct PlaybackStats {
    pub segments_scheduled: u64,
    /// Chunks that arrived after the clock passed the next free position
    pub late_starts: u64,
    pub flushes: u64,
    pub audio_scheduled: Duration,
}

/// Gapless scheduler over a [`PlaybackOutput`]
pub struct PlaybackScheduler {
    output: Box<dyn PlaybackOutput>,
    sink: Option<Box<dyn PlaybackSink>>,
    sample_rate: u32,
    /// Next free sample position; `None` while disarmed
    next_position: Option<u64>,
    decoder: Pcm16Decoder,
    stats: PlaybackStats,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn PlaybackOutput>, sample_rate: u32) -> Self {
        Self {
            output,
            sink: None,
            sample_rate,
            next_position: None,
            decoder: Pcm16Decoder::default(),
            stats: PlaybackStats::default(),
        }
    }

    /// Open the output if needed and anchor the clock at its current time.
    ///
    /// After a flush this only re-arms the clock. Calling it while already
    /// armed keeps the existing anchor.
    pub fn init(&mut self) -> Result<()> {
        if self.next_position.is_some() {
            return Ok(());
        }

        let sink = match self.sink.take() {
            Some(sink) => sink,
            None => {
                let sink = self.output.open(self.sample_rate)?;
                info!("Playback output opened at {} Hz", self.sample_rate);
                sink
            }
        };

        let now = sink.position();
        self.sink = Some(sink);
        self.next_position = Some(now);
        debug!("Playback clock armed at sample {}", now);
        Ok(())
    }

    /// Decode a PCM16 chunk and schedule it right after the previous one.
    ///
    /// Fails with [`AudioError::PlaybackNotArmed`] unless `init` has run since
    /// the last flush or teardown. A malformed chunk is rejected without
    /// moving the clock.
    pub fn enqueue(&mut self, pcm: &[u8]) -> Result<PlaybackSegment> {
        let (Some(sink), Some(next)) = (self.sink.as_mut(), self.next_position) else {
            return Err(AudioError::PlaybackNotArmed.into());
        };

        let samples = self.decoder.decode(pcm)?;

        let now = sink.position();
        let start = if next < now {
            self.stats.late_starts += 1;
            debug!("Playback underrun: snapping sample {} -> {}", next, now);
            now
        } else {
            next
        };

        let segment = PlaybackSegment {
            samples: samples.into(),
            sample_rate: self.sample_rate,
            start_position: start,
        };
        self.next_position = Some(segment.end_position());

        if !segment.samples.is_empty() {
            self.stats.segments_scheduled += 1;
            self.stats.audio_scheduled += segment.duration();
            sink.schedule(segment.clone());
        }

        Ok(segment)
    }

    /// [`enqueue`](Self::enqueue) for a base64 transport-text payload
    pub fn enqueue_text(&mut self, payload: &str) -> Result<PlaybackSegment> {
        if !self.is_armed() {
            return Err(AudioError::PlaybackNotArmed.into());
        }
        let pcm = self.decoder.decode_text(payload)?;
        self.enqueue(&pcm)
    }

    /// Stop everything scheduled and disarm the clock. The output stays open.
    pub fn flush(&mut self) {
        if let Some(sink) = self.sink.as_mut() {
            sink.stop_all();
        }
        if self.next_position.take().is_some() {
            self.stats.flushes += 1;
            debug!("Playback flushed");
        }
    }

    /// Flush and release the output. Idempotent.
    pub fn teardown(&mut self) {
        self.next_position = None;
        if let Some(mut sink) = self.sink.take() {
            sink.stop_all();
            info!("Playback output released");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.next_position.is_some()
    }

    pub fn is_open(&self) -> bool {
        self.sink.is_some()
    }

    /// Where the next chunk will start, if armed
    pub fn next_play_time(&self) -> Option<Duration> {
        self.next_position
            .map(|position| samples_to_duration(position as usize, self.sample_rate))
    }

    /// [`next_play_time`](Self::next_play_time) in samples
    pub fn next_position(&self) -> Option<u64> {
        self.next_position
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn stats(&self) -> PlaybackStats {
        self.stats.clone()
    }

    pub fn decoder_stats(&self) -> DecoderStats {
        self.decoder.stats()
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.teardown();
    }
}

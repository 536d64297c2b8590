//! Microphone capture pipeline
//!
//! The device callback hands mono blocks (already at the capture rate) to
//! the pipeline, which assembles fixed-size windows, encodes each one as
//! PCM16 transport text and hands it to the registered sink. Muting skips
//! windows entirely; the device keeps running.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::audio::buffer::{samples_to_duration, AudioFrame, WindowAssembler};
use crate::audio::device::DeviceClaim;
use crate::codec::Pcm16Encoder;
use crate::config::CaptureConfig;
use crate::error::AudioError;
use crate::protocol::EncodedMediaPacket;

/// Callback receiving mono blocks at the requested rate
pub type SampleHandler = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Hardware seam for microphone input
pub trait CaptureBackend: Send {
    /// Identifier used for the exclusive device claim
    fn device_id(&self) -> String;

    /// Acquire the device and start delivering mono blocks at `sample_rate`
    fn open(&mut self, sample_rate: u32, handler: SampleHandler) -> Result<(), AudioError>;

    /// Release the device. Must be a no-op when not open.
    fn close(&mut self);

    /// Asynchronous stream errors reported since the last call
    fn take_errors(&mut self) -> Vec<AudioError> {
        Vec::new()
    }
}

/// Encoded capture window handed to the sink
#[derive(Debug, Clone)]
pub struct EncodedAudioFrame {
    pub sequence: u32,
    /// Window start, microseconds since capture started
    pub timestamp: u64,
    pub packet: EncodedMediaPacket,
}

/// Receiver of encoded capture windows; must not block
pub trait FrameSink: Send {
    fn deliver(&mut self, frame: EncodedAudioFrame);
}

impl<F> FrameSink for F
where
    F: FnMut(EncodedAudioFrame) + Send,
{
    fn deliver(&mut self, frame: EncodedAudioFrame) {
        self(frame)
    }
}

/// Mute flag shared between the session owner and the capture callback
#[derive(Debug, Clone, Default)]
pub struct MuteFlag(Arc<AtomicBool>);

impl MuteFlag {
    pub fn new(muted: bool) -> Self {
        Self(Arc::new(AtomicBool::new(muted)))
    }

    pub fn mute(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn unmute(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn set(&self, muted: bool) {
        self.0.store(muted, Ordering::SeqCst);
    }

    pub fn is_muted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct CaptureCounters {
    windows_delivered: AtomicU64,
    windows_muted: AtomicU64,
    encode_failures: AtomicU64,
}

/// Capture statistics
#[derive(Debug, Clone, Default)]
pub struct CaptureStats {
    pub windows_delivered: u64,
    pub windows_muted: u64,
    pub encode_failures: u64,
}

/// State touched by the device callback
struct CaptureShared {
    sink: Option<Box<dyn FrameSink>>,
    assembler: WindowAssembler,
    encoder: Pcm16Encoder,
    sequence: u32,
}

impl CaptureShared {
    fn reset(&mut self) {
        self.assembler.clear();
        self.encoder.reset_stats();
        self.sequence = 0;
    }

    fn ingest(&mut self, samples: &[f32], mute: &MuteFlag, counters: &CaptureCounters) {
        let CaptureShared {
            sink,
            assembler,
            encoder,
            sequence,
        } = self;

        // Stopped: nothing is delivered, partial windows are not kept
        let Some(sink) = sink.as_mut() else {
            return;
        };

        let window_len = assembler.window_len();
        assembler.push(samples, |window| {
            let seq = *sequence;
            *sequence = sequence.wrapping_add(1);

            if mute.is_muted() {
                counters.windows_muted.fetch_add(1, Ordering::Relaxed);
                return;
            }

            let rate = encoder.sample_rate();
            let timestamp = samples_to_duration(seq as usize * window_len, rate).as_micros() as u64;
            let frame = AudioFrame::from_f32(window, rate, timestamp, seq);

            match encoder.encode(&frame.samples) {
                Ok(packet) => {
                    counters.windows_delivered.fetch_add(1, Ordering::Relaxed);
                    sink.deliver(EncodedAudioFrame {
                        sequence: seq,
                        timestamp,
                        packet,
                    });
                }
                Err(e) => {
                    counters.encode_failures.fetch_add(1, Ordering::Relaxed);
                    warn!("Dropping capture window {}: {}", seq, e);
                }
            }
        });
    }
}

/// Microphone capture pipeline for one input device
pub struct CapturePipeline {
    backend: Box<dyn CaptureBackend>,
    sample_rate: u32,
    mute: MuteFlag,
    shared: Arc<Mutex<CaptureShared>>,
    counters: Arc<CaptureCounters>,
    /// Held while running; its presence is the running flag
    claim: Option<DeviceClaim>,
}

impl CapturePipeline {
    /// Create a stopped pipeline. The window size is fixed here.
    pub fn new(backend: Box<dyn CaptureBackend>, config: &CaptureConfig, mute: MuteFlag) -> Self {
        Self {
            backend,
            sample_rate: config.sample_rate,
            mute,
            shared: Arc::new(Mutex::new(CaptureShared {
                sink: None,
                assembler: WindowAssembler::new(config.window_samples),
                encoder: Pcm16Encoder::new(config.sample_rate),
                sequence: 0,
            })),
            counters: Arc::new(CaptureCounters::default()),
            claim: None,
        }
    }

    /// Acquire the device and start delivering windows to `sink`.
    ///
    /// Calling this while running logs a warning and does nothing.
    pub fn start(&mut self, sink: Box<dyn FrameSink>) -> Result<(), AudioError> {
        if self.claim.is_some() {
            warn!("Capture already running on {}; ignoring start", self.backend.device_id());
            return Ok(());
        }

        let device_id = self.backend.device_id();
        let claim = DeviceClaim::acquire(&device_id)?;

        {
            let mut shared = self.shared.lock();
            shared.reset();
            shared.sink = Some(sink);
        }

        let shared = self.shared.clone();
        let mute = self.mute.clone();
        let counters = self.counters.clone();
        let handler: SampleHandler = Box::new(move |samples: &[f32]| {
            shared.lock().ingest(samples, &mute, &counters);
        });

        if let Err(e) = self.backend.open(self.sample_rate, handler) {
            self.shared.lock().sink = None;
            warn!("Failed to open capture device {}: {}", device_id, e);
            return Err(e);
        }

        self.claim = Some(claim);
        info!(
            "Capture started on {} ({} Hz, {} samples/window)",
            device_id,
            self.sample_rate,
            self.shared.lock().assembler.window_len()
        );
        Ok(())
    }

    /// Release the device and the sink. Safe to call repeatedly.
    ///
    /// Once this returns no further window reaches the sink; a partially
    /// assembled window is discarded.
    pub fn stop(&mut self) {
        {
            let mut shared = self.shared.lock();
            shared.sink = None;
            shared.assembler.clear();
        }

        if let Some(claim) = self.claim.take() {
            self.backend.close();
            info!("Capture stopped on {}", claim.device_id());
        } else {
            debug!("Capture stop requested while not running");
        }
    }

    pub fn mute(&self) {
        self.mute.mute();
    }

    pub fn unmute(&self) {
        self.mute.unmute();
    }

    pub fn is_muted(&self) -> bool {
        self.mute.is_muted()
    }

    pub fn mute_flag(&self) -> MuteFlag {
        self.mute.clone()
    }

    /// Check if capture is running
    pub fn is_running(&self) -> bool {
        self.claim.is_some()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Drain device errors raised while the stream runs
    pub fn take_errors(&mut self) -> Vec<AudioError> {
        self.backend.take_errors()
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            windows_delivered: self.counters.windows_delivered.load(Ordering::Relaxed),
            windows_muted: self.counters.windows_muted.load(Ordering::Relaxed),
            encode_failures: self.counters.encode_failures.load(Ordering::Relaxed),
        }
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

//! cpal-backed speaker output
//!
//! Segments are resampled to the device rate when scheduled and handed to
//! the render callback through a lock-free queue. The callback renders them
//! at absolute frame positions and publishes how many frames it has played,
//! which is the clock the scheduler plans against. A flush bumps an epoch
//! the callback checks on every buffer.
//!
//! Source position `p` maps to device frame `floor(p * device / source)`.
//! A segment covers the frames between the mappings of its start and end
//! positions, so back-to-back segments tile the device timeline exactly.
//! The clock is reported rounded up, so an underrun snap never lands on a
//! frame that has already been played.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use crossbeam::queue::ArrayQueue;
use crossbeam_channel::bounded;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::audio::device::resolve_output;
use crate::audio::playback::{PlaybackOutput, PlaybackSegment, PlaybackSink};
use crate::audio::resample::resample_to_len;
use crate::constants::PLAYBACK_COMMAND_CAPACITY;
use crate::error::AudioError;

/// Segment converted to device frames
struct QueuedSegment {
    start_frame: u64,
    samples: Vec<f32>,
    epoch: u64,
}

impl QueuedSegment {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// State shared between the sink and the render callback
struct RenderShared {
    queue: ArrayQueue<QueuedSegment>,
    frames_rendered: AtomicU64,
    flush_epoch: AtomicU64,
}

/// Render-side state, owned by the callback
struct Renderer {
    shared: Arc<RenderShared>,
    segments: VecDeque<QueuedSegment>,
    position: u64,
    epoch: u64,
}

impl Renderer {
    fn new(shared: Arc<RenderShared>) -> Self {
        Self {
            shared,
            segments: VecDeque::new(),
            position: 0,
            epoch: 0,
        }
    }

    fn drain_commands(&mut self) {
        let epoch = self.shared.flush_epoch.load(Ordering::Acquire);
        if epoch != self.epoch {
            self.segments.clear();
            self.epoch = epoch;
        }
        while let Some(segment) = self.shared.queue.pop() {
            if segment.epoch == epoch {
                self.segments.push_back(segment);
            }
        }
    }

    fn next_sample(&mut self) -> f32 {
        let pos = self.position;
        self.position += 1;

        while self
            .segments
            .front()
            .is_some_and(|segment| segment.end_frame() <= pos)
        {
            self.segments.pop_front();
        }

        match self.segments.front() {
            Some(segment) if segment.start_frame <= pos => {
                segment.samples[(pos - segment.start_frame) as usize]
            }
            _ => 0.0,
        }
    }

    fn render<T>(&mut self, data: &mut [T], channels: usize)
    where
        T: SizedSample + FromSample<f32>,
    {
        self.drain_commands();
        for frame in data.chunks_mut(channels.max(1)) {
            let value = T::from_sample(self.next_sample());
            for out in frame.iter_mut() {
                *out = value;
            }
        }
        self.shared
            .frames_rendered
            .store(self.position, Ordering::Release);
    }
}

/// Speaker output on a cpal device
pub struct CpalOutput {
    device_id: Option<String>,
}

impl CpalOutput {
    pub fn new(device_id: Option<String>) -> Self {
        Self { device_id }
    }
}

impl PlaybackOutput for CpalOutput {
    fn open(&mut self, sample_rate: u32) -> Result<Box<dyn PlaybackSink>, AudioError> {
        Ok(Box::new(CpalSink::open(self.device_id.as_deref(), sample_rate)?))
    }
}

/// Open output stream; dropping it releases the device
pub struct CpalSink {
    shared: Arc<RenderShared>,
    device_rate: u32,
    /// Rate of the positions the scheduler hands us
    source_rate: u32,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CpalSink {
    fn open(device_id: Option<&str>, source_rate: u32) -> Result<Self, AudioError> {
        let device = resolve_output(device_id)?;
        let supported = device.default_output_config()?;
        let format = supported.sample_format();
        let config: cpal::StreamConfig = supported.config();
        let device_rate = config.sample_rate.0;

        info!(
            "Opening {} at {} Hz x{} ({:?}) for {} Hz audio",
            device.name, device_rate, config.channels, format, source_rate
        );

        let shared = Arc::new(RenderShared {
            queue: ArrayQueue::new(PLAYBACK_COMMAND_CAPACITY),
            frames_rendered: AtomicU64::new(0),
            flush_epoch: AtomicU64::new(0),
        });

        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let renderer = Renderer::new(shared.clone());
        let running_for_loop = running.clone();
        let handle = thread::Builder::new()
            .name("playback-output".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();
                let stream = match format {
                    cpal::SampleFormat::F32 => output_stream::<f32>(&cpal_device, &config, renderer),
                    cpal::SampleFormat::I16 => output_stream::<i16>(&cpal_device, &config, renderer),
                    cpal::SampleFormat::U16 => output_stream::<u16>(&cpal_device, &config, renderer),
                    cpal::SampleFormat::I32 => output_stream::<i32>(&cpal_device, &config, renderer),
                    other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
                };

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(e.into()));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep thread alive while running
                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                drop(stream);
                debug!("Playback stream released");
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let mut sink = Self {
            shared,
            device_rate: device_rate.max(1),
            source_rate: source_rate.max(1),
            running,
            thread_handle: Some(handle),
        };

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(sink),
            Ok(Err(e)) => {
                sink.close();
                Err(e)
            }
            Err(_) => {
                sink.close();
                Err(AudioError::DeviceUnavailable(
                    "playback thread exited before the stream started".to_string(),
                ))
            }
        }
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    /// Device frame where source position `position` begins
    fn frame_at(&self, position: u64) -> u64 {
        (position as u128 * self.device_rate as u128 / self.source_rate as u128) as u64
    }
}

impl PlaybackSink for CpalSink {
    fn position(&self) -> u64 {
        let frames = self.shared.frames_rendered.load(Ordering::Acquire) as u128;
        (frames * self.source_rate as u128).div_ceil(self.device_rate as u128) as u64
    }

    fn schedule(&mut self, segment: PlaybackSegment) {
        let start_frame = self.frame_at(segment.start_position);
        let frames = self.frame_at(segment.end_position()) - start_frame;
        let queued = QueuedSegment {
            start_frame,
            samples: resample_to_len(
                &segment.samples,
                segment.sample_rate,
                self.device_rate,
                frames as usize,
            ),
            epoch: self.shared.flush_epoch.load(Ordering::Acquire),
        };
        if self.shared.queue.push(queued).is_err() {
            warn!(
                "Playback queue full; dropping segment at sample {}",
                segment.start_position
            );
        }
    }

    fn stop_all(&mut self) {
        self.shared.flush_epoch.fetch_add(1, Ordering::AcqRel);
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.close();
    }
}

fn output_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut renderer: Renderer,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| renderer.render(data, channels),
        |err| error!("Playback stream error: {}", err),
        None,
    )?;
    Ok(stream)
}

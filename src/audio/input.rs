//! cpal-backed microphone input
//!
//! The cpal stream lives on a dedicated thread for as long as capture runs.
//! Device blocks are down-mixed to mono and resampled to the requested rate
//! before they reach the pipeline.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::audio::capture::{CaptureBackend, SampleHandler};
use crate::audio::device::{resolve_input, AudioDevice};
use crate::audio::resample::{downmix_to_mono, LinearResampler};
use crate::error::AudioError;

/// Microphone input on a cpal device
pub struct CpalInput {
    /// Configured device id (`None` = host default)
    device_id: Option<String>,

    /// Whether the stream thread should keep running
    running: Arc<AtomicBool>,

    /// Stream thread handle
    thread_handle: Option<JoinHandle<()>>,

    /// Asynchronous stream errors reported by the host
    error_rx: Option<Receiver<AudioError>>,
}

impl CpalInput {
    pub fn new(device_id: Option<String>) -> Self {
        Self {
            device_id,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            error_rx: None,
        }
    }
}

impl CaptureBackend for CpalInput {
    fn device_id(&self) -> String {
        match resolve_input(self.device_id.as_deref()) {
            Ok(device) => device.id,
            Err(_) => self
                .device_id
                .clone()
                .unwrap_or_else(|| "input:default".to_string()),
        }
    }

    fn open(&mut self, sample_rate: u32, handler: SampleHandler) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = resolve_input(self.device_id.as_deref())?;
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        self.error_rx = Some(error_rx);

        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("capture-input".to_string())
            .spawn(move || {
                let stream = match build_stream(&device, sample_rate, handler, error_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        running.store(false, Ordering::SeqCst);
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    running.store(false, Ordering::SeqCst);
                    let _ = ready_tx.send(Err(e.into()));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep thread alive while running
                while running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }

                // Stream is dropped here, stopping capture
                drop(stream);
                debug!("Capture stream released");
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.close();
                // Busy devices and denied permissions surface as build failures
                Err(match e {
                    AudioError::StreamError(msg) => {
                        AudioError::DeviceUnavailable(msg)
                    }
                    other => other,
                })
            }
            Err(_) => {
                self.close();
                Err(AudioError::DeviceUnavailable(
                    "capture thread exited before the stream started".to_string(),
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

    fn take_errors(&mut self) -> Vec<AudioError> {
        self.error_rx
            .as_ref()
            .map(|rx| rx.try_iter().collect())
            .unwrap_or_default()
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_stream(
    device: &AudioDevice,
    sample_rate: u32,
    mut handler: SampleHandler,
    error_tx: crossbeam_channel::Sender<AudioError>,
) -> Result<cpal::Stream, AudioError> {
    let supported = device.default_input_config()?;
    let format = supported.sample_format();
    let config: cpal::StreamConfig = supported.config();
    let channels = config.channels;

    info!(
        "Opening {} at {} Hz x{} ({:?}), delivering mono {} Hz",
        device.name, config.sample_rate.0, channels, format, sample_rate
    );

    let mut resampler = LinearResampler::new(config.sample_rate.0, sample_rate);
    let mut resampled = Vec::new();
    let process = move |interleaved: &[f32]| {
        let mono = downmix_to_mono(interleaved, channels);
        resampled.clear();
        resampler.process(&mono, &mut resampled);
        if !resampled.is_empty() {
            handler(&resampled);
        }
    };

    let device = device.inner();
    match format {
        cpal::SampleFormat::F32 => input_stream::<f32>(device, &config, process, error_tx),
        cpal::SampleFormat::I16 => input_stream::<i16>(device, &config, process, error_tx),
        cpal::SampleFormat::U16 => input_stream::<u16>(device, &config, process, error_tx),
        cpal::SampleFormat::I32 => input_stream::<i32>(device, &config, process, error_tx),
        other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
    }
}

fn input_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut process: impl FnMut(&[f32]) + Send + 'static,
    error_tx: crossbeam_channel::Sender<AudioError>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let mut scratch: Vec<f32> = Vec::new();
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            scratch.clear();
            scratch.extend(data.iter().map(|s| s.to_sample::<f32>()));
            process(&scratch);
        },
        move |err| {
            error!("Capture stream error: {}", err);
            let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
        },
        None,
    )?;
    Ok(stream)
}

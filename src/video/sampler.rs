//! Periodic camera snapshot sampler

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::codec::encode_jpeg;
use crate::config::VideoConfig;
use crate::error::{CodecError, VideoError};
use crate::protocol::EncodedMediaPacket;
use crate::video::source::FrameSource;

/// Receiver of encoded snapshots; must not block
pub trait VideoSink: Send + 'static {
    fn deliver(&mut self, packet: EncodedMediaPacket);
}

impl<F> VideoSink for F
where
    F: FnMut(EncodedMediaPacket) + Send + 'static,
{
    fn deliver(&mut self, packet: EncodedMediaPacket) {
        self(packet)
    }
}

type SinkSlot = Arc<Mutex<Option<Box<dyn VideoSink>>>>;

#[derive(Default)]
struct VideoCounters {
    frames_emitted: AtomicU64,
    ticks_skipped: AtomicU64,
    encode_failures: AtomicU64,
}

/// Sampler statistics
#[derive(Debug, Clone, Default)]
pub struct VideoStats {
    pub frames_emitted: u64,
    /// Ticks with no frame available yet
    pub ticks_skipped: u64,
    pub encode_failures: u64,
}

/// Result of one sampling tick
enum Tick {
    NotReady,
    Failed(CodecError),
    Frame(EncodedMediaPacket),
}

/// Grab and encode one frame. Blocking.
fn sample_once(source: &mut dyn FrameSource, quality: u8, max_dimension: Option<u32>) -> Tick {
    let Some(frame) = source.grab() else {
        return Tick::NotReady;
    };
    match encode_jpeg(&frame, quality, max_dimension).and_then(|jpeg| EncodedMediaPacket::jpeg(&jpeg)) {
        Ok(packet) => Tick::Frame(packet),
        Err(e) => Tick::Failed(e),
    }
}

/// Samples one still frame per interval while running
pub struct VideoSampler {
    config: VideoConfig,
    /// Per-run sink; emptied by `stop` so a tick racing it has nowhere to deliver
    sink: Option<SinkSlot>,
    task: Option<JoinHandle<()>>,
    counters: Arc<VideoCounters>,
}

impl VideoSampler {
    pub fn new(config: VideoConfig) -> Self {
        Self {
            config,
            sink: None,
            task: None,
            counters: Arc::new(VideoCounters::default()),
        }
    }

    /// Start sampling `source` into `sink`. Must be called inside a Tokio runtime.
    ///
    /// The first tick fires one interval after start. Starting while running
    /// logs a warning and does nothing.
    pub fn start(
        &mut self,
        mut source: Box<dyn FrameSource>,
        sink: Box<dyn VideoSink>,
    ) -> Result<(), VideoError> {
        if self.is_running() {
            warn!("Video sampler already running; ignoring start");
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| VideoError::NoRuntime)?;

        let slot: SinkSlot = Arc::new(Mutex::new(Some(sink)));
        let task_slot = slot.clone();
        let counters = self.counters.clone();
        let period = self.config.interval();
        let quality = self.config.jpeg_quality;
        let max_dimension = self.config.max_dimension;

        let task = runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                // File reads and JPEG encoding stay off the async workers
                let sampled = tokio::task::spawn_blocking(move || {
                    let outcome = sample_once(source.as_mut(), quality, max_dimension);
                    (source, outcome)
                })
                .await;

                let outcome = match sampled {
                    Ok((returned, outcome)) => {
                        source = returned;
                        outcome
                    }
                    Err(e) => {
                        error!("Camera sampling task failed: {}", e);
                        break;
                    }
                };

                let packet = match outcome {
                    Tick::NotReady => {
                        counters.ticks_skipped.fetch_add(1, Ordering::Relaxed);
                        trace!("No camera frame yet; skipping tick");
                        continue;
                    }
                    Tick::Failed(e) => {
                        counters.encode_failures.fetch_add(1, Ordering::Relaxed);
                        warn!("Dropping camera frame: {}", e);
                        continue;
                    }
                    Tick::Frame(packet) => packet,
                };

                // Stop empties the slot; a frame encoded across it is dropped here
                let mut sink = task_slot.lock();
                match sink.as_mut() {
                    Some(sink) => {
                        sink.deliver(packet);
                        counters.frames_emitted.fetch_add(1, Ordering::Relaxed);
                    }
                    None => break,
                }
            }
            debug!("Video sampler task finished");
        });

        self.sink = Some(slot);
        self.task = Some(task);
        info!("Video sampler started ({:?} interval)", period);
        Ok(())
    }

    /// Cancel the timer. Nothing is emitted once this returns; safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(slot) = self.sink.take() {
            slot.lock().take();
        }
        if let Some(task) = self.task.take() {
            task.abort();
            info!("Video sampler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn stats(&self) -> VideoStats {
        VideoStats {
            frames_emitted: self.counters.frames_emitted.load(Ordering::Relaxed),
            ticks_skipped: self.counters.ticks_skipped.load(Ordering::Relaxed),
            encode_failures: self.counters.encode_failures.load(Ordering::Relaxed),
        }
    }
}

impl Drop for VideoSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

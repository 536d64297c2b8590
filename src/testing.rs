//! In-memory stand-ins for the hardware and network seams

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::audio::buffer::duration_to_samples;
use crate::audio::capture::{CaptureBackend, SampleHandler};
use crate::audio::playback::{PlaybackOutput, PlaybackSegment, PlaybackSink};
use crate::codec::{buffer_to_transport_text, encode_pcm16};
use crate::config::Credentials;
use crate::error::{AudioError, TransportError};
use crate::network::transport::{Connector, DuplexLink, Inbound};
use crate::protocol::{ClientMessage, ServerMessage};

static NEXT_DEVICE: AtomicUsize = AtomicUsize::new(0);

#[derive(Default)]
struct FakeCaptureState {
    handler: Mutex<Option<SampleHandler>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
    fail_open: AtomicBool,
    retain_handler: AtomicBool,
    errors: Mutex<Vec<AudioError>>,
}

/// Microphone driven by `feed`; clones share state
#[derive(Clone)]
pub struct FakeCapture {
    id: String,
    state: Arc<FakeCaptureState>,
}

impl FakeCapture {
    pub fn new() -> Self {
        Self {
            id: format!("input:fake-{}", NEXT_DEVICE.fetch_add(1, Ordering::Relaxed)),
            state: Arc::default(),
        }
    }

    /// Refuse to open, as if permission were denied
    pub fn failing(self) -> Self {
        self.state.fail_open.store(true, Ordering::SeqCst);
        self
    }

    /// Keep calling the handler after close, as a late device callback would
    pub fn retain_handler_after_close(self) -> Self {
        self.state.retain_handler.store(true, Ordering::SeqCst);
        self
    }

    /// Deliver a block as the device callback would
    pub fn feed(&self, samples: &[f32]) {
        if let Some(handler) = self.state.handler.lock().as_mut() {
            handler(samples);
        }
    }

    /// Report an asynchronous stream error, as the host would
    pub fn raise_error(&self, message: &str) {
        self.state
            .errors
            .lock()
            .push(AudioError::StreamError(message.to_string()));
    }

    pub fn device_id(&self) -> String {
        self.id.clone()
    }

    pub fn open_count(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }
}

impl CaptureBackend for FakeCapture {
    fn device_id(&self) -> String {
        self.id.clone()
    }

    fn open(&mut self, _sample_rate: u32, handler: SampleHandler) -> Result<(), AudioError> {
        if self.state.fail_open.load(Ordering::SeqCst) {
            return Err(AudioError::DeviceUnavailable("permission denied".to_string()));
        }
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        *self.state.handler.lock() = Some(handler);
        Ok(())
    }

    fn close(&mut self) {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        if !self.state.retain_handler.load(Ordering::SeqCst) {
            self.state.handler.lock().take();
        }
    }

    fn take_errors(&mut self) -> Vec<AudioError> {
        std::mem::take(&mut *self.state.errors.lock())
    }
}

/// Playback clock moved by hand
#[derive(Clone, Default)]
pub struct ManualClock(Arc<Mutex<Duration>>);

impl ManualClock {
    pub fn set(&self, at: Duration) {
        *self.0.lock() = at;
    }

    pub fn now(&self) -> Duration {
        *self.0.lock()
    }
}

#[derive(Default)]
struct FakeOutputState {
    opens: AtomicUsize,
    stops: AtomicUsize,
    live: AtomicUsize,
    fail_open: AtomicBool,
    scheduled: Mutex<Vec<PlaybackSegment>>,
}

/// Speaker recording what gets scheduled; clones share state
#[derive(Clone, Default)]
pub struct FakeOutput {
    clock: ManualClock,
    state: Arc<FakeOutputState>,
}

impl FakeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(self) -> Self {
        self.state.fail_open.store(true, Ordering::SeqCst);
        self
    }

    pub fn clock(&self) -> ManualClock {
        self.clock.clone()
    }

    pub fn scheduled(&self) -> Vec<PlaybackSegment> {
        self.state.scheduled.lock().clone()
    }

    pub fn open_count(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    /// Number of `stop_all` calls
    pub fn stop_count(&self) -> usize {
        self.state.stops.load(Ordering::SeqCst)
    }

    /// Sinks opened and not yet dropped
    pub fn live_sinks(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }
}

impl PlaybackOutput for FakeOutput {
    fn open(&mut self, sample_rate: u32) -> Result<Box<dyn PlaybackSink>, AudioError> {
        if self.state.fail_open.load(Ordering::SeqCst) {
            return Err(AudioError::DeviceUnavailable("no output device".to_string()));
        }
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        self.state.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSink {
            clock: self.clock.clone(),
            sample_rate,
            state: self.state.clone(),
        }))
    }
}

struct FakeSink {
    clock: ManualClock,
    sample_rate: u32,
    state: Arc<FakeOutputState>,
}

impl PlaybackSink for FakeSink {
    fn position(&self) -> u64 {
        duration_to_samples(self.clock.now(), self.sample_rate)
    }

    fn schedule(&mut self, segment: PlaybackSegment) {
        self.state.scheduled.lock().push(segment);
    }

    fn stop_all(&mut self) {
        self.state.stops.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for FakeSink {
    fn drop(&mut self) {
        self.state.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Remote end of a fake link
pub struct FakeRemote {
    pub outbound: mpsc::Receiver<ClientMessage>,
    pub inbound: mpsc::Sender<Inbound>,
    pub shutdown: CancellationToken,
}

impl FakeRemote {
    pub async fn next_message(&mut self) -> ClientMessage {
        tokio::time::timeout(Duration::from_secs(5), self.outbound.recv())
            .await
            .expect("timed out waiting for an outbound message")
            .expect("outbound queue closed")
    }

    pub async fn send_json(&self, json: &str) {
        let message = ServerMessage::from_json(json).expect("test message must parse");
        self.inbound
            .send(Inbound::Message(message))
            .await
            .expect("session dropped the inbound queue");
    }

    /// Model turn carrying `ms` of 24 kHz audio
    pub async fn send_audio_ms(&self, ms: usize) {
        let pcm = encode_pcm16(&vec![0.2f32; 24 * ms]);
        let json = format!(
            r#"{{"serverContent":{{"modelTurn":{{"parts":[{{"inlineData":{{"mimeType":"audio/pcm;rate=24000","data":"{}"}}}}]}}}}}}"#,
            buffer_to_transport_text(&pcm)
        );
        self.send_json(&json).await;
    }

    pub async fn interrupt(&self) {
        self.send_json(r#"{"serverContent":{"interrupted":true}}"#).await;
    }

    pub async fn close(&self, code: Option<u16>, reason: &str) {
        let _ = self
            .inbound
            .send(Inbound::Closed {
                code,
                reason: reason.to_string(),
            })
            .await;
    }

    pub async fn fail(&self, error: TransportError) {
        let _ = self.inbound.send(Inbound::Error(error)).await;
    }
}

enum Behavior {
    /// Link up; acknowledge setup when `ack` is set
    Accept { ack: bool },
    Reject(fn() -> TransportError),
    /// Never complete the handshake
    Hang,
}

/// Connector handing out in-memory links
pub struct FakeConnector {
    behavior: Behavior,
    remotes: Mutex<Vec<FakeRemote>>,
    connects: AtomicUsize,
}

impl FakeConnector {
    fn with(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            remotes: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
        })
    }

    /// Accepts and acknowledges setup immediately
    pub fn accepting() -> Arc<Self> {
        Self::with(Behavior::Accept { ack: true })
    }

    /// Accepts but leaves setup unacknowledged; the test drives the remote
    pub fn unacknowledged() -> Arc<Self> {
        Self::with(Behavior::Accept { ack: false })
    }

    pub fn rejecting(error: fn() -> TransportError) -> Arc<Self> {
        Self::with(Behavior::Reject(error))
    }

    pub fn hanging() -> Arc<Self> {
        Self::with(Behavior::Hang)
    }

    pub fn take_remote(&self) -> FakeRemote {
        self.remotes.lock().pop().expect("no link was opened")
    }

    /// Wait until a link has been opened, then take its remote end
    pub async fn wait_for_remote(&self) -> FakeRemote {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(remote) = self.remotes.lock().pop() {
                    return remote;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("no link was opened")
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        _endpoint: &str,
        credentials: &Credentials,
    ) -> Result<DuplexLink, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        credentials.validate()?;

        let ack = match &self.behavior {
            Behavior::Accept { ack } => *ack,
            Behavior::Reject(error) => return Err(error()),
            Behavior::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        };

        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        let shutdown = CancellationToken::new();

        if ack {
            let message = ServerMessage::from_json(r#"{"setupComplete":{}}"#)
                .map_err(|e| TransportError::Protocol(e.to_string()))?;
            let _ = inbound_tx.send(Inbound::Message(message)).await;
        }

        self.remotes.lock().push(FakeRemote {
            outbound: outbound_rx,
            inbound: inbound_tx,
            shutdown: shutdown.clone(),
        });

        Ok(DuplexLink::new(outbound_tx, inbound_rx, shutdown))
    }
}

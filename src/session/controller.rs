//! Session controller
//!
//! Owns the transport link, the capture pipeline, the playback scheduler
//! and the video sampler for one conversation, and is the only place state
//! transitions happen. Capture output is queued straight onto the link from
//! the device callback; inbound traffic is handled by one receive task.
//!
//! Lock order: `machine` before `playback`. No lock is held across an await.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audio::capture::{CaptureBackend, CapturePipeline, EncodedAudioFrame, MuteFlag};
use crate::audio::input::CpalInput;
use crate::audio::output::CpalOutput;
use crate::audio::playback::{PlaybackOutput, PlaybackScheduler};
use crate::config::{AppConfig, Credentials};
use crate::error::{AudioError, Error, Result, SessionError, TransportError};
use crate::network::transport::{Connector, DuplexLink, Inbound, LinkSender};
use crate::protocol::{ClientMessage, EncodedMediaPacket, ServerMessage, Setup};
use crate::session::observer::{EventRelay, SessionEvent, SessionObserver, SpeakingIndicator};
use crate::session::state::{SessionState, StateMachine, Trigger};
use crate::video::{FrameSource, VideoSampler};

/// WebSocket close code the service uses for rejected credentials
const POLICY_VIOLATION: u16 = 1008;

/// Hardware the session drives
pub struct MediaBackends {
    pub capture: Box<dyn CaptureBackend>,
    pub playback: Box<dyn PlaybackOutput>,
}

impl MediaBackends {
    /// Default cpal devices, or the ones named in `config`
    pub fn cpal(config: &AppConfig) -> Self {
        Self {
            capture: Box::new(CpalInput::new(config.capture.device_id.clone())),
            playback: Box::new(CpalOutput::new(config.playback.device_id.clone())),
        }
    }
}

#[derive(Default)]
struct SessionCounters {
    audio_frames_sent: AtomicU64,
    audio_frames_dropped: AtomicU64,
    video_frames_sent: AtomicU64,
    video_frames_dropped: AtomicU64,
    chunks_played: AtomicU64,
    chunks_malformed: AtomicU64,
    interruptions: AtomicU64,
    turns_completed: AtomicU64,
}

/// Traffic counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    pub audio_frames_sent: u64,
    pub audio_frames_dropped: u64,
    pub video_frames_sent: u64,
    pub video_frames_dropped: u64,
    pub chunks_played: u64,
    pub chunks_malformed: u64,
    pub interruptions: u64,
    pub turns_completed: u64,
}

/// Snapshot for the control panel
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: Uuid,
    pub state: SessionState,
    pub muted: bool,
    pub video_enabled: bool,
    pub agent_speaking: bool,
    pub created_at: DateTime<Utc>,
    pub stats: SessionStats,
}

/// Outbound half of an open link
struct LinkHandle {
    sender: LinkSender,
    shutdown: CancellationToken,
}

struct Inner {
    this: Weak<Inner>,
    id: Uuid,
    config: AppConfig,
    connector: Arc<dyn Connector>,
    created_at: DateTime<Utc>,

    machine: Mutex<StateMachine>,
    mute: MuteFlag,
    capture: Mutex<CapturePipeline>,
    playback: Mutex<PlaybackScheduler>,
    video: Mutex<VideoSampler>,
    link: Mutex<Option<LinkHandle>>,

    /// Registered once by `connect`
    events: OnceLock<Arc<EventRelay>>,
    speaking: OnceLock<Arc<SpeakingIndicator>>,

    /// Cancels an in-flight connect and the receive task
    cancel: CancellationToken,
    torn_down: AtomicBool,
    counters: SessionCounters,
}

/// Handle to one conversation with the remote agent.
///
/// Cheap to clone; all clones drive the same session. A controller connects
/// at most once: after `Closed` or `Failed`, retry with a new controller.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(config: AppConfig, media: MediaBackends, connector: Arc<dyn Connector>) -> Self {
        let mute = MuteFlag::new(config.capture.start_muted);
        let capture = CapturePipeline::new(media.capture, &config.capture, mute.clone());
        let playback = PlaybackScheduler::new(media.playback, config.playback.sample_rate);
        let video = VideoSampler::new(config.video.clone());

        Self {
            inner: Arc::new_cyclic(|this| Inner {
                this: this.clone(),
                id: Uuid::new_v4(),
                config,
                connector,
                created_at: Utc::now(),
                machine: Mutex::new(StateMachine::new()),
                mute,
                capture: Mutex::new(capture),
                playback: Mutex::new(playback),
                video: Mutex::new(video),
                link: Mutex::new(None),
                events: OnceLock::new(),
                speaking: OnceLock::new(),
                cancel: CancellationToken::new(),
                torn_down: AtomicBool::new(false),
                counters: SessionCounters::default(),
            }),
        }
    }

    /// Identifier generated before connect
    pub fn session_id(&self) -> Uuid {
        self.inner.id
    }

    pub fn state(&self) -> SessionState {
        self.inner.machine.lock().state()
    }

    /// Establish the session.
    ///
    /// Registers `observer`, opens the link, registers the persona and
    /// voice once, waits for the service to acknowledge, then starts the
    /// microphone and playback and sends the optional greeting. Any failure
    /// leaves the controller `Failed` with every resource released.
    pub async fn connect(
        &self,
        credentials: Credentials,
        observer: impl SessionObserver,
    ) -> Result<()> {
        let inner = &self.inner;

        {
            let mut machine = inner.machine.lock();
            if machine.state() != SessionState::Idle {
                return Err(SessionError::InvalidTransition {
                    from: machine.state(),
                    trigger: Trigger::Connect,
                }
                .into());
            }
            let relay = EventRelay::new(Arc::new(observer));
            let _ = inner.speaking.set(SpeakingIndicator::new(
                inner.config.session.speaking_debounce(),
                relay.clone(),
            ));
            let _ = inner.events.set(relay);
            inner.transition_locked(&mut machine, Trigger::Connect)?;
        }
        inner.deliver_events();

        info!(session = %inner.id, "Connecting to {}", inner.config.transport.endpoint);

        if let Err(e) = credentials.validate() {
            return Err(inner.fail(e.into()));
        }

        let handshake = async {
            let link = inner
                .connector
                .connect(&inner.config.transport.endpoint, &credentials)
                .await?;
            inner.setup_exchange(link).await
        };

        let result = tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => Err(TransportError::Cancelled),
            result = tokio::time::timeout(inner.config.transport.connect_timeout(), handshake) => {
                result.unwrap_or(Err(TransportError::Timeout))
            }
        };

        let link = match result {
            Ok(link) => link,
            Err(TransportError::Cancelled) => {
                info!(session = %inner.id, "Connect cancelled by disconnect");
                return Err(TransportError::Cancelled.into());
            }
            Err(e) => return Err(inner.fail(e.into())),
        };

        let (sender, inbound, shutdown) = link.into_parts();
        {
            let mut slot = inner.link.lock();
            if inner.torn_down.load(Ordering::SeqCst) {
                shutdown.cancel();
                return Err(TransportError::Cancelled.into());
            }
            *slot = Some(LinkHandle {
                sender: sender.clone(),
                shutdown: shutdown.clone(),
            });
        }

        if let Err(e) = inner.start_media(&sender) {
            return Err(inner.fail(e));
        }

        {
            let mut machine = inner.machine.lock();
            if inner.transition_locked(&mut machine, Trigger::TransportOpen).is_err() {
                // Disconnect won the race; it already tore everything down
                drop(machine);
                shutdown.cancel();
                return Err(TransportError::Cancelled.into());
            }
        }
        inner.deliver_events();
        info!(session = %inner.id, "Session open");

        if let Some(greeting) = inner.config.session.greeting.as_deref() {
            if !greeting.trim().is_empty() {
                if let Err(e) = sender.try_send(ClientMessage::user_text(greeting)) {
                    warn!("Failed to queue greeting: {}", e);
                }
            }
        }

        tokio::spawn(receive_loop(self.inner.clone(), inbound));
        Ok(())
    }

    /// Forward a camera snapshot if the session is open; otherwise drop it.
    ///
    /// Never blocks and never errors. Returns whether the frame was queued.
    pub fn send_video_frame(&self, packet: EncodedMediaPacket) -> bool {
        self.inner.send_video_frame(packet)
    }

    /// Start sampling `source` once per interval into the session.
    ///
    /// Frames produced while the session is not open are dropped.
    pub fn start_video(&self, source: Box<dyn FrameSource>) -> Result<()> {
        let session: Weak<Inner> = Arc::downgrade(&self.inner);
        let sink = move |packet: EncodedMediaPacket| {
            if let Some(inner) = session.upgrade() {
                inner.send_video_frame(packet);
            }
        };

        let mut video = self.inner.video.lock();
        if self.inner.torn_down.load(Ordering::SeqCst) {
            return Err(SessionError::Ended.into());
        }
        video.start(source, Box::new(sink))?;
        Ok(())
    }

    pub fn stop_video(&self) {
        self.inner.video.lock().stop();
    }

    pub fn is_video_enabled(&self) -> bool {
        self.inner.video.lock().is_running()
    }

    /// Allowed in any state; applies from the next capture window
    pub fn mute(&self) {
        self.inner.mute.mute();
        debug!(session = %self.inner.id, "Microphone muted");
    }

    pub fn unmute(&self) {
        self.inner.mute.unmute();
        debug!(session = %self.inner.id, "Microphone unmuted");
    }

    pub fn is_muted(&self) -> bool {
        self.inner.mute.is_muted()
    }

    /// End the session from any state.
    ///
    /// Cancels an in-flight connect, stops capture and video, tears down
    /// playback and closes the link. Safe to call repeatedly and concurrently
    /// with inbound traffic; resources are released exactly once.
    pub fn disconnect(&self) {
        let inner = &self.inner;
        inner.cancel.cancel();
        {
            let mut machine = inner.machine.lock();
            if machine.state() != SessionState::Closed {
                let _ = inner.transition_locked(&mut machine, Trigger::Disconnect);
            }
        }
        inner.deliver_events();
        inner.teardown();
    }

    /// Microphone stream errors raised since the last call. The session keeps running.
    pub fn take_device_errors(&self) -> Vec<AudioError> {
        self.inner.capture.lock().take_errors()
    }

    pub fn stats(&self) -> SessionStats {
        self.inner.counters.snapshot()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            session_id: self.inner.id,
            state: self.state(),
            muted: self.is_muted(),
            video_enabled: self.is_video_enabled(),
            agent_speaking: self
                .inner
                .speaking
                .get()
                .is_some_and(|s| s.is_speaking()),
            created_at: self.inner.created_at,
            stats: self.stats(),
        }
    }
}

impl SessionCounters {
    fn snapshot(&self) -> SessionStats {
        SessionStats {
            audio_frames_sent: self.audio_frames_sent.load(Ordering::Relaxed),
            audio_frames_dropped: self.audio_frames_dropped.load(Ordering::Relaxed),
            video_frames_sent: self.video_frames_sent.load(Ordering::Relaxed),
            video_frames_dropped: self.video_frames_dropped.load(Ordering::Relaxed),
            chunks_played: self.chunks_played.load(Ordering::Relaxed),
            chunks_malformed: self.chunks_malformed.load(Ordering::Relaxed),
            interruptions: self.interruptions.load(Ordering::Relaxed),
            turns_completed: self.turns_completed.load(Ordering::Relaxed),
        }
    }
}

impl Inner {
    /// Deliver `event` now. Never call with a session lock held.
    fn emit(&self, event: SessionEvent) {
        if let Some(relay) = self.events.get() {
            relay.emit(event);
        }
    }

    /// Queue `event` for the next `deliver_events`; safe under locks
    fn post(&self, event: SessionEvent) {
        if let Some(relay) = self.events.get() {
            relay.post(event);
        }
    }

    fn deliver_events(&self) {
        if let Some(relay) = self.events.get() {
            relay.deliver();
        }
    }

    /// Apply `trigger` and queue the state change. Caller holds the machine
    /// lock and calls `deliver_events` after releasing it.
    fn transition_locked(
        &self,
        machine: &mut StateMachine,
        trigger: Trigger,
    ) -> std::result::Result<SessionState, SessionError> {
        let from = machine.state();
        let to = machine.apply(trigger)?;
        debug!(session = %self.id, "{} --{:?}--> {}", from, trigger, to);
        self.post(SessionEvent::StateChanged { state: to });
        Ok(to)
    }

    /// Register the session and wait for the acknowledgement
    async fn setup_exchange(&self, mut link: DuplexLink) -> std::result::Result<DuplexLink, TransportError> {
        let session = &self.config.session;
        let setup = Setup::audio(
            &session.model,
            &session.voice,
            session.system_instruction.as_deref(),
        );

        if let Err(e) = link.sender().send(ClientMessage::Setup(setup)).await {
            link.close();
            return Err(e);
        }

        loop {
            match link.recv().await {
                Some(Inbound::Message(message)) if message.is_setup_complete() => {
                    debug!(session = %self.id, "Setup acknowledged");
                    return Ok(link);
                }
                Some(Inbound::Message(_)) => {
                    debug!("Ignoring message before setup completed");
                }
                Some(Inbound::Closed { code, reason }) => {
                    link.close();
                    let rejected = code == Some(POLICY_VIOLATION)
                        || reason.to_ascii_lowercase().contains("api key");
                    return Err(if rejected {
                        TransportError::Authentication(reason)
                    } else {
                        TransportError::Closed(format!("closed during setup: {}", reason))
                    });
                }
                Some(Inbound::Error(e)) => {
                    link.close();
                    return Err(e);
                }
                None => {
                    return Err(TransportError::Closed("link dropped during setup".to_string()));
                }
            }
        }
    }

    /// Arm playback and start the microphone.
    ///
    /// Each resource is acquired under its own lock after checking for
    /// teardown, so a concurrent disconnect either sees it or prevents it.
    fn start_media(&self, sender: &LinkSender) -> Result<()> {
        {
            let mut playback = self.playback.lock();
            if self.torn_down.load(Ordering::SeqCst) {
                return Err(TransportError::Cancelled.into());
            }
            playback.init()?;
        }

        let sender = sender.clone();
        let session = self.this.clone();
        let sink = move |frame: EncodedAudioFrame| {
            let Some(inner) = session.upgrade() else {
                return;
            };
            match sender.try_send(ClientMessage::media(frame.packet)) {
                Ok(()) => {
                    inner.counters.audio_frames_sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    inner.counters.audio_frames_dropped.fetch_add(1, Ordering::Relaxed);
                    debug!("Dropping capture window {}: {}", frame.sequence, e);
                }
            }
        };
        let mut capture = self.capture.lock();
        if self.torn_down.load(Ordering::SeqCst) {
            return Err(TransportError::Cancelled.into());
        }
        capture.start(Box::new(sink))?;
        Ok(())
    }

    fn send_video_frame(&self, packet: EncodedMediaPacket) -> bool {
        if !self.machine.lock().state().is_open() {
            self.counters.video_frames_dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let sent = match self.link.lock().as_ref() {
            Some(link) => link.sender.try_send(ClientMessage::media(packet)).is_ok(),
            None => false,
        };
        let counter = if sent {
            &self.counters.video_frames_sent
        } else {
            &self.counters.video_frames_dropped
        };
        counter.fetch_add(1, Ordering::Relaxed);
        sent
    }

    fn handle_message(&self, message: ServerMessage) {
        if let Some(go_away) = &message.go_away {
            warn!(session = %self.id, "Service going away (time left: {:?})", go_away.time_left);
        }

        if message.is_interrupted() {
            self.handle_interruption();
        }

        for payload in message.audio_payloads() {
            self.handle_audio(payload);
        }

        if message.is_turn_complete() {
            self.counters.turns_completed.fetch_add(1, Ordering::Relaxed);
            self.emit(SessionEvent::TurnComplete);
        }
    }

    /// Open -> Interrupted -> Open, with exactly one flush in between
    fn handle_interruption(&self) {
        let rearmed = {
            let mut machine = self.machine.lock();
            if machine.apply(Trigger::Interruption).is_err() {
                debug!("Ignoring interruption in state {}", machine.state());
                return;
            }

            let rearmed = {
                let mut playback = self.playback.lock();
                playback.flush();
                playback.init()
            };
            if rearmed.is_ok() {
                let _ = machine.apply(Trigger::Resume);
            }
            rearmed
        };

        if let Some(speaking) = self.speaking.get() {
            speaking.clear();
        }
        self.counters.interruptions.fetch_add(1, Ordering::Relaxed);
        self.emit(SessionEvent::Interrupted);
        info!(session = %self.id, "Agent interrupted; playback flushed");

        if let Err(e) = rearmed {
            self.fail(e);
        }
    }

    fn handle_audio(&self, payload: &str) {
        if !self.machine.lock().state().is_open() {
            return;
        }

        let segment = match self.playback.lock().enqueue_text(payload) {
            Ok(segment) => segment,
            Err(Error::Audio(AudioError::PlaybackNotArmed)) => {
                debug!("Dropping audio chunk: playback not armed");
                return;
            }
            Err(e) => {
                self.counters.chunks_malformed.fetch_add(1, Ordering::Relaxed);
                warn!("Dropping malformed audio chunk: {}", e);
                return;
            }
        };

        self.counters.chunks_played.fetch_add(1, Ordering::Relaxed);
        self.emit(SessionEvent::AudioChunk {
            samples: segment.samples.len(),
        });
        if let Some(speaking) = self.speaking.get() {
            speaking.chunk_received();
        }
    }

    fn remote_closed(&self, code: Option<u16>, reason: &str) {
        info!(session = %self.id, "Remote closed the session (code {:?}): {}", code, reason);
        {
            let mut machine = self.machine.lock();
            let _ = self.transition_locked(&mut machine, Trigger::RemoteClose);
        }
        self.deliver_events();
        self.teardown();
    }

    /// Move to `Failed`, report `error`, release everything. Returns `error`.
    fn fail(&self, error: Error) -> Error {
        let trigger = match error {
            Error::Audio(_) | Error::Video(_) => Trigger::DeviceError,
            _ => Trigger::TransportError,
        };

        {
            let mut machine = self.machine.lock();
            if self.transition_locked(&mut machine, trigger).is_ok() {
                error!(session = %self.id, "Session failed: {}", error);
                self.post(SessionEvent::Error {
                    message: error.to_string(),
                });
            }
        }
        self.deliver_events();
        self.teardown();
        error
    }

    /// Release every owned resource, once
    fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }

        self.cancel.cancel();
        self.video.lock().stop();
        self.capture.lock().stop();
        self.playback.lock().teardown();
        if let Some(link) = self.link.lock().take() {
            link.shutdown.cancel();
        }
        if let Some(speaking) = self.speaking.get() {
            speaking.clear();
        }
        info!(session = %self.id, "Session resources released");
    }
}

async fn receive_loop(inner: Arc<Inner>, mut inbound: mpsc::Receiver<Inbound>) {
    loop {
        let item = tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => break,
            item = inbound.recv() => item,
        };

        match item {
            Some(Inbound::Message(message)) => inner.handle_message(message),
            Some(Inbound::Closed { code, reason }) => {
                inner.remote_closed(code, &reason);
                break;
            }
            Some(Inbound::Error(e)) => {
                inner.fail(e.into());
                break;
            }
            None => {
                inner.remote_closed(None, "link dropped");
                break;
            }
        }
    }
    debug!(session = %inner.id, "Receive loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Modality;
    use crate::testing::{FakeCapture, FakeConnector, FakeOutput, FakeRemote};
    use image::RgbImage;
    use std::time::Duration;

    struct Harness {
        controller: SessionController,
        mic: FakeCapture,
        speaker: FakeOutput,
        connector: Arc<FakeConnector>,
        events: mpsc::UnboundedReceiver<SessionEvent>,
    }

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.capture.window_samples = 160;
        config
    }

    fn harness(connector: Arc<FakeConnector>, config: AppConfig, mic: FakeCapture) -> Harness {
        let speaker = FakeOutput::new();
        let media = MediaBackends {
            capture: Box::new(mic.clone()),
            playback: Box::new(speaker.clone()),
        };
        let controller = SessionController::new(config, media, connector.clone());
        let (_tx, events) = mpsc::unbounded_channel();
        Harness {
            controller,
            mic,
            speaker,
            connector,
            events,
        }
    }

    /// Connected session plus the remote end, with the setup message consumed
    async fn open_session(config: AppConfig) -> (Harness, FakeRemote) {
        let mut h = harness(FakeConnector::accepting(), config, FakeCapture::new());
        let (tx, events) = mpsc::unbounded_channel();
        h.events = events;
        h.controller.connect(Credentials::new("key"), tx).await.unwrap();

        let mut remote = h.connector.take_remote();
        assert!(matches!(remote.next_message().await, ClientMessage::Setup(_)));
        (h, remote)
    }

    async fn wait_for(
        events: &mut mpsc::UnboundedReceiver<SessionEvent>,
        wanted: impl Fn(&SessionEvent) -> bool,
    ) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = events.recv().await.expect("observer dropped");
                if wanted(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    fn drain(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    fn is_chunk(event: &SessionEvent) -> bool {
        matches!(event, SessionEvent::AudioChunk { .. })
    }

    #[tokio::test]
    async fn test_connect_opens_session() {
        let (mut h, _remote) = open_session(test_config()).await;

        assert_eq!(h.controller.state(), SessionState::Open);
        assert_eq!(h.mic.open_count(), 1);
        assert_eq!(h.speaker.open_count(), 1);
        assert_eq!(
            drain(&mut h.events),
            vec![
                SessionEvent::StateChanged {
                    state: SessionState::Connecting
                },
                SessionEvent::StateChanged {
                    state: SessionState::Open
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_setup_registers_persona_and_voice() {
        let mut config = test_config();
        config.session.system_instruction = Some("You are a friendly tutor.".to_string());
        let h = harness(FakeConnector::accepting(), config, FakeCapture::new());
        h.controller
            .connect(Credentials::new("key"), |_: SessionEvent| {})
            .await
            .unwrap();

        let mut remote = h.connector.take_remote();
        let ClientMessage::Setup(setup) = remote.next_message().await else {
            panic!("first message must be setup");
        };
        assert_eq!(
            setup.generation_config.response_modalities,
            vec![Modality::Audio]
        );
        assert!(setup.system_instruction.is_some());
        assert!(setup.generation_config.speech_config.is_some());
    }

    #[tokio::test]
    async fn test_greeting_follows_setup() {
        let mut config = test_config();
        config.session.greeting = Some("Hello".to_string());
        let (_h, mut remote) = open_session(config).await;

        assert_eq!(remote.next_message().await, ClientMessage::user_text("Hello"));
    }

    #[tokio::test]
    async fn test_capture_windows_forwarded_in_order() {
        let (h, mut remote) = open_session(test_config()).await;

        h.mic.feed(&[0.5; 320]);

        for _ in 0..2 {
            let ClientMessage::RealtimeInput(input) = remote.next_message().await else {
                panic!("expected realtime input");
            };
            assert_eq!(input.media_chunks[0].mime_type, "audio/pcm;rate=16000");
        }
        assert_eq!(h.controller.stats().audio_frames_sent, 2);
    }

    #[tokio::test]
    async fn test_mute_before_connect_applies_once_capture_runs() {
        let h = harness(FakeConnector::accepting(), test_config(), FakeCapture::new());
        h.controller.mute();
        h.controller
            .connect(Credentials::new("key"), |_: SessionEvent| {})
            .await
            .unwrap();
        let mut remote = h.connector.take_remote();
        remote.next_message().await;

        h.mic.feed(&[0.5; 160]);
        assert!(remote.outbound.try_recv().is_err());

        h.controller.unmute();
        h.mic.feed(&[0.5; 160]);
        assert!(matches!(
            remote.next_message().await,
            ClientMessage::RealtimeInput(_)
        ));
        assert_eq!(h.mic.open_count(), 1);
    }

    #[tokio::test]
    async fn test_inbound_chunks_play_gapless() {
        let (mut h, remote) = open_session(test_config()).await;
        h.speaker.clock().set(Duration::ZERO);

        for _ in 0..3 {
            remote.send_audio_ms(100).await;
        }
        for _ in 0..3 {
            wait_for(&mut h.events, is_chunk).await;
        }

        let starts: Vec<Duration> = h.speaker.scheduled().iter().map(|s| s.start()).collect();
        assert_eq!(
            starts,
            vec![
                Duration::ZERO,
                Duration::from_millis(100),
                Duration::from_millis(200)
            ]
        );
        assert_eq!(h.controller.stats().chunks_played, 3);
    }

    #[tokio::test]
    async fn test_interruption_flushes_once_and_rearms() {
        let (mut h, remote) = open_session(test_config()).await;

        remote.send_audio_ms(100).await;
        remote.send_audio_ms(100).await;
        wait_for(&mut h.events, is_chunk).await;
        wait_for(&mut h.events, is_chunk).await;

        h.speaker.clock().set(Duration::from_millis(50));
        remote.interrupt().await;
        remote.send_audio_ms(100).await;

        wait_for(&mut h.events, |e| *e == SessionEvent::Interrupted).await;
        wait_for(&mut h.events, is_chunk).await;

        assert_eq!(h.speaker.stop_count(), 1);
        let scheduled = h.speaker.scheduled();
        assert_eq!(scheduled.len(), 3);
        assert_eq!(scheduled[2].start(), Duration::from_millis(50));
        assert_eq!(h.controller.state(), SessionState::Open);
        assert_eq!(h.controller.stats().interruptions, 1);
    }

    #[tokio::test]
    async fn test_interruption_and_audio_in_one_message() {
        let (mut h, remote) = open_session(test_config()).await;
        remote.send_audio_ms(100).await;
        wait_for(&mut h.events, is_chunk).await;

        h.speaker.clock().set(Duration::from_millis(20));
        let pcm = crate::codec::encode_pcm16(&[0.1f32; 2400]);
        let json = format!(
            r#"{{"serverContent":{{"interrupted":true,"modelTurn":{{"parts":[{{"inlineData":{{"mimeType":"audio/pcm;rate=24000","data":"{}"}}}}]}}}}}}"#,
            crate::codec::buffer_to_transport_text(&pcm)
        );
        remote.send_json(&json).await;
        wait_for(&mut h.events, is_chunk).await;

        assert_eq!(h.speaker.stop_count(), 1);
        assert_eq!(h.speaker.scheduled()[1].start(), Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_malformed_chunk_does_not_affect_session() {
        let (mut h, remote) = open_session(test_config()).await;

        remote
            .send_json(r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm","data":"AQID"}}]}}}"#)
            .await;
        remote.send_audio_ms(40).await;
        wait_for(&mut h.events, is_chunk).await;

        let stats = h.controller.stats();
        assert_eq!(stats.chunks_malformed, 1);
        assert_eq!(stats.chunks_played, 1);
        assert_eq!(h.controller.state(), SessionState::Open);
    }

    #[tokio::test]
    async fn test_turn_complete_reported() {
        let (mut h, remote) = open_session(test_config()).await;
        remote
            .send_json(r#"{"serverContent":{"turnComplete":true}}"#)
            .await;
        wait_for(&mut h.events, |e| *e == SessionEvent::TurnComplete).await;
        assert_eq!(h.controller.stats().turns_completed, 1);
    }

    #[tokio::test]
    async fn test_disconnect_twice_releases_once() {
        let (mut h, remote) = open_session(test_config()).await;

        h.controller.disconnect();
        h.controller.disconnect();

        assert_eq!(h.controller.state(), SessionState::Closed);
        assert_eq!(h.mic.close_count(), 1);
        assert_eq!(h.speaker.live_sinks(), 0);
        assert!(remote.shutdown.is_cancelled());

        let closed = drain(&mut h.events)
            .into_iter()
            .filter(|e| {
                *e == SessionEvent::StateChanged {
                    state: SessionState::Closed,
                }
            })
            .count();
        assert_eq!(closed, 1);
    }

    #[tokio::test]
    async fn test_observer_can_drive_controller() {
        let h = harness(FakeConnector::accepting(), test_config(), FakeCapture::new());
        let (tx, mut seen) = mpsc::unbounded_channel();
        let controller = h.controller.clone();
        let observer = move |event: SessionEvent| {
            let status = controller.status();
            if event == SessionEvent::Interrupted {
                controller.disconnect();
            }
            let _ = tx.send((event, status.state));
        };

        h.controller
            .connect(Credentials::new("key"), observer)
            .await
            .unwrap();
        let remote = h.connector.take_remote();
        remote.interrupt().await;

        let events = tokio::time::timeout(Duration::from_secs(5), async {
            let mut events = Vec::new();
            while let Some((event, state)) = seen.recv().await {
                let closed = event
                    == SessionEvent::StateChanged {
                        state: SessionState::Closed,
                    };
                events.push((event, state));
                if closed {
                    return events;
                }
            }
            events
        })
        .await
        .expect("session never closed");

        assert_eq!(h.controller.state(), SessionState::Closed);
        assert_eq!(h.mic.close_count(), 1);
        let order: Vec<SessionEvent> = events.iter().map(|(e, _)| e.clone()).collect();
        assert_eq!(
            order,
            vec![
                SessionEvent::StateChanged {
                    state: SessionState::Connecting
                },
                SessionEvent::StateChanged {
                    state: SessionState::Open
                },
                SessionEvent::Interrupted,
                SessionEvent::StateChanged {
                    state: SessionState::Closed
                },
            ]
        );
        // The observer sees the state its event describes
        assert_eq!(events[1].1, SessionState::Open);
    }

    #[tokio::test]
    async fn test_disconnect_from_idle() {
        let h = harness(FakeConnector::accepting(), test_config(), FakeCapture::new());
        h.controller.disconnect();
        assert_eq!(h.controller.state(), SessionState::Closed);
        assert_eq!(h.mic.close_count(), 0);

        let err = h
            .controller
            .connect(Credentials::new("key"), |_: SessionEvent| {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Session(SessionError::InvalidTransition { .. })));
        assert_eq!(h.connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_video_dropped_unless_open() {
        let jpeg = crate::codec::encode_jpeg(&RgbImage::new(4, 4), 80, None).unwrap();
        let packet = EncodedMediaPacket::jpeg(&jpeg).unwrap();

        let idle = harness(FakeConnector::accepting(), test_config(), FakeCapture::new());
        assert!(!idle.controller.send_video_frame(packet.clone()));
        assert_eq!(idle.controller.stats().video_frames_dropped, 1);

        let (h, mut remote) = open_session(test_config()).await;
        assert!(h.controller.send_video_frame(packet.clone()));
        let ClientMessage::RealtimeInput(input) = remote.next_message().await else {
            panic!("expected realtime input");
        };
        assert_eq!(input.media_chunks[0].mime_type, "image/jpeg");

        h.controller.disconnect();
        assert!(!h.controller.send_video_frame(packet));
    }

    #[tokio::test(start_paused = true)]
    async fn test_video_sampler_feeds_session() {
        let (h, mut remote) = open_session(test_config()).await;
        let source = || Some(RgbImage::from_pixel(8, 8, image::Rgb([10, 20, 30])));
        h.controller.start_video(Box::new(source)).unwrap();
        assert!(h.controller.is_video_enabled());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let ClientMessage::RealtimeInput(input) = remote.next_message().await else {
            panic!("expected realtime input");
        };
        assert_eq!(input.media_chunks[0].mime_type, "image/jpeg");

        h.controller.stop_video();
        assert!(!h.controller.is_video_enabled());
    }

    #[tokio::test]
    async fn test_authentication_rejected() {
        let mut h = harness(
            FakeConnector::rejecting(|| TransportError::Authentication("401".to_string())),
            test_config(),
            FakeCapture::new(),
        );
        let (tx, events) = mpsc::unbounded_channel();
        h.events = events;

        let err = h.controller.connect(Credentials::new("bad"), tx).await.unwrap_err();
        assert!(matches!(err, Error::Transport(TransportError::Authentication(_))));
        assert_eq!(h.controller.state(), SessionState::Failed);
        assert_eq!(h.mic.open_count(), 0);
        assert!(drain(&mut h.events)
            .iter()
            .any(|e| matches!(e, SessionEvent::Error { .. })));
    }

    #[tokio::test]
    async fn test_blank_key_never_dials() {
        let h = harness(FakeConnector::accepting(), test_config(), FakeCapture::new());
        let err = h
            .controller
            .connect(Credentials::new(" "), |_: SessionEvent| {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(TransportError::Authentication(_))));
        assert_eq!(h.connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_policy_close_during_setup_is_authentication() {
        let h = harness(FakeConnector::unacknowledged(), test_config(), FakeCapture::new());
        let controller = h.controller.clone();
        let connecting = tokio::spawn(async move {
            controller
                .connect(Credentials::new("bad"), |_: SessionEvent| {})
                .await
        });

        let mut remote = h.connector.wait_for_remote().await;
        assert!(matches!(remote.next_message().await, ClientMessage::Setup(_)));
        remote.close(Some(1008), "API key not valid").await;

        let err = connecting.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Transport(TransportError::Authentication(_))));
        assert_eq!(h.controller.state(), SessionState::Failed);
        assert!(remote.shutdown.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let mut config = test_config();
        config.transport.connect_timeout_ms = 100;
        let h = harness(FakeConnector::hanging(), config, FakeCapture::new());

        let err = h
            .controller
            .connect(Credentials::new("key"), |_: SessionEvent| {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(TransportError::Timeout)));
        assert_eq!(h.controller.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_disconnect_cancels_pending_connect() {
        let h = harness(FakeConnector::hanging(), test_config(), FakeCapture::new());
        let controller = h.controller.clone();
        let connecting = tokio::spawn(async move {
            controller
                .connect(Credentials::new("key"), |_: SessionEvent| {})
                .await
        });

        while h.connector.connect_count() == 0 {
            tokio::task::yield_now().await;
        }
        h.controller.disconnect();

        let err = connecting.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Transport(TransportError::Cancelled)));
        assert_eq!(h.controller.state(), SessionState::Closed);
        assert_eq!(h.mic.open_count(), 0);
        assert_eq!(h.speaker.open_count(), 0);
    }

    #[tokio::test]
    async fn test_microphone_unavailable_fails_session() {
        let h = harness(FakeConnector::accepting(), test_config(), FakeCapture::new().failing());
        let err = h
            .controller
            .connect(Credentials::new("key"), |_: SessionEvent| {})
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Audio(AudioError::DeviceUnavailable(_))));
        assert_eq!(h.controller.state(), SessionState::Failed);
        assert_eq!(h.speaker.live_sinks(), 0);
        assert!(h.connector.take_remote().shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn test_remote_close_mid_session() {
        let (mut h, remote) = open_session(test_config()).await;
        remote.close(Some(1000), "bye").await;

        wait_for(&mut h.events, |e| {
            *e == SessionEvent::StateChanged {
                state: SessionState::Closed,
            }
        })
        .await;
        assert_eq!(h.mic.close_count(), 1);
        assert_eq!(h.speaker.live_sinks(), 0);

        h.controller.disconnect();
        assert_eq!(h.mic.close_count(), 1);
    }

    #[tokio::test]
    async fn test_transport_error_mid_session() {
        let (mut h, remote) = open_session(test_config()).await;
        remote
            .fail(TransportError::ConnectionFailed("reset by peer".to_string()))
            .await;

        wait_for(&mut h.events, |e| matches!(e, SessionEvent::Error { .. })).await;
        assert_eq!(h.controller.state(), SessionState::Failed);
        assert_eq!(h.mic.close_count(), 1);
        assert!(remote.shutdown.is_cancelled());

        h.controller.disconnect();
        assert_eq!(h.controller.state(), SessionState::Closed);
        assert_eq!(h.mic.close_count(), 1);
    }

    #[tokio::test]
    async fn test_status_snapshot() {
        let (h, _remote) = open_session(test_config()).await;
        h.controller.mute();

        let status = h.controller.status();
        assert_eq!(status.session_id, h.controller.session_id());
        assert_eq!(status.state, SessionState::Open);
        assert!(status.muted);
        assert!(!status.video_enabled);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "open");
    }
}

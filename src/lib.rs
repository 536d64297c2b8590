//! # Live Media Session
//!
//! Realtime, bidirectional audio (+ optional video) conversation core for a
//! remote generative-agent service reached over one persistent duplex channel.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────┐  f32 blocks  ┌──────────────────┐  EncodedAudioFrame
//! │  Microphone  │─────────────▶│ Capture Pipeline │──────────────┐
//! │ (CpalInput)  │              │ (audio::capture) │              │
//! └──────────────┘              └────────▲─────────┘              │
//!                                        │ MuteFlag               ▼
//! ┌──────────────┐  RgbImage    ┌──────────────────┐  jpeg  ┌───────────────────────┐
//! │    Camera    │─────────────▶│  Video Sampler   │───────▶│  Session Controller   │
//! │ (FrameSource)│   1 / sec    │ (video::sampler) │        │ (session::controller) │
//! └──────────────┘              └──────────────────┘        │   state machine,      │
//!                                                           │   observer events     │
//!                                                           └───┬───────────▲───────┘
//!                                              realtimeInput    │           │ serverContent
//!                                                               ▼           │
//!                                                  ┌────────────────────────────────┐
//!                                                  │  Duplex transport (network)    │
//!                                                  │  WebSocket, JSON text frames   │
//!                                                  └────────────────────────────────┘
//!                                                                            │
//! ┌──────────────┐  segments    ┌──────────────────┐  PCM16 chunks           │
//! │   Speaker    │◀─────────────│Playback Scheduler│◀────────────────────────┘
//! │ (CpalOutput) │ absolute pos │ (audio::playback)│  flush on interruption
//! └──────────────┘              └──────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod session;
pub mod ui;
pub mod video;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
pub use session::{SessionController, SessionEvent, SessionObserver, SessionState};

/// Application-wide constants
pub mod constants {
    /// Microphone frames are sent at this rate
    pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

    /// Inbound agent audio arrives at this rate
    pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

    /// Samples per capture window (256 ms at 16 kHz)
    pub const CAPTURE_WINDOW_SAMPLES: usize = 4096;

    /// Camera snapshot cadence
    pub const VIDEO_INTERVAL_MS: u64 = 1000;

    /// JPEG quality for camera snapshots
    pub const JPEG_QUALITY: u8 = 80;

    /// "Agent speaking" indicator holds this long after the last chunk
    pub const SPEAKING_DEBOUNCE_MS: u64 = 500;

    /// Default prebuilt voice
    pub const DEFAULT_VOICE: &str = "Zephyr";

    /// Default native-audio model
    pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";

    /// Bidirectional streaming endpoint
    pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

    /// Handshake + setup exchange must finish within this
    pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

    /// Outbound frames queued ahead of the socket
    pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

    /// Inbound messages queued ahead of the session
    pub const INBOUND_QUEUE_CAPACITY: usize = 256;

    /// Default HTTP port for the control panel
    pub const DEFAULT_UI_PORT: u16 = 8787;

    /// Lock-free command queue capacity between scheduler and render callback
    pub const PLAYBACK_COMMAND_CAPACITY: usize = 1024;
}

//! Application configuration
//!
//! Loaded from a TOML file; every field has a default so a missing or empty
//! file yields a working configuration. Credentials never live here.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result, TransportError};

/// Environment variable holding the API key
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub capture: CaptureConfig,
    pub playback: PlaybackConfig,
    pub video: VideoConfig,
    pub transport: TransportConfig,
    pub ui: UiConfig,
}

impl AppConfig {
    /// Load from a TOML file and validate it
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipelines cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.capture.sample_rate == 0 {
            return Err(Error::Config("capture.sample_rate must be positive".to_string()));
        }
        if self.capture.window_samples == 0 {
            return Err(Error::Config("capture.window_samples must be positive".to_string()));
        }
        if self.playback.sample_rate == 0 {
            return Err(Error::Config("playback.sample_rate must be positive".to_string()));
        }
        if !(1..=100).contains(&self.video.jpeg_quality) {
            return Err(Error::Config(format!(
                "video.jpeg_quality must be within 1..=100, got {}",
                self.video.jpeg_quality
            )));
        }
        if self.transport.outbound_capacity == 0 {
            return Err(Error::Config("transport.outbound_capacity must be positive".to_string()));
        }
        Ok(())
    }

    /// Load from `path`, or from the default location if it exists,
    /// falling back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => match Self::default_path() {
                Some(p) if p.exists() => Self::load(p),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Per-user config file location
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "live-media-session", "live-session")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Remote session registration and session-level behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Model resource name
    pub model: String,
    /// Prebuilt output voice
    pub voice: String,
    /// Persona / system instructions registered once at connect time
    pub system_instruction: Option<String>,
    /// Optional text turn sent right after the session opens
    pub greeting: Option<String>,
    /// Debounce window for the "agent speaking" indicator
    pub speaking_debounce_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            system_instruction: None,
            greeting: None,
            speaking_debounce_ms: SPEAKING_DEBOUNCE_MS,
        }
    }
}

impl SessionConfig {
    pub fn speaking_debounce(&self) -> Duration {
        Duration::from_millis(self.speaking_debounce_ms)
    }
}

/// Microphone capture settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Input device id as reported by `list_devices` (`None` = default input)
    pub device_id: Option<String>,
    /// Rate frames are encoded and sent at
    pub sample_rate: u32,
    /// Samples per capture window
    pub window_samples: usize,
    /// Start with the microphone muted
    pub start_muted: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            sample_rate: CAPTURE_SAMPLE_RATE,
            window_samples: CAPTURE_WINDOW_SAMPLES,
            start_muted: false,
        }
    }
}

impl CaptureConfig {
    /// Duration of one capture window
    pub fn window_duration(&self) -> Duration {
        Duration::from_nanos(
            self.window_samples as u64 * 1_000_000_000 / self.sample_rate.max(1) as u64,
        )
    }
}

/// Speaker playback settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Output device id (`None` = default output)
    pub device_id: Option<String>,
    /// Rate of inbound audio
    pub sample_rate: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            sample_rate: PLAYBACK_SAMPLE_RATE,
        }
    }
}

/// Camera snapshot settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub interval_ms: u64,
    pub jpeg_quality: u8,
    /// Downscale snapshots larger than this on either side
    pub max_dimension: Option<u32>,
    /// Still image re-read on every tick when video is enabled
    pub snapshot_path: Option<PathBuf>,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            interval_ms: VIDEO_INTERVAL_MS,
            jpeg_quality: JPEG_QUALITY,
            max_dimension: None,
            snapshot_path: None,
        }
    }
}

impl VideoConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

/// Remote service transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// WebSocket endpoint of the bidirectional streaming service
    pub endpoint: String,
    /// Bound on handshake + setup exchange
    pub connect_timeout_ms: u64,
    /// Outbound frame queue; frames beyond it are dropped
    pub outbound_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            outbound_capacity: OUTBOUND_QUEUE_CAPACITY,
        }
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Local control panel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub http_port: u16,
    /// Extra browser origins allowed to drive the panel. Empty means
    /// same-origin only.
    pub cors_origins: Vec<String>,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1".to_string(),
            http_port: DEFAULT_UI_PORT,
            cors_origins: Vec::new(),
        }
    }
}

impl UiConfig {
    /// Origins a browser may use for the panel: its own addresses plus `cors_origins`
    pub fn trusted_origins(&self) -> Vec<String> {
        let mut origins = vec![
            format!("http://{}:{}", self.bind_address, self.http_port),
            format!("http://localhost:{}", self.http_port),
            format!("http://127.0.0.1:{}", self.http_port),
        ];
        origins.extend(self.cors_origins.iter().cloned());
        origins.sort();
        origins.dedup();
        origins
    }
}

/// API credential for the remote service
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }

    /// Read the key from [`API_KEY_ENV`]
    pub fn from_env() -> Option<Self> {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(Self::new)
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Reject blank keys before touching the network
    pub fn validate(&self) -> std::result::Result<(), TransportError> {
        if self.api_key.trim().is_empty() {
            return Err(TransportError::Authentication("missing API key".to_string()));
        }
        Ok(())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

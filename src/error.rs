//! Error types for the live media session core

use thiserror::Error;

use crate::session::state::{SessionState, Trigger};

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Video error: {0}")]
    Video(#[from] VideoError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    /// No compatible device, device busy, or permission denied
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// `enqueue` was called without an armed clock (never initialised, flushed, or torn down)
    #[error("Playback clock is not armed; call init() first")]
    PlaybackNotArmed,
}

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Empty media payload")]
    EmptyPayload,
}

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Connection closed: {0}")]
    Closed(String),

    #[error("Connect attempt cancelled")]
    Cancelled,

    #[error("Timeout")]
    Timeout,
}

/// Session state machine errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid transition from {from:?} on {trigger:?}")]
    InvalidTransition { from: SessionState, trigger: Trigger },

    #[error("Session has ended")]
    Ended,
}

/// Video sampling errors
#[derive(Error, Debug)]
pub enum VideoError {
    #[error("Camera unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Frame encoding failed: {0}")]
    Encoding(#[from] CodecError),

    #[error("Video sampler needs a Tokio runtime")]
    NoRuntime,
}

impl From<cpal::DevicesError> for AudioError {
    fn from(e: cpal::DevicesError) -> Self {
        AudioError::DeviceUnavailable(e.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for AudioError {
    fn from(e: cpal::DefaultStreamConfigError) -> Self {
        AudioError::DeviceUnavailable(e.to_string())
    }
}

impl From<cpal::BuildStreamError> for AudioError {
    fn from(e: cpal::BuildStreamError) -> Self {
        match e {
            cpal::BuildStreamError::DeviceNotAvailable => {
                AudioError::DeviceUnavailable("device not available".to_string())
            }
            cpal::BuildStreamError::StreamConfigNotSupported => {
                AudioError::UnsupportedFormat("stream config not supported".to_string())
            }
            other => AudioError::StreamError(other.to_string()),
        }
    }
}

impl From<cpal::PlayStreamError> for AudioError {
    fn from(e: cpal::PlayStreamError) -> Self {
        AudioError::StreamError(e.to_string())
    }
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;

//! Error types shared by the capture, decode and coordination layers.

use thiserror::Error;

/// Failures surfaced by a listen request or contained inside a session loop.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ListenError {
    /// The capture device could not be claimed (busy, missing, permission denied).
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),
    /// Another session is already listening.
    #[error("a listening session is already active")]
    SessionBusy,
    /// The device failed while reading a frame.
    #[error("audio read failed: {0}")]
    ReadError(String),
    /// The device stream is gone (closed or never opened).
    #[error("audio stream closed")]
    StreamClosed,
    /// The keyword decoder failed to start or process an utterance.
    #[error("keyword decoder fault: {0}")]
    DecoderFault(String),
    /// The capture thread exited without reporting a result.
    #[error("listening worker exited unexpectedly")]
    WorkerLost,
}

impl ListenError {
    /// Stable name used on the control bridge.
    pub fn kind(&self) -> &'static str {
        match self {
            ListenError::DeviceUnavailable(_) => "device_unavailable",
            ListenError::SessionBusy => "session_busy",
            ListenError::ReadError(_) => "read_error",
            ListenError::StreamClosed => "stream_closed",
            ListenError::DecoderFault(_) => "decoder_fault",
            ListenError::WorkerLost => "worker_lost",
        }
    }
}

/// Configuration could not be loaded or is out of range.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

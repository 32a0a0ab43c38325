use std::time::Duration;

/// Failures that end a voice session.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum VoiceError {
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("Voice transport failed: {0}")]
    Transport(String),
    #[error("Live connection did not open within {0:?}")]
    ConnectTimeout(Duration),
    #[error("Voice session start was cancelled")]
    Cancelled,
}

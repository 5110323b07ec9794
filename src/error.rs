//! Error types for the voice engine.

use serde::Serialize;

/// Top-level error type for the voice engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Connect failure, abnormal close, or send on a closed channel.
    #[error("transport error: {0}")]
    Transport(String),

    /// Microphone or speaker device error (permission, busy, missing).
    #[error("device error: {0}")]
    Device(String),

    /// Malformed inbound message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Response audio could not be decoded or played.
    #[error("playback error: {0}")]
    Playback(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

impl EngineError {
    /// The category reported to event subscribers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) | Self::Channel(_) => ErrorKind::Transport,
            Self::Device(_) => ErrorKind::Device,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Playback(_) => ErrorKind::Playback,
            Self::Config(_) | Self::Io(_) => ErrorKind::Config,
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Error category delivered through [`crate::events::EngineEvent::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    Device,
    Protocol,
    Playback,
    Config,
    /// Reported by the voice service in an `error` message.
    Server,
}

/// A cloneable error report handed to subscribers instead of the error itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }
}

impl From<&EngineError> for ErrorInfo {
    fn from(err: &EngineError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

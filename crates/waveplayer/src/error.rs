//! Error type shared by the loader, the audio context and the transport.

use thiserror::Error;
use waveplayer_types::{PlaybackErrorInfo, PlaybackErrorKind, PlaybackStatus};

/// Errors raised by the player core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlayerError {
    /// HEAD succeeded but reported no usable `Content-Length`.
    #[error("content length unavailable; the resource cannot be loaded in chunks")]
    ContentLengthUnavailable,

    /// The host does not serve byte ranges.
    #[error("source does not support byte-range requests")]
    RangeNotSupported,

    /// The load was cancelled before it completed.
    #[error("load aborted")]
    LoadAborted,

    /// A network request exceeded the configured timeout.
    #[error("load timed out")]
    LoadTimedOut,

    /// The fetched bytes could not be decoded as audio.
    #[error("decode failed: {0}")]
    DecodeFailed(String),

    /// The audio context or its fixed graph could not be created.
    #[error("audio context init failed: {0}")]
    ContextInitFailed(String),

    /// A transport command needs a decoded buffer.
    #[error("no buffer loaded")]
    NoBufferLoaded,

    /// Non-success HTTP status.
    #[error("http request failed with status {status}")]
    Http { status: u16 },

    /// Transport-level failure (DNS, connect, read).
    #[error("network error: {0}")]
    Network(String),

    /// The command is not valid in the current status.
    #[error("cannot {action} while {from}")]
    InvalidTransition {
        from: PlaybackStatus,
        action: &'static str,
    },

    /// Invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Convenience result alias for the player core.
pub type Result<T> = std::result::Result<T, PlayerError>;

impl PlayerError {
    /// Category used by presentation layers.
    pub fn kind(&self) -> PlaybackErrorKind {
        match self {
            PlayerError::ContentLengthUnavailable => PlaybackErrorKind::ContentLengthUnavailable,
            PlayerError::RangeNotSupported => PlaybackErrorKind::RangeNotSupported,
            PlayerError::LoadAborted => PlaybackErrorKind::LoadAborted,
            PlayerError::LoadTimedOut => PlaybackErrorKind::LoadTimedOut,
            PlayerError::DecodeFailed(_) => PlaybackErrorKind::DecodeFailed,
            PlayerError::ContextInitFailed(_) => PlaybackErrorKind::ContextInitFailed,
            PlayerError::NoBufferLoaded => PlaybackErrorKind::NoBufferLoaded,
            PlayerError::Http { .. } | PlayerError::Network(_) => PlaybackErrorKind::Network,
            PlayerError::InvalidTransition { .. } => PlaybackErrorKind::InvalidTransition,
            PlayerError::Config(_) => PlaybackErrorKind::Config,
        }
    }

    /// Structured form stored in playback state.
    pub fn to_info(&self) -> PlaybackErrorInfo {
        PlaybackErrorInfo {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

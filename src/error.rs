//! Error types for the playback core
//!
//! Defines the crate-wide error type using thiserror. Worker threads never
//! unwind across thread boundaries: failures are captured into shared state
//! and re-surfaced as `Error` values at the command boundary.

use std::sync::Arc;

use thiserror::Error;

use crate::audio::AudioFormat;

/// Which side of the core a captured player error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerErrorKind {
    /// The decoder has failed to decode the song.
    Decoder,

    /// An audio output has failed.
    Output,
}

impl std::fmt::Display for PlayerErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerErrorKind::Decoder => write!(f, "decoder"),
            PlayerErrorKind::Output => write!(f, "output"),
        }
    }
}

/// Main error type for the playback core
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading / validation errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed statement in the configuration file
    #[error("configuration error at line {line}: {message}")]
    ConfigSyntax { line: usize, message: String },

    /// No decoder plugin accepted the URI
    #[error("no decoder for {uri}")]
    NoDecoder { uri: String },

    /// Audio decoding errors
    #[error("decode error: {uri}: {message}")]
    Decode { uri: String, message: String },

    /// The decoder cannot satisfy the configured audio format
    #[error("unsupported conversion: {from} -> {to}")]
    UnsupportedConversion { from: AudioFormat, to: AudioFormat },

    /// The current song is not seekable
    #[error("not seekable")]
    NotSeekable,

    /// A seek command was refused by the decoder
    #[error("seek failed")]
    SeekFailed,

    /// Audio output device errors
    #[error("output error: {name}: {message}")]
    Output { name: String, message: String },

    /// No audio output could be opened
    #[error("all audio outputs failed to open")]
    AllOutputsFailed,

    /// A filter rejected its input
    #[error("filter error: {0}")]
    Filter(String),

    /// A captured worker failure, re-surfaced at a command boundary
    #[error("{kind} error: {message}")]
    Player {
        kind: PlayerErrorKind,
        message: String,
    },

    /// Invalid state for the requested operation
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap a stored worker failure for rethrow at a command boundary.
    ///
    /// The original error stays in shared state (it may be inspected again
    /// until cleared); the caller gets a self-contained copy.
    pub(crate) fn rethrow(kind: PlayerErrorKind, stored: &Arc<Error>) -> Error {
        Error::Player {
            kind,
            message: stored.to_string(),
        }
    }
}

/// Convenience Result type using the playback core Error
pub type Result<T> = std::result::Result<T, Error>;

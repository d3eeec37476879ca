//! Error types for the chat server
//!
//! Only bind-time failures ever reach the caller of `Server::start`.
//! Everything that goes wrong on a single connection is a `SessionError`
//! and stays local to that connection's task.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

/// Server-level errors
#[derive(Debug, Error)]
pub enum ServerError {
    /// Listening endpoint could not be opened (port in use, permission denied)
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// IO error on the listening socket after it was bound
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-connection errors (fatal to that session only)
#[derive(Debug, Error)]
pub enum SessionError {
    /// Read or write failure on the transport
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Inbound line exceeded the configured maximum length
    #[error("line exceeds maximum length")]
    LineTooLong,

    /// Peer went away before sending a display name
    #[error("connection closed during handshake")]
    HandshakeClosed,
}

impl From<LinesCodecError> for SessionError {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::MaxLineLengthExceeded => SessionError::LineTooLong,
            LinesCodecError::Io(e) => SessionError::Io(e),
        }
    }
}

/// Outbound queue errors
///
/// Never surfaced to a broadcaster; `Session::send` turns them into a
/// teardown of the affected session.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The writer task has gone away (client disconnected)
    #[error("Channel closed")]
    ChannelClosed,

    /// The recipient is not draining its queue fast enough
    #[error("Outbound queue full")]
    QueueFull,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

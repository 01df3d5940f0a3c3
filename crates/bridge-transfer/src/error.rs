//! Error types for the bridge transfer core.

use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::session::SessionState;

/// Errors raised while loading payloads from storage.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// The payload directory could not be listed.
    #[error("cannot list payload directory {path}: {source}")]
    ListDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A declared payload file could not be read.
    #[error("cannot read payload {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file name is not valid UTF-8 and cannot be sent as an entry name.
    #[error("payload file name is not valid UTF-8: {0}")]
    InvalidName(PathBuf),
}

/// Errors that end a transfer session.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The listening socket could not be created or bound.
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The stream closed before a 4-byte length prefix was fully read.
    #[error("stream closed after {read} of 4 length-prefix bytes")]
    IncompleteFrame { read: usize },

    /// The stream closed before the declared body length was received.
    #[error("stream closed after {read} of {expected} body bytes")]
    TruncatedBody { expected: usize, read: usize },

    /// A frame body exceeds what the frame type permits.
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },

    /// The manifest declares more entries than a u32 count can carry.
    #[error("manifest has {0} entries, more than the wire count can carry")]
    ManifestTooLarge(usize),

    /// A payload could not be loaded before transfer started.
    #[error("payload source error: {0}")]
    PayloadSource(#[from] PayloadError),

    /// The session was driven out of order.
    #[error("invalid session transition {from:?} -> {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },

    /// Any other socket or stream failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

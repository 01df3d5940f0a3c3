//! Transfer logging trait for structured session logs.
//!
//! The session reports every lifecycle step through a `TransferLogger` so the
//! operator binary can route them to `tracing` while tests record them.

use std::fmt;
use std::net::SocketAddr;

/// Structured log entry for a session.
#[derive(Debug, Clone)]
pub struct TransferLog {
    pub component: &'static str,
    pub session: u64,
    pub event: TransferEvent,
}

/// Session events that can be logged.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// Listener bound, waiting for a peer
    Listening {
        addr: SocketAddr,
    },
    /// Peer connected
    Accepted {
        peer: SocketAddr,
    },
    /// Simple handshake: greeting text from the peer
    GreetingReceived {
        text: String,
    },
    /// Manifest handshake: READY sent
    ReadySent,
    /// Manifest count written
    ManifestStarted {
        count: usize,
        total_bytes: u64,
    },
    /// One entry fully written
    EntrySent {
        index: usize,
        name: String,
        size: usize,
        sha256: String,
    },
    /// All entries written
    PayloadsSent {
        entries: usize,
        bytes: u64,
    },
    /// Outbound direction shut down
    HalfClosed,
    /// Liveness loop started
    LivenessStarted,
    /// Status message from the peer
    Status {
        text: String,
    },
    /// Peer closed the connection
    PeerClosed {
        statuses: usize,
    },
    /// Operator interrupt ended the session
    Interrupted,
    /// Error occurred
    Error {
        message: String,
    },
}

impl fmt::Display for TransferEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listening { addr } => write!(f, "listening addr={}", addr),
            Self::Accepted { peer } => write!(f, "accepted peer={}", peer),
            Self::GreetingReceived { text } => write!(f, "greeting text={:?}", text),
            Self::ReadySent => write!(f, "ready_sent"),
            Self::ManifestStarted { count, total_bytes } => {
                write!(f, "manifest_started count={} bytes={}", count, total_bytes)
            }
            Self::EntrySent { index, name, size, sha256 } => {
                write!(f, "entry_sent idx={} name={} size={} sha256={}", index, name, size, sha256)
            }
            Self::PayloadsSent { entries, bytes } => {
                write!(f, "payloads_sent entries={} bytes={}", entries, bytes)
            }
            Self::HalfClosed => write!(f, "half_closed"),
            Self::LivenessStarted => write!(f, "liveness_started"),
            Self::Status { text } => write!(f, "status text={:?}", text),
            Self::PeerClosed { statuses } => write!(f, "peer_closed statuses={}", statuses),
            Self::Interrupted => write!(f, "interrupted"),
            Self::Error { message } => write!(f, "error: {}", message),
        }
    }
}

/// Trait for transfer logging. Implementations can write to tracing,
/// collect entries, or discard them.
pub trait TransferLogger: Send + Sync {
    fn log(&self, entry: TransferLog);
}

/// Logger that uses the `tracing` crate.
pub struct TracingLogger;

impl TransferLogger for TracingLogger {
    fn log(&self, entry: TransferLog) {
        match &entry.event {
            TransferEvent::LivenessStarted => {
                tracing::debug!(
                    component = entry.component,
                    session = entry.session,
                    "{}",
                    entry.event,
                );
            }
            TransferEvent::Error { .. } => {
                tracing::warn!(
                    component = entry.component,
                    session = entry.session,
                    "{}",
                    entry.event,
                );
            }
            _ => {
                tracing::info!(
                    component = entry.component,
                    session = entry.session,
                    "{}",
                    entry.event,
                );
            }
        }
    }
}

/// No-op logger that discards all log entries.
pub struct NullLogger;

impl TransferLogger for NullLogger {
    fn log(&self, _entry: TransferLog) {}
}

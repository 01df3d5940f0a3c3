//! Bridge Transfer: push a set of binary payloads to one remote device over
//! TCP, then hold the connection open as a liveness channel.
//!
//! Provides:
//! - Length-prefixed framing with per-frame-type byte order
//! - Manifest encoding (count, then name and content frames per entry)
//! - Payload sources (directory scan, explicit files, in-memory)
//! - A single-connection transfer session with two handshake variants
//! - A liveness loop that relays peer status until close or interrupt

pub mod client;
pub mod codec;
pub mod error;
pub mod interrupt;
pub mod liveness;
pub mod logging;
pub mod manifest;
pub mod payload;
pub mod session;

// Re-export key types for convenience.
pub use client::BridgeClient;
pub use codec::{Endianness, FrameSpec, MAX_PAYLOAD_FRAME, MAX_STATUS_FRAME, PREFIX_LEN};
pub use error::{BridgeError, PayloadError, Result};
pub use interrupt::InterruptHandle;
pub use liveness::{LivenessEnd, LivenessMode, LivenessOutcome, STATUS_RECV_LIMIT, run_liveness};
pub use logging::{NullLogger, TracingLogger, TransferEvent, TransferLog, TransferLogger};
pub use manifest::{Manifest, PayloadEntry, WireLayout, read_manifest, write_manifest};
pub use payload::{DEFAULT_EXTENSION, DirectorySource, FileSource, PayloadSource, StaticSource};
pub use session::{
    DEFAULT_PORT, GREETING_LIMIT, Handshake, PayloadFormat, READY_GREETING, Session,
    SessionConfig, SessionOutcome, SessionReport, SessionState, TransferServer,
};

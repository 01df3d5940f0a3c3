//! Transfer session: one accepted connection driven end to end.
//!
//! ```text
//! Listening -> Accepted -> HandshakeSent -> ManifestSent -> PayloadsSent
//!           -> LivenessActive -> Closed
//! ```
//!
//! Any state may jump straight to `Closed`. Every I/O failure during the
//! handshake or transfer is terminal for the session; nothing is retried.

use std::io::{self, BufWriter, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;

use socket2::{Domain, Protocol, SockRef, Socket, Type};

use crate::error::{BridgeError, Result};
use crate::interrupt::InterruptHandle;
use crate::liveness::{LivenessEnd, LivenessMode, STATUS_RECV_LIMIT, decode_status, run_liveness};
use crate::logging::{NullLogger, TransferEvent, TransferLog, TransferLogger};
use crate::manifest::{Manifest, PayloadEntry, WireLayout, write_manifest};
use crate::payload::PayloadSource;

/// Port the deployed clients dial.
pub const DEFAULT_PORT: u16 = 8887;

/// Greeting sent by the manifest handshake.
pub const READY_GREETING: &[u8] = b"READY\n";

/// Receive size for the simple handshake greeting.
pub const GREETING_LIMIT: usize = 1024;

/// Only one pending connection is ever queued.
const LISTEN_BACKLOG: i32 = 1;

/// 4 MB send buffer; payloads are megabytes and sent in one pass.
const SOCKET_BUF_SIZE: usize = 4 * 1024 * 1024;

/// Coalesces the small prefix writes; large bodies bypass it.
const WRITE_BUF_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Listening,
    Accepted,
    HandshakeSent,
    ManifestSent,
    PayloadsSent,
    LivenessActive,
    Closed,
}

impl SessionState {
    /// The single state reachable from this one besides `Closed`.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Listening => Some(Self::Accepted),
            Self::Accepted => Some(Self::HandshakeSent),
            Self::HandshakeSent => Some(Self::ManifestSent),
            Self::ManifestSent => Some(Self::PayloadsSent),
            Self::PayloadsSent => Some(Self::LivenessActive),
            Self::LivenessActive => Some(Self::Closed),
            Self::Closed => None,
        }
    }
}

/// Records transitions and rejects out-of-order ones.
#[derive(Debug)]
struct StateTracker {
    history: Vec<SessionState>,
}

impl StateTracker {
    fn new() -> Self {
        Self {
            history: vec![SessionState::Listening],
        }
    }

    fn current(&self) -> SessionState {
        self.history[self.history.len() - 1]
    }

    fn advance(&mut self, to: SessionState) -> Result<()> {
        let from = self.current();
        let allowed = from.next() == Some(to) || (to == SessionState::Closed && from != to);
        if !allowed {
            return Err(BridgeError::InvalidTransition { from, to });
        }
        self.history.push(to);
        Ok(())
    }

    fn close(&mut self) {
        if self.current() != SessionState::Closed {
            self.history.push(SessionState::Closed);
        }
    }
}

/// How the session opens. The two variants are never combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    /// Wait for the peer's greeting (up to `limit` bytes) and log it.
    AwaitGreeting { limit: usize },
    /// Send `READY\n` immediately after accept.
    SendReady,
}

/// How payload bytes go on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    /// Content only, entries back to back, no names or lengths.
    Raw,
    /// Count, then per entry a name frame and a content frame.
    Manifest(WireLayout),
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub bind_addr: SocketAddr,
    pub handshake: Handshake,
    pub payload_format: PayloadFormat,
    /// Shut down the outbound direction once payloads are sent.
    pub half_close: bool,
    pub liveness: LivenessMode,
}

impl SessionConfig {
    /// Greeting in, raw payload out, half-close, one final status.
    pub fn simple() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            handshake: Handshake::AwaitGreeting { limit: GREETING_LIMIT },
            payload_format: PayloadFormat::Raw,
            half_close: true,
            liveness: LivenessMode::FinalStatus { limit: STATUS_RECV_LIMIT },
        }
    }

    /// READY out, framed manifest out, connection held open for status.
    pub fn manifest() -> Self {
        Self::manifest_with(WireLayout::legacy())
    }

    pub fn manifest_with(layout: WireLayout) -> Self {
        Self {
            bind_addr: default_bind_addr(),
            handshake: Handshake::SendReady,
            payload_format: PayloadFormat::Manifest(layout),
            half_close: false,
            liveness: LivenessMode::Raw { chunk: STATUS_RECV_LIMIT },
        }
    }

    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Replace the unframed status channel with length-prefixed frames using
    /// the layout's status frame type.
    pub fn with_framed_status(mut self) -> Self {
        let spec = match self.payload_format {
            PayloadFormat::Manifest(layout) => layout.status,
            PayloadFormat::Raw => WireLayout::legacy().status,
        };
        self.liveness = LivenessMode::Framed(spec);
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::manifest()
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The peer closed the connection (or sent its final status).
    Completed,
    /// The operator interrupted the session.
    Interrupted,
}

/// Summary of one finished session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session: u64,
    pub peer: Option<SocketAddr>,
    pub greeting: Option<String>,
    pub entries_sent: usize,
    pub bytes_sent: u64,
    pub statuses: Vec<String>,
    pub outcome: SessionOutcome,
    pub transitions: Vec<SessionState>,
}

impl SessionReport {
    fn new(session: u64) -> Self {
        Self {
            session,
            peer: None,
            greeting: None,
            entries_sent: 0,
            bytes_sent: 0,
            statuses: Vec::new(),
            outcome: SessionOutcome::Completed,
            transitions: Vec::new(),
        }
    }
}

/// Listener plus configuration; serves one session per `serve_once` call.
pub struct TransferServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: SessionConfig,
    logger: Arc<dyn TransferLogger>,
    next_session: u64,
}

impl TransferServer {
    /// Bind the listening socket: `SO_REUSEADDR`, backlog of one.
    pub fn bind(config: SessionConfig) -> Result<Self> {
        let addr = config.bind_addr;
        let listener = bind_listener(addr).map_err(|source| BridgeError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            config,
            logger: Arc::new(NullLogger),
            next_session: 1,
        })
    }

    pub fn with_logger(mut self, logger: Arc<dyn TransferLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept exactly one connection, load the payloads and run it to the end.
    ///
    /// The manifest is loaded in full before the handshake, so a payload error
    /// never reaches the wire; the connection is just closed. Returns `Ok` for
    /// both a peer close and an interrupt.
    pub fn serve_once(
        &mut self,
        source: &dyn PayloadSource,
        interrupt: &InterruptHandle,
    ) -> Result<SessionReport> {
        let id = self.next_session;
        self.next_session += 1;

        self.log(id, TransferEvent::Listening { addr: self.local_addr });

        let accepted = {
            let _watch = interrupt.watch_listener(self.local_addr);
            if interrupt.is_triggered() {
                None
            } else {
                Some(self.listener.accept())
            }
        };

        match accepted {
            Some(Ok((stream, peer))) if !interrupt.is_triggered() => {
                // Read per connection so a payload rebuilt while waiting is sent.
                let manifest = match source.load() {
                    Ok(manifest) => manifest,
                    Err(e) => {
                        let err = BridgeError::from(e);
                        self.log(id, TransferEvent::Error { message: err.to_string() });
                        return Err(err);
                    }
                };
                Session::new(id, stream, peer, self.config.clone(), self.logger.clone())
                    .run(&manifest, interrupt)
            }
            Some(Err(e)) if !interrupt.is_triggered() => Err(e.into()),
            // Woken by the interrupt handle; the wake connection is dropped.
            _ => {
                self.log(id, TransferEvent::Interrupted);
                let mut report = SessionReport::new(id);
                report.outcome = SessionOutcome::Interrupted;
                report.transitions = vec![SessionState::Listening, SessionState::Closed];
                Ok(report)
            }
        }
    }

    fn log(&self, session: u64, event: TransferEvent) {
        self.logger.log(TransferLog {
            component: "server",
            session,
            event,
        });
    }
}

fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(socket.into())
}

/// One accepted connection. Consumed by `run`; the socket is closed when the
/// session is dropped, on every path.
pub struct Session {
    id: u64,
    stream: TcpStream,
    peer: SocketAddr,
    config: SessionConfig,
    logger: Arc<dyn TransferLogger>,
    state: StateTracker,
}

impl Session {
    pub fn new(
        id: u64,
        stream: TcpStream,
        peer: SocketAddr,
        config: SessionConfig,
        logger: Arc<dyn TransferLogger>,
    ) -> Self {
        Self {
            id,
            stream,
            peer,
            config,
            logger,
            state: StateTracker::new(),
        }
    }

    /// Drive the session from `Accepted` to `Closed`.
    pub fn run(
        mut self,
        manifest: &Manifest,
        interrupt: &InterruptHandle,
    ) -> Result<SessionReport> {
        let mut report = SessionReport::new(self.id);
        report.peer = Some(self.peer);

        let result = self.drive(manifest, interrupt, &mut report);
        self.state.close();
        report.transitions = self.state.history.clone();

        match result {
            Ok(()) => Ok(report),
            // A shut-down socket fails reads and writes; that is the interrupt.
            Err(_) if interrupt.is_triggered() => {
                self.log(TransferEvent::Interrupted);
                report.outcome = SessionOutcome::Interrupted;
                Ok(report)
            }
            Err(e) => {
                self.log(TransferEvent::Error { message: e.to_string() });
                Err(e)
            }
        }
    }

    fn drive(
        &mut self,
        manifest: &Manifest,
        interrupt: &InterruptHandle,
        report: &mut SessionReport,
    ) -> Result<()> {
        self.state.advance(SessionState::Accepted)?;
        self.log(TransferEvent::Accepted { peer: self.peer });

        {
            let sock_ref = SockRef::from(&self.stream);
            sock_ref.set_nodelay(true)?;
            sock_ref.set_send_buffer_size(SOCKET_BUF_SIZE)?;
        }

        let _watch = interrupt.watch_connection(self.stream.try_clone()?);

        report.greeting = self.handshake()?;
        self.state.advance(SessionState::HandshakeSent)?;

        self.send_payloads(manifest, report)?;
        self.state.advance(SessionState::ManifestSent)?;
        self.state.advance(SessionState::PayloadsSent)?;
        self.log(TransferEvent::PayloadsSent {
            entries: report.entries_sent,
            bytes: report.bytes_sent,
        });

        if self.config.half_close {
            self.stream.shutdown(Shutdown::Write)?;
            self.log(TransferEvent::HalfClosed);
        }

        self.state.advance(SessionState::LivenessActive)?;
        self.log(TransferEvent::LivenessStarted);

        let logger = self.logger.clone();
        let id = self.id;
        let outcome = run_liveness(&mut &self.stream, self.config.liveness, interrupt, |text| {
            logger.log(TransferLog {
                component: "liveness",
                session: id,
                event: TransferEvent::Status { text: text.to_string() },
            });
        })?;

        report.statuses = outcome.statuses;
        match outcome.end {
            LivenessEnd::Completed => {
                report.outcome = SessionOutcome::Completed;
                self.log(TransferEvent::PeerClosed {
                    statuses: report.statuses.len(),
                });
            }
            LivenessEnd::Interrupted => {
                report.outcome = SessionOutcome::Interrupted;
                self.log(TransferEvent::Interrupted);
            }
        }

        self.state.advance(SessionState::Closed)?;
        Ok(())
    }

    fn handshake(&mut self) -> Result<Option<String>> {
        match self.config.handshake {
            Handshake::AwaitGreeting { limit } => {
                let mut buf = vec![0u8; limit.max(1)];
                let n = loop {
                    match self.stream.read(&mut buf) {
                        Ok(n) => break n,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e.into()),
                    }
                };
                if n == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "peer closed before sending a greeting",
                    )
                    .into());
                }
                let text = decode_status(&buf[..n]);
                self.log(TransferEvent::GreetingReceived { text: text.clone() });
                Ok(Some(text))
            }
            Handshake::SendReady => {
                self.stream.write_all(READY_GREETING)?;
                self.log(TransferEvent::ReadySent);
                Ok(None)
            }
        }
    }

    fn send_payloads(&self, manifest: &Manifest, report: &mut SessionReport) -> Result<()> {
        let mut writer = BufWriter::with_capacity(WRITE_BUF_SIZE, &self.stream);
        let logger = &self.logger;
        let id = self.id;
        let mut log_entry = |index: usize, entry: &PayloadEntry| {
            report.entries_sent += 1;
            report.bytes_sent += entry.len() as u64;
            logger.log(TransferLog {
                component: "session",
                session: id,
                event: TransferEvent::EntrySent {
                    index,
                    name: entry.name.clone(),
                    size: entry.len(),
                    sha256: entry.sha256_hex(),
                },
            });
        };

        match self.config.payload_format {
            PayloadFormat::Manifest(layout) => {
                logger.log(TransferLog {
                    component: "session",
                    session: id,
                    event: TransferEvent::ManifestStarted {
                        count: manifest.len(),
                        total_bytes: manifest.total_bytes(),
                    },
                });
                write_manifest(&mut writer, manifest, &layout, log_entry)?;
            }
            PayloadFormat::Raw => {
                for (index, entry) in manifest.iter().enumerate() {
                    writer.write_all(&entry.content)?;
                    log_entry(index, entry);
                }
                writer.flush()?;
            }
        }
        Ok(())
    }

    fn log(&self, event: TransferEvent) {
        self.logger.log(TransferLog {
            component: "session",
            session: self.id,
            event,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_follows_lifecycle() {
        let mut tracker = StateTracker::new();
        for to in [
            SessionState::Accepted,
            SessionState::HandshakeSent,
            SessionState::ManifestSent,
            SessionState::PayloadsSent,
            SessionState::LivenessActive,
            SessionState::Closed,
        ] {
            tracker.advance(to).unwrap();
        }
        assert_eq!(tracker.history.len(), 7);
        tracker.close();
        assert_eq!(tracker.history.len(), 7);
    }

    #[test]
    fn tracker_rejects_skipped_state() {
        let mut tracker = StateTracker::new();
        tracker.advance(SessionState::Accepted).unwrap();
        assert!(matches!(
            tracker.advance(SessionState::PayloadsSent),
            Err(BridgeError::InvalidTransition {
                from: SessionState::Accepted,
                to: SessionState::PayloadsSent,
            })
        ));
    }

    #[test]
    fn any_state_may_close() {
        let mut tracker = StateTracker::new();
        tracker.advance(SessionState::Accepted).unwrap();
        tracker.advance(SessionState::Closed).unwrap();
        assert_eq!(tracker.current(), SessionState::Closed);
        assert!(tracker.advance(SessionState::Closed).is_err());
    }

    #[test]
    fn presets_pick_one_handshake_each() {
        let simple = SessionConfig::simple();
        assert_eq!(simple.handshake, Handshake::AwaitGreeting { limit: GREETING_LIMIT });
        assert_eq!(simple.payload_format, PayloadFormat::Raw);
        assert!(simple.half_close);

        let manifest = SessionConfig::manifest().with_framed_status();
        assert_eq!(manifest.handshake, Handshake::SendReady);
        assert_eq!(manifest.bind_addr.port(), DEFAULT_PORT);
        assert_eq!(
            manifest.liveness,
            LivenessMode::Framed(WireLayout::legacy().status)
        );
    }

    #[test]
    fn bind_conflict_is_bind_error() {
        let first = TransferServer::bind(
            SessionConfig::manifest().with_bind_addr("127.0.0.1:0".parse().unwrap()),
        )
        .unwrap();
        // SO_REUSEADDR does not let a second socket listen on the same address.
        let second =
            TransferServer::bind(SessionConfig::manifest().with_bind_addr(first.local_addr()));
        assert!(matches!(second, Err(BridgeError::Bind { .. })));
    }
}

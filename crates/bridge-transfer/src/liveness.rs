//! Post-transfer liveness channel.
//!
//! Once payloads are sent the connection stays open only so the peer can
//! report status and so either side notices when the other goes away. A
//! zero-byte read ends the loop normally; an operator interrupt ends it
//! early.

use std::io::{self, Read};

use crate::codec::FrameSpec;
use crate::error::Result;
use crate::interrupt::InterruptHandle;

/// Receive size for unframed status reads.
pub const STATUS_RECV_LIMIT: usize = 1024;

/// Shape of the messages the peer sends after the transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessMode {
    /// One unframed read after half-close, then done.
    FinalStatus { limit: usize },
    /// Repeated unframed reads; message boundaries are whatever `read` returns.
    Raw { chunk: usize },
    /// Repeated length-prefixed status frames.
    Framed(FrameSpec),
}

/// How the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessEnd {
    /// Peer closed its side, or the single final status arrived.
    Completed,
    /// Operator interrupt.
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessOutcome {
    pub end: LivenessEnd,
    pub statuses: Vec<String>,
}

/// Receive status messages until the peer closes or `interrupt` fires.
/// Each decoded message is passed to `on_status` as it arrives.
pub fn run_liveness<R, F>(
    reader: &mut R,
    mode: LivenessMode,
    interrupt: &InterruptHandle,
    mut on_status: F,
) -> Result<LivenessOutcome>
where
    R: Read + ?Sized,
    F: FnMut(&str),
{
    let mut statuses = Vec::new();
    let finish = |end: LivenessEnd, statuses: Vec<String>| -> Result<LivenessOutcome> {
        Ok(LivenessOutcome { end, statuses })
    };

    loop {
        if interrupt.is_triggered() {
            return finish(LivenessEnd::Interrupted, statuses);
        }

        let received = match mode {
            LivenessMode::FinalStatus { limit } | LivenessMode::Raw { chunk: limit } => {
                let mut buf = vec![0u8; limit.max(1)];
                match reader.read(&mut buf) {
                    Ok(0) => None,
                    Ok(n) => {
                        buf.truncate(n);
                        Some(buf)
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) if interrupt.is_triggered() => {
                        return finish(LivenessEnd::Interrupted, statuses);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            LivenessMode::Framed(spec) => match spec.try_read_frame(reader) {
                Ok(frame) => frame,
                Err(_) if interrupt.is_triggered() => {
                    return finish(LivenessEnd::Interrupted, statuses);
                }
                Err(e) => return Err(e),
            },
        };

        let Some(bytes) = received else {
            // A shutdown from the interrupt handle also reads as EOF.
            let end = if interrupt.is_triggered() {
                LivenessEnd::Interrupted
            } else {
                LivenessEnd::Completed
            };
            return finish(end, statuses);
        };

        let text = decode_status(&bytes);
        on_status(&text);
        statuses.push(text);

        if matches!(mode, LivenessMode::FinalStatus { .. }) {
            return finish(LivenessEnd::Completed, statuses);
        }
    }
}

/// Lossy UTF-8, surrounding whitespace trimmed.
pub fn decode_status(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MAX_STATUS_FRAME;
    use crate::error::BridgeError;

    const FRAMED: LivenessMode = LivenessMode::Framed(FrameSpec::big(MAX_STATUS_FRAME));

    fn framed(messages: &[&str]) -> Vec<u8> {
        let spec = FrameSpec::big(MAX_STATUS_FRAME);
        let mut wire = Vec::new();
        for m in messages {
            spec.write_frame(&mut wire, m.as_bytes()).unwrap();
        }
        wire
    }

    #[test]
    fn single_framed_status_then_close() {
        let wire = framed(&["status: ok"]);
        let mut seen = Vec::new();
        let outcome = run_liveness(&mut wire.as_slice(), FRAMED, &InterruptHandle::new(), |s| {
            seen.push(s.to_string())
        })
        .unwrap();

        assert_eq!(outcome.end, LivenessEnd::Completed);
        assert_eq!(outcome.statuses, vec!["status: ok"]);
        assert_eq!(seen, vec!["status: ok"]);
    }

    #[test]
    fn back_to_back_frames_keep_boundaries() {
        let wire = framed(&["loaded a.dylib", "loaded b.dylib", ""]);
        let outcome =
            run_liveness(&mut wire.as_slice(), FRAMED, &InterruptHandle::new(), |_| {}).unwrap();
        assert_eq!(outcome.statuses, vec!["loaded a.dylib", "loaded b.dylib", ""]);
    }

    #[test]
    fn immediate_close_is_success_with_no_statuses() {
        let mut empty: &[u8] = &[];
        let outcome = run_liveness(&mut empty, FRAMED, &InterruptHandle::new(), |_| {}).unwrap();
        assert_eq!(outcome.end, LivenessEnd::Completed);
        assert!(outcome.statuses.is_empty());
    }

    #[test]
    fn truncated_status_frame_is_an_error() {
        let mut wire: &[u8] = &[0, 0, 0, 10, b'h', b'i'];
        let err = run_liveness(&mut wire, FRAMED, &InterruptHandle::new(), |_| {}).unwrap_err();
        assert!(matches!(err, BridgeError::TruncatedBody { expected: 10, read: 2 }));
    }

    #[test]
    fn final_status_reads_once() {
        let mut wire: &[u8] = b"LOAD SUCCESS\n";
        let outcome = run_liveness(
            &mut wire,
            LivenessMode::FinalStatus { limit: STATUS_RECV_LIMIT },
            &InterruptHandle::new(),
            |_| {},
        )
        .unwrap();
        assert_eq!(outcome.end, LivenessEnd::Completed);
        assert_eq!(outcome.statuses, vec!["LOAD SUCCESS"]);
    }

    #[test]
    fn raw_mode_splits_on_chunk_size() {
        let mut wire: &[u8] = b"abcdef";
        let outcome = run_liveness(
            &mut wire,
            LivenessMode::Raw { chunk: 4 },
            &InterruptHandle::new(),
            |_| {},
        )
        .unwrap();
        assert_eq!(outcome.statuses, vec!["abcd", "ef"]);
    }

    #[test]
    fn invalid_utf8_is_decoded_lossily() {
        assert_eq!(decode_status(b"  ok \xff\n"), "ok \u{fffd}");
    }

    #[test]
    fn triggered_interrupt_stops_before_reading() {
        let interrupt = InterruptHandle::new();
        interrupt.trigger();
        let wire = framed(&["never seen"]);
        let outcome = run_liveness(&mut wire.as_slice(), FRAMED, &interrupt, |_| {}).unwrap();
        assert_eq!(outcome.end, LivenessEnd::Interrupted);
        assert!(outcome.statuses.is_empty());
    }
}

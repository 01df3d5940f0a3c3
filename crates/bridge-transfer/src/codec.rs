//! Length-prefixed framing.
//!
//! ```text
//! [0..4]   Body length (u32, endianness chosen per frame type)
//! [4..]    Body (exactly `length` bytes, may be empty)
//! ```
//!
//! The manifest uses several frame types side by side and they do not all
//! share a byte order, so the endianness lives on each `FrameSpec` rather than
//! in a global constant.

use std::io::{self, Read, Write};

use crate::error::{BridgeError, Result};

/// Size of every length prefix on the wire.
pub const PREFIX_LEN: usize = 4;

/// Default body limit for names and payload content (256 MB).
pub const MAX_PAYLOAD_FRAME: usize = 256 * 1024 * 1024;

/// Default body limit for post-transfer status frames (64 KB).
pub const MAX_STATUS_FRAME: usize = 64 * 1024;

/// Byte order of a length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Big,
    Little,
}

impl Endianness {
    pub fn encode(self, value: u32) -> [u8; PREFIX_LEN] {
        match self {
            Self::Big => value.to_be_bytes(),
            Self::Little => value.to_le_bytes(),
        }
    }

    pub fn decode(self, bytes: [u8; PREFIX_LEN]) -> u32 {
        match self {
            Self::Big => u32::from_be_bytes(bytes),
            Self::Little => u32::from_le_bytes(bytes),
        }
    }
}

/// One independently configured frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSpec {
    pub endianness: Endianness,
    pub max_len: usize,
}

impl FrameSpec {
    pub const fn new(endianness: Endianness, max_len: usize) -> Self {
        Self { endianness, max_len }
    }

    pub const fn big(max_len: usize) -> Self {
        Self::new(Endianness::Big, max_len)
    }

    pub const fn little(max_len: usize) -> Self {
        Self::new(Endianness::Little, max_len)
    }

    /// Encode a length prefix, rejecting lengths this frame type cannot carry.
    pub fn encode_prefix(&self, len: usize) -> Result<[u8; PREFIX_LEN]> {
        let max = self.max_len.min(u32::MAX as usize);
        if len > max {
            return Err(BridgeError::FrameTooLarge { len, max });
        }
        Ok(self.endianness.encode(len as u32))
    }

    /// Encode a complete frame into a new buffer.
    pub fn encode_frame(&self, body: &[u8]) -> Result<Vec<u8>> {
        let prefix = self.encode_prefix(body.len())?;
        let mut buf = Vec::with_capacity(PREFIX_LEN + body.len());
        buf.extend_from_slice(&prefix);
        buf.extend_from_slice(body);
        Ok(buf)
    }

    /// Write prefix then body. The body is written in place, never copied.
    pub fn write_frame<W: Write + ?Sized>(&self, writer: &mut W, body: &[u8]) -> Result<()> {
        let prefix = self.encode_prefix(body.len())?;
        writer.write_all(&prefix)?;
        writer.write_all(body)?;
        Ok(())
    }

    /// Read one frame. Any EOF before the body is complete is an error.
    pub fn read_frame<R: Read + ?Sized>(&self, reader: &mut R) -> Result<Vec<u8>> {
        match self.try_read_frame(reader)? {
            Some(body) => Ok(body),
            None => Err(BridgeError::IncompleteFrame { read: 0 }),
        }
    }

    /// Read one frame, returning `None` if the stream ends cleanly on a frame
    /// boundary.
    pub fn try_read_frame<R: Read + ?Sized>(&self, reader: &mut R) -> Result<Option<Vec<u8>>> {
        let mut prefix = [0u8; PREFIX_LEN];
        let got = read_full(reader, &mut prefix)?;
        if got == 0 {
            return Ok(None);
        }
        if got < PREFIX_LEN {
            return Err(BridgeError::IncompleteFrame { read: got });
        }

        let len = self.endianness.decode(prefix) as usize;
        if len > self.max_len {
            return Err(BridgeError::FrameTooLarge { len, max: self.max_len });
        }

        let mut body = vec![0u8; len];
        let got = read_full(reader, &mut body)?;
        if got < len {
            return Err(BridgeError::TruncatedBody { expected: len, read: got });
        }
        Ok(Some(body))
    }
}

/// Read a bare u32 (the manifest count) in the given byte order.
pub fn read_u32<R: Read + ?Sized>(reader: &mut R, endianness: Endianness) -> Result<u32> {
    let mut buf = [0u8; PREFIX_LEN];
    let got = read_full(reader, &mut buf)?;
    if got < PREFIX_LEN {
        return Err(BridgeError::IncompleteFrame { read: got });
    }
    Ok(endianness.decode(buf))
}

/// Fill `buf` as far as the stream allows. Returns the number of bytes read;
/// less than `buf.len()` only when the peer closed.
fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const BE: FrameSpec = FrameSpec::big(MAX_PAYLOAD_FRAME);
    const LE: FrameSpec = FrameSpec::little(MAX_PAYLOAD_FRAME);

    #[test]
    fn prefix_byte_order() {
        assert_eq!(BE.encode_frame(b"a.bin").unwrap()[..4], [0, 0, 0, 5]);
        assert_eq!(LE.encode_frame(b"a.bin").unwrap()[..4], [5, 0, 0, 0]);
    }

    #[test]
    fn empty_frame_is_valid() {
        let wire = BE.encode_frame(b"").unwrap();
        assert_eq!(wire, vec![0, 0, 0, 0]);
        assert_eq!(BE.read_frame(&mut wire.as_slice()).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn clean_eof_is_none() {
        let mut empty: &[u8] = &[];
        assert!(BE.try_read_frame(&mut empty).unwrap().is_none());
    }

    #[test]
    fn partial_prefix_is_incomplete() {
        let mut wire: &[u8] = &[0, 0];
        match BE.try_read_frame(&mut wire) {
            Err(BridgeError::IncompleteFrame { read }) => assert_eq!(read, 2),
            other => panic!("expected IncompleteFrame, got {:?}", other),
        }
    }

    #[test]
    fn eof_mid_body_is_truncated() {
        let mut wire: &[u8] = &[0, 0, 0, 8, b'a', b'b', b'c'];
        match BE.read_frame(&mut wire) {
            Err(BridgeError::TruncatedBody { expected, read }) => {
                assert_eq!(expected, 8);
                assert_eq!(read, 3);
            }
            other => panic!("expected TruncatedBody, got {:?}", other),
        }
    }

    #[test]
    fn declared_length_over_limit_is_rejected() {
        let spec = FrameSpec::big(16);
        let mut wire: &[u8] = &[0, 0, 1, 0];
        assert!(matches!(
            spec.read_frame(&mut wire),
            Err(BridgeError::FrameTooLarge { len: 256, max: 16 })
        ));
        assert!(matches!(
            spec.encode_frame(&[0u8; 17]),
            Err(BridgeError::FrameTooLarge { len: 17, max: 16 })
        ));
    }

    #[test]
    fn mismatched_endianness_misreads_length() {
        let wire = LE.encode_frame(b"xy").unwrap();
        let spec = FrameSpec::big(1024);
        assert!(spec.read_frame(&mut wire.as_slice()).is_err());
    }

    proptest! {
        #[test]
        fn frame_roundtrip(
            body in proptest::collection::vec(any::<u8>(), 0..2048),
            little in any::<bool>(),
        ) {
            let spec = if little { LE } else { BE };
            let wire = spec.encode_frame(&body).unwrap();
            prop_assert_eq!(wire.len(), PREFIX_LEN + body.len());
            let decoded = spec.read_frame(&mut wire.as_slice()).unwrap();
            prop_assert_eq!(decoded, body);
        }
    }
}

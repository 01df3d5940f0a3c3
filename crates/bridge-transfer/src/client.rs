//! Receiving side of the protocol, as the remote device speaks it.
//!
//! Used by the loopback tests and by tools that need to stand in for a
//! device.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};

use crate::codec::FrameSpec;
use crate::error::Result;
use crate::manifest::{Manifest, WireLayout, read_manifest};
use crate::session::READY_GREETING;

pub struct BridgeClient {
    stream: TcpStream,
}

impl BridgeClient {
    pub fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    /// Read the manifest handshake greeting. Fails if anything other than
    /// `READY\n` arrives.
    pub fn expect_ready(&mut self) -> Result<()> {
        let mut buf = [0u8; READY_GREETING.len()];
        self.stream.read_exact(&mut buf)?;
        if buf != READY_GREETING {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected greeting {:?}", String::from_utf8_lossy(&buf)),
            )
            .into());
        }
        Ok(())
    }

    /// Simple handshake: announce ourselves.
    pub fn send_greeting(&mut self, text: &str) -> Result<()> {
        self.stream.write_all(text.as_bytes())?;
        Ok(())
    }

    pub fn read_manifest(&mut self, layout: &WireLayout) -> Result<Manifest> {
        read_manifest(&mut self.stream, layout)
    }

    /// Simple variant: everything up to the server's half-close.
    pub fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.stream.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Unframed status text.
    pub fn send_status(&mut self, text: &str) -> Result<()> {
        self.stream.write_all(text.as_bytes())?;
        self.stream.flush()?;
        Ok(())
    }

    /// Length-prefixed status frame.
    pub fn send_status_frame(&mut self, text: &str, spec: &FrameSpec) -> Result<()> {
        spec.write_frame(&mut self.stream, text.as_bytes())?;
        self.stream.flush()?;
        Ok(())
    }

    /// Stop sending; the server's liveness loop sees EOF.
    pub fn finish(&self) -> Result<()> {
        self.stream.shutdown(Shutdown::Write)?;
        Ok(())
    }

    /// Block until the server closes its side. Returns bytes that arrived
    /// first, if any.
    pub fn wait_for_close(&mut self) -> Result<usize> {
        let mut sink = Vec::new();
        match self.stream.read_to_end(&mut sink) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => Ok(sink.len()),
            Err(e) => Err(e.into()),
        }
    }
}

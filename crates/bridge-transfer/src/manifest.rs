//! Manifest model and wire encoding.
//!
//! ```text
//! count        u32 (layout.count)
//! repeat count times:
//!   nameLen    u32 (layout.name)       name     nameLen bytes, UTF-8
//!   contentLen u32 (layout.content)    content  contentLen bytes
//! ```
//!
//! Entries are interleaved: entry 1 name and content, then entry 2, and so on.

use std::io::{Read, Write};

use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::codec::{Endianness, FrameSpec, MAX_PAYLOAD_FRAME, MAX_STATUS_FRAME};
use crate::error::{BridgeError, Result};

/// One named payload. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadEntry {
    pub name: String,
    pub content: Bytes,
}

impl PayloadEntry {
    pub fn new(name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Hex SHA-256 of the content, for operator logs.
    pub fn sha256_hex(&self) -> String {
        hex::encode(Sha256::digest(&self.content))
    }
}

/// Ordered set of entries, fixed before transmission starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<PayloadEntry>,
}

impl Manifest {
    pub fn new(entries: Vec<PayloadEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[PayloadEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PayloadEntry> {
        self.entries.iter()
    }

    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.len() as u64).sum()
    }
}

impl FromIterator<PayloadEntry> for Manifest {
    fn from_iter<I: IntoIterator<Item = PayloadEntry>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Manifest {
    type Item = &'a PayloadEntry;
    type IntoIter = std::slice::Iter<'a, PayloadEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Per-field frame configuration for the whole protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireLayout {
    pub count: Endianness,
    pub name: FrameSpec,
    pub content: FrameSpec,
    pub status: FrameSpec,
}

impl WireLayout {
    /// Byte order used by deployed clients: everything big-endian except the
    /// name length, which is little-endian.
    pub const fn legacy() -> Self {
        Self {
            count: Endianness::Big,
            name: FrameSpec::little(MAX_PAYLOAD_FRAME),
            content: FrameSpec::big(MAX_PAYLOAD_FRAME),
            status: FrameSpec::big(MAX_STATUS_FRAME),
        }
    }

    /// Every prefix in network byte order.
    pub const fn network() -> Self {
        Self {
            count: Endianness::Big,
            name: FrameSpec::big(MAX_PAYLOAD_FRAME),
            content: FrameSpec::big(MAX_PAYLOAD_FRAME),
            status: FrameSpec::big(MAX_STATUS_FRAME),
        }
    }
}

impl Default for WireLayout {
    fn default() -> Self {
        Self::legacy()
    }
}

/// Write the count followed by every entry. `on_entry` runs after each entry
/// has been fully handed to the writer.
///
/// Fails before writing anything if the count or any frame cannot be encoded.
pub fn write_manifest<W, F>(
    writer: &mut W,
    manifest: &Manifest,
    layout: &WireLayout,
    mut on_entry: F,
) -> Result<()>
where
    W: Write + ?Sized,
    F: FnMut(usize, &PayloadEntry),
{
    let count = u32::try_from(manifest.len())
        .map_err(|_| BridgeError::ManifestTooLarge(manifest.len()))?;
    for entry in manifest {
        layout.name.encode_prefix(entry.name.len())?;
        layout.content.encode_prefix(entry.content.len())?;
    }

    writer.write_all(&layout.count.encode(count))?;
    for (idx, entry) in manifest.iter().enumerate() {
        layout.name.write_frame(writer, entry.name.as_bytes())?;
        layout.content.write_frame(writer, &entry.content)?;
        on_entry(idx, entry);
    }
    writer.flush()?;
    Ok(())
}

/// Decode a manifest written by `write_manifest` with the same layout.
pub fn read_manifest<R: Read + ?Sized>(reader: &mut R, layout: &WireLayout) -> Result<Manifest> {
    let count = crate::codec::read_u32(reader, layout.count)? as usize;
    // Cap the pre-allocation; the count comes from the peer.
    let mut entries = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let name = layout.name.read_frame(reader)?;
        let content = layout.content.read_frame(reader)?;
        entries.push(PayloadEntry {
            name: String::from_utf8_lossy(&name).into_owned(),
            content: Bytes::from(content),
        });
    }
    Ok(Manifest::new(entries))
}

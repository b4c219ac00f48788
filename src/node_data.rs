//! Per-node runtime state: the three data buffers (definition, provide
//! ports, require ports), their dirty flags, and each area's lifecycle
//! state machine (§4.6).

use sha2::{Digest, Sha256};

use crate::compiler::compile;
use crate::error::{Error, Result};
use crate::node_signature::{DataElement, NodeSignature};
use crate::program::ProgramKind;
use crate::value::Value;
use crate::vm;

/// Lifecycle of one area (definition, provide-data, or require-data) of a
/// node as seen from one connection, per §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AreaState {
    /// Freshly created, nothing exchanged yet.
    Init,
    /// Waiting for the peer's `PUBLISH_FILE` (or, for a node we publish
    /// ourselves, for our own publish to be acknowledged).
    WaitingForFileInfo,
    /// File info exchanged; waiting for the first data write.
    WaitingForFileData,
    /// Data present; waiting for an explicit `OPEN_FILE` before we start
    /// trusting writes to affect routed output.
    WaitingForFileOpenRequest,
    /// Fully connected: reads and writes both flow.
    Connected,
    /// Peer closed or revoked the file; area is inert until republished.
    Disconnected,
}

/// One fixed-size byte buffer plus a parallel per-byte dirty-flag buffer,
/// per §4.6 ("each has a parallel dirty-flag buffer, one byte per byte of
/// payload").
#[derive(Debug, Clone)]
pub struct Buffer {
    data: Vec<u8>,
    dirty: Vec<bool>,
}

impl Buffer {
    /// Create a zero-filled buffer of `size` bytes.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Buffer {
            data: vec![0u8; size],
            dirty: vec![false; size],
        }
    }

    /// Read the whole buffer.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Overwrite `data[offset..offset+bytes.len()]`, marking the changed
    /// bytes' dirty flags. Errors if the write would run past the end.
    pub fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(bytes.len())
            .ok_or_else(|| Error::InvalidArgument("offset overflow".into()))?;
        if end > self.data.len() {
            return Err(Error::BufferBoundary {
                needed: end,
                available: self.data.len(),
            });
        }
        for (i, &b) in bytes.iter().enumerate() {
            if self.data[offset + i] != b {
                self.data[offset + i] = b;
                self.dirty[offset + i] = true;
            }
        }
        Ok(())
    }

    /// Read back `len` bytes starting at `offset`.
    pub fn read(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let end = offset
            .checked_add(len)
            .ok_or_else(|| Error::InvalidArgument("offset overflow".into()))?;
        if end > self.data.len() {
            return Err(Error::BufferBoundary {
                needed: end,
                available: self.data.len(),
            });
        }
        Ok(&self.data[offset..end])
    }

    /// True if any byte has been written to since the last
    /// [`Buffer::clear_dirty`].
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.iter().any(|&d| d)
    }

    /// The sub-range of bytes written to since the last
    /// [`Buffer::clear_dirty`], as a half-open `[start, end)` range, or
    /// `None` if nothing is dirty. Contiguous even if the dirty bytes
    /// within it aren't, since callers flush whole ranges.
    #[must_use]
    pub fn dirty_range(&self) -> Option<(usize, usize)> {
        let start = self.dirty.iter().position(|&d| d)?;
        let end = self.dirty.iter().rposition(|&d| d)? + 1;
        Some((start, end))
    }

    /// Reset every dirty flag, returning whether any was set beforehand.
    pub fn clear_dirty(&mut self) -> bool {
        let was_dirty = self.is_dirty();
        self.dirty.iter_mut().for_each(|d| *d = false);
        was_dirty
    }
}

/// A node's full runtime state on one connection: its three buffers, and
/// the lifecycle of each.
#[derive(Debug, Clone)]
pub struct NodeInstance {
    /// Parsed signature (port tables).
    pub signature: NodeSignature,
    /// Raw APX definition text, kept for digesting and for
    /// `PUBLISH_FILE`'s name/size bookkeeping.
    definition_text: String,
    definition_buf: Buffer,
    provide_buf: Buffer,
    require_buf: Buffer,
    definition_state: AreaState,
    provide_state: AreaState,
    require_state: AreaState,
}

impl NodeInstance {
    /// Build a node instance from a parsed signature and its source text.
    /// Provide/require buffers are sized from the signature's computed
    /// layout and pre-filled from each port's declared init value.
    #[must_use]
    pub fn new(signature: NodeSignature, definition_text: impl Into<String>) -> Self {
        let definition_text = definition_text.into();
        let mut provide_buf = Buffer::new(signature.provide_data_size() as usize);
        for port in &signature.provides {
            if !port.init.is_empty() {
                let _ = provide_buf.write(port.offset as usize, &port.init);
            }
        }
        let mut require_buf = Buffer::new(signature.require_data_size() as usize);
        for port in &signature.requires {
            if !port.init.is_empty() {
                let _ = require_buf.write(port.offset as usize, &port.init);
            }
        }
        NodeInstance {
            signature,
            definition_buf: Buffer::new(definition_text.len()),
            definition_text,
            provide_buf,
            require_buf,
            definition_state: AreaState::Init,
            provide_state: AreaState::Init,
            require_state: AreaState::Init,
        }
    }

    /// SHA-256 digest of the definition text, used as the `PUBLISH_FILE`
    /// digest for the node's definition file.
    #[must_use]
    pub fn definition_digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.definition_text.as_bytes());
        hasher.finalize().into()
    }

    /// Current state of `area`.
    #[must_use]
    pub fn state(&self, area: Area) -> AreaState {
        match area {
            Area::Definition => self.definition_state,
            Area::Provide => self.provide_state,
            Area::Require => self.require_state,
        }
    }

    /// Transition `area` to `state`.
    pub fn set_state(&mut self, area: Area, state: AreaState) {
        match area {
            Area::Definition => self.definition_state = state,
            Area::Provide => self.provide_state = state,
            Area::Require => self.require_state = state,
        }
    }

    /// Overwrite the require-port data buffer at `offset`, as driven by an
    /// incoming RemoteFile write to the require-data file (§4.8).
    pub fn write_require_port_data(&mut self, offset: u32, bytes: &[u8]) -> Result<()> {
        self.require_buf.write(offset as usize, bytes)
    }

    /// Overwrite the provide-port data buffer at `offset`, as driven by an
    /// incoming RemoteFile write to the provide-data file -- e.g. a remote
    /// node's own `.out` file, mirrored locally once its definition has
    /// been adopted (§4.8).
    pub fn write_provide_port_data(&mut self, offset: u32, bytes: &[u8]) -> Result<()> {
        self.provide_buf.write(offset as usize, bytes)
    }

    /// The full provide-port data buffer, to be sent out on a RemoteFile
    /// write (§4.8).
    #[must_use]
    pub fn read_provide_port_data(&self) -> &[u8] {
        self.provide_buf.as_slice()
    }

    /// The full require-port data buffer, e.g. to send as the initial
    /// contents of a synthetic `<node>.in` file once its peer opens it
    /// (§4.8's "server publishes the synthetic require-port file").
    #[must_use]
    pub fn read_require_port_data(&self) -> &[u8] {
        self.require_buf.as_slice()
    }

    /// Raw APX definition text bytes, for sending on `OPEN_FILE` against
    /// the `.apx` file.
    #[must_use]
    pub fn definition_bytes(&self) -> &[u8] {
        self.definition_text.as_bytes()
    }

    /// True if the provide buffer has been written since the last publish.
    #[must_use]
    pub fn provide_dirty(&self) -> bool {
        self.provide_buf.is_dirty()
    }

    /// Clear the provide buffer's dirty flag after it has been flushed out.
    pub fn clear_provide_dirty(&mut self) {
        self.provide_buf.clear_dirty();
    }

    /// Decode one provide port's current value, using the VM over the
    /// port's declared element (§4.5).
    pub fn provide_port_value(&self, port_name: &str) -> Result<Value> {
        let port = self
            .signature
            .provides
            .iter()
            .find(|p| p.name == port_name)
            .ok_or_else(|| Error::InvalidName(port_name.to_string()))?;
        decode_port(&port.element, self.provide_buf.read(
            port.offset as usize,
            port.element.fixed_size() as usize,
        )?)
    }

    /// Encode `value` and write it into the named provide port's slot
    /// (the producer side of a node writing its own output).
    pub fn write_provide_port_value(&mut self, port_name: &str, value: &Value) -> Result<()> {
        let port = self
            .signature
            .provides
            .iter()
            .find(|p| p.name == port_name)
            .ok_or_else(|| Error::InvalidName(port_name.to_string()))?;
        let bytes = encode_port(&port.element, value)?;
        self.provide_buf.write(port.offset as usize, &bytes)
    }

    /// Decode one require port's current value.
    pub fn require_port_value(&self, port_name: &str) -> Result<Value> {
        let port = self
            .signature
            .requires
            .iter()
            .find(|p| p.name == port_name)
            .ok_or_else(|| Error::InvalidName(port_name.to_string()))?;
        decode_port(&port.element, self.require_buf.read(
            port.offset as usize,
            port.element.fixed_size() as usize,
        )?)
    }
}

/// Which of a node's three buffers an [`AreaState`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Area {
    /// The definition text file.
    Definition,
    /// The provide-port data file.
    Provide,
    /// The require-port data file.
    Require,
}

fn decode_port(element: &DataElement, bytes: &[u8]) -> Result<Value> {
    let program = compile(element, ProgramKind::Unpack)?;
    vm::deserialize(&program, bytes)
}

fn encode_port(element: &DataElement, value: &Value) -> Result<Vec<u8>> {
    let program = compile(element, ProgramKind::Pack)?;
    vm::serialize(&program, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_signature::{ArrayLen, PrimitiveKind, Port};

    fn sample_signature() -> NodeSignature {
        let mut sig = NodeSignature {
            name: "TestNode1".into(),
            provides: vec![Port {
                name: "ProvidePort1".into(),
                element: DataElement::scalar(PrimitiveKind::U8).with_array(ArrayLen::None),
                offset: 0,
                init: vec![3],
            }],
            requires: vec![Port {
                name: "RequirePort1".into(),
                element: DataElement::scalar(PrimitiveKind::U16),
                offset: 0,
                init: vec![],
            }],
        };
        sig.layout_provides();
        sig.layout_requires();
        sig
    }

    #[test]
    fn init_values_are_applied_on_construction() {
        let node = NodeInstance::new(sample_signature(), "APX/1.2\nN\"TestNode1\"\n");
        assert_eq!(node.provide_port_value("ProvidePort1").unwrap(), Value::U8(3));
    }

    #[test]
    fn write_then_read_require_port_roundtrips() {
        let mut node = NodeInstance::new(sample_signature(), "APX/1.2\nN\"TestNode1\"\n");
        node.write_require_port_data(0, &[0x34, 0x12]).unwrap();
        assert_eq!(
            node.require_port_value("RequirePort1").unwrap(),
            Value::U16(0x1234)
        );
    }

    #[test]
    fn dirty_flag_tracks_provide_writes() {
        let mut node = NodeInstance::new(sample_signature(), "APX/1.2\nN\"TestNode1\"\n");
        assert!(!node.provide_dirty());
        node.write_provide_port_value("ProvidePort1", &Value::U8(9))
            .unwrap();
        assert!(node.provide_dirty());
        node.clear_provide_dirty();
        assert!(!node.provide_dirty());
    }

    #[test]
    fn digest_is_stable_for_same_text() {
        let a = NodeInstance::new(sample_signature(), "same text");
        let b = NodeInstance::new(sample_signature(), "same text");
        assert_eq!(a.definition_digest(), b.definition_digest());
    }

    #[test]
    fn dirty_tracking_is_per_byte_not_whole_buffer() {
        let mut buf = Buffer::new(8);
        assert!(!buf.is_dirty());
        assert_eq!(buf.dirty_range(), None);

        buf.write(3, &[9, 9]).unwrap();
        assert!(buf.is_dirty());
        assert_eq!(buf.dirty_range(), Some((3, 5)));

        // Writing the same bytes again doesn't extend the dirty range.
        buf.write(3, &[9, 9]).unwrap();
        assert_eq!(buf.dirty_range(), Some((3, 5)));

        // A disjoint write further out widens the dirty range to span
        // both -- the tracker is per-byte, not a single whole-buffer flag.
        buf.write(6, &[1]).unwrap();
        assert_eq!(buf.dirty_range(), Some((3, 7)));

        assert!(buf.clear_dirty());
        assert!(!buf.is_dirty());
        assert_eq!(buf.dirty_range(), None);
        assert!(!buf.clear_dirty());
    }
}

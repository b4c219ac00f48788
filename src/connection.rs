//! Connection state machine: greeting handshake, then RemoteFile message
//! dispatch over a [`crate::file_manager::Worker`] (§4.1, §4.8).

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::file_info::{DigestType, FileInfo, FileType, CMD_ADDRESS};
use crate::file_manager::{Parsed, Shared, TransmitHandler, Worker};
use crate::node_data::{Area, AreaState, NodeInstance};
use crate::node_text::DefinitionParser;
use crate::numheader::{self, Decoded};
use crate::rmf::{self, Command};

/// The literal greeting text exchanged before either side trusts the
/// other's message framing. 29 bytes, matching the NumHeader length used
/// throughout this crate's handshake tests.
pub const GREETING: &str = "RMFP/1.0\nMessage-Format: 32\n\n";

fn set_connected_on_first_write(node: &mut NodeInstance, area: Area) {
    if node.state(area) != AreaState::Connected {
        node.set_state(area, AreaState::Connected);
    }
}

/// Which side of the handshake a connection plays. The client speaks
/// first; the server waits for the client's greeting before replying with
/// its own. Net of that, both sides run the identical state machine and
/// message dispatch, so this crate has one [`ConnectionBase`] type
/// parameterized by role rather than two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends the greeting first.
    Client,
    /// Waits for the peer's greeting, then replies.
    Server,
}

/// Connection lifecycle (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Freshly created; nothing sent or received.
    Connect,
    /// Our greeting has been sent (client only; servers skip this state).
    GreetingSent,
    /// The peer's greeting has been received and validated.
    GreetingAckReceived,
    /// Handshake complete; RemoteFile messages flow normally.
    Running,
    /// Connection torn down; no further messages are accepted.
    Disconnected,
}

/// Events a [`ConnectionBase`] surfaces to its owner as it processes
/// incoming bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Handshake completed.
    Connected,
    /// The peer published a file.
    RemoteFilePublished {
        /// Published file's address.
        address: u32,
        /// Published file's name.
        name: String,
    },
    /// The peer revoked a previously published file.
    RemoteFileRevoked {
        /// Address of the revoked file.
        address: u32,
    },
    /// The peer asked to open a file we published.
    FileOpened {
        /// Opened file's address.
        address: u32,
    },
    /// The peer asked to close a file we published.
    FileClosed {
        /// Closed file's address.
        address: u32,
    },
    /// A complete write landed at `address`.
    DataWritten {
        /// Destination address.
        address: u32,
        /// Written bytes.
        data: Vec<u8>,
    },
    /// Plain acknowledgement.
    Ack,
    /// Negative acknowledgement.
    Nack,
    /// End of transmission.
    Eot,
    /// Heartbeat/ping traffic, passed through as a no-op.
    Reserved {
        /// Raw command type code.
        cmd_type: u32,
    },
    /// The peer reported an error against one of our files.
    PeerError {
        /// Offending address.
        address: u32,
    },
}

/// One end of an APX connection: handshake plus RemoteFile dispatch.
pub struct ConnectionBase<T: TransmitHandler> {
    role: Role,
    state: ConnState,
    worker: Arc<Worker<T>>,
    greeting_buf: Vec<u8>,
    nodes: HashMap<String, NodeInstance>,
    /// Nodes the peer has published and whose definition we understood,
    /// keyed by node name.
    remote_nodes: HashMap<String, NodeInstance>,
    /// Definition files the peer has `PUBLISH_FILE`'d that we've asked to
    /// open but not yet fully received, keyed by the file's base (announced)
    /// address: `(node name, accumulation buffer sized to the announced
    /// file size)`. Chunks of the incoming write land at increasing
    /// addresses (§8's Continuation property), so they're matched back to
    /// this entry by range, not by repeating the base address -- see
    /// [`ConnectionBase::pending_definition_base`].
    pending_definitions: HashMap<u32, (String, Vec<u8>)>,
    /// Parses a peer's definition text into a signature, so its synthetic
    /// require-port file can be auto-published and kept in sync (§4.8).
    /// Absent by default: a connection that never calls
    /// [`ConnectionBase::with_parser`] still dispatches every other
    /// message, it just leaves remote definitions unparsed.
    parser: Option<Arc<dyn DefinitionParser + Send + Sync>>,
    /// Largest single write payload this side will emit before splitting
    /// across more-bit continuations (§4.8, §8's Continuation property).
    mtu: usize,
}

impl<T: TransmitHandler> ConnectionBase<T> {
    /// Build a new, unstarted connection.
    #[must_use]
    pub fn new(role: Role, transmit: T, config: &Config) -> Self {
        ConnectionBase {
            role,
            state: ConnState::Connect,
            worker: Arc::new(Worker::new(Shared::new(), transmit, config)),
            greeting_buf: Vec::new(),
            nodes: HashMap::new(),
            remote_nodes: HashMap::new(),
            pending_definitions: HashMap::new(),
            parser: None,
            mtu: config.mtu,
        }
    }

    /// Attach a definition parser, so this side auto-opens and decodes
    /// remote node definitions, publishing the synthetic `<name>.in` file
    /// as soon as a definition's port table is known.
    #[must_use]
    pub fn with_parser(mut self, parser: impl DefinitionParser + Send + Sync + 'static) -> Self {
        self.parser = Some(Arc::new(parser));
        self
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Shared file maps backing this connection.
    #[must_use]
    pub fn shared(&self) -> &Arc<Shared> {
        self.worker.shared()
    }

    /// Begin the handshake. Clients send their greeting immediately;
    /// servers wait for the peer's.
    pub fn start(&mut self) -> Result<()> {
        if self.role == Role::Client {
            self.send_greeting()?;
            self.state = ConnState::GreetingSent;
        }
        Ok(())
    }

    fn send_greeting(&self) -> Result<()> {
        let mut framed = Vec::new();
        let mut nh = [0u8; 4];
        let n = numheader::encode(&mut nh, GREETING.len() as u32)?;
        framed.extend_from_slice(&nh[..n]);
        framed.extend_from_slice(GREETING.as_bytes());
        self.worker.queue_outgoing(framed)
    }

    fn send_command(&self, cmd: &Command) -> Result<()> {
        let mut payload = [0u8; 512];
        let n = cmd.encode(&mut payload)?;
        let mut addr = [0u8; 4];
        let alen = rmf::address_encode(&mut addr, CMD_ADDRESS, false);
        let mut framed = Vec::new();
        let mut nh = [0u8; 4];
        let nhlen = numheader::encode(&mut nh, (alen + n) as u32)?;
        framed.extend_from_slice(&nh[..nhlen]);
        framed.extend_from_slice(&addr[..alen]);
        framed.extend_from_slice(&payload[..n]);
        self.worker.queue_outgoing(framed)
    }

    /// Feed freshly received bytes, returning every event they produced.
    ///
    /// Only the client sends the text greeting (§4.8); the server
    /// validates it and replies with an `ACK` command instead of a
    /// greeting of its own, so the client's pre-`Running` bytes are parsed
    /// as a RemoteFile command, not as greeting text.
    pub fn on_bytes_received(&mut self, bytes: &[u8]) -> Result<Vec<ConnectionEvent>> {
        if self.state == ConnState::Disconnected {
            return Err(Error::Connection("connection already closed".into()));
        }
        if self.state == ConnState::Running {
            return self.handle_running_bytes(bytes);
        }
        match self.role {
            Role::Server => self.handle_greeting_bytes(bytes),
            Role::Client => self.handle_ack_bytes(bytes),
        }
    }

    fn handle_greeting_bytes(&mut self, bytes: &[u8]) -> Result<Vec<ConnectionEvent>> {
        self.greeting_buf.extend_from_slice(bytes);
        let (len, hdr_width) = match numheader::decode(&self.greeting_buf) {
            Decoded::Incomplete => return Ok(vec![]),
            Decoded::Ok(len, width) => (len as usize, width),
        };
        let total = hdr_width + len;
        if self.greeting_buf.len() < total {
            return Ok(vec![]);
        }
        let text = String::from_utf8_lossy(&self.greeting_buf[hdr_width..total]).into_owned();
        let remainder = self.greeting_buf[total..].to_vec();
        self.greeting_buf.clear();
        if text != GREETING {
            self.state = ConnState::Disconnected;
            return Err(Error::Connection(format!("unexpected greeting {text:?}")));
        }
        debug!("greeting received and validated");
        self.state = ConnState::GreetingAckReceived;
        self.send_command(&Command::Ack)?;
        self.worker.shared().set_connected(true);
        self.state = ConnState::Running;
        info!("connection established");
        let mut events = vec![ConnectionEvent::Connected];
        if !remainder.is_empty() {
            events.extend(self.handle_running_bytes(&remainder)?);
        }
        Ok(events)
    }

    fn handle_ack_bytes(&mut self, bytes: &[u8]) -> Result<Vec<ConnectionEvent>> {
        let parsed = self.worker.on_bytes_received(bytes)?;
        let mut events = Vec::with_capacity(parsed.len());
        for p in parsed {
            if self.state != ConnState::Running && matches!(p, Parsed::Command(Command::Ack)) {
                self.state = ConnState::GreetingAckReceived;
                self.worker.shared().set_connected(true);
                self.state = ConnState::Running;
                info!("connection established");
                events.push(ConnectionEvent::Connected);
            } else if let Some(e) = self.handle_parsed(p)? {
                events.push(e);
            }
        }
        Ok(events)
    }

    fn handle_running_bytes(&mut self, bytes: &[u8]) -> Result<Vec<ConnectionEvent>> {
        let parsed = self.worker.on_bytes_received(bytes)?;
        let mut events = Vec::with_capacity(parsed.len());
        for p in parsed {
            if let Some(e) = self.handle_parsed(p)? {
                events.push(e);
            }
        }
        Ok(events)
    }

    /// Returns `None` when a chunk completed no new externally-visible
    /// event -- e.g. a non-terminal continuation chunk of a multi-chunk
    /// write, which is still applied to its buffer immediately but whose
    /// `DataWritten` notification waits for the terminating chunk (§8's
    /// Continuation property).
    fn handle_parsed(&mut self, parsed: Parsed) -> Result<Option<ConnectionEvent>> {
        match parsed {
            Parsed::Command(Command::Ack) => Ok(Some(ConnectionEvent::Ack)),
            Parsed::Command(Command::Nack) => Ok(Some(ConnectionEvent::Nack)),
            Parsed::Command(Command::Eot) => Ok(Some(ConnectionEvent::Eot)),
            Parsed::Command(Command::Reserved { cmd_type }) => {
                Ok(Some(ConnectionEvent::Reserved { cmd_type }))
            }
            Parsed::Command(Command::PublishFile {
                address,
                size,
                file_type,
                digest_type,
                digest,
                name,
            }) => {
                let mut info = FileInfo::new_local(&name, address, size, file_type);
                info.digest_type = digest_type;
                info.digest = digest;
                info.owner = crate::file_info::Owner::Remote;
                let is_definition = info.is_definition();
                if let Err(e) = self.worker.shared().with_remote(|m| m.insert(info)) {
                    // §4.9 open question: a publish overlapping an existing
                    // address range is rejected with INVALID_WRITE and the
                    // connection is torn down, not merely the one message.
                    warn!("peer published {name:?} at {address:#x}, overlapping an existing file: {e}");
                    self.send_command(&Command::InvalidWrite { address })?;
                    self.worker.shared().clear_all();
                    self.worker.shared().set_connected(false);
                    self.state = ConnState::Disconnected;
                    return Err(e);
                }
                if is_definition && self.parser.is_some() {
                    self.pending_definitions
                        .insert(address, (name.clone(), vec![0u8; size as usize]));
                    self.send_command(&Command::OpenFile { address })?;
                }
                Ok(Some(ConnectionEvent::RemoteFilePublished { address, name }))
            }
            Parsed::Command(Command::RevokeFile { address }) => {
                let name = self
                    .worker
                    .shared()
                    .with_remote(|m| m.find_by_address(address).map(|f| f.name.clone()));
                if let Some(name) = name {
                    self.worker.shared().with_remote(|m| m.remove_by_name(&name));
                }
                Ok(Some(ConnectionEvent::RemoteFileRevoked { address }))
            }
            Parsed::Command(Command::OpenFile { address }) => {
                let is_local_file = self
                    .worker
                    .shared()
                    .with_local(|m| m.find_by_address(address).is_some());
                match self.local_payload_for_address(address) {
                    Some(payload) => self.send_data_write(address, &payload)?,
                    None if is_local_file => {
                        // §4.8 Failure semantics: "Missing read handler for
                        // an opened file -> INVALID_READ_HANDLER error
                        // command." The file is ours but no node buffer
                        // backs it (e.g. the node hasn't been registered).
                        warn!("opened file at {address:#x} has no read handler");
                        self.send_command(&Command::InvalidReadHandler { address })?;
                    }
                    None => {}
                }
                Ok(Some(ConnectionEvent::FileOpened { address }))
            }
            Parsed::Command(Command::CloseFile { address }) => {
                Ok(Some(ConnectionEvent::FileClosed { address }))
            }
            Parsed::Command(Command::InvalidWrite { address })
            | Parsed::Command(Command::InvalidReadHandler { address }) => {
                warn!("peer reported an error at address {address:#x}");
                Ok(Some(ConnectionEvent::PeerError { address }))
            }
            Parsed::Write { address, data, more } => {
                if let Some(base) = self.pending_definition_base(address) {
                    return self.accumulate_definition_chunk(base, address, &data, more);
                }
                if !self.apply_incoming_write(address, &data) {
                    // §4.8 Failure semantics: "Write outside a file's
                    // bounds -> surface INVALID_WRITE error command but do
                    // not kill the connection."
                    warn!("write to unknown address {address:#x}, reporting INVALID_WRITE");
                    self.send_command(&Command::InvalidWrite { address })?;
                }
                if more {
                    Ok(None)
                } else {
                    Ok(Some(ConnectionEvent::DataWritten { address, data }))
                }
            }
        }
    }

    /// If `address` falls inside a still-accumulating definition file's
    /// announced range, the base address under which it's keyed in
    /// [`ConnectionBase::pending_definitions`].
    fn pending_definition_base(&self, address: u32) -> Option<u32> {
        self.pending_definitions
            .iter()
            .find(|(&base, (_, buf))| address >= base && address < base + buf.len() as u32)
            .map(|(&base, _)| base)
    }

    /// Apply one chunk of an incoming definition-file write to its
    /// accumulation buffer (§8's Continuation property: every chunk is
    /// applied as it arrives). Once the terminating chunk lands, parses
    /// the completed text and fires `DataWritten` for it.
    fn accumulate_definition_chunk(
        &mut self,
        base: u32,
        address: u32,
        data: &[u8],
        more: bool,
    ) -> Result<Option<ConnectionEvent>> {
        let offset = (address - base) as usize;
        let end = offset
            .checked_add(data.len())
            .ok_or_else(|| Error::InvalidArgument("offset overflow".into()))?;
        {
            let (_, buf) = self
                .pending_definitions
                .get_mut(&base)
                .expect("base came from pending_definition_base");
            if end > buf.len() {
                return Err(Error::BufferBoundary {
                    needed: end,
                    available: buf.len(),
                });
            }
            buf[offset..end].copy_from_slice(data);
        }
        if more {
            return Ok(None);
        }
        let (name, bytes) = self
            .pending_definitions
            .remove(&base)
            .expect("base came from pending_definition_base");
        self.adopt_remote_definition(&name, &bytes)?;
        Ok(Some(ConnectionEvent::DataWritten {
            address: base,
            data: bytes,
        }))
    }

    /// Store a completed write into whichever node buffer `address` falls
    /// in, and transition that area to `Connected` on its first write
    /// (§4.8: "The receiving side stores the bytes into the appropriate
    /// buffer and transitions the port-area state to CONNECTED on first
    /// write"). A `.in` file is always the require-data area of the node
    /// that *declared* it -- hosted locally if we parsed the peer's
    /// definition (so it lands in `remote_nodes`), or hosted by the peer
    /// for one of our own nodes (so it lands in `nodes`) -- and `.out`
    /// works the same way in reverse.
    /// Returns `false` when `address` doesn't fall inside any file we or
    /// the peer know about, so the caller can report `INVALID_WRITE`.
    fn apply_incoming_write(&mut self, address: u32, data: &[u8]) -> bool {
        if let Some(info) = self.worker.shared().with_local(|m| {
            let found = m.find_by_address(address).cloned();
            if let Some(f) = m.find_by_address_mut(address) {
                f.has_first_write = true;
            }
            found
        }) {
            let Some(node_name) = info.node_name() else {
                return true;
            };
            let offset = address - info.address;
            if info.is_require_data() {
                if let Some(node) = self.remote_nodes.get_mut(node_name) {
                    match node.write_require_port_data(offset, data) {
                        Ok(()) => set_connected_on_first_write(node, Area::Require),
                        Err(e) => warn!("write to {node_name}'s require data rejected: {e}"),
                    }
                }
            } else if info.is_provide_data() {
                if let Some(node) = self.nodes.get_mut(node_name) {
                    match node.write_provide_port_data(offset, data) {
                        Ok(()) => set_connected_on_first_write(node, Area::Provide),
                        Err(e) => warn!("write to {node_name}'s provide data rejected: {e}"),
                    }
                }
            }
            return true;
        }
        if let Some(info) = self.worker.shared().with_remote(|m| {
            let found = m.find_by_address(address).cloned();
            if let Some(f) = m.find_by_address_mut(address) {
                f.has_first_write = true;
            }
            found
        }) {
            let Some(node_name) = info.node_name() else {
                return true;
            };
            let offset = address - info.address;
            if info.is_provide_data() {
                if let Some(node) = self.remote_nodes.get_mut(node_name) {
                    match node.write_provide_port_data(offset, data) {
                        Ok(()) => set_connected_on_first_write(node, Area::Provide),
                        Err(e) => warn!("write to {node_name}'s provide data rejected: {e}"),
                    }
                }
            } else if info.is_require_data() {
                if let Some(node) = self.nodes.get_mut(node_name) {
                    match node.write_require_port_data(offset, data) {
                        Ok(()) => set_connected_on_first_write(node, Area::Require),
                        Err(e) => warn!("write to {node_name}'s require data rejected: {e}"),
                    }
                }
            }
            return true;
        }
        false
    }

    /// A peer's `.apx` definition text arrived. Parse it, size and publish
    /// the synthetic require-port (`.in`) file it implies, and remember
    /// the node so later writes can be decoded against its port table.
    fn adopt_remote_definition(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let Some(parser) = self.parser.clone() else {
            return Ok(());
        };
        let text = String::from_utf8_lossy(data).into_owned();
        let signature = parser.parse(&text)?;
        let node = NodeInstance::new(signature, text);
        let require_size = node.signature.require_data_size();
        if require_size > 0 {
            let in_file =
                FileInfo::new_local(format!("{name}.in"), 0, require_size, FileType::Fixed);
            let address = self
                .worker
                .shared()
                .with_local(|m| m.auto_insert_port_data(in_file))?;
            self.send_command(&Command::PublishFile {
                address,
                size: require_size,
                file_type: FileType::Fixed,
                digest_type: DigestType::None,
                digest: [0; 32],
                name: format!("{name}.in"),
            })?;
        }
        debug!("adopted remote definition for {name}");
        self.remote_nodes.insert(name.to_string(), node);
        Ok(())
    }

    /// If `address` is one of our own published files, the bytes we'd
    /// currently answer an `OPEN_FILE` with.
    fn local_payload_for_address(&self, address: u32) -> Option<Vec<u8>> {
        let info = self
            .worker
            .shared()
            .with_local(|m| m.find_by_address(address).cloned())?;
        let node_name = info.node_name()?;
        if info.is_definition() {
            let node = self.nodes.get(node_name)?;
            return Some(node.definition_bytes().to_vec());
        }
        if info.is_provide_data() {
            let node = self.nodes.get(node_name)?;
            return Some(node.read_provide_port_data().to_vec());
        }
        if info.is_require_data() {
            let node = self.remote_nodes.get(node_name)?;
            return Some(node.read_require_port_data().to_vec());
        }
        None
    }

    /// Frame and queue a data write of `data` addressed to `address`,
    /// splitting it across more-bit continuation chunks of at most
    /// [`Config::mtu`] bytes each when it doesn't fit in one (§4.8: "long
    /// files may be split with the more_bit set on all but the last").
    /// Each continuation chunk's address header is `address + bytes sent
    /// so far`, matching the receiver's reassembly in
    /// [`crate::file_manager::receiver::Receiver`].
    fn send_data_write(&self, address: u32, data: &[u8]) -> Result<()> {
        let mtu = self.mtu.max(1);
        if data.is_empty() {
            return self.send_data_write_chunk(address, data, false);
        }
        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + mtu).min(data.len());
            let more = end < data.len();
            self.send_data_write_chunk(address + offset as u32, &data[offset..end], more)?;
            offset = end;
        }
        Ok(())
    }

    fn send_data_write_chunk(&self, address: u32, data: &[u8], more: bool) -> Result<()> {
        let mut addr = [0u8; 4];
        let alen = rmf::address_encode(&mut addr, address, more);
        let mut framed = Vec::new();
        let mut nh = [0u8; 4];
        let nhlen = numheader::encode(&mut nh, (alen + data.len()) as u32)?;
        framed.extend_from_slice(&nh[..nhlen]);
        framed.extend_from_slice(&addr[..alen]);
        framed.extend_from_slice(data);
        self.worker.queue_outgoing(framed)
    }

    /// Register a node we own, auto-assigning definition and provide-data
    /// addresses, and queue the `PUBLISH_FILE` messages that announce it.
    pub fn publish_node(
        &mut self,
        definition_text: impl Into<String>,
        node: NodeInstance,
    ) -> Result<()> {
        let definition_text = definition_text.into();
        let name = node.signature.name.clone();
        let provide_size = node.signature.provide_data_size();

        let def_file = FileInfo::new_local(
            format!("{name}.apx"),
            0,
            definition_text.len() as u32,
            FileType::Fixed,
        );
        let def_address = self
            .worker
            .shared()
            .with_local(|m| m.auto_insert_definition(def_file))?;

        if provide_size > 0 {
            let data_file =
                FileInfo::new_local(format!("{name}.out"), 0, provide_size, FileType::Fixed);
            let data_address = self
                .worker
                .shared()
                .with_local(|m| m.auto_insert_port_data(data_file))?;
            self.send_command(&Command::PublishFile {
                address: data_address,
                size: provide_size,
                file_type: FileType::Fixed,
                digest_type: DigestType::None,
                digest: [0; 32],
                name: format!("{name}.out"),
            })?;
        }

        self.send_command(&Command::PublishFile {
            address: def_address,
            size: definition_text.len() as u32,
            file_type: FileType::Fixed,
            digest_type: DigestType::Sha256,
            digest: node.definition_digest(),
            name: format!("{name}.apx"),
        })?;

        self.nodes.insert(name, node);
        Ok(())
    }

    /// Request that the peer open a file we have previously published or
    /// learned about.
    pub fn open_file(&self, address: u32) -> Result<()> {
        self.send_command(&Command::OpenFile { address })
    }

    /// Request that the peer close a file.
    pub fn close_file(&self, address: u32) -> Result<()> {
        self.send_command(&Command::CloseFile { address })
    }

    /// Flush a node's provide-port data out as a RemoteFile write, if it
    /// has been written to since the last flush.
    pub fn write_provide_data(&mut self, node_name: &str) -> Result<bool> {
        let payload = {
            let node = self
                .nodes
                .get(node_name)
                .ok_or_else(|| Error::NodeMissing(node_name.to_string()))?;
            if !node.provide_dirty() {
                return Ok(false);
            }
            node.read_provide_port_data().to_vec()
        };
        let file_name = format!("{node_name}.out");
        let address = self
            .worker
            .shared()
            .with_local(|m| m.find_by_name(&file_name).map(|f| f.address))
            .ok_or_else(|| Error::MissingBuffer(file_name.clone()))?;
        self.send_data_write(address, &payload)?;
        self.nodes
            .get_mut(node_name)
            .expect("checked present above")
            .clear_provide_dirty();
        Ok(true)
    }

    /// Frame and queue a write of `data` to the file the peer published
    /// under `remote_file_name`, e.g. forwarding a routed provide-port
    /// update on to this connection's peer as that peer's require-port
    /// write (§4.9).
    pub fn forward_write(&self, remote_file_name: &str, data: &[u8]) -> Result<()> {
        let address = self
            .worker
            .shared()
            .with_remote(|m| m.find_by_name(remote_file_name).map(|f| f.address))
            .ok_or_else(|| Error::MissingBuffer(remote_file_name.to_string()))?;
        self.send_data_write(address, data)
    }

    /// Access a registered node by name.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&NodeInstance> {
        self.nodes.get(name)
    }

    /// Mutably access a registered node by name.
    pub fn node_mut(&mut self, name: &str) -> Option<&mut NodeInstance> {
        self.nodes.get_mut(name)
    }

    /// Access a peer's node by name, once its definition has been adopted
    /// via [`ConnectionBase::with_parser`].
    #[must_use]
    pub fn remote_node(&self, name: &str) -> Option<&NodeInstance> {
        self.remote_nodes.get(name)
    }

    /// Cooperative mode: send at most one queued message. Returns `true`
    /// if a message was sent, `false` if the queue was empty (§8's
    /// Cooperative worker property).
    pub fn run(&self) -> Result<bool> {
        self.worker.run()
    }

    /// Send everything queued so far (cooperative run mode).
    pub fn drain_outgoing(&self) -> Result<usize> {
        self.worker.drain_outgoing()
    }
}

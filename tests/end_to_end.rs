//! End-to-end exercises of the connection handshake, file publication, and
//! port-data exchange, wired together the way a real client/server pair
//! would see them on the wire.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use sha2::{Digest, Sha256};

use apx::config::Config;
use apx::connection::{ConnectionBase, ConnectionEvent, Role};
use apx::file_manager::TransmitHandler;
use apx::node_data::NodeInstance;
use apx::node_text::{DefinitionParser, TextDefinitionParser};
use apx::numheader;
use apx::rmf::{self, Command, Outcome};

#[derive(Clone, Default)]
struct Loopback {
    inbox: Arc<Mutex<Vec<u8>>>,
}

impl TransmitHandler for Loopback {
    fn transmit(&self, bytes: &[u8]) -> apx::Result<()> {
        self.inbox.lock().unwrap().extend_from_slice(bytes);
        Ok(())
    }
}

impl Loopback {
    fn take(&self) -> Vec<u8> {
        self.inbox.lock().unwrap().split_off(0)
    }
}

fn new_conn(role: Role) -> (ConnectionBase<Loopback>, Loopback) {
    let transmit = Loopback::default();
    (
        ConnectionBase::new(role, transmit.clone(), &Config::default()),
        transmit,
    )
}

/// Strip one packet's NumHeader + RemoteFile address header off the front
/// of `bytes`, returning the address, the "more" bit, the command payload,
/// and the total number of bytes the packet occupied (so callers can slice
/// off the next packet when several were queued back to back).
fn unframe(bytes: &[u8]) -> (u32, bool, &[u8], usize) {
    let (len, hdr_width) = match numheader::decode(bytes) {
        numheader::Decoded::Ok(len, width) => (len as usize, width),
        numheader::Decoded::Incomplete => panic!("packet too short to carry a NumHeader"),
    };
    let body = &bytes[hdr_width..hdr_width + len];
    match rmf::address_decode(body) {
        Outcome::Ok((address, more), consumed) => {
            (address, more, &body[consumed..], hdr_width + len)
        }
        other => panic!("unexpected address decode outcome {other:?}"),
    }
}

#[test]
fn greeting_then_ack() -> Result<()> {
    // A client's opening greeting frames to exactly 30 bytes: one NumHeader
    // byte (29) plus the 29-byte greeting text.
    let (mut client, client_transmit) = new_conn(Role::Client);
    let (mut server, server_transmit) = new_conn(Role::Server);

    client.start()?;
    client.drain_outgoing()?;
    let greeting = client_transmit.take();
    assert_eq!(greeting.len(), 30);
    assert_eq!(greeting[0], 29);
    assert_eq!(&greeting[1..], b"RMFP/1.0\nMessage-Format: 32\n\n");

    let events = server.on_bytes_received(&greeting)?;
    assert_eq!(events, vec![ConnectionEvent::Connected]);

    server.drain_outgoing()?;
    let ack = server_transmit.take();
    assert_eq!(ack.len(), 9);
    let (address, more, payload, consumed) = unframe(&ack);
    assert_eq!(consumed, ack.len());
    assert_eq!(address, apx::file_info::CMD_ADDRESS);
    assert!(!more);
    assert_eq!(Command::decode(payload), Outcome::Ok(Command::Ack, 4));

    let events = client.on_bytes_received(&ack)?;
    assert_eq!(events, vec![ConnectionEvent::Connected]);
    Ok(())
}

fn run_handshake(
    client: &mut ConnectionBase<Loopback>,
    client_transmit: &Loopback,
    server: &mut ConnectionBase<Loopback>,
    server_transmit: &Loopback,
) -> Result<()> {
    client.start()?;
    server.start()?;
    client.drain_outgoing()?;
    server.on_bytes_received(&client_transmit.take())?;
    server.drain_outgoing()?;
    client.on_bytes_received(&server_transmit.take())?;
    Ok(())
}

#[test]
fn publish_file_round_trip() -> Result<()> {
    let text = "APX/1.2\nN\"TestNode1\"\nP\"ProvidePort1\"S\n";
    let sig = TextDefinitionParser.parse(text)?;
    assert_eq!(sig.provide_data_size(), 2);
    let node = NodeInstance::new(sig, text);

    let (mut client, client_transmit) = new_conn(Role::Client);
    let (mut server, server_transmit) = new_conn(Role::Server);
    run_handshake(&mut client, &client_transmit, &mut server, &server_transmit)?;

    client.publish_node(text, node)?;
    client.drain_outgoing()?;
    let published = client_transmit.take();

    // The provide-port file publish goes out first; its framed packet is
    // 67 bytes for a 2-byte "TestNode1.out".
    let (address, more, payload, consumed) = unframe(&published);
    assert_eq!(consumed, 67);
    assert_eq!(address, apx::file_info::CMD_ADDRESS);
    assert!(!more);
    match Command::decode(payload) {
        Outcome::Ok(Command::PublishFile { address, size, name, .. }, _) => {
            assert_eq!(address, 0);
            assert_eq!(size, 2);
            assert_eq!(name, "TestNode1.out");
        }
        other => panic!("unexpected decode {other:?}"),
    }

    let events = server.on_bytes_received(&published)?;
    assert!(events.iter().any(
        |e| matches!(e, ConnectionEvent::RemoteFilePublished { name, .. } if name == "TestNode1.out")
    ));
    Ok(())
}

#[test]
fn definition_digest_matches_sha256_of_the_text() {
    let text = "APX/1.2\nN\"TestNode1\"\nP\"ProvidePort1\"C(0,3)\nP\"ProvidePort2\"C(0,7)\n";
    let sig = TextDefinitionParser.parse(text).unwrap();
    let node = NodeInstance::new(sig, text);

    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let expected: [u8; 32] = hasher.finalize().into();
    assert_eq!(node.definition_digest(), expected);
}

#[test]
fn require_port_write_after_definition_exchange() -> Result<()> {
    // The server parses a node the client publishes, declaring two
    // initialized require ports, and auto-publishes the synthetic
    // "TestNode1.in" file back. Once the client opens that file, the
    // server answers with the ports' current (initial) values.
    let text = "APX/1.2\nN\"TestNode1\"\nR\"X\"C(0,3):=3\nR\"Y\"C(0,7):=7\n";
    let sig = TextDefinitionParser.parse(text)?;
    assert_eq!(sig.require_data_size(), 2);
    let node = NodeInstance::new(sig, text);

    let (mut client, client_transmit) = new_conn(Role::Client);
    let server_transmit = Loopback::default();
    let mut server = ConnectionBase::new(Role::Server, server_transmit.clone(), &Config::default())
        .with_parser(TextDefinitionParser);
    run_handshake(&mut client, &client_transmit, &mut server, &server_transmit)?;

    client.publish_node(text, node)?;
    client.drain_outgoing()?;
    let publish_definition = client_transmit.take();

    // Server sees the definition publish, asks to open it.
    server.on_bytes_received(&publish_definition)?;
    server.drain_outgoing()?;
    let open_definition = server_transmit.take();

    // Client answers with the definition text itself.
    client.on_bytes_received(&open_definition)?;
    client.drain_outgoing()?;
    let definition_data = client_transmit.take();

    // Server parses it and publishes the synthetic require-port file.
    server.on_bytes_received(&definition_data)?;
    server.drain_outgoing()?;
    let publish_in_file = server_transmit.take();

    let events = client.on_bytes_received(&publish_in_file)?;
    let in_address = events
        .iter()
        .find_map(|e| match e {
            ConnectionEvent::RemoteFilePublished { address, name } if name == "TestNode1.in" => {
                Some(*address)
            }
            _ => None,
        })
        .expect("client should see TestNode1.in published");

    // The client opens the require-port file.
    client.open_file(in_address)?;
    client.drain_outgoing()?;
    let open_in_file = client_transmit.take();

    let events = server.on_bytes_received(&open_in_file)?;
    assert!(events
        .iter()
        .any(|e| matches!(e, ConnectionEvent::FileOpened { address } if *address == in_address)));
    server.drain_outgoing()?;
    let data_write = server_transmit.take();

    assert_eq!(data_write, vec![0x04, 0x00, 0x00, 0x03, 0x07]);
    Ok(())
}

#[test]
fn range_check_rejects_out_of_bounds_value() {
    use apx::compiler::compile;
    use apx::node_signature::{DataElement, PrimitiveKind, Range};
    use apx::program::ProgramKind;
    use apx::value::Value;
    use apx::vm;

    let elem = DataElement::scalar(PrimitiveKind::U8).with_range(Range { lo: 0, hi: 7 });
    let pack_prog = compile(&elem, ProgramKind::Pack).unwrap();

    assert!(vm::serialize(&pack_prog, &Value::U8(8)).is_err());
    let bytes = vm::serialize(&pack_prog, &Value::U8(7)).unwrap();
    assert_eq!(bytes, vec![0x07]);
}

#[test]
fn record_fields_stay_in_declared_order() {
    use apx::compiler::compile;
    use apx::node_signature::{ArrayLen, DataElement, PrimitiveKind};
    use apx::program::ProgramKind;
    use apx::value::{OrderedHash, Value};
    use apx::vm;

    let elem = DataElement::Record {
        fields: vec![
            ("First".into(), DataElement::scalar(PrimitiveKind::U16)),
            ("Second".into(), DataElement::scalar(PrimitiveKind::U8)),
        ],
        array: ArrayLen::None,
    };
    let pack_prog = compile(&elem, ProgramKind::Pack).unwrap();
    let unpack_prog = compile(&elem, ProgramKind::Unpack).unwrap();

    let mut fields = OrderedHash::new();
    fields.insert("First", Value::U16(0x1234));
    fields.insert("Second", Value::U8(0x07));
    let bytes = vm::serialize(&pack_prog, &Value::Hash(fields)).unwrap();
    assert_eq!(bytes, vec![0x34, 0x12, 0x07]);

    match vm::deserialize(&unpack_prog, &bytes).unwrap() {
        Value::Hash(h) => assert_eq!(h.keys(), vec!["First", "Second"]),
        other => panic!("expected a hash, got {other:?}"),
    }
}

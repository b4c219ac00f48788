//! Reassembly of the incoming byte stream into RemoteFile messages
//! (§4.2, §4.7): NumHeader framing, then address-header continuation via
//! the more-bit.

use crate::error::{Error, Result};
use crate::file_info::CMD_ADDRESS;
use crate::numheader::{self, Decoded};
use crate::rmf::{self, Command, Outcome};

/// One parsed unit handed up from the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    /// A command message (ack, publish, open, close, ...).
    Command(Command),
    /// One wire chunk of a write to the data file at `address`. Per §8's
    /// Continuation property and the original `apx_fileManager_parseDataMsg`,
    /// each chunk carries its own destination address and must be applied
    /// to the target buffer immediately, in order; `more` is the chunk's
    /// own more-bit, true for every chunk but the last one of a
    /// multi-chunk write.
    Write {
        /// This chunk's destination address.
        address: u32,
        /// This chunk's payload.
        data: Vec<u8>,
        /// True if a further continuation chunk follows.
        more: bool,
    },
}

/// Growable byte-stream reassembler, one per connection direction.
///
/// Frames the NumHeader-delimited packet and decodes its address header;
/// each resulting chunk is handed up as its own [`Parsed::Write`] rather
/// than being buffered here -- reassembly into a logical whole (when
/// needed, e.g. for definition files) is the caller's job, since only the
/// caller knows which addresses belong to the same file.
#[derive(Debug, Default)]
pub struct Receiver {
    buf: Vec<u8>,
}

impl Receiver {
    /// Create an empty receiver with `capacity` bytes preallocated.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Receiver {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Append freshly-received bytes to the reassembly buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of bytes buffered but not yet consumed into a full message.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Try to pull the next parsed unit out of the buffer. Returns
    /// `Ok(None)` when a full NumHeader-framed packet isn't buffered yet.
    /// A multi-chunk write surfaces as one `Parsed::Write` per call, one
    /// per wire chunk -- callers must apply each as it arrives rather
    /// than waiting for `more == false`.
    pub fn try_parse_next(&mut self) -> Result<Option<Parsed>> {
        let (len, hdr_width) = match numheader::decode(&self.buf) {
            Decoded::Incomplete => return Ok(None),
            Decoded::Ok(len, width) => (len as usize, width),
        };
        let total = hdr_width + len;
        if self.buf.len() < total {
            return Ok(None);
        }
        let message = self.buf[hdr_width..total].to_vec();
        self.buf.drain(0..total);

        match rmf::address_decode(&message) {
            Outcome::Ok((addr, more), consumed) => {
                let payload = &message[consumed..];
                if addr == CMD_ADDRESS {
                    match Command::decode(payload) {
                        Outcome::Ok(cmd, _) => Ok(Some(Parsed::Command(cmd))),
                        Outcome::Short => Err(Error::Length(
                            "command message shorter than its type code".into(),
                        )),
                        Outcome::Malformed => {
                            Err(Error::Connection("malformed command message".into()))
                        }
                    }
                } else {
                    Ok(Some(Parsed::Write {
                        address: addr,
                        data: payload.to_vec(),
                        more,
                    }))
                }
            }
            Outcome::Short => Err(Error::Length("address header truncated".into())),
            Outcome::Malformed => Err(Error::Connection("malformed address header".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_info::{DigestType, FileType};

    fn frame_command(cmd: &Command) -> Vec<u8> {
        let mut payload = [0u8; 128];
        let plen = cmd.encode(&mut payload).unwrap();
        let mut addr = [0u8; 4];
        let alen = rmf::address_encode(&mut addr, CMD_ADDRESS, false);
        let mut framed = Vec::new();
        let mut nh = [0u8; 4];
        let nhlen = numheader::encode(&mut nh, (alen + plen) as u32).unwrap();
        framed.extend_from_slice(&nh[..nhlen]);
        framed.extend_from_slice(&addr[..alen]);
        framed.extend_from_slice(&payload[..plen]);
        framed
    }

    #[test]
    fn parses_one_command_message() {
        let mut rx = Receiver::with_capacity(64);
        rx.feed(&frame_command(&Command::Ack));
        assert_eq!(rx.try_parse_next().unwrap(), Some(Parsed::Command(Command::Ack)));
        assert_eq!(rx.try_parse_next().unwrap(), None);
    }

    #[test]
    fn partial_feed_yields_none_until_complete() {
        let frame = frame_command(&Command::PublishFile {
            address: 0,
            size: 2,
            file_type: FileType::Fixed,
            digest_type: DigestType::None,
            digest: [0; 32],
            name: "TestNode1.out".into(),
        });
        let mut rx = Receiver::with_capacity(64);
        rx.feed(&frame[..10]);
        assert_eq!(rx.try_parse_next().unwrap(), None);
        rx.feed(&frame[10..]);
        match rx.try_parse_next().unwrap() {
            Some(Parsed::Command(Command::PublishFile { name, .. })) => {
                assert_eq!(name, "TestNode1.out");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn yields_one_write_per_chunk_not_one_per_logical_write() {
        // Each continuation chunk starts where the previous one's payload
        // ended (0x10, then 0x10+2=0x12). Per §8's Continuation property,
        // each chunk must be surfaced -- and thus applied -- on its own;
        // only the last chunk's `more` is false.
        let mut framed = Vec::new();
        for (addr_val, chunk, more) in [(0x10u32, &[1u8, 2][..], true), (0x12, &[3u8, 4][..], false)] {
            let mut addr = [0u8; 4];
            let alen = rmf::address_encode(&mut addr, addr_val, more);
            let mut nh = [0u8; 4];
            let nhlen = numheader::encode(&mut nh, (alen + chunk.len()) as u32).unwrap();
            framed.extend_from_slice(&nh[..nhlen]);
            framed.extend_from_slice(&addr[..alen]);
            framed.extend_from_slice(chunk);
        }
        let mut rx = Receiver::with_capacity(64);
        rx.feed(&framed);
        assert_eq!(
            rx.try_parse_next().unwrap(),
            Some(Parsed::Write {
                address: 0x10,
                data: vec![1, 2],
                more: true,
            })
        );
        assert_eq!(
            rx.try_parse_next().unwrap(),
            Some(Parsed::Write {
                address: 0x12,
                data: vec![3, 4],
                more: false,
            })
        );
        assert_eq!(rx.try_parse_next().unwrap(), None);
    }

    #[test]
    fn multiple_messages_in_one_feed_drain_in_order() {
        let mut framed = frame_command(&Command::Ack);
        framed.extend_from_slice(&frame_command(&Command::Eot));
        let mut rx = Receiver::with_capacity(64);
        rx.feed(&framed);
        assert_eq!(rx.try_parse_next().unwrap(), Some(Parsed::Command(Command::Ack)));
        assert_eq!(rx.try_parse_next().unwrap(), Some(Parsed::Command(Command::Eot)));
        assert_eq!(rx.try_parse_next().unwrap(), None);
    }
}

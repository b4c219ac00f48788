//! RemoteFile codec: address headers and command messages (§4.2).

use crate::error::{Error, Result};
use crate::file_info::{DigestType, FileType, CMD_ADDRESS, DIGEST_LEN, SHORT_HEADER_ADDR_MAX};
use crate::pack;

const MORE_BIT_SHORT: u16 = 0x4000;
const ADDR_MASK_SHORT: u16 = 0x3FFF;
const HIGH_BIT_LONG: u32 = 0x8000_0000;
const MORE_BIT_LONG: u32 = 0x4000_0000;
const ADDR_MASK_LONG: u32 = 0x3FFF_FFFF;

/// Outcome of a decode attempt: mirrors §4.2's `(bytes_consumed, outcome)`
/// contract, generalized as a Rust `Result`-shaped enum so callers match
/// once instead of checking two things.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome<T> {
    /// Fully decoded `T`, having consumed this many bytes from the front
    /// of the input.
    Ok(T, usize),
    /// Not enough bytes yet; non-fatal, wait for more.
    Short,
    /// The bytes are not a valid encoding; fatal, the connection should be
    /// dropped.
    Malformed,
}

/// Encode an address header (2 or 4 bytes depending on `addr`) into `buf`.
///
/// Returns the number of bytes written, or `0` if `buf` is too small.
#[must_use]
pub fn address_encode(buf: &mut [u8], addr: u32, more_bit: bool) -> usize {
    if addr <= u32::from(SHORT_HEADER_ADDR_MAX) {
        if buf.len() < 2 {
            return 0;
        }
        let mut v = addr as u16;
        if more_bit {
            v |= MORE_BIT_SHORT;
        }
        pack::pack_u16_be(&mut buf[..2], v).expect("len checked");
        2
    } else {
        if buf.len() < 4 {
            return 0;
        }
        let mut v = (addr & ADDR_MASK_LONG) | HIGH_BIT_LONG;
        if more_bit {
            v |= MORE_BIT_LONG;
        }
        pack::pack_u32_be(&mut buf[..4], v).expect("len checked");
        4
    }
}

/// Decode an address header from the front of `buf`.
///
/// Returns `(address, more_bit, bytes_consumed)`.
pub fn address_decode(buf: &[u8]) -> Outcome<(u32, bool)> {
    let Some(&first) = buf.first() else {
        return Outcome::Short;
    };
    if first & 0x80 == 0 {
        // 2-byte form.
        if buf.len() < 2 {
            return Outcome::Short;
        }
        let v = pack::unpack_u16_be(&buf[..2]).expect("len checked");
        let addr = u32::from(v & ADDR_MASK_SHORT);
        let more = v & MORE_BIT_SHORT != 0;
        Outcome::Ok((addr, more), 2)
    } else {
        if buf.len() < 4 {
            return Outcome::Short;
        }
        let v = pack::unpack_u32_be(&buf[..4]).expect("len checked") as u32;
        let addr = v & ADDR_MASK_LONG;
        let more = v & MORE_BIT_LONG != 0;
        Outcome::Ok((addr, more), 4)
    }
}

/// Numeric command type codes, per `remotefile/include/c-apx/rmf.h`.
pub mod cmd_type {
    /// Command succeeded / acknowledged.
    pub const ACK: u32 = 0;
    /// Negative response.
    pub const NACK: u32 = 1;
    /// End of transmission (end of a list).
    pub const EOT: u32 = 2;
    /// Serialized file info ("publish file").
    pub const PUBLISH_FILE: u32 = 3;
    /// A previously published file is no longer available.
    pub const REVOKE_FILE: u32 = 4;
    /// Heartbeat request.
    pub const HEARTBEAT_RQST: u32 = 5;
    /// Heartbeat response.
    pub const HEARTBEAT_RSP: u32 = 6;
    /// Ping request.
    pub const PING_RQST: u32 = 7;
    /// Ping response.
    pub const PING_RSP: u32 = 8;
    /// Open a file.
    pub const OPEN_FILE: u32 = 10;
    /// Close a file.
    pub const CLOSE_FILE: u32 = 11;
    /// An attempted write landed outside any known file.
    pub const INVALID_WRITE: u32 = 400;
    /// An opened file has no read handler registered for it.
    pub const INVALID_READ_HANDLER: u32 = 401;
}

/// A decoded/encodable RemoteFile command message.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Acknowledge.
    Ack,
    /// Negative acknowledge.
    Nack,
    /// End of transmission.
    Eot,
    /// Announce a file.
    PublishFile {
        /// Start address of the file.
        address: u32,
        /// Size in bytes.
        size: u32,
        /// Kind of file.
        file_type: FileType,
        /// Digest algorithm used.
        digest_type: DigestType,
        /// Digest bytes (always [`DIGEST_LEN`] wide).
        digest: [u8; DIGEST_LEN],
        /// File name.
        name: String,
    },
    /// Revoke a previously published file.
    RevokeFile {
        /// Address of the file being revoked.
        address: u32,
    },
    /// Request to open a file.
    OpenFile {
        /// Address of the file to open.
        address: u32,
    },
    /// Request to close a file.
    CloseFile {
        /// Address of the file to close.
        address: u32,
    },
    /// Heartbeat/ping request or response. Reserved: decoders accept it
    /// and the connection layer treats it as a no-op.
    Reserved {
        /// Which reserved command type this was.
        cmd_type: u32,
    },
    /// A write landed outside any file's bounds.
    InvalidWrite {
        /// Offending address.
        address: u32,
    },
    /// An opened file has no read handler.
    InvalidReadHandler {
        /// Address of the file in question.
        address: u32,
    },
}

impl Command {
    /// Encode this command's payload (not including the address header)
    /// into `buf`. Returns the number of bytes written.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        match self {
            Command::Ack => encode_type_only(buf, cmd_type::ACK),
            Command::Nack => encode_type_only(buf, cmd_type::NACK),
            Command::Eot => encode_type_only(buf, cmd_type::EOT),
            Command::RevokeFile { address } => encode_type_and_address(buf, cmd_type::REVOKE_FILE, *address),
            Command::OpenFile { address } => encode_type_and_address(buf, cmd_type::OPEN_FILE, *address),
            Command::CloseFile { address } => encode_type_and_address(buf, cmd_type::CLOSE_FILE, *address),
            Command::InvalidWrite { address } => {
                encode_type_and_address(buf, cmd_type::INVALID_WRITE, *address)
            }
            Command::InvalidReadHandler { address } => {
                encode_type_and_address(buf, cmd_type::INVALID_READ_HANDLER, *address)
            }
            Command::Reserved { cmd_type } => encode_type_only(buf, *cmd_type),
            Command::PublishFile {
                address,
                size,
                file_type,
                digest_type,
                digest,
                name,
            } => {
                let name_bytes = name.as_bytes();
                let needed = 4 + 4 + 4 + 2 + 2 + DIGEST_LEN + name_bytes.len() + 1;
                if buf.len() < needed {
                    return Err(Error::BufferBoundary {
                        needed,
                        available: buf.len(),
                    });
                }
                let mut off = 0;
                pack::pack_u32_le(&mut buf[off..off + 4], cmd_type::PUBLISH_FILE)?;
                off += 4;
                pack::pack_u32_le(&mut buf[off..off + 4], *address)?;
                off += 4;
                pack::pack_u32_le(&mut buf[off..off + 4], *size)?;
                off += 4;
                pack::pack_u16_le(&mut buf[off..off + 2], file_type.wire_code())?;
                off += 2;
                pack::pack_u16_le(&mut buf[off..off + 2], digest_type.wire_code())?;
                off += 2;
                buf[off..off + DIGEST_LEN].copy_from_slice(digest);
                off += DIGEST_LEN;
                buf[off..off + name_bytes.len()].copy_from_slice(name_bytes);
                off += name_bytes.len();
                buf[off] = 0;
                off += 1;
                Ok(off)
            }
        }
    }

    /// Decode a command message from `buf`.
    pub fn decode(buf: &[u8]) -> Outcome<Command> {
        if buf.len() < 4 {
            return Outcome::Short;
        }
        let Ok(cmd) = pack::unpack_u32_le(&buf[..4]) else {
            return Outcome::Malformed;
        };
        let cmd = cmd as u32;
        match cmd {
            cmd_type::ACK => Outcome::Ok(Command::Ack, 4),
            cmd_type::NACK => Outcome::Ok(Command::Nack, 4),
            cmd_type::EOT => Outcome::Ok(Command::Eot, 4),
            cmd_type::HEARTBEAT_RQST
            | cmd_type::HEARTBEAT_RSP
            | cmd_type::PING_RQST
            | cmd_type::PING_RSP => Outcome::Ok(Command::Reserved { cmd_type: cmd }, 4),
            cmd_type::REVOKE_FILE => decode_address_arg(buf, cmd, Command::RevokeFile { address: 0 }),
            cmd_type::OPEN_FILE => decode_address_arg(buf, cmd, Command::OpenFile { address: 0 }),
            cmd_type::CLOSE_FILE => decode_address_arg(buf, cmd, Command::CloseFile { address: 0 }),
            cmd_type::INVALID_WRITE => decode_address_arg(buf, cmd, Command::InvalidWrite { address: 0 }),
            cmd_type::INVALID_READ_HANDLER => {
                decode_address_arg(buf, cmd, Command::InvalidReadHandler { address: 0 })
            }
            cmd_type::PUBLISH_FILE => decode_publish_file(buf),
            c if c >= 400 => {
                // Unknown error code: still carries a single address arg.
                decode_address_arg(buf, cmd, Command::InvalidWrite { address: 0 })
            }
            _ => Outcome::Malformed,
        }
    }

    /// Whether this command is addressed to the command sentinel (true for
    /// all commands; kept as a helper so callers don't hardcode the
    /// constant).
    #[must_use]
    pub fn address() -> u32 {
        CMD_ADDRESS
    }
}

fn encode_type_only(buf: &mut [u8], cmd: u32) -> Result<usize> {
    if buf.len() < 4 {
        return Err(Error::BufferBoundary {
            needed: 4,
            available: buf.len(),
        });
    }
    pack::pack_u32_le(&mut buf[..4], cmd)?;
    Ok(4)
}

fn encode_type_and_address(buf: &mut [u8], cmd: u32, address: u32) -> Result<usize> {
    if buf.len() < 8 {
        return Err(Error::BufferBoundary {
            needed: 8,
            available: buf.len(),
        });
    }
    pack::pack_u32_le(&mut buf[..4], cmd)?;
    pack::pack_u32_le(&mut buf[4..8], address)?;
    Ok(8)
}

fn decode_address_arg(buf: &[u8], cmd: u32, template: Command) -> Outcome<Command> {
    if buf.len() < 8 {
        return Outcome::Short;
    }
    let Ok(address) = pack::unpack_u32_le(&buf[4..8]) else {
        return Outcome::Malformed;
    };
    let address = address as u32;
    let cmd_out = match template {
        Command::RevokeFile { .. } => Command::RevokeFile { address },
        Command::OpenFile { .. } => Command::OpenFile { address },
        Command::CloseFile { .. } => Command::CloseFile { address },
        Command::InvalidReadHandler { .. } => Command::InvalidReadHandler { address },
        Command::InvalidWrite { .. } => {
            if cmd == cmd_type::INVALID_WRITE || cmd >= 400 {
                Command::InvalidWrite { address }
            } else {
                return Outcome::Malformed;
            }
        }
        _ => return Outcome::Malformed,
    };
    Outcome::Ok(cmd_out, 8)
}

fn decode_publish_file(buf: &[u8]) -> Outcome<Command> {
    const HEADER: usize = 4 + 4 + 4 + 2 + 2 + DIGEST_LEN;
    if buf.len() < HEADER {
        return Outcome::Short;
    }
    let Ok(address) = pack::unpack_u32_le(&buf[4..8]) else {
        return Outcome::Malformed;
    };
    let Ok(size) = pack::unpack_u32_le(&buf[8..12]) else {
        return Outcome::Malformed;
    };
    let Ok(file_type_raw) = pack::unpack_u16_le(&buf[12..14]) else {
        return Outcome::Malformed;
    };
    let Ok(digest_type_raw) = pack::unpack_u16_le(&buf[14..16]) else {
        return Outcome::Malformed;
    };
    let Some(file_type) = FileType::from_wire_code(file_type_raw) else {
        return Outcome::Malformed;
    };
    let Some(digest_type) = DigestType::from_wire_code(digest_type_raw) else {
        return Outcome::Malformed;
    };
    let mut digest = [0u8; DIGEST_LEN];
    digest.copy_from_slice(&buf[16..16 + DIGEST_LEN]);
    // Null-terminated name follows.
    let name_start = HEADER;
    let Some(nul) = buf[name_start..].iter().position(|&b| b == 0) else {
        return Outcome::Short;
    };
    let Ok(name) = std::str::from_utf8(&buf[name_start..name_start + nul]) else {
        return Outcome::Malformed;
    };
    if name.len() > crate::file_info::MAX_NAME_LEN {
        return Outcome::Malformed;
    }
    let consumed = name_start + nul + 1;
    Outcome::Ok(
        Command::PublishFile {
            address: address as u32,
            size: size as u32,
            file_type,
            digest_type,
            digest,
            name: name.to_string(),
        },
        consumed,
    )
}

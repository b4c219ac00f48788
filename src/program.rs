//! Byte-code program format: header, opcodes, and instruction
//! encode/decode (§3, §4.4).

use crate::error::{Error, Result};
use crate::pack;

/// Magic byte identifying an APX byte-code program.
pub const MAGIC: u8 = 0x56;
/// Major version this crate emits and understands.
pub const VERSION_MAJOR: u8 = 2;
/// Minor version this crate emits and understands.
pub const VERSION_MINOR: u8 = 0;

/// Whether a program serializes (packs) or deserializes (unpacks) values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramKind {
    /// Serializer program.
    Pack,
    /// Deserializer program.
    Unpack,
}

impl ProgramKind {
    fn wire(self) -> u8 {
        match self {
            ProgramKind::Pack => 0,
            ProgramKind::Unpack => 1,
        }
    }
    fn from_wire(v: u8) -> Option<Self> {
        Some(match v {
            0 => ProgramKind::Pack,
            1 => ProgramKind::Unpack,
            _ => return None,
        })
    }
}

/// Program header (§3): `{magic, major, minor, kind, dataSize: u32 LE}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Program kind.
    pub kind: ProgramKind,
    /// Total fixed serialized footprint of the root element, plus the
    /// size prefix for any dynamic arrays (§4.4).
    pub data_size: u32,
}

/// Size of an encoded [`Header`], in bytes.
pub const HEADER_LEN: usize = 8;

impl Header {
    /// Encode into `buf`, which must be at least [`HEADER_LEN`] bytes.
    pub fn encode(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < HEADER_LEN {
            return Err(Error::BufferBoundary {
                needed: HEADER_LEN,
                available: buf.len(),
            });
        }
        buf[0] = MAGIC;
        buf[1] = VERSION_MAJOR;
        buf[2] = VERSION_MINOR;
        buf[3] = self.kind.wire();
        pack::pack_u32_le(&mut buf[4..8], self.data_size)?;
        Ok(())
    }

    /// Decode from the front of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(Error::BufferBoundary {
                needed: HEADER_LEN,
                available: buf.len(),
            });
        }
        if buf[0] != MAGIC {
            return Err(Error::InvalidProgram(format!(
                "bad magic byte {:#x}",
                buf[0]
            )));
        }
        if buf[1] != VERSION_MAJOR {
            return Err(Error::UnsupportedVersion(format!(
                "program major version {}, want {VERSION_MAJOR}",
                buf[1]
            )));
        }
        let kind = ProgramKind::from_wire(buf[3])
            .ok_or_else(|| Error::InvalidProgram(format!("bad program kind {}", buf[3])))?;
        let data_size = pack::unpack_u32_le(&buf[4..8])? as u32;
        Ok(Header { kind, data_size })
    }
}

/// The nine instruction opcodes (§3), packed into the high 4 bits of an
/// instruction byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Serialize one primitive or array.
    Pack,
    /// Deserialize one primitive or array.
    Unpack,
    /// Array descriptor, following a `Pack`/`Unpack` whose array flag was
    /// set.
    Array,
    /// Data-flow control: record field select or array-iteration advance.
    DataCtrl,
    /// Flow control (reserved for future branch/loop instructions; always
    /// a no-op in this implementation since the grammar never emits
    /// anything but straight-line record/array structure).
    FlowCtrl,
    /// Range check against a signed 32-bit scalar.
    RangeCheckI32,
    /// Range check against an unsigned 32-bit scalar.
    RangeCheckU32,
    /// Range check against a signed 64-bit scalar.
    RangeCheckI64,
    /// Range check against an unsigned 64-bit scalar.
    RangeCheckU64,
}

impl Opcode {
    fn code(self) -> u8 {
        match self {
            Opcode::Pack => 0,
            Opcode::Unpack => 1,
            Opcode::Array => 2,
            Opcode::DataCtrl => 3,
            Opcode::FlowCtrl => 4,
            Opcode::RangeCheckI32 => 5,
            Opcode::RangeCheckU32 => 6,
            Opcode::RangeCheckI64 => 7,
            Opcode::RangeCheckU64 => 8,
        }
    }

    fn from_code(c: u8) -> Option<Self> {
        Some(match c {
            0 => Opcode::Pack,
            1 => Opcode::Unpack,
            2 => Opcode::Array,
            3 => Opcode::DataCtrl,
            4 => Opcode::FlowCtrl,
            5 => Opcode::RangeCheckI32,
            6 => Opcode::RangeCheckU32,
            7 => Opcode::RangeCheckI64,
            8 => Opcode::RangeCheckU64,
            _ => return None,
        })
    }
}

/// `DATA_CTRL` variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataCtrlVariant {
    /// Select the next record field by name (inline-operand: a
    /// null-terminated field name follows this instruction byte).
    RecordSelect,
    /// Advance a queued array iteration, rewinding the program counter to
    /// the saved position for the array's element structure.
    ArrayNext,
}

/// Width of an `ARRAY` instruction's inline element-count operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountWidth {
    /// 1-byte count (0..=255).
    U8,
    /// 2-byte count.
    U16,
    /// 4-byte count.
    U32,
}

impl CountWidth {
    /// Smallest width that can represent `n`.
    #[must_use]
    pub fn smallest_for(n: u32) -> Self {
        if n <= u32::from(u8::MAX) {
            CountWidth::U8
        } else if n <= u32::from(u16::MAX) {
            CountWidth::U16
        } else {
            CountWidth::U32
        }
    }

    fn variant(self) -> u8 {
        match self {
            CountWidth::U8 => 0,
            CountWidth::U16 => 1,
            CountWidth::U32 => 2,
        }
    }

    fn from_variant(v: u8) -> Option<Self> {
        Some(match v {
            0 => CountWidth::U8,
            1 => CountWidth::U16,
            2 => CountWidth::U32,
            _ => return None,
        })
    }

    /// Width in bytes.
    #[must_use]
    pub fn bytes(self) -> usize {
        match self {
            CountWidth::U8 => 1,
            CountWidth::U16 => 2,
            CountWidth::U32 => 4,
        }
    }
}

/// A decoded instruction, its operands resolved. Each instruction is one
/// byte (`opcode(4) | variant(3) | flag(1)`) optionally followed by
/// inline operands, per §3.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Pack/unpack one primitive (or, if `is_array`, the start of an
    /// array of them -- the following `Array` instruction carries the
    /// count).
    PackUnpack {
        /// Whether this is a `PACK` or `UNPACK` instruction.
        write: bool,
        /// Primitive width/signedness.
        kind: crate::node_signature::PrimitiveKind,
        /// Whether an `Array` instruction follows.
        is_array: bool,
    },
    /// Array descriptor following a `PackUnpack`/record with `is_array`.
    Array {
        /// Width of the inline count operand.
        count_width: CountWidth,
        /// Declared element count (max count for dynamic arrays).
        count: u32,
        /// Whether the array is dynamic (length-prefixed on the wire).
        dynamic: bool,
    },
    /// Select a record field by name.
    RecordSelect {
        /// Field name.
        name: String,
        /// Whether this is the final field in the record.
        last: bool,
    },
    /// Advance array iteration.
    ArrayNext,
    /// Reserved flow-control no-op.
    FlowCtrl,
    /// Range check against the most recently packed/unpacked i32/u32
    /// scalar (or every element, for arrays).
    RangeCheck32 {
        /// Whether the checked value is signed.
        signed: bool,
        /// Lower bound, inclusive.
        lo: i64,
        /// Upper bound, inclusive.
        hi: i64,
    },
    /// Range check against a 64-bit scalar.
    RangeCheck64 {
        /// Whether the checked value is signed.
        signed: bool,
        /// Lower bound, inclusive.
        lo: i64,
        /// Upper bound, inclusive.
        hi: i64,
    },
}

fn opcode_byte(opcode: Opcode, variant: u8, flag: bool) -> u8 {
    debug_assert!(variant <= 0b111);
    (opcode.code() << 4) | (variant << 1) | (flag as u8)
}

fn decode_opcode_byte(b: u8) -> (Opcode, u8, bool) {
    let code = b >> 4;
    let variant = (b >> 1) & 0b111;
    let flag = b & 1 != 0;
    (Opcode::from_code(code).unwrap_or(Opcode::FlowCtrl), variant, flag)
}

impl Instruction {
    /// Append this instruction's encoding (opcode byte + operands) to
    /// `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        match self {
            Instruction::PackUnpack {
                write,
                kind,
                is_array,
            } => {
                let opcode = if *write { Opcode::Pack } else { Opcode::Unpack };
                buf.push(opcode_byte(opcode, kind.variant(), *is_array));
            }
            Instruction::Array {
                count_width,
                count,
                dynamic,
            } => {
                buf.push(opcode_byte(Opcode::Array, count_width.variant(), *dynamic));
                let mut tmp = [0u8; 4];
                match count_width {
                    CountWidth::U8 => {
                        tmp[0] = *count as u8;
                        buf.push(tmp[0]);
                    }
                    CountWidth::U16 => {
                        pack::pack_u16_le(&mut tmp[..2], *count as u16)?;
                        buf.extend_from_slice(&tmp[..2]);
                    }
                    CountWidth::U32 => {
                        pack::pack_u32_le(&mut tmp[..4], *count)?;
                        buf.extend_from_slice(&tmp[..4]);
                    }
                }
            }
            Instruction::RecordSelect { name, last } => {
                buf.push(opcode_byte(
                    Opcode::DataCtrl,
                    DataCtrlVariant::RecordSelect as u8,
                    *last,
                ));
                buf.extend_from_slice(name.as_bytes());
                buf.push(0);
            }
            Instruction::ArrayNext => {
                buf.push(opcode_byte(
                    Opcode::DataCtrl,
                    DataCtrlVariant::ArrayNext as u8,
                    false,
                ));
            }
            Instruction::FlowCtrl => {
                buf.push(opcode_byte(Opcode::FlowCtrl, 0, false));
            }
            Instruction::RangeCheck32 { signed, lo, hi } => {
                let opcode = if *signed {
                    Opcode::RangeCheckI32
                } else {
                    Opcode::RangeCheckU32
                };
                buf.push(opcode_byte(opcode, 0, false));
                let mut tmp = [0u8; 4];
                pack::pack_u32_le(&mut tmp, *lo as u32)?;
                buf.extend_from_slice(&tmp);
                pack::pack_u32_le(&mut tmp, *hi as u32)?;
                buf.extend_from_slice(&tmp);
            }
            Instruction::RangeCheck64 { signed, lo, hi } => {
                let opcode = if *signed {
                    Opcode::RangeCheckI64
                } else {
                    Opcode::RangeCheckU64
                };
                buf.push(opcode_byte(opcode, 0, false));
                let mut tmp = [0u8; 8];
                pack::pack_u64_le(&mut tmp, *lo as u64)?;
                buf.extend_from_slice(&tmp);
                pack::pack_u64_le(&mut tmp, *hi as u64)?;
                buf.extend_from_slice(&tmp);
            }
        }
        Ok(())
    }

    /// Decode one instruction from the front of `buf`. Returns the
    /// instruction and the number of bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(Instruction, usize)> {
        let Some(&b) = buf.first() else {
            return Err(Error::InvalidInstruction {
                pc: 0,
                detail: "empty buffer".into(),
            });
        };
        let (opcode, variant, flag) = decode_opcode_byte(b);
        match opcode {
            Opcode::Pack | Opcode::Unpack => {
                let kind = crate::node_signature::PrimitiveKind::from_variant(variant)
                    .ok_or_else(|| Error::InvalidInstruction {
                        pc: 0,
                        detail: format!("bad primitive variant {variant}"),
                    })?;
                Ok((
                    Instruction::PackUnpack {
                        write: matches!(opcode, Opcode::Pack),
                        kind,
                        is_array: flag,
                    },
                    1,
                ))
            }
            Opcode::Array => {
                let count_width =
                    CountWidth::from_variant(variant).ok_or_else(|| Error::InvalidInstruction {
                        pc: 0,
                        detail: format!("bad count width variant {variant}"),
                    })?;
                let need = 1 + count_width.bytes();
                if buf.len() < need {
                    return Err(Error::BufferBoundary {
                        needed: need,
                        available: buf.len(),
                    });
                }
                let operand = &buf[1..need];
                let count = match count_width {
                    CountWidth::U8 => u32::from(operand[0]),
                    CountWidth::U16 => u32::from(pack::unpack_u16_le(operand)?),
                    CountWidth::U32 => pack::unpack_u32_le(operand)? as u32,
                };
                Ok((
                    Instruction::Array {
                        count_width,
                        count,
                        dynamic: flag,
                    },
                    need,
                ))
            }
            Opcode::DataCtrl => {
                if variant == DataCtrlVariant::ArrayNext as u8 {
                    Ok((Instruction::ArrayNext, 1))
                } else {
                    let name_bytes = &buf[1..];
                    let nul = name_bytes
                        .iter()
                        .position(|&c| c == 0)
                        .ok_or_else(|| Error::InvalidInstruction {
                            pc: 0,
                            detail: "unterminated record field name".into(),
                        })?;
                    let name = std::str::from_utf8(&name_bytes[..nul])
                        .map_err(|e| Error::InvalidInstruction {
                            pc: 0,
                            detail: format!("non-utf8 field name: {e}"),
                        })?
                        .to_string();
                    Ok((
                        Instruction::RecordSelect { name, last: flag },
                        1 + nul + 1,
                    ))
                }
            }
            Opcode::FlowCtrl => Ok((Instruction::FlowCtrl, 1)),
            Opcode::RangeCheckI32 | Opcode::RangeCheckU32 => {
                if buf.len() < 9 {
                    return Err(Error::BufferBoundary {
                        needed: 9,
                        available: buf.len(),
                    });
                }
                let signed = matches!(opcode, Opcode::RangeCheckI32);
                let lo = pack::unpack_u32_le(&buf[1..5])? as i64;
                let hi = pack::unpack_u32_le(&buf[5..9])? as i64;
                let (lo, hi) = if signed {
                    (lo as i32 as i64, hi as i32 as i64)
                } else {
                    (lo, hi)
                };
                Ok((Instruction::RangeCheck32 { signed, lo, hi }, 9))
            }
            Opcode::RangeCheckI64 | Opcode::RangeCheckU64 => {
                if buf.len() < 17 {
                    return Err(Error::BufferBoundary {
                        needed: 17,
                        available: buf.len(),
                    });
                }
                let signed = matches!(opcode, Opcode::RangeCheckI64);
                let lo = pack::unpack_u64_le(&buf[1..9])? as i64;
                let hi = pack::unpack_u64_le(&buf[9..17])? as i64;
                Ok((Instruction::RangeCheck64 { signed, lo, hi }, 17))
            }
        }
    }
}

/// A full compiled program: header plus instruction stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    /// Program header.
    pub header: Header,
    /// Raw instruction-stream bytes (post-header).
    pub body: Vec<u8>,
}

impl Program {
    /// Serialize the full program (header + body) into one buffer.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; HEADER_LEN];
        self.header.encode(&mut out).expect("header fits");
        out.extend_from_slice(&self.body);
        out
    }

    /// Parse a full program (header + body) from `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header = Header::decode(bytes)?;
        Ok(Program {
            header,
            body: bytes[HEADER_LEN..].to_vec(),
        })
    }
}

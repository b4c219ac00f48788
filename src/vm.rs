//! The byte-code virtual machine: executes a compiled [`Program`] to pack
//! a [`Value`] tree into wire bytes, or unpack wire bytes into a `Value`
//! tree (§4.5, §7).
//!
//! The instruction stream a [`crate::compiler`] emits is always
//! well-bracketed (`Array` / `ArrayNext` nest, `RecordSelect` runs mark
//! sibling fields terminated by their `last` flag), so this machine walks
//! it with plain recursion and an index cursor rather than a general
//! program counter with jumps.

use crate::error::{Error, Result};
use crate::node_signature::PrimitiveKind;
use crate::pack;
use crate::program::{Instruction, Program, ProgramKind};
use crate::value::{OrderedHash, Value};

/// Run a `PACK`-kind program against `root`, producing wire bytes.
pub fn serialize(program: &Program, root: &Value) -> Result<Vec<u8>> {
    if program.header.kind != ProgramKind::Pack {
        return Err(Error::InvalidProgram(
            "serialize() requires a PACK program".into(),
        ));
    }
    let instrs = decode_all(&program.body)?;
    let mut buf = Vec::new();
    let mut idx = 0;
    pack_unit(&instrs, &mut idx, root, &mut buf)?;
    Ok(buf)
}

/// Run an `UNPACK`-kind program against wire bytes, producing a `Value`
/// tree.
pub fn deserialize(program: &Program, bytes: &[u8]) -> Result<Value> {
    if program.header.kind != ProgramKind::Unpack {
        return Err(Error::InvalidProgram(
            "deserialize() requires an UNPACK program".into(),
        ));
    }
    let instrs = decode_all(&program.body)?;
    let mut idx = 0;
    let mut pos = 0;
    let value = unpack_unit(&instrs, &mut idx, bytes, &mut pos)?;
    Ok(value)
}

fn decode_all(body: &[u8]) -> Result<Vec<Instruction>> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < body.len() {
        let (instr, n) = Instruction::decode(&body[pos..])?;
        out.push(instr);
        pos += n;
    }
    Ok(out)
}

fn instr_at<'a>(instrs: &'a [Instruction], idx: usize) -> Result<&'a Instruction> {
    instrs.get(idx).ok_or_else(|| Error::InvalidInstruction {
        pc: idx,
        detail: "ran off the end of the program".into(),
    })
}

/// Advance `idx` past one field/array/scalar unit without touching data,
/// used to re-derive a repeated array body's instruction span and to
/// validate the stream is well formed even when an array has zero
/// elements.
fn skip_unit(instrs: &[Instruction], idx: &mut usize) -> Result<()> {
    match instr_at(instrs, *idx)?.clone() {
        Instruction::RecordSelect { .. } => loop {
            let Instruction::RecordSelect { last, .. } = instr_at(instrs, *idx)?.clone() else {
                return Err(Error::InvalidProgram("expected RecordSelect".into()));
            };
            *idx += 1;
            skip_unit(instrs, idx)?;
            if last {
                break;
            }
        },
        Instruction::PackUnpack { .. } => {
            *idx += 1;
            skip_range_check(instrs, idx);
        }
        Instruction::Array { .. } => {
            *idx += 1;
            skip_unit(instrs, idx)?;
            match instr_at(instrs, *idx)? {
                Instruction::ArrayNext => *idx += 1,
                other => {
                    return Err(Error::InvalidProgram(format!(
                        "expected ArrayNext to close array, got {other:?}"
                    )));
                }
            }
        }
        other => {
            return Err(Error::InvalidProgram(format!(
                "unexpected instruction {other:?} at start of unit"
            )));
        }
    }
    Ok(())
}

fn skip_range_check(instrs: &[Instruction], idx: &mut usize) {
    if let Some(Instruction::RangeCheck32 { .. } | Instruction::RangeCheck64 { .. }) =
        instrs.get(*idx)
    {
        *idx += 1;
    }
}

fn take_range_check(instrs: &[Instruction], idx: &mut usize) -> Option<(i64, i64)> {
    match instrs.get(*idx) {
        Some(Instruction::RangeCheck32 { lo, hi, .. } | Instruction::RangeCheck64 { lo, hi, .. }) => {
            *idx += 1;
            Some((*lo, *hi))
        }
        _ => None,
    }
}

fn sign_extend(raw: u64, width: u32) -> i64 {
    match width {
        1 => raw as u8 as i8 as i64,
        2 => raw as u16 as i16 as i64,
        4 => raw as u32 as i32 as i64,
        _ => raw as i64,
    }
}

fn check_range(kind: PrimitiveKind, raw: u64, lo: i64, hi: i64) -> Result<()> {
    let v = if kind.signed() {
        sign_extend(raw, kind.width())
    } else {
        raw as i64
    };
    if v < lo || v > hi {
        return Err(Error::ValueRange {
            value: v.to_string(),
            lo: lo.to_string(),
            hi: hi.to_string(),
        });
    }
    Ok(())
}

fn value_to_raw(kind: PrimitiveKind, val: &Value) -> Result<u64> {
    let compatible = matches!(
        (kind, val),
        (PrimitiveKind::U8, Value::U8(_))
            | (PrimitiveKind::U8, Value::Bool(_))
            | (PrimitiveKind::U8, Value::Char(_))
            | (PrimitiveKind::U8, Value::Byte(_))
            | (PrimitiveKind::I8, Value::I8(_))
            | (PrimitiveKind::U16, Value::U16(_))
            | (PrimitiveKind::I16, Value::I16(_))
            | (PrimitiveKind::U32, Value::U32(_))
            | (PrimitiveKind::I32, Value::I32(_))
            | (PrimitiveKind::U64, Value::U64(_))
            | (PrimitiveKind::I64, Value::I64(_))
    );
    if !compatible {
        return Err(Error::ValueType {
            expected: format!("{kind:?}"),
            got: val.type_name().into(),
        });
    }
    Ok(val.as_i64().expect("checked above") as u64)
}

fn raw_to_value(kind: PrimitiveKind, raw: u64) -> Value {
    match kind {
        PrimitiveKind::U8 => Value::U8(raw as u8),
        PrimitiveKind::I8 => Value::I8(raw as u8 as i8),
        PrimitiveKind::U16 => Value::U16(raw as u16),
        PrimitiveKind::I16 => Value::I16(raw as u16 as i16),
        PrimitiveKind::U32 => Value::U32(raw as u32),
        PrimitiveKind::I32 => Value::I32(raw as u32 as i32),
        PrimitiveKind::U64 => Value::U64(raw),
        PrimitiveKind::I64 => Value::I64(raw as i64),
    }
}

fn pack_unit(instrs: &[Instruction], idx: &mut usize, val: &Value, buf: &mut Vec<u8>) -> Result<()> {
    match instr_at(instrs, *idx)?.clone() {
        Instruction::RecordSelect { .. } => {
            let hash = match val {
                Value::Hash(h) => h,
                other => {
                    return Err(Error::ValueType {
                        expected: "hash".into(),
                        got: other.type_name().into(),
                    });
                }
            };
            loop {
                let Instruction::RecordSelect { name, last } = instr_at(instrs, *idx)?.clone()
                else {
                    return Err(Error::InvalidProgram("expected RecordSelect".into()));
                };
                *idx += 1;
                let field_val = hash
                    .get(&name)
                    .ok_or_else(|| Error::MissingBuffer(format!("field {name:?}")))?;
                pack_unit(instrs, idx, field_val, buf)?;
                if last {
                    break;
                }
            }
        }
        Instruction::PackUnpack { kind, .. } => {
            *idx += 1;
            let range = take_range_check(instrs, idx);
            let raw = value_to_raw(kind, val)?;
            if let Some((lo, hi)) = range {
                check_range(kind, raw, lo, hi)?;
            }
            let width = kind.width() as usize;
            let mut tmp = [0u8; 8];
            pack::pack_le(&mut tmp[..width], raw, width)?;
            buf.extend_from_slice(&tmp[..width]);
        }
        Instruction::Array { count, dynamic, .. } => {
            *idx += 1;
            let body_start = *idx;
            let items = match val {
                Value::Array(items) => items,
                Value::ByteArray(bytes) => {
                    return pack_byte_array(instrs, idx, body_start, bytes, count, dynamic, buf);
                }
                other => {
                    return Err(Error::ValueType {
                        expected: "array".into(),
                        got: other.type_name().into(),
                    });
                }
            };
            if dynamic {
                if items.len() as u32 > count {
                    return Err(Error::ValueRange {
                        value: items.len().to_string(),
                        lo: "0".into(),
                        hi: count.to_string(),
                    });
                }
                write_count_prefix(buf, items.len() as u32, count);
            } else if items.len() as u32 != count {
                return Err(Error::Length(format!(
                    "fixed array expects {count} elements, got {}",
                    items.len()
                )));
            }
            for item in items {
                let mut sub = body_start;
                pack_unit(instrs, &mut sub, item, buf)?;
            }
            let mut sub = body_start;
            skip_unit(instrs, &mut sub)?;
            *idx = sub;
            match instr_at(instrs, *idx)? {
                Instruction::ArrayNext => *idx += 1,
                other => {
                    return Err(Error::InvalidProgram(format!(
                        "expected ArrayNext, got {other:?}"
                    )));
                }
            }
        }
        other => {
            return Err(Error::InvalidProgram(format!(
                "unexpected instruction {other:?} while packing"
            )));
        }
    }
    Ok(())
}

fn pack_byte_array(
    instrs: &[Instruction],
    idx: &mut usize,
    body_start: usize,
    bytes: &[u8],
    count: u32,
    dynamic: bool,
    buf: &mut Vec<u8>,
) -> Result<()> {
    if dynamic {
        if bytes.len() as u32 > count {
            return Err(Error::ValueRange {
                value: bytes.len().to_string(),
                lo: "0".into(),
                hi: count.to_string(),
            });
        }
        write_count_prefix(buf, bytes.len() as u32, count);
    } else if bytes.len() as u32 != count {
        return Err(Error::Length(format!(
            "fixed byte array expects {count} bytes, got {}",
            bytes.len()
        )));
    }
    buf.extend_from_slice(bytes);
    let mut sub = body_start;
    skip_unit(instrs, &mut sub)?;
    *idx = sub;
    match instr_at(instrs, *idx)? {
        Instruction::ArrayNext => *idx += 1,
        other => {
            return Err(Error::InvalidProgram(format!(
                "expected ArrayNext, got {other:?}"
            )))
        }
    }
    Ok(())
}

fn write_count_prefix(buf: &mut Vec<u8>, len: u32, max: u32) {
    let width = crate::program::CountWidth::smallest_for(max);
    let mut tmp = [0u8; 4];
    match width {
        crate::program::CountWidth::U8 => tmp[0] = len as u8,
        crate::program::CountWidth::U16 => {
            pack::pack_u16_le(&mut tmp[..2], len as u16).expect("fits");
        }
        crate::program::CountWidth::U32 => {
            pack::pack_u32_le(&mut tmp[..4], len).expect("fits");
        }
    }
    buf.extend_from_slice(&tmp[..width.bytes()]);
}

fn read_count_prefix(bytes: &[u8], pos: &mut usize, max: u32) -> Result<u32> {
    let width = crate::program::CountWidth::smallest_for(max);
    let n = width.bytes();
    if bytes.len() < *pos + n {
        return Err(Error::BufferBoundary {
            needed: *pos + n,
            available: bytes.len(),
        });
    }
    let slice = &bytes[*pos..*pos + n];
    let len = match width {
        crate::program::CountWidth::U8 => u32::from(slice[0]),
        crate::program::CountWidth::U16 => u32::from(pack::unpack_u16_le(slice)?),
        crate::program::CountWidth::U32 => pack::unpack_u32_le(slice)? as u32,
    };
    *pos += n;
    if len > max {
        return Err(Error::Length(format!(
            "dynamic array length {len} exceeds declared max {max}"
        )));
    }
    Ok(len)
}

fn unpack_unit(
    instrs: &[Instruction],
    idx: &mut usize,
    bytes: &[u8],
    pos: &mut usize,
) -> Result<Value> {
    match instr_at(instrs, *idx)?.clone() {
        Instruction::RecordSelect { .. } => {
            let mut hash = OrderedHash::new();
            loop {
                let Instruction::RecordSelect { name, last } = instr_at(instrs, *idx)?.clone()
                else {
                    return Err(Error::InvalidProgram("expected RecordSelect".into()));
                };
                *idx += 1;
                let field_val = unpack_unit(instrs, idx, bytes, pos)?;
                hash.insert(name, field_val);
                if last {
                    break;
                }
            }
            Ok(Value::Hash(hash))
        }
        Instruction::PackUnpack { kind, .. } => {
            *idx += 1;
            let range = take_range_check(instrs, idx);
            let width = kind.width() as usize;
            if bytes.len() < *pos + width {
                return Err(Error::BufferBoundary {
                    needed: *pos + width,
                    available: bytes.len(),
                });
            }
            let raw = pack::unpack_le(&bytes[*pos..*pos + width], width)?;
            *pos += width;
            if let Some((lo, hi)) = range {
                check_range(kind, raw, lo, hi)?;
            }
            Ok(raw_to_value(kind, raw))
        }
        Instruction::Array { count, dynamic, .. } => {
            *idx += 1;
            let body_start = *idx;
            let n = if dynamic {
                read_count_prefix(bytes, pos, count)?
            } else {
                count
            };
            let mut items = Vec::with_capacity(n as usize);
            for _ in 0..n {
                let mut sub = body_start;
                items.push(unpack_unit(instrs, &mut sub, bytes, pos)?);
            }
            let mut sub = body_start;
            skip_unit(instrs, &mut sub)?;
            *idx = sub;
            match instr_at(instrs, *idx)? {
                Instruction::ArrayNext => *idx += 1,
                other => {
                    return Err(Error::InvalidProgram(format!(
                        "expected ArrayNext, got {other:?}"
                    )));
                }
            }
            Ok(Value::Array(items))
        }
        other => Err(Error::InvalidProgram(format!(
            "unexpected instruction {other:?} while unpacking"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::node_signature::{ArrayLen, DataElement, Range};

    #[test]
    fn scalar_roundtrip() {
        let elem = DataElement::scalar(PrimitiveKind::U16);
        let pack_prog = compile(&elem, ProgramKind::Pack).unwrap();
        let unpack_prog = compile(&elem, ProgramKind::Unpack).unwrap();
        let bytes = serialize(&pack_prog, &Value::U16(0x1234)).unwrap();
        assert_eq!(bytes, vec![0x34, 0x12]);
        let value = deserialize(&unpack_prog, &bytes).unwrap();
        assert_eq!(value, Value::U16(0x1234));
    }

    #[test]
    fn record_roundtrip_preserves_field_order() {
        let elem = DataElement::Record {
            fields: vec![
                ("First".into(), DataElement::scalar(PrimitiveKind::U16)),
                ("Second".into(), DataElement::scalar(PrimitiveKind::U8)),
            ],
            array: ArrayLen::None,
        };
        let pack_prog = compile(&elem, ProgramKind::Pack).unwrap();
        let unpack_prog = compile(&elem, ProgramKind::Unpack).unwrap();
        let mut h = OrderedHash::new();
        h.insert("First", Value::U16(0x1234));
        h.insert("Second", Value::U8(0x07));
        let root = Value::Hash(h);
        let bytes = serialize(&pack_prog, &root).unwrap();
        assert_eq!(bytes, vec![0x34, 0x12, 0x07]);
        let value = deserialize(&unpack_prog, &bytes).unwrap();
        match value {
            Value::Hash(h) => assert_eq!(h.keys(), vec!["First", "Second"]),
            _ => panic!("expected hash"),
        }
    }

    #[test]
    fn dynamic_array_roundtrip() {
        let elem = DataElement::scalar(PrimitiveKind::U8).with_array(ArrayLen::Dynamic(10));
        let pack_prog = compile(&elem, ProgramKind::Pack).unwrap();
        let unpack_prog = compile(&elem, ProgramKind::Unpack).unwrap();
        let root = Value::Array(vec![Value::U8(1), Value::U8(2), Value::U8(3)]);
        let bytes = serialize(&pack_prog, &root).unwrap();
        assert_eq!(bytes, vec![3, 1, 2, 3]);
        assert_eq!(deserialize(&unpack_prog, &bytes).unwrap(), root);
    }

    #[test]
    fn range_check_rejects_out_of_bounds() {
        let elem = DataElement::scalar(PrimitiveKind::U8).with_range(Range { lo: 0, hi: 7 });
        let pack_prog = compile(&elem, ProgramKind::Pack).unwrap();
        assert!(serialize(&pack_prog, &Value::U8(8)).is_err());
        assert!(serialize(&pack_prog, &Value::U8(7)).is_ok());
    }

    #[test]
    fn array_of_records_roundtrip() {
        let elem = DataElement::Record {
            fields: vec![
                ("X".into(), DataElement::scalar(PrimitiveKind::U8)),
                ("Y".into(), DataElement::scalar(PrimitiveKind::U8)),
            ],
            array: ArrayLen::Fixed(2),
        };
        let pack_prog = compile(&elem, ProgramKind::Pack).unwrap();
        let unpack_prog = compile(&elem, ProgramKind::Unpack).unwrap();
        let mut a = OrderedHash::new();
        a.insert("X", Value::U8(1));
        a.insert("Y", Value::U8(2));
        let mut b = OrderedHash::new();
        b.insert("X", Value::U8(3));
        b.insert("Y", Value::U8(4));
        let root = Value::Array(vec![Value::Hash(a), Value::Hash(b)]);
        let bytes = serialize(&pack_prog, &root).unwrap();
        assert_eq!(bytes, vec![1, 2, 3, 4]);
        assert_eq!(deserialize(&unpack_prog, &bytes).unwrap(), root);
    }

    #[test]
    fn truncated_input_is_a_buffer_boundary_error() {
        let elem = DataElement::scalar(PrimitiveKind::U32);
        let unpack_prog = compile(&elem, ProgramKind::Unpack).unwrap();
        assert!(matches!(
            deserialize(&unpack_prog, &[0, 0]),
            Err(Error::BufferBoundary { .. })
        ));
    }
}

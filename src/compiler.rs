//! Compiles a [`DataElement`] tree into a byte-code [`Program`] (§4.4).
//!
//! The instruction stream this emits is always well-bracketed: every
//! `Array` instruction is matched by exactly one `ArrayNext` that closes
//! it, and every `RecordSelect` precedes exactly the instructions for one
//! field. The VM in [`crate::vm`] relies on that structure to execute the
//! stream with a simple program counter plus a loop-count stack, rather
//! than general jumps.

use crate::error::Result;
use crate::node_signature::{ArrayLen, DataElement};
use crate::program::{CountWidth, Header, Instruction, Program, ProgramKind};

/// Compile `element` into a serializer (`PACK`) or deserializer
/// (`UNPACK`) program, selected by `kind`. Compilation is pure and
/// deterministic: the same element always yields byte-identical output
/// (§8's compiler-determinism property).
pub fn compile(element: &DataElement, kind: ProgramKind) -> Result<Program> {
    let write = matches!(kind, ProgramKind::Pack);
    let mut instructions = Vec::new();
    emit_element(element, write, &mut instructions);

    let mut body = Vec::new();
    for instr in &instructions {
        instr.encode(&mut body)?;
    }

    let header = Header {
        kind,
        data_size: wire_footprint(element),
    };
    Ok(Program { header, body })
}

fn emit_element(element: &DataElement, write: bool, out: &mut Vec<Instruction>) {
    match element.array() {
        ArrayLen::None => emit_body(element, write, out),
        ArrayLen::Fixed(n) | ArrayLen::Dynamic(n) => {
            let dynamic = element.array().is_dynamic();
            out.push(Instruction::Array {
                count_width: CountWidth::smallest_for(n),
                count: n,
                dynamic,
            });
            emit_body(element, write, out);
            out.push(Instruction::ArrayNext);
        }
    }
}

/// Emit the instructions for one repetition of `element`'s body (i.e.
/// ignoring its own array-ness, which [`emit_element`] has already
/// bracketed).
fn emit_body(element: &DataElement, write: bool, out: &mut Vec<Instruction>) {
    match element {
        DataElement::Primitive { kind, range, .. } => {
            out.push(Instruction::PackUnpack {
                write,
                kind: *kind,
                is_array: false,
            });
            if let Some(r) = range {
                out.push(range_check_instruction(*kind, r.lo, r.hi));
            }
        }
        DataElement::Record { fields, .. } => {
            let last_idx = fields.len().saturating_sub(1);
            for (i, (name, field)) in fields.iter().enumerate() {
                out.push(Instruction::RecordSelect {
                    name: name.clone(),
                    last: i == last_idx,
                });
                emit_element(field, write, out);
            }
        }
    }
}

fn range_check_instruction(
    kind: crate::node_signature::PrimitiveKind,
    lo: i64,
    hi: i64,
) -> Instruction {
    if kind.width() <= 4 {
        Instruction::RangeCheck32 {
            signed: kind.signed(),
            lo,
            hi,
        }
    } else {
        Instruction::RangeCheck64 {
            signed: kind.signed(),
            lo,
            hi,
        }
    }
}

/// The header's `dataSize` hint: the element's fixed footprint plus one
/// length-prefix width per dynamic array encountered. Nested dynamic
/// arrays inside an outer array are only counted once (per declaration,
/// not per repetition) -- this field is a buffer-preallocation hint, not
/// an exact wire-size accounting.
fn wire_footprint(element: &DataElement) -> u32 {
    let mut total = element.fixed_size();
    if let ArrayLen::Dynamic(n) = element.array() {
        total += CountWidth::smallest_for(n).bytes() as u32;
    }
    if let DataElement::Record { fields, .. } = element {
        for (_, field) in fields {
            if let ArrayLen::Dynamic(n) = field.array() {
                total += CountWidth::smallest_for(n).bytes() as u32;
            }
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_signature::PrimitiveKind;

    #[test]
    fn compiling_is_deterministic() {
        let elem = DataElement::scalar(PrimitiveKind::U16);
        let a = compile(&elem, ProgramKind::Pack).unwrap();
        let b = compile(&elem, ProgramKind::Pack).unwrap();
        assert_eq!(a.to_bytes(), b.to_bytes());
    }

    #[test]
    fn scalar_program_has_one_instruction() {
        let elem = DataElement::scalar(PrimitiveKind::U32);
        let program = compile(&elem, ProgramKind::Pack).unwrap();
        assert_eq!(program.body.len(), 1);
        assert_eq!(program.header.data_size, 4);
    }

    #[test]
    fn dynamic_array_brackets_with_array_next() {
        let elem = DataElement::scalar(PrimitiveKind::U8).with_array(ArrayLen::Dynamic(10));
        let program = compile(&elem, ProgramKind::Unpack).unwrap();
        let (first, n1) = Instruction::decode(&program.body).unwrap();
        assert!(matches!(first, Instruction::Array { dynamic: true, count: 10, .. }));
        let (_second, n2) = Instruction::decode(&program.body[n1..]).unwrap();
        let (third, _n3) = Instruction::decode(&program.body[n1 + n2..]).unwrap();
        assert_eq!(third, Instruction::ArrayNext);
        // fixed_size (10) plus a 1-byte count prefix for <=255 elements.
        assert_eq!(program.header.data_size, 11);
    }

    #[test]
    fn record_fields_carry_names_and_last_flag() {
        let elem = DataElement::Record {
            fields: vec![
                ("First".into(), DataElement::scalar(PrimitiveKind::U16)),
                ("Second".into(), DataElement::scalar(PrimitiveKind::U8)),
            ],
            array: ArrayLen::None,
        };
        let program = compile(&elem, ProgramKind::Pack).unwrap();
        let (first, n1) = Instruction::decode(&program.body).unwrap();
        match first {
            Instruction::RecordSelect { name, last } => {
                assert_eq!(name, "First");
                assert!(!last);
            }
            _ => panic!("expected RecordSelect"),
        }
        let mut offset = n1;
        let (_pack_first, n) = Instruction::decode(&program.body[offset..]).unwrap();
        offset += n;
        let (second, n2) = Instruction::decode(&program.body[offset..]).unwrap();
        offset += n2;
        match second {
            Instruction::RecordSelect { name, last } => {
                assert_eq!(name, "Second");
                assert!(last);
            }
            _ => panic!("expected RecordSelect"),
        }
        let _ = offset;
    }
}

//! Textual APX definition parsing (§4.1).
//!
//! The grammar recognized here is deliberately small: a header line, node
//! name, and provide/require port declarations built from scalar codes,
//! records, arrays, an optional init value, and an optional `(lo,hi)`
//! range. A collaborating system's definition authoring tool is out of
//! scope; this parser exists so the rest of the crate has something that
//! actually turns `.apx` text into a [`NodeSignature`] for the end-to-end
//! tests and examples.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::node_signature::{ArrayLen, DataElement, NodeSignature, Port, PrimitiveKind, Range};

/// Something that can turn APX definition text into a node signature.
/// Kept as a trait so a richer parser (or a generated one, from a
/// collaborating authoring tool) can stand in for [`TextDefinitionParser`]
/// without the rest of the crate caring.
pub trait DefinitionParser {
    /// Parse `text` into a node signature.
    fn parse(&self, text: &str) -> Result<NodeSignature>;
}

/// The minimal grammar reader:
///
/// ```text
/// APX/1.2
/// N"NodeName"
/// T"AliasName"{"Sub"C}
/// P"PortName"C:=0(0,7)
/// R"OtherPort"S[4*](0,1000)
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct TextDefinitionParser;

impl DefinitionParser for TextDefinitionParser {
    fn parse(&self, text: &str) -> Result<NodeSignature> {
        let mut name = None;
        let mut provides = Vec::new();
        let mut requires = Vec::new();
        let mut typedefs: HashMap<String, DataElement> = HashMap::new();
        let mut saw_header = false;

        for (idx, raw_line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(rest) = line.strip_prefix("APX/") {
                parse_header(rest, line_no)?;
                saw_header = true;
                continue;
            }
            if !saw_header {
                return Err(Error::Parse {
                    line: line_no,
                    detail: "expected an APX/<major>.<minor> header first".into(),
                });
            }
            let mut cur = Cursor::new(line, line_no);
            match cur.next_byte() {
                Some(b'N') => {
                    name = Some(cur.quoted_name()?);
                }
                Some(b'T') => {
                    let alias = cur.quoted_name()?;
                    let element = parse_signature(&mut cur, &typedefs)?;
                    typedefs.insert(alias, element);
                }
                Some(b'P') => {
                    provides.push(parse_port(&mut cur, &typedefs)?);
                }
                Some(b'R') => {
                    requires.push(parse_port(&mut cur, &typedefs)?);
                }
                other => {
                    return Err(Error::Parse {
                        line: line_no,
                        detail: format!("expected N/T/P/R, got {:?}", other.map(|b| b as char)),
                    });
                }
            }
        }

        let name = name.ok_or_else(|| Error::Parse {
            line: 0,
            detail: "missing N\"<name>\" declaration".into(),
        })?;

        let mut sig = NodeSignature {
            name,
            provides,
            requires,
        };
        sig.layout_provides();
        sig.layout_requires();
        Ok(sig)
    }
}

fn parse_header(rest: &str, line_no: usize) -> Result<(u32, u32)> {
    let (major, minor) = rest.split_once('.').ok_or_else(|| Error::Parse {
        line: line_no,
        detail: format!("malformed header 'APX/{rest}'"),
    })?;
    let major: u32 = major.trim().parse().map_err(|_| Error::Parse {
        line: line_no,
        detail: format!("non-numeric major version {major:?}"),
    })?;
    let minor: u32 = minor.trim().parse().map_err(|_| Error::Parse {
        line: line_no,
        detail: format!("non-numeric minor version {minor:?}"),
    })?;
    if major != 1 {
        return Err(Error::UnsupportedVersion(format!(
            "definition major version {major}, only 1.x is understood"
        )));
    }
    Ok((major, minor))
}

fn parse_port(cur: &mut Cursor<'_>, typedefs: &HashMap<String, DataElement>) -> Result<Port> {
    let name = cur.quoted_name()?;
    let mut element = parse_signature(cur, typedefs)?;
    let mut init = Vec::new();

    // Array, init, and range suffixes may appear in either order
    // (`C(0,7):=3` and `C:=0(0,7)` both occur), so keep consuming whichever
    // comes next until none apply.
    loop {
        match cur.peek() {
            Some(b'[') => {
                element = parse_array_suffix(cur, element)?;
            }
            Some(b':') if cur.peek_at(1) == Some(b'=') => {
                cur.advance(2);
                init = parse_init_value(cur, &element)?;
            }
            Some(b'(') => {
                let range = parse_range(cur)?;
                element = element.with_range(range);
            }
            _ => break,
        }
    }
    Ok(Port {
        name,
        element,
        offset: 0,
        init,
    })
}

fn parse_signature(
    cur: &mut Cursor<'_>,
    typedefs: &HashMap<String, DataElement>,
) -> Result<DataElement> {
    match cur.next_byte() {
        Some(b'C') => Ok(DataElement::scalar(PrimitiveKind::U8)),
        Some(b'c') => Ok(DataElement::scalar(PrimitiveKind::I8)),
        Some(b'S') => Ok(DataElement::scalar(PrimitiveKind::U16)),
        Some(b's') => Ok(DataElement::scalar(PrimitiveKind::I16)),
        Some(b'L') => Ok(DataElement::scalar(PrimitiveKind::U32)),
        Some(b'l') => Ok(DataElement::scalar(PrimitiveKind::I32)),
        Some(b'{') => parse_record(cur, typedefs),
        Some(b'@') => {
            let alias = cur.bare_identifier();
            typedefs.get(&alias).cloned().ok_or_else(|| Error::Parse {
                line: cur.line,
                detail: format!("unknown type alias @{alias}"),
            })
        }
        other => Err(Error::Parse {
            line: cur.line,
            detail: format!("expected a data signature, got {:?}", other.map(|b| b as char)),
        }),
    }
}

fn parse_record(
    cur: &mut Cursor<'_>,
    typedefs: &HashMap<String, DataElement>,
) -> Result<DataElement> {
    let mut fields = Vec::new();
    loop {
        if cur.peek() == Some(b'}') {
            cur.advance(1);
            break;
        }
        let field_name = cur.quoted_name()?;
        let field_elem = parse_signature(cur, typedefs)?;
        let field_elem = if cur.peek() == Some(b'[') {
            parse_array_suffix(cur, field_elem)?
        } else {
            field_elem
        };
        fields.push((field_name, field_elem));
    }
    if fields.is_empty() {
        return Err(Error::Parse {
            line: cur.line,
            detail: "empty record".into(),
        });
    }
    Ok(DataElement::Record {
        fields,
        array: ArrayLen::None,
    })
}

fn parse_array_suffix(cur: &mut Cursor<'_>, element: DataElement) -> Result<DataElement> {
    cur.expect(b'[')?;
    let digits = cur.take_while(|b| b.is_ascii_digit());
    if digits.is_empty() {
        return Err(Error::Parse {
            line: cur.line,
            detail: "array length must start with a digit".into(),
        });
    }
    let n: u32 = digits.parse().map_err(|_| Error::Parse {
        line: cur.line,
        detail: format!("array length {digits:?} doesn't fit u32"),
    })?;
    let dynamic = cur.peek() == Some(b'*');
    if dynamic {
        cur.advance(1);
    }
    cur.expect(b']')?;
    let array = if dynamic {
        ArrayLen::Dynamic(n)
    } else {
        ArrayLen::Fixed(n)
    };
    Ok(element.with_array(array))
}

fn parse_range(cur: &mut Cursor<'_>) -> Result<Range> {
    cur.expect(b'(')?;
    let lo_str = cur.take_while(|b| b.is_ascii_digit() || b == b'-');
    let lo: i64 = lo_str.parse().map_err(|_| Error::Parse {
        line: cur.line,
        detail: format!("bad range lower bound {lo_str:?}"),
    })?;
    cur.expect(b',')?;
    let hi_str = cur.take_while(|b| b.is_ascii_digit() || b == b'-');
    let hi: i64 = hi_str.parse().map_err(|_| Error::Parse {
        line: cur.line,
        detail: format!("bad range upper bound {hi_str:?}"),
    })?;
    cur.expect(b')')?;
    Ok(Range { lo, hi })
}

/// Parse a scalar init literal into little-endian packed bytes matching
/// `element`'s fixed width. Array/record inits are not supported by this
/// minimal grammar; callers get an empty init (zero-filled by the node
/// buffer allocator) for those.
fn parse_init_value(cur: &mut Cursor<'_>, element: &DataElement) -> Result<Vec<u8>> {
    let DataElement::Primitive { kind, array: ArrayLen::None, .. } = element else {
        // Skip over whatever literal is here (number or {..} aggregate);
        // the node buffer allocator zero-fills when init is empty.
        if cur.peek() == Some(b'{') {
            skip_balanced(cur, b'{', b'}');
        } else {
            cur.take_while(|b| b.is_ascii_digit() || b == b'-');
        }
        return Ok(Vec::new());
    };
    let digits = cur.take_while(|b| b.is_ascii_digit() || b == b'-');
    let value: i64 = digits.parse().map_err(|_| Error::Parse {
        line: cur.line,
        detail: format!("bad init literal {digits:?}"),
    })?;
    let mut buf = vec![0u8; kind.width() as usize];
    crate::pack::pack_le(&mut buf, value as u64, kind.width() as usize)?;
    Ok(buf)
}

fn skip_balanced(cur: &mut Cursor<'_>, open: u8, close: u8) {
    let mut depth = 0i32;
    loop {
        match cur.next_byte() {
            Some(b) if b == open => depth += 1,
            Some(b) if b == close => {
                depth -= 1;
                if depth == 0 {
                    return;
                }
            }
            Some(_) => {}
            None => return,
        }
    }
}

/// Byte-oriented cursor over one definition line.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
    line: usize,
}

impl<'a> Cursor<'a> {
    fn new(line: &'a str, line_no: usize) -> Self {
        Cursor {
            bytes: line.as_bytes(),
            pos: 0,
            line: line_no,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn advance(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.bytes.len());
    }

    fn next_byte(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.advance(1);
        Some(b)
    }

    fn expect(&mut self, want: u8) -> Result<()> {
        match self.next_byte() {
            Some(b) if b == want => Ok(()),
            other => Err(Error::Parse {
                line: self.line,
                detail: format!(
                    "expected {:?}, got {:?}",
                    want as char,
                    other.map(|b| b as char)
                ),
            }),
        }
    }

    fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> String {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if pred(b) {
                self.advance(1);
            } else {
                break;
            }
        }
        String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned()
    }

    fn bare_identifier(&mut self) -> String {
        self.take_while(|b| b.is_ascii_alphanumeric() || b == b'_')
    }

    fn quoted_name(&mut self) -> Result<String> {
        self.expect(b'"')?;
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b == b'"' {
                break;
            }
            self.advance(1);
        }
        let name = String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned();
        self.expect(b'"')?;
        if name.is_empty() {
            return Err(Error::InvalidName("empty quoted name".into()));
        }
        Ok(name)
    }
}

//! Typed data-element trees: the compiler's input, and the shape of a
//! node's provide/require port tables (§3, §4.4).

/// Scalar width/signedness a single `PACK`/`UNPACK` instruction handles.
/// This is everything the byte-code itself needs to know; semantic
/// distinctions like "this byte is actually a bool" live one level up, in
/// [`Semantic`], because the VM only ever sees width and signedness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveKind {
    /// Unsigned 8-bit.
    U8,
    /// Signed 8-bit.
    I8,
    /// Unsigned 16-bit.
    U16,
    /// Signed 16-bit.
    I16,
    /// Unsigned 32-bit.
    U32,
    /// Signed 32-bit.
    I32,
    /// Unsigned 64-bit.
    U64,
    /// Signed 64-bit.
    I64,
}

impl PrimitiveKind {
    /// Width in bytes.
    #[must_use]
    pub fn width(self) -> u32 {
        match self {
            PrimitiveKind::U8 | PrimitiveKind::I8 => 1,
            PrimitiveKind::U16 | PrimitiveKind::I16 => 2,
            PrimitiveKind::U32 | PrimitiveKind::I32 => 4,
            PrimitiveKind::U64 | PrimitiveKind::I64 => 8,
        }
    }

    /// 3-bit instruction variant code for this kind, per §3's byte-code
    /// program body ("opcode(4 bits) | variant(3 bits) | flag(1 bit)").
    #[must_use]
    pub fn variant(self) -> u8 {
        match self {
            PrimitiveKind::U8 => 0,
            PrimitiveKind::I8 => 1,
            PrimitiveKind::U16 => 2,
            PrimitiveKind::I16 => 3,
            PrimitiveKind::U32 => 4,
            PrimitiveKind::I32 => 5,
            PrimitiveKind::U64 => 6,
            PrimitiveKind::I64 => 7,
        }
    }

    /// Inverse of [`PrimitiveKind::variant`].
    #[must_use]
    pub fn from_variant(v: u8) -> Option<Self> {
        Some(match v {
            0 => PrimitiveKind::U8,
            1 => PrimitiveKind::I8,
            2 => PrimitiveKind::U16,
            3 => PrimitiveKind::I16,
            4 => PrimitiveKind::U32,
            5 => PrimitiveKind::I32,
            6 => PrimitiveKind::U64,
            7 => PrimitiveKind::I64,
            _ => return None,
        })
    }

    #[must_use]
    pub(crate) fn signed(self) -> bool {
        matches!(
            self,
            PrimitiveKind::I8 | PrimitiveKind::I16 | PrimitiveKind::I32 | PrimitiveKind::I64
        )
    }
}

/// A semantic refinement of a one-byte [`PrimitiveKind::U8`] field. The
/// byte-code only ever encodes width/signedness; a port's declared
/// `bool`/`char` meaning is layered on top by the node/port-table layer
/// that wraps the VM, and is not visible to the VM itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Semantic {
    /// No special meaning; value is the integer itself.
    Plain,
    /// Field is a boolean (0/1).
    Bool,
    /// Field is a single character.
    Char,
    /// Field is a raw, opaque byte.
    Byte,
}

/// Value range constraint (`:(lo,hi)` attribute), inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    /// Lower bound, inclusive.
    pub lo: i64,
    /// Upper bound, inclusive.
    pub hi: i64,
}

/// Array-ness of a data element leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayLen {
    /// Not an array; a single scalar/record.
    None,
    /// Fixed-length array of `n` elements.
    Fixed(u32),
    /// Dynamic array with a declared maximum of `n` elements, length
    /// prefixed on the wire.
    Dynamic(u32),
}

impl ArrayLen {
    /// True for [`ArrayLen::Dynamic`].
    #[must_use]
    pub fn is_dynamic(self) -> bool {
        matches!(self, ArrayLen::Dynamic(_))
    }

    /// Declared element count (max count, for dynamic arrays), or `None`
    /// if this isn't an array.
    #[must_use]
    pub fn count(self) -> Option<u32> {
        match self {
            ArrayLen::None => None,
            ArrayLen::Fixed(n) | ArrayLen::Dynamic(n) => Some(n),
        }
    }
}

/// One node in a data-element tree: a leaf (primitive, possibly an array
/// of primitives) or an interior record node with ordered named children.
#[derive(Debug, Clone, PartialEq)]
pub enum DataElement {
    /// A scalar or array-of-scalar leaf.
    Primitive {
        /// Byte-code width/signedness.
        kind: PrimitiveKind,
        /// Semantic refinement (bool/char/byte/plain).
        semantic: Semantic,
        /// Array-ness.
        array: ArrayLen,
        /// Optional `(lo,hi)` range constraint, checked per scalar element.
        range: Option<Range>,
    },
    /// An interior record node: an ordered sequence of named children.
    /// May itself be array-ed (array of records).
    Record {
        /// Ordered, named children.
        fields: Vec<(String, DataElement)>,
        /// Array-ness of the record as a whole.
        array: ArrayLen,
    },
}

impl DataElement {
    /// Convenience constructor for a non-array scalar with no range
    /// constraint.
    #[must_use]
    pub fn scalar(kind: PrimitiveKind) -> Self {
        DataElement::Primitive {
            kind,
            semantic: Semantic::Plain,
            array: ArrayLen::None,
            range: None,
        }
    }

    /// Builder: attach a semantic refinement.
    #[must_use]
    pub fn with_semantic(mut self, semantic: Semantic) -> Self {
        if let DataElement::Primitive { semantic: s, .. } = &mut self {
            *s = semantic;
        }
        self
    }

    /// Builder: attach a range constraint.
    #[must_use]
    pub fn with_range(mut self, range: Range) -> Self {
        if let DataElement::Primitive { range: r, .. } = &mut self {
            *r = Some(range);
        }
        self
    }

    /// Builder: make this element an array.
    #[must_use]
    pub fn with_array(mut self, array: ArrayLen) -> Self {
        match &mut self {
            DataElement::Primitive { array: a, .. } | DataElement::Record { array: a, .. } => {
                *a = array;
            }
        }
        self
    }

    /// Fixed serialized footprint in bytes, per one instance of this
    /// element (not counting any dynamic-array length prefix, which the
    /// compiler tracks separately per §4.4).
    #[must_use]
    pub fn fixed_size(&self) -> u32 {
        match self {
            DataElement::Primitive { kind, array, .. } => {
                let elem = kind.width();
                match array {
                    ArrayLen::None => elem,
                    ArrayLen::Fixed(n) | ArrayLen::Dynamic(n) => elem * n,
                }
            }
            DataElement::Record { fields, array } => {
                let one: u32 = fields.iter().map(|(_, f)| f.fixed_size()).sum();
                match array {
                    ArrayLen::None => one,
                    ArrayLen::Fixed(n) | ArrayLen::Dynamic(n) => one * n,
                }
            }
        }
    }

    /// Array-ness of this element, regardless of leaf/record kind.
    #[must_use]
    pub fn array(&self) -> ArrayLen {
        match self {
            DataElement::Primitive { array, .. } | DataElement::Record { array, .. } => *array,
        }
    }
}

/// One port (provide or require) on a node.
#[derive(Debug, Clone, PartialEq)]
pub struct Port {
    /// Port name.
    pub name: String,
    /// Data element type.
    pub element: DataElement,
    /// Byte offset into the port's area (provide-port data buffer for
    /// provide ports, require-port data buffer for require ports).
    pub offset: u32,
    /// Initial value, as raw packed bytes (already in the element's wire
    /// format), applied when the node's buffers are allocated.
    pub init: Vec<u8>,
}

/// A node's signature: its name and provide/require port tables.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSignature {
    /// Node name.
    pub name: String,
    /// Provide ports, in declaration order.
    pub provides: Vec<Port>,
    /// Require ports, in declaration order.
    pub requires: Vec<Port>,
}

impl NodeSignature {
    /// Total byte footprint of the provide-port data area.
    #[must_use]
    pub fn provide_data_size(&self) -> u32 {
        self.provides
            .iter()
            .map(|p| p.offset + p.element.fixed_size())
            .max()
            .unwrap_or(0)
    }

    /// Total byte footprint of the require-port data area.
    #[must_use]
    pub fn require_data_size(&self) -> u32 {
        self.requires
            .iter()
            .map(|p| p.offset + p.element.fixed_size())
            .max()
            .unwrap_or(0)
    }

    /// Assign sequential offsets to provide ports in declaration order,
    /// returning the total area size. Mutates `self.provides` in place.
    pub fn layout_provides(&mut self) -> u32 {
        let mut off = 0u32;
        for p in &mut self.provides {
            p.offset = off;
            off += p.element.fixed_size();
        }
        off
    }

    /// Assign sequential offsets to require ports in declaration order,
    /// returning the total area size.
    pub fn layout_requires(&mut self) -> u32 {
        let mut off = 0u32;
        for p in &mut self.requires {
            p.offset = off;
            off += p.element.fixed_size();
        }
        off
    }
}

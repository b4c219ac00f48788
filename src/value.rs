//! The value domain used by the APX virtual machine (§3): a tagged variant
//! over scalars, byte arrays, arrays of values, and ordered string-keyed
//! hashes (records).

use std::collections::BTreeMap;

/// A value the VM can pack/unpack.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Unsigned 8-bit.
    U8(u8),
    /// Unsigned 16-bit.
    U16(u16),
    /// Unsigned 32-bit.
    U32(u32),
    /// Unsigned 64-bit.
    U64(u64),
    /// Signed 8-bit.
    I8(i8),
    /// Signed 16-bit.
    I16(i16),
    /// Signed 32-bit.
    I32(i32),
    /// Signed 64-bit.
    I64(i64),
    /// Boolean, packed as one byte (0/1).
    Bool(bool),
    /// A single character, packed as one byte.
    Char(u8),
    /// A raw byte, indistinguishable on the wire from [`Value::U8`] but
    /// kept distinct so the VM's type-check messages are meaningful.
    Byte(u8),
    /// Fixed- or dynamic-length byte array.
    ByteArray(Vec<u8>),
    /// Fixed- or dynamic-length array of values (all elements share one
    /// element type, enforced by the compiler/VM, not by this enum).
    Array(Vec<Value>),
    /// Ordered map field-name -> value, used for record (struct) types.
    /// Declaration order is preserved (insertion order), matching §4.4's
    /// emission of child ports in declared order.
    Hash(OrderedHash),
}

/// A minimal insertion-ordered string-keyed map, since records need
/// declaration order preserved but `BTreeMap` would reorder by key and
/// `HashMap` wouldn't order at all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderedHash {
    entries: Vec<(String, Value)>,
}

impl OrderedHash {
    /// Create an empty ordered hash.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a key, preserving first-seen order for existing
    /// keys.
    pub fn insert(&mut self, key: impl Into<String>, val: Value) {
        let key = key.into();
        if let Some(existing) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            existing.1 = val;
        } else {
            self.entries.push((key, val));
        }
    }

    /// Look up a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Iterate entries in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in declaration order, as a convenience for tests that want to
    /// assert field ordering.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|(k, _)| k.as_str()).collect()
    }
}

/// Snapshot a `BTreeMap` into an `OrderedHash`, sorted by key. Useful for
/// tests/tools that don't care about declaration order.
impl From<BTreeMap<String, Value>> for OrderedHash {
    fn from(m: BTreeMap<String, Value>) -> Self {
        let mut h = OrderedHash::new();
        for (k, v) in m {
            h.insert(k, v);
        }
        h
    }
}

impl Value {
    /// Short type name, used in `ValueType` error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::U8(_) => "u8",
            Value::U16(_) => "u16",
            Value::U32(_) => "u32",
            Value::U64(_) => "u64",
            Value::I8(_) => "i8",
            Value::I16(_) => "i16",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::Bool(_) => "bool",
            Value::Char(_) => "char",
            Value::Byte(_) => "byte",
            Value::ByteArray(_) => "byte[]",
            Value::Array(_) => "array",
            Value::Hash(_) => "hash",
        }
    }

    /// View this value as a signed 64-bit integer, for range checks.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        Some(match *self {
            Value::U8(v) => v as i64,
            Value::U16(v) => v as i64,
            Value::U32(v) => v as i64,
            Value::U64(v) => v as i64,
            Value::I8(v) => v as i64,
            Value::I16(v) => v as i64,
            Value::I32(v) => v as i64,
            Value::I64(v) => v,
            Value::Bool(v) => v as i64,
            Value::Char(v) => v as i64,
            Value::Byte(v) => v as i64,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_hash_preserves_declaration_order() {
        let mut h = OrderedHash::new();
        h.insert("First", Value::U16(0x1234));
        h.insert("Second", Value::U8(0x07));
        assert_eq!(h.keys(), vec!["First", "Second"]);
    }
}

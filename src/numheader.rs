//! NumHeader: the 1- or 4-byte variable-length length prefix used to frame
//! packets on the wire (§4.1).
//!
//! Encoding: if the length fits in 7 bits (0..=127) it is written as a
//! single byte with the high bit clear. Otherwise it is written as 4 bytes,
//! big-endian, with the high bit of the first byte set and the remaining 31
//! bits carrying the length (so the representable range is 0..=0x7FFF_FFFF).

use crate::error::{Error, Result};

const SHORT_MAX: u32 = 0x7F;
const LONG_MAX: u32 = 0x7FFF_FFFF;
const LONG_BIT: u8 = 0x80;

/// Outcome of attempting to decode a NumHeader from a byte slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    /// Decoded a full header: the length value and the number of bytes it
    /// occupied at the front of the slice.
    Ok(u32, usize),
    /// Not enough bytes yet to tell whether this is a short or long header
    /// (first byte says long-form, but fewer than 4 bytes are available).
    Incomplete,
}

/// Encode `len` as a NumHeader into `buf`, returning the number of bytes
/// written (1 or 4).
pub fn encode(buf: &mut [u8], len: u32) -> Result<usize> {
    if len > LONG_MAX {
        return Err(Error::Length(format!(
            "NumHeader value {len} exceeds max {LONG_MAX}"
        )));
    }
    if len <= SHORT_MAX {
        if buf.is_empty() {
            return Err(Error::BufferBoundary {
                needed: 1,
                available: 0,
            });
        }
        buf[0] = len as u8;
        Ok(1)
    } else {
        if buf.len() < 4 {
            return Err(Error::BufferBoundary {
                needed: 4,
                available: buf.len(),
            });
        }
        crate::pack::pack_u32_be(&mut buf[..4], len | (u32::from(LONG_BIT) << 24))?;
        Ok(4)
    }
}

/// Decode a NumHeader from the front of `buf`.
pub fn decode(buf: &[u8]) -> Decoded {
    let Some(&first) = buf.first() else {
        return Decoded::Incomplete;
    };
    if first & LONG_BIT == 0 {
        Decoded::Ok(u32::from(first), 1)
    } else if buf.len() < 4 {
        Decoded::Incomplete
    } else {
        // unwrap: length checked above.
        let raw = crate::pack::unpack_u32_be(&buf[..4]).unwrap() as u32;
        Decoded::Ok(raw & LONG_MAX, 4)
    }
}

/// Number of bytes `encode` would use for `len`.
#[must_use]
pub fn width(len: u32) -> usize {
    if len <= SHORT_MAX { 1 } else { 4 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(len: u32) {
        let mut buf = [0u8; 4];
        let n = encode(&mut buf, len).unwrap();
        assert_eq!(n, width(len));
        match decode(&buf[..n]) {
            Decoded::Ok(got, consumed) => {
                assert_eq!(got, len);
                assert_eq!(consumed, n);
            }
            Decoded::Incomplete => panic!("expected Ok for {len}"),
        }
    }

    #[test]
    fn short_form() {
        roundtrip(0);
        roundtrip(1);
        roundtrip(127);
    }

    #[test]
    fn long_form() {
        roundtrip(128);
        roundtrip(29); // a 29-byte greeting
        roundtrip(0xFFFF);
        roundtrip(LONG_MAX);
    }

    #[test]
    fn greeting_literal() {
        // The greeting text is 29 bytes, so its NumHeader is the single byte 29.
        let mut buf = [0u8; 4];
        let n = encode(&mut buf, 29).unwrap();
        assert_eq!(&buf[..n], &[29]);
    }

    #[test]
    fn incomplete_long_form() {
        let mut buf = [0u8; 4];
        encode(&mut buf, 1000).unwrap();
        assert_eq!(decode(&buf[..1]), Decoded::Incomplete);
        assert_eq!(decode(&buf[..3]), Decoded::Incomplete);
    }

    #[test]
    fn too_large_is_rejected() {
        let mut buf = [0u8; 4];
        assert!(encode(&mut buf, LONG_MAX + 1).is_err());
    }

    #[test]
    fn property_roundtrip_sample() {
        // Exhaustive over [0, 0x7FFF_FFFF] is infeasible; sample densely
        // near every boundary plus a spread of values.
        let mut cases: Vec<u32> = vec![0, 1, 126, 127, 128, 129, 0x3FFF, 0x4000, 0x7FFF_FFFE];
        cases.push(LONG_MAX);
        for step in 0..64 {
            cases.push((step as u32) * (LONG_MAX / 64));
        }
        for len in cases {
            roundtrip(len);
        }
    }
}

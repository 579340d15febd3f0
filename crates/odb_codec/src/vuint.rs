//! Order-preserving variable-length unsigned integer codec.
//!
//! The first byte's count of leading one bits encodes the total length
//! `L` in `[1, 9]`; the remaining bits of the first byte carry the top of
//! the value, followed by `L - 1` big-endian payload bytes. Every value
//! is encoded in the minimum length that can represent it.
//!
//! Because longer encodings start with larger first bytes and equal-length
//! encodings compare big-endian, lexicographic byte order equals numeric
//! order.

use crate::error::{CodecError, CodecResult};

/// Maximum encoded length of a varint in bytes.
pub const MAX_LEN: usize = 9;

/// Returns the number of bytes needed to encode `value`.
#[must_use]
pub const fn encoded_len(value: u64) -> usize {
    match value {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        0x20_0000..=0xFFF_FFFF => 4,
        0x1000_0000..=0x7_FFFF_FFFF => 5,
        0x8_0000_0000..=0x3FF_FFFF_FFFF => 6,
        0x400_0000_0000..=0x1_FFFF_FFFF_FFFF => 7,
        0x2_0000_0000_0000..=0xFF_FFFF_FFFF_FFFF => 8,
        _ => 9,
    }
}

/// Returns the total encoded length implied by the first byte.
#[must_use]
pub const fn decoded_len(first: u8) -> usize {
    first.leading_ones() as usize + 1
}

/// Appends the encoding of `value` to `buf`.
pub fn encode_into(buf: &mut Vec<u8>, value: u64) {
    let len = encoded_len(value);
    if len == 1 {
        buf.push(value as u8);
        return;
    }
    if len == 9 {
        buf.push(0xFF);
        buf.extend_from_slice(&value.to_be_bytes());
        return;
    }
    // Leading (len - 1) one bits, then the top bits of the value.
    let prefix = (0xFFu16 << (9 - len)) as u8;
    let shift = 8 * (len - 1);
    buf.push(prefix | ((value >> shift) as u8));
    for i in (0..len - 1).rev() {
        buf.push((value >> (8 * i)) as u8);
    }
}

/// Encodes `value` into a fresh buffer.
#[must_use]
pub fn encode(value: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(encoded_len(value));
    encode_into(&mut buf, value);
    buf
}

/// Decodes a varint from the front of `bytes`.
///
/// Returns the value and the number of bytes consumed.
///
/// # Errors
///
/// Returns [`CodecError::UnexpectedEof`] if `bytes` is truncated and
/// [`CodecError::NonCanonical`] if the value was not encoded in its
/// shortest form.
pub fn decode(bytes: &[u8]) -> CodecResult<(u64, usize)> {
    let first = *bytes.first().ok_or(CodecError::UnexpectedEof)?;
    let len = decoded_len(first);
    if bytes.len() < len {
        return Err(CodecError::UnexpectedEof);
    }
    if len == 1 {
        return Ok((u64::from(first), 1));
    }
    let mut value = u64::from(first & (0xFFu32 >> len) as u8);
    for &b in &bytes[1..len] {
        value = (value << 8) | u64::from(b);
    }
    if encoded_len(value) != len {
        return Err(CodecError::non_canonical(format!(
            "value {value} encoded in {len} bytes"
        )));
    }
    Ok((value, len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Inclusive (min, max) bounds for each of the nine length classes.
    const CLASS_BOUNDS: [(u64, u64); 9] = [
        (0, 0x7F),
        (0x80, 0x3FFF),
        (0x4000, 0x1F_FFFF),
        (0x20_0000, 0xFFF_FFFF),
        (0x1000_0000, 0x7_FFFF_FFFF),
        (0x8_0000_0000, 0x3FF_FFFF_FFFF),
        (0x400_0000_0000, 0x1_FFFF_FFFF_FFFF),
        (0x2_0000_0000_0000, 0xFF_FFFF_FFFF_FFFF),
        (0x100_0000_0000_0000, u64::MAX),
    ];

    #[test]
    fn encoded_len_per_class() {
        for (i, (min, max)) in CLASS_BOUNDS.iter().enumerate() {
            assert_eq!(encoded_len(*min), i + 1, "min of class {}", i + 1);
            assert_eq!(encoded_len(*max), i + 1, "max of class {}", i + 1);
        }
    }

    #[test]
    fn single_byte_values() {
        assert_eq!(encode(0), vec![0x00]);
        assert_eq!(encode(1), vec![0x01]);
        assert_eq!(encode(0x7F), vec![0x7F]);
    }

    #[test]
    fn two_byte_values() {
        assert_eq!(encode(0x80), vec![0x80, 0x80]);
        assert_eq!(encode(300), vec![0x81, 0x2C]);
        assert_eq!(encode(0x3FFF), vec![0xBF, 0xFF]);
    }

    #[test]
    fn max_value() {
        let bytes = encode(u64::MAX);
        assert_eq!(bytes.len(), 9);
        assert_eq!(bytes[0], 0xFF);
        assert_eq!(&bytes[1..], &[0xFF; 8]);
    }

    #[test]
    fn roundtrip_class_boundaries() {
        for (min, max) in CLASS_BOUNDS {
            for value in [min, max] {
                let bytes = encode(value);
                let (decoded, consumed) = decode(&bytes).unwrap();
                assert_eq!(decoded, value);
                assert_eq!(consumed, bytes.len());
            }
        }
    }

    #[test]
    fn order_across_class_boundaries() {
        // Every class max must sort before the next class min.
        for window in CLASS_BOUNDS.windows(2) {
            let below = encode(window[0].1);
            let above = encode(window[1].0);
            assert!(below < above, "{:?} !< {:?}", below, above);
        }
    }

    #[test]
    fn decode_empty_fails() {
        assert_eq!(decode(&[]), Err(CodecError::UnexpectedEof));
    }

    #[test]
    fn decode_truncated_fails() {
        let mut bytes = encode(0x4000);
        bytes.pop();
        assert_eq!(decode(&bytes), Err(CodecError::UnexpectedEof));
    }

    #[test]
    fn decode_non_canonical_fails() {
        // 5 padded out to two bytes.
        let result = decode(&[0x80, 0x05]);
        assert!(matches!(result, Err(CodecError::NonCanonical { .. })));
    }

    #[test]
    fn decoded_len_matches_first_byte() {
        assert_eq!(decoded_len(0x00), 1);
        assert_eq!(decoded_len(0x7F), 1);
        assert_eq!(decoded_len(0x80), 2);
        assert_eq!(decoded_len(0xC0), 3);
        assert_eq!(decoded_len(0xFE), 8);
        assert_eq!(decoded_len(0xFF), 9);
    }

    fn any_class_value() -> impl Strategy<Value = u64> {
        // Uniform over classes so the short classes are not drowned out.
        (0usize..9).prop_flat_map(|i| {
            let (min, max) = CLASS_BOUNDS[i];
            min..=max
        })
    }

    proptest! {
        #[test]
        fn roundtrip(value in any_class_value()) {
            let bytes = encode(value);
            prop_assert_eq!(bytes.len(), encoded_len(value));
            let (decoded, consumed) = decode(&bytes).unwrap();
            prop_assert_eq!(decoded, value);
            prop_assert_eq!(consumed, bytes.len());
        }

        #[test]
        fn lexicographic_order_matches_numeric(
            a in any_class_value(),
            b in any_class_value(),
        ) {
            let ea = encode(a);
            let eb = encode(b);
            prop_assert_eq!(a < b, ea < eb);
            prop_assert_eq!(a == b, ea == eb);
        }
    }
}

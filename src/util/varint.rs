//! Variable-length integer encoding utilities.
//!
//! LEB128-style: 7 bits per byte, high bit set on every byte but the last.

use crate::error::{DeluneError, Result};

/// Append the varint encoding of `value` to `out`.
pub fn encode_u64_into(value: u64, out: &mut Vec<u8>) -> usize {
    let start = out.len();
    let mut val = value;

    loop {
        let mut byte = (val & 0x7F) as u8;
        val >>= 7;

        if val != 0 {
            byte |= 0x80;
        }

        out.push(byte);

        if val == 0 {
            break;
        }
    }

    out.len() - start
}

/// Encode a u64 value using variable-length encoding.
pub fn encode_u64(value: u64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(10);
    encode_u64_into(value, &mut bytes);
    bytes
}

/// Decode a u64 value, returning it with the number of bytes consumed.
pub fn decode_u64(bytes: &[u8]) -> Result<(u64, usize)> {
    let mut result = 0u64;
    let mut shift = 0;

    for (i, &byte) in bytes.iter().enumerate() {
        if shift >= 64 || (shift == 63 && byte & 0x7E != 0) {
            return Err(DeluneError::codec("varint overflows u64"));
        }

        result |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            return Ok((result, i + 1));
        }

        shift += 7;
    }

    Err(DeluneError::codec("incomplete varint"))
}

/// Number of bytes `value` occupies once encoded.
pub fn encoded_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_u64() {
        let test_values = [0, 1, 127, 128, 255, 256, 16383, 16384, u32::MAX as u64, u64::MAX];

        for &value in &test_values {
            let encoded = encode_u64(value);
            let (decoded, bytes_read) = decode_u64(&encoded).unwrap();

            assert_eq!(value, decoded);
            assert_eq!(encoded.len(), bytes_read);
            assert_eq!(encoded.len(), encoded_len(value));
        }
    }

    #[test]
    fn test_encoding_efficiency() {
        assert_eq!(encode_u64(0).len(), 1);
        assert_eq!(encode_u64(127).len(), 1);
        assert_eq!(encode_u64(128).len(), 2);
        assert_eq!(encode_u64(16384).len(), 3);
        assert_eq!(encode_u64(u64::MAX).len(), 10);
    }

    #[test]
    fn test_decode_stops_at_terminator() {
        let (value, used) = decode_u64(&[0x96, 0x01, 0xFF, 0xFF]).unwrap();
        assert_eq!(value, 150);
        assert_eq!(used, 2);
    }

    #[test]
    fn test_incomplete_varint() {
        assert!(decode_u64(&[0x80]).is_err());
        assert!(decode_u64(&[]).is_err());
    }

    #[test]
    fn test_overflow() {
        assert!(decode_u64(&[0xFF; 11]).is_err());
        let mut too_big = vec![0xFF; 9];
        too_big.push(0x02);
        assert!(decode_u64(&too_big).is_err());
    }
}

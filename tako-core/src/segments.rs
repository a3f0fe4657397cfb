//! Reassembly and integrity checking of transport-fragmented messages.
//!
//! Clients send a message as a list of segments, each a list of decimal byte
//! tokens. Concatenated, they form a hash-padded buffer:
//!
//! ```text
//! message || 0x80 || zero padding || 8-byte big-endian bit length || zero fill
//! ```
//!
//! The message length is recovered by scanning backward in 8-byte units for
//! the first non-zero unit and reading its last four bytes as a bit count.
//! The scan does not look at the delimiter or padding bytes;
//! [`recover_message_strict`] additionally enforces the full convention.

use sha2::{Digest, Sha256};

use crate::types::{FormatError, IntegrityError};

const UNIT: usize = 8;
const DELIMITER: u8 = 0x80;

/// Parse every decimal token to a byte and concatenate in order.
pub fn flatten_segments<S: AsRef<str>>(segments: &[Vec<S>]) -> Result<Vec<u8>, FormatError> {
    let mut buf = Vec::with_capacity(segments.iter().map(Vec::len).sum());
    for token in segments.iter().flatten() {
        let token = token.as_ref();
        // u8::from_str also accepts a leading '+'.
        if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
            return Err(FormatError::InvalidToken(token.to_string()));
        }
        let byte = token
            .parse::<u8>()
            .map_err(|_| FormatError::InvalidToken(token.to_string()))?;
        buf.push(byte);
    }
    Ok(buf)
}

/// Locate the length-bearing unit.
///
/// Returns `(message length, end offset of the length unit)`.
fn scan_length(buf: &[u8]) -> Result<(usize, usize), FormatError> {
    if buf.len() < UNIT {
        return Err(FormatError::BufferTooSmall(buf.len()));
    }
    let mut end = buf.len();
    while end >= UNIT {
        let unit = &buf[end - UNIT..end];
        if unit.iter().all(|&b| b == 0) {
            end -= UNIT;
            continue;
        }
        let bits = u32::from_be_bytes([unit[4], unit[5], unit[6], unit[7]]);
        let length = (bits / 8) as usize;
        if length > buf.len() {
            return Err(FormatError::InvalidLength {
                length: length as u64,
                buffer: buf.len(),
            });
        }
        return Ok((length, end));
    }
    Err(FormatError::LengthFieldNotFound)
}

/// Recover the original message from a padded buffer.
pub fn recover_message(buf: &[u8]) -> Result<&[u8], FormatError> {
    let (length, _) = scan_length(buf)?;
    Ok(&buf[..length])
}

/// Like [`recover_message`], but reject buffers whose delimiter, padding or
/// length field deviate from the padding convention.
pub fn recover_message_strict(buf: &[u8]) -> Result<&[u8], FormatError> {
    let (length, end) = scan_length(buf)?;
    let trailer_start = end - UNIT;
    let trailer = &buf[trailer_start..end];
    if trailer[..4].iter().any(|&b| b != 0) {
        return Err(FormatError::Padding("bit length exceeds 32 bits"));
    }
    let bits = u32::from_be_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]);
    if bits % 8 != 0 {
        return Err(FormatError::Padding("bit length is not a whole number of bytes"));
    }
    if length >= trailer_start {
        return Err(FormatError::Padding("no room for the delimiter before the length field"));
    }
    if buf[length] != DELIMITER {
        return Err(FormatError::Padding("missing 0x80 delimiter"));
    }
    if buf[length + 1..trailer_start].iter().any(|&b| b != 0) {
        return Err(FormatError::Padding("non-zero padding byte"));
    }
    Ok(&buf[..length])
}

/// Flatten segments and recover the message they carry.
pub fn reconstruct_message<S: AsRef<str>>(
    segments: &[Vec<S>],
    strict: bool,
) -> Result<Vec<u8>, FormatError> {
    let buf = flatten_segments(segments)?;
    let message = if strict {
        recover_message_strict(&buf)?
    } else {
        recover_message(&buf)?
    };
    Ok(message.to_vec())
}

/// Render bytes as a bit string, most significant bit first.
pub fn to_bit_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 8);
    for b in bytes {
        out.push_str(&format!("{:08b}", b));
    }
    out
}

/// SHA-256 of `data` rendered with [`to_bit_string`].
pub fn digest_bits(data: &[u8]) -> String {
    to_bit_string(&Sha256::digest(data))
}

/// Check that the digest of the first `length` bytes of `padded` equals the
/// caller-asserted bit string.
pub fn verify_integrity(padded: &[u8], length: u64, expected_bits: &str) -> Result<(), IntegrityError> {
    let end = usize::try_from(length)
        .ok()
        .filter(|&end| end <= padded.len())
        .ok_or(FormatError::InvalidLength {
            length,
            buffer: padded.len(),
        })?;
    if digest_bits(&padded[..end]) != expected_bits {
        return Err(IntegrityError::Mismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(bytes: &[u8]) -> Vec<String> {
        bytes.iter().map(|b| b.to_string()).collect()
    }

    fn padded_abc() -> Vec<u8> {
        vec![
            0x41, 0x42, 0x43, 0x80, 0x00, 0x00, 0x00, 0x00, //
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x18,
        ]
    }

    #[test]
    fn test_flatten_keeps_order_across_segments() {
        let buf = padded_abc();
        let segments = vec![tokens(&buf[..5]), tokens(&buf[5..11]), tokens(&buf[11..])];
        assert_eq!(flatten_segments(&segments).unwrap(), buf);
    }

    #[test]
    fn test_flatten_rejects_bad_tokens() {
        for bad in ["256", "-1", "a", "", "+5", " 7", "1.0"] {
            let segments = vec![vec!["1".to_string(), bad.to_string()]];
            assert_eq!(
                flatten_segments(&segments),
                Err(FormatError::InvalidToken(bad.to_string())),
                "token {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_recover_message() {
        let buf = padded_abc();
        assert_eq!(recover_message(&buf).unwrap(), b"ABC");
        assert_eq!(recover_message_strict(&buf).unwrap(), b"ABC");
    }

    #[test]
    fn test_recover_skips_trailing_zero_units() {
        let mut buf = padded_abc();
        buf.extend_from_slice(&[0u8; 24]);
        assert_eq!(recover_message(&buf).unwrap(), b"ABC");
        assert_eq!(recover_message_strict(&buf).unwrap(), b"ABC");
    }

    #[test]
    fn test_reconstruct_from_segments() {
        let buf = padded_abc();
        let segments = vec![tokens(&buf[..8]), tokens(&buf[8..])];
        assert_eq!(reconstruct_message(&segments, false).unwrap(), b"ABC");
        assert_eq!(reconstruct_message(&segments, true).unwrap(), b"ABC");
    }

    #[test]
    fn test_rejects_short_and_zero_buffers() {
        assert_eq!(recover_message(&[1, 2, 3]), Err(FormatError::BufferTooSmall(3)));
        assert_eq!(recover_message(&[0u8; 8]), Err(FormatError::LengthFieldNotFound));
        assert_eq!(recover_message(&[0u8; 64]), Err(FormatError::LengthFieldNotFound));
    }

    #[test]
    fn test_rejects_length_beyond_buffer() {
        let mut buf = padded_abc();
        buf[15] = 0xff; // 255 bits -> 31 bytes > 16
        assert!(matches!(recover_message(&buf), Err(FormatError::InvalidLength { length: 31, .. })));
    }

    #[test]
    fn test_heuristic_ignores_padding_strict_does_not() {
        let mut bad_delimiter = padded_abc();
        bad_delimiter[3] = 0x00;
        assert_eq!(recover_message(&bad_delimiter).unwrap(), b"ABC");
        assert!(matches!(recover_message_strict(&bad_delimiter), Err(FormatError::Padding(_))));

        let mut dirty_padding = padded_abc();
        dirty_padding[6] = 0x01;
        assert_eq!(recover_message(&dirty_padding).unwrap(), b"ABC");
        assert!(matches!(recover_message_strict(&dirty_padding), Err(FormatError::Padding(_))));

        let mut wide_length = padded_abc();
        wide_length[8] = 0x01;
        assert_eq!(recover_message(&wide_length).unwrap(), b"ABC");
        assert!(matches!(recover_message_strict(&wide_length), Err(FormatError::Padding(_))));

        let mut odd_bits = padded_abc();
        odd_bits[15] = 0x19;
        assert!(matches!(recover_message_strict(&odd_bits), Err(FormatError::Padding(_))));
    }

    #[test]
    fn test_bit_string() {
        assert_eq!(to_bit_string(&[0x80, 0x01, 0xa5]), "100000000000000110100101");
        assert_eq!(digest_bits(b"").len(), 256);
    }

    #[test]
    fn test_integrity_gate() {
        // SHA-256("abc")
        let expected = hex::decode("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad").unwrap();
        let expected_bits = to_bit_string(&expected);
        let mut padded = b"abc".to_vec();
        padded.extend_from_slice(&[0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x18]);

        assert_eq!(verify_integrity(&padded, 3, &expected_bits), Ok(()));

        // Fragments are concatenated before comparison.
        let fragments = [&expected_bits[..100], &expected_bits[100..]].concat();
        assert_eq!(verify_integrity(&padded, 3, &fragments), Ok(()));

        for i in [0, 1, 127, 255] {
            let mut flipped = expected_bits.clone().into_bytes();
            flipped[i] = if flipped[i] == b'0' { b'1' } else { b'0' };
            let flipped = String::from_utf8(flipped).unwrap();
            assert_eq!(verify_integrity(&padded, 3, &flipped), Err(IntegrityError::Mismatch));
        }

        assert_eq!(verify_integrity(&padded, 4, &expected_bits), Err(IntegrityError::Mismatch));
        assert!(matches!(
            verify_integrity(&padded, 64, &expected_bits),
            Err(IntegrityError::Format(FormatError::InvalidLength { .. }))
        ));
    }
}

//! Decoder for the binary `.wtns` witness file emitted by circom witness
//! generators.
//!
//! Only the fixed layout produced for 32-byte fields is supported:
//!
//! ```text
//!  0..4    magic "wtns"
//!  4..28   version, section count, section 1 header, field size
//! 28..60   prime (4 x 8-byte little-endian words)
//! 60..64   witness count N (u32, little-endian)
//! 64..76   section 2 header (skipped)
//! 76..     N x 32-byte little-endian field elements
//! ```

use num_bigint::BigUint;
use tracing::debug;

use crate::types::{FormatError, Witness};

const WTNS_MAGIC: [u8; 4] = *b"wtns";

/// Bytes before the prime in the header section.
const HEADER_SIZE: usize = 28;
/// Prime width: 8-byte words times 4.
const PRIME_SIZE: usize = 8 * 4;
const COUNT_OFFSET: usize = HEADER_SIZE + PRIME_SIZE;
/// Section 2 header between the count and the first witness slot.
const SECTION_HEADER_SIZE: usize = 12;
const DATA_OFFSET: usize = COUNT_OFFSET + 4 + SECTION_HEADER_SIZE;
/// Width of one witness slot.
pub const SLOT_SIZE: usize = 8 * 4;

/// Total wire count declared by a `.wtns` image, after validating the magic.
pub fn witness_count(buf: &[u8]) -> Result<u32, FormatError> {
    check_magic(buf)?;
    let count = buf
        .get(COUNT_OFFSET..COUNT_OFFSET + 4)
        .ok_or(FormatError::Truncated {
            needed: COUNT_OFFSET + 4,
            available: buf.len(),
        })?;
    Ok(u32::from_le_bytes([count[0], count[1], count[2], count[3]]))
}

fn check_magic(buf: &[u8]) -> Result<(), FormatError> {
    match buf.get(..4) {
        Some(m) if m == &WTNS_MAGIC[..] => Ok(()),
        found => Err(FormatError::BadMagic {
            expected: WTNS_MAGIC,
            found: found.unwrap_or(buf).to_vec(),
        }),
    }
}

/// Split a `.wtns` image into public and private values.
///
/// Slot 0 is the constant-one wire and belongs to neither side. Slots
/// `1..=num_output + num_in_public` are public, in file order; every later
/// slot is private.
pub fn decode_wtns(buf: &[u8], num_output: u32, num_in_public: u32) -> Result<Witness, FormatError> {
    let count = witness_count(buf)?;
    let num_public = num_output as u64 + num_in_public as u64;
    if (count as u64) < num_public + 1 {
        return Err(FormatError::WitnessTooSmall {
            count,
            required: num_public + 1,
        });
    }

    let needed = (count as usize)
        .checked_mul(SLOT_SIZE)
        .and_then(|n| n.checked_add(DATA_OFFSET))
        .ok_or(FormatError::Truncated {
            needed: usize::MAX,
            available: buf.len(),
        })?;
    if buf.len() < needed {
        return Err(FormatError::Truncated {
            needed,
            available: buf.len(),
        });
    }

    let mut witness = Witness {
        public: Vec::with_capacity(num_public as usize),
        private: Vec::with_capacity(count as usize - 1 - num_public as usize),
    };
    for (i, slot) in buf[DATA_OFFSET..needed].chunks_exact(SLOT_SIZE).enumerate() {
        if i == 0 {
            continue;
        }
        // Stored little-endian; read as an unsigned magnitude.
        let value = BigUint::from_bytes_le(slot);
        if (i as u64) <= num_public {
            debug!(index = i, value = %value, "public witness value");
            witness.public.push(value);
        } else {
            witness.private.push(value);
        }
    }
    Ok(witness)
}

/// Build a `.wtns` image in the layout [`decode_wtns`] reads.
///
/// Values wider than a slot are rejected.
pub fn encode_wtns(values: &[BigUint]) -> Result<Vec<u8>, FormatError> {
    let mut out = Vec::with_capacity(DATA_OFFSET + values.len() * SLOT_SIZE);
    out.extend_from_slice(&WTNS_MAGIC);
    out.extend_from_slice(&2u32.to_le_bytes()); // version
    out.extend_from_slice(&2u32.to_le_bytes()); // sections
    out.extend_from_slice(&1u32.to_le_bytes()); // section 1 type
    out.extend_from_slice(&((4 + PRIME_SIZE + 4) as u64).to_le_bytes());
    out.extend_from_slice(&(SLOT_SIZE as u32).to_le_bytes());
    out.resize(COUNT_OFFSET, 0); // prime is not interpreted here
    out.extend_from_slice(&(values.len() as u32).to_le_bytes());
    out.extend_from_slice(&2u32.to_le_bytes()); // section 2 type
    out.extend_from_slice(&((values.len() * SLOT_SIZE) as u64).to_le_bytes());
    for v in values {
        let mut slot = v.to_bytes_le();
        if slot.len() > SLOT_SIZE {
            return Err(FormatError::InvalidToken(v.to_str_radix(10)));
        }
        slot.resize(SLOT_SIZE, 0);
        out.extend_from_slice(&slot);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(n: u32) -> Vec<BigUint> {
        // Distinct values that use high bytes too, so byte order matters.
        (0..n)
            .map(|i| (BigUint::from(i + 1) << 200u32) + BigUint::from(0x0102_0304u32 + i))
            .collect()
    }

    #[test]
    fn test_layout_offsets() {
        let buf = encode_wtns(&values(3)).unwrap();
        assert_eq!(&buf[..4], b"wtns");
        assert_eq!(u32::from_le_bytes(buf[60..64].try_into().unwrap()), 3);
        assert_eq!(buf.len(), 76 + 3 * 32);
        assert_eq!(witness_count(&buf).unwrap(), 3);
    }

    #[test]
    fn test_decode_splits_public_and_private() {
        let n = 10;
        let (o, p) = (2, 3);
        let vals = values(n);
        let buf = encode_wtns(&vals).unwrap();

        let w = decode_wtns(&buf, o, p).unwrap();
        assert_eq!(w.public.len(), (o + p) as usize);
        assert_eq!(w.private.len(), (n - 1 - o - p) as usize);
        assert_eq!(w.public, vals[1..6].to_vec());
        assert_eq!(w.private, vals[6..].to_vec());
        assert!(!w.public.contains(&vals[0]) && !w.private.contains(&vals[0]));
    }

    #[test]
    fn test_slot_is_little_endian() {
        let mut buf = encode_wtns(&[BigUint::from(0u32), BigUint::from(0u32)]).unwrap();
        // Second slot: low byte 0x01, high byte 0x80.
        let slot = DATA_OFFSET + SLOT_SIZE;
        buf[slot] = 0x01;
        buf[slot + SLOT_SIZE - 1] = 0x80;
        let w = decode_wtns(&buf, 0, 1).unwrap();
        let expected = (BigUint::from(0x80u32) << 248u32) + BigUint::from(1u32);
        assert_eq!(w.public, vec![expected]);
        assert!(w.private.is_empty());
    }

    #[test]
    fn test_bad_magic() {
        let mut buf = encode_wtns(&values(2)).unwrap();
        buf[..4].copy_from_slice(b"r1cs");
        assert!(matches!(decode_wtns(&buf, 0, 0), Err(FormatError::BadMagic { .. })));
        assert!(matches!(decode_wtns(b"wt", 0, 0), Err(FormatError::BadMagic { .. })));
    }

    #[test]
    fn test_truncated() {
        let buf = encode_wtns(&values(4)).unwrap();
        assert!(matches!(
            decode_wtns(&buf[..buf.len() - 1], 0, 0),
            Err(FormatError::Truncated { .. })
        ));
        assert!(matches!(decode_wtns(&buf[..40], 0, 0), Err(FormatError::Truncated { .. })));
    }

    #[test]
    fn test_count_smaller_than_public_section() {
        let buf = encode_wtns(&values(3)).unwrap();
        assert!(matches!(
            decode_wtns(&buf, 2, 1),
            Err(FormatError::WitnessTooSmall { count: 3, required: 4 })
        ));
    }
}

//! Packed constraint terms.
//!
//! Bit layout of a [`Term`] (least significant first):
//!
//! ```text
//!  0..29   wire (variable) id
//! 29..59   coefficient table index
//! 59..62   reserved, always zero
//! 62..64   visibility
//! ```

use std::fmt;

const VARIABLE_ID_BITS: u32 = 29;
const COEFF_ID_BITS: u32 = 30;
const RESERVED_BITS: u32 = 3;
const VISIBILITY_BITS: u32 = 2;

const SHIFT_VARIABLE_ID: u32 = 0;
const SHIFT_COEFF_ID: u32 = SHIFT_VARIABLE_ID + VARIABLE_ID_BITS;
const SHIFT_VISIBILITY: u32 = SHIFT_COEFF_ID + COEFF_ID_BITS + RESERVED_BITS;

const MASK_VARIABLE_ID: u64 = (1 << VARIABLE_ID_BITS) - 1;
const MASK_COEFF_ID: u64 = (1 << COEFF_ID_BITS) - 1;
const MASK_VISIBILITY: u64 = (1 << VISIBILITY_BITS) - 1;

/// Largest wire id a term can hold.
pub const MAX_VARIABLE_ID: u32 = MASK_VARIABLE_ID as u32;
/// Largest coefficient index a term can hold.
pub const MAX_COEFF_ID: u32 = MASK_COEFF_ID as u32;

/// Who may see a wire's value.
///
/// The discriminants are ordered so that sorting by visibility descending
/// puts public (and output) wires before private ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Visibility {
    Unset = 0,
    Internal = 1,
    Secret = 2,
    Public = 3,
}

impl Visibility {
    fn from_bits(bits: u64) -> Self {
        match bits & MASK_VISIBILITY {
            1 => Visibility::Internal,
            2 => Visibility::Secret,
            3 => Visibility::Public,
            _ => Visibility::Unset,
        }
    }
}

/// One wire's contribution to a linear expression, packed into 64 bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Term(u64);

impl Term {
    /// Pack a term.
    ///
    /// # Panics
    ///
    /// Panics if `coeff_id` or `variable_id` exceed the width of their bit
    /// field. Loaders check these bounds before packing.
    pub fn new(coeff_id: u32, variable_id: u32, visibility: Visibility) -> Self {
        assert!(coeff_id <= MAX_COEFF_ID, "coefficient index {} out of range", coeff_id);
        assert!(variable_id <= MAX_VARIABLE_ID, "wire id {} out of range", variable_id);
        Term(
            ((variable_id as u64) << SHIFT_VARIABLE_ID)
                | ((coeff_id as u64) << SHIFT_COEFF_ID)
                | ((visibility as u64) << SHIFT_VISIBILITY),
        )
    }

    /// Rebuild a term from its raw packed value.
    pub fn from_raw(raw: u64) -> Self {
        Term(raw)
    }

    /// The raw packed value.
    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Unpack into `(coefficient index, wire id, visibility)`.
    #[inline]
    pub fn unpack(self) -> (u32, u32, Visibility) {
        (self.coeff_id(), self.variable_id(), self.visibility())
    }

    #[inline]
    pub fn coeff_id(self) -> u32 {
        ((self.0 >> SHIFT_COEFF_ID) & MASK_COEFF_ID) as u32
    }

    #[inline]
    pub fn variable_id(self) -> u32 {
        ((self.0 >> SHIFT_VARIABLE_ID) & MASK_VARIABLE_ID) as u32
    }

    #[inline]
    pub fn visibility(self) -> Visibility {
        Visibility::from_bits(self.0 >> SHIFT_VISIBILITY)
    }
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (coeff, id, vis) = self.unpack();
        write!(f, "Term(c{} * w{} {:?})", coeff, id, vis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack() {
        let t = Term::new(7, 42, Visibility::Public);
        assert_eq!(t.unpack(), (7, 42, Visibility::Public));

        let t = Term::new(MAX_COEFF_ID, MAX_VARIABLE_ID, Visibility::Secret);
        assert_eq!(t.unpack(), (MAX_COEFF_ID, MAX_VARIABLE_ID, Visibility::Secret));
    }

    #[test]
    fn test_fields_do_not_overlap() {
        let a = Term::new(1, 0, Visibility::Unset);
        let b = Term::new(0, 1, Visibility::Unset);
        let c = Term::new(0, 0, Visibility::Internal);
        assert_eq!(a.raw() & b.raw(), 0);
        assert_eq!(a.raw() & c.raw(), 0);
        assert_eq!(b.raw() & c.raw(), 0);
        assert_eq!(Term::from_raw(a.raw() | b.raw() | c.raw()).unpack(), (1, 1, Visibility::Internal));
    }

    #[test]
    #[should_panic]
    fn test_wire_id_overflow() {
        Term::new(0, MAX_VARIABLE_ID + 1, Visibility::Secret);
    }
}

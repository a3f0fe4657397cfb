//! Linear expressions: ordered sums of [`Term`]s.

use std::cmp::Ordering;
use std::fmt::Write as _;

use num_bigint::BigUint;

use crate::term::Term;

/// Seed of the polynomial accumulator used by [`LinearExpression::hash_code`].
const HASH_SEED: u64 = 17;
/// Multiplier of the polynomial accumulator used by [`LinearExpression::hash_code`].
const HASH_MULTIPLIER: u64 = 23;

/// One side of a rank-1 constraint.
///
/// Equality is only meaningful between two expressions that have each been
/// put in canonical order with [`LinearExpression::sort`]; see
/// [`LinearExpression::equal`].
#[derive(Debug, Clone, Default)]
pub struct LinearExpression {
    terms: Vec<Term>,
}

/// Canonical order: public before private, then wire id ascending.
fn canonical_cmp(a: &Term, b: &Term) -> Ordering {
    b.visibility()
        .cmp(&a.visibility())
        .then_with(|| a.variable_id().cmp(&b.variable_id()))
}

impl LinearExpression {
    pub fn new(terms: Vec<Term>) -> Self {
        Self { terms }
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn push(&mut self, term: Term) {
        self.terms.push(term);
    }

    /// Establish canonical order in place.
    ///
    /// Terms that share visibility and wire id keep no particular order.
    pub fn sort(&mut self) {
        self.terms.sort_unstable_by(canonical_cmp);
    }

    /// Whether the expression is already in canonical order.
    pub fn is_sorted(&self) -> bool {
        self.terms
            .windows(2)
            .all(|w| canonical_cmp(&w[0], &w[1]) != Ordering::Greater)
    }

    /// Positional equality of two sorted expressions.
    ///
    /// Both sides must already be sorted; comparing unsorted expressions gives
    /// an answer that depends on insertion order.
    pub fn equal(&self, other: &LinearExpression) -> bool {
        debug_assert!(self.is_sorted() && other.is_sorted(), "equal() on unsorted expressions");
        if self.terms.len() != other.terms.len() {
            return false;
        }
        self.terms.iter().zip(&other.terms).all(|(a, b)| a == b)
    }

    /// Fast, order-sensitive hash over the raw packed terms.
    ///
    /// Not collision resistant: use it as a cache or dedup key only, and
    /// confirm hits with [`LinearExpression::equal`].
    pub fn hash_code(&self) -> u64 {
        self.terms.iter().fold(HASH_SEED, |h, t| {
            h.wrapping_mul(HASH_MULTIPLIER).wrapping_add(t.raw())
        })
    }

    /// Render as `c*wN + ...` using the system's coefficient table.
    pub(crate) fn write_to(&self, out: &mut String, coeffs: &[BigUint]) {
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 {
                out.push_str(" + ");
            }
            let (coeff_id, wire, _) = term.unpack();
            match coeffs.get(coeff_id as usize) {
                Some(c) => {
                    let _ = write!(out, "{}*w{}", c, wire);
                }
                None => {
                    let _ = write!(out, "c{}*w{}", coeff_id, wire);
                }
            }
        }
    }
}

impl FromIterator<Term> for LinearExpression {
    fn from_iter<I: IntoIterator<Item = Term>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

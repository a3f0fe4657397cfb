//! Rank-1 constraints and constraint systems.

use std::collections::HashMap;

use num_bigint::BigUint;

use crate::expression::LinearExpression;

/// A single rank-1 constraint `L * R = O`.
#[derive(Debug, Clone)]
pub struct R1c {
    pub l: LinearExpression,
    pub r: LinearExpression,
    pub o: LinearExpression,
}

impl R1c {
    pub fn new(l: LinearExpression, r: LinearExpression, o: LinearExpression) -> Self {
        Self { l, r, o }
    }

    /// Human-readable form: `L[...] * R[...] = O[...]`.
    pub fn display(&self, coeffs: &[BigUint]) -> String {
        let mut out = String::from("L[");
        self.l.write_to(&mut out, coeffs);
        out.push_str("] * R[");
        self.r.write_to(&mut out, coeffs);
        out.push_str("] = O[");
        self.o.write_to(&mut out, coeffs);
        out.push(']');
        out
    }

    fn sort(&mut self) {
        self.l.sort();
        self.r.sort();
        self.o.sort();
    }
}

/// A named rank-1 constraint system.
///
/// Built once when a circuit template is loaded and never mutated afterwards;
/// share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct R1cs {
    pub name: String,
    /// Field modulus the coefficients live in.
    pub prime: BigUint,
    /// Deduplicated coefficient table indexed by `Term::coeff_id`.
    pub coefficients: Vec<BigUint>,
    /// Total wires, including the constant-one wire 0.
    pub num_wires: u32,
    pub num_pub_out: u32,
    pub num_pub_in: u32,
    pub num_prv_in: u32,
    pub num_labels: u64,
    pub constraints: Vec<R1c>,
}

impl R1cs {
    pub fn constraint_count(&self) -> usize {
        self.constraints.len()
    }

    /// Public outputs plus public inputs, excluding the constant wire.
    pub fn num_public(&self) -> u32 {
        self.num_pub_out.saturating_add(self.num_pub_in)
    }

    /// Put every expression of every constraint in canonical order.
    pub fn canonicalize(&mut self) {
        for c in &mut self.constraints {
            c.sort();
        }
    }

    /// Count structurally distinct expressions across all constraints.
    ///
    /// Expressions must be canonical (see [`R1cs::canonicalize`]). Buckets are
    /// keyed by `hash_code` and hits are confirmed with `equal`.
    pub fn distinct_expressions(&self) -> usize {
        let mut buckets: HashMap<u64, Vec<&LinearExpression>> = HashMap::new();
        let mut distinct = 0;
        for c in &self.constraints {
            for e in [&c.l, &c.r, &c.o] {
                let bucket = buckets.entry(e.hash_code()).or_default();
                if !bucket.iter().any(|seen| seen.equal(e)) {
                    bucket.push(e);
                    distinct += 1;
                }
            }
        }
        distinct
    }
}

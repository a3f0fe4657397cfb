//! Canonical in-memory rank-1 constraint model.
//!
//! A circuit's constraint system is read once from a circom `.r1cs` file when
//! the circuit template is loaded, then shared read-only for the lifetime of
//! the process:
//!
//! 1. **Term**: a packed `(coefficient index, wire id, visibility)` triple
//!    stored in a single `u64`.
//! 2. **LinearExpression**: an ordered sequence of terms with a canonical
//!    sort order and a fast (non-cryptographic) hash for deduplication.
//! 3. **R1c / R1cs**: single constraints `L * R = O` and whole systems.

pub mod disk;
pub mod expression;
pub mod r1cs;
pub mod term;

pub use disk::{encode_r1cs, load_r1cs, load_r1cs_file, save_r1cs_file};
pub use expression::LinearExpression;
pub use r1cs::{R1c, R1cs};
pub use term::{Term, Visibility};

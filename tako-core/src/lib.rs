//! tako-core: proof-generation front end for Groth16 circuits.
//!
//! This crate contains the engine that validates prove requests, runs the
//! per-circuit witness generator, decodes its output and hands the job to a
//! proving backend on the least-loaded device.

pub mod circuits;
pub mod claims;
pub mod config;
pub mod devices;
pub mod engine;
pub mod prover;
pub mod scheduler;
pub mod segments;
pub mod types;
pub mod wtns;

pub use engine::Engine;

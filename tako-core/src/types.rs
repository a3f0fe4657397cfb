//! Common types used throughout the tako engine.

use std::fmt;
use std::time::Duration;

/// Unique identifier for a proof job.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct JobId(pub String);

impl JobId {
    pub fn generate() -> Self {
        JobId(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wire status codes returned in every response.
pub mod status {
    pub const SUCCESS: i32 = 0;
    pub const CIRCUIT_NOT_FOUND: i32 = 100000;
    pub const NO_DEVICE: i32 = 100001;
    pub const INTEGRITY_MISMATCH: i32 = 100002;
    pub const MALFORMED_JSON: i32 = 100003;
    pub const INVALID_INPUT: i32 = 100004;
    pub const WITNESS_GENERATION: i32 = 100005;
    pub const WITNESS_DECODE: i32 = 100006;
    pub const PROOF_GENERATION: i32 = 100008;
}

/// A proof request as received from a client.
#[derive(Debug, Clone)]
pub struct ProveRequest {
    pub circuit_id: String,
    /// Raw JSON input, passed verbatim to the witness generator.
    pub input: String,
    /// Number of leading padded-buffer bytes covered by the asserted digest.
    pub length: u64,
}

/// Decoded witness: the constant wire is dropped, public wires keep file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Witness {
    pub public: Vec<num_bigint::BigUint>,
    pub private: Vec<num_bigint::BigUint>,
}

impl Witness {
    /// Public values as a JSON array of decimal strings.
    pub fn public_json(&self) -> String {
        let values: Vec<String> = self.public.iter().map(|v| v.to_str_radix(10)).collect();
        serde_json::Value::from(values).to_string()
    }
}

/// Result of a successful proof.
#[derive(Debug, Clone)]
pub struct ProveOutput {
    pub job_id: JobId,
    /// Proof as emitted by the proving engine (JSON text).
    pub proof: String,
    pub proof_bytes: Vec<u8>,
    /// Public witness as a JSON array of decimal strings.
    pub public_witness: String,
    pub device_ordinal: u32,
    pub timings: ProofTimings,
}

/// Timing breakdown for a proof.
#[derive(Debug, Clone, Default)]
pub struct ProofTimings {
    pub input_check: Duration,
    pub witness_generation: Duration,
    pub witness_decode: Duration,
    pub proving: Duration,
    pub total: Duration,
}

/// Liveness snapshot returned by `Ping`.
#[derive(Debug, Clone)]
pub struct PingInfo {
    pub version: &'static str,
    /// Seconds since the unix epoch.
    pub timestamp: i64,
    pub uptime_seconds: u64,
    pub in_flight: i64,
    pub total_completed: u64,
    pub total_failed: u64,
}

/// Malformed bytes or tokens in request data or witness files.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("invalid magic: expected {expected:?}, got {found:?}")]
    BadMagic { expected: [u8; 4], found: Vec<u8> },
    #[error("truncated data: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
    #[error("invalid byte token {0:?}")]
    InvalidToken(String),
    #[error("buffer too small: {0} bytes")]
    BufferTooSmall(usize),
    #[error("length field not found")]
    LengthFieldNotFound,
    #[error("invalid message length {length} for a {buffer} byte buffer")]
    InvalidLength { length: u64, buffer: usize },
    #[error("padding does not follow the hash padding convention: {0}")]
    Padding(&'static str),
    #[error("witness holds {count} values, fewer than the {required} the circuit requires")]
    WitnessTooSmall { count: u32, required: u64 },
}

/// Failure of the digest check over a padded buffer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntegrityError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("digest mismatch")]
    Mismatch,
}

/// Error kinds, independent of the wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    ResourceUnavailable,
    Format,
    Integrity,
    Upstream,
}

/// Terminal failure of a single prove request.
#[derive(Debug, thiserror::Error)]
pub enum ProveError {
    #[error("Circuit [{0}] not found")]
    CircuitNotFound(String),
    #[error("No available devices")]
    NoDevice,
    #[error("Error parsing JSON data: {0}")]
    MalformedJson(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("SHA256 did not match")]
    IntegrityMismatch,
    #[error("Witness generation failed: {0}")]
    WitnessGeneration(String),
    #[error("Error parsing witness: {0}")]
    WitnessDecode(String),
    #[error("Proof generation failed: {0}")]
    ProofGeneration(String),
}

impl ProveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProveError::CircuitNotFound(_) => ErrorKind::NotFound,
            ProveError::NoDevice => ErrorKind::ResourceUnavailable,
            ProveError::MalformedJson(_)
            | ProveError::InvalidInput(_)
            | ProveError::WitnessDecode(_) => ErrorKind::Format,
            ProveError::IntegrityMismatch => ErrorKind::Integrity,
            ProveError::WitnessGeneration(_) | ProveError::ProofGeneration(_) => {
                ErrorKind::Upstream
            }
        }
    }

    pub fn status_code(&self) -> i32 {
        match self {
            ProveError::CircuitNotFound(_) => status::CIRCUIT_NOT_FOUND,
            ProveError::NoDevice => status::NO_DEVICE,
            ProveError::MalformedJson(_) => status::MALFORMED_JSON,
            ProveError::InvalidInput(_) => status::INVALID_INPUT,
            ProveError::IntegrityMismatch => status::INTEGRITY_MISMATCH,
            ProveError::WitnessGeneration(_) => status::WITNESS_GENERATION,
            ProveError::WitnessDecode(_) => status::WITNESS_DECODE,
            ProveError::ProofGeneration(_) => status::PROOF_GENERATION,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigUint;

    #[test]
    fn test_status_codes_are_distinct() {
        let errors = [
            ProveError::CircuitNotFound("x".into()),
            ProveError::NoDevice,
            ProveError::MalformedJson(String::new()),
            ProveError::InvalidInput(String::new()),
            ProveError::IntegrityMismatch,
            ProveError::WitnessGeneration(String::new()),
            ProveError::WitnessDecode(String::new()),
            ProveError::ProofGeneration(String::new()),
        ];
        let mut codes: Vec<i32> = errors.iter().map(|e| e.status_code()).collect();
        assert!(!codes.contains(&status::SUCCESS));
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_kinds() {
        assert_eq!(ProveError::NoDevice.kind(), ErrorKind::ResourceUnavailable);
        assert_eq!(ProveError::IntegrityMismatch.kind(), ErrorKind::Integrity);
        assert_eq!(ProveError::WitnessDecode("x".into()).kind(), ErrorKind::Format);
        assert_eq!(ProveError::ProofGeneration("x".into()).kind(), ErrorKind::Upstream);
    }

    #[test]
    fn test_public_json() {
        let w = Witness {
            public: vec![BigUint::from(1u32), BigUint::from(u64::MAX) * 2u32],
            private: vec![BigUint::from(5u32)],
        };
        assert_eq!(w.public_json(), r#"["1","36893488147419103230"]"#);
    }
}

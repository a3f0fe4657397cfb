//! Prover module: the two external collaborators of a prove request.
//!
//! 1. **Witness generation**: the circuit's `generate_witness` executable,
//!    run as `generate_witness <input.json> <output.wtns>`.
//! 2. **Proving**: a [`ProvingBackend`]. The default [`CommandBackend`] runs
//!    an external Groth16 prover pinned to the selected device.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::circuits::CircuitData;
use crate::devices::DeviceHandle;
use crate::types::{JobId, Witness};

/// Run the circuit's witness generator.
pub async fn generate_witness(generator: &Path, input: &Path, output: &Path) -> Result<()> {
    let start = Instant::now();
    let out = tokio::process::Command::new(generator)
        .arg(input)
        .arg(output)
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("failed to spawn {}", generator.display()))?;

    if !out.status.success() {
        bail!(
            "{} exited with {}: {}",
            generator.display(),
            out.status,
            String::from_utf8_lossy(&out.stderr).trim()
        );
    }
    info!(
        generator = %generator.display(),
        elapsed_ms = start.elapsed().as_millis(),
        "witness generated"
    );
    Ok(())
}

/// Everything a proving backend needs for one proof.
#[derive(Debug, Clone)]
pub struct ProvingJob {
    pub job_id: JobId,
    pub circuit: Arc<CircuitData>,
    pub witness: Arc<Witness>,
    /// The `.wtns` file the witness was decoded from.
    pub wtns_path: PathBuf,
    pub device: DeviceHandle,
}

/// Output of a proving backend.
#[derive(Debug, Clone, Default)]
pub struct ProofArtifact {
    /// Proof as JSON text.
    pub proof: String,
    pub proof_bytes: Vec<u8>,
}

/// The proving engine seam.
///
/// Called on a blocking thread; implementations may block for as long as
/// proving takes.
pub trait ProvingBackend: Send + Sync {
    fn prove(&self, job: &ProvingJob) -> Result<ProofArtifact>;
}

/// Runs an external prover executable:
/// `<command> <pk> <wtns> <proof.json> <public.json>`, with
/// `CUDA_VISIBLE_DEVICES` set to the selected device.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    command: PathBuf,
}

impl CommandBackend {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl ProvingBackend for CommandBackend {
    fn prove(&self, job: &ProvingJob) -> Result<ProofArtifact> {
        let proof_path = job.wtns_path.with_extension("proof.json");
        let public_path = job.wtns_path.with_extension("public.json");

        let out = Command::new(&self.command)
            .arg(&job.circuit.pk_path)
            .arg(&job.wtns_path)
            .arg(&proof_path)
            .arg(&public_path)
            .env("CUDA_VISIBLE_DEVICES", job.device.ordinal.to_string())
            .output()
            .with_context(|| format!("failed to spawn prover {}", self.command.display()))?;

        let result = if out.status.success() {
            std::fs::read(&proof_path)
                .with_context(|| format!("prover produced no proof at {}", proof_path.display()))
                .and_then(|bytes| {
                    let proof = String::from_utf8(bytes.clone()).context("proof is not UTF-8")?;
                    Ok(ProofArtifact {
                        proof,
                        proof_bytes: bytes,
                    })
                })
        } else {
            Err(anyhow::anyhow!(
                "prover exited with {}: {}",
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            ))
        };

        let _ = std::fs::remove_file(&proof_path);
        let _ = std::fs::remove_file(&public_path);
        result
    }
}

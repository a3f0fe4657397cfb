//! Engine: the central coordinator of the tako prover.
//!
//! Owns the circuit registry, the device scheduler and the proving backend,
//! and runs the per-request pipeline:
//!
//! lookup → reserve device → check input integrity → generate witness →
//! decode witness → prove.
//!
//! Every failure is returned as a [`ProveError`]; the device reservation is
//! held by a [`ScheduleToken`](crate::scheduler::ScheduleToken) owned by the
//! request's task and released on every path, including after the caller
//! has gone away.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::circuits::{CircuitData, CircuitRegistry};
use crate::claims::check_claims;
use crate::config::Config;
use crate::devices::{self, DeviceHandle};
use crate::prover::{self, CommandBackend, ProvingBackend, ProvingJob};
use crate::scheduler::Scheduler;
use crate::segments;
use crate::types::*;
use crate::wtns;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The integrity-bearing part of a request's JSON input. Other fields are
/// circuit inputs and only matter to the witness generator.
#[derive(Debug)]
struct SegmentInput {
    jwt_segments: Vec<Vec<String>>,
    jwt_sha256: Vec<String>,
}

impl SegmentInput {
    /// The input must be a JSON object; the two fields must have the
    /// expected shapes.
    fn parse(input: &str) -> Result<Self, ProveError> {
        let value: Value =
            serde_json::from_str(input).map_err(|e| ProveError::MalformedJson(e.to_string()))?;
        let Value::Object(fields) = value else {
            return Err(ProveError::MalformedJson("input is not a JSON object".into()));
        };
        Ok(Self {
            jwt_segments: field(&fields, "jwt_segments")?,
            jwt_sha256: field(&fields, "jwt_sha256")?,
        })
    }
}

fn field<T: DeserializeOwned>(fields: &Map<String, Value>, name: &str) -> Result<T, ProveError> {
    let value = fields
        .get(name)
        .ok_or_else(|| ProveError::InvalidInput(format!("missing {}", name)))?;
    T::deserialize(value)
        .map_err(|e| ProveError::InvalidInput(format!("invalid data format for {}: {}", name, e)))
}

/// Per-request files, removed on drop unless kept for debugging.
struct Artifacts {
    paths: Vec<PathBuf>,
    keep: bool,
}

impl Drop for Artifacts {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        for p in &self.paths {
            let _ = std::fs::remove_file(p);
        }
    }
}

/// State shared between the engine handle and its request tasks.
struct Shared {
    config: Config,
    circuits: CircuitRegistry,
    scheduler: Arc<Scheduler>,
    backend: Arc<dyn ProvingBackend>,
    total_completed: AtomicU64,
    total_failed: AtomicU64,
}

/// The tako proving engine.
pub struct Engine {
    shared: Arc<Shared>,
    started_at: Instant,
}

impl Engine {
    /// Create an engine over already-loaded circuits and devices.
    pub fn new(
        config: Config,
        circuits: CircuitRegistry,
        devices: Vec<DeviceHandle>,
        backend: Arc<dyn ProvingBackend>,
    ) -> Self {
        let scheduler = Scheduler::new(devices, config.scheduler.max_tasks_per_device);
        Self {
            shared: Arc::new(Shared {
                config,
                circuits,
                scheduler: Arc::new(scheduler),
                backend,
                total_completed: AtomicU64::new(0),
                total_failed: AtomicU64::new(0),
            }),
            started_at: Instant::now(),
        }
    }

    /// Load circuits, probe devices and wire up the command backend.
    pub fn start(config: Config) -> Result<Self> {
        info!(version = VERSION, "starting tako engine");
        let circuits = CircuitRegistry::load_all(&config.circuits.template_dir)?;
        if circuits.is_empty() {
            warn!(
                template_dir = %config.circuits.template_dir.display(),
                "no circuits loaded"
            );
        }
        let devices = devices::probe_devices(&config.gpus);
        let backend = Arc::new(CommandBackend::new(config.prover.command.clone()));
        let engine = Self::new(config, circuits, devices, backend);
        info!(
            circuits = ?engine.shared.circuits.ids(),
            devices = engine.shared.scheduler.device_count(),
            max_tasks_per_device = engine.shared.config.scheduler.max_tasks_per_device,
            "tako engine started"
        );
        Ok(engine)
    }

    pub fn circuits(&self) -> &CircuitRegistry {
        &self.shared.circuits
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.shared.scheduler
    }

    /// Number of prove requests currently holding a device reservation.
    pub fn in_flight_count(&self) -> i64 {
        self.shared.scheduler.in_flight_count()
    }

    pub fn ping(&self) -> PingInfo {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();
        PingInfo {
            version: VERSION,
            timestamp,
            uptime_seconds: self.started_at.elapsed().as_secs(),
            in_flight: self.in_flight_count(),
            total_completed: self.shared.total_completed.load(Ordering::Relaxed),
            total_failed: self.shared.total_failed.load(Ordering::Relaxed),
        }
    }

    /// Run one prove request to completion.
    ///
    /// The request runs on its own task, which owns the device reservation
    /// and the per-request files. If the caller stops waiting, the task still
    /// runs to the end and releases them there.
    pub async fn prove(&self, request: ProveRequest) -> Result<ProveOutput, ProveError> {
        let shared = Arc::clone(&self.shared);
        let circuit_id = request.circuit_id.clone();
        let worker = tokio::spawn(async move { shared.prove(request).await });
        match worker.await {
            Ok(result) => result,
            Err(e) => {
                self.shared.total_failed.fetch_add(1, Ordering::Relaxed);
                error!(circuit_id = %circuit_id, error = %e, "prove task panicked");
                Err(ProveError::ProofGeneration(format!("task panicked: {}", e)))
            }
        }
    }
}

impl Shared {
    async fn prove(&self, request: ProveRequest) -> Result<ProveOutput, ProveError> {
        let circuit_id = request.circuit_id.clone();
        let result = self.run(request).await;
        match &result {
            Ok(out) => {
                self.total_completed.fetch_add(1, Ordering::Relaxed);
                info!(
                    circuit_id = %circuit_id,
                    job_id = %out.job_id,
                    device = out.device_ordinal,
                    total_ms = out.timings.total.as_millis(),
                    "proof completed"
                );
            }
            Err(e) => {
                self.total_failed.fetch_add(1, Ordering::Relaxed);
                warn!(circuit_id = %circuit_id, code = e.status_code(), error = %e, "prove failed");
            }
        }
        result
    }

    async fn run(&self, request: ProveRequest) -> Result<ProveOutput, ProveError> {
        let total_start = Instant::now();
        let mut timings = ProofTimings::default();

        let circuit = self
            .circuits
            .get(&request.circuit_id)
            .ok_or_else(|| ProveError::CircuitNotFound(request.circuit_id.clone()))?;

        let token = self.scheduler.schedule().await?;
        let device = token.device().clone();

        if request.input.len() <= 1 {
            return Err(ProveError::InvalidInput("empty input".into()));
        }

        let check_start = Instant::now();
        self.check_input(&circuit, &request)?;
        timings.input_check = check_start.elapsed();
        info!(elapsed_ms = timings.input_check.as_millis(), "input integrity verified");

        let job_id = JobId::generate();
        let input_path = circuit.input_path(&job_id.0);
        let wtns_path = circuit.wtns_path(&job_id.0);
        let _artifacts = Artifacts {
            paths: vec![input_path.clone(), wtns_path.clone()],
            keep: self.config.circuits.keep_artifacts,
        };

        let gen_start = Instant::now();
        tokio::fs::write(&input_path, request.input.as_bytes())
            .await
            .map_err(|e| ProveError::WitnessGeneration(format!("could not save input: {}", e)))?;
        prover::generate_witness(&circuit.witness_generator(), &input_path, &wtns_path)
            .await
            .map_err(|e| ProveError::WitnessGeneration(format!("{:#}", e)))?;
        timings.witness_generation = gen_start.elapsed();

        let decode_start = Instant::now();
        let witness = self.decode_witness(&circuit, &wtns_path).await?;
        timings.witness_decode = decode_start.elapsed();
        info!(
            job_id = %job_id,
            public = witness.public.len(),
            private = witness.private.len(),
            elapsed_ms = timings.witness_decode.as_millis(),
            "witness decoded"
        );

        let public_witness = witness.public_json();
        let job = ProvingJob {
            job_id: job_id.clone(),
            circuit: Arc::clone(&circuit),
            witness: Arc::new(witness),
            wtns_path: wtns_path.clone(),
            device: device.clone(),
        };
        let backend = Arc::clone(&self.backend);
        let prove_start = Instant::now();
        let artifact = tokio::task::spawn_blocking(move || backend.prove(&job))
            .await
            .map_err(|e| {
                error!(job_id = %job_id, error = %e, "proving task panicked");
                ProveError::ProofGeneration(format!("task panicked: {}", e))
            })?
            .map_err(|e| ProveError::ProofGeneration(format!("{:#}", e)))?;
        timings.proving = prove_start.elapsed();
        timings.total = total_start.elapsed();

        drop(token);
        Ok(ProveOutput {
            job_id,
            proof: artifact.proof,
            proof_bytes: artifact.proof_bytes,
            public_witness,
            device_ordinal: device.ordinal,
            timings,
        })
    }

    /// Parse the segment fields, apply claim policy and verify the digest.
    fn check_input(&self, circuit: &CircuitData, request: &ProveRequest) -> Result<(), ProveError> {
        let input = SegmentInput::parse(&request.input)?;

        if let Some(policy) = self.config.input.claims_for(&circuit.id) {
            let token = segments::reconstruct_message(&input.jwt_segments, self.config.input.strict_padding)
                .map_err(|e| ProveError::InvalidInput(e.to_string()))?;
            check_claims(&token, policy)?;
        }

        let padded = segments::flatten_segments(&input.jwt_segments)
            .map_err(|e| ProveError::InvalidInput(e.to_string()))?;
        if self.config.input.strict_padding {
            segments::recover_message_strict(&padded)
                .map_err(|e| ProveError::InvalidInput(e.to_string()))?;
        }
        let expected = input.jwt_sha256.concat();
        segments::verify_integrity(&padded, request.length, &expected).map_err(|e| match e {
            IntegrityError::Mismatch => ProveError::IntegrityMismatch,
            IntegrityError::Format(f) => ProveError::InvalidInput(f.to_string()),
        })
    }

    async fn decode_witness(&self, circuit: &CircuitData, path: &std::path::Path) -> Result<Witness, ProveError> {
        let buf = tokio::fs::read(path)
            .await
            .map_err(|e| ProveError::WitnessDecode(format!("could not read {}: {}", path.display(), e)))?;
        let witness = wtns::decode_wtns(&buf, circuit.num_output, circuit.num_in_public)
            .map_err(|e| ProveError::WitnessDecode(e.to_string()))?;

        let total = 1 + witness.public.len() + witness.private.len();
        if total != circuit.r1cs.num_wires as usize {
            return Err(ProveError::WitnessDecode(format!(
                "witness has {} values, circuit has {} wires",
                total, circuit.r1cs.num_wires
            )));
        }
        debug!(public = %witness.public_json(), "public witness");
        Ok(witness)
    }
}

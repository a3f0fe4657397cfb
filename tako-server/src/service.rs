//! tonic gRPC service implementation for the tako Engine.
//!
//! Domain failures never become a gRPC `Status`: they are folded into the
//! `code` / `msg` fields of the response so clients see one error channel.

use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::{info, warn};

use tako_core::engine::Engine;
use tako_core::types::*;
use tako_proto::tako::v1 as pb;
use tako_proto::tako::v1::prove_service_server::ProveService;

/// The gRPC service implementation.
pub struct ProverService {
    engine: Arc<Engine>,
}

impl ProverService {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

/// Convert a protobuf ProveRequest into a core ProveRequest.
fn proto_to_request(req: pb::ProveRequest) -> ProveRequest {
    ProveRequest {
        circuit_id: req.circuit_id,
        input: req.input,
        length: req.length,
    }
}

/// Convert a successful prove into a protobuf ProveResponse.
fn output_to_proto(out: ProveOutput) -> pb::ProveResponse {
    pb::ProveResponse {
        code: status::SUCCESS,
        msg: "success".to_string(),
        proof: out.proof,
        proof_bytes: out.proof_bytes,
        public_witness: out.public_witness,
        job_id: out.job_id.0,
        device_ordinal: out.device_ordinal,
        input_check_ms: out.timings.input_check.as_millis() as u64,
        witness_generation_ms: out.timings.witness_generation.as_millis() as u64,
        witness_decode_ms: out.timings.witness_decode.as_millis() as u64,
        proving_ms: out.timings.proving.as_millis() as u64,
        total_ms: out.timings.total.as_millis() as u64,
    }
}

/// Convert a prove failure into a protobuf ProveResponse.
fn error_to_proto(err: &ProveError) -> pb::ProveResponse {
    pb::ProveResponse {
        code: err.status_code(),
        msg: err.to_string(),
        ..Default::default()
    }
}

fn ping_to_proto(info: PingInfo) -> pb::PingResponse {
    pb::PingResponse {
        version: info.version.to_string(),
        timestamp: info.timestamp,
        uptime_seconds: info.uptime_seconds,
        in_flight: info.in_flight,
        total_completed: info.total_completed,
        total_failed: info.total_failed,
    }
}

#[tonic::async_trait]
impl ProveService for ProverService {
    async fn prove(
        &self,
        request: Request<pb::ProveRequest>,
    ) -> Result<Response<pb::ProveResponse>, Status> {
        let req = request.into_inner();
        info!(
            circuit_id = %req.circuit_id,
            input_size = req.input.len(),
            length = req.length,
            "Prove"
        );

        let resp = match self.engine.prove(proto_to_request(req)).await {
            Ok(out) => output_to_proto(out),
            Err(e) => error_to_proto(&e),
        };
        Ok(Response::new(resp))
    }

    async fn get_running_prove_tasks(
        &self,
        _request: Request<pb::Empty>,
    ) -> Result<Response<pb::RunningProveTasksResponse>, Status> {
        let count = self.engine.in_flight_count();
        if count < 0 {
            warn!(count, "in-flight counter went negative");
        }
        Ok(Response::new(pb::RunningProveTasksResponse {
            code: status::SUCCESS,
            msg: "success".to_string(),
            count,
        }))
    }

    async fn ping(&self, _request: Request<pb::Empty>) -> Result<Response<pb::PingResponse>, Status> {
        Ok(Response::new(ping_to_proto(self.engine.ping())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tako_core::circuits::CircuitRegistry;
    use tako_core::config::Config;
    use tako_core::devices::DeviceHandle;
    use tako_core::prover::{ProofArtifact, ProvingBackend, ProvingJob};

    struct NoopBackend;

    impl ProvingBackend for NoopBackend {
        fn prove(&self, _job: &ProvingJob) -> anyhow::Result<ProofArtifact> {
            anyhow::bail!("not used")
        }
    }

    fn service(devices: Vec<DeviceHandle>) -> ProverService {
        let engine = Engine::new(
            Config::default(),
            CircuitRegistry::default(),
            devices,
            Arc::new(NoopBackend),
        );
        ProverService::new(Arc::new(engine))
    }

    #[test]
    fn test_error_to_proto() {
        let resp = error_to_proto(&ProveError::CircuitNotFound("10001".into()));
        assert_eq!(resp.code, status::CIRCUIT_NOT_FOUND);
        assert!(resp.msg.contains("10001"));
        assert!(resp.proof.is_empty());

        let resp = error_to_proto(&ProveError::IntegrityMismatch);
        assert_eq!(resp.code, status::INTEGRITY_MISMATCH);
    }

    #[test]
    fn test_output_to_proto() {
        let out = ProveOutput {
            job_id: JobId("job-1".into()),
            proof: "{}".into(),
            proof_bytes: b"{}".to_vec(),
            public_witness: r#"["1"]"#.into(),
            device_ordinal: 2,
            timings: ProofTimings {
                proving: Duration::from_millis(40),
                total: Duration::from_millis(55),
                ..Default::default()
            },
        };
        let resp = output_to_proto(out);
        assert_eq!(resp.code, status::SUCCESS);
        assert_eq!(resp.job_id, "job-1");
        assert_eq!(resp.device_ordinal, 2);
        assert_eq!(resp.proving_ms, 40);
        assert_eq!(resp.total_ms, 55);
    }

    #[tokio::test]
    async fn test_prove_unknown_circuit_is_not_a_status() {
        let svc = service(vec![DeviceHandle::new(0, "gpu0")]);
        let resp = svc
            .prove(Request::new(pb::ProveRequest {
                circuit_id: "missing".into(),
                input: "{}".into(),
                length: 0,
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(resp.code, status::CIRCUIT_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_running_tasks_and_ping() {
        let svc = service(vec![DeviceHandle::new(0, "gpu0")]);
        let resp = svc
            .get_running_prove_tasks(Request::new(pb::Empty {}))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(resp.code, status::SUCCESS);
        assert_eq!(resp.count, 0);

        // A failed prove is counted.
        let _ = svc
            .prove(Request::new(pb::ProveRequest {
                circuit_id: "missing".into(),
                ..Default::default()
            }))
            .await
            .unwrap();

        let ping = svc.ping(Request::new(pb::Empty {})).await.unwrap().into_inner();
        assert!(!ping.version.is_empty());
        assert!(ping.timestamp > 0);
        assert_eq!(ping.in_flight, 0);
        assert_eq!(ping.total_failed, 1);
    }
}

//! Generated gRPC types for the tako prover.

pub mod tako {
    pub mod v1 {
        tonic::include_proto!("tako.v1");
    }
}

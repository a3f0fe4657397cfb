pub mod service;

pub use service::ProverService;

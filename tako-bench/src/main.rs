//! tako-bench: testing and load utility for the tako proof-generation daemon.
//!
//! Commands:
//!   ping  - Liveness and version
//!   tasks - Number of in-flight prove requests
//!   prove - Run a single proof through the daemon
//!   load  - Run N identical proofs and report throughput

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tonic::transport::Channel;
use tracing::info;

use tako_proto::tako::v1 as pb;
use tako_proto::tako::v1::prove_service_client::ProveServiceClient;

const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

#[derive(Parser, Debug)]
#[command(name = "tako-bench", about = "tako prover test/load utility")]
struct Cli {
    /// Daemon address (e.g. "unix:///run/tako/prover.sock" or "http://127.0.0.1:60051").
    #[arg(short, long, default_value = "http://127.0.0.1:60051")]
    addr: String,

    /// Log level.
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check that the daemon is alive.
    Ping,

    /// Show the number of in-flight prove requests.
    Tasks,

    /// Run a single proof through the daemon.
    Prove {
        /// Circuit template id.
        #[arg(short, long)]
        circuit: String,

        /// Path to the circuit input JSON.
        #[arg(short, long)]
        input: PathBuf,

        /// Length in bytes of the message covered by jwt_sha256.
        #[arg(short, long)]
        length: u64,

        /// Write the proof JSON here instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Run N identical proofs and report throughput statistics.
    Load {
        #[arg(short, long)]
        circuit: String,

        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        length: u64,

        /// Number of proofs to run.
        #[arg(short = 'n', long, default_value = "8")]
        count: u32,

        /// Number of concurrent requests.
        #[arg(short = 'j', long, default_value = "2")]
        concurrency: u32,
    },
}

/// Create a TCP gRPC client.
async fn make_tcp_client(addr: &str) -> Result<ProveServiceClient<Channel>> {
    let channel = tonic::transport::Endpoint::from_shared(addr.to_string())
        .with_context(|| format!("invalid daemon address: {}", addr))?
        .connect()
        .await
        .with_context(|| format!("failed to connect to daemon at {}", addr))?;
    Ok(ProveServiceClient::new(channel)
        .max_decoding_message_size(MAX_MESSAGE_SIZE)
        .max_encoding_message_size(MAX_MESSAGE_SIZE))
}

/// Create a UDS gRPC client.
async fn make_uds_client(socket_path: &str) -> Result<ProveServiceClient<Channel>> {
    let path = socket_path.to_string();
    let channel = tonic::transport::Endpoint::try_from("http://[::]:60051")
        .context("failed to create endpoint")?
        .connect_with_connector(tower::service_fn(move |_| {
            let path = path.clone();
            async move {
                tokio::net::UnixStream::connect(path)
                    .await
                    .map(hyper_util::rt::TokioIo::new)
            }
        }))
        .await
        .context("failed to connect to daemon via unix socket")?;
    Ok(ProveServiceClient::new(channel)
        .max_decoding_message_size(MAX_MESSAGE_SIZE)
        .max_encoding_message_size(MAX_MESSAGE_SIZE))
}

/// Connect to the daemon, handling both TCP and UDS.
async fn connect(addr: &str) -> Result<ProveServiceClient<Channel>> {
    if let Some(socket_path) = addr.strip_prefix("unix://") {
        make_uds_client(socket_path).await
    } else {
        make_tcp_client(addr).await
    }
}

async fn do_prove(
    client: &mut ProveServiceClient<Channel>,
    circuit_id: &str,
    input: &str,
    length: u64,
) -> Result<pb::ProveResponse> {
    let resp = client
        .prove(pb::ProveRequest {
            circuit_id: circuit_id.to_string(),
            input: input.to_string(),
            length,
        })
        .await
        .context("Prove RPC failed")?
        .into_inner();
    Ok(resp)
}

fn read_input(path: &PathBuf) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read input {:?}", path))
}

fn stats(times: &[f64]) -> (f64, f64, f64) {
    let avg = times.iter().sum::<f64>() / times.len() as f64;
    let min = times.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = times.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    (avg, min, max)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .init();

    match cli.command {
        Commands::Ping => {
            let mut client = connect(&cli.addr).await?;
            let start = Instant::now();
            let resp = client
                .ping(pb::Empty {})
                .await
                .context("Ping RPC failed")?
                .into_inner();
            println!("=== tako daemon ===");
            println!("version:          {}", resp.version);
            println!("timestamp:        {}", resp.timestamp);
            println!("uptime:           {}s", resp.uptime_seconds);
            println!("in flight:        {}", resp.in_flight);
            println!("proofs completed: {}", resp.total_completed);
            println!("proofs failed:    {}", resp.total_failed);
            println!("round trip:       {} ms", start.elapsed().as_millis());
        }

        Commands::Tasks => {
            let mut client = connect(&cli.addr).await?;
            let resp = client
                .get_running_prove_tasks(pb::Empty {})
                .await
                .context("GetRunningProveTasks RPC failed")?
                .into_inner();
            if resp.code != 0 {
                anyhow::bail!("daemon returned {}: {}", resp.code, resp.msg);
            }
            println!("{}", resp.count);
        }

        Commands::Prove {
            circuit,
            input,
            length,
            out,
        } => {
            let input = read_input(&input)?;
            let mut client = connect(&cli.addr).await?;
            info!(circuit = %circuit, input_size = input.len(), "submitting proof");

            let start = Instant::now();
            let resp = do_prove(&mut client, &circuit, &input, length).await?;
            if resp.code != 0 {
                anyhow::bail!("prove failed with {}: {}", resp.code, resp.msg);
            }

            eprintln!("job:            {}", resp.job_id);
            eprintln!("device:         {}", resp.device_ordinal);
            eprintln!("public witness: {}", resp.public_witness);
            eprintln!(
                "timings:        check={} ms witness={} ms decode={} ms prove={} ms total={} ms (wall {:.1}s)",
                resp.input_check_ms,
                resp.witness_generation_ms,
                resp.witness_decode_ms,
                resp.proving_ms,
                resp.total_ms,
                start.elapsed().as_secs_f64(),
            );
            match out {
                Some(path) => std::fs::write(&path, &resp.proof)
                    .with_context(|| format!("failed to write proof to {:?}", path))?,
                None => println!("{}", resp.proof),
            }
        }

        Commands::Load {
            circuit,
            input,
            length,
            count,
            concurrency,
        } => {
            let input: Arc<str> = read_input(&input)?.into();
            let circuit: Arc<str> = circuit.into();
            let sem = Arc::new(tokio::sync::Semaphore::new(concurrency.max(1) as usize));
            let batch_start = Instant::now();
            let mut handles = Vec::new();

            for i in 0..count {
                let permit = sem.clone().acquire_owned().await?;
                let addr = cli.addr.clone();
                let circuit = Arc::clone(&circuit);
                let input = Arc::clone(&input);
                handles.push(tokio::spawn(async move {
                    let start = Instant::now();
                    let mut client = connect(&addr).await?;
                    let resp = do_prove(&mut client, &circuit, &input, length).await?;
                    drop(permit);
                    Ok::<_, anyhow::Error>((i, resp, start.elapsed()))
                }));
            }

            let mut results: Vec<(pb::ProveResponse, Duration)> = Vec::new();
            for handle in handles {
                let (i, resp, elapsed) = handle.await??;
                let label = if resp.code == 0 {
                    "ok".to_string()
                } else {
                    format!("error {}", resp.code)
                };
                println!(
                    "  [{}/{}] {} - {:.1}s (device={}, prove={} ms)",
                    i + 1,
                    count,
                    label,
                    elapsed.as_secs_f64(),
                    resp.device_ordinal,
                    resp.proving_ms,
                );
                results.push((resp, elapsed));
            }

            let batch_elapsed = batch_start.elapsed();
            let completed: Vec<_> = results.iter().filter(|(r, _)| r.code == 0).collect();

            println!();
            println!("=== Load Summary ===");
            println!("total time:    {:.1}s", batch_elapsed.as_secs_f64());
            println!("completed:     {}", completed.len());
            println!("failed:        {}", results.len() - completed.len());

            if !completed.is_empty() {
                let wall: Vec<f64> = completed.iter().map(|(_, d)| d.as_secs_f64()).collect();
                let prove: Vec<f64> = completed.iter().map(|(r, _)| r.proving_ms as f64 / 1000.0).collect();
                let (wall_avg, wall_min, wall_max) = stats(&wall);
                let (prove_avg, prove_min, prove_max) = stats(&prove);
                println!("wall time:     avg={:.1}s min={:.1}s max={:.1}s", wall_avg, wall_min, wall_max);
                println!("prove time:    avg={:.1}s min={:.1}s max={:.1}s", prove_avg, prove_min, prove_max);
                println!(
                    "throughput:    {:.3} proofs/min",
                    completed.len() as f64 / batch_elapsed.as_secs_f64() * 60.0,
                );
            }
        }
    }

    Ok(())
}

//! tako-daemon: standalone binary for the tako proof-generation service.
//!
//! Loads configuration, circuits and devices, then serves gRPC until Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tonic::transport::Server;
use tracing::info;

use tako_core::config::Config;
use tako_core::engine::Engine;
use tako_proto::tako::v1::prove_service_server::ProveServiceServer;
use tako_server::ProverService;

/// Largest request or response accepted on the wire.
const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

#[derive(Parser, Debug)]
#[command(name = "tako-daemon", about = "tako proof-generation daemon")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(short, long, default_value = "tako.toml")]
    config: PathBuf,

    /// Override listen address (e.g. "0.0.0.0:60051" or "unix:///run/tako/prover.sock").
    #[arg(short, long)]
    listen: Option<String>,

    /// Override the circuit template directory.
    #[arg(short, long)]
    templates: Option<PathBuf>,

    /// Override log level.
    #[arg(long)]
    log_level: Option<String>,
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
    info!("received SIGINT, shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_found = cli.config.exists();
    let mut config = if config_found {
        Config::from_file(&cli.config)
            .with_context(|| format!("failed to load config from {:?}", cli.config))?
    } else {
        Config::default()
    };

    if let Some(listen) = &cli.listen {
        config.daemon.listen = listen.clone();
    }
    if let Some(templates) = &cli.templates {
        config.circuits.template_dir = templates.clone();
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    info!("tako-daemon starting");
    if !config_found {
        info!("config file not found at {:?}, using defaults", cli.config);
    }
    info!(
        listen = %config.daemon.listen,
        template_dir = %config.circuits.template_dir.display(),
        "configuration loaded"
    );

    let listen_addr = config.daemon.listen.clone();
    let engine = Arc::new(Engine::start(config)?);

    let svc = ProveServiceServer::new(ProverService::new(engine))
        .max_decoding_message_size(MAX_MESSAGE_SIZE)
        .max_encoding_message_size(MAX_MESSAGE_SIZE);

    if let Some(socket_path) = listen_addr.strip_prefix("unix://") {
        let _ = std::fs::remove_file(socket_path);

        if let Some(parent) = std::path::Path::new(socket_path).parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create socket dir {:?}", parent))?;
        }

        let uds = tokio::net::UnixListener::bind(socket_path)
            .with_context(|| format!("failed to bind unix socket {}", socket_path))?;
        let uds_stream = tokio_stream::wrappers::UnixListenerStream::new(uds);

        info!("tako-daemon ready, serving on unix://{}", socket_path);

        Server::builder()
            .add_service(svc)
            .serve_with_incoming_shutdown(uds_stream, shutdown_signal())
            .await
            .context("gRPC server error")?;

        let _ = std::fs::remove_file(socket_path);
    } else {
        let addr = listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", listen_addr))?;

        info!("tako-daemon ready, serving on {}", addr);

        Server::builder()
            .add_service(svc)
            .serve_with_shutdown(addr, shutdown_signal())
            .await
            .context("gRPC server error")?;
    }

    info!("tako-daemon stopped");
    Ok(())
}

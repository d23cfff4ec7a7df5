//! fleet-external-server binary.
//!
//! Loads the JSON configuration, assembles one session per configured car
//! and runs them until every session finishes or a termination signal asks
//! them to stop. The exit code is 0 only when every session stopped
//! cleanly; configuration errors, initialisation failures and session
//! errors all exit non-zero.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use fleet_external_server::bus::TlsFiles;
use fleet_external_server::config::ServerConfig;
use fleet_external_server::supervisor::ExternalServer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Cloud-side endpoint of the Fleet Protocol.
#[derive(Parser, Debug)]
#[command(name = "fleet-external-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the JSON configuration file.
    config: PathBuf,

    /// Connect to the broker over TLS with mutual authentication.
    #[arg(long)]
    tls: bool,

    /// CA certificate file (requires --tls).
    #[arg(long)]
    ca: Option<PathBuf>,

    /// Client certificate file (requires --tls).
    #[arg(long)]
    cert: Option<PathBuf>,

    /// Client private key file (requires --tls).
    #[arg(long)]
    key: Option<PathBuf>,
}

fn tls_files(args: &Args) -> Result<Option<TlsFiles>> {
    if !args.tls {
        if args.ca.is_some() || args.cert.is_some() || args.key.is_some() {
            warn!("--ca, --cert and --key have no effect without --tls");
        }
        return Ok(None);
    }
    match (&args.ca, &args.cert, &args.key) {
        (Some(ca), Some(cert), Some(key)) => Ok(Some(TlsFiles {
            ca: ca.clone(),
            cert: cert.clone(),
            key: key.clone(),
        })),
        _ => bail!("--tls requires --ca, --cert and --key"),
    }
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT");
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
    info!("received interrupt");
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let config = ServerConfig::load(&args.config).context("configuration error")?;
    let tls = tls_files(&args)?;

    let server = ExternalServer::from_config(&config, tls).context("initialisation failed")?;
    info!(cars = server.car_count(), "external server starting");

    let running = server.start();
    let handles = running.car_handles();
    tokio::spawn(async move {
        wait_for_termination().await;
        for handle in &handles {
            handle.stop();
        }
    });

    let outcome = running.join().await;
    info!(
        sessions = outcome.sessions.len(),
        clean = outcome.all_clean(),
        "external server finished"
    );
    Ok(if outcome.all_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

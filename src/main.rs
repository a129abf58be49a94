#![forbid(unsafe_code)]

//! `mcp-relay` HTTP relay binary.
//!
//! Loads configuration, starts the supervised stdio child, serves the HTTP
//! front-end, and on SIGINT/SIGTERM stops the server and terminates the child
//! before exiting.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use mcp_relay::bridge::{Supervisor, SupervisorConfig};
use mcp_relay::http::{self, HttpState};
use mcp_relay::{AppError, RelayConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "mcp-relay", about = "Expose a stdio JSON-RPC process over HTTP", version, long_about = None)]
struct Cli {
    /// Optional TOML configuration file; compiled-in defaults otherwise.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listening port, overriding the config file and `PORT`.
    #[arg(long)]
    port: Option<u16>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("mcp-relay bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match &args.config {
        Some(path) => RelayConfig::load_from_path(path)?,
        None => RelayConfig::default(),
    };
    config.apply_env()?;
    if let Some(port) = args.port {
        config.http.port = port;
    }
    config.validate()?;
    info!(
        command = %config.child.command,
        args = ?config.child.args,
        port = config.http.port,
        "configuration loaded"
    );

    // ── Start the child ─────────────────────────────────
    let supervisor = Supervisor::new(SupervisorConfig::from(&config));
    if let Err(err) = supervisor.start() {
        // The HTTP side still comes up and answers `not_ready`.
        warn!(%err, "child process not started");
    }

    // ── Start HTTP transport ────────────────────────────
    let listener = http::bind(&config.http).await?;
    let ct = CancellationToken::new();
    let http_ct = ct.clone();
    let state = HttpState {
        supervisor: supervisor.clone(),
    };
    let http_handle = tokio::spawn(async move {
        if let Err(err) = http::serve_http(listener, state, http_ct).await {
            error!(%err, "http transport failed");
        }
    });

    info!("mcp-relay ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    supervisor.shutdown().await;
    if let Err(err) = http_handle.await {
        error!(%err, "http transport task panicked");
    }
    info!("mcp-relay shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    result = ctrl_c => {
                        if let Err(err) = result {
                            error!(%err, "ctrl-c signal handler failed");
                        }
                    }
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                if let Err(err) = ctrl_c.await {
                    error!(%err, "ctrl-c signal handler failed");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}

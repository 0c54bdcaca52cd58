//! fl-coordinator: federated-learning coordination daemon.
//!
//! Startup wires configuration, the engine task, and the command server,
//! then waits for Ctrl+C and shuts both down gracefully.
//!
//! ```bash
//! ENABLE_ASYNC_ROUNDS=true ASYNC_MIN_UPDATES=2 fl-coordinator -p 4710
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

use fedcoord_common::logging::{init_logging, LogLevel};
use fedcoord_common::CoordinatorConfig;
use fedcoord_coordinator::{ApiServer, EngineTask, Task};
use fedcoord_core::CoordinatorContext;

/// fl-coordinator - federated learning coordination server
#[derive(Parser, Debug)]
#[command(name = "fl-coordinator")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// UDP port of the command server (overrides COORDINATOR_PORT)
    #[arg(short = 'p', long = "port", value_name = "PORT")]
    port: Option<u16>,

    /// Base data directory (overrides FEDCOORD_DATA_DIR)
    #[arg(short = 'd', long = "data-dir", value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Default log level (RUST_LOG overrides)
    #[arg(long = "log-level", default_value = "info")]
    log_level: LogLevel,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.log_level);

    match run(args).await {
        Ok(()) => {
            info!("coordinator exited");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("coordinator failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = CoordinatorConfig::from_env().context("invalid configuration")?;
    if let Some(port) = args.port {
        config.command_port = port;
    }
    if let Some(data_dir) = args.data_dir {
        config.storage.data_dir = data_dir;
    }

    info!(
        port = config.command_port,
        data_dir = %config.storage.data_dir.display(),
        async_rounds = config.async_rounds.enabled,
        "starting coordinator"
    );

    let command_port = config.command_port;
    let ctx = CoordinatorContext::new(config).context("failed to initialize coordinator state")?;

    // Engine task: the single writer over all coordinator state.
    let (engine_handle, engine_rx) = fedcoord_coordinator::tasks::task_channel();
    let mut engine = EngineTask::new(ctx, engine_handle.clone());
    let engine_join = tokio::spawn(async move { engine.run(engine_rx).await });
    info!("engine task spawned");

    // Command server task.
    let bind_addr = format!("0.0.0.0:{command_port}")
        .parse()
        .expect("valid bind address");
    let server = ApiServer::bind(bind_addr, engine_handle.clone())
        .await
        .with_context(|| format!("cannot bind command server on port {command_port}"))?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server_join = tokio::spawn(server.run(shutdown_rx));
    info!("command server task spawned");

    // Wait for Ctrl+C / SIGTERM.
    signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("received Ctrl+C, initiating shutdown");

    let _ = shutdown_tx.send(true);
    let _ = engine_handle.shutdown().await;
    let _ = engine_join.await;
    let _ = server_join.await;

    Ok(())
}

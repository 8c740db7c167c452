//! fdborch entry point.
//!
//! Runs the FDB sync engine against the simulated switch. On SIGINT the
//! engine is shut down; if a restart check froze it first, the checkpoint
//! stays behind for the next `--warm-boot` start.

use anyhow::Context;
use clap::Parser;
use sonic_fdborch::audit::init_logging;
use sonic_fdborch::{
    EngineDeps, FdbSyncConfig, FdbSyncEngine, FileCheckpointStore, HardwareNotificationChannel,
    VirtualSwitch, DEFAULT_CONFIG_PATH,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

/// FDB entries the simulated ASIC can hold.
const SIM_FDB_CAPACITY: u32 = 32 * 1024;

/// SONiC FDB orchestration daemon
#[derive(Parser, Debug)]
#[command(name = "fdborch")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Start from the checkpoint left by a warm restart
    #[arg(long)]
    warm_boot: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Override the checkpoint location
    #[arg(long)]
    checkpoint_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level, args.json_logs);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fdborch failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = FdbSyncConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    config.warm_boot = args.warm_boot;
    if let Some(path) = args.checkpoint_path {
        config.warm_restart.checkpoint_path = path;
    }

    info!(
        warm_boot = config.warm_boot,
        warm_restart_enabled = config.warm_restart.enabled,
        checkpoint = %config.warm_restart.checkpoint_path.display(),
        "Starting fdborch (simulation mode)"
    );

    let notifications = HardwareNotificationChannel::new(config.notification.queue_capacity);
    let switch = VirtualSwitch::new(notifications, SIM_FDB_CAPACITY);
    let store = Arc::new(FileCheckpointStore::new(&config.warm_restart.checkpoint_path));
    let deps = EngineDeps::new_virtual(&switch, store);

    let (engine, handle) = FdbSyncEngine::new(config, deps);
    let task = tokio::spawn(engine.run());

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Received SIGINT, shutting down");

    handle.shutdown().await.context("stopping engine")?;
    let state = task.await.context("engine task")?;
    info!(state = %state, "fdborch exiting");
    Ok(())
}

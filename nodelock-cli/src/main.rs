//! nodelock: lock, release and inspect machines in a shared test pool
//!
//! Talks to the central lock service and handles what it cannot do alone:
//! - Rolling back bulk locks whose virtual machines fail to provision
//! - Waiting for freshly booted VMs before updating their records
//! - Keeping stored SSH host keys in step with the machines
//!
//! Configuration is read from `~/.nodelock.toml` (or `--config`); flags and
//! environment variables override it.

mod commands;
mod config;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use tracing_subscriber::EnvFilter;

use commands::Commands;
use config::Config;
use nodelock::{
    default_owner, CommandProvisioner, HttpLockService, LeaseCoordinator, LockService, SshKeyscan,
};

#[derive(Parser)]
#[command(name = "nodelock")]
#[command(about = "Lock, release and inspect machines in a shared test pool")]
struct Cli {
    /// Path to configuration file (default: ~/.nodelock.toml)
    #[arg(short, long, env = "NODELOCK_CONFIG")]
    config: Option<PathBuf>,

    /// Lock service URL (overrides config file)
    #[arg(long, env = "NODELOCK_SERVER")]
    lock_server: Option<String>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("NODELOCK_LOG")
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // stdout carries command output only
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(url) = cli.lock_server {
        config.lock_server.url = url;
    }

    let owner = cli
        .command
        .owner()
        .map(str::to_string)
        .or_else(|| config.lock_server.owner.clone())
        .unwrap_or_else(default_owner);
    let ctx = config.to_context(owner, cli.verbose);
    debug!(lock_server = %ctx.lock_server, owner = %ctx.owner, "Resolved context");

    let service: Arc<dyn LockService> = Arc::new(HttpLockService::new(
        ctx.lock_server.clone(),
        config.request_timeout(),
    )?);
    let provisioner = Arc::new(CommandProvisioner::new(
        service.clone(),
        config.provision.create.clone(),
        config.provision.destroy.clone(),
    ));
    let host_scan = Arc::new(SshKeyscan::new(config.keyscan.key_type.clone()));

    let cancel = CancellationToken::new();
    let coordinator = LeaseCoordinator::new(ctx, service, provisioner, host_scan)
        .with_cancellation(cancel.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            cancel.cancel();
        }
    });

    match commands::execute_command(&coordinator, cli.command).await {
        Ok(output) => {
            let mut stdout = std::io::stdout();
            stdout.write_all(output.stdout.as_bytes())?;
            stdout.flush()?;
            if output.exit_code != 0 {
                std::process::exit(output.exit_code);
            }
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

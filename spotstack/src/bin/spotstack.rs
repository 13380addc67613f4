//! spotstack command line.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use spotstack::{SpotstackOptions, SpotstackRuntime, init_logging_for};

#[derive(Parser, Debug)]
#[command(name = "spotstack", version, about = "Marketplace VM provisioning")]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the home directory (database and logs)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rebuild the hardware catalog from the cloud's instance types
    SyncHardware,
    /// Reconcile VM records with live instances
    SyncVms,
    /// Provision a VM and wait for the run to finish
    Provision {
        /// Hardware template id
        #[arg(long)]
        hardware: String,
        /// Marketplace package id
        #[arg(long)]
        package: String,
    },
    /// Print a task as JSON
    Task {
        id: String,
    },
    /// List VMs after reconciling with the cloud
    ListVms,
    ListHardware,
    ListPackages,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut options = match cli.config {
        Some(ref path) => SpotstackOptions::from_file(path)?,
        None => SpotstackOptions::default(),
    };
    if let Some(home) = cli.home {
        options.home_dir = home;
    }

    let _log_guard = init_logging_for(&options.home_dir)?;
    tracing::debug!(command = ?cli.command, "spotstack starting");

    let runtime = SpotstackRuntime::new(options).context("failed to initialize runtime")?;

    match cli.command {
        Command::SyncHardware => {
            let templates = runtime.sync_hardware().await?;
            print_json(&templates)?;
        }
        Command::SyncVms => {
            let report = runtime.sync_vms().await?;
            print_json(&report)?;
        }
        Command::Provision { hardware, package } => {
            let (vm_id, task_id) = runtime.submit(&hardware, &package)?;
            eprintln!("Provisioning VM {} (task {})", vm_id, task_id);
            runtime.shutdown().await;

            let task = runtime
                .task(&task_id)?
                .with_context(|| format!("task {} not found", task_id))?;
            print_json(&task)?;
            if task.is_error {
                anyhow::bail!(
                    "provisioning failed: {}",
                    task.message.unwrap_or_default()
                );
            }
        }
        Command::Task { id } => {
            let task = runtime
                .task(&id)?
                .with_context(|| format!("task {} not found", id))?;
            print_json(&task)?;
        }
        Command::ListVms => print_json(&runtime.list_vms().await?)?,
        Command::ListHardware => print_json(&runtime.list_hardware()?)?,
        Command::ListPackages => print_json(&runtime.list_packages()?)?,
    }

    Ok(())
}

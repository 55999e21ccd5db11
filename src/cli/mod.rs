/*
* vm-provision command line
* -------------------------
* vm-provision
* ├── provision --spec <file> --host <addr> [--dry-run] [--timeout <secs>]
* ├── validate --spec <file>       // load + validate, touch nothing
* ├── volumes --host <addr>        // storage ranking, most free space first
* └── init [--force]               // writes config/default.toml
*
* `--config <dir>` points at the directory holding default.toml / local.toml.
* Ctrl-C during a run cancels the task being waited on; machines that had not
* started yet are reported as not attempted.
*/

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{ProvisioningSettings, Settings};
use crate::core::{load_batch, MachineSpec};
use crate::platform::{
    Credentials, HostConnector, ManagementApi, RestConnector, RestPlatform, SimulatedPlatform,
};
use crate::provisioning::{
    BatchReport, MachineResult, ProvisionOutcome, Provisioner, StorageRanker, TaskWaiter,
};

// the simulated host answers instantly, no point waiting a full second per poll
const DRY_RUN_POLL_INTERVAL: Duration = Duration::from_millis(10);
const DRY_RUN_VOLUME_BYTES: u64 = 1 << 40;

#[derive(Parser)]
#[command(name = "vm-provision")]
#[command(about = "Provision batches of virtual machines from a YAML document", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding default.toml / local.toml
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision every machine in the document
    Provision(ProvisionArgs),
    /// Load and validate a document without touching any host
    Validate {
        #[arg(short, long)]
        spec: PathBuf,
    },
    /// Print the host's volumes by free space
    Volumes {
        #[arg(long)]
        host: String,
    },
    /// Generate default configuration
    Init {
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Args)]
struct ProvisionArgs {
    #[arg(short, long)]
    spec: PathBuf,

    #[arg(long, required_unless_present = "dry_run")]
    host: Option<String>,

    /// Run against an in-memory host seeded from the document
    #[arg(long)]
    dry_run: bool,

    /// Give up on a task after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,
}

pub async fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Load configuration
    let settings = match &cli.config {
        Some(path) => Settings::from_dir(path)?,
        None => Settings::new()?,
    };

    match cli.command {
        Commands::Provision(args) => handle_provision(args, &settings).await,
        Commands::Validate { spec } => handle_validate(&spec),
        Commands::Volumes { host } => handle_volumes(&host, &settings).await,
        Commands::Init { force } => {
            let dir = cli.config.unwrap_or_else(|| PathBuf::from("config"));
            handle_init_command(&dir, force)
        }
    }
}

async fn handle_provision(args: ProvisionArgs, settings: &Settings) -> anyhow::Result<ExitCode> {
    let specs = load_batch(&args.spec)?;
    info!(machines = specs.len(), spec = %args.spec.display(), "Loaded machine specifications");

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let deadline = args.timeout.map(Duration::from_secs).or_else(|| settings.tasks.deadline());

    let report = match args.host {
        Some(host) if !args.dry_run => {
            let waiter = TaskWaiter::new(settings.tasks.poll_interval())
                .with_deadline(deadline)
                .with_cancellation(cancel);
            run_against_host(&host, settings, waiter, &specs).await?
        }
        _ => {
            info!("Dry run, provisioning against an in-memory host");
            let waiter = TaskWaiter::new(DRY_RUN_POLL_INTERVAL)
                .with_deadline(deadline)
                .with_cancellation(cancel);
            let platform = dry_run_platform(&specs, &settings.provisioning);
            Provisioner::new(Arc::new(platform), waiter, settings.provisioning.clone())
                .run_batch(&specs)
                .await
        }
    };

    print_report(&report);
    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn run_against_host(
    host: &str,
    settings: &Settings,
    waiter: TaskWaiter,
    specs: &[MachineSpec],
) -> anyhow::Result<BatchReport> {
    let connector = RestConnector::new(settings.host.clone());
    let session = Arc::new(connect(&connector, host, settings).await?);

    let api: Arc<dyn ManagementApi> = session.clone();
    let report = Provisioner::new(api, waiter, settings.provisioning.clone())
        .run_batch(specs)
        .await;

    if let Err(e) = connector.disconnect(&session).await {
        warn!(error = %e, "Failed to close host session");
    }
    Ok(report)
}

async fn connect(
    connector: &RestConnector,
    host: &str,
    settings: &Settings,
) -> anyhow::Result<RestPlatform> {
    let credentials = Credentials::new(&settings.host.username, &settings.host.password);
    connector
        .connect(host, &credentials)
        .await
        .with_context(|| format!("could not connect to {}", host))
}

fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling outstanding work");
            cancel.cancel();
        }
    });
}

/// In-memory host holding every network the document references plus the
/// default volume, so a well-formed document provisions cleanly.
fn dry_run_platform(specs: &[MachineSpec], settings: &ProvisioningSettings) -> SimulatedPlatform {
    let networks: BTreeSet<&str> = specs.iter().map(|s| s.network.as_str()).collect();
    let platform = networks
        .into_iter()
        .fold(SimulatedPlatform::new(), |platform, network| platform.with_network(network));
    platform.with_volume(&settings.default_volume, DRY_RUN_VOLUME_BYTES)
}

fn handle_validate(spec: &Path) -> anyhow::Result<ExitCode> {
    let specs = load_batch(spec)?;

    println!("{}", "Machines:".bold());
    for machine in &specs {
        let disks: usize = machine.controllers.iter().map(|c| c.disks.len()).sum();
        println!(
            "- {} ({} vCPU, {} MB, {} on {}, {} controller(s), {} disk(s))",
            machine.name,
            machine.cpu_count,
            machine.memory_mb,
            machine.nic_kind,
            machine.network,
            machine.controllers.len(),
            disks
        );
    }
    println!("{} {} machine(s) valid", "✓".green(), specs.len());
    Ok(ExitCode::SUCCESS)
}

async fn handle_volumes(host: &str, settings: &Settings) -> anyhow::Result<ExitCode> {
    let connector = RestConnector::new(settings.host.clone());
    let session = connect(&connector, host, settings).await?;

    let ranking = StorageRanker::new(&session).rank().await;
    if let Err(e) = connector.disconnect(&session).await {
        warn!(error = %e, "Failed to close host session");
    }

    println!("{}", "Volumes (most free space first):".bold());
    for (position, volume) in ranking?.iter().enumerate() {
        println!("{:>3}. {}", position + 1, volume);
    }
    Ok(ExitCode::SUCCESS)
}

fn handle_init_command(config_dir: &Path, force: bool) -> anyhow::Result<ExitCode> {
    let target = config_dir.join("default.toml");
    if target.exists() && !force {
        error!("{} already exists. Use --force to overwrite.", target.display());
        return Ok(ExitCode::FAILURE);
    }

    std::fs::create_dir_all(config_dir)?;
    let default_config = crate::config::generate_default_config();
    let config_str = toml::to_string_pretty(&default_config)?;
    std::fs::write(&target, config_str)?;

    println!("{} Default configuration written to {}", "✓".green(), target.display());
    Ok(ExitCode::SUCCESS)
}

fn print_report(report: &BatchReport) {
    println!("{}", "Provisioning summary:".bold());
    for machine in &report.machines {
        match &machine.result {
            MachineResult::Done { outcome, started_at, finished_at } => {
                let took = (*finished_at - *started_at).num_seconds();
                match outcome {
                    ProvisionOutcome::Created { machine: id, volume, warnings } => {
                        println!(
                            "{} {} created ({}) on [{}] in {}s",
                            "✓".green(),
                            machine.name,
                            id,
                            volume,
                            took
                        );
                        for warning in warnings {
                            println!("    {} {}", "!".yellow(), warning);
                        }
                    }
                    ProvisionOutcome::Skipped { machine: id } => {
                        println!("{} {} already exists ({})", "-".yellow(), machine.name, id);
                    }
                    ProvisionOutcome::Failed { stage, error } => {
                        println!("{} {} failed at {}: {}", "✗".red(), machine.name, stage, error);
                    }
                }
            }
            MachineResult::NotAttempted => {
                println!("{} {} not attempted", "·".dimmed(), machine.name);
            }
        }
    }

    let summary = format!(
        "{} created, {} skipped, {} failed, {} not attempted",
        report.created(),
        report.skipped(),
        report.failed(),
        report.not_attempted()
    );
    if report.is_success() {
        println!("{}", summary.green());
    } else {
        println!("{}", summary.red());
    }
}

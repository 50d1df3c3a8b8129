//! cluster-updater - rolls a self-hosted cluster to the version in its ConfigMap

use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use kube::Client;
use tracing::{info, warn};

use cluster_updater::config::ControllerArgs;
use cluster_updater::driver::{self, ConfigMapVersionSource};
use cluster_updater::telemetry::{init_telemetry, TelemetryConfig};
use cluster_updater::{UpdateController, UpdateOutcome, Version};

/// How long a one-shot update waits for the caches to fill
const CACHE_SYNC_TIMEOUT: Duration = Duration::from_secs(60);

/// cluster-updater - version-skew-aware update controller
#[derive(Parser, Debug)]
#[command(name = "cluster-updater", version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    controller: ControllerArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller loop (default mode)
    ///
    /// Reads the desired version from the cluster ConfigMap on every tick and
    /// takes at most one update step per tick until the cluster converges.
    Run,

    /// Take a single update step towards a version and exit
    Update {
        /// Version to move the cluster towards, e.g. v1.5.0_coreos.0
        #[arg(long)]
        version: Version,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_telemetry(TelemetryConfig {
        json: cli.controller.json_logs,
        ..Default::default()
    })?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_controller(cli.controller).await,
        Commands::Update { version } => update_once(cli.controller, version).await,
    }
}

async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    let driver_config = args.driver_config()?;
    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;

    let controller = UpdateController::new(client.clone(), &args.namespace);
    let source = ConfigMapVersionSource::new(
        client,
        &args.namespace,
        args.config_map.as_str(),
        args.version_key.as_str(),
    );

    info!(
        namespace = %args.namespace,
        config_map = %args.config_map,
        key = %args.version_key,
        "Starting cluster update controller"
    );

    tokio::select! {
        _ = driver::run(&controller, &source, driver_config) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for shutdown signal")?;
            info!("Received shutdown signal, stopping");
        }
    }

    Ok(())
}

async fn update_once(args: ControllerArgs, version: Version) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    let controller = UpdateController::new(client, &args.namespace);

    if !controller.cache().wait_for_sync(CACHE_SYNC_TIMEOUT).await {
        warn!(
            timeout_secs = CACHE_SYNC_TIMEOUT.as_secs(),
            "Caches did not sync in time, attempting update anyway"
        );
    }

    match controller.update_to_version(&version).await? {
        UpdateOutcome::Updated { name, kind } => {
            println!("updated {kind} {name} towards {version}");
        }
        UpdateOutcome::InProgress { name, kind } => {
            println!("waiting for {kind} {name} to finish rolling out {version}");
        }
        UpdateOutcome::Converged => {
            println!("cluster is at {version}");
        }
    }

    Ok(())
}

//! CLI entry point for the netvault asset store.

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{fmt, EnvFilter};

use netvault_core::NetworkId;
use netvault_store::prelude::*;

use netvault_cli::config::load_store_config;
use netvault_cli::maintenance::{run_pass, Maintainer};

#[derive(Parser)]
#[command(name = "netvault")]
#[command(about = "Maintenance CLI for the netvault asset inventory store")]
struct Cli {
    /// Config file prefix (default: netvault).
    #[arg(short, long, default_value = "netvault", global = true)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bring the store schema up to date and report what changed.
    Migrate,

    /// List devices in address order.
    Devices {
        /// Only devices of this network id.
        #[arg(long)]
        network: Option<NetworkId>,
    },

    /// Clear every scan timestamp so all devices become eligible.
    ResetCooldowns,

    /// Delete expired geolocation cache rows.
    PurgeGeo,

    /// Rewrite the cached device count of every network.
    RecountNetworks,

    /// Run maintenance passes periodically until interrupted.
    Maintain {
        /// Seconds between passes.
        #[arg(long, default_value_t = 3600)]
        interval_secs: u64,
    },
}

#[derive(Serialize)]
struct MigrateOutput<'a> {
    applied: &'a [String],
    already_present: usize,
    warnings: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let config = load_store_config(&cli.config)?;
    let store = AssetStore::open(&config)?;

    match cli.command {
        Command::Migrate => {
            let report = store.schema_report();
            print_json(&MigrateOutput {
                applied: &report.applied,
                already_present: report.already_present.len(),
                warnings: report.warnings.iter().map(ToString::to_string).collect(),
            })?;
        }
        Command::Devices { network } => {
            let devices = match network {
                Some(id) => store.list_devices_in_network(id)?,
                None => store.list_devices()?,
            };
            print_json(&devices)?;
        }
        Command::ResetCooldowns => {
            print_json(&store.reset_cooldowns()?)?;
        }
        Command::PurgeGeo => {
            let purged = store.purge_expired_locations(chrono::Utc::now())?;
            print_json(&serde_json::json!({ "purged": purged }))?;
        }
        Command::RecountNetworks => {
            let networks = store.recompute_device_counts()?;
            print_json(&serde_json::json!({ "networks": networks }))?;
        }
        Command::Maintain { interval_secs } => {
            anyhow::ensure!(interval_secs > 0, "--interval-secs must be positive");
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            let maintainer = Maintainer::new(
                store.clone(),
                tokio::time::Duration::from_secs(interval_secs),
            );
            runtime.block_on(maintainer.run(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for shutdown signal");
                    std::future::pending::<()>().await;
                }
            }));
            // A last pass so counts are fresh for whoever opens the store next.
            let report = run_pass(&store, chrono::Utc::now())?;
            print_json(&report)?;
        }
    }

    store.close()?;
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

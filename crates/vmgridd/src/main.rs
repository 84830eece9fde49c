//! vmgridd — the vmgrid daemon.
//!
//! Polls a desired-state snapshot file and drives the reconciliation
//! engine one round per tick, publishing an allocation + migration +
//! utilization report after each round.
//!
//! # Usage
//!
//! ```text
//! vmgridd run --input input.json --output output.json --interval 5
//! vmgridd once --input input.json
//! vmgridd synth --input input.json --count 3
//! ```

mod driver;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use vmgrid_core::GridConfig;
use vmgrid_engine::{Reconciler, TargetBand};
use vmgrid_snapshot::SynthRanges;

use crate::driver::Driver;

const DEFAULT_CONFIG: &str = "vmgrid.toml";

#[derive(Parser)]
#[command(name = "vmgridd", about = "vmgrid placement daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the reconciliation loop against a snapshot file.
    Run {
        /// Path to vmgrid.toml (defaults apply if absent).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Snapshot file to poll.
        #[arg(long)]
        input: Option<PathBuf>,

        /// Report file to write each round.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Polling interval in seconds.
        #[arg(long)]
        interval: Option<u64>,

        /// Append one synthetic VM to the snapshot before each round.
        #[arg(long)]
        synth: bool,
    },

    /// Reconcile a single snapshot and exit.
    Once {
        /// Path to vmgrid.toml (defaults apply if absent).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Snapshot file to reconcile.
        #[arg(long, default_value = "input.json")]
        input: PathBuf,

        /// Report file; printed to stdout when omitted.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Append synthetic VMs to a snapshot file.
    Synth {
        /// Path to vmgrid.toml (defaults apply if absent).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Snapshot file to grow.
        #[arg(long, default_value = "input.json")]
        input: PathBuf,

        /// How many VMs to append.
        #[arg(long, default_value = "1")]
        count: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,vmgridd=debug,vmgrid=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            input,
            output,
            interval,
            synth,
        } => run_loop(config, input, output, interval, synth).await,
        Command::Once {
            config,
            input,
            output,
        } => run_once(config, input, output),
        Command::Synth {
            config,
            input,
            count,
        } => run_synth(config, input, count),
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<GridConfig> {
    let path = path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    GridConfig::load_or_default(&path)
        .with_context(|| format!("loading config from {}", path.display()))
}

fn band(config: &GridConfig) -> anyhow::Result<TargetBand> {
    Ok(TargetBand::new(
        config.low_watermark(),
        config.high_watermark(),
    )?)
}

fn synth_ranges(config: &GridConfig) -> SynthRanges {
    let (cpu_min, cpu_max) = config.synth_cpu_range();
    let (ram_min, ram_max) = config.synth_ram_range();
    SynthRanges {
        cpu_min,
        cpu_max,
        ram_min,
        ram_max,
    }
}

async fn run_loop(
    config: Option<PathBuf>,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    interval: Option<u64>,
    synth: bool,
) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let input = input.unwrap_or_else(|| config.input_path());
    let output = output.unwrap_or_else(|| config.output_path());
    let interval = Duration::from_secs(interval.unwrap_or_else(|| config.interval_secs()));

    let mut driver = Driver::new(band(&config)?, input, output);
    if synth {
        driver = driver.with_synth(synth_ranges(&config));
    }

    // Graceful shutdown on Ctrl-C.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    driver.run(interval, shutdown_rx).await
}

fn run_once(
    config: Option<PathBuf>,
    input: PathBuf,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let snapshot = vmgrid_snapshot::read_snapshot(&input)
        .with_context(|| format!("reading snapshot from {}", input.display()))?;

    let mut reconciler = Reconciler::new(band(&config)?);
    let report = reconciler.reconcile_round(&snapshot)?;

    match output {
        Some(path) => vmgrid_snapshot::write_report(&path, &report)?,
        None => println!("{}", vmgrid_snapshot::report_to_string(&report)?),
    }
    Ok(())
}

fn run_synth(config: Option<PathBuf>, input: PathBuf, count: u32) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let ranges = synth_ranges(&config);
    for _ in 0..count {
        let id = vmgrid_snapshot::append_random_vm(&input, &ranges)?;
        info!(vm = %id, "appended");
    }
    Ok(())
}

//! Runs scans and builds reports from the command line.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(clippy::unwrap_used)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quipucords::{
    config,
    instance::{ensure_completed, Instance},
    inventory::Inventory,
    trace::TracingConfig,
};
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[clap(version, about)]
struct Cmd {
    #[clap(flatten)]
    tracing: TracingConfig,

    #[clap(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Run a scan from an inventory file and write its report tarball.
    ///
    /// Exits non-zero if the scan job does not complete.
    Scan(CmdScan),

    /// Build a report from uploaded details files and write its tarball.
    ///
    /// Several files are merged into one report before fingerprinting.
    Report(CmdReport),

    /// Build a report from uploaded details files and print its aggregate as JSON.
    Aggregate(CmdAggregate),
}

#[derive(Parser, Debug)]
struct CmdScan {
    #[clap(flatten)]
    pipeline: config::Pipeline,

    /// The inventory of credentials, sources, and scans.
    #[clap(long)]
    inventory: PathBuf,

    /// The name of the scan to run.
    #[clap(long)]
    scan: String,

    /// Directory the report tarball is written to.
    #[clap(long, default_value = ".")]
    out: PathBuf,
}

#[derive(Parser, Debug)]
struct CmdReport {
    #[clap(flatten)]
    pipeline: config::Pipeline,

    /// Details report files.
    #[clap(long, required = true, num_args = 1..)]
    details: Vec<PathBuf>,

    /// Directory the report tarball is written to.
    #[clap(long, default_value = ".")]
    out: PathBuf,
}

#[derive(Parser, Debug)]
struct CmdAggregate {
    #[clap(flatten)]
    pipeline: config::Pipeline,

    /// Details report files.
    #[clap(long, required = true, num_args = 1..)]
    details: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = Cmd::parse();
    cmd.tracing.init()?;
    debug!(mode = ?cmd.mode, "parsed command");

    match cmd.mode {
        Mode::Scan(opts) => main_scan(opts).await,
        Mode::Report(opts) => main_report(opts).await,
        Mode::Aggregate(opts) => main_aggregate(opts).await,
    }
}

async fn main_scan(CmdScan { pipeline, inventory, scan, out }: CmdScan) -> Result<()> {
    let inventory = Inventory::load(&inventory)?;
    let instance = Instance::start_default(pipeline.settings());

    let job = instance.scan(&inventory, &scan).await.context("run scan")?;
    info!(job = %job.id(), status = %job.status(), "scan finished: {}", job.status_message());
    if let Some(report) = job.report() {
        let path = instance.write_tarball(report, &out)?;
        println!("{}", path.display());
    }
    ensure_completed(&job)
}

async fn main_report(CmdReport { pipeline, details, out }: CmdReport) -> Result<()> {
    let instance = Instance::start_default(pipeline.settings());
    let (report, job) = instance.import_details(&details).await?;
    ensure_completed(&job)?;

    let path = instance.write_tarball(report, &out)?;
    println!("{}", path.display());
    Ok(())
}

async fn main_aggregate(CmdAggregate { pipeline, details }: CmdAggregate) -> Result<()> {
    let instance = Instance::start_default(pipeline.settings());
    let (report, job) = instance.import_details(&details).await?;
    ensure_completed(&job)?;

    let aggregate = instance.aggregate(report)?;
    let encoded = serde_json::to_string_pretty(&aggregate).context("render aggregate")?;
    println!("{encoded}");
    Ok(())
}

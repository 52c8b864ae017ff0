//! Command-line interface for placejoin.
//!
//! Provides commands for running the pipeline over an extract, previewing
//! which stages would run, and showing the resolved configuration.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::adapters::{CommandReportGenerator, ToolExecutor};
use crate::config::{self, ResolvedConfig};
use crate::core::{newest_modification, CancelFlag, Driver, FsStore, RunOptions, StageError};
use crate::domain::{PlannedStage, RunReport, StageStatus};

/// placejoin - Incremental OSM place-in-boundary pipeline
#[derive(Parser, Debug)]
#[command(name = "placejoin")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to .placejoin/config.yaml in this or a parent directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build or refresh the join export for an extract
    Run {
        /// OSM extract (.osm.pbf, .osm.bz2, .osm)
        input: PathBuf,

        /// Directory for intermediate and final artifacts
        output_dir: Option<PathBuf>,

        /// Re-run every stage even if its output is up to date
        #[arg(short, long)]
        force: bool,

        /// Skip the report generator after the export
        #[arg(long)]
        no_report: bool,
    },

    /// Show which stages would run, without running them
    Plan {
        /// OSM extract (.osm.pbf, .osm.bz2, .osm)
        input: PathBuf,

        /// Directory for intermediate and final artifacts
        output_dir: Option<PathBuf>,

        /// Assume --force
        #[arg(short, long)]
        force: bool,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let cfg = config::load_config(self.config.as_deref())?;

        match self.command {
            Commands::Run {
                input,
                output_dir,
                force,
                no_report,
            } => {
                let options = RunOptions {
                    force,
                    skip_report: no_report,
                };
                run_pipeline(&cfg, &input, output_dir, &options).await
            }
            Commands::Plan {
                input,
                output_dir,
                force,
                json,
            } => show_plan(&cfg, &input, output_dir, force, json),
            Commands::Config => show_config(&cfg),
        }
    }
}

/// The first [`StageError`] in an error chain, if any
pub fn stage_error(error: &anyhow::Error) -> Option<&StageError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<StageError>())
}

/// Process exit code for a failed command
///
/// The first [`StageError`] in the chain decides; anything else is 1.
pub fn exit_code(error: &anyhow::Error) -> u8 {
    stage_error(error).map(StageError::exit_code).unwrap_or(1)
}

/// Command-line directory wins over the environment and config file
fn open_store(cfg: &ResolvedConfig, output_dir: Option<PathBuf>) -> Result<FsStore> {
    let dir = output_dir.unwrap_or_else(|| cfg.output_dir.clone());
    FsStore::open(&dir)
        .with_context(|| format!("Failed to create output directory: {}", dir.display()))
}

/// Newest of the executable, the config file and the settings stamp
fn definition_stamp(cfg: &ResolvedConfig, store: &FsStore) -> Result<Option<SystemTime>> {
    let mut paths = cfg.definition_paths();
    paths.push(cfg.record_settings(store.root())?);
    Ok(newest_modification(&paths))
}

async fn run_pipeline(
    cfg: &ResolvedConfig,
    input: &Path,
    output_dir: Option<PathBuf>,
    options: &RunOptions,
) -> Result<()> {
    let store = open_store(cfg, output_dir)?;
    let definition = definition_stamp(cfg, &store)?;

    let cancel = CancelFlag::new();
    cancel.listen_for_ctrl_c();

    let executor = ToolExecutor::from_config(cfg, cancel.clone());
    let reporter = CommandReportGenerator::new(cfg.tools.report.clone());

    let driver = Driver::new(&store, &executor)
        .with_reporter(&reporter)
        .with_filters(cfg.filters.clone())
        .with_definition(definition)
        .with_cancel(cancel);

    let report = driver.run(input, options).await?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &RunReport) {
    eprintln!();
    eprintln!("{:<22} {:<8} {:>10} {:>12}", "STAGE", "STATUS", "TIME", "ROWS");
    eprintln!("{}", "-".repeat(55));
    for outcome in &report.outcomes {
        let status = match outcome.status {
            StageStatus::Skipped => "fresh",
            StageStatus::Ran => "ran",
        };
        let time = outcome
            .duration_ms
            .map(|ms| format!("{:.1}s", ms as f64 / 1000.0))
            .unwrap_or_else(|| "-".to_string());
        let rows = outcome
            .rows
            .map(|r| r.to_string())
            .unwrap_or_else(|| "-".to_string());
        eprintln!("{:<22} {:<8} {:>10} {:>12}", outcome.stage, status, time, rows);
    }

    if report.is_noop() {
        eprintln!("\n[Run {}: everything up to date]", report.id);
    } else {
        eprintln!(
            "\n[Run {} completed: {} stage(s) executed]",
            report.id,
            report.executed().len()
        );
    }

    // The export path is the one line meant for scripts
    if let Some(export) = &report.export {
        println!("{}", export.display());
    }
}

fn show_plan(
    cfg: &ResolvedConfig,
    input: &Path,
    output_dir: Option<PathBuf>,
    force: bool,
    json: bool,
) -> Result<()> {
    let store = open_store(cfg, output_dir)?;
    let definition = definition_stamp(cfg, &store)?;
    let executor = ToolExecutor::from_config(cfg, CancelFlag::new());

    let driver = Driver::new(&store, &executor)
        .with_filters(cfg.filters.clone())
        .with_definition(definition);

    let plan = driver.plan(input, force)?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&plan).context("Failed to serialize plan")?
        );
    } else {
        print_plan(&plan);
    }
    Ok(())
}

fn print_plan(plan: &[PlannedStage]) {
    println!("{:<22} {:<6} {:<40}", "STAGE", "RUN", "REASON");
    println!("{}", "-".repeat(75));
    for planned in plan {
        let run = if planned.freshness.is_fresh() { "no" } else { "yes" };
        println!("{:<22} {:<6} {:<40}", planned.stage, run, planned.freshness);
    }
}

/// Show the resolved configuration (for debugging)
fn show_config(cfg: &ResolvedConfig) -> Result<()> {
    println!("placejoin configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!("Output dir:  {}", cfg.output_dir.display());
    println!();
    println!("Database:");
    println!("  Name: {}", cfg.database.name);
    if let Some(host) = &cfg.database.host {
        println!("  Host: {}", host);
    }
    if let Some(port) = cfg.database.port {
        println!("  Port: {}", port);
    }
    if let Some(user) = &cfg.database.user {
        println!("  User: {}", user);
    }
    println!();
    println!("Tools:");
    println!("  osmium:    {}", cfg.tools.osmium);
    println!("  osm2pgsql: {}", cfg.tools.osm2pgsql);
    println!("  psql:      {}", cfg.tools.psql);
    println!("  report:    {}", cfg.tools.report);
    println!();
    println!("Filters:");
    println!("  Places:     {}", cfg.filters.places.join(" "));
    println!("  Boundaries: {}", cfg.filters.boundaries.join(" "));
    println!();
    println!("Import:");
    if let Some(style) = &cfg.import.style {
        println!("  Style:      {}", style.display());
    }
    if let Some(cache) = cfg.import.cache_mb {
        println!("  Cache:      {} MB", cache);
    }
    if let Some(processes) = cfg.import.processes {
        println!("  Processes:  {}", processes);
    }
    if !cfg.import.extra_args.is_empty() {
        println!("  Extra args: {}", cfg.import.extra_args.join(" "));
    }

    Ok(())
}

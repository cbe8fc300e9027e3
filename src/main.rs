//! `wheel-repair` command-line entry point.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use wheel_repair::{Patchelf, Readelf, RepairConfig, RepairOptions, RepairPipeline};

/// Remove bundled libraries from a wheel, patch its shared objects and rebuild RECORD.
#[derive(Debug, Parser)]
#[command(name = "wheel-repair", version, about)]
struct Cli {
    /// Path to the wheel file to repair
    wheel: PathBuf,

    /// Configuration file (.json, .yaml or .yml)
    #[arg(long)]
    config: PathBuf,

    /// Output directory for the repaired wheel
    #[arg(short, long, default_value = "repaired_wheels")]
    output_dir: PathBuf,

    /// Report what would change without writing anything
    #[arg(long)]
    dry_run: bool,

    /// patchelf executable to use
    #[arg(long, default_value = "patchelf")]
    patchelf: PathBuf,

    /// readelf executable used for diagnostics dumps
    #[arg(long, default_value = "readelf")]
    readelf: PathBuf,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) -> Result<()> {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .try_init()
        .context("failed to install tracing subscriber")?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let config = RepairConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let pipeline = RepairPipeline::new(
        config,
        Patchelf::new(&cli.patchelf),
        Readelf::new(&cli.readelf),
        tracing::info_span!("repair"),
    );
    let options = RepairOptions::new(&cli.output_dir).dry_run(cli.dry_run);
    let outcome = pipeline
        .run(&cli.wheel, &options)
        .with_context(|| format!("repairing {}", cli.wheel.display()))?;

    let (removed, patched) = if outcome.dry_run {
        ("Would remove", "Would patch")
    } else {
        ("Removed", "Patched")
    };
    println!("{removed}:");
    for file in &outcome.removed {
        println!("  {file}");
    }
    println!("{patched}:");
    for file in &outcome.patched {
        println!("  {file}");
    }
    match &outcome.output {
        Some(output) => println!("Repaired wheel saved as: {}", output.display()),
        None => println!("Dry run completed. No changes were made."),
    }
    Ok(())
}

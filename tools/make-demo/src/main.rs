//! Demo Artifact CLI Tool
//!
//! Writes an untrained tiny classifier artifact so the inference side can be
//! exercised without a training run.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use noma_core::{cpu_device, setup_cli_logging, CpuBackend};
use noma_training::make_demo_artifact;

/// Noma screening demo artifact tool
#[derive(Parser, Debug)]
#[command(name = "noma-make-demo", about = "Create an untrained demo classifier artifact")]
struct Args {
    /// Comma-separated class labels, at least two
    #[arg(long, default_value = "normal,noma")]
    classes: String,

    /// Output artifact path (.nomamodel)
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    #[arg(long, value_name = "PX", default_value_t = 224)]
    image_size: usize,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();
    if let Err(err) = run(args) {
        eprintln!("{} {err:#}", "Demo export failed:".red().bold());
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    setup_cli_logging(args.verbose)?;

    make_demo_artifact::<CpuBackend>(&args.classes, args.image_size, &args.output, &cpu_device())
        .context("Failed to create the demo artifact")?;

    println!(
        "{} demo artifact to {}",
        "Saved".green().bold(),
        args.output.display()
    );
    Ok(())
}

//! Export CLI Tool
//!
//! Converts a training checkpoint into a classifier artifact, using the class
//! order from the mapping written at the end of training.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use noma_core::{cpu_device, setup_cli_logging, Backbone, ClassCatalog, CpuBackend};
use noma_training::{ExportConverter, ExportOptions};
use tracing::info;

/// Noma screening classifier export tool
#[derive(Parser, Debug)]
#[command(name = "noma-export", about = "Export a trained checkpoint as a classifier artifact")]
struct Args {
    /// Checkpoint written by noma-train (model_best.ckpt)
    #[arg(long, value_name = "FILE")]
    checkpoint: PathBuf,

    /// Class mapping written by noma-train (class_index_to_label.json)
    #[arg(long, value_name = "FILE")]
    class_map: PathBuf,

    /// Output artifact path (.nomamodel)
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    /// Input edge size; defaults to the size the checkpoint was trained at
    #[arg(long, value_name = "PX")]
    image_size: Option<usize>,

    /// Backbone identifier; must match the checkpoint when given
    #[arg(long, value_name = "NAME")]
    backbone: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();
    if let Err(err) = run(args) {
        eprintln!("{} {err:#}", "Export failed:".red().bold());
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    setup_cli_logging(args.verbose)?;

    let catalog = ClassCatalog::read_index_map(&args.class_map)
        .context("Failed to load the class mapping")?;
    info!("Classes: {}", catalog.names().join(", "));

    let options = ExportOptions {
        image_size: args.image_size,
        backbone: args.backbone.as_deref().map(str::parse::<Backbone>).transpose()?,
    };

    let manifest = ExportConverter::<CpuBackend>::new(cpu_device())
        .export_checkpoint(&args.checkpoint, &catalog, &args.output, &options)
        .with_context(|| format!("Failed to export {}", args.checkpoint.display()))?;

    println!(
        "{} {} ({} classes, input {}x{})",
        "Saved".green().bold(),
        args.output.display(),
        catalog.len(),
        manifest.input.shape[2],
        manifest.input.shape[3]
    );
    Ok(())
}

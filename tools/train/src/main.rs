//! Training CLI Tool
//!
//! Trains the noma screening classifier from an image folder dataset. Settings
//! come from defaults, an optional TOML file and command-line overrides, in
//! that order.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use noma_core::{
    cpu_device, ensure_device_supported, load_toml_config, setup_cli_logging, Autodiff,
    CpuBackend, DeviceType, TrainingConfiguration,
};
use noma_training::{Trainer, TrainingSummary};
use tracing::info;

/// Noma screening classifier training tool
#[derive(Parser, Debug)]
#[command(
    name = "noma-train",
    about = "Train the noma screening classifier",
    long_about = "Train the noma screening classifier on a folder-per-class image dataset. \
                  Writes model_best.ckpt, metrics.json and class_index_to_label.json."
)]
struct Args {
    /// Training configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Dataset root (class folders, optionally under train/ and val/)
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Output directory for the checkpoint, metrics and class map
    #[arg(short, long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    #[arg(long, value_name = "PX")]
    image_size: Option<usize>,

    #[arg(short, long, value_name = "SIZE")]
    batch_size: Option<usize>,

    #[arg(short, long, value_name = "N")]
    epochs: Option<usize>,

    #[arg(short, long, value_name = "LR")]
    lr: Option<f64>,

    #[arg(long, value_name = "WD")]
    weight_decay: Option<f64>,

    /// Backbone identifier (mobilenet_v3_small, tiny_demo)
    #[arg(long, value_name = "NAME")]
    backbone: Option<String>,

    /// Compute device (cpu, cuda, cuda:N)
    #[arg(long, value_name = "DEVICE")]
    device: Option<String>,

    #[arg(long)]
    seed: Option<u64>,

    /// Image decoding threads
    #[arg(long, value_name = "N")]
    num_workers: Option<usize>,

    /// Backbone weights to start from (burn record file)
    #[arg(long, value_name = "FILE")]
    pretrained: Option<PathBuf>,

    /// Show progress bars
    #[arg(long)]
    progress: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();
    if let Err(err) = run(args) {
        eprintln!("{} {err:#}", "Training failed:".red().bold());
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    setup_cli_logging(args.verbose)?;

    let mut config = match &args.config {
        Some(path) => load_toml_config::<TrainingConfiguration>(path)
            .with_context(|| format!("Failed to load configuration file {}", path.display()))?,
        None => TrainingConfiguration::default(),
    };
    apply_overrides(&mut config, &args)?;
    config.validate().context("Invalid training configuration")?;
    ensure_device_supported(config.device)?;

    print_config_summary(&config);

    let summary = train(config)?;
    print_summary(&summary);
    Ok(())
}

fn apply_overrides(config: &mut TrainingConfiguration, args: &Args) -> Result<()> {
    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(size) = args.image_size {
        config.image_size = size;
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(epochs) = args.epochs {
        config.epochs = epochs;
    }
    if let Some(lr) = args.lr {
        config.learning_rate = lr;
    }
    if let Some(wd) = args.weight_decay {
        config.weight_decay = wd;
    }
    if let Some(name) = &args.backbone {
        config.backbone = name.parse()?;
    }
    if let Some(device) = &args.device {
        config.device = device.parse()?;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(workers) = args.num_workers {
        config.num_workers = workers;
    }
    if let Some(path) = &args.pretrained {
        config.pretrained_weights = Some(path.clone());
    }
    if args.progress {
        config.progress = true;
    }
    Ok(())
}

fn train(config: TrainingConfiguration) -> noma_core::Result<TrainingSummary> {
    match config.device {
        DeviceType::Cpu => Trainer::<Autodiff<CpuBackend>>::new(config, cpu_device())?.run(),
        #[cfg(feature = "cuda")]
        DeviceType::Cuda(index) => {
            use noma_core::{cuda_device, CudaBackend};
            Trainer::<Autodiff<CudaBackend>>::new(config, cuda_device(index))?.run()
        }
        #[cfg(not(feature = "cuda"))]
        device @ DeviceType::Cuda(_) => Err(noma_core::Error::Config(format!(
            "device '{device}' needs a build with the `cuda` feature"
        ))),
    }
}

fn print_config_summary(config: &TrainingConfiguration) {
    info!("Noma screening classifier - training");
    info!("  Data:         {}", config.data_dir.display());
    info!("  Output:       {}", config.output_dir.display());
    info!("  Backbone:     {}", config.backbone);
    info!("  Device:       {}", config.device);
    info!("  Image size:   {}", config.image_size);
    info!("  Batch size:   {}", config.batch_size);
    info!("  Epochs:       {}", config.epochs);
    info!("  LR / WD:      {} / {}", config.learning_rate, config.weight_decay);
    info!("  Seed:         {}", config.seed);
}

fn print_summary(summary: &TrainingSummary) {
    println!();
    println!("{}", "Training complete".green().bold());
    println!(
        "  Best val accuracy: {:.2}% (epoch {})",
        summary.best_accuracy * 100.0,
        summary.best_epoch
    );
    println!("  Checkpoint: {}", summary.checkpoint_path.display());
    println!("  Metrics:    {}", summary.metrics_path.display());
    println!("  Class map:  {}", summary.class_map_path.display());
    println!();
    println!("{}", "Next step:".cyan().bold());
    println!(
        "  noma-export --checkpoint {} --class-map {} --output NomaClassifier.nomamodel",
        summary.checkpoint_path.display(),
        summary.class_map_path.display()
    );
}

//! Training configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{Backbone, DeviceType};

/// Immutable description of one training run.
///
/// Built once from defaults, an optional TOML file and command-line
/// overrides, then validated and passed by reference everywhere.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrainingConfiguration {
    /// Dataset root (class folders, optionally under `train/` and `val/`)
    pub data_dir: PathBuf,
    /// Directory receiving the checkpoint, metrics and class map
    pub output_dir: PathBuf,
    /// Square edge size of network inputs
    pub image_size: usize,
    pub batch_size: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    /// Decoupled weight decay for AdamW
    pub weight_decay: f64,
    pub backbone: Backbone,
    pub device: DeviceType,
    pub seed: u64,
    /// Image decoding threads
    pub num_workers: usize,
    /// Batches decoded ahead of the training step
    pub prefetch_batches: usize,
    /// Burn record with backbone weights to start from
    pub pretrained_weights: Option<PathBuf>,
    /// Render progress bars while training
    pub progress: bool,
}

impl Default for TrainingConfiguration {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            output_dir: PathBuf::from("artifacts"),
            image_size: 224,
            batch_size: 32,
            epochs: 12,
            learning_rate: 3e-4,
            weight_decay: 1e-4,
            backbone: Backbone::MobileNetV3Small,
            device: DeviceType::Cpu,
            seed: 42,
            num_workers: 4,
            prefetch_batches: 2,
            pretrained_weights: None,
            progress: false,
        }
    }
}

impl TrainingConfiguration {
    pub const MIN_IMAGE_SIZE: usize = 8;

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".into()));
        }
        if self.epochs == 0 {
            return Err(Error::Config("epochs must be at least 1".into()));
        }
        if self.image_size < Self::MIN_IMAGE_SIZE {
            return Err(Error::Config(format!(
                "image_size must be at least {}, got {}",
                Self::MIN_IMAGE_SIZE,
                self.image_size
            )));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Error::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(self.weight_decay.is_finite() && self.weight_decay >= 0.0) {
            return Err(Error::Config(format!(
                "weight_decay must be non-negative, got {}",
                self.weight_decay
            )));
        }
        if self.prefetch_batches == 0 {
            return Err(Error::Config("prefetch_batches must be at least 1".into()));
        }
        Ok(())
    }

    /// Loader threads, never less than one.
    pub fn worker_threads(&self) -> usize {
        self.num_workers.max(1)
    }
}

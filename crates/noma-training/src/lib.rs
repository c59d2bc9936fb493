//! Training and export of the noma screening classifier.
//!
//! This crate provides:
//! - MobileNet-V3 Small and a tiny demo backbone behind one classifier type
//! - Class-weighted loss and a cosine learning rate schedule
//! - The epoch loop with validation and best-model checkpointing
//! - Conversion of checkpoints into portable classifier artifacts

pub mod checkpoint;
pub mod demo;
pub mod evaluator;
pub mod export;
pub mod loss;
pub mod lr_schedule;
pub mod mobilenet;
pub mod model;
pub mod trainer;

pub use checkpoint::{
    load_checkpoint, CheckpointFile, CheckpointManager, CheckpointMetadata, CheckpointState,
    BEST_CHECKPOINT_FILE,
};
pub use demo::make_demo_artifact;
pub use evaluator::{EvaluationResult, Evaluator};
pub use export::{
    ArtifactDescription, ArtifactManifest, ExportConverter, ExportOptions, ExportedArtifact,
    OutputMode, Prediction, ARTIFACT_EXTENSION,
};
pub use loss::ClassWeightedLoss;
pub use lr_schedule::CosineAnnealingScheduler;
pub use mobilenet::MobileNetV3Small;
pub use model::{BackboneNet, ClassifierBuilder, NomaClassifier, TinyDemoNet, MIN_CLASSES};
pub use trainer::{Trainer, TrainerState, TrainingSummary};

/// Re-export commonly used types
pub mod prelude {
    pub use super::checkpoint::{CheckpointFile, CheckpointManager};
    pub use super::export::{ExportConverter, ExportOptions, ExportedArtifact};
    pub use super::model::{ClassifierBuilder, NomaClassifier};
    pub use super::trainer::{Trainer, TrainingSummary};
    pub use noma_core::prelude::*;
}

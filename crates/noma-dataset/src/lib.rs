//! Dataset preparation for noma screening.
//!
//! This crate provides:
//! - Image folder discovery with optional `train/` and `val/` splits
//! - Training (augmenting) and evaluation (deterministic) pipelines
//! - Inverse-frequency class weights and the weighted sampler
//! - Burn batching with a prefetching, parallel batch loader

pub mod dataset;
pub mod loader;
pub mod preparer;
pub mod sampler;
pub mod transforms;

pub use dataset::{BatchLoader, NomaBatch, NomaBatcher, NomaItem, TrainingSet, ValidationSet};
pub use loader::{load_image, ImageFolder, IMAGE_EXTENSIONS};
pub use preparer::{DatasetLayout, DatasetPreparer, PreparedData};
pub use sampler::{class_counts, ImbalanceSampler, SampleWeightTable};
pub use transforms::{AugmentationConfig, EvalTransform, TrainTransform};

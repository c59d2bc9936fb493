//! Best-model checkpointing and the other per-run output files.
//!
//! The checkpoint is a package (see `noma_core::package`) whose header holds
//! the metadata needed to rebuild the network and whose payload is the burn
//! record encoded with `BinBytesRecorder` at full precision.

use std::fs;
use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::backend::Backend,
};
use chrono::Utc;
use noma_core::{
    atomic_write_json, read_package, write_package, Backbone, ClassCatalog, EpochMetrics, Error,
    PackageKind, Result, CLASS_MAP_FILE, METRICS_FILE,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::model::{ClassifierBuilder, NomaClassifier};

/// File name of the best checkpoint inside the output directory.
pub const BEST_CHECKPOINT_FILE: &str = "model_best.ckpt";

type RecordCodec = BinBytesRecorder<FullPrecisionSettings>;

/// Encode a model's parameters.
pub(crate) fn encode_record<B: Backend>(model: NomaClassifier<B>) -> Result<Vec<u8>> {
    let recorder = RecordCodec::default();
    <RecordCodec as Recorder<B>>::record(&recorder, model.into_record(), ())
        .map_err(|e| Error::Model(format!("failed to encode model record: {e:?}")))
}

/// Load encoded parameters into `model`, which must have the same topology.
pub(crate) fn decode_record<B: Backend>(
    model: NomaClassifier<B>,
    bytes: Vec<u8>,
    device: &B::Device,
) -> std::result::Result<NomaClassifier<B>, String> {
    let recorder = RecordCodec::default();
    let record = <RecordCodec as Recorder<B>>::load(&recorder, bytes, device)
        .map_err(|e| format!("parameter record does not match the network: {e:?}"))?;
    Ok(model.load_record(record))
}

/// Header of a checkpoint file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// 1-based epoch the parameters were captured at
    pub epoch: usize,
    pub backbone: Backbone,
    pub class_names: Vec<String>,
    pub image_size: usize,
    pub val_acc: f64,
    pub created_at: String,
}

/// Borrowed view of what a checkpoint captures.
pub struct CheckpointState<'a, B: Backend> {
    pub epoch: usize,
    pub model: &'a NomaClassifier<B>,
    pub catalog: &'a ClassCatalog,
    pub image_size: usize,
}

/// Owns the output directory of a training run.
#[derive(Debug)]
pub struct CheckpointManager {
    output_dir: PathBuf,
    best_accuracy: Option<f64>,
}

impl CheckpointManager {
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self> {
        let output_dir = output_dir.into();
        fs::create_dir_all(&output_dir)?;
        Ok(Self {
            output_dir,
            best_accuracy: None,
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.output_dir.join(BEST_CHECKPOINT_FILE)
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.output_dir.join(METRICS_FILE)
    }

    pub fn class_map_path(&self) -> PathBuf {
        self.output_dir.join(CLASS_MAP_FILE)
    }

    /// Best validation accuracy saved so far, `None` before the first save.
    pub fn best_accuracy(&self) -> Option<f64> {
        self.best_accuracy
    }

    /// Replace the best checkpoint iff `accuracy` is strictly above the best
    /// seen. The first call always saves.
    pub fn save_if_best<B: Backend>(
        &mut self,
        accuracy: f64,
        state: CheckpointState<'_, B>,
    ) -> Result<bool> {
        if self.best_accuracy.is_some_and(|best| accuracy <= best) {
            debug!(
                "Validation accuracy {accuracy:.4} does not beat {:.4}, keeping checkpoint",
                self.best_accuracy.unwrap_or_default()
            );
            return Ok(false);
        }

        let metadata = CheckpointMetadata {
            epoch: state.epoch,
            backbone: state.model.backbone(),
            class_names: state.catalog.names().to_vec(),
            image_size: state.image_size,
            val_acc: accuracy,
            created_at: Utc::now().to_rfc3339(),
        };
        let payload = encode_record(state.model.clone())?;
        let path = self.checkpoint_path();
        write_package(&path, PackageKind::Checkpoint, &metadata, &payload)?;

        self.best_accuracy = Some(accuracy);
        info!(
            "Saved new best checkpoint (epoch {}, val_acc {accuracy:.4}) to {}",
            state.epoch,
            path.display()
        );
        Ok(true)
    }

    /// Overwrite the metrics file with this epoch's record.
    pub fn write_metrics(&self, record: &EpochMetrics) -> Result<()> {
        atomic_write_json(&self.metrics_path(), record)
    }

    /// Write the index-to-label mapping. Called once, after training.
    pub fn write_class_mapping(&self, catalog: &ClassCatalog) -> Result<PathBuf> {
        let path = self.class_map_path();
        catalog.write_index_map(&path)?;
        info!("Wrote class mapping to {}", path.display());
        Ok(path)
    }
}

/// A checkpoint read back from disk.
#[derive(Debug, Clone)]
pub struct CheckpointFile {
    path: PathBuf,
    metadata: CheckpointMetadata,
    record: Vec<u8>,
}

impl CheckpointFile {
    pub fn read(path: &Path) -> Result<Self> {
        let (metadata, record): (CheckpointMetadata, Vec<u8>) =
            read_package(path, PackageKind::Checkpoint)?;
        if metadata.class_names.is_empty() {
            return Err(Error::checkpoint(path, "checkpoint lists no classes"));
        }
        Ok(Self {
            path: path.to_path_buf(),
            metadata,
            record,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> &CheckpointMetadata {
        &self.metadata
    }

    /// Build `builder`'s network and load the stored parameters into it.
    pub fn restore_into<B: Backend>(
        &self,
        builder: &ClassifierBuilder,
        device: &B::Device,
    ) -> Result<NomaClassifier<B>> {
        if builder.backbone() != self.metadata.backbone {
            return Err(Error::Config(format!(
                "backbone '{}' does not match the checkpoint's '{}'",
                builder.backbone(),
                self.metadata.backbone
            )));
        }
        let model = builder.build::<B>(device)?;
        decode_record(model, self.record.clone(), device)
            .map_err(|reason| Error::checkpoint(&self.path, reason))
    }
}

/// Rebuild the network a checkpoint was saved from, with its parameters.
pub fn load_checkpoint<B: Backend>(
    path: &Path,
    device: &B::Device,
) -> Result<(NomaClassifier<B>, CheckpointMetadata)> {
    let checkpoint = CheckpointFile::read(path)?;
    let metadata = checkpoint.metadata().clone();
    let builder = ClassifierBuilder::new(metadata.backbone, metadata.class_names.len());
    let model = checkpoint.restore_into::<B>(&builder, device)?;
    Ok((model, metadata))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Tensor;
    use burn_ndarray::NdArray;
    use noma_core::{ClassificationReport, ConfusionMatrix};
    use tempfile::TempDir;

    type TestBackend = NdArray<f32>;

    fn catalog() -> ClassCatalog {
        ClassCatalog::new(vec!["noma".into(), "normal".into()]).unwrap()
    }

    fn model() -> NomaClassifier<TestBackend> {
        ClassifierBuilder::new(Backbone::TinyDemo, 2)
            .build(&Default::default())
            .unwrap()
    }

    fn state<'a>(
        epoch: usize,
        model: &'a NomaClassifier<TestBackend>,
        catalog: &'a ClassCatalog,
    ) -> CheckpointState<'a, TestBackend> {
        CheckpointState {
            epoch,
            model,
            catalog,
            image_size: 16,
        }
    }

    #[test]
    fn test_first_epoch_always_saves() {
        let temp = TempDir::new().unwrap();
        let mut manager = CheckpointManager::new(temp.path()).unwrap();
        let (model, catalog) = (model(), catalog());

        assert!(manager.save_if_best(0.0, state(1, &model, &catalog)).unwrap());
        assert!(manager.checkpoint_path().exists());
        assert_eq!(manager.best_accuracy(), Some(0.0));
    }

    #[test]
    fn test_replaces_only_on_strict_improvement() {
        let temp = TempDir::new().unwrap();
        let mut manager = CheckpointManager::new(temp.path()).unwrap();
        let (model, catalog) = (model(), catalog());

        assert!(manager.save_if_best(0.6, state(1, &model, &catalog)).unwrap());
        assert!(!manager.save_if_best(0.6, state(2, &model, &catalog)).unwrap());
        assert!(!manager.save_if_best(0.5, state(3, &model, &catalog)).unwrap());
        assert!(manager.save_if_best(0.7, state(4, &model, &catalog)).unwrap());

        let checkpoint = CheckpointFile::read(&manager.checkpoint_path()).unwrap();
        assert_eq!(checkpoint.metadata().epoch, 4);
        assert_eq!(checkpoint.metadata().val_acc, 0.7);
        assert_eq!(manager.best_accuracy(), Some(0.7));
    }

    #[test]
    fn test_restored_model_matches_saved() {
        let temp = TempDir::new().unwrap();
        let mut manager = CheckpointManager::new(temp.path()).unwrap();
        let (model, catalog) = (model(), catalog());
        manager.save_if_best(0.9, state(2, &model, &catalog)).unwrap();

        let device = Default::default();
        let (restored, metadata) =
            load_checkpoint::<TestBackend>(&manager.checkpoint_path(), &device).unwrap();

        assert_eq!(metadata.class_names, catalog.names());
        assert_eq!(metadata.backbone, Backbone::TinyDemo);
        assert_eq!(metadata.image_size, 16);

        let input = Tensor::<TestBackend, 4>::ones([1, 3, 4, 4], &device);
        let expected: Vec<f32> = model.forward(input.clone()).into_data().to_vec().unwrap();
        let actual: Vec<f32> = restored.forward(input).into_data().to_vec().unwrap();
        assert_eq!(expected, actual);
    }

    #[test]
    fn test_truncated_checkpoint_is_malformed() {
        let temp = TempDir::new().unwrap();
        let mut manager = CheckpointManager::new(temp.path()).unwrap();
        let (model, catalog) = (model(), catalog());
        manager.save_if_best(0.5, state(1, &model, &catalog)).unwrap();

        let path = manager.checkpoint_path();
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 7]).unwrap();

        let err = CheckpointFile::read(&path).unwrap_err();
        assert!(matches!(err, Error::Checkpoint { .. }));
    }

    #[test]
    fn test_missing_checkpoint_is_checkpoint_error() {
        let temp = TempDir::new().unwrap();
        let err = CheckpointFile::read(&temp.path().join("nope.ckpt")).unwrap_err();
        assert!(matches!(err, Error::Checkpoint { .. }));
    }

    #[test]
    fn test_wrong_topology_rejected() {
        let temp = TempDir::new().unwrap();
        let mut manager = CheckpointManager::new(temp.path()).unwrap();
        let (model, catalog) = (model(), catalog());
        manager.save_if_best(0.5, state(1, &model, &catalog)).unwrap();

        let checkpoint = CheckpointFile::read(&manager.checkpoint_path()).unwrap();
        let err = checkpoint
            .restore_into::<TestBackend>(
                &ClassifierBuilder::new(Backbone::MobileNetV3Small, 2),
                &Default::default(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_metrics_overwritten_each_epoch() {
        let temp = TempDir::new().unwrap();
        let manager = CheckpointManager::new(temp.path()).unwrap();
        let matrix = ConfusionMatrix::from_predictions(2, &[0, 1], &[0, 0]);
        let mut record = EpochMetrics {
            epoch: 1,
            train_loss: 0.7,
            train_acc: 0.5,
            val_loss: 0.69,
            val_acc: 0.5,
            val_report: ClassificationReport::from_confusion_matrix(&matrix),
            val_confusion_matrix: matrix,
            class_names: catalog().names().to_vec(),
        };

        manager.write_metrics(&record).unwrap();
        record.epoch = 2;
        manager.write_metrics(&record).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(manager.metrics_path()).unwrap()).unwrap();
        assert_eq!(value["epoch"], 2);
        assert_eq!(value["val_confusion_matrix"], serde_json::json!([[1, 0], [1, 0]]));
        assert!(value["val_report"]["macro avg"]["f1-score"].is_number());
    }

    #[test]
    fn test_class_mapping_written() {
        let temp = TempDir::new().unwrap();
        let manager = CheckpointManager::new(temp.path().join("nested")).unwrap();
        let path = manager.write_class_mapping(&catalog()).unwrap();

        assert_eq!(ClassCatalog::read_index_map(&path).unwrap(), catalog());
    }
}

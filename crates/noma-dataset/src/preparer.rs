//! Dataset preparation: split resolution, discovery and pipeline assembly.

use std::path::{Path, PathBuf};

use noma_core::{
    ClassCatalog, DataSplit, Error, ReproducibilityController, Result, TrainingConfiguration,
};
use tracing::{info, warn};

use crate::dataset::{TrainingSet, ValidationSet};
use crate::loader::ImageFolder;
use crate::transforms::{EvalTransform, TrainTransform};

/// Where the train and validation images come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetLayout {
    pub train_dir: PathBuf,
    pub val_dir: PathBuf,
}

impl DatasetLayout {
    /// Use `root/train` and `root/val` when present; each missing split
    /// falls back to `root` itself.
    pub fn resolve(root: &Path) -> Self {
        let split_dir = |split: DataSplit| {
            let candidate = root.join(split.to_string());
            if candidate.is_dir() {
                candidate
            } else {
                warn!(
                    "No '{split}' directory under {}, using the dataset root for {split}",
                    root.display()
                );
                root.to_path_buf()
            }
        };

        Self {
            train_dir: split_dir(DataSplit::Train),
            val_dir: split_dir(DataSplit::Validation),
        }
    }

    /// Both splits read the same images.
    pub fn is_degenerate(&self) -> bool {
        self.train_dir == self.val_dir
    }
}

/// Output of [`DatasetPreparer::prepare`].
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub layout: DatasetLayout,
    pub catalog: ClassCatalog,
    pub train: TrainingSet,
    pub val: ValidationSet,
    /// Training images per class, indexed like the catalog
    pub class_counts: Vec<usize>,
}

/// Discovers labeled images and attaches the training and validation
/// pipelines.
#[derive(Debug, Clone)]
pub struct DatasetPreparer {
    data_dir: PathBuf,
    image_size: usize,
    controller: ReproducibilityController,
}

impl DatasetPreparer {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        image_size: usize,
        controller: ReproducibilityController,
    ) -> Self {
        Self {
            data_dir: data_dir.into(),
            image_size,
            controller,
        }
    }

    pub fn from_config(
        config: &TrainingConfiguration,
        controller: ReproducibilityController,
    ) -> Self {
        Self::new(config.data_dir.clone(), config.image_size, controller)
    }

    pub fn prepare(&self) -> Result<PreparedData> {
        let layout = DatasetLayout::resolve(&self.data_dir);
        if layout.is_degenerate() {
            warn!("Validation uses the training images; metrics will be optimistic");
        }

        let train_folder = ImageFolder::discover(&layout.train_dir)?;
        let val_folder = ImageFolder::discover(&layout.val_dir)?;

        if train_folder.catalog() != val_folder.catalog() {
            return Err(Error::DataDiscovery(format!(
                "train classes [{}] differ from val classes [{}]",
                train_folder.catalog().names().join(", "),
                val_folder.catalog().names().join(", ")
            )));
        }

        let catalog = train_folder.catalog().clone();
        let class_counts = train_folder.class_counts();
        for (name, count) in catalog.names().iter().zip(&class_counts) {
            info!("  {name}: {count} training images");
        }

        Ok(PreparedData {
            layout,
            catalog,
            train: TrainingSet::new(
                train_folder,
                TrainTransform::new(self.image_size),
                self.controller,
            ),
            val: ValidationSet::new(val_folder, EvalTransform::new(self.image_size)),
            class_counts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::test_support::write_class;
    use tempfile::TempDir;

    fn preparer(root: &Path) -> DatasetPreparer {
        DatasetPreparer::new(root, 16, ReproducibilityController::new(42))
    }

    #[test]
    fn test_split_layout() {
        let temp = TempDir::new().unwrap();
        write_class(&temp.path().join("train"), "noma", 2, 0);
        write_class(&temp.path().join("train"), "normal", 5, 0);
        write_class(&temp.path().join("val"), "noma", 1, 0);
        write_class(&temp.path().join("val"), "normal", 1, 0);

        let data = preparer(temp.path()).prepare().unwrap();

        assert!(!data.layout.is_degenerate());
        assert_eq!(data.catalog.names(), &["noma".to_string(), "normal".to_string()]);
        assert_eq!(data.class_counts, vec![2, 5]);
        assert_eq!(data.train.len(), 7);
        assert_eq!(data.val.len(), 2);
    }

    #[test]
    fn test_fallback_uses_same_root() {
        let temp = TempDir::new().unwrap();
        write_class(temp.path(), "normal", 4, 0);
        write_class(temp.path(), "noma", 1, 0);

        let data = preparer(temp.path()).prepare().unwrap();

        assert!(data.layout.is_degenerate());
        assert_eq!(data.layout.train_dir, temp.path());
        assert_eq!(data.train.len(), data.val.len());
        assert_eq!(data.train.folder().samples(), data.val.folder().samples());
    }

    #[test]
    fn test_mismatched_catalogs_rejected() {
        let temp = TempDir::new().unwrap();
        write_class(&temp.path().join("train"), "noma", 1, 0);
        write_class(&temp.path().join("train"), "normal", 1, 0);
        write_class(&temp.path().join("val"), "normal", 1, 0);

        let err = preparer(temp.path()).prepare().unwrap_err();
        assert!(matches!(err, Error::DataDiscovery(_)));
    }
}

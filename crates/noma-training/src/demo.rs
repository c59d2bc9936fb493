//! Untrained demo artifacts for exercising the inference side without a
//! training run.

use std::path::Path;

use burn::tensor::backend::Backend;
use noma_core::{Backbone, ClassCatalog, Result};
use tracing::info;

use crate::export::{ArtifactDescription, ArtifactManifest, ExportConverter};
use crate::model::{ClassifierBuilder, MIN_CLASSES};

/// Build a tiny demo network for `classes` (comma-separated) and export it in
/// raw mode. The class list is validated before anything is written.
pub fn make_demo_artifact<B: Backend>(
    classes: &str,
    image_size: usize,
    output: &Path,
    device: &B::Device,
) -> Result<ArtifactManifest> {
    let catalog = ClassCatalog::from_comma_list(classes)?;
    catalog.require_at_least(MIN_CLASSES)?;

    let model = ClassifierBuilder::new(Backbone::TinyDemo, catalog.len())
        .with_image_size(image_size)
        .build::<B>(device)?;
    info!(
        "Demo classifier for [{}] at {image_size}x{image_size}",
        catalog.names().join(", ")
    );

    ExportConverter::<B>::new(device.clone()).export_model(
        model,
        &catalog,
        output,
        image_size,
        &ArtifactDescription::demo(image_size),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use noma_core::Error;
    use tempfile::TempDir;

    use crate::export::{ExportedArtifact, OutputMode};

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_demo_artifact() {
        let temp = TempDir::new().unwrap();
        let output = temp.path().join("demo/NomaDemo.nomamodel");

        let manifest =
            make_demo_artifact::<TestBackend>(" normal , noma ,", 32, &output, &Default::default())
                .unwrap();

        assert_eq!(manifest.mode(), OutputMode::Raw);
        assert_eq!(
            manifest.short_description,
            "Tiny demo classifier for demos. Not a medical device."
        );
        assert_eq!(manifest.input.description, "Input 32x32 RGB image");
        assert_eq!(manifest.backbone, Backbone::TinyDemo);

        let artifact = ExportedArtifact::read(&output).unwrap();
        assert_eq!(artifact.classes().unwrap(), vec!["normal", "noma"]);
    }

    #[test]
    fn test_single_class_writes_nothing() {
        let temp = TempDir::new().unwrap();
        let output = temp.path().join("out/demo.nomamodel");

        let err = make_demo_artifact::<TestBackend>("a", 32, &output, &Default::default())
            .unwrap_err();

        assert!(matches!(err, Error::Config(_)));
        assert!(!temp.path().join("out").exists());
    }
}

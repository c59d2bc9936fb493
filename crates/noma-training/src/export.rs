//! Conversion of trained checkpoints into portable classifier artifacts.
//!
//! An artifact is a package whose header is an [`ArtifactManifest`] and whose
//! payload is the network's parameter record. The manifest describes the
//! image input the network expects, its outputs, the class list and the
//! shapes observed when the network was traced.
//!
//! Tracing runs one forward pass with a random example input on an inference
//! backend and records the output shape. Only the path taken by that example
//! is exercised, so networks must not branch on input data. Both supported
//! backbones satisfy this.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use burn::tensor::{activation::softmax, backend::Backend, Distribution, Tensor, TensorData};
use chrono::Utc;
use image::{imageops::FilterType, DynamicImage};
use noma_core::{
    read_package, write_package, Backbone, ClassCatalog, Error, PackageKind, Result,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::checkpoint::{decode_record, encode_record, CheckpointFile};
use crate::model::{ClassifierBuilder, NomaClassifier, MIN_CLASSES};

pub const ARTIFACT_FORMAT: &str = "noma-classifier";
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;
/// Conventional file extension of exported artifacts.
pub const ARTIFACT_EXTENSION: &str = "nomamodel";
pub const INPUT_NAME: &str = "image";
pub const MINIMUM_DEPLOYMENT_TARGET: &str = "iOS17";
/// Metadata key holding the JSON-encoded class list.
pub const CLASSES_METADATA_KEY: &str = "classes";

pub const CLASS_LABEL_OUTPUT: &str = "classLabel";
pub const CLASS_PROBS_OUTPUT: &str = "classLabelProbs";
pub const LOGITS_OUTPUT: &str = "logits";

/// Whether the artifact presents labeled predictions or raw logits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    Classifier,
    Raw,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputDescriptor {
    pub name: String,
    pub kind: String,
    pub color_layout: String,
    /// `[1, 3, edge, edge]`
    pub shape: [usize; 4],
    /// Pixel multiplier applied to 8-bit channel values
    pub scale: f32,
    /// Per-channel offset added after scaling
    pub bias: [f32; 3],
    pub description: String,
}

impl InputDescriptor {
    fn image(image_size: usize, description: String) -> Self {
        Self {
            name: INPUT_NAME.to_string(),
            kind: "image".to_string(),
            color_layout: "RGB".to_string(),
            shape: [1, 3, image_size, image_size],
            scale: 1.0 / 255.0,
            bias: [0.0; 3],
            description,
        }
    }

    /// Resize `image` to the declared edge and apply scale and bias, giving a
    /// `[1, 3, edge, edge]` tensor in CHW layout.
    pub fn to_tensor<B: Backend>(&self, image: &DynamicImage, device: &B::Device) -> Tensor<B, 4> {
        let [_, channels, height, width] = self.shape;
        let rgb = image
            .resize_exact(width as u32, height as u32, FilterType::Lanczos3)
            .to_rgb8();

        let plane = width * height;
        let mut data = vec![0.0f32; channels * plane];
        for (i, pixel) in rgb.pixels().enumerate() {
            for c in 0..channels {
                data[c * plane + i] = pixel[c] as f32 * self.scale + self.bias[c];
            }
        }

        Tensor::from_floats(TensorData::new(data, [1, channels, height, width]), device)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDescriptor {
    pub name: String,
    pub kind: String,
    pub description: String,
}

impl OutputDescriptor {
    fn new(name: &str, kind: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            description: description.to_string(),
        }
    }
}

/// Present in classifier mode only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierDescriptor {
    pub class_labels: Vec<String>,
    pub predicted_feature_name: String,
    pub predicted_probabilities_output: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub example_input_shape: [usize; 4],
    pub output_shape: Vec<usize>,
}

/// Header of an exported artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub format: String,
    pub format_version: u32,
    pub backbone: Backbone,
    pub short_description: String,
    pub minimum_deployment_target: String,
    pub input: InputDescriptor,
    pub outputs: Vec<OutputDescriptor>,
    pub classifier: Option<ClassifierDescriptor>,
    pub metadata: BTreeMap<String, String>,
    pub trace: TraceRecord,
    pub created_at: String,
}

impl ArtifactManifest {
    pub fn mode(&self) -> OutputMode {
        if self.classifier.is_some() {
            OutputMode::Classifier
        } else {
            OutputMode::Raw
        }
    }

    /// The embedded class list, parsed back from its JSON encoding.
    pub fn classes(&self) -> Result<Vec<String>> {
        let encoded = self.metadata.get(CLASSES_METADATA_KEY).ok_or_else(|| {
            Error::Export(format!("artifact has no '{CLASSES_METADATA_KEY}' metadata"))
        })?;
        serde_json::from_str(encoded)
            .map_err(|e| Error::Export(format!("invalid '{CLASSES_METADATA_KEY}' metadata: {e}")))
    }
}

/// Human-readable texts and output layout of an artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactDescription {
    pub mode: OutputMode,
    pub short_description: String,
    pub input_description: String,
    pub outputs: Vec<OutputDescriptor>,
}

impl ArtifactDescription {
    /// Labeled screening classifier exported from a training checkpoint.
    pub fn classifier(image_size: usize) -> Self {
        Self {
            mode: OutputMode::Classifier,
            short_description: "Noma risk screening classifier (MobileNetV3). Not a medical device."
                .to_string(),
            input_description: format!("Input image (RGB) scaled to {image_size}x{image_size}"),
            outputs: vec![
                OutputDescriptor::new(CLASS_LABEL_OUTPUT, "string", "Predicted label"),
                OutputDescriptor::new(CLASS_PROBS_OUTPUT, "dictionary", "Label probabilities"),
            ],
        }
    }

    /// Untrained demo network with a raw logits output.
    pub fn demo(image_size: usize) -> Self {
        Self {
            mode: OutputMode::Raw,
            short_description: "Tiny demo classifier for demos. Not a medical device.".to_string(),
            input_description: format!("Input {image_size}x{image_size} RGB image"),
            outputs: vec![OutputDescriptor::new(LOGITS_OUTPUT, "multiarray", "Raw logits")],
        }
    }
}

/// Overrides for [`ExportConverter::export_checkpoint`]. Unset values come
/// from the checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportOptions {
    pub image_size: Option<usize>,
    pub backbone: Option<Backbone>,
}

/// Builds artifacts on an inference backend.
#[derive(Debug, Clone)]
pub struct ExportConverter<B: Backend> {
    device: B::Device,
}

impl<B: Backend> ExportConverter<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }

    /// Export the checkpoint at `checkpoint` as a labeled classifier.
    ///
    /// `catalog` is the authoritative class order, normally read from the
    /// class mapping written at the end of training.
    pub fn export_checkpoint(
        &self,
        checkpoint: &Path,
        catalog: &ClassCatalog,
        output: &Path,
        options: &ExportOptions,
    ) -> Result<ArtifactManifest> {
        catalog.require_at_least(MIN_CLASSES)?;
        let checkpoint = CheckpointFile::read(checkpoint)?;
        let metadata = checkpoint.metadata();

        let backbone = options.backbone.unwrap_or(metadata.backbone);
        if backbone != metadata.backbone {
            return Err(Error::Config(format!(
                "requested backbone '{backbone}' but the checkpoint was trained with '{}'",
                metadata.backbone
            )));
        }
        if catalog.len() != metadata.class_names.len() {
            return Err(Error::Export(format!(
                "class map lists {} classes but the checkpoint has {}",
                catalog.len(),
                metadata.class_names.len()
            )));
        }
        if catalog.names() != metadata.class_names.as_slice() {
            warn!(
                "Class map [{}] differs from the checkpoint's classes [{}]; using the class map",
                catalog.names().join(", "),
                metadata.class_names.join(", ")
            );
        }

        let image_size = options.image_size.unwrap_or(metadata.image_size);
        if image_size != metadata.image_size {
            warn!(
                "Exporting at {image_size}x{image_size}, the checkpoint was trained at {0}x{0}",
                metadata.image_size
            );
        }

        let builder = ClassifierBuilder::new(backbone, catalog.len()).with_image_size(image_size);
        let model = checkpoint.restore_into::<B>(&builder, &self.device)?;
        info!(
            "Restored {backbone} from epoch {} (val_acc {:.4})",
            metadata.epoch, metadata.val_acc
        );

        self.export_model(
            model,
            catalog,
            output,
            image_size,
            &ArtifactDescription::classifier(image_size),
        )
    }

    /// Trace `model` at `image_size` and write it to `output`.
    pub fn export_model(
        &self,
        model: NomaClassifier<B>,
        catalog: &ClassCatalog,
        output: &Path,
        image_size: usize,
        description: &ArtifactDescription,
    ) -> Result<ArtifactManifest> {
        if model.num_classes() != catalog.len() {
            return Err(Error::Export(format!(
                "network has {} outputs but {} classes were given",
                model.num_classes(),
                catalog.len()
            )));
        }

        let trace = self.trace(&model, image_size)?;

        let classifier = match description.mode {
            OutputMode::Classifier => Some(ClassifierDescriptor {
                class_labels: catalog.names().to_vec(),
                predicted_feature_name: CLASS_LABEL_OUTPUT.to_string(),
                predicted_probabilities_output: CLASS_PROBS_OUTPUT.to_string(),
            }),
            OutputMode::Raw => None,
        };

        let mut metadata = BTreeMap::new();
        metadata.insert(CLASSES_METADATA_KEY.to_string(), catalog.to_json_list()?);

        let manifest = ArtifactManifest {
            format: ARTIFACT_FORMAT.to_string(),
            format_version: ARTIFACT_FORMAT_VERSION,
            backbone: model.backbone(),
            short_description: description.short_description.clone(),
            minimum_deployment_target: MINIMUM_DEPLOYMENT_TARGET.to_string(),
            input: InputDescriptor::image(image_size, description.input_description.clone()),
            outputs: description.outputs.clone(),
            classifier,
            metadata,
            trace,
            created_at: Utc::now().to_rfc3339(),
        };

        let payload = encode_record(model)?;
        write_package(output, PackageKind::Artifact, &manifest, &payload)?;
        info!("Saved artifact to {}", output.display());

        Ok(manifest)
    }

    fn trace(&self, model: &NomaClassifier<B>, image_size: usize) -> Result<TraceRecord> {
        let example_input_shape = [1, 3, image_size, image_size];
        let example = Tensor::<B, 4>::random(
            example_input_shape,
            Distribution::Normal(0.0, 1.0),
            &self.device,
        );
        let output = model.forward(example);
        let output_shape = output.dims().to_vec();

        let expected = [1, model.num_classes()];
        if output_shape != expected {
            return Err(Error::Export(format!(
                "traced output shape {output_shape:?}, expected {expected:?}"
            )));
        }
        let values: Vec<f32> = output
            .into_data()
            .convert::<f32>()
            .to_vec()
            .map_err(|e| Error::Export(format!("cannot read traced output: {e:?}")))?;
        if values.iter().any(|v| !v.is_finite()) {
            return Err(Error::Export("traced output contains non-finite values".into()));
        }

        Ok(TraceRecord {
            example_input_shape,
            output_shape,
        })
    }
}

/// Labeled output of a classifier artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub class_index: usize,
    pub label: String,
    /// Probability of the predicted label
    pub confidence: f32,
    pub probabilities: BTreeMap<String, f32>,
}

/// An artifact read back from disk.
#[derive(Debug, Clone)]
pub struct ExportedArtifact {
    path: PathBuf,
    manifest: ArtifactManifest,
    record: Vec<u8>,
}

impl ExportedArtifact {
    pub fn read(path: &Path) -> Result<Self> {
        let (manifest, record): (ArtifactManifest, Vec<u8>) =
            read_package(path, PackageKind::Artifact)?;
        if manifest.format != ARTIFACT_FORMAT {
            return Err(Error::Export(format!(
                "{} is a '{}' artifact, expected '{ARTIFACT_FORMAT}'",
                path.display(),
                manifest.format
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
            manifest,
            record,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn manifest(&self) -> &ArtifactManifest {
        &self.manifest
    }

    pub fn classes(&self) -> Result<Vec<String>> {
        self.manifest.classes()
    }

    /// Rebuild the packaged network with its parameters.
    pub fn load_model<B: Backend>(&self, device: &B::Device) -> Result<NomaClassifier<B>> {
        let num_classes = self.classes()?.len();
        let model = ClassifierBuilder::new(self.manifest.backbone, num_classes).build::<B>(device)?;
        decode_record(model, self.record.clone(), device).map_err(|reason| {
            Error::Export(format!("malformed artifact {}: {reason}", self.path.display()))
        })
    }

    /// Run the packaged network on `image` and return the labeled prediction.
    ///
    /// The image goes through the input descriptor, logits through softmax.
    /// Raw-mode artifacts have no labeled output and are rejected.
    pub fn classify<B: Backend>(
        &self,
        image: &DynamicImage,
        device: &B::Device,
    ) -> Result<Prediction> {
        let labels = match &self.manifest.classifier {
            Some(classifier) => &classifier.class_labels,
            None => {
                return Err(Error::Export(format!(
                    "{} has raw outputs only, it cannot produce labeled predictions",
                    self.path.display()
                )))
            }
        };

        let model = self.load_model::<B>(device)?;
        let input = self.manifest.input.to_tensor::<B>(image, device);
        let probabilities: Vec<f32> = softmax(model.forward(input), 1)
            .into_data()
            .convert::<f32>()
            .to_vec()
            .map_err(|e| Error::Export(format!("cannot read prediction: {e:?}")))?;
        if probabilities.len() != labels.len() {
            return Err(Error::Export(format!(
                "network produced {} scores for {} labels",
                probabilities.len(),
                labels.len()
            )));
        }

        let (class_index, confidence) = probabilities
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, p)| if p > best.1 { (i, p) } else { best });

        Ok(Prediction {
            class_index,
            label: labels[class_index].clone(),
            confidence,
            probabilities: labels.iter().cloned().zip(probabilities).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    use crate::checkpoint::{CheckpointManager, CheckpointState};

    type TestBackend = NdArray<f32>;

    fn catalog(names: &[&str]) -> ClassCatalog {
        ClassCatalog::new(names.iter().map(|s| s.to_string()).collect()).unwrap()
    }

    fn save_checkpoint(dir: &Path, catalog: &ClassCatalog) -> PathBuf {
        let device = Default::default();
        let model = ClassifierBuilder::new(Backbone::TinyDemo, catalog.len())
            .build::<TestBackend>(&device)
            .unwrap();
        let mut manager = CheckpointManager::new(dir).unwrap();
        manager
            .save_if_best(
                0.5,
                CheckpointState {
                    epoch: 1,
                    model: &model,
                    catalog,
                    image_size: 16,
                },
            )
            .unwrap();
        manager.checkpoint_path()
    }

    fn converter() -> ExportConverter<TestBackend> {
        ExportConverter::new(Default::default())
    }

    #[test]
    fn test_classifier_manifest() {
        let temp = TempDir::new().unwrap();
        let classes = catalog(&["normal", "noma"]);
        let checkpoint = save_checkpoint(temp.path(), &classes);
        let output = temp.path().join("out/model.nomamodel");

        let manifest = converter()
            .export_checkpoint(&checkpoint, &classes, &output, &ExportOptions::default())
            .unwrap();

        assert_eq!(manifest.mode(), OutputMode::Classifier);
        assert_eq!(manifest.input.name, "image");
        assert_eq!(manifest.input.shape, [1, 3, 16, 16]);
        assert_eq!(manifest.input.bias, [0.0; 3]);
        assert_eq!(manifest.trace.output_shape, vec![1, 2]);
        assert_eq!(manifest.classes().unwrap(), vec!["normal", "noma"]);
        assert_eq!(
            manifest.input.description,
            "Input image (RGB) scaled to 16x16"
        );
        let names: Vec<&str> = manifest.outputs.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["classLabel", "classLabelProbs"]);
        assert_eq!(manifest.minimum_deployment_target, "iOS17");
    }

    #[test]
    fn test_artifact_round_trip() {
        let temp = TempDir::new().unwrap();
        let classes = catalog(&["a", "b", "c"]);
        let checkpoint = save_checkpoint(temp.path(), &classes);
        let output = temp.path().join("model.nomamodel");
        let options = ExportOptions {
            image_size: Some(24),
            backbone: None,
        };
        converter()
            .export_checkpoint(&checkpoint, &classes, &output, &options)
            .unwrap();

        let artifact = ExportedArtifact::read(&output).unwrap();
        assert_eq!(artifact.manifest().input.shape, [1, 3, 24, 24]);

        let device = Default::default();
        let (original, _) =
            crate::checkpoint::load_checkpoint::<TestBackend>(&checkpoint, &device).unwrap();
        let restored = artifact.load_model::<TestBackend>(&device).unwrap();
        let input = Tensor::<TestBackend, 4>::ones([1, 3, 24, 24], &device);
        let expected: Vec<f32> = original.forward(input.clone()).into_data().to_vec().unwrap();
        let actual: Vec<f32> = restored.forward(input).into_data().to_vec().unwrap();
        assert_eq!(expected, actual);
    }

    #[test]
    fn test_conflicting_backbone_rejected() {
        let temp = TempDir::new().unwrap();
        let classes = catalog(&["normal", "noma"]);
        let checkpoint = save_checkpoint(temp.path(), &classes);
        let options = ExportOptions {
            image_size: None,
            backbone: Some(Backbone::MobileNetV3Small),
        };

        let err = converter()
            .export_checkpoint(&checkpoint, &classes, &temp.path().join("x.nomamodel"), &options)
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(!temp.path().join("x.nomamodel").exists());
    }

    #[test]
    fn test_class_count_mismatch_rejected() {
        let temp = TempDir::new().unwrap();
        let checkpoint = save_checkpoint(temp.path(), &catalog(&["normal", "noma"]));

        let err = converter()
            .export_checkpoint(
                &checkpoint,
                &catalog(&["a", "b", "c"]),
                &temp.path().join("x.nomamodel"),
                &ExportOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Export(_)));
    }

    #[test]
    fn test_missing_checkpoint() {
        let temp = TempDir::new().unwrap();
        let err = converter()
            .export_checkpoint(
                &temp.path().join("model_best.ckpt"),
                &catalog(&["normal", "noma"]),
                &temp.path().join("x.nomamodel"),
                &ExportOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Checkpoint { .. }));
    }

    #[test]
    fn test_raw_mode_has_single_output() {
        let temp = TempDir::new().unwrap();
        let device = Default::default();
        let classes = catalog(&["x", "y"]);
        let model = ClassifierBuilder::new(Backbone::TinyDemo, 2)
            .build::<TestBackend>(&device)
            .unwrap();

        let manifest = converter()
            .export_model(
                model,
                &classes,
                &temp.path().join("demo.nomamodel"),
                8,
                &ArtifactDescription::demo(8),
            )
            .unwrap();

        assert_eq!(manifest.mode(), OutputMode::Raw);
        assert_eq!(manifest.outputs.len(), 1);
        assert_eq!(manifest.outputs[0].description, "Raw logits");
        assert_eq!(manifest.classes().unwrap(), vec!["x", "y"]);
    }

    #[test]
    fn test_checkpoint_is_not_an_artifact() {
        let temp = TempDir::new().unwrap();
        let checkpoint = save_checkpoint(temp.path(), &catalog(&["normal", "noma"]));
        assert!(matches!(
            ExportedArtifact::read(&checkpoint),
            Err(Error::Export(_))
        ));
    }
}

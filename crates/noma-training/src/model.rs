//! Noma screening classifier.
//!
//! A backbone produces pooled features and a single linear head maps them to
//! one logit per class. Two backbones exist:
//! - MobileNet-V3 Small for real training
//! - A parameter-free global average pool for tiny demo artifacts

use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    nn::{
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        Linear, LinearConfig,
    },
    record::CompactRecorder,
    tensor::{backend::Backend, Tensor},
};
use noma_core::{Backbone, Error, Result};
use tracing::{info, warn};

use crate::mobilenet::{MobileNetV3Small, FEATURE_WIDTH};

/// Fewest classes a classifier can be built for.
pub const MIN_CLASSES: usize = 2;

/// Backbone of the demo model: the mean of each color channel.
#[derive(Module, Clone, Debug)]
pub struct TinyDemoNet {
    pool: AdaptiveAvgPool2d,
}

impl TinyDemoNet {
    pub const FEATURE_WIDTH: usize = 3;

    pub fn new() -> Self {
        Self {
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
        }
    }

    pub fn forward<B: Backend>(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        self.pool.forward(input).flatten(1, 3)
    }
}

impl Default for TinyDemoNet {
    fn default() -> Self {
        Self::new()
    }
}

/// Feature extractor variants
#[derive(Module, Debug)]
pub enum BackboneNet<B: Backend> {
    MobileNetV3Small(MobileNetV3Small<B>),
    TinyDemo(TinyDemoNet),
}

impl<B: Backend> BackboneNet<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        match self {
            BackboneNet::MobileNetV3Small(net) => net.forward(input),
            BackboneNet::TinyDemo(net) => net.forward(input),
        }
    }

    pub fn kind(&self) -> Backbone {
        match self {
            BackboneNet::MobileNetV3Small(_) => Backbone::MobileNetV3Small,
            BackboneNet::TinyDemo(_) => Backbone::TinyDemo,
        }
    }
}

/// Width of the features `backbone` hands to the head.
pub fn feature_width(backbone: Backbone) -> usize {
    match backbone {
        Backbone::MobileNetV3Small => FEATURE_WIDTH,
        Backbone::TinyDemo => TinyDemoNet::FEATURE_WIDTH,
    }
}

/// Smallest square input the backbone accepts.
pub fn min_image_size(backbone: Backbone) -> usize {
    match backbone {
        Backbone::MobileNetV3Small => 32,
        Backbone::TinyDemo => 1,
    }
}

/// Backbone plus a linear head with one output per class.
#[derive(Module, Debug)]
pub struct NomaClassifier<B: Backend> {
    backbone: BackboneNet<B>,
    head: Linear<B>,
    num_classes: usize,
}

impl<B: Backend> NomaClassifier<B> {
    /// `[batch, 3, H, W]` normalized images to `[batch, num_classes]` logits.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        self.head.forward(self.backbone.forward(input))
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn backbone(&self) -> Backbone {
        self.backbone.kind()
    }
}

/// Assembles a [`NomaClassifier`] for a backbone and class count.
#[derive(Debug, Clone)]
pub struct ClassifierBuilder {
    backbone: Backbone,
    num_classes: usize,
    image_size: Option<usize>,
    pretrained: Option<PathBuf>,
}

impl ClassifierBuilder {
    pub fn new(backbone: Backbone, num_classes: usize) -> Self {
        Self {
            backbone,
            num_classes,
            image_size: None,
            pretrained: None,
        }
    }

    /// Same as [`ClassifierBuilder::new`] with the backbone given by name.
    pub fn from_name(backbone: &str, num_classes: usize) -> Result<Self> {
        Ok(Self::new(backbone.parse()?, num_classes))
    }

    /// Check the input size the model will be fed against the backbone.
    pub fn with_image_size(mut self, image_size: usize) -> Self {
        self.image_size = Some(image_size);
        self
    }

    /// Backbone weights saved with burn's `CompactRecorder`.
    pub fn with_pretrained(mut self, path: Option<impl Into<PathBuf>>) -> Self {
        self.pretrained = path.map(Into::into);
        self
    }

    pub fn backbone(&self) -> Backbone {
        self.backbone
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn build<B: Backend>(&self, device: &B::Device) -> Result<NomaClassifier<B>> {
        if self.num_classes < MIN_CLASSES {
            return Err(Error::Config(format!(
                "a classifier needs at least {MIN_CLASSES} classes, got {}",
                self.num_classes
            )));
        }
        if let Some(size) = self.image_size {
            let min = min_image_size(self.backbone);
            if size < min {
                return Err(Error::Config(format!(
                    "image size {size} is below the minimum of {min} for {}",
                    self.backbone
                )));
            }
        }

        let backbone = match self.backbone {
            Backbone::MobileNetV3Small => {
                let net = MobileNetV3Small::new(device);
                let net = match &self.pretrained {
                    Some(path) => load_pretrained(net, path, device)?,
                    None => {
                        warn!(
                            "No pretrained weights given, the backbone starts from random \
                             initialisation"
                        );
                        net
                    }
                };
                BackboneNet::MobileNetV3Small(net)
            }
            Backbone::TinyDemo => {
                if self.pretrained.is_some() {
                    warn!("Pretrained weights are ignored for the {} backbone", self.backbone);
                }
                BackboneNet::TinyDemo(TinyDemoNet::new())
            }
        };

        let head = LinearConfig::new(feature_width(self.backbone), self.num_classes).init(device);

        Ok(NomaClassifier {
            backbone,
            head,
            num_classes: self.num_classes,
        })
    }
}

fn load_pretrained<B: Backend>(
    net: MobileNetV3Small<B>,
    path: &Path,
    device: &B::Device,
) -> Result<MobileNetV3Small<B>> {
    let net = net
        .load_file(path.to_path_buf(), &CompactRecorder::new(), device)
        .map_err(|e| {
            Error::Model(format!(
                "failed to load pretrained weights from {}: {e:?}",
                path.display()
            ))
        })?;
    info!("Loaded pretrained backbone weights from {}", path.display());
    Ok(net)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::module::Module;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_mobilenet_classifier_shape() {
        let device = Default::default();
        let model = ClassifierBuilder::new(Backbone::MobileNetV3Small, 2)
            .with_image_size(32)
            .build::<TestBackend>(&device)
            .unwrap();

        let logits = model.forward(Tensor::zeros([3, 3, 32, 32], &device));
        assert_eq!(logits.dims(), [3, 2]);
        assert_eq!(model.backbone(), Backbone::MobileNetV3Small);
    }

    #[test]
    fn test_tiny_demo_has_only_head_parameters() {
        let device = Default::default();
        let model = ClassifierBuilder::new(Backbone::TinyDemo, 4)
            .build::<TestBackend>(&device)
            .unwrap();

        assert_eq!(model.num_params(), 3 * 4 + 4);
        let logits = model.forward(Tensor::ones([1, 3, 5, 5], &device));
        assert_eq!(logits.dims(), [1, 4]);
    }

    #[test]
    fn test_single_class_rejected() {
        let device = Default::default();
        let err = ClassifierBuilder::new(Backbone::TinyDemo, 1)
            .build::<TestBackend>(&device)
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_unknown_backbone_name() {
        let err = ClassifierBuilder::from_name("resnet50", 2).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("resnet50"));
    }

    #[test]
    fn test_too_small_image_rejected() {
        let device = Default::default();
        let err = ClassifierBuilder::new(Backbone::MobileNetV3Small, 2)
            .with_image_size(16)
            .build::<TestBackend>(&device)
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_pretrained_backbone_loaded() {
        let temp = TempDir::new().unwrap();
        let device = Default::default();
        let path = temp.path().join("backbone");
        MobileNetV3Small::<TestBackend>::new(&device)
            .save_file(path.clone(), &CompactRecorder::new())
            .unwrap();

        let model = ClassifierBuilder::new(Backbone::MobileNetV3Small, 2)
            .with_pretrained(Some(&path))
            .build::<TestBackend>(&device);
        assert!(model.is_ok());

        let missing = ClassifierBuilder::new(Backbone::MobileNetV3Small, 2)
            .with_pretrained(Some(temp.path().join("missing")))
            .build::<TestBackend>(&device);
        assert!(matches!(missing, Err(Error::Model(_))));
    }
}

//! Validation pass: loss, accuracy, confusion matrix and per-class report.

use burn::{
    data::dataloader::batcher::Batcher,
    nn::loss::CrossEntropyLossConfig,
    tensor::{backend::Backend, ElementConversion},
};
use noma_core::{ClassificationReport, ConfusionMatrix, Error, Result};
use noma_dataset::{BatchLoader, NomaBatch, NomaBatcher, ValidationSet};
use tracing::debug;

use crate::model::NomaClassifier;

/// Outcome of one pass over the validation set.
#[derive(Debug, Clone)]
pub struct EvaluationResult {
    /// Mean unweighted cross-entropy over all samples
    pub loss: f64,
    pub accuracy: f64,
    pub report: ClassificationReport,
    pub confusion_matrix: ConfusionMatrix,
    pub num_samples: usize,
}

/// Runs a model in inference mode over the validation set, in its fixed order.
pub struct Evaluator<'a> {
    loader: &'a BatchLoader,
    batcher: NomaBatcher,
}

impl<'a> Evaluator<'a> {
    pub fn new(loader: &'a BatchLoader, image_size: usize) -> Self {
        Self {
            loader,
            batcher: NomaBatcher::new(image_size),
        }
    }

    /// `model` should already be in inference mode (see `AutodiffModule::valid`).
    pub fn evaluate<B: Backend>(
        &self,
        model: &NomaClassifier<B>,
        val: &ValidationSet,
        device: &B::Device,
    ) -> Result<EvaluationResult> {
        let num_classes = model.num_classes();
        let criterion = CrossEntropyLossConfig::new().init(device);

        let mut matrix = ConfusionMatrix::new(num_classes);
        let mut loss_sum = 0.0f64;
        let mut total = 0usize;

        self.loader.for_each_batch(
            &val.plan(),
            |_, index| val.item(index),
            |items| {
                let batch: NomaBatch<B> = self.batcher.batch(items, device);
                let batch_size = batch.targets.dims()[0];

                let logits = model.forward(batch.images);
                let loss: f64 = criterion
                    .forward(logits.clone(), batch.targets.clone())
                    .into_scalar()
                    .elem();
                loss_sum += loss * batch_size as f64;
                total += batch_size;

                let predictions = tensor_to_indices(logits.argmax(1).squeeze::<1>(1))?;
                let targets = tensor_to_indices(batch.targets)?;
                for (&actual, &predicted) in targets.iter().zip(&predictions) {
                    matrix.record(actual, predicted);
                }
                Ok(())
            },
        )?;

        let loss = if total > 0 { loss_sum / total as f64 } else { 0.0 };
        let report = ClassificationReport::from_confusion_matrix(&matrix);
        debug!(
            "Validation: {total} samples, loss {loss:.4}, accuracy {:.4}",
            report.accuracy
        );

        Ok(EvaluationResult {
            loss,
            accuracy: report.accuracy,
            report,
            confusion_matrix: matrix,
            num_samples: total,
        })
    }
}

/// Copy an integer tensor to host indices.
pub(crate) fn tensor_to_indices<B: Backend>(
    tensor: burn::tensor::Tensor<B, 1, burn::tensor::Int>,
) -> Result<Vec<usize>> {
    tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map(|values| values.into_iter().map(|v| v as usize).collect())
        .map_err(|e| Error::Training(format!("cannot read tensor data: {e:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use image::{ImageBuffer, Rgb};
    use noma_core::Backbone;
    use noma_dataset::{EvalTransform, ImageFolder};
    use tempfile::TempDir;

    use crate::model::ClassifierBuilder;

    type TestBackend = NdArray<f32>;

    fn write_images(root: &std::path::Path, class: &str, count: usize, shade: u8) {
        let dir = root.join(class);
        std::fs::create_dir_all(&dir).unwrap();
        for i in 0..count {
            ImageBuffer::from_pixel(6, 6, Rgb([shade, shade, shade]))
                .save(dir.join(format!("{i}.png")))
                .unwrap();
        }
    }

    #[test]
    fn test_evaluate_counts_every_sample() {
        let temp = TempDir::new().unwrap();
        write_images(temp.path(), "a", 5, 10);
        write_images(temp.path(), "b", 2, 240);
        let val = ValidationSet::new(
            ImageFolder::discover(temp.path()).unwrap(),
            EvalTransform::new(4),
        );

        let device = Default::default();
        let model = ClassifierBuilder::new(Backbone::TinyDemo, 2)
            .build::<TestBackend>(&device)
            .unwrap();
        let loader = BatchLoader::new(2, 3, 1).unwrap();

        let result = Evaluator::new(&loader, 4)
            .evaluate(&model, &val, &device)
            .unwrap();

        assert_eq!(result.num_samples, 7);
        assert_eq!(result.confusion_matrix.total(), 7);
        assert_eq!(result.confusion_matrix.support(0), 5);
        assert_eq!(result.confusion_matrix.support(1), 2);
        assert!(result.loss.is_finite() && result.loss > 0.0);
        assert!((0.0..=1.0).contains(&result.accuracy));
        assert_eq!(result.report.per_class.len(), 2);
    }

    #[test]
    fn test_evaluate_is_repeatable() {
        let temp = TempDir::new().unwrap();
        write_images(temp.path(), "a", 3, 50);
        write_images(temp.path(), "b", 3, 200);
        let val = ValidationSet::new(
            ImageFolder::discover(temp.path()).unwrap(),
            EvalTransform::new(4),
        );

        let device = Default::default();
        let model = ClassifierBuilder::new(Backbone::TinyDemo, 2)
            .build::<TestBackend>(&device)
            .unwrap();
        let loader = BatchLoader::new(3, 4, 2).unwrap();
        let evaluator = Evaluator::new(&loader, 4);

        let first = evaluator.evaluate(&model, &val, &device).unwrap();
        let second = evaluator.evaluate(&model, &val, &device).unwrap();
        assert_eq!(first.loss, second.loss);
        assert_eq!(first.confusion_matrix, second.confusion_matrix);
    }
}

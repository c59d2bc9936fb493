//! Class-weighted cross-entropy.

use burn::tensor::{activation::log_softmax, backend::Backend, Int, Tensor, TensorData};
use noma_dataset::SampleWeightTable;

/// Cross-entropy where each sample counts with the weight of its class.
///
/// The batch loss is `sum(w[y] * nll) / sum(w[y])`, so with equal weights it
/// reduces to the plain mean cross-entropy.
#[derive(Debug, Clone)]
pub struct ClassWeightedLoss<B: Backend> {
    class_weights: Tensor<B, 1>,
}

impl<B: Backend> ClassWeightedLoss<B> {
    pub fn new(table: &SampleWeightTable, device: &B::Device) -> Self {
        let weights = table.to_f32();
        let len = weights.len();
        Self {
            class_weights: Tensor::from_floats(TensorData::new(weights, [len]), device),
        }
    }

    pub fn num_classes(&self) -> usize {
        self.class_weights.dims()[0]
    }

    /// `logits` `[batch, classes]`, `targets` `[batch]`; returns a `[1]` tensor.
    pub fn forward(&self, logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> Tensor<B, 1> {
        let [batch, _] = logits.dims();
        let log_probs = log_softmax(logits, 1);
        let nll = log_probs
            .gather(1, targets.clone().reshape([batch, 1]))
            .reshape([batch])
            .neg();
        let weights = self.class_weights.clone().select(0, targets);

        (nll * weights.clone()).sum() / weights.sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::nn::loss::CrossEntropyLossConfig;
    use burn::tensor::ElementConversion;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn logits(device: &<TestBackend as Backend>::Device) -> Tensor<TestBackend, 2> {
        Tensor::from_floats([[2.0, 0.5], [0.1, 1.2], [0.3, 0.3], [-1.0, 2.0]], device)
    }

    fn targets(device: &<TestBackend as Backend>::Device) -> Tensor<TestBackend, 1, Int> {
        Tensor::from_ints([0, 1, 1, 0], device)
    }

    #[test]
    fn test_equal_weights_match_plain_cross_entropy() {
        let device = Default::default();
        let table = SampleWeightTable::from_counts(&[5, 5]);
        let weighted: f64 = ClassWeightedLoss::new(&table, &device)
            .forward(logits(&device), targets(&device))
            .into_scalar()
            .elem();
        let plain: f64 = CrossEntropyLossConfig::new()
            .init(&device)
            .forward(logits(&device), targets(&device))
            .into_scalar()
            .elem();

        assert!((weighted - plain).abs() < 1e-5, "{weighted} vs {plain}");
    }

    #[test]
    fn test_weighted_mean_by_hand() {
        let device = Default::default();
        // Class 0 weight 1/4, class 1 weight 1/1.
        let table = SampleWeightTable::from_counts(&[4, 1]);
        let loss: f64 = ClassWeightedLoss::new(&table, &device)
            .forward(logits(&device), targets(&device))
            .into_scalar()
            .elem();

        let rows = [[2.0f64, 0.5], [0.1, 1.2], [0.3, 0.3], [-1.0, 2.0]];
        let ys = [0usize, 1, 1, 0];
        let ws = [0.25, 1.0, 1.0, 0.25];
        let (mut num, mut den) = (0.0, 0.0);
        for ((row, &y), &w) in rows.iter().zip(&ys).zip(&ws) {
            let lse = (row[0].exp() + row[1].exp()).ln();
            num += w * (lse - row[y]);
            den += w;
        }

        assert!((loss - num / den).abs() < 1e-5, "{loss} vs {}", num / den);
    }
}

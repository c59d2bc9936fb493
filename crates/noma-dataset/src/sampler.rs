//! Class-imbalance correction.
//!
//! Every class receives weight `1 / max(count, 1)`. The same table drives the
//! weighted draw of training samples and the weights of the training loss.

use noma_core::{Error, Result};
use rand::distributions::{Distribution, WeightedIndex};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

/// Per-class inverse-frequency weights.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleWeightTable {
    weights: Vec<f64>,
}

impl SampleWeightTable {
    /// Weights for `counts[i]` samples of class `i`. A class with no samples
    /// is floored to a count of one, so every weight is finite and positive.
    pub fn from_counts(counts: &[usize]) -> Self {
        let weights = counts.iter().map(|&c| 1.0 / c.max(1) as f64).collect();
        Self { weights }
    }

    /// Count labels into `num_classes` buckets and derive the weights.
    pub fn from_labels(labels: &[usize], num_classes: usize) -> Result<Self> {
        Ok(Self::from_counts(&class_counts(labels, num_classes)?))
    }

    pub fn weight(&self, class: usize) -> f64 {
        self.weights[class]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.weights
    }

    /// Weights as `f32`, the element type of loss tensors.
    pub fn to_f32(&self) -> Vec<f32> {
        self.weights.iter().map(|&w| w as f32).collect()
    }

    pub fn num_classes(&self) -> usize {
        self.weights.len()
    }
}

/// Histogram of `labels` over `num_classes` classes.
pub fn class_counts(labels: &[usize], num_classes: usize) -> Result<Vec<usize>> {
    let mut counts = vec![0usize; num_classes];
    for &label in labels {
        let slot = counts.get_mut(label).ok_or_else(|| {
            Error::DataDiscovery(format!("label {label} out of range for {num_classes} classes"))
        })?;
        *slot += 1;
    }
    Ok(counts)
}

/// Weighted sampler with replacement over the training set.
///
/// Each epoch plan holds exactly as many draws as there are training samples;
/// sample `i` is drawn with probability proportional to its class weight.
#[derive(Debug, Clone)]
pub struct ImbalanceSampler {
    table: SampleWeightTable,
    distribution: WeightedIndex<f64>,
    num_samples: usize,
}

impl ImbalanceSampler {
    pub fn new(labels: &[usize], num_classes: usize) -> Result<Self> {
        if labels.is_empty() {
            return Err(Error::DataDiscovery("training set is empty".into()));
        }
        let table = SampleWeightTable::from_labels(labels, num_classes)?;
        let sample_weights: Vec<f64> = labels.iter().map(|&l| table.weight(l)).collect();
        let distribution = WeightedIndex::new(&sample_weights)
            .map_err(|e| Error::DataDiscovery(format!("invalid sample weights: {e}")))?;

        debug!(
            "Imbalance sampler over {} samples, class weights {:?}",
            labels.len(),
            table.as_slice()
        );

        Ok(Self {
            table,
            distribution,
            num_samples: labels.len(),
        })
    }

    pub fn weights(&self) -> &SampleWeightTable {
        &self.table
    }

    /// Draws per epoch.
    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// Dataset indices for one epoch, in draw order.
    pub fn draw_plan(&self, rng: &mut ChaCha8Rng) -> Vec<usize> {
        (0..self.num_samples)
            .map(|_| self.distribution.sample(rng))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noma_core::{ReproducibilityController, RngStream};

    fn labels(normal: usize, noma: usize) -> Vec<usize> {
        std::iter::repeat(0)
            .take(normal)
            .chain(std::iter::repeat(1).take(noma))
            .collect()
    }

    #[test]
    fn test_weights_for_80_20_split() {
        let table = SampleWeightTable::from_labels(&labels(80, 20), 2).unwrap();
        assert!((table.weight(0) - 1.0 / 80.0).abs() < 1e-15);
        assert!((table.weight(1) - 1.0 / 20.0).abs() < 1e-15);
    }

    #[test]
    fn test_zero_count_class_has_finite_weight() {
        let table = SampleWeightTable::from_counts(&[50, 0, 3]);
        for &w in table.as_slice() {
            assert!(w.is_finite());
            assert!(w > 0.0);
        }
        assert_eq!(table.weight(1), 1.0);
    }

    #[test]
    fn test_out_of_range_label_rejected() {
        assert!(SampleWeightTable::from_labels(&[0, 1, 5], 2).is_err());
    }

    #[test]
    fn test_plan_has_one_draw_per_sample() {
        let sampler = ImbalanceSampler::new(&labels(80, 20), 2).unwrap();
        let mut rng = ReproducibilityController::new(42).rng(RngStream::Sampler);
        let plan = sampler.draw_plan(&mut rng);

        assert_eq!(plan.len(), 100);
        assert!(plan.iter().all(|&i| i < 100));
    }

    #[test]
    fn test_plan_balances_classes() {
        let labels = labels(8000, 2000);
        let sampler = ImbalanceSampler::new(&labels, 2).unwrap();
        let mut rng = ReproducibilityController::new(1).rng(RngStream::Sampler);
        let plan = sampler.draw_plan(&mut rng);

        let minority = plan.iter().filter(|&&i| labels[i] == 1).count() as f64;
        let fraction = minority / plan.len() as f64;
        assert!((0.45..0.55).contains(&fraction), "minority fraction {fraction}");
    }

    #[test]
    fn test_same_seed_same_plan() {
        let sampler = ImbalanceSampler::new(&labels(30, 10), 2).unwrap();
        let controller = ReproducibilityController::new(42);

        let a = sampler.draw_plan(&mut controller.rng(RngStream::Sampler));
        let b = sampler.draw_plan(&mut controller.rng(RngStream::Sampler));
        let c = sampler.draw_plan(&mut ReproducibilityController::new(43).rng(RngStream::Sampler));

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_empty_training_set_rejected() {
        assert!(ImbalanceSampler::new(&[], 2).is_err());
    }
}

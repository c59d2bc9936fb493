//! Classification metrics and the per-epoch metrics record.

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

/// File name of the per-epoch metrics record.
pub const METRICS_FILE: &str = "metrics.json";

/// Square count matrix, rows = true class, columns = predicted class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfusionMatrix {
    counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            counts: vec![vec![0; num_classes]; num_classes],
        }
    }

    /// Build from paired targets and predictions. Out-of-range labels are ignored.
    pub fn from_predictions(num_classes: usize, targets: &[usize], predictions: &[usize]) -> Self {
        let mut matrix = Self::new(num_classes);
        for (&actual, &predicted) in targets.iter().zip(predictions) {
            matrix.record(actual, predicted);
        }
        matrix
    }

    pub fn record(&mut self, actual: usize, predicted: usize) {
        let n = self.num_classes();
        if actual < n && predicted < n {
            self.counts[actual][predicted] += 1;
        }
    }

    pub fn num_classes(&self) -> usize {
        self.counts.len()
    }

    pub fn rows(&self) -> &[Vec<usize>] {
        &self.counts
    }

    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        self.counts[actual][predicted]
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn correct(&self) -> usize {
        (0..self.num_classes()).map(|i| self.counts[i][i]).sum()
    }

    /// Number of samples whose true class is `class`.
    pub fn support(&self, class: usize) -> usize {
        self.counts[class].iter().sum()
    }

    fn predicted(&self, class: usize) -> usize {
        self.counts.iter().map(|row| row[class]).sum()
    }
}

/// Precision, recall, F1 and support for one class or one average.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassScores {
    pub precision: f64,
    pub recall: f64,
    #[serde(rename = "f1-score")]
    pub f1_score: f64,
    pub support: usize,
}

/// Per-class report with accuracy and macro/support-weighted averages.
///
/// Every class of the catalog is listed, including classes without support.
/// Divisions by zero yield 0.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationReport {
    pub per_class: Vec<ClassScores>,
    pub accuracy: f64,
    pub macro_avg: ClassScores,
    pub weighted_avg: ClassScores,
}

impl ClassificationReport {
    pub fn from_confusion_matrix(matrix: &ConfusionMatrix) -> Self {
        let n = matrix.num_classes();
        let per_class: Vec<ClassScores> = (0..n)
            .map(|class| {
                let tp = matrix.get(class, class) as f64;
                let support = matrix.support(class);
                let precision = ratio(tp, matrix.predicted(class) as f64);
                let recall = ratio(tp, support as f64);
                let f1_score = ratio(2.0 * precision * recall, precision + recall);
                ClassScores {
                    precision,
                    recall,
                    f1_score,
                    support,
                }
            })
            .collect();

        let total = matrix.total();
        let accuracy = ratio(matrix.correct() as f64, total as f64);

        let mean = |f: fn(&ClassScores) -> f64| ratio(per_class.iter().map(f).sum(), n as f64);
        let macro_avg = ClassScores {
            precision: mean(|s| s.precision),
            recall: mean(|s| s.recall),
            f1_score: mean(|s| s.f1_score),
            support: total,
        };

        let weighted = |f: fn(&ClassScores) -> f64| {
            ratio(
                per_class.iter().map(|s| f(s) * s.support as f64).sum(),
                total as f64,
            )
        };
        let weighted_avg = ClassScores {
            precision: weighted(|s| s.precision),
            recall: weighted(|s| s.recall),
            f1_score: weighted(|s| s.f1_score),
            support: total,
        };

        Self {
            per_class,
            accuracy,
            macro_avg,
            weighted_avg,
        }
    }
}

impl Serialize for ClassificationReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.per_class.len() + 3))?;
        for (class, scores) in self.per_class.iter().enumerate() {
            map.serialize_entry(&class.to_string(), scores)?;
        }
        map.serialize_entry("accuracy", &self.accuracy)?;
        map.serialize_entry("macro avg", &self.macro_avg)?;
        map.serialize_entry("weighted avg", &self.weighted_avg)?;
        map.end()
    }
}

/// One epoch's merged training and validation results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_acc: f64,
    pub val_loss: f64,
    pub val_acc: f64,
    pub val_report: ClassificationReport,
    pub val_confusion_matrix: ConfusionMatrix,
    pub class_names: Vec<String>,
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

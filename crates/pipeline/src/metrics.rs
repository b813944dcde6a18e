//! Binary classification metrics
//!
//! Precision, recall and F1 are reported for the positive (high-risk)
//! class unless stated otherwise; a zero denominator yields 0.

use crate::merge::{mean, median};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_negatives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub true_positives: usize,
}

impl ConfusionMatrix {
    pub fn from_labels(actual: &[u8], predicted: &[u8]) -> Self {
        let mut matrix = Self::default();
        for (&a, &p) in actual.iter().zip(predicted) {
            match (a, p) {
                (1, 1) => matrix.true_positives += 1,
                (1, _) => matrix.false_negatives += 1,
                (_, 1) => matrix.false_positives += 1,
                _ => matrix.true_negatives += 1,
            }
        }
        matrix
    }

    pub fn total(&self) -> usize {
        self.true_negatives + self.false_positives + self.false_negatives + self.true_positives
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.true_positives + self.true_negatives, self.total())
    }

    /// Metrics of one class, treating it as the positive one.
    pub fn class_report(&self, class: u8) -> ClassReport {
        let (tp, fp, fn_) = if class == 1 {
            (self.true_positives, self.false_positives, self.false_negatives)
        } else {
            (self.true_negatives, self.false_negatives, self.false_positives)
        };
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        ClassReport {
            class,
            precision,
            recall,
            f1: f1(precision, recall),
            support: tp + fn_,
        }
    }
}

/// Per-class precision, recall, F1 and support.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassReport {
    pub class: u8,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub samples: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub accuracy: f64,
    pub confusion: ConfusionMatrix,
    pub per_class: Vec<ClassReport>,
}

impl EvaluationReport {
    pub fn from_labels(actual: &[u8], predicted: &[u8]) -> Self {
        let confusion = ConfusionMatrix::from_labels(actual, predicted);
        let positive = confusion.class_report(1);
        Self {
            samples: confusion.total(),
            precision: positive.precision,
            recall: positive.recall,
            f1: positive.f1,
            accuracy: confusion.accuracy(),
            confusion,
            per_class: vec![confusion.class_report(0), positive],
        }
    }
}

/// Spread of predicted class-1 probabilities.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbabilityDistribution {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
}

impl ProbabilityDistribution {
    pub fn from_probabilities(probabilities: &[f64]) -> Option<Self> {
        Some(Self {
            min: probabilities.iter().copied().reduce(f64::min)?,
            max: probabilities.iter().copied().reduce(f64::max)?,
            mean: mean(probabilities.iter().copied())?,
            median: median(probabilities)?,
        })
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn f1(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

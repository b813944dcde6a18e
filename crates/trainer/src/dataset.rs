//! Fixed-point training dataset
//!
//! Holds feature rows already converted to SCALE = 1_000_000 integers and
//! binary targets.

use dropout_gbdt::to_fixed;

use crate::errors::TrainerError;

/// Rectangular fixed-point feature matrix with a binary label per row.
#[derive(Clone, Debug)]
pub struct Dataset {
    pub features: Vec<Vec<i64>>,
    pub targets: Vec<u8>,
    /// Width shared by every row.
    pub feature_count: usize,
}

impl Dataset {
    /// Build a dataset from fixed-point rows, checking shape and labels.
    pub fn new(features: Vec<Vec<i64>>, targets: Vec<u8>) -> Result<Self, TrainerError> {
        let Some(first) = features.first() else {
            return Err(TrainerError::Dataset("dataset is empty".into()));
        };
        if features.len() != targets.len() {
            return Err(TrainerError::Dataset(format!(
                "{} feature rows but {} targets",
                features.len(),
                targets.len()
            )));
        }

        let feature_count = first.len();
        if let Some((idx, row)) = features
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != feature_count)
        {
            return Err(TrainerError::Dataset(format!(
                "row {idx}: expected {feature_count} features, got {}",
                row.len()
            )));
        }

        if let Some(idx) = targets.iter().position(|&t| t > 1) {
            return Err(TrainerError::Dataset(format!(
                "row {}: target must be 0 or 1, got {}",
                idx, targets[idx]
            )));
        }

        Ok(Self {
            features,
            targets,
            feature_count,
        })
    }

    /// Build a dataset from real-valued rows, converting to fixed-point.
    pub fn from_f64_rows(rows: &[Vec<f64>], targets: &[u8]) -> Result<Self, TrainerError> {
        let mut features = Vec::with_capacity(rows.len());
        for (idx, row) in rows.iter().enumerate() {
            if row.iter().any(|v| !v.is_finite()) {
                return Err(TrainerError::Dataset(format!(
                    "row {idx}: non-finite feature value"
                )));
            }
            features.push(row.iter().copied().map(to_fixed).collect());
        }
        Self::new(features, targets.to_vec())
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Number of positive (class 1) samples
    pub fn positives(&self) -> usize {
        self.targets.iter().filter(|&&t| t == 1).count()
    }
}

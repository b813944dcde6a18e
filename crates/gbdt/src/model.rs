//! Binary GBDT classifier
//!
//! The ensemble sums fixed-point leaf values into log-odds; the logistic
//! link turns them into the probability of the positive class.

use super::tree::Tree;
use crate::fixed::sigmoid;
use crate::serde_canon::{hash_canonical_hex, to_canonical_json, CanonicalError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("invalid model: {0}")]
    Invalid(String),

    #[error("model I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("model JSON could not be parsed: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Canonical(#[from] CanonicalError),
}

/// Fixed-point unit: 1.0 == 1_000_000.
pub const SCALE: i64 = 1_000_000;

pub const MODEL_VERSION: i32 = 1;

/// Probability above which a row is labeled positive.
const DECISION_BOUNDARY: f64 = 0.5;

/// Tree ensemble with an additive log-odds bias.
///
/// Features, thresholds and leaves share `scale`; the summed score is read
/// back at `post_scale`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Model {
    pub version: i32,
    pub scale: i64,
    pub trees: Vec<Tree>,
    /// Prior log-odds of the positive class.
    pub bias: i64,
    pub post_scale: i64,
}

impl Model {
    pub fn new(trees: Vec<Tree>, bias: i64) -> Self {
        Self {
            version: MODEL_VERSION,
            scale: SCALE,
            trees,
            bias,
            post_scale: SCALE,
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.version != MODEL_VERSION {
            return Err(invalid(format!(
                "version {} is not supported (expected {MODEL_VERSION})",
                self.version
            )));
        }
        if self.scale <= 0 || self.post_scale <= 0 {
            return Err(invalid(format!(
                "scales must be positive (scale {}, post_scale {})",
                self.scale, self.post_scale
            )));
        }
        self.trees
            .iter()
            .enumerate()
            .try_for_each(|(i, tree)| tree.validate().map_err(|e| invalid(format!("tree {i}: {e}"))))
    }

    /// Fixed-point log-odds: bias plus every leaf scaled by its tree weight.
    pub fn score(&self, features: &[i64]) -> i64 {
        let scale = i128::from(self.scale);
        self.trees.iter().fold(self.bias, |acc, tree| {
            let weighted = i128::from(tree.evaluate(features)) * i128::from(tree.weight) / scale;
            acc.saturating_add(weighted as i64)
        })
    }

    /// Probability of the positive class, in `[0, 1]`.
    pub fn probability(&self, features: &[i64]) -> f64 {
        let log_odds = self.score(features) as f64 / self.post_scale as f64;
        sigmoid(log_odds).clamp(0.0, 1.0)
    }

    /// Label and positive-class probability. Exactly one half is label 0.
    pub fn classify(&self, features: &[i64]) -> (u8, f64) {
        let probability = self.probability(features);
        (u8::from(probability > DECISION_BOUNDARY), probability)
    }

    /// Minimum feature-vector length this model can score without
    /// falling off a split.
    pub fn required_features(&self) -> usize {
        self.trees
            .iter()
            .filter_map(Tree::max_feature_index)
            .max()
            .map_or(0, |idx| idx + 1)
    }

    pub fn to_canonical_json(&self) -> Result<String, ModelError> {
        Ok(to_canonical_json(self)?)
    }

    /// BLAKE3 of the canonical JSON, hex encoded.
    pub fn hash_hex(&self) -> Result<String, ModelError> {
        Ok(hash_canonical_hex(self)?)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), ModelError> {
        fs::write(path, self.to_canonical_json()?)?;
        Ok(())
    }

    /// Read a model and reject it unless it validates.
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, ModelError> {
        let model: Model = serde_json::from_str(&fs::read_to_string(path)?)?;
        model.validate()?;
        Ok(model)
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }
}

fn invalid(reason: String) -> ModelError {
    ModelError::Invalid(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Node;

    /// Low IDEB (feature 0) and high dropout rate (feature 1) raise the risk.
    fn risk_model() -> Model {
        let by_ideb = Tree::new(
            vec![
                Node::internal(0, 0, 5 * SCALE, 1, 2),
                Node::leaf(1, 2 * SCALE),
                Node::leaf(2, -SCALE),
            ],
            SCALE,
        );
        let by_rate = Tree::new(
            vec![
                Node::internal(0, 1, 20 * SCALE, 1, 2),
                Node::leaf(1, -SCALE),
                Node::leaf(2, SCALE),
            ],
            SCALE / 4,
        );
        Model::new(vec![by_ideb, by_rate], SCALE / 10)
    }

    #[test]
    fn test_score_applies_tree_weights() {
        let model = risk_model();
        // 0.1 + 2.0 + 0.25
        assert_eq!(model.score(&[4 * SCALE, 30 * SCALE]), 2_350_000);
        // 0.1 - 1.0 - 0.25
        assert_eq!(model.score(&[6 * SCALE, 10 * SCALE]), -1_150_000);
    }

    #[test]
    fn test_classify_follows_probability() {
        let model = risk_model();

        let (label, p) = model.classify(&[4 * SCALE, 30 * SCALE]);
        assert_eq!(label, 1);
        assert!(p > 0.9 && p < 1.0);

        let (label, p) = model.classify(&[6 * SCALE, 10 * SCALE]);
        assert_eq!(label, 0);
        assert!(p > 0.0 && p < 0.5);
    }

    #[test]
    fn test_zero_log_odds_is_label_zero() {
        let model = Model::new(Vec::new(), 0);
        assert_eq!(model.classify(&[]), (0, 0.5));
    }

    #[test]
    fn test_required_features() {
        assert_eq!(risk_model().required_features(), 2);
        assert_eq!(Model::new(Vec::new(), SCALE).required_features(), 0);
    }

    #[test]
    fn test_hash_tracks_content() {
        let hash = risk_model().hash_hex().unwrap();
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, risk_model().hash_hex().unwrap());

        let mut shifted = risk_model();
        shifted.bias += 1;
        assert_ne!(hash, shifted.hash_hex().unwrap());
    }

    #[test]
    fn test_json_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");

        risk_model().save_json(&path).unwrap();
        assert_eq!(Model::load_json(&path).unwrap(), risk_model());
    }

    #[test]
    fn test_load_rejects_invalid_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");

        let mut model = risk_model();
        model.post_scale = 0;
        model.save_json(&path).unwrap();
        assert!(matches!(Model::load_json(&path), Err(ModelError::Invalid(_))));

        model = risk_model();
        model.version = 2;
        assert!(model.validate().is_err());
    }
}

//! Gradient Boosted Decision Tree (GBDT) classifier trainer
//!
//! Deterministic binary GBDT training with logistic loss. Features, tree
//! thresholds, leaves and the shrinkage factor are fixed-point integers;
//! only the logistic link is evaluated in floating point.

use dropout_gbdt::{from_fixed, sigmoid, to_fixed, Model, Tree, SCALE};

use crate::cart::{CartBuilder, TreeConfig};
use crate::dataset::Dataset;
use crate::errors::TrainerError;

/// GBDT training configuration
#[derive(Clone, Debug, PartialEq)]
pub struct TrainingParams {
    pub num_trees: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub learning_rate: i64, // Fixed-point, e.g., 100_000 = 0.1
    pub quant_step: i64,
    pub l2_regularization: i64, // Fixed-point
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            num_trees: 100,
            max_depth: 3,
            min_samples_leaf: 1,
            learning_rate: 100_000, // 0.1 in fixed-point
            quant_step: 1000,
            l2_regularization: SCALE,
        }
    }
}

impl TrainingParams {
    pub fn validate(&self) -> Result<(), TrainerError> {
        if self.num_trees == 0 {
            return Err(TrainerError::Training("num_trees must be at least 1".into()));
        }
        if self.learning_rate <= 0 {
            return Err(TrainerError::Training(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.quant_step <= 0 {
            return Err(TrainerError::Training(format!(
                "quant_step must be positive, got {}",
                self.quant_step
            )));
        }
        if self.l2_regularization < 0 {
            return Err(TrainerError::Training(format!(
                "l2_regularization must not be negative, got {}",
                self.l2_regularization
            )));
        }
        Ok(())
    }
}

/// GBDT trainer
pub struct GbdtTrainer {
    params: TrainingParams,
}

impl GbdtTrainer {
    pub fn new(params: TrainingParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &TrainingParams {
        &self.params
    }

    /// Train a binary classifier on the given dataset
    pub fn train(&self, dataset: &Dataset) -> Result<Model, TrainerError> {
        self.params.validate()?;

        let n_samples = dataset.len();
        let positives = dataset.positives();
        if positives == 0 || positives == n_samples {
            return Err(TrainerError::Dataset(format!(
                "targets must contain both classes ({positives} positives in {n_samples} samples)"
            )));
        }

        let bias = Self::initial_log_odds(positives, n_samples - positives);
        let mut predictions = vec![bias; n_samples];
        let mut trees = Vec::with_capacity(self.params.num_trees);

        let tree_config = TreeConfig {
            max_depth: self.params.max_depth,
            min_samples_leaf: self.params.min_samples_leaf,
            quant_step: self.params.quant_step,
            l2_regularization: self.params.l2_regularization,
        };

        for tree_idx in 0..self.params.num_trees {
            let (gradients, hessians) =
                Self::calculate_gradients_hessians(&dataset.targets, &predictions);

            let builder = CartBuilder::new(
                &dataset.features,
                &gradients,
                &hessians,
                tree_config.clone(),
            );
            let mut tree = builder.build();
            tree.weight = self.params.learning_rate;

            self.update_predictions(&tree, &dataset.features, &mut predictions);

            tracing::debug!(
                "Tree {}/{}: {} nodes",
                tree_idx + 1,
                self.params.num_trees,
                tree.nodes.len()
            );
            trees.push(tree);
        }

        tracing::info!(
            samples = n_samples,
            positives,
            trees = trees.len(),
            train_log_loss = Self::log_loss(&dataset.targets, &predictions),
            "GBDT training complete"
        );

        Ok(Model::new(trees, bias))
    }

    /// Log-odds of the positive class, fixed-point
    fn initial_log_odds(positives: usize, negatives: usize) -> i64 {
        to_fixed((positives as f64 / negatives as f64).ln())
    }

    /// Logistic loss derivatives in fixed-point:
    /// gradient = p - y, hessian = p * (1 - p) (floored at one micro unit)
    fn calculate_gradients_hessians(targets: &[u8], predictions: &[i64]) -> (Vec<i64>, Vec<i64>) {
        targets
            .iter()
            .zip(predictions)
            .map(|(&target, &prediction)| {
                let p = to_fixed(sigmoid(from_fixed(prediction)));
                let y = i64::from(target) * SCALE;
                let hessian = (p as i128 * (SCALE - p) as i128 / SCALE as i128) as i64;
                (p - y, hessian.max(1))
            })
            .unzip()
    }

    /// Update predictions with the tree output scaled by its weight
    fn update_predictions(&self, tree: &Tree, features: &[Vec<i64>], predictions: &mut [i64]) {
        for (prediction, feature_vec) in predictions.iter_mut().zip(features) {
            let leaf = tree.evaluate(feature_vec) as i128;
            let scaled_value = (leaf * tree.weight as i128 / SCALE as i128) as i64;
            *prediction = prediction.saturating_add(scaled_value);
        }
    }

    fn log_loss(targets: &[u8], predictions: &[i64]) -> f64 {
        let eps = 1e-15;
        let total: f64 = targets
            .iter()
            .zip(predictions)
            .map(|(&t, &pred)| {
                let p = sigmoid(from_fixed(pred)).clamp(eps, 1.0 - eps);
                if t == 1 {
                    -p.ln()
                } else {
                    -(1.0 - p).ln()
                }
            })
            .sum();
        total / targets.len().max(1) as f64
    }
}

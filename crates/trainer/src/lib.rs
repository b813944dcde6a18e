//! Deterministic offline GBDT classifier trainer
//!
//! Trains binary gradient boosted tree ensembles with logistic loss over
//! fixed-point features, producing identical models across runs and
//! platforms for the same data and parameters.

pub mod cart;
pub mod dataset;
pub mod deterministic;
pub mod errors;
pub mod trainer;

use dropout_gbdt::Model;

pub use dataset::Dataset;
pub use deterministic::{LcgRng, SplitTieBreaker};
pub use errors::TrainerError;
pub use trainer::{GbdtTrainer, TrainingParams};

/// Train a classifier on `dataset` with the provided parameters.
pub fn train_model(dataset: &Dataset, params: TrainingParams) -> Result<Model, TrainerError> {
    GbdtTrainer::new(params).train(dataset)
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Training and evaluation driver
//!
//! Merged table → feature rows → one-hot encoding with manifest →
//! stratified split → GBDT fit on the training partition → held-out metrics.

use crate::config::PipelineConfig;
use crate::encoding::{EncodingAligner, FeatureColumnManifest, FeatureRow, FeatureSpec};
use crate::errors::{PipelineError, Result};
use crate::metrics::{EvaluationReport, ProbabilityDistribution};
use crate::record::SchoolRecord;
use crate::split::{stratified_split, SplitConfig};
use dropout_gbdt::{to_fixed, Model};
use dropout_trainer::{train_model, Dataset, TrainingParams};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

/// Fixed-point view of an encoded row, as the classifier consumes it.
pub fn to_fixed_row(row: &[f64]) -> Vec<i64> {
    row.iter().map(|&v| to_fixed(v)).collect()
}

/// Result of one training run.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub model: Model,
    pub manifest: FeatureColumnManifest,
    pub evaluation: EvaluationReport,
    pub train_samples: usize,
}

#[derive(Debug, Clone)]
pub struct TrainingDriver {
    spec: FeatureSpec,
    split: SplitConfig,
    params: TrainingParams,
}

impl Default for TrainingDriver {
    fn default() -> Self {
        Self::new(SplitConfig::default(), TrainingParams::default())
    }
}

impl TrainingDriver {
    pub fn new(split: SplitConfig, params: TrainingParams) -> Self {
        Self {
            spec: FeatureSpec::default(),
            split,
            params,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.split, config.model.training_params())
    }

    pub fn params(&self) -> &TrainingParams {
        &self.params
    }

    /// Fit the encoding and the classifier, then evaluate on the held-out
    /// partition. A partition with a single class aborts the run.
    #[instrument(skip_all, fields(rows = records.len()))]
    pub fn run(&self, records: &[SchoolRecord]) -> Result<TrainingOutcome> {
        let rows: Vec<FeatureRow> = records.iter().map(FeatureRow::from_record).collect();
        let targets: Vec<u8> = records.iter().map(|r| r.high_dropout_risk).collect();

        let (matrix, manifest) = EncodingAligner::new(self.spec.clone()).fit(&rows)?;
        let split = stratified_split(&targets, &self.split)?;

        let pick = |indices: &[usize]| -> (Vec<Vec<f64>>, Vec<u8>) {
            indices
                .iter()
                .map(|&i| (matrix.rows[i].clone(), targets[i]))
                .unzip()
        };
        let (train_rows, train_targets) = pick(&split.train);
        let (test_rows, test_targets) = pick(&split.test);

        let dataset = Dataset::from_f64_rows(&train_rows, &train_targets)?;
        let model = train_model(&dataset, self.params.clone())?;

        let predicted: Vec<u8> = test_rows
            .iter()
            .map(|row| model.classify(&to_fixed_row(row)).0)
            .collect();
        let evaluation = EvaluationReport::from_labels(&test_targets, &predicted);

        info!(
            train = train_rows.len(),
            test = test_rows.len(),
            features = manifest.len(),
            precision = evaluation.precision,
            recall = evaluation.recall,
            f1 = evaluation.f1,
            "Model evaluation on held-out partition"
        );

        Ok(TrainingOutcome {
            model,
            manifest,
            evaluation,
            train_samples: train_rows.len(),
        })
    }
}

/// Scores of a trained model over a whole merged table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullEvaluation {
    pub report: EvaluationReport,
    pub probabilities: ProbabilityDistribution,
}

/// Score every record with the persisted model and manifest.
pub fn evaluate_records(
    model: &Model,
    manifest: &FeatureColumnManifest,
    records: &[SchoolRecord],
) -> Result<FullEvaluation> {
    let mut predicted = Vec::with_capacity(records.len());
    let mut probabilities = Vec::with_capacity(records.len());
    for record in records {
        let aligned = manifest.align(&FeatureRow::from_record(record))?;
        let (label, probability) = model.classify(&to_fixed_row(&aligned));
        predicted.push(label);
        probabilities.push(probability);
    }

    let actual: Vec<u8> = records.iter().map(|r| r.high_dropout_risk).collect();
    let probabilities = ProbabilityDistribution::from_probabilities(&probabilities)
        .ok_or_else(|| PipelineError::DataQuality("no records to evaluate".into()))?;

    Ok(FullEvaluation {
        report: EvaluationReport::from_labels(&actual, &predicted),
        probabilities,
    })
}

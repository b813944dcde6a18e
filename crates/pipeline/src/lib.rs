//! School dropout-risk pipeline
//!
//! Raw IDEB, socioeconomic and transition-rate tables are merged into one
//! record per school, imputed, labeled with a binary high-dropout-risk
//! target and used to train a gradient boosted classifier. The one-hot
//! feature layout fixed at training time is persisted with the model in a
//! [`ModelBundle`], and every single-school prediction is realigned to it.
//!
//! ```text
//! load_sources → FeatureMerger::merge → write_merged_csv
//!             → TrainingDriver::run → ModelBundle::save
//!             → RiskState::load → predict(SimulatedSchool)
//! ```

pub mod artifacts;
pub mod config;
pub mod encoding;
pub mod errors;
pub mod inference;
pub mod loader;
pub mod merge;
pub mod metrics;
pub mod network;
pub mod persist;
pub mod record;
pub mod split;
pub mod state;
pub mod summary;
pub mod training;

pub use artifacts::ModelBundle;
pub use config::PipelineConfig;
pub use encoding::{EncodedMatrix, EncodingAligner, FeatureColumnManifest, FeatureRow, FeatureSpec};
pub use errors::{EncodingMismatchError, PipelineError, Result};
pub use inference::{InferenceAdapter, Prediction, SimulatedSchool};
pub use loader::{load_sources, RawSources, RawTable, SourceKind, SourcePaths};
pub use merge::{FeatureMerger, MergedTable, ThresholdDecision, ThresholdRule};
pub use metrics::{ConfusionMatrix, EvaluationReport, ProbabilityDistribution};
pub use network::NetworkType;
pub use record::{read_merged_csv, write_merged_csv, SchoolRecord};
pub use split::{stratified_split, SplitConfig, TrainTestSplit};
pub use state::RiskState;
pub use summary::{DashboardSummary, DataQualityReport, TargetDistribution};
pub use training::{evaluate_records, FullEvaluation, TrainingDriver, TrainingOutcome};

/// Load, merge and persist the merged table in one step. The table file is
/// written only when the whole merge succeeds.
pub fn prepare(config: &PipelineConfig) -> Result<MergedTable> {
    let sources = load_sources(&config.source_paths())?;
    let merged = FeatureMerger::new(config.target.threshold).merge(&sources)?;
    write_merged_csv(config.merged_table_path(), &merged.records)?;
    Ok(merged)
}

/// Train on merged records and persist model and manifest together.
pub fn train(config: &PipelineConfig, records: &[SchoolRecord]) -> Result<ModelBundle> {
    let threshold = reconstruct_threshold(config.target.threshold, records);
    check_targets(&threshold, records)?;
    let outcome = TrainingDriver::from_config(config).run(records)?;
    let bundle = ModelBundle::new(outcome, threshold, merge::mean_historical_rate(records));
    bundle.save(config.model_bundle_path())?;
    Ok(bundle)
}

/// Threshold decision of a merged table read back from disk: the same rule
/// the merge applied, replayed over the persisted rates.
pub fn reconstruct_threshold(configured: f64, records: &[SchoolRecord]) -> ThresholdDecision {
    let rates: Vec<f64> = records.iter().map(|r| r.historical_dropout_rate).collect();
    merge::decide_threshold(&rates, configured)
}

/// Every persisted target must follow from `decision`. A table prepared
/// under another threshold is rejected instead of being bundled with a
/// decision that does not describe it.
pub fn check_targets(decision: &ThresholdDecision, records: &[SchoolRecord]) -> Result<()> {
    match records
        .iter()
        .find(|r| merge::derive_target(r.historical_dropout_rate, decision.value) != r.high_dropout_risk)
    {
        Some(record) => Err(PipelineError::DataQuality(format!(
            "school {}: alta_evasao = {} does not match threshold {} (rate {}); \
             was the table prepared with a different threshold?",
            record.school_id, record.high_dropout_risk, decision.value, record.historical_dropout_rate
        ))),
        None => Ok(()),
    }
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Load-once process state
//!
//! Holds the merged table and the model bundle behind an `Arc` snapshot.
//! Readers clone the snapshot and never observe a half-reloaded state;
//! `refresh` is the only way to replace it.

use crate::artifacts::ModelBundle;
use crate::config::PipelineConfig;
use crate::errors::{EncodingMismatchError, PipelineError, Result};
use crate::inference::{InferenceAdapter, Prediction, SimulatedSchool};
use crate::record::{read_merged_csv, SchoolRecord};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Immutable artifacts of one load.
#[derive(Debug, Clone)]
pub struct LoadedArtifacts {
    pub bundle: ModelBundle,
    pub records: Vec<SchoolRecord>,
}

impl LoadedArtifacts {
    pub fn load(bundle_path: &Path, merged_path: &Path) -> Result<Self> {
        let bundle = ModelBundle::load(bundle_path)?;
        let records = read_merged_csv(merged_path)?;
        Ok(Self { bundle, records })
    }

    pub fn adapter(&self) -> InferenceAdapter<'_> {
        InferenceAdapter::from_bundle(&self.bundle)
    }
}

pub struct RiskState {
    bundle_path: PathBuf,
    merged_path: PathBuf,
    current: RwLock<Arc<LoadedArtifacts>>,
}

impl RiskState {
    /// Load both artifacts. Fails without a partially initialized state.
    pub fn load(bundle_path: impl Into<PathBuf>, merged_path: impl Into<PathBuf>) -> Result<Self> {
        let bundle_path = bundle_path.into();
        let merged_path = merged_path.into();
        let artifacts = LoadedArtifacts::load(&bundle_path, &merged_path)?;
        info!(
            bundle = %bundle_path.display(),
            rows = artifacts.records.len(),
            "Risk state loaded"
        );
        Ok(Self {
            bundle_path,
            merged_path,
            current: RwLock::new(Arc::new(artifacts)),
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Self::load(config.model_bundle_path(), config.merged_table_path())
    }

    /// Current artifacts. Stays valid even if a refresh happens later.
    pub fn snapshot(&self) -> Arc<LoadedArtifacts> {
        Arc::clone(&self.current.read())
    }

    /// Reload from disk. On failure the previous snapshot stays in place.
    pub fn refresh(&self) -> Result<()> {
        match LoadedArtifacts::load(&self.bundle_path, &self.merged_path) {
            Ok(artifacts) => {
                *self.current.write() = Arc::new(artifacts);
                info!(bundle = %self.bundle_path.display(), "Risk state refreshed");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Risk state refresh failed; keeping previous artifacts");
                Err(e)
            }
        }
    }

    pub fn predict(&self, school: &SimulatedSchool) -> std::result::Result<Prediction, EncodingMismatchError> {
        self.snapshot().adapter().predict(school)
    }
}

static GLOBAL: OnceCell<RiskState> = OnceCell::new();

/// Install the process-wide state. Only the first call succeeds.
pub fn init_global(state: RiskState) -> Result<&'static RiskState> {
    GLOBAL
        .set(state)
        .map_err(|_| PipelineError::Config("global risk state already initialized".into()))?;
    GLOBAL
        .get()
        .ok_or_else(|| PipelineError::Config("global risk state unavailable".into()))
}

/// The process-wide state, if installed.
pub fn global() -> Option<&'static RiskState> {
    GLOBAL.get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::{ThresholdDecision, ThresholdRule};
    use crate::metrics::EvaluationReport;
    use crate::network::NetworkType;
    use crate::record::write_merged_csv;
    use crate::encoding::FeatureColumnManifest;
    use dropout_gbdt::{Model, Node, Tree, SCALE};
    use std::fs;

    fn bundle(leaf: i64) -> ModelBundle {
        ModelBundle {
            format_version: crate::artifacts::BUNDLE_FORMAT_VERSION,
            created_at: "2025-06-08T00:00:00+00:00".into(),
            model: Model::new(vec![Tree::new(vec![Node::leaf(0, leaf)], SCALE)], 0),
            manifest: FeatureColumnManifest {
                numeric: vec!["ideb".into(), "nivel_socioeconomico".into(), "taxa_evasao_historica".into()],
                categorical: vec!["sigla_uf".into(), "rede".into()],
                columns: vec![
                    "ideb".into(),
                    "nivel_socioeconomico".into(),
                    "taxa_evasao_historica".into(),
                    "sigla_uf_SP".into(),
                    "rede_public".into(),
                ],
            },
            threshold: ThresholdDecision {
                configured: 20.0,
                value: 20.0,
                rule: ThresholdRule::Configured,
            },
            mean_historical_rate: 12.0,
            evaluation: EvaluationReport::from_labels(&[0, 1], &[0, 1]),
        }
    }

    fn school() -> SimulatedSchool {
        SimulatedSchool {
            ideb: 7.0,
            socioeconomic_index: 60.0,
            state: "SP".into(),
            network: "public".into(),
            historical_dropout_rate: None,
        }
    }

    fn fixture(dir: &Path) -> (PathBuf, PathBuf) {
        let bundle_path = dir.join("bundle.json");
        let merged_path = dir.join("merged.csv");
        bundle(-SCALE).save(&bundle_path).unwrap();
        write_merged_csv(
            &merged_path,
            &[SchoolRecord::new("1", "SP", NetworkType::Public, 5.0, 50.0, 12.0)],
        )
        .unwrap();
        (bundle_path, merged_path)
    }

    #[test]
    fn test_load_and_predict() {
        let dir = tempfile::tempdir().unwrap();
        let (bundle_path, merged_path) = fixture(dir.path());

        let state = RiskState::load(&bundle_path, &merged_path).unwrap();
        assert_eq!(state.snapshot().records.len(), 1);
        assert_eq!(state.predict(&school()).unwrap().label, 0);
    }

    #[test]
    fn test_refresh_replaces_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let (bundle_path, merged_path) = fixture(dir.path());
        let state = RiskState::load(&bundle_path, &merged_path).unwrap();
        let before = state.snapshot();

        bundle(SCALE).save(&bundle_path).unwrap();
        state.refresh().unwrap();

        // Old readers keep their snapshot; new ones see the reload.
        assert_eq!(before.adapter().predict(&school()).unwrap().label, 0);
        assert_eq!(state.predict(&school()).unwrap().label, 1);
    }

    #[test]
    fn test_failed_refresh_keeps_previous() {
        let dir = tempfile::tempdir().unwrap();
        let (bundle_path, merged_path) = fixture(dir.path());
        let state = RiskState::load(&bundle_path, &merged_path).unwrap();

        fs::write(&bundle_path, "{ corrupted").unwrap();
        assert!(state.refresh().is_err());
        assert_eq!(state.predict(&school()).unwrap().label, 0);
    }

    #[test]
    fn test_load_fails_on_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RiskState::load(dir.path().join("a.json"), dir.path().join("b.csv")).is_err());
    }

    #[test]
    fn test_global_initializes_once() {
        let dir = tempfile::tempdir().unwrap();
        let (bundle_path, merged_path) = fixture(dir.path());

        let first = init_global(RiskState::load(&bundle_path, &merged_path).unwrap());
        assert!(first.is_ok());
        assert!(global().is_some());

        let second = init_global(RiskState::load(&bundle_path, &merged_path).unwrap());
        assert!(second.is_err());
    }
}

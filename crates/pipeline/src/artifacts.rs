//! Model bundle: classifier, feature manifest and training metadata
//! persisted together as canonical JSON with a BLAKE3 hash sidecar.

use crate::encoding::FeatureColumnManifest;
use crate::errors::{PipelineError, Result};
use crate::merge::ThresholdDecision;
use crate::metrics::EvaluationReport;
use crate::persist::write_atomic;
use crate::training::TrainingOutcome;
use chrono::Utc;
use dropout_gbdt::{blake3_hex, to_canonical_json, Model};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Current bundle format version
pub const BUNDLE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle {
    pub format_version: u32,
    /// RFC 3339 creation time
    pub created_at: String,
    pub model: Model,
    pub manifest: FeatureColumnManifest,
    pub threshold: ThresholdDecision,
    /// Mean historical dropout rate of the training table; fills a missing
    /// rate at inference.
    pub mean_historical_rate: f64,
    pub evaluation: EvaluationReport,
}

/// Sidecar path holding the bundle hash.
pub fn hash_path(path: &Path) -> PathBuf {
    path.with_extension("hash")
}

impl ModelBundle {
    pub fn new(
        outcome: TrainingOutcome,
        threshold: ThresholdDecision,
        mean_historical_rate: f64,
    ) -> Self {
        Self {
            format_version: BUNDLE_FORMAT_VERSION,
            created_at: Utc::now().to_rfc3339(),
            model: outcome.model,
            manifest: outcome.manifest,
            threshold,
            mean_historical_rate,
            evaluation: outcome.evaluation,
        }
    }

    /// Check that model and manifest belong together.
    pub fn validate(&self) -> Result<()> {
        if self.format_version != BUNDLE_FORMAT_VERSION {
            return Err(PipelineError::Artifact(format!(
                "unsupported bundle format version {}",
                self.format_version
            )));
        }
        self.model.validate()?;
        self.manifest.validate()?;

        let required = self.model.required_features();
        if required > self.manifest.len() {
            return Err(PipelineError::Artifact(format!(
                "model reads {required} features but the manifest has {} columns",
                self.manifest.len()
            )));
        }
        if !self.mean_historical_rate.is_finite() {
            return Err(PipelineError::Artifact(
                "mean historical rate is not finite".into(),
            ));
        }
        Ok(())
    }

    pub fn to_canonical_json(&self) -> Result<String> {
        to_canonical_json(self).map_err(|e| PipelineError::Artifact(e.to_string()))
    }

    /// Write `<path>` and its `.hash` sidecar. Returns the hash.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<String> {
        let path = path.as_ref();
        self.validate()?;

        let json = self.to_canonical_json()?;
        let hash = blake3_hex(json.as_bytes());
        write_atomic(path, json.as_bytes())?;
        write_atomic(&hash_path(path), hash.as_bytes())?;

        info!(
            path = %path.display(),
            hash = %hash,
            trees = self.model.num_trees(),
            features = self.manifest.len(),
            "Model bundle saved"
        );
        Ok(hash)
    }

    /// Load a bundle, verifying the hash sidecar when present.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| {
            PipelineError::Artifact(format!("cannot read bundle {}: {e}", path.display()))
        })?;

        let sidecar = hash_path(path);
        if sidecar.exists() {
            let expected = fs::read_to_string(&sidecar)?;
            let actual = blake3_hex(&bytes);
            if expected.trim() != actual {
                return Err(PipelineError::Artifact(format!(
                    "hash mismatch for {}: expected {}, got {actual}",
                    path.display(),
                    expected.trim()
                )));
            }
        } else {
            warn!(path = %path.display(), "No hash sidecar; bundle integrity not verified");
        }

        let bundle: ModelBundle = serde_json::from_slice(&bytes)?;
        bundle.validate()?;
        Ok(bundle)
    }
}

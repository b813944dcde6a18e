//! Single-school inference against a persisted bundle.

use crate::artifacts::ModelBundle;
use crate::encoding::{FeatureColumnManifest, FeatureRow};
use crate::errors::EncodingMismatchError;
use crate::network::NetworkType;
use crate::training::to_fixed_row;
use dropout_gbdt::Model;
use serde::{Deserialize, Serialize};

/// A hypothetical school entered in the simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedSchool {
    pub ideb: f64,
    pub socioeconomic_index: f64,
    pub state: String,
    /// Raw network value; normalized like the training data.
    pub network: String,
    /// Falls back to the training-table mean when absent.
    #[serde(default)]
    pub historical_dropout_rate: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: u8,
    pub probability: f64,
}

impl Prediction {
    pub fn is_high_risk(&self) -> bool {
        self.label == 1
    }
}

/// Scores simulated schools with a model and the manifest it was trained
/// with.
#[derive(Debug, Clone, Copy)]
pub struct InferenceAdapter<'a> {
    model: &'a Model,
    manifest: &'a FeatureColumnManifest,
    mean_historical_rate: f64,
}

impl<'a> InferenceAdapter<'a> {
    pub fn new(
        model: &'a Model,
        manifest: &'a FeatureColumnManifest,
        mean_historical_rate: f64,
    ) -> Self {
        Self {
            model,
            manifest,
            mean_historical_rate,
        }
    }

    pub fn from_bundle(bundle: &'a ModelBundle) -> Self {
        Self::new(&bundle.model, &bundle.manifest, bundle.mean_historical_rate)
    }

    /// Feature row of a simulated school, before alignment.
    pub fn feature_row(
        &self,
        school: &SimulatedSchool,
    ) -> Result<FeatureRow, EncodingMismatchError> {
        let network = NetworkType::normalize(&school.network).ok_or_else(|| {
            EncodingMismatchError::new(
                "rede",
                format!("unrecognized network type `{}`", school.network.trim()),
            )
        })?;
        let state = school.state.trim().to_uppercase();
        if state.is_empty() {
            return Err(EncodingMismatchError::new("sigla_uf", "empty state code"));
        }
        let rate = school
            .historical_dropout_rate
            .unwrap_or(self.mean_historical_rate);

        Ok(FeatureRow::new()
            .with_numeric("ideb", school.ideb)
            .with_numeric("nivel_socioeconomico", school.socioeconomic_index)
            .with_numeric("taxa_evasao_historica", rate)
            .with_categorical("sigla_uf", state)
            .with_categorical("rede", network.as_str()))
    }

    /// Align the school with the manifest and score it.
    pub fn predict(&self, school: &SimulatedSchool) -> Result<Prediction, EncodingMismatchError> {
        let row = self.feature_row(school)?;
        let aligned = self.manifest.align(&row)?;
        let (label, probability) = self.model.classify(&to_fixed_row(&aligned));
        tracing::debug!(label, probability, state = %school.state, "Prediction");
        Ok(Prediction { label, probability })
    }
}

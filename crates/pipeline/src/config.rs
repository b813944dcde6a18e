//! Pipeline configuration
//!
//! Defaults, then an optional TOML file, then `DROPOUT_RISK_*` environment
//! overrides, then validation.

use crate::errors::{PipelineError, Result};
use crate::loader::SourcePaths;
use crate::merge::DEFAULT_THRESHOLD;
use crate::split::SplitConfig;
use dropout_gbdt::to_fixed;
use dropout_trainer::TrainingParams;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const ENV_PREFIX: &str = "DROPOUT_RISK_";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sources: SourcesConfig,
    pub target: TargetConfig,
    pub split: SplitConfig,
    pub model: ModelConfig,
    pub artifacts: ArtifactsConfig,
}

/// Raw dataset locations. Relative paths resolve against `data_dir`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub data_dir: PathBuf,
    pub ideb: PathBuf,
    pub socioeconomic: PathBuf,
    pub transition_rates: PathBuf,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            ideb: PathBuf::from("DadosBrutos/ideb/ideb_escola.csv"),
            socioeconomic: PathBuf::from(
                "DadosBrutos/nivel_socioeconomico/br_inep_indicadores_educacionais_escola_nivel_socioeconomico.csv",
            ),
            transition_rates: PathBuf::from(
                "DadosBrutos/taxa_transicao/br_inep_indicadores_educacionais_uf_taxa_transicao.csv",
            ),
        }
    }
}

impl SourcesConfig {
    pub fn paths(&self) -> SourcePaths {
        SourcePaths {
            ideb: resolve(&self.data_dir, &self.ideb),
            socioeconomic: resolve(&self.data_dir, &self.socioeconomic),
            transition_rates: resolve(&self.data_dir, &self.transition_rates),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Historical dropout rate (percent) above which a school is high risk.
    pub threshold: f64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

/// Classifier hyper-parameters in natural units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub num_trees: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub learning_rate: f64,
    pub quantization_step: f64,
    pub l2_regularization: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            num_trees: 100,
            max_depth: 3,
            min_samples_leaf: 1,
            learning_rate: 0.1,
            quantization_step: 0.001,
            l2_regularization: 1.0,
        }
    }
}

impl ModelConfig {
    pub fn training_params(&self) -> TrainingParams {
        TrainingParams {
            num_trees: self.num_trees,
            max_depth: self.max_depth,
            min_samples_leaf: self.min_samples_leaf,
            learning_rate: to_fixed(self.learning_rate),
            quant_step: to_fixed(self.quantization_step),
            l2_regularization: to_fixed(self.l2_regularization),
        }
    }
}

/// Output locations. Relative paths resolve against the sources' `data_dir`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactsConfig {
    pub merged_table: PathBuf,
    pub model_bundle: PathBuf,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            merged_table: PathBuf::from("processed_data.csv"),
            model_bundle: PathBuf::from("gradient_boosting_model.json"),
        }
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

impl PipelineConfig {
    /// Load from an optional TOML file, apply environment overrides and
    /// validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| PipelineError::Config(format!("failed to parse config file: {e}")))
    }

    /// Apply `DROPOUT_RISK_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(value) = var("DATA_DIR") {
            self.sources.data_dir = PathBuf::from(value);
        }
        if let Some(value) = var("MERGED_TABLE") {
            self.artifacts.merged_table = PathBuf::from(value);
        }
        if let Some(value) = var("MODEL_BUNDLE") {
            self.artifacts.model_bundle = PathBuf::from(value);
        }
        if let Some(value) = var("THRESHOLD") {
            self.target.threshold = parse_override("THRESHOLD", &value)?;
        }
        if let Some(value) = var("TEST_FRACTION") {
            self.split.test_fraction = parse_override("TEST_FRACTION", &value)?;
        }
        if let Some(value) = var("SEED") {
            self.split.seed = parse_override("SEED", &value)?;
        }
        if let Some(value) = var("NUM_TREES") {
            self.model.num_trees = parse_override("NUM_TREES", &value)?;
        }
        if let Some(value) = var("LEARNING_RATE") {
            self.model.learning_rate = parse_override("LEARNING_RATE", &value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.target.threshold.is_finite() {
            return Err(PipelineError::Config(format!(
                "target.threshold must be finite, got {}",
                self.target.threshold
            )));
        }
        if !(self.split.test_fraction > 0.0 && self.split.test_fraction < 1.0) {
            return Err(PipelineError::Config(format!(
                "split.test_fraction must be in (0, 1), got {}",
                self.split.test_fraction
            )));
        }
        if self.model.num_trees == 0 {
            return Err(PipelineError::Config("model.num_trees must be at least 1".into()));
        }
        if !(self.model.learning_rate.is_finite() && self.model.learning_rate > 0.0) {
            return Err(PipelineError::Config(format!(
                "model.learning_rate must be positive, got {}",
                self.model.learning_rate
            )));
        }
        if to_fixed(self.model.quantization_step) <= 0 {
            return Err(PipelineError::Config(format!(
                "model.quantization_step must be at least 1e-6, got {}",
                self.model.quantization_step
            )));
        }
        if !(self.model.l2_regularization.is_finite() && self.model.l2_regularization >= 0.0) {
            return Err(PipelineError::Config(format!(
                "model.l2_regularization must not be negative, got {}",
                self.model.l2_regularization
            )));
        }
        Ok(())
    }

    pub fn source_paths(&self) -> SourcePaths {
        self.sources.paths()
    }

    pub fn merged_table_path(&self) -> PathBuf {
        resolve(&self.sources.data_dir, &self.artifacts.merged_table)
    }

    pub fn model_bundle_path(&self) -> PathBuf {
        resolve(&self.sources.data_dir, &self.artifacts.model_bundle)
    }
}

fn parse_override<T: FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| PipelineError::Config(format!("invalid {ENV_PREFIX}{name} `{value}`: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.target.threshold, 20.0);
        assert_eq!(config.split.seed, 42);
        assert_eq!(config.model.training_params(), TrainingParams::default());
    }

    #[test]
    fn test_partial_toml() {
        let config = PipelineConfig::from_toml(
            r#"
            [sources]
            data_dir = "/BigData"

            [target]
            threshold = 15.5
            "#,
        )
        .unwrap();

        assert_eq!(config.target.threshold, 15.5);
        assert_eq!(config.split.test_fraction, 0.3);
        assert_eq!(
            config.merged_table_path(),
            PathBuf::from("/BigData/processed_data.csv")
        );
        assert!(config
            .source_paths()
            .ideb
            .starts_with("/BigData/DadosBrutos/ideb"));
    }

    #[test]
    fn test_absolute_artifact_path_kept() {
        let mut config = PipelineConfig::default();
        config.artifacts.model_bundle = PathBuf::from("/models/bundle.json");
        assert_eq!(config.model_bundle_path(), PathBuf::from("/models/bundle.json"));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<String, String> = [
            ("DROPOUT_RISK_THRESHOLD", "12.5"),
            ("DROPOUT_RISK_SEED", "7"),
            ("DROPOUT_RISK_DATA_DIR", " /tmp/data "),
            ("DROPOUT_RISK_NUM_TREES", ""),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let mut config = PipelineConfig::default();
        config.apply_overrides(|key| vars.get(key).cloned()).unwrap();

        assert_eq!(config.target.threshold, 12.5);
        assert_eq!(config.split.seed, 7);
        assert_eq!(config.sources.data_dir, PathBuf::from("/tmp/data"));
        assert_eq!(config.model.num_trees, 100);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let mut config = PipelineConfig::default();
        let err = config
            .apply_overrides(|key| (key == "DROPOUT_RISK_THRESHOLD").then(|| "high".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("DROPOUT_RISK_THRESHOLD"));
    }

    #[test]
    fn test_validation() {
        let mut config = PipelineConfig::default();
        config.split.test_fraction = 0.0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.target.threshold = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.model.learning_rate = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_file_is_config_error() {
        let err = PipelineConfig::from_file(Path::new("/nonexistent/pipeline.toml")).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}

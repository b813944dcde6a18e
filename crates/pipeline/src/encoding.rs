//! One-hot encoding with a persisted column manifest
//!
//! Training fits the manifest over the full feature table; inference aligns
//! a single row against it. Both paths go through
//! [`FeatureColumnManifest::align`], so a training row and the same row
//! submitted at inference always encode identically.

use crate::errors::{EncodingMismatchError, PipelineError, Result};
use crate::record::SchoolRecord;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Numeric model inputs, in column order.
pub const NUMERIC_FIELDS: [&str; 3] = ["ideb", "nivel_socioeconomico", "taxa_evasao_historica"];

/// Categorical model inputs, one-hot encoded in this order.
pub const CATEGORICAL_FIELDS: [&str; 2] = ["sigla_uf", "rede"];

/// Which source fields feed the model and how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub numeric: Vec<String>,
    pub categorical: Vec<String>,
}

impl Default for FeatureSpec {
    fn default() -> Self {
        Self {
            numeric: NUMERIC_FIELDS.iter().map(|s| s.to_string()).collect(),
            categorical: CATEGORICAL_FIELDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// One un-encoded model input row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureRow {
    pub numeric: Vec<(String, f64)>,
    pub categorical: Vec<(String, String)>,
}

impl FeatureRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_numeric(mut self, field: impl Into<String>, value: f64) -> Self {
        self.numeric.push((field.into(), value));
        self
    }

    pub fn with_categorical(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.categorical.push((field.into(), value.into()));
        self
    }

    /// Model inputs of a merged record; identity and target are excluded.
    pub fn from_record(record: &SchoolRecord) -> Self {
        Self::new()
            .with_numeric("ideb", record.ideb)
            .with_numeric("nivel_socioeconomico", record.socioeconomic_index)
            .with_numeric("taxa_evasao_historica", record.historical_dropout_rate)
            .with_categorical("sigla_uf", record.state.as_str())
            .with_categorical("rede", record.network.as_str())
    }
}

/// Encoded feature table.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedMatrix {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl EncodedMatrix {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Role of one manifest column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind<'a> {
    Numeric,
    Indicator { field: &'a str, category: &'a str },
}

/// Ordered encoded column names fixed at training time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureColumnManifest {
    pub numeric: Vec<String>,
    pub categorical: Vec<String>,
    pub columns: Vec<String>,
}

pub fn indicator_column(field: &str, category: &str) -> String {
    format!("{field}_{category}")
}

impl FeatureColumnManifest {
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Classify a manifest column as numeric or as an indicator of a known
    /// categorical field. The longest matching field prefix wins.
    pub fn classify<'a>(&'a self, column: &'a str) -> Option<ColumnKind<'a>> {
        if self.numeric.iter().any(|n| n == column) {
            return Some(ColumnKind::Numeric);
        }
        self.categorical
            .iter()
            .filter_map(|field| {
                column
                    .strip_prefix(field.as_str())
                    .and_then(|rest| rest.strip_prefix('_'))
                    .filter(|category| !category.is_empty())
                    .map(|category| (field.as_str(), category))
            })
            .max_by_key(|(field, _)| field.len())
            .map(|(field, category)| ColumnKind::Indicator { field, category })
    }

    /// Categories seen at training time for a categorical field.
    pub fn categories(&self, field: &str) -> Vec<&str> {
        self.columns
            .iter()
            .filter_map(|c| match self.classify(c) {
                Some(ColumnKind::Indicator { field: f, category }) if f == field => Some(category),
                _ => None,
            })
            .collect()
    }

    /// Structural check of a persisted manifest: every column classifiable,
    /// no duplicates, each numeric field present exactly once.
    pub fn validate(&self) -> std::result::Result<(), EncodingMismatchError> {
        let mut seen = HashSet::with_capacity(self.columns.len());
        for column in &self.columns {
            if !seen.insert(column.as_str()) {
                return Err(EncodingMismatchError::new(column, "duplicate manifest column"));
            }
            if self.classify(column).is_none() {
                return Err(EncodingMismatchError::new(
                    column,
                    "neither numeric nor an indicator of a known categorical field",
                ));
            }
        }
        for field in &self.numeric {
            if !seen.contains(field.as_str()) {
                return Err(EncodingMismatchError::new(field, "numeric field has no column"));
            }
        }
        Ok(())
    }

    /// Encode one row in isolation and realign it to the manifest order.
    ///
    /// Indicator columns the row does not activate are filled with 0. The
    /// result has exactly the manifest's column count and order.
    pub fn align(&self, row: &FeatureRow) -> std::result::Result<Vec<f64>, EncodingMismatchError> {
        self.check_layout(row)?;

        // Arena of the columns this row produces on its own.
        let mut arena: BTreeMap<String, f64> = BTreeMap::new();
        for (field, value) in &row.numeric {
            if !value.is_finite() {
                return Err(EncodingMismatchError::new(
                    field,
                    format!("non-finite numeric value {value}"),
                ));
            }
            arena.insert(field.clone(), *value);
        }
        for (field, category) in &row.categorical {
            let column = indicator_column(field, category);
            if !self.columns.contains(&column) {
                return Err(EncodingMismatchError::new(
                    column,
                    format!("category `{category}` of `{field}` was not seen at training time"),
                ));
            }
            arena.insert(column, 1.0);
        }

        let mut aligned = Vec::with_capacity(self.columns.len());
        let mut order = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            let value = match self.classify(column) {
                Some(ColumnKind::Numeric) => *arena.get(column).ok_or_else(|| {
                    EncodingMismatchError::new(column, "numeric column cannot be reconstructed")
                })?,
                Some(ColumnKind::Indicator { .. }) => arena.get(column).copied().unwrap_or(0.0),
                None => {
                    return Err(EncodingMismatchError::new(
                        column,
                        "neither numeric nor an indicator of a known categorical field",
                    ))
                }
            };
            aligned.push(value);
            order.push(column.as_str());
        }

        if aligned.len() != self.columns.len() || order != self.columns {
            return Err(EncodingMismatchError::new(
                "<row>",
                format!(
                    "aligned row has {} columns, manifest has {}",
                    aligned.len(),
                    self.columns.len()
                ),
            ));
        }

        Ok(aligned)
    }

    /// The row must name exactly the manifest's numeric and categorical
    /// fields, once each.
    fn check_layout(&self, row: &FeatureRow) -> std::result::Result<(), EncodingMismatchError> {
        let numeric: Vec<&str> = row.numeric.iter().map(|(f, _)| f.as_str()).collect();
        let categorical: Vec<&str> = row.categorical.iter().map(|(f, _)| f.as_str()).collect();
        same_fields("numeric", &numeric, &self.numeric)?;
        same_fields("categorical", &categorical, &self.categorical)
    }
}

fn same_fields(
    kind: &str,
    row: &[&str],
    manifest: &[String],
) -> std::result::Result<(), EncodingMismatchError> {
    let row_set: BTreeSet<&str> = row.iter().copied().collect();
    if row_set.len() != row.len() {
        return Err(EncodingMismatchError::new(
            "<row>",
            format!("duplicate {kind} field in row"),
        ));
    }
    let manifest_set: BTreeSet<&str> = manifest.iter().map(String::as_str).collect();
    if let Some(extra) = row_set.difference(&manifest_set).next() {
        return Err(EncodingMismatchError::new(
            *extra,
            format!("{kind} field unknown to the manifest"),
        ));
    }
    if let Some(absent) = manifest_set.difference(&row_set).next() {
        return Err(EncodingMismatchError::new(
            *absent,
            format!("{kind} field missing from row"),
        ));
    }
    Ok(())
}

/// Fits the manifest at training time.
#[derive(Debug, Clone, Default)]
pub struct EncodingAligner {
    spec: FeatureSpec,
}

impl EncodingAligner {
    pub fn new(spec: FeatureSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &FeatureSpec {
        &self.spec
    }

    /// One-hot encode the categorical fields over all rows (keep-all
    /// dummies, categories sorted) and return the matrix with its manifest.
    pub fn fit(&self, rows: &[FeatureRow]) -> Result<(EncodedMatrix, FeatureColumnManifest)> {
        if rows.is_empty() {
            return Err(PipelineError::DataQuality(
                "cannot fit an encoding on an empty table".into(),
            ));
        }

        let mut categories: BTreeMap<&str, BTreeSet<&str>> = self
            .spec
            .categorical
            .iter()
            .map(|field| (field.as_str(), BTreeSet::new()))
            .collect();
        for row in rows {
            for (field, category) in &row.categorical {
                if let Some(seen) = categories.get_mut(field.as_str()) {
                    seen.insert(category.as_str());
                }
            }
        }

        let mut columns = self.spec.numeric.clone();
        for field in &self.spec.categorical {
            if let Some(seen) = categories.get(field.as_str()) {
                columns.extend(seen.iter().map(|category| indicator_column(field, category)));
            }
        }

        let manifest = FeatureColumnManifest {
            numeric: self.spec.numeric.clone(),
            categorical: self.spec.categorical.clone(),
            columns,
        };
        manifest.validate()?;

        let encoded = rows
            .iter()
            .map(|row| manifest.align(row))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        tracing::debug!(
            rows = encoded.len(),
            columns = manifest.len(),
            "Fitted one-hot encoding"
        );

        Ok((
            EncodedMatrix {
                columns: manifest.columns.clone(),
                rows: encoded,
            },
            manifest,
        ))
    }
}

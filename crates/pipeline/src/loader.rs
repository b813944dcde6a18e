//! Raw dataset loading
//!
//! Reads the three raw CSV sources (IDEB, socioeconomic level, transition
//! rates) without transforming them, and checks that each carries the
//! columns the merge depends on.

use crate::errors::{PipelineError, Result};
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

/// Tokens treated as a missing numeric cell.
const MISSING_TOKENS: [&str; 6] = ["", "na", "nan", "null", "none", "n/a"];

/// The three raw inputs of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Ideb,
    Socioeconomic,
    TransitionRates,
}

impl SourceKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ideb => "ideb",
            Self::Socioeconomic => "socioeconomic",
            Self::TransitionRates => "transition_rates",
        }
    }

    /// Columns without which the merge cannot run.
    pub fn required_columns(&self) -> &'static [&'static str] {
        match self {
            Self::Ideb => &["id_escola", "sigla_uf", "rede", "ideb"],
            Self::Socioeconomic => &["id_escola", "valor_inse"],
            Self::TransitionRates => &["sigla_uf", "rede", "taxa_evasao_em"],
        }
    }
}

/// Paths of the three raw sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePaths {
    pub ideb: PathBuf,
    pub socioeconomic: PathBuf,
    pub transition_rates: PathBuf,
}

/// An unmodified CSV table: header plus string records.
#[derive(Debug, Clone)]
pub struct RawTable {
    kind: SourceKind,
    headers: Vec<String>,
    index: HashMap<String, usize>,
    rows: Vec<StringRecord>,
}

impl RawTable {
    /// Read a table from any reader and validate its required columns.
    pub fn from_reader<R: Read>(kind: SourceKind, reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::Headers)
            .from_reader(reader);

        let headers: Vec<String> = rdr
            .headers()
            .map_err(|e| PipelineError::data_source(kind.name(), format!("unreadable header: {e}")))?
            .iter()
            .map(str::to_string)
            .collect();

        let mut rows = Vec::new();
        for (line, record) in rdr.records().enumerate() {
            let record = record.map_err(|e| {
                PipelineError::data_source(kind.name(), format!("malformed row {}: {e}", line + 1))
            })?;
            rows.push(record);
        }

        let index = headers
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        let table = Self {
            kind,
            headers,
            index,
            rows,
        };
        table.validate()?;
        Ok(table)
    }

    /// Read a table from a CSV file.
    pub fn from_path<P: AsRef<Path>>(kind: SourceKind, path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            PipelineError::data_source(kind.name(), format!("cannot open {}: {e}", path.display()))
        })?;
        Self::from_reader(kind, file)
    }

    fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = self
            .kind
            .required_columns()
            .iter()
            .copied()
            .filter(|col| !self.index.contains_key(*col))
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::data_source(
                self.kind.name(),
                format!("missing expected columns: {}", missing.join(", ")),
            ));
        }

        if self.rows.is_empty() {
            return Err(PipelineError::data_source(self.kind.name(), "table has no data rows"));
        }

        Ok(())
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Index of a column that was validated as required.
    pub fn required_index(&self, name: &str) -> Result<usize> {
        self.column_index(name).ok_or_else(|| {
            PipelineError::data_source(self.kind.name(), format!("missing expected column `{name}`"))
        })
    }

    /// Raw cell content (empty when the row is short).
    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows[row].get(col).unwrap_or("")
    }

    /// Trimmed, non-empty text of an optional column.
    pub fn text(&self, row: usize, col: Option<usize>) -> Option<String> {
        let value = self.cell(row, col?).trim();
        (!value.is_empty()).then(|| value.to_string())
    }

    /// Numeric value of an optional column; `Ok(None)` for missing cells.
    pub fn number(&self, row: usize, col: Option<usize>) -> Result<Option<f64>> {
        let Some(col) = col else {
            return Ok(None);
        };
        parse_number(self.cell(row, col)).map_err(|reason| {
            PipelineError::data_source(
                self.kind.name(),
                format!("row {}, column `{}`: {reason}", row + 1, self.headers[col]),
            )
        })
    }
}

/// Parse a numeric cell. Missing markers yield `None`; anything else that is
/// not a finite number is an error.
pub fn parse_number(raw: &str) -> std::result::Result<Option<f64>, String> {
    let trimmed = raw.trim();
    if MISSING_TOKENS.contains(&trimmed.to_lowercase().as_str()) {
        return Ok(None);
    }
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(Some(value)),
        _ => Err(format!("invalid number `{trimmed}`")),
    }
}

/// The three raw tables of one pipeline run.
#[derive(Debug, Clone)]
pub struct RawSources {
    pub ideb: RawTable,
    pub socioeconomic: RawTable,
    pub transition_rates: RawTable,
}

/// Load all three raw sources. Any unreadable or malformed source aborts.
#[instrument(skip_all)]
pub fn load_sources(paths: &SourcePaths) -> Result<RawSources> {
    let ideb = RawTable::from_path(SourceKind::Ideb, &paths.ideb)?;
    let socioeconomic = RawTable::from_path(SourceKind::Socioeconomic, &paths.socioeconomic)?;
    let transition_rates =
        RawTable::from_path(SourceKind::TransitionRates, &paths.transition_rates)?;

    info!(
        ideb_rows = ideb.len(),
        socioeconomic_rows = socioeconomic.len(),
        transition_rows = transition_rates.len(),
        "Loaded raw sources"
    );

    Ok(RawSources {
        ideb,
        socioeconomic,
        transition_rates,
    })
}

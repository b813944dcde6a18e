//! Feature merger
//!
//! Joins the IDEB projection with the socioeconomic index (on school id) and
//! with the regional historical dropout rate (on state and network), imputes
//! the model inputs with column means and derives the binary target.

use crate::errors::{PipelineError, Result};
use crate::loader::{RawSources, RawTable};
use crate::network::NetworkType;
use crate::record::SchoolRecord;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, instrument, warn};

/// Default threshold on the historical dropout rate (percent).
pub const DEFAULT_THRESHOLD: f64 = 20.0;

/// Network marker of aggregate rows in the transition and socioeconomic
/// tables; such rows describe no single network and never join.
const AGGREGATE_NETWORK: &str = "total";

/// How the target threshold was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdRule {
    Configured,
    MedianFallback,
}

/// Threshold used to derive `alta_evasao`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdDecision {
    pub configured: f64,
    pub value: f64,
    pub rule: ThresholdRule,
}

/// One mean imputation applied to the merged table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImputationReport {
    pub column: String,
    pub missing: usize,
    pub fill_value: f64,
}

/// Historical dropout rate of one (state, network) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRegionalRate {
    pub state: String,
    pub network: NetworkType,
    pub historical_dropout_rate: f64,
    pub source_rows: usize,
}

/// Output of a successful merge.
#[derive(Debug, Clone)]
pub struct MergedTable {
    pub records: Vec<SchoolRecord>,
    pub threshold: ThresholdDecision,
    pub imputations: Vec<ImputationReport>,
    pub regional_rates: Vec<AggregateRegionalRate>,
}

impl MergedTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// (negatives, positives) of the derived target.
    pub fn class_counts(&self) -> (usize, usize) {
        class_counts(&self.records)
    }

    /// Mean historical dropout rate over the merged table.
    pub fn mean_historical_rate(&self) -> f64 {
        mean_historical_rate(&self.records)
    }
}

pub fn class_counts(records: &[SchoolRecord]) -> (usize, usize) {
    let positives = records.iter().filter(|r| r.is_high_risk()).count();
    (records.len() - positives, positives)
}

pub fn mean_historical_rate(records: &[SchoolRecord]) -> f64 {
    mean(records.iter().map(|r| r.historical_dropout_rate)).unwrap_or(0.0)
}

/// Record still waiting for imputation of its model inputs.
struct PendingRecord {
    record: SchoolRecord,
    ideb: Option<f64>,
    socioeconomic_index: Option<f64>,
    historical_rate: Option<f64>,
}

/// Socioeconomic projection of one school.
struct SocioeconomicRow {
    index: Option<f64>,
    student_count: Option<f64>,
    class_2014: Option<String>,
    class_2015: Option<String>,
}

/// Merges the raw sources into the per-school table.
#[derive(Debug, Clone)]
pub struct FeatureMerger {
    threshold: f64,
}

impl Default for FeatureMerger {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl FeatureMerger {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Run the full merge. Nothing is persisted here; callers write the
    /// table only after this returns `Ok`.
    #[instrument(skip_all, fields(threshold = self.threshold))]
    pub fn merge(&self, sources: &RawSources) -> Result<MergedTable> {
        if !self.threshold.is_finite() {
            return Err(PipelineError::Config(format!(
                "threshold must be finite, got {}",
                self.threshold
            )));
        }

        let regional_rates = aggregate_regional_rates(&sources.transition_rates)?;
        let socioeconomic = socioeconomic_projection(&sources.socioeconomic)?;
        let mut pending = ideb_projection(&sources.ideb)?;

        let rate_index: HashMap<(String, NetworkType), f64> = regional_rates
            .iter()
            .map(|r| ((r.state.clone(), r.network), r.historical_dropout_rate))
            .collect();

        let mut nse_matches = 0usize;
        let mut rate_matches = 0usize;
        for row in &mut pending {
            if let Some(nse) = socioeconomic.get(&row.record.school_id) {
                nse_matches += 1;
                row.socioeconomic_index = nse.index;
                row.record.inse_student_count = nse.student_count;
                row.record.inse_class_2014 = nse.class_2014.clone();
                row.record.inse_class_2015 = nse.class_2015.clone();
            }
            let key = (row.record.state.clone(), row.record.network);
            if let Some(&rate) = rate_index.get(&key) {
                rate_matches += 1;
                row.historical_rate = Some(rate);
            }
        }
        debug!(
            rows = pending.len(),
            nse_matches, rate_matches, "Left joins complete"
        );

        let (ideb, ideb_report) =
            impute_mean("ideb", &pending.iter().map(|p| p.ideb).collect::<Vec<_>>())?;
        let (nse, nse_report) = impute_mean(
            "nivel_socioeconomico",
            &pending.iter().map(|p| p.socioeconomic_index).collect::<Vec<_>>(),
        )?;
        let (rates, rate_report) = impute_mean(
            "taxa_evasao_historica",
            &pending.iter().map(|p| p.historical_rate).collect::<Vec<_>>(),
        )?;
        let imputations = vec![ideb_report, nse_report, rate_report];
        for report in &imputations {
            info!(
                column = %report.column,
                missing = report.missing,
                fill_value = report.fill_value,
                "Mean imputation"
            );
        }

        let threshold = decide_threshold(&rates, self.threshold);

        let records: Vec<SchoolRecord> = pending
            .into_iter()
            .enumerate()
            .map(|(i, p)| {
                let mut record = p.record;
                record.ideb = ideb[i];
                record.socioeconomic_index = nse[i];
                record.historical_dropout_rate = rates[i];
                record.high_dropout_risk = derive_target(rates[i], threshold.value);
                record
            })
            .collect();

        let (negatives, positives) = class_counts(&records);
        if negatives == 0 || positives == 0 {
            warn!(
                negatives,
                positives, "Derived target has a single class; training will not be possible"
            );
        }
        info!(
            rows = records.len(),
            positives,
            negatives,
            threshold = threshold.value,
            "Merge complete"
        );

        Ok(MergedTable {
            records,
            threshold,
            imputations,
            regional_rates,
        })
    }
}

/// `1` when the rate strictly exceeds the threshold.
pub fn derive_target(rate: f64, threshold: f64) -> u8 {
    u8::from(rate > threshold)
}

/// Keep the configured threshold unless no rate exceeds it, in which case
/// fall back to the median rate.
pub fn decide_threshold(rates: &[f64], configured: f64) -> ThresholdDecision {
    let max = rates.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max <= configured {
        if let Some(median) = median(rates) {
            warn!(
                configured,
                max,
                fallback = median,
                "No rate exceeds the configured threshold; using the median rate"
            );
            return ThresholdDecision {
                configured,
                value: median,
                rule: ThresholdRule::MedianFallback,
            };
        }
    }
    ThresholdDecision {
        configured,
        value: configured,
        rule: ThresholdRule::Configured,
    }
}

/// Median; mean of the two middle values for even counts.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

pub fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Fill missing values with the mean of the present ones.
pub fn impute_mean(column: &str, values: &[Option<f64>]) -> Result<(Vec<f64>, ImputationReport)> {
    let fill_value = mean(values.iter().flatten().copied()).ok_or_else(|| {
        PipelineError::DataQuality(format!("column `{column}` has no values to impute from"))
    })?;
    let missing = values.iter().filter(|v| v.is_none()).count();
    let filled = values.iter().map(|v| v.unwrap_or(fill_value)).collect();

    Ok((
        filled,
        ImputationReport {
            column: column.to_string(),
            missing,
            fill_value,
        },
    ))
}

/// Group the transition table by (state, network) and average
/// `taxa_evasao_em`. Groups without any rate are dropped.
pub fn aggregate_regional_rates(table: &RawTable) -> Result<Vec<AggregateRegionalRate>> {
    let state_col = table.required_index("sigla_uf")?;
    let network_col = table.required_index("rede")?;
    let rate_col = table.required_index("taxa_evasao_em")?;

    let mut groups: BTreeMap<(String, NetworkType), (f64, usize, usize)> = BTreeMap::new();
    let mut aggregate_rows = 0usize;
    for row in 0..table.len() {
        let Some(network) = network_at(table, row, network_col, true)? else {
            aggregate_rows += 1;
            continue;
        };
        let state = state_at(table, row, state_col)?;
        let rate = table.number(row, Some(rate_col))?;

        let entry = groups.entry((state, network)).or_insert((0.0, 0, 0));
        entry.2 += 1;
        if let Some(rate) = rate {
            entry.0 += rate;
            entry.1 += 1;
        }
    }
    if aggregate_rows > 0 {
        debug!(rows = aggregate_rows, "Skipped aggregate transition rows");
    }

    let rates: Vec<AggregateRegionalRate> = groups
        .into_iter()
        .filter(|(_, (_, count, _))| *count > 0)
        .map(|((state, network), (sum, count, rows))| AggregateRegionalRate {
            state,
            network,
            historical_dropout_rate: sum / count as f64,
            source_rows: rows,
        })
        .collect();

    let values: Vec<f64> = rates.iter().map(|r| r.historical_dropout_rate).collect();
    info!(
        groups = rates.len(),
        min = values.iter().copied().fold(f64::INFINITY, f64::min),
        max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        mean = mean(values.iter().copied()).unwrap_or(f64::NAN),
        "Regional historical dropout rates"
    );

    Ok(rates)
}

fn ideb_projection(table: &RawTable) -> Result<Vec<PendingRecord>> {
    let id_col = table.required_index("id_escola")?;
    let state_col = table.required_index("sigla_uf")?;
    let network_col = table.required_index("rede")?;
    let ideb_col = table.required_index("ideb")?;

    let col = |name: &str| table.column_index(name);
    let (name_col, state_name_col) = (col("id_escola_nome"), col("sigla_uf_nome"));
    let (municipality_col, municipality_name_col) = (col("id_municipio"), col("id_municipio_nome"));
    let (lat_col, lon_col) = (col("id_escola_latitude"), col("id_escola_longitude"));
    let (approval_col, performance_col) = (col("taxa_aprovacao"), col("indicador_rendimento"));
    let math_col = col("nota_saeb_matematica");
    let portuguese_col = col("nota_saeb_lingua_portuguesa");
    let standardized_col = col("nota_saeb_media_padronizada");

    let mut seen = HashSet::with_capacity(table.len());
    let mut pending = Vec::with_capacity(table.len());
    for row in 0..table.len() {
        let school_id = school_id_at(table, row, id_col)?;
        if !seen.insert(school_id.clone()) {
            return Err(PipelineError::DataQuality(format!(
                "duplicate school id `{school_id}` in the ideb table"
            )));
        }
        let state = state_at(table, row, state_col)?;
        let network = network_at(table, row, network_col, false)?.ok_or_else(|| {
            PipelineError::data_source(
                table.kind().name(),
                format!("row {}: aggregate network is not a school network", row + 1),
            )
        })?;

        let mut record = SchoolRecord::new(school_id, state, network, 0.0, 0.0, 0.0);
        record.school_name = table.text(row, name_col);
        record.state_name = table.text(row, state_name_col);
        record.municipality_id = table.text(row, municipality_col);
        record.municipality_name = table.text(row, municipality_name_col);
        record.latitude = table.number(row, lat_col)?;
        record.longitude = table.number(row, lon_col)?;
        record.approval_rate = table.number(row, approval_col)?;
        record.performance_indicator = table.number(row, performance_col)?;
        record.saeb_math = table.number(row, math_col)?;
        record.saeb_portuguese = table.number(row, portuguese_col)?;
        record.saeb_standardized_mean = table.number(row, standardized_col)?;

        pending.push(PendingRecord {
            record,
            ideb: table.number(row, Some(ideb_col))?,
            socioeconomic_index: None,
            historical_rate: None,
        });
    }
    Ok(pending)
}

fn socioeconomic_projection(table: &RawTable) -> Result<HashMap<String, SocioeconomicRow>> {
    let id_col = table.required_index("id_escola")?;
    let index_col = table.required_index("valor_inse")?;
    let network_col = table.column_index("rede");
    let count_col = table.column_index("inse_quantidade_alunos");
    let class_2014_col = table.column_index("inse_classificacao_2014");
    let class_2015_col = table.column_index("inse_classificacao_2015");

    let mut rows = HashMap::with_capacity(table.len());
    for row in 0..table.len() {
        // The network is not projected but must still be a known value.
        if let Some(col) = network_col {
            network_at(table, row, col, true)?;
        }
        let school_id = school_id_at(table, row, id_col)?;
        let projected = SocioeconomicRow {
            index: table.number(row, Some(index_col))?,
            student_count: table.number(row, count_col)?,
            class_2014: table.text(row, class_2014_col),
            class_2015: table.text(row, class_2015_col),
        };
        if rows.insert(school_id.clone(), projected).is_some() {
            return Err(PipelineError::DataQuality(format!(
                "duplicate school id `{school_id}` in the socioeconomic table"
            )));
        }
    }
    Ok(rows)
}

fn school_id_at(table: &RawTable, row: usize, col: usize) -> Result<String> {
    table.text(row, Some(col)).ok_or_else(|| {
        PipelineError::data_source(
            table.kind().name(),
            format!("row {}: empty id_escola", row + 1),
        )
    })
}

fn state_at(table: &RawTable, row: usize, col: usize) -> Result<String> {
    table
        .text(row, Some(col))
        .map(|s| s.to_uppercase())
        .ok_or_else(|| {
            PipelineError::data_source(table.kind().name(), format!("row {}: empty sigla_uf", row + 1))
        })
}

/// Normalized network of a row. `Ok(None)` marks an aggregate row, which is
/// only accepted where `allow_aggregate` is set.
fn network_at(
    table: &RawTable,
    row: usize,
    col: usize,
    allow_aggregate: bool,
) -> Result<Option<NetworkType>> {
    let raw = table.cell(row, col);
    if let Some(network) = NetworkType::normalize(raw) {
        return Ok(Some(network));
    }
    if allow_aggregate && raw.trim().eq_ignore_ascii_case(AGGREGATE_NETWORK) {
        return Ok(None);
    }
    Err(PipelineError::data_source(
        table.kind().name(),
        format!("row {}: unrecognized network type `{}`", row + 1, raw.trim()),
    ))
}

//! Aggregations over the merged table for a presentation layer, plus the
//! data-quality and target-distribution reports.

use crate::merge::{mean, mean_historical_rate};
use crate::network::NetworkType;
use crate::record::{SchoolRecord, MERGED_COLUMNS};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Overview {
    pub total_schools: usize,
    pub schools_at_risk: usize,
    pub mean_dropout_rate: f64,
    pub mean_ideb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSummary {
    pub state: String,
    pub schools_at_risk: usize,
    pub mean_dropout_rate: f64,
    pub total_schools: usize,
    pub risk_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSummary {
    pub network: NetworkType,
    pub schools_at_risk: usize,
    pub at_risk_share: f64,
    pub mean_dropout_rate: f64,
    pub mean_ideb: f64,
    pub mean_socioeconomic_index: f64,
    pub total_schools: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorCorrelation {
    pub factor: String,
    pub abs_correlation: f64,
}

/// Inputs offered by the scenario simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorChoices {
    pub states: Vec<String>,
    pub networks: Vec<NetworkType>,
    pub mean_historical_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub overview: Overview,
    pub by_state: Vec<StateSummary>,
    pub by_network: Vec<NetworkSummary>,
    pub factors: Vec<FactorCorrelation>,
    pub simulator: SimulatorChoices,
}

impl DashboardSummary {
    pub fn build(records: &[SchoolRecord]) -> Self {
        Self {
            overview: overview(records),
            by_state: by_state(records),
            by_network: by_network(records),
            factors: factor_ranking(records),
            simulator: simulator_choices(records),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn at_risk(records: &[&SchoolRecord]) -> usize {
    records.iter().filter(|r| r.is_high_risk()).count()
}

pub fn overview(records: &[SchoolRecord]) -> Overview {
    Overview {
        total_schools: records.len(),
        schools_at_risk: records.iter().filter(|r| r.is_high_risk()).count(),
        mean_dropout_rate: mean_historical_rate(records),
        mean_ideb: mean(records.iter().map(|r| r.ideb)).unwrap_or(0.0),
    }
}

/// Per-state counts, sorted by risk percentage (highest first).
pub fn by_state(records: &[SchoolRecord]) -> Vec<StateSummary> {
    let mut groups: BTreeMap<&str, Vec<&SchoolRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.state.as_str()).or_default().push(record);
    }

    let mut states: Vec<StateSummary> = groups
        .into_iter()
        .map(|(state, group)| {
            let schools_at_risk = at_risk(&group);
            StateSummary {
                state: state.to_string(),
                schools_at_risk,
                mean_dropout_rate: mean(group.iter().map(|r| r.historical_dropout_rate))
                    .unwrap_or(0.0),
                total_schools: group.len(),
                risk_percentage: schools_at_risk as f64 / group.len() as f64 * 100.0,
            }
        })
        .collect();
    states.sort_by(|a, b| b.risk_percentage.total_cmp(&a.risk_percentage));
    states
}

/// Public versus private comparison, values rounded to 2 decimals.
pub fn by_network(records: &[SchoolRecord]) -> Vec<NetworkSummary> {
    NetworkType::ALL
        .iter()
        .filter_map(|&network| {
            let group: Vec<&SchoolRecord> =
                records.iter().filter(|r| r.network == network).collect();
            if group.is_empty() {
                return None;
            }
            let schools_at_risk = at_risk(&group);
            let avg = |f: fn(&SchoolRecord) -> f64| {
                round2(mean(group.iter().map(|r| f(r))).unwrap_or(0.0))
            };
            Some(NetworkSummary {
                network,
                schools_at_risk,
                at_risk_share: round2(schools_at_risk as f64 / group.len() as f64),
                mean_dropout_rate: avg(|r| r.historical_dropout_rate),
                mean_ideb: avg(|r| r.ideb),
                mean_socioeconomic_index: avg(|r| r.socioeconomic_index),
                total_schools: group.len(),
            })
        })
        .collect()
}

/// Pearson correlation; 0 when either side has no variance.
pub fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return 0.0;
    }
    let mx = xs[..n].iter().sum::<f64>() / n as f64;
    let my = ys[..n].iter().sum::<f64>() / n as f64;
    let (mut cov, mut vx, mut vy) = (0.0, 0.0, 0.0);
    for (x, y) in xs.iter().zip(ys) {
        cov += (x - mx) * (y - my);
        vx += (x - mx).powi(2);
        vy += (y - my).powi(2);
    }
    if vx == 0.0 || vy == 0.0 {
        0.0
    } else {
        cov / (vx.sqrt() * vy.sqrt())
    }
}

/// Absolute correlation of each model input with the target, strongest
/// first.
pub fn factor_ranking(records: &[SchoolRecord]) -> Vec<FactorCorrelation> {
    let target: Vec<f64> = records.iter().map(|r| f64::from(r.high_dropout_risk)).collect();
    let factors: [(&str, fn(&SchoolRecord) -> f64); 3] = [
        ("ideb", |r| r.ideb),
        ("nivel_socioeconomico", |r| r.socioeconomic_index),
        ("taxa_evasao_historica", |r| r.historical_dropout_rate),
    ];

    let mut ranking: Vec<FactorCorrelation> = factors
        .iter()
        .map(|(name, f)| {
            let values: Vec<f64> = records.iter().map(f).collect();
            FactorCorrelation {
                factor: name.to_string(),
                abs_correlation: pearson(&values, &target).abs(),
            }
        })
        .collect();
    ranking.sort_by(|a, b| b.abs_correlation.total_cmp(&a.abs_correlation));
    ranking
}

pub fn simulator_choices(records: &[SchoolRecord]) -> SimulatorChoices {
    let states: BTreeSet<&str> = records.iter().map(|r| r.state.as_str()).collect();
    let networks: BTreeSet<NetworkType> = records.iter().map(|r| r.network).collect();
    SimulatorChoices {
        states: states.into_iter().map(str::to_string).collect(),
        networks: networks.into_iter().collect(),
        mean_historical_rate: mean_historical_rate(records),
    }
}

/// Value counts of the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetDistribution {
    pub counts: BTreeMap<u8, usize>,
    pub distinct: usize,
    pub share_at_risk: f64,
}

impl TargetDistribution {
    pub fn from_records(records: &[SchoolRecord]) -> Self {
        let mut counts = BTreeMap::new();
        for record in records {
            *counts.entry(record.high_dropout_risk).or_insert(0) += 1;
        }
        let positives = counts.get(&1).copied().unwrap_or(0);
        Self {
            distinct: counts.len(),
            share_at_risk: if records.is_empty() {
                0.0
            } else {
                positives as f64 / records.len() as f64
            },
            counts,
        }
    }
}

/// `describe()`-style statistics of one numeric column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStatistics {
    pub column: String,
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation; `None` for a single value.
    pub std: Option<f64>,
    pub min: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub max: f64,
}

impl ColumnStatistics {
    pub fn from_values(column: &str, values: &[f64]) -> Option<Self> {
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let count = sorted.len();
        let mean = mean(sorted.iter().copied())?;
        let std = (count > 1).then(|| {
            (sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64).sqrt()
        });
        Some(Self {
            column: column.to_string(),
            count,
            mean,
            std,
            min: sorted[0],
            p25: quantile(&sorted, 0.25),
            p50: quantile(&sorted, 0.5),
            p75: quantile(&sorted, 0.75),
            max: sorted[count - 1],
        })
    }
}

/// Linear-interpolated quantile of sorted, non-empty values.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    sorted[lower] + (sorted[upper] - sorted[lower]) * (pos - lower as f64)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingCount {
    pub column: String,
    pub missing: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataQualityReport {
    pub rows: usize,
    pub columns: usize,
    /// Only columns with at least one missing value.
    pub missing: Vec<MissingCount>,
    pub target: TargetDistribution,
    pub statistics: Vec<ColumnStatistics>,
}

impl DataQualityReport {
    pub fn from_records(records: &[SchoolRecord]) -> Self {
        let mut missing: BTreeMap<&'static str, usize> = BTreeMap::new();
        for record in records {
            for column in record.missing_optional_columns() {
                *missing.entry(column).or_insert(0) += 1;
            }
        }
        // Report in file column order.
        let missing = MERGED_COLUMNS
            .iter()
            .filter_map(|&column| {
                missing.get(column).map(|&count| MissingCount {
                    column: column.to_string(),
                    missing: count,
                    percentage: count as f64 / records.len() as f64 * 100.0,
                })
            })
            .collect();

        let numeric: [(&str, fn(&SchoolRecord) -> f64); 3] = [
            ("ideb", |r| r.ideb),
            ("nivel_socioeconomico", |r| r.socioeconomic_index),
            ("taxa_evasao_historica", |r| r.historical_dropout_rate),
        ];
        let statistics = numeric
            .iter()
            .filter_map(|(name, f)| {
                let values: Vec<f64> = records.iter().map(f).collect();
                ColumnStatistics::from_values(name, &values)
            })
            .collect();

        Self {
            rows: records.len(),
            columns: MERGED_COLUMNS.len(),
            missing,
            target: TargetDistribution::from_records(records),
            statistics,
        }
    }
}

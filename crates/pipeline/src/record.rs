//! Per-school merged record and the merged table file.

use crate::errors::{PipelineError, Result};
use crate::network::NetworkType;
use crate::persist::write_atomic;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::info;

/// Header of the merged table file, in column order.
pub const MERGED_COLUMNS: [&str; 21] = [
    "id_escola",
    "id_escola_nome",
    "sigla_uf",
    "sigla_uf_nome",
    "id_municipio",
    "id_municipio_nome",
    "rede",
    "id_escola_latitude",
    "id_escola_longitude",
    "ideb",
    "taxa_aprovacao",
    "indicador_rendimento",
    "nota_saeb_matematica",
    "nota_saeb_lingua_portuguesa",
    "nota_saeb_media_padronizada",
    "inse_quantidade_alunos",
    "nivel_socioeconomico",
    "inse_classificacao_2014",
    "inse_classificacao_2015",
    "taxa_evasao_historica",
    "alta_evasao",
];

/// One school after merge, imputation and target derivation.
///
/// The three model inputs (`ideb`, `socioeconomic_index`,
/// `historical_dropout_rate`) are always present; everything else is
/// carried through from the sources when available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchoolRecord {
    #[serde(rename = "id_escola")]
    pub school_id: String,
    #[serde(rename = "id_escola_nome")]
    pub school_name: Option<String>,
    #[serde(rename = "sigla_uf")]
    pub state: String,
    #[serde(rename = "sigla_uf_nome")]
    pub state_name: Option<String>,
    #[serde(rename = "id_municipio")]
    pub municipality_id: Option<String>,
    #[serde(rename = "id_municipio_nome")]
    pub municipality_name: Option<String>,
    #[serde(rename = "rede")]
    pub network: NetworkType,
    #[serde(rename = "id_escola_latitude")]
    pub latitude: Option<f64>,
    #[serde(rename = "id_escola_longitude")]
    pub longitude: Option<f64>,
    pub ideb: f64,
    #[serde(rename = "taxa_aprovacao")]
    pub approval_rate: Option<f64>,
    #[serde(rename = "indicador_rendimento")]
    pub performance_indicator: Option<f64>,
    #[serde(rename = "nota_saeb_matematica")]
    pub saeb_math: Option<f64>,
    #[serde(rename = "nota_saeb_lingua_portuguesa")]
    pub saeb_portuguese: Option<f64>,
    #[serde(rename = "nota_saeb_media_padronizada")]
    pub saeb_standardized_mean: Option<f64>,
    #[serde(rename = "inse_quantidade_alunos")]
    pub inse_student_count: Option<f64>,
    #[serde(rename = "nivel_socioeconomico")]
    pub socioeconomic_index: f64,
    #[serde(rename = "inse_classificacao_2014")]
    pub inse_class_2014: Option<String>,
    #[serde(rename = "inse_classificacao_2015")]
    pub inse_class_2015: Option<String>,
    #[serde(rename = "taxa_evasao_historica")]
    pub historical_dropout_rate: f64,
    #[serde(rename = "alta_evasao")]
    pub high_dropout_risk: u8,
}

impl SchoolRecord {
    /// Minimal record with only the identity, categorical and model fields.
    pub fn new(
        school_id: impl Into<String>,
        state: impl Into<String>,
        network: NetworkType,
        ideb: f64,
        socioeconomic_index: f64,
        historical_dropout_rate: f64,
    ) -> Self {
        Self {
            school_id: school_id.into(),
            school_name: None,
            state: state.into(),
            state_name: None,
            municipality_id: None,
            municipality_name: None,
            network,
            latitude: None,
            longitude: None,
            ideb,
            approval_rate: None,
            performance_indicator: None,
            saeb_math: None,
            saeb_portuguese: None,
            saeb_standardized_mean: None,
            inse_student_count: None,
            socioeconomic_index,
            inse_class_2014: None,
            inse_class_2015: None,
            historical_dropout_rate,
            high_dropout_risk: 0,
        }
    }

    pub fn is_high_risk(&self) -> bool {
        self.high_dropout_risk == 1
    }

    /// Pass-through columns that are missing on this record.
    pub fn missing_optional_columns(&self) -> Vec<&'static str> {
        let columns = [
            ("id_escola_nome", self.school_name.is_none()),
            ("sigla_uf_nome", self.state_name.is_none()),
            ("id_municipio", self.municipality_id.is_none()),
            ("id_municipio_nome", self.municipality_name.is_none()),
            ("id_escola_latitude", self.latitude.is_none()),
            ("id_escola_longitude", self.longitude.is_none()),
            ("taxa_aprovacao", self.approval_rate.is_none()),
            ("indicador_rendimento", self.performance_indicator.is_none()),
            ("nota_saeb_matematica", self.saeb_math.is_none()),
            ("nota_saeb_lingua_portuguesa", self.saeb_portuguese.is_none()),
            ("nota_saeb_media_padronizada", self.saeb_standardized_mean.is_none()),
            ("inse_quantidade_alunos", self.inse_student_count.is_none()),
            ("inse_classificacao_2014", self.inse_class_2014.is_none()),
            ("inse_classificacao_2015", self.inse_class_2015.is_none()),
        ];
        columns
            .into_iter()
            .filter_map(|(name, missing)| missing.then_some(name))
            .collect()
    }
}

/// Serialize records as merged-table CSV bytes.
pub fn to_csv_bytes(records: &[SchoolRecord]) -> Result<Vec<u8>> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    if records.is_empty() {
        wtr.write_record(MERGED_COLUMNS)?;
    }
    for record in records {
        wtr.serialize(record)?;
    }
    wtr.into_inner()
        .map_err(|e| PipelineError::Artifact(format!("flush merged table: {}", e.error())))
}

/// Write the merged table atomically: a reader never sees a partial file.
pub fn write_merged_csv<P: AsRef<Path>>(path: P, records: &[SchoolRecord]) -> Result<()> {
    let path = path.as_ref();
    let bytes = to_csv_bytes(records)?;
    write_atomic(path, &bytes)?;
    info!(path = %path.display(), rows = records.len(), "Merged table written");
    Ok(())
}

/// Read merged-table records from any reader.
pub fn read_merged<R: Read>(reader: R) -> Result<Vec<SchoolRecord>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let missing: Vec<&str> = MERGED_COLUMNS
        .iter()
        .copied()
        .filter(|col| !headers.iter().any(|h| h == *col))
        .collect();
    if !missing.is_empty() {
        return Err(PipelineError::data_source(
            "merged_table",
            format!("missing expected columns: {}", missing.join(", ")),
        ));
    }

    let mut records = Vec::new();
    for (line, row) in rdr.deserialize::<SchoolRecord>().enumerate() {
        let record = row.map_err(|e| {
            PipelineError::data_source("merged_table", format!("row {}: {e}", line + 1))
        })?;
        if record.high_dropout_risk > 1 {
            return Err(PipelineError::data_source(
                "merged_table",
                format!("row {}: alta_evasao must be 0 or 1", line + 1),
            ));
        }
        records.push(record);
    }
    Ok(records)
}

/// Read the merged table file.
pub fn read_merged_csv<P: AsRef<Path>>(path: P) -> Result<Vec<SchoolRecord>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| {
        PipelineError::data_source("merged_table", format!("cannot open {}: {e}", path.display()))
    })?;
    read_merged(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<SchoolRecord> {
        let mut full = SchoolRecord::new("35000001", "SP", NetworkType::Public, 5.4, 52.1, 12.5);
        full.school_name = Some("EE Exemplo, Centro".into());
        full.latitude = Some(-23.55);
        full.inse_class_2015 = Some("Nível V".into());
        full.high_dropout_risk = 1;

        let sparse = SchoolRecord::new("33000002", "RJ", NetworkType::Private, 6.1, 60.0, 4.0);
        vec![full, sparse]
    }

    #[test]
    fn test_header_order() {
        let bytes = to_csv_bytes(&sample()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let header = text.lines().next().unwrap();
        assert_eq!(header, MERGED_COLUMNS.join(","));
    }

    #[test]
    fn test_empty_table_still_has_header() {
        let bytes = to_csv_bytes(&[]).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap().trim(), MERGED_COLUMNS.join(","));
    }

    #[test]
    fn test_write_then_read_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dados_combinados.csv");

        write_merged_csv(&path, &sample()).unwrap();
        let loaded = read_merged_csv(&path).unwrap();

        assert_eq!(loaded, sample());
        assert!(loaded[0].is_high_risk());
        assert_eq!(loaded[1].network, NetworkType::Private);
    }

    #[test]
    fn test_missing_optional_columns() {
        let records = sample();
        assert!(!records[0].missing_optional_columns().contains(&"id_escola_nome"));
        assert_eq!(records[1].missing_optional_columns().len(), 14);
    }

    #[test]
    fn test_invalid_target_rejected() {
        let mut text = String::from_utf8(to_csv_bytes(&sample()[1..]).unwrap()).unwrap();
        text = text.trim_end().to_string();
        text.pop();
        text.push('7');
        let err = read_merged(text.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("alta_evasao"));
    }

    #[test]
    fn test_missing_column_rejected() {
        let err = read_merged("id_escola,sigla_uf\n1,SP\n".as_bytes()).unwrap_err();
        assert!(matches!(err, PipelineError::DataSource { .. }));
    }
}

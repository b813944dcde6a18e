//! End-to-end pipeline tests over raw CSV fixtures
//!
//! Five-school scenarios from raw tables to a persisted bundle, followed by
//! simulated single-school predictions.

use anyhow::Result;
use dropout_pipeline::{
    prepare, read_merged_csv, train, NetworkType, PipelineConfig, PipelineError, RiskState,
    SimulatedSchool, ThresholdRule,
};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const STATES: [&str; 5] = ["SP", "RJ", "MG", "BA", "PR"];

/// Writes one public school per state, each state with its own rate.
fn write_sources(dir: &Path, rates: [f64; 5]) -> Result<PipelineConfig> {
    let mut ideb = String::from(
        "id_escola,id_escola_nome,sigla_uf,rede,ideb,nota_saeb_matematica\n",
    );
    let mut nse = String::from("id_escola,inse_quantidade_alunos,valor_inse,inse_classificacao_2015\n");
    let mut transition = String::from("sigla_uf,rede,localizacao,taxa_evasao_em\n");

    for (i, (state, rate)) in STATES.iter().zip(rates).enumerate() {
        let id = 1000 + i;
        ideb.push_str(&format!("{id},Escola {i},{state},estadual,{},250.5\n", 4.0 + i as f64 * 0.5));
        nse.push_str(&format!("{id},120,{},Nível IV\n", 45.0 + i as f64 * 2.0));
        // Two rows per group average to the target rate.
        transition.push_str(&format!("{state},estadual,urbana,{}\n", rate - 1.0));
        transition.push_str(&format!("{state},municipal,rural,{}\n", rate + 1.0));
        transition.push_str(&format!("{state},total,total,99\n"));
    }

    let raw = dir.join("raw");
    fs::create_dir_all(&raw)?;
    fs::write(raw.join("ideb.csv"), ideb)?;
    fs::write(raw.join("nse.csv"), nse)?;
    fs::write(raw.join("transition.csv"), transition)?;

    let mut config = PipelineConfig::from_toml(&format!(
        r#"
        [sources]
        data_dir = "{}"
        ideb = "raw/ideb.csv"
        socioeconomic = "raw/nse.csv"
        transition_rates = "raw/transition.csv"

        [model]
        num_trees = 10
        "#,
        dir.display()
    ))?;
    config.validate()?;
    config.artifacts.model_bundle = "model/bundle.json".into();
    Ok(config)
}

/// One state, raw network labels in mixed spellings.
fn write_mixed_network_sources(dir: &Path) -> Result<PipelineConfig> {
    let raw = dir.join("raw");
    fs::create_dir_all(&raw)?;
    fs::write(
        raw.join("ideb.csv"),
        "id_escola,sigla_uf,rede,ideb\n\
         1,SP,estadual,4.1\n\
         2,SP,privada,6.8\n\
         3,SP,municipal,4.5\n\
         4,sp,Estadual,3.9\n\
         5,SP,PRIVADA,7.2\n",
    )?;
    fs::write(
        raw.join("nse.csv"),
        "id_escola,valor_inse\n1,42.0\n2,61.5\n3,44.0\n4,40.5\n5,63.0\n",
    )?;
    fs::write(
        raw.join("transition.csv"),
        "sigla_uf,rede,taxa_evasao_em\nSP,estadual,30\nSP,municipal,20\nSP,privada,5\n",
    )?;

    let mut config = PipelineConfig::from_toml(&format!(
        r#"
        [sources]
        data_dir = "{}"
        ideb = "raw/ideb.csv"
        socioeconomic = "raw/nse.csv"
        transition_rates = "raw/transition.csv"

        [model]
        num_trees = 10
        "#,
        dir.display()
    ))?;
    config.validate()?;
    config.artifacts.model_bundle = "model/bundle.json".into();
    Ok(config)
}

fn simulated(state: &str, rate: Option<f64>) -> SimulatedSchool {
    SimulatedSchool {
        ideb: 7.0,
        socioeconomic_index: 60.0,
        state: state.into(),
        network: "public".into(),
        historical_dropout_rate: rate,
    }
}

#[test]
fn test_configured_threshold_scenario() -> Result<()> {
    let dir = TempDir::new()?;
    let config = write_sources(dir.path(), [5.0, 10.0, 15.0, 25.0, 30.0])?;

    let merged = prepare(&config)?;
    let targets: Vec<u8> = merged.records.iter().map(|r| r.high_dropout_risk).collect();
    assert_eq!(targets, vec![0, 0, 0, 1, 1]);
    assert_eq!(merged.threshold.rule, ThresholdRule::Configured);
    assert_eq!(merged.threshold.value, 20.0);

    // The persisted table carries every pass-through column.
    let persisted = read_merged_csv(config.merged_table_path())?;
    assert_eq!(persisted, merged.records);
    assert_eq!(persisted[0].school_name.as_deref(), Some("Escola 0"));
    assert_eq!(persisted[0].inse_class_2015.as_deref(), Some("Nível IV"));
    assert_eq!(persisted[0].saeb_math, Some(250.5));

    let bundle = train(&config, &persisted)?;
    assert_eq!(bundle.manifest.len(), 3 + STATES.len() + 1);
    assert_eq!(bundle.evaluation.samples, 2);
    assert!((bundle.mean_historical_rate - 17.0).abs() < 1e-9);

    let state = RiskState::from_config(&config)?;
    let prediction = state.predict(&simulated("SP", None))?;
    assert!(prediction.label <= 1);
    assert!((0.0..=1.0).contains(&prediction.probability));
    assert_eq!(prediction.label, u8::from(prediction.probability > 0.5));

    Ok(())
}

#[test]
fn test_median_fallback_scenario() -> Result<()> {
    let dir = TempDir::new()?;
    let config = write_sources(dir.path(), [5.0, 8.0, 10.0, 12.0, 15.0])?;

    let merged = prepare(&config)?;
    assert_eq!(merged.threshold.rule, ThresholdRule::MedianFallback);
    assert_eq!(merged.threshold.value, 10.0);

    let targets: Vec<u8> = merged.records.iter().map(|r| r.high_dropout_risk).collect();
    assert_eq!(targets, vec![0, 0, 0, 1, 1]);

    let bundle = train(&config, &merged.records)?;
    assert_eq!(bundle.threshold, merged.threshold);

    Ok(())
}

#[test]
fn test_prediction_failures_are_structured() -> Result<()> {
    let dir = TempDir::new()?;
    let config = write_sources(dir.path(), [5.0, 10.0, 15.0, 25.0, 30.0])?;
    let merged = prepare(&config)?;
    train(&config, &merged.records)?;
    let state = RiskState::from_config(&config)?;

    let err = state.predict(&simulated("AM", Some(12.0))).unwrap_err();
    assert_eq!(err.column, "sigla_uf_AM");

    let mut private = simulated("SP", Some(12.0));
    private.network = "privada".into();
    // Private never occurred in training, so its indicator is unknown.
    assert!(state.predict(&private).is_err());

    Ok(())
}

#[test]
fn test_failed_merge_writes_nothing() -> Result<()> {
    let dir = TempDir::new()?;
    let config = write_sources(dir.path(), [5.0, 10.0, 15.0, 25.0, 30.0])?;
    fs::write(
        dir.path().join("raw/ideb.csv"),
        "id_escola,sigla_uf,rede,ideb\n1,SP,estadual,5\n1,SP,estadual,6\n",
    )?;

    let err = prepare(&config).unwrap_err();
    assert!(matches!(err, PipelineError::DataQuality(_)));
    assert!(!config.merged_table_path().exists());

    Ok(())
}

#[test]
fn test_single_class_table_cannot_train() -> Result<()> {
    let dir = TempDir::new()?;
    // All rates equal: the median fallback cannot split them.
    let config = write_sources(dir.path(), [7.0; 5])?;

    let merged = prepare(&config)?;
    assert_eq!(merged.class_counts(), (5, 0));

    let err = train(&config, &merged.records).unwrap_err();
    assert!(matches!(err, PipelineError::DataQuality(_)));
    assert!(!config.model_bundle_path().exists());

    Ok(())
}

#[test]
fn test_single_state_mixed_networks_scenario() -> Result<()> {
    let dir = TempDir::new()?;
    let config = write_mixed_network_sources(dir.path())?;

    let merged = prepare(&config)?;
    let networks: BTreeSet<NetworkType> = merged.records.iter().map(|r| r.network).collect();
    assert_eq!(networks, BTreeSet::from([NetworkType::Public, NetworkType::Private]));
    assert!(merged.records.iter().all(|r| r.state == "SP"));

    // Public schools share the mean of estadual and municipal rates.
    let rates: Vec<f64> = merged.records.iter().map(|r| r.historical_dropout_rate).collect();
    assert_eq!(rates, vec![25.0, 5.0, 25.0, 25.0, 5.0]);
    let targets: Vec<u8> = merged.records.iter().map(|r| r.high_dropout_risk).collect();
    assert_eq!(targets, vec![1, 0, 1, 1, 0]);

    let bundle = train(&config, &merged.records)?;
    assert_eq!(
        bundle.manifest.columns,
        vec![
            "ideb",
            "nivel_socioeconomico",
            "taxa_evasao_historica",
            "sigla_uf_SP",
            "rede_private",
            "rede_public",
        ]
    );

    let state = RiskState::from_config(&config)?;
    let prediction = state.predict(&simulated("SP", None))?;
    assert!(prediction.label <= 1);
    assert!((0.0..=1.0).contains(&prediction.probability));

    Ok(())
}

#[test]
fn test_training_rejects_table_prepared_with_other_threshold() -> Result<()> {
    let dir = TempDir::new()?;
    let mut config = write_sources(dir.path(), [5.0, 10.0, 15.0, 25.0, 30.0])?;
    let merged = prepare(&config)?;

    // 15 > 12 would be high risk, but the table was labeled at 20.
    config.target.threshold = 12.0;
    let err = train(&config, &merged.records).unwrap_err();
    assert!(matches!(err, PipelineError::DataQuality(_)));
    assert!(!config.model_bundle_path().exists());

    config.target.threshold = 20.0;
    train(&config, &merged.records)?;
    assert!(config.model_bundle_path().exists());

    Ok(())
}

//! Integration tests for the deterministic GBDT classifier trainer
//!
//! Ensures identical models are produced across multiple runs and that the
//! trained model separates a simple synthetic problem.

use anyhow::Result;
use dropout_gbdt::Model;
use dropout_trainer::{train_model, Dataset, LcgRng, TrainingParams};
use proptest::prelude::*;

/// Synthetic dropout-like rows: [ideb, nse, historical_rate]; positive when
/// the historical rate is high.
fn synthetic_rows() -> (Vec<Vec<f64>>, Vec<u8>) {
    let mut rng = LcgRng::new(2024);
    let mut rows = Vec::new();
    let mut targets = Vec::new();

    for i in 0..60 {
        let rate = 2.0 + (i as f64) * 0.5;
        let ideb = 3.0 + (rng.next_range(60) as f64) / 10.0;
        let nse = 35.0 + (rng.next_range(400) as f64) / 10.0;
        rows.push(vec![ideb, nse, rate]);
        targets.push(u8::from(rate > 20.0));
    }

    (rows, targets)
}

fn params() -> TrainingParams {
    TrainingParams {
        num_trees: 20,
        max_depth: 3,
        min_samples_leaf: 2,
        ..TrainingParams::default()
    }
}

#[test]
fn test_deterministic_training() -> Result<()> {
    let (rows, targets) = synthetic_rows();
    let dataset = Dataset::from_f64_rows(&rows, &targets)?;

    let model1 = train_model(&dataset, params())?;
    let model2 = train_model(&dataset, params())?;

    assert_eq!(model1.bias, model2.bias, "Bias should be identical");
    assert_eq!(model1.trees.len(), model2.trees.len());

    for (i, (tree1, tree2)) in model1.trees.iter().zip(model2.trees.iter()).enumerate() {
        assert_eq!(tree1, tree2, "Tree {i} should be identical");
    }

    Ok(())
}

#[test]
fn test_cross_run_canonical_json() -> Result<()> {
    let (rows, targets) = synthetic_rows();
    let dataset = Dataset::from_f64_rows(&rows, &targets)?;

    let mut json_outputs = Vec::new();
    for _ in 0..3 {
        let model = train_model(&dataset, params())?;
        json_outputs.push(model.to_canonical_json()?);
    }

    for (i, json) in json_outputs.iter().enumerate().skip(1) {
        assert_eq!(&json_outputs[0], json, "JSON output from run {i} should match run 0");
    }

    let restored: Model = serde_json::from_str(&json_outputs[0])?;
    restored.validate()?;

    Ok(())
}

#[test]
fn test_model_separates_training_data() -> Result<()> {
    let (rows, targets) = synthetic_rows();
    let dataset = Dataset::from_f64_rows(&rows, &targets)?;
    let model = train_model(&dataset, params())?;

    let correct = dataset
        .features
        .iter()
        .zip(&dataset.targets)
        .filter(|(row, &target)| model.classify(row).0 == target)
        .count();

    assert_eq!(correct, dataset.len());
    Ok(())
}

#[test]
fn test_unquantized_inputs_route_like_training() -> Result<()> {
    let (rows, targets) = synthetic_rows();
    let dataset = Dataset::from_f64_rows(&rows, &targets)?;
    let model = train_model(&dataset, params())?;

    // Sub-quantum perturbations never move a value across a split.
    for row in &dataset.features {
        let nudged: Vec<i64> = row.iter().map(|v| v - v.rem_euclid(1000) + 999).collect();
        assert_eq!(model.score(row), model.score(&nudged));
    }

    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn trained_models_stay_within_feature_width_and_unit_interval(
        rows in prop::collection::vec(prop::collection::vec(-50.0f64..50.0, 3), 2..30),
        first_label in 0u8..2,
    ) {
        // Both classes present: the first row gets `first_label`, the rest alternate.
        let targets: Vec<u8> = (0..rows.len()).map(|i| (first_label + i as u8) % 2).collect();
        let dataset = Dataset::from_f64_rows(&rows, &targets).unwrap();
        let params = TrainingParams { num_trees: 5, ..params() };

        let model = train_model(&dataset, params).unwrap();
        prop_assert!(model.validate().is_ok());
        prop_assert!(model.required_features() <= dataset.feature_count);
        for row in &dataset.features {
            let (label, p) = model.classify(row);
            prop_assert!((0.0..=1.0).contains(&p));
            prop_assert_eq!(label == 1, p > 0.5);
        }
    }
}

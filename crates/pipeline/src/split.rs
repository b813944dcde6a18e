//! Deterministic stratified train/test split.

use crate::errors::{PipelineError, Result};
use dropout_trainer::LcgRng;
use serde::{Deserialize, Serialize};

pub const DEFAULT_TEST_FRACTION: f64 = 0.3;
pub const DEFAULT_SEED: i64 = 42;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub test_fraction: f64,
    pub seed: i64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            test_fraction: DEFAULT_TEST_FRACTION,
            seed: DEFAULT_SEED,
        }
    }
}

/// Row indices of each partition, ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainTestSplit {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Test rows drawn from a class of `n` rows.
fn test_count(n: usize, fraction: f64) -> usize {
    let count = (n as f64 * fraction).round() as usize;
    if n >= 2 {
        count.min(n - 1)
    } else {
        0
    }
}

/// Split rows so that both partitions keep the class proportions of
/// `targets`. Each class is shuffled with an LCG seeded by `config.seed`;
/// the same targets and seed always give the same partition.
pub fn stratified_split(targets: &[u8], config: &SplitConfig) -> Result<TrainTestSplit> {
    if !(config.test_fraction > 0.0 && config.test_fraction < 1.0) {
        return Err(PipelineError::Config(format!(
            "test fraction must be in (0, 1), got {}",
            config.test_fraction
        )));
    }
    if targets.len() < 2 {
        return Err(PipelineError::DataQuality(format!(
            "need at least 2 rows to split, got {}",
            targets.len()
        )));
    }

    let mut rng = LcgRng::new(config.seed);
    let mut train = Vec::new();
    let mut test = Vec::new();
    for class in [0u8, 1u8] {
        let mut members: Vec<usize> = targets
            .iter()
            .enumerate()
            .filter_map(|(i, &t)| (t == class).then_some(i))
            .collect();
        rng.shuffle(&mut members);

        let n_test = test_count(members.len(), config.test_fraction);
        test.extend_from_slice(&members[..n_test]);
        train.extend_from_slice(&members[n_test..]);
    }
    train.sort_unstable();
    test.sort_unstable();

    for (name, partition) in [("train", &train), ("test", &test)] {
        let positives = partition.iter().filter(|&&i| targets[i] == 1).count();
        if positives == 0 || positives == partition.len() {
            return Err(PipelineError::DataQuality(format!(
                "{name} partition has a single class ({positives} positives in {} rows)",
                partition.len()
            )));
        }
    }

    tracing::debug!(train = train.len(), test = test.len(), "Stratified split");
    Ok(TrainTestSplit { train, test })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_five_school_split() {
        let split = stratified_split(&[0, 0, 0, 1, 1], &SplitConfig::default()).unwrap();
        assert_eq!(split.test.len(), 2);
        assert_eq!(split.train.len(), 3);
        assert!(split.test.iter().any(|&i| i >= 3));
        assert!(split.train.iter().any(|&i| i >= 3));
    }

    #[test]
    fn test_single_class_rejected() {
        let err = stratified_split(&[1, 1, 1, 1], &SplitConfig::default()).unwrap_err();
        assert!(matches!(err, PipelineError::DataQuality(_)));
    }

    #[test]
    fn test_lone_positive_rejected() {
        // One positive cannot appear in both partitions.
        let err = stratified_split(&[0, 0, 0, 0, 1], &SplitConfig::default()).unwrap_err();
        assert!(err.to_string().contains("single class"));
    }

    #[test]
    fn test_too_few_rows() {
        assert!(matches!(
            stratified_split(&[1], &SplitConfig::default()),
            Err(PipelineError::DataQuality(_))
        ));
    }

    #[test]
    fn test_invalid_fraction() {
        let config = SplitConfig {
            test_fraction: 1.0,
            ..SplitConfig::default()
        };
        assert!(matches!(
            stratified_split(&[0, 1, 0, 1], &config),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_test_count_rounding() {
        assert_eq!(test_count(3, 0.3), 1);
        assert_eq!(test_count(2, 0.3), 1);
        assert_eq!(test_count(10, 0.3), 3);
        assert_eq!(test_count(2, 0.9), 1);
        assert_eq!(test_count(1, 0.5), 0);
    }

    proptest! {
        #[test]
        fn split_is_a_deterministic_partition(
            negatives in 2usize..40,
            positives in 2usize..40,
            seed in any::<i64>(),
        ) {
            let mut targets = vec![0u8; negatives];
            targets.extend(std::iter::repeat(1u8).take(positives));
            let config = SplitConfig { seed, ..SplitConfig::default() };

            let split = stratified_split(&targets, &config).unwrap();
            prop_assert_eq!(&split, &stratified_split(&targets, &config).unwrap());

            let mut all: Vec<usize> = split.train.iter().chain(&split.test).copied().collect();
            all.sort_unstable();
            prop_assert_eq!(all, (0..targets.len()).collect::<Vec<_>>());

            let test_positives = split.test.iter().filter(|&&i| targets[i] == 1).count();
            prop_assert_eq!(test_positives, test_count(positives, 0.3));
        }
    }
}

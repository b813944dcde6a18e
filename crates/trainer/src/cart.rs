//! Regression trees over gradient statistics
//!
//! Deterministic exact-greedy tree construction over quantized fixed-point
//! features, fitting Newton leaf values to gradient/hessian statistics.

use dropout_gbdt::{Node, Tree, SCALE};

use crate::deterministic::SplitTieBreaker;

/// Largest magnitude a single leaf may contribute, in log-odds units.
const MAX_LEAF_LOG_ODDS: i64 = 16;

/// Growth limits of one tree.
#[derive(Clone, Debug)]
pub struct TreeConfig {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub quant_step: i64,
    /// L2 penalty on leaf values (fixed-point)
    pub l2_regularization: i64,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            min_samples_leaf: 1,
            quant_step: 1000,
            l2_regularization: SCALE,
        }
    }
}

#[derive(Clone, Debug)]
struct GradientRow {
    features: Vec<i64>,
    gradient: i64,
    hessian: i64,
}

#[derive(Debug, Clone)]
struct SplitCandidate {
    feature_idx: usize,
    threshold: i64,
    gain: i64,
    tie_breaker: SplitTieBreaker,
}

impl SplitCandidate {
    fn new(feature_idx: usize, threshold: i64, gain: i64, node_id: usize) -> Self {
        Self {
            feature_idx,
            threshold,
            gain,
            tie_breaker: SplitTieBreaker::new(feature_idx, threshold, node_id),
        }
    }

    fn beats(&self, other: &SplitCandidate) -> bool {
        self.gain > other.gain || (self.gain == other.gain && self.tie_breaker < other.tie_breaker)
    }
}

/// Floor a value onto the quantization grid.
pub fn quantize(value: i64, quant_step: i64) -> i64 {
    value.div_euclid(quant_step) * quant_step
}

/// Build a tree using the exact-greedy CART algorithm.
///
/// Split thresholds sit at the top of a quantization bucket
/// (`bucket + quant_step - 1`), so comparing an unquantized value against the
/// threshold routes it exactly as its quantized value was routed in training.
pub struct CartBuilder {
    config: TreeConfig,
    rows: Vec<GradientRow>,
    feature_count: usize,
}

impl CartBuilder {
    /// `features`, `gradients` and `hessians` are parallel; extra entries in
    /// a longer slice are ignored.
    pub fn new(
        features: &[Vec<i64>],
        gradients: &[i64],
        hessians: &[i64],
        config: TreeConfig,
    ) -> Self {
        debug_assert!(features.len() == gradients.len() && gradients.len() == hessians.len());

        let quant_step = config.quant_step.max(1);
        let rows: Vec<GradientRow> = features
            .iter()
            .zip(gradients)
            .zip(hessians)
            .map(|((values, &gradient), &hessian)| GradientRow {
                features: values.iter().map(|&v| quantize(v, quant_step)).collect(),
                gradient,
                hessian,
            })
            .collect();

        let feature_count = rows.first().map_or(0, |row| row.features.len());

        Self {
            config: TreeConfig { quant_step, ..config },
            rows,
            feature_count,
        }
    }

    /// Grow the tree. Its weight is 1.0; the booster rescales it.
    pub fn build(&self) -> Tree {
        let mut nodes = Vec::new();
        let indices: Vec<usize> = (0..self.rows.len()).collect();

        self.build_node(&indices, 0, &mut nodes, 0);

        Tree::new(nodes, SCALE)
    }

    /// Recursively build tree nodes in pre-order; returns the node index.
    fn build_node(
        &self,
        indices: &[usize],
        depth: usize,
        nodes: &mut Vec<Node>,
        node_id: usize,
    ) -> i32 {
        let current_idx = nodes.len() as i32;

        let split = if depth >= self.config.max_depth
            || indices.len() < 2 * self.config.min_samples_leaf.max(1)
        {
            None
        } else {
            self.find_best_split(indices, node_id)
        };

        let Some(split) = split else {
            nodes.push(Node::leaf(current_idx, self.calculate_leaf_value(indices)));
            return current_idx;
        };

        let (left_indices, right_indices) =
            self.split_samples(indices, split.feature_idx, split.threshold);

        // Reserve the slot; children are patched in once built.
        nodes.push(Node::internal(
            current_idx,
            split.feature_idx as i32,
            split.threshold,
            -1,
            -1,
        ));

        let left_idx = self.build_node(&left_indices, depth + 1, nodes, node_id * 2 + 1);
        let right_idx = self.build_node(&right_indices, depth + 1, nodes, node_id * 2 + 2);

        nodes[current_idx as usize].left = left_idx;
        nodes[current_idx as usize].right = right_idx;

        current_idx
    }

    /// Find the best split by sweeping each feature in sorted order.
    fn find_best_split(&self, indices: &[usize], node_id: usize) -> Option<SplitCandidate> {
        let (g_parent, h_parent) = self.sum_gradients_hessians(indices);
        let parent_score = self.structure_score(g_parent, h_parent);
        let min_leaf = self.config.min_samples_leaf.max(1);
        let total = indices.len();

        let mut best_split: Option<SplitCandidate> = None;
        let mut sorted = indices.to_vec();

        for feature_idx in 0..self.feature_count {
            sorted.sort_by_key(|&idx| (self.rows[idx].features[feature_idx], idx));

            let mut g_left = 0i64;
            let mut h_left = 0i64;

            for (pos, &idx) in sorted.iter().enumerate() {
                let sample = &self.rows[idx];
                g_left = g_left.saturating_add(sample.gradient);
                h_left = h_left.saturating_add(sample.hessian);

                let Some(&next) = sorted.get(pos + 1) else {
                    break;
                };
                let value = sample.features[feature_idx];
                if self.rows[next].features[feature_idx] == value {
                    continue;
                }

                let left_count = pos + 1;
                if left_count < min_leaf || total - left_count < min_leaf {
                    continue;
                }

                let gain = self
                    .structure_score(g_left, h_left)
                    .saturating_add(self.structure_score(
                        g_parent.saturating_sub(g_left),
                        h_parent.saturating_sub(h_left),
                    ))
                    .saturating_sub(parent_score);
                if gain <= 0 {
                    continue;
                }

                let threshold = value + self.config.quant_step - 1;
                let candidate = SplitCandidate::new(feature_idx, threshold, gain, node_id);
                if best_split.as_ref().map_or(true, |best| candidate.beats(best)) {
                    best_split = Some(candidate);
                }
            }
        }

        best_split
    }

    fn split_samples(
        &self,
        indices: &[usize],
        feature_idx: usize,
        threshold: i64,
    ) -> (Vec<usize>, Vec<usize>) {
        indices
            .iter()
            .copied()
            .partition(|&idx| self.rows[idx].features[feature_idx] <= threshold)
    }

    /// G² / (H + λ) using i128 to avoid overflow
    fn structure_score(&self, g: i64, h: i64) -> i64 {
        let denom = h as i128 + self.config.l2_regularization as i128;
        if denom <= 0 {
            return 0;
        }
        ((g as i128 * g as i128) / denom).min(i64::MAX as i128) as i64
    }

    fn sum_gradients_hessians(&self, indices: &[usize]) -> (i64, i64) {
        indices.iter().fold((0i64, 0i64), |(g, h), &idx| {
            (
                g.saturating_add(self.rows[idx].gradient),
                h.saturating_add(self.rows[idx].hessian),
            )
        })
    }

    /// Newton leaf value: -G / (H + λ), fixed-point log-odds
    fn calculate_leaf_value(&self, indices: &[usize]) -> i64 {
        let (sum_g, sum_h) = self.sum_gradients_hessians(indices);
        let denom = sum_h as i128 + self.config.l2_regularization as i128;

        if denom <= 0 {
            return 0;
        }

        let value = -(sum_g as i128 * SCALE as i128) / denom;
        let bound = (MAX_LEAF_LOG_ODDS * SCALE) as i128;
        value.clamp(-bound, bound) as i64
    }
}

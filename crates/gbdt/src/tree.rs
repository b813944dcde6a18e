//! Decision tree structures for GBDT scoring
//!
//! Integer-only tree nodes and traversal. Thresholds and leaf values are
//! fixed-point integers at SCALE precision.

use serde::{Deserialize, Serialize};

/// One node of a flat, index-addressed tree.
///
/// Split nodes carry a non-negative `feature_idx` and two forward child
/// indices. Leaves carry `feature_idx = -1` and their log-odds in `leaf`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Node {
    pub id: i32,
    pub left: i32,
    pub right: i32,
    pub feature_idx: i32,
    /// Samples with `feature <= threshold` take the left branch.
    pub threshold: i64,
    pub leaf: Option<i64>,
}

impl Node {
    pub fn internal(id: i32, feature_idx: i32, threshold: i64, left: i32, right: i32) -> Self {
        Self {
            id,
            left,
            right,
            feature_idx,
            threshold,
            leaf: None,
        }
    }

    /// Terminal node holding a fixed-point log-odds contribution.
    pub fn leaf(id: i32, value: i64) -> Self {
        Self {
            id,
            left: -1,
            right: -1,
            feature_idx: -1,
            threshold: 0,
            leaf: Some(value),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.feature_idx == -1 || self.leaf.is_some()
    }
}

/// A boosted tree. Node 0 is the root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Tree {
    pub nodes: Vec<Node>,
    /// Shrinkage applied to every leaf of this tree, fixed-point.
    pub weight: i64,
}

impl Tree {
    pub fn new(nodes: Vec<Node>, weight: i64) -> Self {
        Self { nodes, weight }
    }

    /// Leaf value reached by `features`.
    ///
    /// Malformed structure (dangling or cyclic child, out-of-range feature)
    /// evaluates to 0; [`Tree::validate`] rejects such trees at load time.
    pub fn evaluate(&self, features: &[i64]) -> i64 {
        let mut cursor = 0usize;
        for _ in 0..self.nodes.len() {
            let Some(node) = self.nodes.get(cursor) else {
                break;
            };
            if node.is_leaf() {
                return node.leaf.unwrap_or(0);
            }
            let Some(&value) = features.get(node.feature_idx as usize) else {
                break;
            };
            let child = if value <= node.threshold { node.left } else { node.right };
            match usize::try_from(child) {
                Ok(next) => cursor = next,
                Err(_) => break,
            }
        }
        0
    }

    /// Highest feature index referenced by any split, if the tree has splits.
    pub fn max_feature_index(&self) -> Option<usize> {
        self.nodes
            .iter()
            .filter(|node| !node.is_leaf())
            .map(|node| node.feature_idx as usize)
            .max()
    }

    /// Structural check run before a tree is scored.
    pub fn validate(&self) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("empty tree".into());
        }

        for (i, node) in self.nodes.iter().enumerate() {
            if node.is_leaf() {
                if node.leaf.is_none() {
                    return Err(format!("node {i} is a leaf without a value"));
                }
                continue;
            }

            // Children must point forward to keep traversal acyclic.
            for (side, child) in [("left", node.left), ("right", node.right)] {
                if child <= i as i32 || child as usize >= self.nodes.len() {
                    return Err(format!("node {i}: {side} child {child} out of order"));
                }
            }

            if node.feature_idx < 0 {
                return Err(format!(
                    "node {i}: negative feature index {}",
                    node.feature_idx
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Splits on an IDEB-like feature at 5.0.
    fn ideb_stump() -> Tree {
        Tree::new(
            vec![
                Node::internal(0, 0, 5_000_000, 1, 2),
                Node::leaf(1, 750_000),
                Node::leaf(2, -750_000),
            ],
            1_000_000,
        )
    }

    #[test]
    fn test_constructors_mark_leaves() {
        let split = Node::internal(4, 2, -10, 5, 6);
        assert!(!split.is_leaf());
        assert_eq!(split.leaf, None);

        let leaf = Node::leaf(7, 42);
        assert!(leaf.is_leaf());
        assert_eq!((leaf.left, leaf.right, leaf.feature_idx), (-1, -1, -1));
    }

    #[test]
    fn test_threshold_is_inclusive_on_the_left() {
        let tree = ideb_stump();
        assert_eq!(tree.evaluate(&[3_200_000]), 750_000);
        assert_eq!(tree.evaluate(&[5_000_000]), 750_000);
        assert_eq!(tree.evaluate(&[5_000_001]), -750_000);
    }

    #[test]
    fn test_short_feature_vector_scores_zero() {
        assert_eq!(ideb_stump().evaluate(&[]), 0);
    }

    #[test]
    fn test_max_feature_index() {
        let tree = Tree::new(
            vec![
                Node::internal(0, 1, 0, 1, 2),
                Node::leaf(1, 1),
                Node::internal(2, 8, 0, 3, 4),
                Node::leaf(3, 2),
                Node::leaf(4, 3),
            ],
            1,
        );
        assert_eq!(tree.max_feature_index(), Some(8));
        assert_eq!(Tree::new(vec![Node::leaf(0, 9)], 1).max_feature_index(), None);
    }

    #[test]
    fn test_validate_rejects_malformed_trees() {
        assert!(ideb_stump().validate().is_ok());
        assert!(Tree::new(Vec::new(), 1).validate().is_err());

        let mut out_of_range = ideb_stump();
        out_of_range.nodes[0].right = 9;
        assert!(out_of_range.validate().is_err());

        let mut backwards = ideb_stump();
        backwards.nodes[0].left = 0;
        assert!(backwards.validate().is_err());

        let mut no_value = ideb_stump();
        no_value.nodes[1].leaf = None;
        no_value.nodes[1].feature_idx = -1;
        assert!(no_value.validate().is_err());
    }
}

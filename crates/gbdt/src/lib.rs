//! Fixed-point GBDT classifier
//!
//! Provides the scoring side of the dropout-risk model:
//!
//! - **Integer trees**: split thresholds and leaf values are fixed-point
//!   integers at [`SCALE`] precision, so scoring is reproducible across
//!   platforms.
//! - **Logistic output**: the ensemble accumulates log-odds; [`Model::probability`]
//!   maps them to the class-1 probability.
//! - **Canonical serialization**: models serialize to JSON with sorted keys and
//!   are identified by the BLAKE3 hash of those bytes.
//!
//! # Usage
//!
//! ```rust
//! use dropout_gbdt::{Model, Node, Tree, SCALE};
//!
//! let tree = Tree::new(
//!     vec![
//!         Node::internal(0, 0, 50 * SCALE, 1, 2),
//!         Node::leaf(1, -2 * SCALE),
//!         Node::leaf(2, 2 * SCALE),
//!     ],
//!     SCALE,
//! );
//! let model = Model::new(vec![tree], 0);
//!
//! let p = model.probability(&[80 * SCALE]);
//! assert!(p > 0.5);
//! ```

pub mod fixed;
pub mod model;
pub mod serde_canon;
pub mod tree;

pub use fixed::{from_fixed, sigmoid, to_fixed};
pub use model::{Model, ModelError, SCALE};
pub use serde_canon::{blake3_hex, hash_canonical_hex, to_canonical_json, CanonicalError};
pub use tree::{Node, Tree};

/// Crate version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! On-disk model schema.
//!
//! ```json
//! {
//!   "metric_names": ["instructions", "cycles"],
//!   "means": [0.0, 0.0],
//!   "std_devs": [1.0, 1.0],
//!   "rotation_matrix": [[1.0, 0.0], [0.0, 1.0]],
//!   "clusters": [
//!     {
//!       "center": [0.0, 0.0],
//!       "regressors": [
//!         { "function": "power", "index": 0, "exponent": 1.0, "weight": 2.5e-9 },
//!         { "function": "constant", "weight": 0.1 }
//!       ]
//!     }
//!   ]
//! }
//! ```

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ModelFile {
    pub metric_names: Vec<String>,
    pub means: Vec<f64>,
    pub std_devs: Vec<f64>,
    pub rotation_matrix: Vec<Vec<f64>>,
    pub clusters: Vec<ClusterFile>,
}

#[derive(Debug, Deserialize)]
pub struct ClusterFile {
    pub center: Vec<f64>,
    pub regressors: Vec<RegressorFile>,
}

#[derive(Debug, Deserialize)]
pub struct RegressorFile {
    #[serde(flatten)]
    pub function: BasisFunction,
    pub weight: f64,
}

/// The closed set of basis functions a cluster may combine.
///
/// Kept as plain data so model loading stays pure and evaluation is a
/// match, not a function-pointer dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "function", rename_all = "snake_case")]
pub enum BasisFunction {
    Constant,
    Power { index: usize, exponent: f64 },
    Product { i: usize, j: usize },
    Sqrt { index: usize },
    Log2 { index: usize },
}

impl BasisFunction {
    /// Largest projected-vector index the function touches, if any.
    pub fn max_index(&self) -> Option<usize> {
        match self {
            BasisFunction::Constant => None,
            BasisFunction::Power { index, .. }
            | BasisFunction::Sqrt { index }
            | BasisFunction::Log2 { index } => Some(*index),
            BasisFunction::Product { i, j } => Some((*i).max(*j)),
        }
    }
}

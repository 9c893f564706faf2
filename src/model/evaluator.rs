//! Model evaluation and the per-core energy split.

use super::file::{BasisFunction, ModelFile};
use crate::domain::ModelError;

#[derive(Debug)]
struct Cluster {
    center: Vec<f64>,
    regressors: Vec<(BasisFunction, f64)>,
}

/// A validated, immutable regression model.
///
/// Evaluation is deterministic: identical inputs on an identical model
/// produce bit-identical outputs.
#[derive(Debug)]
pub struct EnergyModel {
    metric_names: Vec<String>,
    means: Vec<f64>,
    std_devs: Vec<f64>,
    /// One row per input metric, one column per projected dimension.
    rotation: Vec<Vec<f64>>,
    clusters: Vec<Cluster>,
    projected_dims: usize,
}

impl EnergyModel {
    /// Parse and validate a JSON model document.
    pub fn from_json(text: &str) -> Result<Self, ModelError> {
        let file: ModelFile = serde_json::from_str(text)?;
        Self::from_file(file)
    }

    fn from_file(file: ModelFile) -> Result<Self, ModelError> {
        if file.clusters.is_empty() {
            return Err(ModelError::NoClusters);
        }
        if file.rotation_matrix.len() != file.metric_names.len() {
            return Err(ModelError::RotationRowMismatch {
                metrics: file.metric_names.len(),
                rows: file.rotation_matrix.len(),
            });
        }
        let projected_dims = match file.rotation_matrix.first() {
            Some(row) => row.len(),
            None => file.means.len(),
        };
        if file.rotation_matrix.iter().any(|row| row.len() != projected_dims) {
            return Err(ModelError::RotationRagged);
        }
        if file.means.len() != projected_dims {
            return Err(ModelError::LengthMismatch {
                field: "means",
                expected: projected_dims,
                actual: file.means.len(),
            });
        }
        if file.std_devs.len() != projected_dims {
            return Err(ModelError::LengthMismatch {
                field: "std_devs",
                expected: projected_dims,
                actual: file.std_devs.len(),
            });
        }

        let mut clusters = Vec::with_capacity(file.clusters.len());
        for cluster in file.clusters {
            if cluster.center.len() != projected_dims {
                return Err(ModelError::LengthMismatch {
                    field: "cluster center",
                    expected: projected_dims,
                    actual: cluster.center.len(),
                });
            }
            let mut regressors = Vec::with_capacity(cluster.regressors.len());
            for regressor in cluster.regressors {
                if let Some(index) = regressor.function.max_index() {
                    if index >= projected_dims {
                        return Err(ModelError::IndexOutOfRange { index, dims: projected_dims });
                    }
                }
                regressors.push((regressor.function, regressor.weight));
            }
            clusters.push(Cluster { center: cluster.center, regressors });
        }

        Ok(Self {
            metric_names: file.metric_names,
            means: file.means,
            std_devs: file.std_devs,
            rotation: file.rotation_matrix,
            clusters,
            projected_dims,
        })
    }

    /// The model used when no file is supplied: no inputs, one cluster,
    /// a single unit constant. Every core scores 1, so the split is
    /// uniform.
    pub fn constant() -> Self {
        Self {
            metric_names: Vec::new(),
            means: Vec::new(),
            std_devs: Vec::new(),
            rotation: Vec::new(),
            clusters: vec![Cluster {
                center: Vec::new(),
                regressors: vec![(BasisFunction::Constant, 1.0)],
            }],
            projected_dims: 0,
        }
    }

    /// Counter names the model consumes, in input order.
    pub fn metric_names(&self) -> &[String] {
        &self.metric_names
    }

    /// Score one core's counter deltas. `inputs` must match
    /// [`EnergyModel::metric_names`] in length and order.
    pub fn evaluate(&self, inputs: &[f64]) -> f64 {
        debug_assert_eq!(inputs.len(), self.metric_names.len());

        let projected = self.project(inputs);
        let standardized: Vec<f64> = projected
            .iter()
            .zip(self.means.iter().zip(&self.std_devs))
            .map(|(value, (mean, std_dev))| (value - mean) / std_dev)
            .collect();

        // Nearest centroid in the standardized space; the strict inequality
        // keeps the first cluster on ties.
        let mut chosen = &self.clusters[0];
        let mut best = squared_distance(&standardized, &chosen.center);
        for cluster in &self.clusters[1..] {
            let distance = squared_distance(&standardized, &cluster.center);
            if distance < best {
                best = distance;
                chosen = cluster;
            }
        }

        // Regressors see the projected vector, not the standardized one.
        let sum: f64 = chosen
            .regressors
            .iter()
            .map(|(function, weight)| weight * eval_basis(*function, &projected))
            .sum();
        sum.abs()
    }

    fn project(&self, inputs: &[f64]) -> Vec<f64> {
        let mut projected = vec![0.0; self.projected_dims];
        for (input, row) in inputs.iter().zip(&self.rotation) {
            for (out, coefficient) in projected.iter_mut().zip(row) {
                *out += input * coefficient;
            }
        }
        projected
    }
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn eval_basis(function: BasisFunction, x: &[f64]) -> f64 {
    match function {
        BasisFunction::Constant => 1.0,
        BasisFunction::Power { index, exponent } => {
            let value = x[index];
            // 0^negative is undefined; the model treats an idle input as unit.
            if value == 0.0 {
                1.0
            } else {
                value.abs().powf(exponent)
            }
        }
        BasisFunction::Product { i, j } => x[i] * x[j],
        BasisFunction::Sqrt { index } => x[index].abs().sqrt(),
        BasisFunction::Log2 { index } => {
            if index == 0 {
                1.0
            } else {
                x[index].abs().log2()
            }
        }
    }
}

/// Apportion a global energy delta across cores in proportion to their
/// model scores. A zero score sum yields all-zero shares; the remaining
/// sample fields still accumulate for that tick.
pub fn split_energy(total: f64, scores: &[f64]) -> Vec<f64> {
    let sum: f64 = scores.iter().sum();
    if sum == 0.0 {
        return vec![0.0; scores.len()];
    }
    scores.iter().map(|score| total * score / sum).collect()
}

//! Instances and datasets.
//!
//! `Dataset` is the immutable instance source for a run: stable `0..n`
//! indices, one dense feature vector per instance, a non-negative weight and
//! an optional class label. Labels never influence clustering; they are only
//! read by diagnostics.
//!
//! Input can come from plain rows, a `smartcore` `DenseMatrix`, or a `sprs`
//! CSR/CSC matrix (densified row by row).
//!
//! Aggregation follows the metric's sign convention:
//! - distance-based metrics: weighted mean of member vectors
//! - similarity-based metrics: weighted sum scaled to unit L2 norm

use log::{debug, trace};
use smartcore::linalg::basic::arrays::Array;
use smartcore::linalg::basic::matrix::DenseMatrix;
use sprs::CsMat;

use crate::error::{ClusteringError, ClusteringResult};

/// A single owned instance.
#[derive(Clone, Debug, PartialEq)]
pub struct Instance {
    pub features: Vec<f64>,
    pub weight: f64,
    pub label: Option<usize>,
}

impl Instance {
    #[inline]
    pub fn new(features: Vec<f64>) -> Self {
        Self {
            features,
            weight: 1.0,
            label: None,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_label(mut self, label: usize) -> Self {
        self.label = Some(label);
        self
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Validated, indexable collection of instances sharing one feature width.
#[derive(Clone, Debug)]
pub struct Dataset {
    instances: Vec<Instance>,
    n_features: usize,
}

impl Dataset {
    /// Build from raw rows; every instance gets weight 1 and no label.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> ClusteringResult<Self> {
        Self::from_instances(rows.into_iter().map(Instance::new).collect())
    }

    /// Validate and wrap a list of instances.
    ///
    /// Fails on an empty list, zero-width or ragged rows, non-finite feature
    /// values, and negative or non-finite weights.
    pub fn from_instances(instances: Vec<Instance>) -> ClusteringResult<Self> {
        let Some(first) = instances.first() else {
            return Err(ClusteringError::InvalidData(
                "dataset has no instances".to_string(),
            ));
        };
        let n_features = first.len();
        if n_features == 0 {
            return Err(ClusteringError::InvalidData(
                "instances have no features".to_string(),
            ));
        }

        for (i, inst) in instances.iter().enumerate() {
            if inst.len() != n_features {
                return Err(ClusteringError::InvalidData(format!(
                    "instance {} has {} features, expected {}",
                    i,
                    inst.len(),
                    n_features
                )));
            }
            if let Some(j) = inst.features.iter().position(|v| !v.is_finite()) {
                return Err(ClusteringError::InvalidData(format!(
                    "instance {} feature {} is not finite",
                    i, j
                )));
            }
            if !inst.weight.is_finite() || inst.weight < 0.0 {
                return Err(ClusteringError::InvalidData(format!(
                    "instance {} has invalid weight {}",
                    i, inst.weight
                )));
            }
        }

        debug!(
            "Dataset: {} instances x {} features",
            instances.len(),
            n_features
        );
        Ok(Self {
            instances,
            n_features,
        })
    }

    /// Build from a dense `N x F` matrix.
    pub fn from_dense(matrix: &DenseMatrix<f64>) -> ClusteringResult<Self> {
        let (n, f) = matrix.shape();
        let rows = (0..n)
            .map(|i| (0..f).map(|j| *matrix.get((i, j))).collect())
            .collect();
        Self::from_rows(rows)
    }

    /// Build from a sparse matrix; missing entries are zeros.
    pub fn from_sparse(matrix: &CsMat<f64>) -> ClusteringResult<Self> {
        let (n, f) = (matrix.rows(), matrix.cols());
        let mut rows = vec![vec![0.0; f]; n];
        for (v, (i, j)) in matrix.iter() {
            rows[i][j] = *v;
        }
        trace!("Densified sparse input with {} non-zeros", matrix.nnz());
        Self::from_rows(rows)
    }

    /// Attach class labels, one per instance.
    pub fn with_labels(mut self, labels: Vec<usize>) -> ClusteringResult<Self> {
        if labels.len() != self.instances.len() {
            return Err(ClusteringError::InvalidData(format!(
                "{} labels for {} instances",
                labels.len(),
                self.instances.len()
            )));
        }
        for (inst, label) in self.instances.iter_mut().zip(labels) {
            inst.label = Some(label);
        }
        Ok(self)
    }

    /// Replace instance weights.
    pub fn with_weights(mut self, weights: Vec<f64>) -> ClusteringResult<Self> {
        if weights.len() != self.instances.len() {
            return Err(ClusteringError::InvalidData(format!(
                "{} weights for {} instances",
                weights.len(),
                self.instances.len()
            )));
        }
        if let Some(w) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
            return Err(ClusteringError::InvalidData(format!(
                "invalid instance weight {}",
                w
            )));
        }
        for (inst, w) in self.instances.iter_mut().zip(weights) {
            inst.weight = w;
        }
        Ok(self)
    }

    #[inline]
    pub fn n_instances(&self) -> usize {
        self.instances.len()
    }

    #[inline]
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    #[inline]
    pub fn get(&self, idx: usize) -> &Instance {
        &self.instances[idx]
    }

    #[inline]
    pub fn row(&self, idx: usize) -> &[f64] {
        &self.instances[idx].features
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instance> + '_ {
        self.instances.iter()
    }

    pub fn has_labels(&self) -> bool {
        self.instances.iter().any(|i| i.label.is_some())
    }

    pub fn has_negative_values(&self) -> bool {
        self.instances
            .iter()
            .any(|i| i.features.iter().any(|v| *v < 0.0))
    }

    /// Aggregate feature vector of `members`.
    ///
    /// Distance-based: `Σ w x / Σ w` (plain mean when all weights are zero).
    /// Similarity-based: `Σ w x` scaled to unit L2 norm.
    /// Returns `None` for an empty member set.
    pub fn aggregate<I>(&self, members: I, distance_based: bool) -> Option<Vec<f64>>
    where
        I: IntoIterator<Item = usize>,
    {
        let mut sum = vec![0.0; self.n_features];
        let mut plain = vec![0.0; self.n_features];
        let mut total_weight = 0.0;
        let mut count = 0usize;

        for idx in members {
            let inst = &self.instances[idx];
            for ((s, p), v) in sum.iter_mut().zip(plain.iter_mut()).zip(&inst.features) {
                *s += inst.weight * v;
                *p += v;
            }
            total_weight += inst.weight;
            count += 1;
        }

        if count == 0 {
            return None;
        }

        if distance_based {
            if total_weight > 0.0 {
                sum.iter_mut().for_each(|s| *s /= total_weight);
                Some(sum)
            } else {
                plain.iter_mut().for_each(|p| *p /= count as f64);
                Some(plain)
            }
        } else {
            normalize_unit(&mut sum);
            Some(sum)
        }
    }

    /// Aggregate over every instance.
    pub fn global_aggregate(&self, distance_based: bool) -> Option<Vec<f64>> {
        self.aggregate(0..self.n_instances(), distance_based)
    }

    /// Per-feature `(min, max)` corners over `members`.
    pub fn bounding_box<I>(&self, members: I) -> Option<(Vec<f64>, Vec<f64>)>
    where
        I: IntoIterator<Item = usize>,
    {
        let mut lo = vec![f64::INFINITY; self.n_features];
        let mut hi = vec![f64::NEG_INFINITY; self.n_features];
        let mut seen = false;
        for idx in members {
            seen = true;
            for ((l, h), v) in lo.iter_mut().zip(hi.iter_mut()).zip(self.row(idx)) {
                *l = l.min(*v);
                *h = h.max(*v);
            }
        }
        seen.then_some((lo, hi))
    }
}

/// Scale to unit L2 norm; a zero vector is left unchanged.
pub fn normalize_unit(v: &mut [f64]) {
    let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

// mpck-core/src/metric.rs
//! Learnable distortion measures
//!
//! Implements:
//! - Weighted squared Euclidean (diagonal weights)
//! - Weighted Mahalanobis (full positive-definite weight matrix)
//! - Weighted I-divergence (KL family) with a Jensen-Shannon symmetric form
//! - Weighted dot-product similarity (not learnable, similarity-based)
//!
//! Every family exposes the same `Metric` surface: a (possibly asymmetric)
//! distortion between an instance and a centroid, a symmetric distortion
//! between two instances, the log-normalizer of its weights, and weight
//! get/set. Weights are kept strictly positive (positive-definite for the
//! matrix family); `set_weights` rejects anything else.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::matrix::{self, SquareMatrix};

/// Floor applied to centroid coordinates inside logarithms
pub const KL_FLOOR: f64 = 1e-10;

/// Family selector used by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum MetricFamily {
    #[default]
    Euclidean,
    Mahalanobis,
    Kl,
    DotProduct,
}

impl fmt::Display for MetricFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetricFamily::Euclidean => "weighted-euclidean",
            MetricFamily::Mahalanobis => "weighted-mahalanobis",
            MetricFamily::Kl => "weighted-kl",
            MetricFamily::DotProduct => "weighted-dotp",
        };
        write!(f, "{}", name)
    }
}

impl MetricFamily {
    pub fn is_distance_based(&self) -> bool {
        !matches!(self, MetricFamily::DotProduct)
    }

    /// Weights are a per-feature vector
    pub fn is_diagonal(&self) -> bool {
        !matches!(self, MetricFamily::Mahalanobis)
    }
}

/// Metric parameters
#[derive(Debug, Clone)]
pub enum MetricWeights {
    Diagonal(Vec<f64>),
    Full(SquareMatrix),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricError {
    DimensionMismatch { expected: usize, got: usize },
    NonPositiveWeight { feature: usize, value: f64 },
    NotPositiveDefinite,
    WrongWeightKind(MetricFamily),
}

impl fmt::Display for MetricError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricError::DimensionMismatch { expected, got } => {
                write!(f, "Weight dimension mismatch: expected {}, got {}", expected, got)
            }
            MetricError::NonPositiveWeight { feature, value } => {
                write!(f, "Weight for feature {} must be > 0, got {}", feature, value)
            }
            MetricError::NotPositiveDefinite => write!(f, "Weight matrix is not positive definite"),
            MetricError::WrongWeightKind(family) => {
                write!(f, "Weight kind does not match metric family {}", family)
            }
        }
    }
}

impl std::error::Error for MetricError {}

/// The distortion interface consumed by assignment, learning and the
/// objective function.
pub trait Metric: fmt::Debug + Send + Sync {
    fn family(&self) -> MetricFamily;

    fn n_features(&self) -> usize;

    /// Distortion of instance `x` with respect to `centroid`
    fn distortion(&self, x: &[f64], centroid: &[f64]) -> f64;

    /// Symmetric distortion between two instances
    fn pair_distortion(&self, a: &[f64], b: &[f64]) -> f64;

    /// Distance used for seed selection (distance-based families)
    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        self.pair_distortion(a, b).max(0.0).sqrt()
    }

    /// Similarity used for seed selection (similarity-based families)
    fn similarity(&self, a: &[f64], b: &[f64]) -> f64 {
        1.0 / (1.0 + self.distance(a, b))
    }

    fn is_distance_based(&self) -> bool {
        self.family().is_distance_based()
    }

    /// `Σ log w` for diagonal weights, `log det A` for matrix weights
    fn log_normalizer(&self) -> f64;

    fn weights(&self) -> MetricWeights;

    fn set_weights(&mut self, weights: MetricWeights) -> Result<(), MetricError>;

    /// Back to unit weights / identity
    fn reset(&mut self);
}

fn validate_diagonal(expected: usize, w: &[f64]) -> Result<(), MetricError> {
    if w.len() != expected {
        return Err(MetricError::DimensionMismatch {
            expected,
            got: w.len(),
        });
    }
    match w.iter().position(|v| !(v.is_finite() && *v > 0.0)) {
        Some(feature) => Err(MetricError::NonPositiveWeight {
            feature,
            value: w[feature],
        }),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Weighted Euclidean
// ---------------------------------------------------------------------------

/// `d(x, c) = Σ_j w_j (x_j - c_j)²`
#[derive(Debug, Clone)]
pub struct WeightedEuclidean {
    weights: Vec<f64>,
}

impl WeightedEuclidean {
    pub fn new(n_features: usize) -> Self {
        Self {
            weights: vec![1.0; n_features],
        }
    }

    pub fn diag(&self) -> &[f64] {
        &self.weights
    }

    /// Unweighted per-feature squared differences
    pub fn components(a: &[f64], b: &[f64]) -> Vec<f64> {
        a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).collect()
    }
}

impl Metric for WeightedEuclidean {
    fn family(&self) -> MetricFamily {
        MetricFamily::Euclidean
    }

    fn n_features(&self) -> usize {
        self.weights.len()
    }

    fn distortion(&self, x: &[f64], centroid: &[f64]) -> f64 {
        self.pair_distortion(x, centroid)
    }

    fn pair_distortion(&self, a: &[f64], b: &[f64]) -> f64 {
        debug_assert_eq!(a.len(), b.len());
        a.iter()
            .zip(b)
            .zip(&self.weights)
            .map(|((x, y), w)| w * (x - y) * (x - y))
            .sum()
    }

    fn log_normalizer(&self) -> f64 {
        self.weights.iter().map(|w| w.ln()).sum()
    }

    fn weights(&self) -> MetricWeights {
        MetricWeights::Diagonal(self.weights.clone())
    }

    fn set_weights(&mut self, weights: MetricWeights) -> Result<(), MetricError> {
        match weights {
            MetricWeights::Diagonal(w) => {
                validate_diagonal(self.weights.len(), &w)?;
                self.weights = w;
                Ok(())
            }
            MetricWeights::Full(_) => Err(MetricError::WrongWeightKind(self.family())),
        }
    }

    fn reset(&mut self) {
        self.weights.iter_mut().for_each(|w| *w = 1.0);
    }
}

// ---------------------------------------------------------------------------
// Weighted Mahalanobis
// ---------------------------------------------------------------------------

/// `d(x, c) = (x - c)ᵀ A (x - c)` with `A` positive definite
#[derive(Debug, Clone)]
pub struct WeightedMahalanobis {
    matrix: SquareMatrix,
    log_det: f64,
}

impl WeightedMahalanobis {
    pub fn new(n_features: usize) -> Self {
        Self {
            matrix: matrix::identity(n_features),
            log_det: 0.0,
        }
    }

    pub fn matrix(&self) -> &SquareMatrix {
        &self.matrix
    }

    pub fn difference(a: &[f64], b: &[f64]) -> Vec<f64> {
        a.iter().zip(b).map(|(x, y)| x - y).collect()
    }
}

impl Metric for WeightedMahalanobis {
    fn family(&self) -> MetricFamily {
        MetricFamily::Mahalanobis
    }

    fn n_features(&self) -> usize {
        matrix::dim(&self.matrix)
    }

    fn distortion(&self, x: &[f64], centroid: &[f64]) -> f64 {
        self.pair_distortion(x, centroid)
    }

    fn pair_distortion(&self, a: &[f64], b: &[f64]) -> f64 {
        let d = Self::difference(a, b);
        matrix::quadratic_form(&self.matrix, &d)
    }

    fn log_normalizer(&self) -> f64 {
        self.log_det
    }

    fn weights(&self) -> MetricWeights {
        MetricWeights::Full(self.matrix.clone())
    }

    fn set_weights(&mut self, weights: MetricWeights) -> Result<(), MetricError> {
        match weights {
            MetricWeights::Full(m) => {
                let n = self.n_features();
                if matrix::dim(&m) != n {
                    return Err(MetricError::DimensionMismatch {
                        expected: n,
                        got: matrix::dim(&m),
                    });
                }
                let Some(log_det) = matrix::log_determinant(&m) else {
                    return Err(MetricError::NotPositiveDefinite);
                };
                self.log_det = log_det;
                self.matrix = m;
                Ok(())
            }
            MetricWeights::Diagonal(_) => Err(MetricError::WrongWeightKind(self.family())),
        }
    }

    fn reset(&mut self) {
        self.matrix = matrix::identity(self.n_features());
        self.log_det = 0.0;
    }
}

// ---------------------------------------------------------------------------
// Weighted KL (I-divergence) / Jensen-Shannon
// ---------------------------------------------------------------------------

/// Weighted I-divergence for non-negative data:
/// `d(x, c) = Σ_j w_j (x_j ln(x_j / c_j) - x_j + c_j)`.
///
/// The symmetric form between two instances is the weighted
/// Jensen-Shannon divergence, which stays finite on zero coordinates.
#[derive(Debug, Clone)]
pub struct WeightedKl {
    weights: Vec<f64>,
}

impl WeightedKl {
    pub fn new(n_features: usize) -> Self {
        Self {
            weights: vec![1.0; n_features],
        }
    }

    pub fn diag(&self) -> &[f64] {
        &self.weights
    }

    /// Unweighted per-feature I-divergence terms of `x` against `c`
    pub fn divergence_components(x: &[f64], c: &[f64]) -> Vec<f64> {
        x.iter()
            .zip(c)
            .map(|(&xv, &cv)| {
                let cv = cv.max(KL_FLOOR);
                if xv > 0.0 {
                    xv * (xv / cv).ln() - xv + cv
                } else {
                    cv
                }
            })
            .collect()
    }

    /// Unweighted per-feature Jensen-Shannon terms
    pub fn js_components(a: &[f64], b: &[f64]) -> Vec<f64> {
        a.iter()
            .zip(b)
            .map(|(&av, &bv)| {
                let m = 0.5 * (av + bv);
                if m <= 0.0 {
                    return 0.0;
                }
                let ta = if av > 0.0 { av * (av / m).ln() } else { 0.0 };
                let tb = if bv > 0.0 { bv * (bv / m).ln() } else { 0.0 };
                0.5 * (ta + tb)
            })
            .collect()
    }

    fn weighted(&self, components: Vec<f64>) -> f64 {
        components.iter().zip(&self.weights).map(|(c, w)| c * w).sum()
    }
}

impl Metric for WeightedKl {
    fn family(&self) -> MetricFamily {
        MetricFamily::Kl
    }

    fn n_features(&self) -> usize {
        self.weights.len()
    }

    fn distortion(&self, x: &[f64], centroid: &[f64]) -> f64 {
        self.weighted(Self::divergence_components(x, centroid))
    }

    fn pair_distortion(&self, a: &[f64], b: &[f64]) -> f64 {
        self.weighted(Self::js_components(a, b))
    }

    /// JS divergence itself, not its square root
    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        self.pair_distortion(a, b)
    }

    fn log_normalizer(&self) -> f64 {
        self.weights.iter().map(|w| w.ln()).sum()
    }

    fn weights(&self) -> MetricWeights {
        MetricWeights::Diagonal(self.weights.clone())
    }

    fn set_weights(&mut self, weights: MetricWeights) -> Result<(), MetricError> {
        match weights {
            MetricWeights::Diagonal(w) => {
                validate_diagonal(self.weights.len(), &w)?;
                self.weights = w;
                Ok(())
            }
            MetricWeights::Full(_) => Err(MetricError::WrongWeightKind(self.family())),
        }
    }

    fn reset(&mut self) {
        self.weights.iter_mut().for_each(|w| *w = 1.0);
    }
}

// ---------------------------------------------------------------------------
// Weighted dot product
// ---------------------------------------------------------------------------

/// Similarity `s(a, b) = Σ_j w_j a_j b_j`, distortion `1 - s`.
/// Meant for unit-normalized data and centroids.
#[derive(Debug, Clone)]
pub struct WeightedDotProduct {
    weights: Vec<f64>,
}

impl WeightedDotProduct {
    pub fn new(n_features: usize) -> Self {
        Self {
            weights: vec![1.0; n_features],
        }
    }
}

impl Metric for WeightedDotProduct {
    fn family(&self) -> MetricFamily {
        MetricFamily::DotProduct
    }

    fn n_features(&self) -> usize {
        self.weights.len()
    }

    fn distortion(&self, x: &[f64], centroid: &[f64]) -> f64 {
        1.0 - self.similarity(x, centroid)
    }

    fn pair_distortion(&self, a: &[f64], b: &[f64]) -> f64 {
        1.0 - self.similarity(a, b)
    }

    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        self.pair_distortion(a, b)
    }

    fn similarity(&self, a: &[f64], b: &[f64]) -> f64 {
        a.iter()
            .zip(b)
            .zip(&self.weights)
            .map(|((x, y), w)| w * x * y)
            .sum()
    }

    fn log_normalizer(&self) -> f64 {
        self.weights.iter().map(|w| w.ln()).sum()
    }

    fn weights(&self) -> MetricWeights {
        MetricWeights::Diagonal(self.weights.clone())
    }

    fn set_weights(&mut self, weights: MetricWeights) -> Result<(), MetricError> {
        match weights {
            MetricWeights::Diagonal(w) => {
                validate_diagonal(self.weights.len(), &w)?;
                self.weights = w;
                Ok(())
            }
            MetricWeights::Full(_) => Err(MetricError::WrongWeightKind(self.family())),
        }
    }

    fn reset(&mut self) {
        self.weights.iter_mut().for_each(|w| *w = 1.0);
    }
}

// ---------------------------------------------------------------------------
// Closed set of families
// ---------------------------------------------------------------------------

/// One metric instance of any supported family. Learners match on the
/// variant to reach family-specific decompositions.
#[derive(Debug, Clone)]
pub enum LearnableMetric {
    Euclidean(WeightedEuclidean),
    Mahalanobis(WeightedMahalanobis),
    Kl(WeightedKl),
    DotProduct(WeightedDotProduct),
}

impl LearnableMetric {
    pub fn new(family: MetricFamily, n_features: usize) -> Self {
        match family {
            MetricFamily::Euclidean => Self::Euclidean(WeightedEuclidean::new(n_features)),
            MetricFamily::Mahalanobis => Self::Mahalanobis(WeightedMahalanobis::new(n_features)),
            MetricFamily::Kl => Self::Kl(WeightedKl::new(n_features)),
            MetricFamily::DotProduct => Self::DotProduct(WeightedDotProduct::new(n_features)),
        }
    }

    fn inner(&self) -> &dyn Metric {
        match self {
            Self::Euclidean(m) => m,
            Self::Mahalanobis(m) => m,
            Self::Kl(m) => m,
            Self::DotProduct(m) => m,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Metric {
        match self {
            Self::Euclidean(m) => m,
            Self::Mahalanobis(m) => m,
            Self::Kl(m) => m,
            Self::DotProduct(m) => m,
        }
    }

    /// Per-feature weights for diagonal families
    pub fn diagonal(&self) -> Option<&[f64]> {
        match self {
            Self::Euclidean(m) => Some(m.diag()),
            Self::Kl(m) => Some(m.diag()),
            Self::DotProduct(m) => Some(&m.weights),
            Self::Mahalanobis(_) => None,
        }
    }

    /// Inverse-weight prior `-Σ 1/w` over the diagonal weights, the matrix
    /// diagonal for Mahalanobis. Non-positive entries contribute nothing.
    /// Larger is better: the objective subtracts it.
    pub fn regularizer(&self) -> f64 {
        match self {
            Self::Mahalanobis(m) => inverse_weight_prior(&matrix::diagonal(m.matrix())),
            _ => self.diagonal().map_or(0.0, inverse_weight_prior),
        }
    }

    /// `∂ regularizer / ∂ w_j = 1 / w_j²` for diagonal families.
    pub fn regularizer_gradient(&self) -> Option<Vec<f64>> {
        self.diagonal().map(|w| {
            w.iter()
                .map(|v| if *v > 0.0 { 1.0 / (v * v) } else { 0.0 })
                .collect()
        })
    }

    /// Unweighted per-feature terms of the distortion of `x` against a
    /// centroid, for diagonal learnable families.
    pub fn distortion_components(&self, x: &[f64], centroid: &[f64]) -> Option<Vec<f64>> {
        match self {
            Self::Euclidean(_) => Some(WeightedEuclidean::components(x, centroid)),
            Self::Kl(_) => Some(WeightedKl::divergence_components(x, centroid)),
            _ => None,
        }
    }

    /// Unweighted per-feature terms of the symmetric pair distortion.
    pub fn pair_components(&self, a: &[f64], b: &[f64]) -> Option<Vec<f64>> {
        match self {
            Self::Euclidean(_) => Some(WeightedEuclidean::components(a, b)),
            Self::Kl(_) => Some(WeightedKl::js_components(a, b)),
            _ => None,
        }
    }
}

fn inverse_weight_prior(w: &[f64]) -> f64 {
    -w.iter().filter(|v| **v > 0.0).map(|v| 1.0 / v).sum::<f64>()
}

impl Metric for LearnableMetric {
    fn family(&self) -> MetricFamily {
        self.inner().family()
    }

    fn n_features(&self) -> usize {
        self.inner().n_features()
    }

    #[inline]
    fn distortion(&self, x: &[f64], centroid: &[f64]) -> f64 {
        self.inner().distortion(x, centroid)
    }

    #[inline]
    fn pair_distortion(&self, a: &[f64], b: &[f64]) -> f64 {
        self.inner().pair_distortion(a, b)
    }

    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        self.inner().distance(a, b)
    }

    fn similarity(&self, a: &[f64], b: &[f64]) -> f64 {
        self.inner().similarity(a, b)
    }

    fn log_normalizer(&self) -> f64 {
        self.inner().log_normalizer()
    }

    fn weights(&self) -> MetricWeights {
        self.inner().weights()
    }

    fn set_weights(&mut self, weights: MetricWeights) -> Result<(), MetricError> {
        self.inner_mut().set_weights(weights)
    }

    fn reset(&mut self) {
        self.inner_mut().reset()
    }
}

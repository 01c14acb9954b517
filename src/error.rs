//! Error types for a clustering run.
//!
//! Only configuration, data and LP-solver failures surface here. Numerical
//! degeneracies inside a run (singular matrices, empty clusters, rounding
//! leftovers) are recovered where they occur and reported through logs and
//! [`crate::learner::TrainOutcome`].

use mpck_core::constraints::ConstraintError;
use mpck_core::metric::MetricError;

#[derive(Debug, Clone, PartialEq)]
pub enum ClusteringError {
    /// Invalid k, unsupported family pairing, bad parameter or constraint
    Configuration(String),
    /// Empty dataset, ragged rows, non-finite values or weights
    InvalidData(String),
    /// The external LP solver failed or returned an unusable solution
    Solver(String),
    Metric(MetricError),
}

impl std::fmt::Display for ClusteringError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusteringError::Configuration(e) => write!(f, "Configuration error: {}", e),
            ClusteringError::InvalidData(e) => write!(f, "Invalid data: {}", e),
            ClusteringError::Solver(e) => write!(f, "LP solver failure: {}", e),
            ClusteringError::Metric(e) => write!(f, "Metric error: {}", e),
        }
    }
}

impl std::error::Error for ClusteringError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClusteringError::Metric(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MetricError> for ClusteringError {
    fn from(e: MetricError) -> Self {
        ClusteringError::Metric(e)
    }
}

impl From<ConstraintError> for ClusteringError {
    fn from(e: ConstraintError) -> Self {
        ClusteringError::Configuration(e.to_string())
    }
}

pub type ClusteringResult<T> = Result<T, ClusteringError>;

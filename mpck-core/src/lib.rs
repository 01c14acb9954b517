// mpck-core/src/lib.rs
//! Building blocks for constrained, metric-learning k-means.
//!
//! - [`constraints`]: canonical must-link / cannot-link storage
//! - [`components`]: must-link graph and its connected components
//! - [`metric`]: learnable distortion measures
//! - [`matrix`]: dense square-matrix helpers backing the Mahalanobis family
//!
//! Nothing here owns run state; the clustering driver lives in the
//! `mpckmeans` crate.

pub mod components;
pub mod constraints;
pub mod matrix;
pub mod metric;

pub use components::{MustLinkGraph, Neighborhood, must_link_neighborhoods};
pub use constraints::{Constraint, ConstraintError, ConstraintStore, Insertion, LinkType};
pub use metric::{
    LearnableMetric, Metric, MetricError, MetricFamily, MetricWeights, WeightedDotProduct,
    WeightedEuclidean, WeightedKl, WeightedMahalanobis,
};

#[cfg(test)]
mod tests;

#[cfg(test)]
pub(crate) fn init() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let env = env_logger::Env::default().default_filter_or("debug");
        let _ = env_logger::Builder::from_env(env).is_test(true).try_init();
    });
}

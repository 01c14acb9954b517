//! Run configuration and builder.
//!
//! `MpckConfig` is the serialisable parameter set of a run; `MpckMeansBuilder`
//! wraps it with chained `with_*` setters and owns the pieces that are not
//! plain data (the constraint store and the optional LP solver).
//!
//! Learner / metric pairings accepted by `validate`:
//! - `ClosedForm`: Euclidean, Mahalanobis
//! - `GradientDescent`: Euclidean, Kl
//! - `None`: any family
//!
//! The dot-product family is similarity-based and never learnable, and the
//! LP assigner only accepts distance-based families.

use std::fmt;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use mpck_core::constraints::{ConstraintStore, LinkType};
use mpck_core::metric::MetricFamily;

use crate::clustering::MpckMeans;
use crate::core::Dataset;
use crate::error::{ClusteringError, ClusteringResult};
use crate::lp::LpSolver;

/// Metric-learning strategy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum LearnerKind {
    /// Keep the metric fixed (PCK-Means)
    None,
    /// Closed-form update: diagonal for Euclidean, full matrix for Mahalanobis
    #[default]
    ClosedForm,
    /// One gradient step per call with a decaying step size
    GradientDescent {
        eta: f64,
        eta_decay: f64,
        min_weight: f64,
    },
}

impl LearnerKind {
    /// Gradient descent with step 0.001, decay 0.9, weight floor 1e-5.
    pub fn gradient_descent() -> Self {
        LearnerKind::GradientDescent {
            eta: 1e-3,
            eta_decay: 0.9,
            min_weight: 1e-5,
        }
    }

    pub fn is_learnable(&self) -> bool {
        !matches!(self, LearnerKind::None)
    }

    fn supports(&self, family: MetricFamily) -> bool {
        match self {
            LearnerKind::None => true,
            LearnerKind::ClosedForm => {
                matches!(family, MetricFamily::Euclidean | MetricFamily::Mahalanobis)
            }
            LearnerKind::GradientDescent { .. } => {
                matches!(family, MetricFamily::Euclidean | MetricFamily::Kl)
            }
        }
    }
}

impl fmt::Display for LearnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LearnerKind::None => write!(f, "none"),
            LearnerKind::ClosedForm => write!(f, "closed-form"),
            LearnerKind::GradientDescent { eta, eta_decay, .. } => {
                write!(f, "gradient-descent(eta={}, decay={})", eta, eta_decay)
            }
        }
    }
}

/// E-step strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AssignerKind {
    #[default]
    Simple,
    Random,
    Sorted,
    Lp,
}

impl fmt::Display for AssignerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssignerKind::Simple => "simple",
            AssignerKind::Random => "random",
            AssignerKind::Sorted => "sorted",
            AssignerKind::Lp => "lp-relaxation",
        };
        write!(f, "{}", name)
    }
}

/// Cost charged for a violated pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ViolationPenalty {
    /// The pair's weight
    #[default]
    Constant,
    /// Must-link: weight times the pair distortion.
    /// Cannot-link: weight times (max cannot-link distortion - pair distortion).
    MetricScaled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MpckConfig {
    pub num_clusters: usize,
    pub metric: MetricFamily,
    pub learner: LearnerKind,
    pub assigner: AssignerKind,
    /// One metric per cluster instead of one global metric
    pub multiple_metrics: bool,
    pub must_link_weight: f64,
    pub cannot_link_weight: f64,
    pub violation_penalty: ViolationPenalty,
    /// Coefficient of the log-normalizer term
    pub log_term_weight: f64,
    /// Add the inverse-weight prior `-Σ 1/w` of every metric to the objective
    /// and to the learners
    pub regularize: bool,
    pub regularizer_weight: f64,
    pub use_transitive_closure: bool,
    /// Whether must-link neighborhoods seed clusters
    pub seedable: bool,
    /// Range of the multiplicative perturbation, `(1 + p (u - 0.5))`
    pub perturbation: f64,
    pub max_iterations: usize,
    pub convergence_epsilon: f64,
    /// Repeat E-step passes until no change, at most this many passes
    pub stabilize_passes: Option<usize>,
    pub reseed_empty_clusters: bool,
    pub lp_rounding_passes: usize,
    pub seed: u64,
}

impl Default for MpckConfig {
    fn default() -> Self {
        Self {
            num_clusters: 2,
            metric: MetricFamily::Euclidean,
            learner: LearnerKind::ClosedForm,
            assigner: AssignerKind::Simple,
            multiple_metrics: false,
            must_link_weight: 1.0,
            cannot_link_weight: 1.0,
            violation_penalty: ViolationPenalty::Constant,
            log_term_weight: 1.0,
            regularize: false,
            regularizer_weight: 0.001,
            use_transitive_closure: true,
            seedable: true,
            perturbation: 0.7,
            max_iterations: 100,
            convergence_epsilon: 1e-5,
            stabilize_passes: None,
            reseed_empty_clusters: true,
            lp_rounding_passes: 5000,
            seed: 42,
        }
    }
}

impl MpckConfig {
    /// Constraints and metric learning (the default)
    pub fn mpck() -> Self {
        Self::default()
    }

    /// Constraints with a fixed metric
    pub fn pck() -> Self {
        Self {
            learner: LearnerKind::None,
            ..Self::default()
        }
    }

    /// Metric learning with one metric per cluster
    pub fn mpck_multiple_metrics() -> Self {
        Self {
            multiple_metrics: true,
            ..Self::default()
        }
    }

    /// Coefficient of the weight prior, zero when regularization is off.
    pub fn effective_regularizer_weight(&self) -> f64 {
        if self.regularize { self.regularizer_weight } else { 0.0 }
    }

    /// Dataset-independent checks.
    pub fn validate(&self) -> ClusteringResult<()> {
        if self.num_clusters == 0 {
            return Err(ClusteringError::Configuration(
                "num_clusters must be at least 1".to_string(),
            ));
        }
        if !self.learner.supports(self.metric) {
            return Err(ClusteringError::Configuration(format!(
                "learner {} does not support metric {}",
                self.learner, self.metric
            )));
        }
        if self.assigner == AssignerKind::Lp && !self.metric.is_distance_based() {
            return Err(ClusteringError::Configuration(format!(
                "assigner {} requires a distance-based metric, got {}",
                self.assigner, self.metric
            )));
        }

        let non_negative = [
            ("must_link_weight", self.must_link_weight),
            ("cannot_link_weight", self.cannot_link_weight),
            ("log_term_weight", self.log_term_weight),
            ("regularizer_weight", self.regularizer_weight),
            ("convergence_epsilon", self.convergence_epsilon),
        ];
        for (name, v) in non_negative {
            if !v.is_finite() || v < 0.0 {
                return Err(ClusteringError::Configuration(format!(
                    "{} must be finite and >= 0, got {}",
                    name, v
                )));
            }
        }
        if !self.perturbation.is_finite() || !(0.0..2.0).contains(&self.perturbation) {
            return Err(ClusteringError::Configuration(format!(
                "perturbation must be in [0, 2), got {}",
                self.perturbation
            )));
        }
        if self.max_iterations == 0 {
            return Err(ClusteringError::Configuration(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if self.stabilize_passes == Some(0) {
            return Err(ClusteringError::Configuration(
                "stabilize_passes must be at least 1 when set".to_string(),
            ));
        }
        if let LearnerKind::GradientDescent {
            eta,
            eta_decay,
            min_weight,
        } = self.learner
        {
            if !(eta.is_finite() && eta > 0.0) {
                return Err(ClusteringError::Configuration(format!(
                    "eta must be > 0, got {}",
                    eta
                )));
            }
            if !(eta_decay > 0.0 && eta_decay <= 1.0) {
                return Err(ClusteringError::Configuration(format!(
                    "eta_decay must be in (0, 1], got {}",
                    eta_decay
                )));
            }
            if !(min_weight.is_finite() && min_weight > 0.0) {
                return Err(ClusteringError::Configuration(format!(
                    "min_weight must be > 0, got {}",
                    min_weight
                )));
            }
        }
        if self.regularize && !self.learner.is_learnable() {
            warn!("regularize is set but learner {} keeps the metric fixed", self.learner);
        }
        if self.learner.is_learnable() && self.log_term_weight == 0.0 && !self.regularize {
            warn!("log_term_weight is 0: metric learning has no regularizer and may collapse");
        }
        Ok(())
    }

    /// Checks that need the data: k against n, non-negative data for KL.
    pub fn validate_for(&self, dataset: &Dataset) -> ClusteringResult<()> {
        self.validate()?;
        if self.num_clusters > dataset.n_instances() {
            return Err(ClusteringError::Configuration(format!(
                "num_clusters {} exceeds number of instances {}",
                self.num_clusters,
                dataset.n_instances()
            )));
        }
        if self.metric == MetricFamily::Kl && dataset.has_negative_values() {
            return Err(ClusteringError::Configuration(
                "metric weighted-kl requires non-negative features".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`MpckMeans`].
pub struct MpckMeansBuilder {
    config: MpckConfig,
    constraints: Vec<(usize, usize, LinkType, Option<f64>)>,
    solver: Option<Box<dyn LpSolver>>,
}

impl Default for MpckMeansBuilder {
    fn default() -> Self {
        debug!("Creating MpckMeansBuilder with default parameters");
        Self {
            config: MpckConfig::default(),
            constraints: Vec::new(),
            solver: None,
        }
    }
}

impl MpckMeansBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: MpckConfig) -> Self {
        info!("Using provided configuration: {:?}", config);
        self.config = config;
        self
    }

    pub fn config(&self) -> &MpckConfig {
        &self.config
    }

    pub fn with_num_clusters(mut self, k: usize) -> Self {
        info!("Setting num_clusters: {}", k);
        self.config.num_clusters = k;
        self
    }

    pub fn with_metric(mut self, metric: MetricFamily) -> Self {
        info!("Setting metric: {}", metric);
        self.config.metric = metric;
        self
    }

    pub fn with_learner(mut self, learner: LearnerKind) -> Self {
        info!("Setting learner: {}", learner);
        self.config.learner = learner;
        self
    }

    pub fn with_assigner(mut self, assigner: AssignerKind) -> Self {
        info!("Setting assigner: {}", assigner);
        self.config.assigner = assigner;
        self
    }

    pub fn with_multiple_metrics(mut self, multiple: bool) -> Self {
        self.config.multiple_metrics = multiple;
        self
    }

    /// Default violation weights for must-link and cannot-link pairs.
    pub fn with_link_weights(mut self, must_link: f64, cannot_link: f64) -> Self {
        info!(
            "Setting link weights: must-link={}, cannot-link={}",
            must_link, cannot_link
        );
        self.config.must_link_weight = must_link;
        self.config.cannot_link_weight = cannot_link;
        self
    }

    pub fn with_violation_penalty(mut self, penalty: ViolationPenalty) -> Self {
        self.config.violation_penalty = penalty;
        self
    }

    pub fn with_log_term_weight(mut self, weight: f64) -> Self {
        self.config.log_term_weight = weight;
        self
    }

    /// Turn on the inverse-weight prior with coefficient `weight`.
    pub fn with_regularizer(mut self, weight: f64) -> Self {
        info!("Setting weight regularizer: {}", weight);
        self.config.regularize = true;
        self.config.regularizer_weight = weight;
        self
    }

    pub fn with_transitive_closure(mut self, enable: bool) -> Self {
        self.config.use_transitive_closure = enable;
        self
    }

    pub fn with_seeding(mut self, seedable: bool) -> Self {
        self.config.seedable = seedable;
        self
    }

    pub fn with_perturbation(mut self, range: f64) -> Self {
        self.config.perturbation = range;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    pub fn with_convergence_epsilon(mut self, eps: f64) -> Self {
        self.config.convergence_epsilon = eps;
        self
    }

    /// Repeat E-step passes until a pass moves nothing, capped at `passes`.
    pub fn with_stabilization(mut self, passes: Option<usize>) -> Self {
        self.config.stabilize_passes = passes;
        self
    }

    pub fn with_reseed_empty_clusters(mut self, reseed: bool) -> Self {
        self.config.reseed_empty_clusters = reseed;
        self
    }

    pub fn with_lp_rounding_passes(mut self, passes: usize) -> Self {
        self.config.lp_rounding_passes = passes;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        info!("Setting custom seed: {}", seed);
        self.config.seed = seed;
        self
    }

    /// Constraint with the configured default weight for its type.
    pub fn with_constraint(mut self, i: usize, j: usize, link: LinkType) -> Self {
        self.constraints.push((i, j, link, None));
        self
    }

    /// Constraint with an explicit violation weight.
    pub fn with_weighted_constraint(mut self, i: usize, j: usize, link: LinkType, weight: f64) -> Self {
        self.constraints.push((i, j, link, Some(weight)));
        self
    }

    /// External LP solver, required by `AssignerKind::Lp`.
    pub fn with_lp_solver(mut self, solver: Box<dyn LpSolver>) -> Self {
        self.solver = Some(solver);
        self
    }

    /// Validate against `dataset` and create a run in its initial state.
    pub fn build(self, dataset: Dataset) -> ClusteringResult<MpckMeans> {
        self.config.validate_for(&dataset)?;

        let mut store = ConstraintStore::with_default_weights(
            self.config.must_link_weight,
            self.config.cannot_link_weight,
        );
        for (i, j, link, weight) in self.constraints {
            match weight {
                Some(w) => store.add_weighted(i, j, link, w)?,
                None => store.add(i, j, link)?,
            };
        }
        let n = dataset.n_instances();
        if let Some(max) = store.max_index().filter(|max| *max >= n) {
            return Err(ClusteringError::Configuration(format!(
                "a constraint references instance {}, outside 0..{}",
                max, n
            )));
        }

        info!(
            "Building MPCK-Means: k={}, metric={}, learner={}, assigner={}, {} constraints",
            self.config.num_clusters,
            self.config.metric,
            self.config.learner,
            self.config.assigner,
            store.len()
        );
        MpckMeans::new(dataset, store, self.config, self.solver)
    }
}

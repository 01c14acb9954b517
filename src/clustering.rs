//! Run context and the alternating-optimization driver.
//!
//! `RunContext` owns every piece of mutable run state (instances,
//! constraints, assignment array, centroids, metrics, cannot-link bounds and
//! the RNG) and is borrowed by one phase at a time. `MpckMeans` drives it
//! through the state machine
//!
//! ```text
//! Init -> Assign <-> LearnMetric -> Converged | MaxIterReached
//! ```
//!
//! One iteration is: E-step passes, centroid recomputation, metric learning
//! (per cluster in parallel, or one global call), cannot-link bound refresh,
//! then a full objective recomputation.
//!
//! Objective:
//! `Σ_i [d_{c_i}(x_i, μ_{c_i}) - λ log|A_{c_i}|] + Σ_{violated pairs} cost`
//! where every violated pair is charged once. With `regularize` set, `ρ`
//! times the weight prior of every metric is subtracted as well.
//!
//! **DETERMINISTIC**: all random draws go through one `ChaCha8Rng` seeded
//! from the configuration.

use log::{debug, info, trace, warn};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use mpck_core::constraints::{Constraint, ConstraintStore, Insertion, LinkType};
use mpck_core::metric::{LearnableMetric, Metric, MetricWeights};

use crate::assigner::Assigner;
use crate::builder::{MpckConfig, ViolationPenalty};
use crate::core::{Dataset, normalize_unit};
use crate::error::{ClusteringError, ClusteringResult};
use crate::initializer::{self, Initialization};
use crate::learner::{LearningView, MetricLearner, TrainOutcome};
use crate::lp::LpSolver;

/// Per-metric bounding box of the data and the distortion between its
/// corners, the largest cannot-link distortion the metric can observe.
#[derive(Debug, Clone, PartialEq)]
pub struct ClBounds {
    pub lo: Vec<f64>,
    pub hi: Vec<f64>,
    pub max_distortion: f64,
}

/// Mutable state of one run.
#[derive(Debug)]
pub struct RunContext {
    pub(crate) dataset: Dataset,
    pub(crate) constraints: ConstraintStore,
    pub(crate) assignments: Vec<Option<usize>>,
    pub(crate) centroids: Vec<Vec<f64>>,
    /// One global metric, or one per cluster
    pub(crate) metrics: Vec<LearnableMetric>,
    pub(crate) bounds: Vec<ClBounds>,
    pub(crate) rng: ChaCha8Rng,
    pub(crate) config: MpckConfig,
}

impl RunContext {
    pub(crate) fn new(dataset: Dataset, constraints: ConstraintStore, config: MpckConfig) -> Self {
        let n = dataset.n_instances();
        let f = dataset.n_features();
        Self {
            assignments: vec![None; n],
            centroids: Vec::new(),
            metrics: vec![LearnableMetric::new(config.metric, f)],
            bounds: Vec::new(),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            dataset,
            constraints,
            config,
        }
    }

    #[inline]
    pub fn k(&self) -> usize {
        self.config.num_clusters
    }

    #[inline]
    pub fn n_instances(&self) -> usize {
        self.dataset.n_instances()
    }

    #[inline]
    fn metric_index(&self, cluster: usize) -> usize {
        if self.metrics.len() > 1 { cluster } else { 0 }
    }

    #[inline]
    pub fn metric_for(&self, cluster: usize) -> &LearnableMetric {
        &self.metrics[self.metric_index(cluster)]
    }

    /// Distortion of instance `i` to centroid `c`.
    #[inline]
    pub fn distortion(&self, i: usize, c: usize) -> f64 {
        self.metric_for(c)
            .distortion(self.dataset.row(i), &self.centroids[c])
    }

    /// `λ log|A_c|`, subtracted once per instance assigned to `c`.
    #[inline]
    pub fn log_term(&self, c: usize) -> f64 {
        self.config.log_term_weight * self.metric_for(c).log_normalizer()
    }

    pub(crate) fn max_cl(&self, c: usize) -> f64 {
        self.bounds
            .get(self.metric_index(c))
            .map_or(0.0, |b| b.max_distortion)
    }

    /// Cost of `constraint` when its endpoints sit in `c_first` and
    /// `c_second`. Zero when the constraint is satisfied.
    pub fn pair_cost(&self, constraint: &Constraint, c_first: usize, c_second: usize) -> f64 {
        if !constraint.is_violated(Some(c_first), Some(c_second)) {
            return 0.0;
        }
        match self.config.violation_penalty {
            ViolationPenalty::Constant => constraint.weight,
            ViolationPenalty::MetricScaled => {
                let a = self.dataset.row(constraint.first);
                let b = self.dataset.row(constraint.second);
                match constraint.link {
                    LinkType::MustLink => {
                        let d1 = self.metric_for(c_first).pair_distortion(a, b);
                        let d2 = self.metric_for(c_second).pair_distortion(a, b);
                        0.5 * constraint.weight * (d1 + d2)
                    }
                    LinkType::CannotLink => {
                        let d = self.metric_for(c_first).pair_distortion(a, b);
                        constraint.weight * (self.max_cl(c_first) - d).max(0.0)
                    }
                }
            }
        }
    }

    /// Assignment penalty of instance `i` in cluster `c` against the current
    /// assignment of every constrained partner.
    pub fn penalty(&self, i: usize, c: usize) -> f64 {
        let mut penalty = self.distortion(i, c) - self.log_term(c);
        for con in self.constraints.constraints_of(i) {
            let other = con.other(i);
            let Some(c_other) = self.assignments.get(other).copied().flatten() else {
                continue;
            };
            let (c_first, c_second) = if con.first == i {
                (c, c_other)
            } else {
                (c_other, c)
            };
            penalty += self.pair_cost(con, c_first, c_second);
        }
        penalty
    }

    /// Lowest-penalty cluster for `i`; ties go to the lowest index.
    pub fn best_cluster(&self, i: usize) -> usize {
        let mut best = 0;
        let mut best_penalty = f64::INFINITY;
        for c in 0..self.k() {
            let p = self.penalty(i, c);
            if p < best_penalty {
                best_penalty = p;
                best = c;
            }
        }
        trace!("instance {} -> cluster {} (penalty {:.6})", i, best, best_penalty);
        best
    }

    /// Nearest centroid by distortion alone.
    pub fn nearest_centroid(&self, i: usize) -> (usize, f64) {
        let mut best = (0, f64::INFINITY);
        for c in 0..self.k() {
            let d = self.distortion(i, c);
            if d < best.1 {
                best = (c, d);
            }
        }
        best
    }

    /// Objective of `assignments` under the current centroids and metrics.
    pub fn objective_of(&self, assignments: &[Option<usize>]) -> f64 {
        let mut objective = 0.0;
        for (i, a) in assignments.iter().enumerate() {
            if let Some(c) = *a {
                objective += self
                    .metric_for(c)
                    .distortion(self.dataset.row(i), &self.centroids[c])
                    - self.log_term(c);
            }
        }
        for con in self.constraints.iter() {
            if let (Some(Some(a)), Some(Some(b))) =
                (assignments.get(con.first), assignments.get(con.second))
            {
                objective += self.pair_cost(con, *a, *b);
            }
        }
        let rho = self.config.effective_regularizer_weight();
        if rho > 0.0 {
            objective -= rho * self.metrics.iter().map(LearnableMetric::regularizer).sum::<f64>();
        }
        objective
    }

    pub fn violation_report(&self, assignments: &[Option<usize>]) -> ViolationReport {
        let mut report = ViolationReport {
            n_must_link: self.constraints.count(LinkType::MustLink),
            n_cannot_link: self.constraints.count(LinkType::CannotLink),
            ..ViolationReport::default()
        };
        for con in self.constraints.iter() {
            let a = assignments.get(con.first).copied().flatten();
            let b = assignments.get(con.second).copied().flatten();
            if !con.is_violated(a, b) {
                continue;
            }
            match con.link {
                LinkType::MustLink => report.must_link.push(con.pair()),
                LinkType::CannotLink => report.cannot_link.push(con.pair()),
            }
            if let (Some(a), Some(b)) = (a, b) {
                report.cost += self.pair_cost(con, a, b);
            }
        }
        report
    }

    fn members(&self, c: usize) -> Vec<usize> {
        self.assignments
            .iter()
            .enumerate()
            .filter_map(|(i, a)| (*a == Some(c)).then_some(i))
            .collect()
    }

    /// Recompute every centroid from the current assignment.
    ///
    /// An empty cluster either keeps its previous centroid or, with
    /// `reseed_empty_clusters`, takes over the instance that fits its own
    /// cluster worst. Returns the number of reseeded clusters.
    pub fn recompute_centroids(&mut self) -> usize {
        let distance_based = self.metrics[0].is_distance_based();
        let k = self.k();
        let mut empty = Vec::new();

        for c in 0..k {
            match self.dataset.aggregate(self.members(c), distance_based) {
                Some(centroid) => self.centroids[c] = centroid,
                None => empty.push(c),
            }
        }

        if empty.is_empty() {
            return 0;
        }
        if !self.config.reseed_empty_clusters {
            warn!("{} empty cluster(s) keep their previous centroid", empty.len());
            return 0;
        }

        let mut reseeded = 0;
        for c in empty {
            let mut sizes = vec![0usize; k];
            for a in self.assignments.iter().flatten() {
                sizes[*a] += 1;
            }
            let donor = (0..self.n_instances())
                .filter_map(|i| self.assignments[i].map(|a| (i, a)))
                .filter(|&(_, a)| sizes[a] > 1)
                .map(|(i, a)| (i, a, self.distortion(i, a)))
                .fold(None, |best: Option<(usize, usize, f64)>, cand| match best {
                    Some(b) if b.2 >= cand.2 => Some(b),
                    _ => Some(cand),
                });

            let Some((i, from, d)) = donor else {
                warn!("cluster {} is empty and no instance can be moved into it", c);
                continue;
            };
            warn!(
                "cluster {} is empty: reseeding with instance {} (distortion {:.6} in cluster {})",
                c, i, d, from
            );
            self.assignments[i] = Some(c);
            let mut centroid = self.dataset.row(i).to_vec();
            if !distance_based {
                normalize_unit(&mut centroid);
            }
            self.centroids[c] = centroid;
            if let Some(updated) = self.dataset.aggregate(self.members(from), distance_based) {
                self.centroids[from] = updated;
            }
            reseeded += 1;
        }
        reseeded
    }

    /// Refresh the cannot-link bounds of every metric. Per-cluster boxes are
    /// used only with one metric per cluster and `per_cluster` set;
    /// otherwise the dataset-wide box.
    pub fn refresh_bounds(&mut self, per_cluster: bool) {
        let n = self.n_instances();
        let Some(global) = self.dataset.bounding_box(0..n) else {
            return;
        };
        let multiple = self.metrics.len() > 1;

        let bounds: Vec<ClBounds> = (0..self.metrics.len())
            .map(|m| {
                let (lo, hi) = if multiple && per_cluster {
                    self.dataset
                        .bounding_box(self.members(m))
                        .unwrap_or_else(|| global.clone())
                } else {
                    global.clone()
                };
                let max_distortion = self.metrics[m].pair_distortion(&lo, &hi);
                ClBounds {
                    lo,
                    hi,
                    max_distortion,
                }
            })
            .collect();

        trace!(
            "max cannot-link distortions: {:?}",
            bounds.iter().map(|b| b.max_distortion).collect::<Vec<_>>()
        );
        self.bounds = bounds;
    }
}

/// Constraints violated by an assignment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViolationReport {
    pub must_link: Vec<(usize, usize)>,
    pub cannot_link: Vec<(usize, usize)>,
    /// Total cost charged by the objective for these violations
    pub cost: f64,
    pub n_must_link: usize,
    pub n_cannot_link: usize,
}

impl ViolationReport {
    pub fn total(&self) -> usize {
        self.must_link.len() + self.cannot_link.len()
    }

    pub fn satisfied_must_links(&self) -> usize {
        self.n_must_link - self.must_link.len()
    }

    pub fn satisfied_cannot_links(&self) -> usize {
        self.n_cannot_link - self.cannot_link.len()
    }
}

/// One completed iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationRecord {
    pub iteration: usize,
    pub moved: usize,
    pub reseeded: usize,
    pub objective: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    Assign,
    LearnMetric,
    Converged,
    MaxIterReached,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Converged | RunState::MaxIterReached)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    Converged,
    MaxIterReached,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Termination {
    pub reason: TerminationReason,
    pub iterations: usize,
    pub objective: f64,
}

/// Constrained k-means with metric learning.
pub struct MpckMeans {
    ctx: RunContext,
    assigner: Assigner,
    learners: Vec<MetricLearner>,
    state: RunState,
    iteration: usize,
    last_moved: usize,
    last_reseeded: usize,
    objective: Option<f64>,
    history: Vec<IterationRecord>,
    initialization: Option<Initialization>,
}

impl MpckMeans {
    pub(crate) fn new(
        dataset: Dataset,
        constraints: ConstraintStore,
        config: MpckConfig,
        solver: Option<Box<dyn LpSolver>>,
    ) -> ClusteringResult<Self> {
        let assigner = Assigner::from_config(&config, solver)?;
        Ok(Self {
            ctx: RunContext::new(dataset, constraints, config),
            assigner,
            learners: Vec::new(),
            state: RunState::Init,
            iteration: 0,
            last_moved: 0,
            last_reseeded: 0,
            objective: None,
            history: Vec::new(),
            initialization: None,
        })
    }

    fn ensure_init(&self, op: &str) -> ClusteringResult<()> {
        if self.state != RunState::Init {
            return Err(ClusteringError::Configuration(format!(
                "{} is only allowed before the run starts (state {:?})",
                op, self.state
            )));
        }
        Ok(())
    }

    /// Change k before the run starts.
    pub fn set_num_clusters(&mut self, k: usize) -> ClusteringResult<()> {
        self.ensure_init("set_num_clusters")?;
        if k == 0 || k > self.ctx.n_instances() {
            return Err(ClusteringError::Configuration(format!(
                "num_clusters must be in 1..={}, got {}",
                self.ctx.n_instances(),
                k
            )));
        }
        info!("Setting num_clusters: {}", k);
        self.ctx.config.num_clusters = k;
        Ok(())
    }

    /// Add a constraint with the configured default weight.
    pub fn add_constraint(&mut self, i: usize, j: usize, link: LinkType) -> ClusteringResult<Insertion> {
        let weight = self.ctx.constraints.default_weight(link);
        self.add_weighted_constraint(i, j, link, weight)
    }

    pub fn add_weighted_constraint(
        &mut self,
        i: usize,
        j: usize,
        link: LinkType,
        weight: f64,
    ) -> ClusteringResult<Insertion> {
        self.ensure_init("add_constraint")?;
        let n = self.ctx.n_instances();
        if i >= n || j >= n {
            return Err(ClusteringError::Configuration(format!(
                "constraint ({}, {}) references an instance outside 0..{}",
                i, j, n
            )));
        }
        Ok(self.ctx.constraints.add_weighted(i, j, link, weight)?)
    }

    /// New default weights for constraints added later. Stored constraints
    /// keep their weight.
    pub fn set_link_weights(&mut self, must_link: f64, cannot_link: f64) -> ClusteringResult<()> {
        self.ensure_init("set_link_weights")?;
        for (name, w) in [("must_link_weight", must_link), ("cannot_link_weight", cannot_link)] {
            if !w.is_finite() || w < 0.0 {
                return Err(ClusteringError::Configuration(format!(
                    "{} must be finite and >= 0, got {}",
                    name, w
                )));
            }
        }
        info!(
            "Setting link weights: must-link={}, cannot-link={}",
            must_link, cannot_link
        );
        self.ctx.constraints.set_default_weights(must_link, cannot_link);
        self.ctx.config.must_link_weight = must_link;
        self.ctx.config.cannot_link_weight = cannot_link;
        Ok(())
    }

    /// Overwrite the metric used by `cluster` on a started run, e.g. to warm
    /// start it from another run. The next phase sees the new weights.
    pub fn set_metric_weights(&mut self, cluster: usize, weights: MetricWeights) -> ClusteringResult<()> {
        if self.state == RunState::Init {
            return Err(ClusteringError::Configuration(
                "set_metric_weights needs an initialized run".to_string(),
            ));
        }
        if cluster >= self.ctx.k() {
            return Err(ClusteringError::InvalidData(format!(
                "cluster {} out of range for k={}",
                cluster,
                self.ctx.k()
            )));
        }
        let m = self.ctx.metric_index(cluster);
        self.ctx.metrics[m].set_weights(weights)?;
        debug!("metric {} replaced for cluster {}", m, cluster);
        self.ctx.refresh_bounds(true);
        Ok(())
    }

    /// Advance by one phase and return the new state. Terminal states are
    /// returned unchanged.
    pub fn step(&mut self) -> ClusteringResult<RunState> {
        match self.state {
            RunState::Init => self.initialize(),
            RunState::Assign => self.assign()?,
            RunState::LearnMetric => self.learn_metric(),
            RunState::Converged | RunState::MaxIterReached => {}
        }
        Ok(self.state)
    }

    /// Run until convergence or the iteration cap.
    pub fn run(&mut self) -> ClusteringResult<Termination> {
        while !self.state.is_terminal() {
            self.step()?;
        }
        let reason = if self.state == RunState::Converged {
            TerminationReason::Converged
        } else {
            TerminationReason::MaxIterReached
        };
        Ok(Termination {
            reason,
            iterations: self.iteration,
            objective: self.objective.unwrap_or(f64::NAN),
        })
    }

    fn initialize(&mut self) {
        let cfg = &self.ctx.config;
        let k = cfg.num_clusters;
        let f = self.ctx.dataset.n_features();
        let n_metrics = if cfg.multiple_metrics { k } else { 1 };

        info!(
            "MPCK-Means start: N={}, F={}, k={}, {} metric(s) {}, learner {}, assigner {}",
            self.ctx.n_instances(),
            f,
            k,
            n_metrics,
            cfg.metric,
            cfg.learner,
            self.assigner
        );

        self.ctx.metrics = (0..n_metrics)
            .map(|_| LearnableMetric::new(cfg.metric, f))
            .collect();
        self.learners = (0..n_metrics)
            .map(|_| MetricLearner::from_kind(cfg.learner))
            .collect();
        self.ctx.rng = ChaCha8Rng::seed_from_u64(cfg.seed);

        let init = initializer::initialize(
            &self.ctx.dataset,
            &mut self.ctx.constraints,
            &self.ctx.metrics[0],
            &self.ctx.config,
            &mut self.ctx.rng,
        );
        self.ctx.centroids = init.centroids.clone();
        self.ctx.assignments = init.assignments.clone();
        self.ctx.refresh_bounds(false);

        self.initialization = Some(init);
        self.iteration = 0;
        self.objective = None;
        self.history.clear();
        self.state = RunState::Assign;
    }

    fn assign(&mut self) -> ClusteringResult<()> {
        let moved = self.assigner.assign(&mut self.ctx)?;
        let reseeded = self.ctx.recompute_centroids();
        debug!(
            "iteration {}: {} instance(s) moved, {} cluster(s) reseeded",
            self.iteration + 1,
            moved,
            reseeded
        );
        self.last_moved = moved;
        self.last_reseeded = reseeded;
        self.state = RunState::LearnMetric;
        Ok(())
    }

    fn learn_metric(&mut self) {
        let multiple = self.learners.len() > 1;
        let ctx = &mut self.ctx;
        let view = LearningView {
            dataset: &ctx.dataset,
            constraints: &ctx.constraints,
            assignments: &ctx.assignments,
            centroids: &ctx.centroids,
            bounds: &ctx.bounds,
            log_term_weight: ctx.config.log_term_weight,
            regularizer_weight: ctx.config.effective_regularizer_weight(),
        };

        let outcomes: Vec<TrainOutcome> = self
            .learners
            .par_iter_mut()
            .zip(ctx.metrics.par_iter_mut())
            .enumerate()
            .map(|(m, (learner, metric))| {
                let cluster = if multiple { Some(m) } else { None };
                learner.train(cluster, &view, metric)
            })
            .collect();
        trace!("metric learning outcomes: {:?}", outcomes);

        self.ctx.refresh_bounds(true);

        let objective = self.ctx.objective_of(&self.ctx.assignments);
        self.iteration += 1;
        self.history.push(IterationRecord {
            iteration: self.iteration,
            moved: self.last_moved,
            reseeded: self.last_reseeded,
            objective,
        });

        let delta = self.objective.map_or(f64::INFINITY, |prev| (prev - objective).abs());
        self.objective = Some(objective);

        if self.last_moved == 0 && self.last_reseeded == 0 {
            self.finish(RunState::Converged, "no instance moved");
        } else if delta < self.ctx.config.convergence_epsilon {
            self.finish(RunState::Converged, "objective change below epsilon");
        } else if self.iteration >= self.ctx.config.max_iterations {
            self.finish(RunState::MaxIterReached, "iteration cap reached");
        } else {
            debug!(
                "iteration {}: objective {:.6} (delta {:.3e}), sizes {:?}",
                self.iteration,
                objective,
                delta,
                self.cluster_sizes()
            );
            self.state = RunState::Assign;
        }
    }

    fn finish(&mut self, state: RunState, why: &str) {
        info!(
            "MPCK-Means {:?} after {} iteration(s) ({}): objective {:.6}, sizes {:?}",
            state,
            self.iteration,
            why,
            self.objective.unwrap_or(f64::NAN),
            self.cluster_sizes()
        );
        let report = self.violation_report();
        if report.total() > 0 {
            info!(
                "{} must-link and {} cannot-link constraint(s) violated",
                report.must_link.len(),
                report.cannot_link.len()
            );
        }
        self.state = state;
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Completed iterations
    pub fn iterations(&self) -> usize {
        self.iteration
    }

    pub fn config(&self) -> &MpckConfig {
        &self.ctx.config
    }

    pub fn dataset(&self) -> &Dataset {
        &self.ctx.dataset
    }

    pub fn constraints(&self) -> &ConstraintStore {
        &self.ctx.constraints
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn cluster_assignments(&self) -> &[Option<usize>] {
        &self.ctx.assignments
    }

    /// Assignments with `-1` for unassigned instances.
    pub fn cluster_labels(&self) -> Vec<isize> {
        self.ctx
            .assignments
            .iter()
            .map(|a| a.map_or(-1, |c| c as isize))
            .collect()
    }

    pub fn cluster_centroids(&self) -> &[Vec<f64>] {
        &self.ctx.centroids
    }

    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.ctx.k()];
        for c in self.ctx.assignments.iter().flatten() {
            sizes[*c] += 1;
        }
        sizes
    }

    /// Objective after the last completed iteration.
    pub fn objective_value(&self) -> Option<f64> {
        self.objective
    }

    /// The global metric, or the metric of cluster 0 with one metric per
    /// cluster.
    pub fn metric(&self) -> &LearnableMetric {
        &self.ctx.metrics[0]
    }

    pub fn metric_for_cluster(&self, cluster: usize) -> &LearnableMetric {
        self.ctx.metric_for(cluster)
    }

    pub fn metrics(&self) -> &[LearnableMetric] {
        &self.ctx.metrics
    }

    /// Current step size of each gradient-descent learner.
    pub fn learning_rates(&self) -> Vec<Option<f64>> {
        self.learners.iter().map(MetricLearner::eta).collect()
    }

    pub fn history(&self) -> &[IterationRecord] {
        &self.history
    }

    pub fn initialization(&self) -> Option<&Initialization> {
        self.initialization.as_ref()
    }

    /// Objective of an arbitrary assignment under the current centroids and
    /// metrics.
    pub fn objective_of(&self, assignments: &[Option<usize>]) -> ClusteringResult<f64> {
        if self.state == RunState::Init {
            return Err(ClusteringError::Configuration(
                "objective_of needs an initialized run".to_string(),
            ));
        }
        if assignments.len() != self.ctx.n_instances() {
            return Err(ClusteringError::InvalidData(format!(
                "{} assignments for {} instances",
                assignments.len(),
                self.ctx.n_instances()
            )));
        }
        if let Some(c) = assignments.iter().flatten().find(|c| **c >= self.ctx.k()) {
            return Err(ClusteringError::InvalidData(format!(
                "cluster {} out of range for k={}",
                c,
                self.ctx.k()
            )));
        }
        Ok(self.ctx.objective_of(assignments))
    }

    pub fn violation_report(&self) -> ViolationReport {
        self.ctx.violation_report(&self.ctx.assignments)
    }
}

//! M-step: metric learning from a frozen assignment.
//!
//! Every learner minimizes, over the instances it is responsible for,
//!
//! ```text
//! Σ_i d_A(x_i, μ_{c_i})
//!   + Σ_{violated ML} ½ w d_A(x_a, x_b)            (per endpoint)
//!   + Σ_{violated CL} ½ w (d_A(lo, hi) - d_A(x_a, x_b))  (per endpoint)
//!   - λ n log|A|
//!   + ρ Σ_j 1 / w_j                                 (diagonal, when regularizing)
//! ```
//!
//! where `lo`/`hi` are the corners of the metric's cannot-link bounding box.
//! - `ClosedForm`, diagonal: `w_j = λ n / s_j` with `s_j = deviation_j +
//!   constraint_j`, or the positive root of `s w² - λ n w - ρ = 0` with the
//!   prior. The old weight is kept when `s_j` is not positive.
//! - `ClosedForm`, full matrix: `A = λ (M / n)⁻¹` for the accumulated
//!   scatter `M`; a near-singular `M` is regularized with `0.01 tr(M) I`
//!   (up to 1000 times) and falls back to the identity.
//! - `GradientDescent`: one step `w - η (∇ - λ n / w - ρ / w²)`, non-positive results
//!   floored to `min_weight`, then `η *= decay`. `η` lives as long as the
//!   learner, i.e. one run.
//!
//! A learner with no instances to learn from leaves its metric unchanged.

use log::{debug, trace, warn};

use mpck_core::constraints::{Constraint, ConstraintStore, LinkType};
use mpck_core::matrix::{self, SquareMatrix};
use mpck_core::metric::{LearnableMetric, Metric, MetricWeights, WeightedMahalanobis};

use crate::builder::LearnerKind;
use crate::clustering::ClBounds;
use crate::core::Dataset;

const SINGULAR_EPS: f64 = 1e-5;
const MAX_REGULARIZATION_STEPS: usize = 1000;
const REGULARIZATION_FRACTION: f64 = 0.01;

/// Read-only snapshot shared by all learners of one M-step.
#[derive(Debug, Clone, Copy)]
pub struct LearningView<'a> {
    pub dataset: &'a Dataset,
    pub constraints: &'a ConstraintStore,
    pub assignments: &'a [Option<usize>],
    pub centroids: &'a [Vec<f64>],
    pub bounds: &'a [ClBounds],
    pub log_term_weight: f64,
    /// `ρ`; zero when regularization is off
    pub regularizer_weight: f64,
}

impl<'a> LearningView<'a> {
    /// Instances in `cluster`, or every assigned instance for `None`.
    pub fn members(&self, cluster: Option<usize>) -> Vec<usize> {
        self.assignments
            .iter()
            .enumerate()
            .filter_map(|(i, a)| match (a, cluster) {
                (Some(_), None) => Some(i),
                (Some(c), Some(want)) if *c == want => Some(i),
                _ => None,
            })
            .collect()
    }

    /// Violated constraints seen from each member: `(constraint, member,
    /// partner)`. A pair with both endpoints among `members` shows up twice.
    pub fn violations(&self, members: &[usize]) -> Vec<(&'a Constraint, usize, usize)> {
        let mut out = Vec::new();
        for &i in members {
            let ci = self.assignments[i];
            for con in self.constraints.constraints_of(i) {
                let other = con.other(i);
                let co = self.assignments.get(other).copied().flatten();
                if co.is_some() && con.is_violated(ci, co) {
                    out.push((con, i, other));
                }
            }
        }
        out
    }

    fn bounds_for(&self, cluster: Option<usize>) -> Option<&'a ClBounds> {
        self.bounds.get(cluster.unwrap_or(0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrainOutcome {
    /// Learner does not adapt the metric
    Fixed,
    Updated,
    /// Number of features whose update was rejected (kept or floored)
    Clamped(usize),
    /// Full matrix regularized this many times before inversion
    Regularized(usize),
    ResetToIdentity,
    SkippedEmpty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradientState {
    pub eta: f64,
    pub eta_decay: f64,
    pub min_weight: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricLearner {
    Fixed,
    ClosedForm,
    GradientDescent(GradientState),
}

impl MetricLearner {
    pub fn from_kind(kind: LearnerKind) -> Self {
        match kind {
            LearnerKind::None => MetricLearner::Fixed,
            LearnerKind::ClosedForm => MetricLearner::ClosedForm,
            LearnerKind::GradientDescent {
                eta,
                eta_decay,
                min_weight,
            } => MetricLearner::GradientDescent(GradientState {
                eta,
                eta_decay,
                min_weight,
            }),
        }
    }

    /// Current step size of a gradient learner.
    pub fn eta(&self) -> Option<f64> {
        match self {
            MetricLearner::GradientDescent(state) => Some(state.eta),
            _ => None,
        }
    }

    /// Update `metric` from the instances of `cluster` (`None`: all assigned
    /// instances, for one global metric).
    pub fn train(
        &mut self,
        cluster: Option<usize>,
        view: &LearningView<'_>,
        metric: &mut LearnableMetric,
    ) -> TrainOutcome {
        if matches!(self, MetricLearner::Fixed) {
            return TrainOutcome::Fixed;
        }

        let members = view.members(cluster);
        let outcome = if members.is_empty() {
            warn!(
                "cluster {:?} has no members: metric left unchanged this iteration",
                cluster
            );
            TrainOutcome::SkippedEmpty
        } else {
            match self {
                MetricLearner::Fixed => TrainOutcome::Fixed,
                MetricLearner::ClosedForm => match metric {
                    LearnableMetric::Mahalanobis(m) => closed_form_full(view, cluster, &members, m),
                    _ => closed_form_diagonal(view, cluster, &members, metric),
                },
                MetricLearner::GradientDescent(state) => {
                    gradient_step(view, cluster, &members, metric, state)
                }
            }
        };

        if let MetricLearner::GradientDescent(state) = self {
            state.eta *= state.eta_decay;
        }
        debug!("metric for cluster {:?}: {:?}", cluster, outcome);
        outcome
    }
}

/// Per-feature `(deviation, constraint)` sums for diagonal families.
fn diagonal_terms(
    view: &LearningView<'_>,
    cluster: Option<usize>,
    members: &[usize],
    metric: &LearnableMetric,
) -> Option<(Vec<f64>, Vec<f64>)> {
    let f = view.dataset.n_features();
    let mut deviation = vec![0.0; f];
    let mut constraint = vec![0.0; f];

    for &i in members {
        let c = view.assignments[i]?;
        let comps = metric.distortion_components(view.dataset.row(i), &view.centroids[c])?;
        deviation.iter_mut().zip(comps).for_each(|(d, v)| *d += v);
    }

    let max_comps = view
        .bounds_for(cluster)
        .and_then(|b| metric.pair_components(&b.lo, &b.hi))
        .unwrap_or_else(|| vec![0.0; f]);

    for (con, i, other) in view.violations(members) {
        let comps = metric.pair_components(view.dataset.row(i), view.dataset.row(other))?;
        match con.link {
            LinkType::MustLink => {
                for (acc, v) in constraint.iter_mut().zip(&comps) {
                    *acc += 0.5 * con.weight * v;
                }
            }
            LinkType::CannotLink => {
                for ((acc, v), max) in constraint.iter_mut().zip(&comps).zip(&max_comps) {
                    *acc += 0.5 * con.weight * (max - v).max(0.0);
                }
            }
        }
    }

    Some((deviation, constraint))
}

fn closed_form_diagonal(
    view: &LearningView<'_>,
    cluster: Option<usize>,
    members: &[usize],
    metric: &mut LearnableMetric,
) -> TrainOutcome {
    let Some(old) = metric.diagonal().map(<[f64]>::to_vec) else {
        return TrainOutcome::Fixed;
    };
    let Some((deviation, constraint)) = diagonal_terms(view, cluster, members, metric) else {
        return TrainOutcome::Fixed;
    };

    let log_scale = view.log_term_weight * members.len() as f64;
    let rho = view.regularizer_weight;
    let mut kept = 0;
    let weights: Vec<f64> = old
        .iter()
        .zip(deviation.iter().zip(&constraint))
        .map(|(&w, (dev, con))| {
            let denom = dev + con;
            let candidate = if rho > 0.0 {
                (log_scale + (log_scale * log_scale + 4.0 * denom * rho).sqrt()) / (2.0 * denom)
            } else {
                log_scale / denom
            };
            if denom > 0.0 && candidate.is_finite() && candidate > 0.0 {
                candidate
            } else {
                kept += 1;
                w
            }
        })
        .collect();

    if kept > 0 {
        trace!("closed form kept {} previous weight(s)", kept);
    }
    match metric.set_weights(MetricWeights::Diagonal(weights)) {
        Ok(()) if kept == 0 => TrainOutcome::Updated,
        Ok(()) => TrainOutcome::Clamped(kept),
        Err(e) => {
            warn!("rejected closed-form weights: {}", e);
            TrainOutcome::Clamped(old.len())
        }
    }
}

fn closed_form_full(
    view: &LearningView<'_>,
    cluster: Option<usize>,
    members: &[usize],
    metric: &mut WeightedMahalanobis,
) -> TrainOutcome {
    let f = view.dataset.n_features();
    let mut scatter = matrix::zeros(f);

    for &i in members {
        let Some(c) = view.assignments[i] else {
            continue;
        };
        let d = WeightedMahalanobis::difference(view.dataset.row(i), &view.centroids[c]);
        matrix::add_outer(&mut scatter, &d, 1.0);
    }

    let max_outer: Option<SquareMatrix> = view.bounds_for(cluster).map(|b| {
        let mut m = matrix::zeros(f);
        matrix::add_outer(&mut m, &WeightedMahalanobis::difference(&b.hi, &b.lo), 1.0);
        m
    });

    for (con, i, other) in view.violations(members) {
        let d = WeightedMahalanobis::difference(view.dataset.row(i), view.dataset.row(other));
        match con.link {
            LinkType::MustLink => matrix::add_outer(&mut scatter, &d, 0.5 * con.weight),
            LinkType::CannotLink => {
                if let Some(max) = &max_outer {
                    matrix::add_scaled(&mut scatter, max, 0.5 * con.weight);
                }
                matrix::add_outer(&mut scatter, &d, -0.5 * con.weight);
            }
        }
    }

    matrix::scale(&mut scatter, 1.0 / members.len() as f64);
    matrix::symmetrize(&mut scatter);

    let mut steps = 0;
    while steps < MAX_REGULARIZATION_STEPS
        && (!matrix::is_positive_definite(&scatter)
            || matrix::determinant(&scatter).abs() < SINGULAR_EPS)
    {
        let t = matrix::trace(&scatter);
        if t <= 0.0 {
            break;
        }
        matrix::add_identity(&mut scatter, REGULARIZATION_FRACTION * t);
        steps += 1;
    }
    if steps > 0 {
        warn!(
            "scatter matrix for cluster {:?} was near-singular: regularized {} time(s)",
            cluster, steps
        );
    }

    let reset = |metric: &mut WeightedMahalanobis, why: &str| {
        warn!(
            "metric for cluster {:?} reset to identity: {}",
            cluster, why
        );
        metric.reset();
        TrainOutcome::ResetToIdentity
    };

    if !matrix::is_positive_definite(&scatter) {
        return reset(metric, "scatter matrix is not positive definite");
    }
    let Some(mut weights) = matrix::inverse(&scatter) else {
        return reset(metric, "scatter matrix is not invertible");
    };
    matrix::scale(&mut weights, view.log_term_weight);
    matrix::symmetrize(&mut weights);

    match metric.set_weights(MetricWeights::Full(weights)) {
        Ok(()) if steps > 0 => TrainOutcome::Regularized(steps),
        Ok(()) => TrainOutcome::Updated,
        Err(e) => reset(metric, &e.to_string()),
    }
}

fn gradient_step(
    view: &LearningView<'_>,
    cluster: Option<usize>,
    members: &[usize],
    metric: &mut LearnableMetric,
    state: &GradientState,
) -> TrainOutcome {
    let Some(old) = metric.diagonal().map(<[f64]>::to_vec) else {
        return TrainOutcome::Fixed;
    };
    let Some((deviation, constraint)) = diagonal_terms(view, cluster, members, metric) else {
        return TrainOutcome::Fixed;
    };

    let log_scale = view.log_term_weight * members.len() as f64;
    let prior = metric
        .regularizer_gradient()
        .unwrap_or_else(|| vec![0.0; old.len()]);
    let mut floored = 0;
    let weights: Vec<f64> = old
        .iter()
        .zip(deviation.iter().zip(&constraint))
        .zip(&prior)
        .map(|((&w, (dev, con)), p)| {
            let gradient = dev + con - log_scale / w - view.regularizer_weight * p;
            let next = w - state.eta * gradient;
            if next.is_finite() && next > 0.0 {
                next
            } else {
                floored += 1;
                state.min_weight
            }
        })
        .collect();

    if floored > 0 {
        warn!(
            "gradient step floored {} weight(s) to {} (eta {})",
            floored, state.min_weight, state.eta
        );
    }
    match metric.set_weights(MetricWeights::Diagonal(weights)) {
        Ok(()) if floored == 0 => TrainOutcome::Updated,
        Ok(()) => TrainOutcome::Clamped(floored),
        Err(e) => {
            warn!("rejected gradient weights: {}", e);
            TrainOutcome::Clamped(old.len())
        }
    }
}

//! E-step strategies.
//!
//! The greedy strategies visit instances one at a time and move each to its
//! lowest-penalty cluster immediately, so later instances in the same pass
//! see earlier moves. They differ only in visiting order:
//! - `Simple`: index order
//! - `Random`: a fresh permutation per pass
//! - `Sorted`: ascending minimum distortion to any centroid
//!
//! `Lp` hands the whole pass to an LP relaxation (see [`crate::lp`]).

use std::cmp::Ordering;
use std::fmt;

use log::{debug, trace};
use rand::seq::SliceRandom;

use crate::builder::{AssignerKind, MpckConfig};
use crate::clustering::RunContext;
use crate::error::{ClusteringError, ClusteringResult};
use crate::lp::{LpAssigner, LpSolver};

pub enum Assigner {
    Simple,
    Random,
    Sorted,
    Lp(LpAssigner),
}

impl fmt::Display for Assigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind())
    }
}

impl Assigner {
    pub fn from_config(
        config: &MpckConfig,
        solver: Option<Box<dyn LpSolver>>,
    ) -> ClusteringResult<Self> {
        Ok(match config.assigner {
            AssignerKind::Simple => Assigner::Simple,
            AssignerKind::Random => Assigner::Random,
            AssignerKind::Sorted => Assigner::Sorted,
            AssignerKind::Lp => {
                let solver = solver.ok_or_else(|| {
                    ClusteringError::Configuration(
                        "the LP assigner needs an LP solver (with_lp_solver)".to_string(),
                    )
                })?;
                Assigner::Lp(LpAssigner::new(solver, config.lp_rounding_passes))
            }
        })
    }

    pub fn kind(&self) -> AssignerKind {
        match self {
            Assigner::Simple => AssignerKind::Simple,
            Assigner::Random => AssignerKind::Random,
            Assigner::Sorted => AssignerKind::Sorted,
            Assigner::Lp(_) => AssignerKind::Lp,
        }
    }

    /// Run one E-step and return the number of instances whose cluster
    /// differs from before the call.
    ///
    /// With `stabilize_passes` set, passes repeat until one moves nothing or
    /// the cap is hit.
    pub fn assign(&mut self, ctx: &mut RunContext) -> ClusteringResult<usize> {
        let before = ctx.assignments.clone();
        let max_passes = ctx.config.stabilize_passes.unwrap_or(1);

        let mut passes = 0;
        loop {
            let moved = self.pass(ctx)?;
            passes += 1;
            trace!("{} pass {}: {} move(s)", self, passes, moved);
            if moved == 0 || passes >= max_passes {
                break;
            }
        }

        let changed = before
            .iter()
            .zip(&ctx.assignments)
            .filter(|(a, b)| a != b)
            .count();
        debug!("{}: {} pass(es), {} instance(s) changed", self, passes, changed);
        Ok(changed)
    }

    fn pass(&mut self, ctx: &mut RunContext) -> ClusteringResult<usize> {
        let n = ctx.n_instances();
        match self {
            Assigner::Simple => {
                let order: Vec<usize> = (0..n).collect();
                Ok(greedy_pass(ctx, &order))
            }
            Assigner::Random => {
                let mut order: Vec<usize> = (0..n).collect();
                order.shuffle(&mut ctx.rng);
                Ok(greedy_pass(ctx, &order))
            }
            Assigner::Sorted => {
                let order = sorted_order(ctx);
                Ok(greedy_pass(ctx, &order))
            }
            Assigner::Lp(lp) => lp.assign(ctx),
        }
    }
}

/// Visit `order`, moving each instance to its best cluster in place.
/// Returns the number of moves.
pub fn greedy_pass(ctx: &mut RunContext, order: &[usize]) -> usize {
    let mut moved = 0;
    for &i in order {
        let best = ctx.best_cluster(i);
        if ctx.assignments[i] != Some(best) {
            ctx.assignments[i] = Some(best);
            moved += 1;
        }
    }
    moved
}

/// Instances by ascending minimum distortion to any centroid; ties keep
/// index order.
pub fn sorted_order(ctx: &RunContext) -> Vec<usize> {
    let mut keyed: Vec<(usize, f64)> = (0..ctx.n_instances())
        .map(|i| (i, ctx.nearest_centroid(i).1))
        .collect();
    keyed.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
    keyed.into_iter().map(|(i, _)| i).collect()
}

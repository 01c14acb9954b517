//! LP-relaxation assignment.
//!
//! Variables, all in `[0, 1]`:
//! - `x[c * n + i]`: fractional membership of instance `i` in cluster `c`
//! - `y[n * k + l * k + c]`: violation indicator of constraint `l` w.r.t.
//!   cluster `c`
//!
//! Rows:
//! - equality: `Σ_c x_ic = 1` for every instance
//! - must-link `(a, b)`, per cluster: `x_ac - x_bc - y ≤ 0`, `x_bc - x_ac - y ≤ 0`
//! - cannot-link `(a, b)`, per cluster: `y - x_ac - x_bc ≤ 0`, `x_ac + x_bc - y ≤ 1`
//!
//! A violated must-link raises two `y` variables and a violated cannot-link
//! raises one, so must-link indicators cost half the pair cost.
//!
//! The solver itself is an external collaborator behind [`LpSolver`]. Its
//! fractional solution is rounded by bounded randomized rounding; whatever
//! is still unassigned after the pass budget takes its nearest centroid.

use log::{debug, trace, warn};
use rand::Rng;
use sprs::{CsMat, TriMat};

use mpck_core::constraints::{Constraint, LinkType};
use mpck_core::metric::Metric;

use crate::builder::ViolationPenalty;
use crate::clustering::RunContext;
use crate::error::{ClusteringError, ClusteringResult};

/// Minimization problem `min cᵀv  s.t.  A_eq v = b_eq,  A_ub v ≤ b_ub,
/// lower ≤ v ≤ upper`.
#[derive(Debug, Clone)]
pub struct LpProblem {
    n_instances: usize,
    n_clusters: usize,
    pairs: Vec<Constraint>,
    pub objective: Vec<f64>,
    pub eq_matrix: CsMat<f64>,
    pub eq_rhs: Vec<f64>,
    pub ub_matrix: CsMat<f64>,
    pub ub_rhs: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

/// Synchronous external LP solver.
pub trait LpSolver {
    /// Return a solution vector of length `problem.n_vars()`, or
    /// `ClusteringError::Solver` on failure.
    fn solve(&mut self, problem: &LpProblem) -> ClusteringResult<Vec<f64>>;
}

impl LpProblem {
    /// Build the relaxation for the current centroids, metrics and
    /// constraints.
    pub fn build(ctx: &RunContext) -> Self {
        let n = ctx.n_instances();
        let k = ctx.k();
        let pairs: Vec<Constraint> = ctx.constraints.iter().copied().collect();
        let n_vars = n * k + pairs.len() * k;

        let mut objective = vec![0.0; n_vars];
        for c in 0..k {
            let log_term = ctx.log_term(c);
            for i in 0..n {
                objective[c * n + i] = ctx.distortion(i, c) - log_term;
            }
        }
        for (l, con) in pairs.iter().enumerate() {
            for c in 0..k {
                objective[n * k + l * k + c] = indicator_cost(ctx, con, c);
            }
        }

        let mut eq = TriMat::new((n, n_vars));
        for i in 0..n {
            for c in 0..k {
                eq.add_triplet(i, c * n + i, 1.0);
            }
        }

        let n_rows = 2 * pairs.len() * k;
        let mut ub = TriMat::new((n_rows, n_vars));
        let mut ub_rhs = Vec::with_capacity(n_rows);
        let mut row = 0;
        for (l, con) in pairs.iter().enumerate() {
            for c in 0..k {
                let xa = c * n + con.first;
                let xb = c * n + con.second;
                let y = n * k + l * k + c;
                match con.link {
                    LinkType::MustLink => {
                        ub.add_triplet(row, xa, 1.0);
                        ub.add_triplet(row, xb, -1.0);
                        ub.add_triplet(row, y, -1.0);
                        ub_rhs.push(0.0);
                        ub.add_triplet(row + 1, xa, -1.0);
                        ub.add_triplet(row + 1, xb, 1.0);
                        ub.add_triplet(row + 1, y, -1.0);
                        ub_rhs.push(0.0);
                    }
                    LinkType::CannotLink => {
                        ub.add_triplet(row, xa, -1.0);
                        ub.add_triplet(row, xb, -1.0);
                        ub.add_triplet(row, y, 1.0);
                        ub_rhs.push(0.0);
                        ub.add_triplet(row + 1, xa, 1.0);
                        ub.add_triplet(row + 1, xb, 1.0);
                        ub.add_triplet(row + 1, y, -1.0);
                        ub_rhs.push(1.0);
                    }
                }
                row += 2;
            }
        }

        debug!(
            "LP relaxation: {} variables, {} equality rows, {} inequality rows",
            n_vars, n, n_rows
        );

        Self {
            n_instances: n,
            n_clusters: k,
            pairs,
            objective,
            eq_matrix: eq.to_csr(),
            eq_rhs: vec![1.0; n],
            ub_matrix: ub.to_csr(),
            ub_rhs,
            lower: vec![0.0; n_vars],
            upper: vec![1.0; n_vars],
        }
    }

    pub fn n_instances(&self) -> usize {
        self.n_instances
    }

    pub fn n_clusters(&self) -> usize {
        self.n_clusters
    }

    pub fn n_vars(&self) -> usize {
        self.objective.len()
    }

    /// Constraints in `y` order
    pub fn pairs(&self) -> &[Constraint] {
        &self.pairs
    }

    #[inline]
    pub fn x_index(&self, i: usize, c: usize) -> usize {
        c * self.n_instances + i
    }

    #[inline]
    pub fn y_index(&self, l: usize, c: usize) -> usize {
        self.n_instances * self.n_clusters + l * self.n_clusters + c
    }

    pub fn objective_value(&self, v: &[f64]) -> f64 {
        self.objective.iter().zip(v).map(|(c, x)| c * x).sum()
    }

    /// Whether `v` satisfies bounds and every row within `tol`.
    pub fn is_feasible(&self, v: &[f64], tol: f64) -> bool {
        if v.len() != self.n_vars() {
            return false;
        }
        let in_bounds = v
            .iter()
            .zip(self.lower.iter().zip(&self.upper))
            .all(|(x, (lo, hi))| *x >= lo - tol && *x <= hi + tol);
        let eq_ok = row_products(&self.eq_matrix, v)
            .zip(&self.eq_rhs)
            .all(|(lhs, rhs)| (lhs - rhs).abs() <= tol);
        let ub_ok = row_products(&self.ub_matrix, v)
            .zip(&self.ub_rhs)
            .all(|(lhs, rhs)| lhs <= rhs + tol);
        in_bounds && eq_ok && ub_ok
    }
}

fn row_products<'a>(m: &'a CsMat<f64>, v: &'a [f64]) -> impl Iterator<Item = f64> + 'a {
    m.outer_iterator()
        .map(move |row| row.iter().map(|(j, a)| a * v[j]).sum::<f64>())
}

/// Objective coefficient of one violation indicator.
fn indicator_cost(ctx: &RunContext, con: &Constraint, c: usize) -> f64 {
    let scaled = ctx.config.violation_penalty == ViolationPenalty::MetricScaled;
    let pair_distortion = || {
        ctx.metric_for(c)
            .pair_distortion(ctx.dataset.row(con.first), ctx.dataset.row(con.second))
    };
    match con.link {
        LinkType::MustLink if scaled => 0.5 * con.weight * pair_distortion(),
        LinkType::MustLink => 0.5 * con.weight,
        LinkType::CannotLink if scaled => {
            con.weight * (ctx.max_cl(c) - pair_distortion()).max(0.0)
        }
        LinkType::CannotLink => con.weight,
    }
}

/// Assigner backed by an LP solver and randomized rounding.
pub struct LpAssigner {
    solver: Box<dyn LpSolver>,
    rounding_passes: usize,
}

impl LpAssigner {
    pub fn new(solver: Box<dyn LpSolver>, rounding_passes: usize) -> Self {
        Self {
            solver,
            rounding_passes,
        }
    }

    /// Solve, round and write the hard assignment back. Returns the number of
    /// instances whose cluster changed. Solver failures leave the assignment
    /// untouched.
    pub fn assign(&mut self, ctx: &mut RunContext) -> ClusteringResult<usize> {
        let problem = LpProblem::build(ctx);
        let solution = self.solver.solve(&problem)?;

        if solution.len() != problem.n_vars() {
            return Err(ClusteringError::Solver(format!(
                "solution has {} values, expected {}",
                solution.len(),
                problem.n_vars()
            )));
        }
        if solution.iter().any(|v| !v.is_finite()) {
            return Err(ClusteringError::Solver(
                "solution contains non-finite values".to_string(),
            ));
        }
        trace!("LP objective {:.6}", problem.objective_value(&solution));

        let rounded = round(&problem, &solution, self.rounding_passes, ctx);

        let moved = rounded
            .iter()
            .zip(&ctx.assignments)
            .filter(|(new, old)| Some(**new) != **old)
            .count();
        for (slot, c) in ctx.assignments.iter_mut().zip(rounded) {
            *slot = Some(c);
        }
        Ok(moved)
    }
}

/// Bounded randomized rounding with nearest-centroid fallback.
///
/// Each pass draws, for every still-unassigned instance, one random cluster
/// and one uniform threshold and accepts the cluster when its fractional
/// membership exceeds the threshold.
pub fn round(problem: &LpProblem, solution: &[f64], passes: usize, ctx: &mut RunContext) -> Vec<usize> {
    let n = problem.n_instances();
    let k = problem.n_clusters();
    let mut rounded: Vec<Option<usize>> = vec![None; n];
    let mut pending: Vec<usize> = (0..n).collect();

    let mut used = 0;
    while !pending.is_empty() && used < passes {
        pending.retain(|&i| {
            let c = ctx.rng.random_range(0..k);
            let threshold = ctx.rng.random::<f64>();
            if solution[problem.x_index(i, c)] > threshold {
                rounded[i] = Some(c);
                false
            } else {
                true
            }
        });
        used += 1;
    }

    if !pending.is_empty() {
        warn!(
            "LP rounding left {} instance(s) unassigned after {} pass(es): using nearest centroid",
            pending.len(),
            used
        );
        for &i in &pending {
            rounded[i] = Some(ctx.nearest_centroid(i).0);
        }
    }
    debug!("LP rounding finished in {} pass(es)", used);

    rounded.into_iter().map(|c| c.unwrap_or(0)).collect()
}

//! Constraint-aware seeding.
//!
//! 1. Must-link neighborhoods (connected components, largest first).
//! 2. With at least k neighborhoods: pick k of them, by weighted
//!    farthest-first traversal when the metric is learnable, uniformly at
//!    random otherwise. Selected members seed their cluster; everything
//!    else starts unassigned.
//! 3. With fewer than k: every neighborhood seeds a cluster and the
//!    remaining centroids are perturbed copies of the global centroid.
//!
//! The optional transitive closure expands the constraint store exactly
//! once; constraints it implies in turn are not followed.

use std::collections::HashMap;

use log::{debug, info, trace};
use rand::Rng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

use mpck_core::components::{Neighborhood, must_link_neighborhoods};
use mpck_core::constraints::{ConstraintStore, Insertion, LinkType};
use mpck_core::metric::{LearnableMetric, Metric};

use crate::builder::MpckConfig;
use crate::core::{Dataset, normalize_unit};

/// Output of the seeding phase.
#[derive(Debug, Clone, PartialEq)]
pub struct Initialization {
    pub centroids: Vec<Vec<f64>>,
    pub assignments: Vec<Option<usize>>,
    /// Number of must-link neighborhoods found
    pub n_neighborhoods: usize,
    /// Number of neighborhoods that seeded a cluster
    pub n_seeded: usize,
    /// Constraints added by the transitive closure
    pub n_inferred: usize,
}

pub fn initialize(
    dataset: &Dataset,
    constraints: &mut ConstraintStore,
    metric: &LearnableMetric,
    config: &MpckConfig,
    rng: &mut ChaCha8Rng,
) -> Initialization {
    let n = dataset.n_instances();
    let k = config.num_clusters;
    let distance_based = metric.is_distance_based();

    let neighborhoods = if config.seedable {
        must_link_neighborhoods(n, constraints)
    } else {
        Vec::new()
    };
    let m = neighborhoods.len();
    log_label_purity(dataset, &neighborhoods);

    let centroids_of = |hoods: &[&Neighborhood]| -> Vec<Vec<f64>> {
        hoods
            .iter()
            .filter_map(|h| dataset.aggregate(h.members.iter().copied(), distance_based))
            .collect()
    };

    let selected: Vec<usize> = if m >= k {
        let all: Vec<&Neighborhood> = neighborhoods.iter().collect();
        let centroids = centroids_of(&all);
        if config.learner.is_learnable() {
            farthest_first(&neighborhoods, &centroids, metric, k, rng)
        } else {
            let mut order: Vec<usize> = (0..m).collect();
            order.shuffle(rng);
            order.truncate(k);
            order
        }
    } else {
        (0..m).collect()
    };

    let n_inferred = if config.use_transitive_closure && m > 0 {
        transitive_closure(constraints, &neighborhoods, &selected)
    } else {
        0
    };

    let mut assignments = vec![None; n];
    for (cluster, &h) in selected.iter().enumerate() {
        for &i in &neighborhoods[h].members {
            assignments[i] = Some(cluster);
        }
    }

    let seeded: Vec<&Neighborhood> = selected.iter().map(|&h| &neighborhoods[h]).collect();
    let mut centroids = centroids_of(&seeded);

    if centroids.len() < k {
        let missing = k - centroids.len();
        debug!(
            "{} neighborhood(s) for k={}: perturbing the global centroid {} time(s)",
            centroids.len(),
            k,
            missing
        );
        let global = dataset
            .global_aggregate(distance_based)
            .unwrap_or_else(|| vec![0.0; dataset.n_features()]);
        for _ in 0..missing {
            centroids.push(perturb(&global, config.perturbation, distance_based, rng));
        }
    }

    info!(
        "Initialization: {} neighborhood(s), {} seeded, {} inferred constraint(s), {} preassigned",
        m,
        selected.len(),
        n_inferred,
        assignments.iter().flatten().count()
    );

    Initialization {
        centroids,
        assignments,
        n_neighborhoods: m,
        n_seeded: selected.len(),
        n_inferred,
    }
}

/// Weighted farthest-first traversal over neighborhood centroids.
///
/// Starts from the largest neighborhood; each step adds the candidate whose
/// minimum weighted distance `d(μ_a, μ_b) * sqrt(|a| |b|)` to the selected set
/// is largest. Exact ties are broken uniformly at random.
pub fn farthest_first(
    neighborhoods: &[Neighborhood],
    centroids: &[Vec<f64>],
    metric: &LearnableMetric,
    k: usize,
    rng: &mut ChaCha8Rng,
) -> Vec<usize> {
    let m = centroids.len();
    if m == 0 || k == 0 {
        return Vec::new();
    }

    let mut selected = vec![0usize];
    let mut is_selected = vec![false; m];
    is_selected[0] = true;
    // min weighted distance of every candidate to the selected set
    let mut min_dist = vec![f64::INFINITY; m];

    while selected.len() < k.min(m) {
        let last = selected[selected.len() - 1];
        for j in 0..m {
            if is_selected[j] {
                continue;
            }
            let size = (neighborhoods[last].len() * neighborhoods[j].len()) as f64;
            let d = metric.distance(&centroids[last], &centroids[j]) * size.sqrt();
            if d < min_dist[j] {
                min_dist[j] = d;
            }
        }

        let best = (0..m)
            .filter(|&j| !is_selected[j])
            .map(|j| min_dist[j])
            .fold(f64::NEG_INFINITY, f64::max);
        let ties: Vec<usize> = (0..m)
            .filter(|&j| !is_selected[j] && min_dist[j] == best)
            .collect();
        let pick = match ties.len() {
            // NaN distances only
            0 => match (0..m).find(|&j| !is_selected[j]) {
                Some(j) => j,
                None => break,
            },
            1 => ties[0],
            t => ties[rng.random_range(0..t)],
        };

        trace!(
            "farthest-first: neighborhood {} (size {}, weighted distance {:.6}, {} tie(s))",
            pick,
            neighborhoods[pick].len(),
            best,
            ties.len()
        );
        selected.push(pick);
        is_selected[pick] = true;
    }

    selected
}

/// One-shot closure: must-links between all members of each selected
/// neighborhood, and full cannot-link cross-connection between any two
/// neighborhoods already joined by a cannot-link. Returns the number of
/// constraints added.
pub fn transitive_closure(
    constraints: &mut ConstraintStore,
    neighborhoods: &[Neighborhood],
    selected: &[usize],
) -> usize {
    let mut added = 0;

    let mut owner: HashMap<usize, usize> = HashMap::new();
    for (h, hood) in neighborhoods.iter().enumerate() {
        for &i in &hood.members {
            owner.insert(i, h);
        }
    }

    let mut linked: Vec<(usize, usize)> = constraints
        .iter()
        .filter(|c| c.link == LinkType::CannotLink)
        .filter_map(|c| match (owner.get(&c.first), owner.get(&c.second)) {
            (Some(&a), Some(&b)) if a != b => Some(if a < b { (a, b) } else { (b, a) }),
            _ => None,
        })
        .collect();
    linked.sort_unstable();
    linked.dedup();

    for &h in selected {
        let members = &neighborhoods[h].members;
        for (x, &i) in members.iter().enumerate() {
            for &j in &members[x + 1..] {
                if let Ok(Insertion::Inserted) = constraints.add(i, j, LinkType::MustLink) {
                    added += 1;
                }
            }
        }
    }

    for (a, b) in linked {
        for &i in &neighborhoods[a].members {
            for &j in &neighborhoods[b].members {
                if let Ok(Insertion::Inserted) = constraints.add(i, j, LinkType::CannotLink) {
                    added += 1;
                }
            }
        }
    }

    debug!("Transitive closure added {} constraint(s)", added);
    added
}

/// `g_j * (1 + range * (u - 0.5))` per feature, unit-normalized for
/// similarity-based metrics.
pub fn perturb(global: &[f64], range: f64, distance_based: bool, rng: &mut ChaCha8Rng) -> Vec<f64> {
    let mut centroid: Vec<f64> = global
        .iter()
        .map(|g| g * (1.0 + range * (rng.random::<f64>() - 0.5)))
        .collect();
    if !distance_based {
        normalize_unit(&mut centroid);
    }
    centroid
}

fn log_label_purity(dataset: &Dataset, neighborhoods: &[Neighborhood]) {
    if !log::log_enabled!(log::Level::Debug) || !dataset.has_labels() {
        return;
    }
    for (h, hood) in neighborhoods.iter().enumerate() {
        let mut counts: HashMap<usize, usize> = HashMap::new();
        for &i in &hood.members {
            if let Some(label) = dataset.get(i).label {
                *counts.entry(label).or_default() += 1;
            }
        }
        let majority = counts.values().copied().max().unwrap_or(0);
        debug!(
            "neighborhood {}: {} members, label purity {:.3}",
            h,
            hood.len(),
            majority as f64 / hood.len().max(1) as f64
        );
    }
}

//! End-to-end runs of the driver: scenarios on the two-group fixture,
//! state machine, termination and invariants that must hold after every
//! phase.

use approx::assert_relative_eq;
use log::debug;
use sprs::TriMat;

use mpck_core::constraints::LinkType;
use mpck_core::matrix;
use mpck_core::metric::{Metric, MetricError, MetricFamily, MetricWeights};

use crate::builder::{AssignerKind, LearnerKind, MpckMeansBuilder};
use crate::clustering::{MpckMeans, RunState, TerminationReason};
use crate::core::Dataset;
use crate::error::ClusteringError;
use crate::tests::init;
use crate::tests::test_data::{BruteForceSolver, make_blobs, same_partition, two_groups, two_groups_rows};

const HEAVY: f64 = 1e6;
const NATURAL: [&[usize]; 2] = [&[0, 1, 2], &[3, 4, 5]];

fn builder_for(assigner: AssignerKind) -> MpckMeansBuilder {
    let builder = MpckMeansBuilder::new()
        .with_num_clusters(2)
        .with_assigner(assigner)
        .with_seed(17);
    if assigner == AssignerKind::Lp {
        builder.with_lp_solver(Box::new(BruteForceSolver::default()))
    } else {
        builder
    }
}

const ALL_ASSIGNERS: [AssignerKind; 4] = [
    AssignerKind::Simple,
    AssignerKind::Random,
    AssignerKind::Sorted,
    AssignerKind::Lp,
];

/// Every full assignment of `n` instances to 2 clusters.
fn all_assignments(n: usize) -> impl Iterator<Item = Vec<Option<usize>>> {
    (0..1usize << n).map(move |code| (0..n).map(|i| Some((code >> i) & 1)).collect())
}

fn assert_metrics_valid(run: &MpckMeans) {
    for metric in run.metrics() {
        match metric.weights() {
            MetricWeights::Diagonal(w) => {
                assert!(
                    w.iter().all(|x| x.is_finite() && *x > 0.0),
                    "non-positive weights {:?} in state {:?}",
                    w,
                    run.state()
                );
            }
            MetricWeights::Full(m) => assert!(matrix::is_positive_definite(&m)),
        }
    }
}

#[test]
fn test_unconstrained_recovers_natural_groups() {
    init();
    for assigner in ALL_ASSIGNERS {
        let mut run = builder_for(assigner).build(two_groups()).unwrap();
        let term = run.run().unwrap();
        debug!("{:?}: {:?}", assigner, term);

        assert_eq!(term.reason, TerminationReason::Converged, "{:?}", assigner);
        assert!(
            same_partition(run.cluster_assignments(), &NATURAL),
            "{:?} gave {:?}",
            assigner,
            run.cluster_assignments()
        );
    }
}

#[test]
fn test_heavy_cannot_link_separates_neighbors() {
    init();
    for assigner in ALL_ASSIGNERS {
        let mut run = builder_for(assigner)
            .with_weighted_constraint(0, 1, LinkType::CannotLink, HEAVY)
            .build(two_groups())
            .unwrap();
        run.run().unwrap();

        let a = run.cluster_assignments();
        assert_ne!(a[0], a[1], "{:?} gave {:?}", assigner, a);
        assert!(run.violation_report().cannot_link.is_empty());
    }
}

#[test]
fn test_heavy_must_link_joins_groups() {
    init();
    for assigner in ALL_ASSIGNERS {
        let mut run = builder_for(assigner)
            .with_weighted_constraint(2, 3, LinkType::MustLink, HEAVY)
            .build(two_groups())
            .unwrap();
        run.run().unwrap();

        let a = run.cluster_assignments();
        assert_eq!(a[2], a[3], "{:?} gave {:?}", assigner, a);

        let objective = run.objective_value().unwrap();
        for candidate in all_assignments(6).filter(|c| c[2] != c[3]) {
            let other = run.objective_of(&candidate).unwrap();
            assert!(
                objective < other,
                "{:?}: {} not below {} for {:?}",
                assigner,
                objective,
                other,
                candidate
            );
        }
    }
}

#[test]
fn test_cannot_link_pressure_is_monotonic() {
    init();
    let data = || Dataset::from_rows(vec![vec![0.0], vec![0.5], vec![10.0], vec![10.5]]).unwrap();

    let satisfied: Vec<usize> = [0.0, 1.0, 10.0, 100.0]
        .iter()
        .map(|&w| {
            let mut run = MpckMeansBuilder::new()
                .with_num_clusters(2)
                .with_learner(LearnerKind::None)
                .with_weighted_constraint(0, 1, LinkType::CannotLink, w)
                .with_seed(3)
                .build(data())
                .unwrap();
            run.run().unwrap();
            run.violation_report().satisfied_cannot_links()
        })
        .collect();

    debug!("satisfied cannot-links by weight: {:?}", satisfied);
    assert!(satisfied.windows(2).all(|w| w[0] <= w[1]), "{:?}", satisfied);
    assert_eq!(satisfied[0], 0);
    assert_eq!(satisfied[3], 1);
}

#[test]
fn test_state_machine() {
    init();
    let mut run = MpckMeansBuilder::new()
        .with_constraint(0, 1, LinkType::MustLink)
        .build(two_groups())
        .unwrap();
    assert_eq!(run.state(), RunState::Init);
    assert!(run.initialization().is_none());

    assert_eq!(run.step().unwrap(), RunState::Assign);
    let seeding = run.initialization().unwrap();
    assert_eq!(seeding.n_neighborhoods, 1);
    assert_eq!(run.cluster_labels()[0], run.cluster_labels()[1]);
    assert!(run.cluster_labels().iter().all(|l| (-1..2).contains(l)));

    assert_eq!(run.step().unwrap(), RunState::LearnMetric);
    assert!(run.cluster_labels().iter().all(|l| (0..2).contains(l)));
    assert!(run.objective_value().is_none());

    let next = run.step().unwrap();
    assert!(matches!(
        next,
        RunState::Assign | RunState::Converged | RunState::MaxIterReached
    ));
    assert_eq!(run.iterations(), 1);
    assert!(run.objective_value().is_some());

    run.run().unwrap();
    assert!(run.state().is_terminal());
    let state = run.state();
    assert_eq!(run.step().unwrap(), state);
}

#[test]
fn test_reconfiguration_only_before_start() {
    init();
    let mut run = MpckMeansBuilder::new().build(two_groups()).unwrap();
    run.set_num_clusters(3).unwrap();
    run.add_constraint(0, 5, LinkType::CannotLink).unwrap();
    assert!(matches!(
        run.set_num_clusters(0),
        Err(ClusteringError::Configuration(_))
    ));
    assert!(matches!(
        run.add_constraint(0, 9, LinkType::MustLink),
        Err(ClusteringError::Configuration(_))
    ));

    run.step().unwrap();
    assert_eq!(run.cluster_centroids().len(), 3);
    assert!(matches!(
        run.set_num_clusters(2),
        Err(ClusteringError::Configuration(_))
    ));
    assert!(matches!(
        run.add_constraint(1, 2, LinkType::MustLink),
        Err(ClusteringError::Configuration(_))
    ));
    assert!(matches!(
        run.objective_of(&[Some(0); 2]),
        Err(ClusteringError::InvalidData(_))
    ));

    run.run().unwrap();
    assert_eq!(run.cluster_sizes().iter().sum::<usize>(), 6);
}

#[test]
fn test_objective_of_needs_started_run() {
    init();
    let run = MpckMeansBuilder::new().build(two_groups()).unwrap();
    assert!(matches!(
        run.objective_of(&[Some(0); 6]),
        Err(ClusteringError::Configuration(_))
    ));
}

#[test]
fn test_iteration_cap() {
    init();
    let mut run = MpckMeansBuilder::new()
        .with_max_iterations(1)
        .build(two_groups())
        .unwrap();
    let term = run.run().unwrap();

    assert_eq!(term.reason, TerminationReason::MaxIterReached);
    assert_eq!(term.iterations, 1);
    assert_eq!(run.state(), RunState::MaxIterReached);
    assert!(run.cluster_labels().iter().all(|l| *l >= 0));
}

#[test]
fn test_history_tracks_iterations() {
    init();
    let mut run = MpckMeansBuilder::new()
        .with_constraint(0, 3, LinkType::CannotLink)
        .build(two_groups())
        .unwrap();
    let term = run.run().unwrap();

    let history = run.history();
    assert_eq!(history.len(), term.iterations);
    assert_eq!(history[0].moved, 6);
    assert_eq!(history.last().unwrap().objective, term.objective);
    assert_eq!(run.objective_value(), Some(term.objective));
    for (idx, record) in history.iter().enumerate() {
        assert_eq!(record.iteration, idx + 1);
    }
}

#[test]
fn test_weights_stay_valid_after_every_phase() {
    init();
    let cases = [
        (MetricFamily::Euclidean, LearnerKind::ClosedForm, false),
        (MetricFamily::Euclidean, LearnerKind::ClosedForm, true),
        (MetricFamily::Euclidean, LearnerKind::gradient_descent(), false),
        (MetricFamily::Kl, LearnerKind::gradient_descent(), true),
        (MetricFamily::Mahalanobis, LearnerKind::ClosedForm, false),
        (MetricFamily::Mahalanobis, LearnerKind::ClosedForm, true),
        (MetricFamily::DotProduct, LearnerKind::None, false),
    ];

    for (metric, learner, multiple) in cases {
        let mut run = MpckMeansBuilder::new()
            .with_metric(metric)
            .with_learner(learner)
            .with_multiple_metrics(multiple)
            .with_constraint(0, 1, LinkType::MustLink)
            .with_constraint(2, 3, LinkType::CannotLink)
            .with_max_iterations(20)
            .build(two_groups())
            .unwrap();

        assert_metrics_valid(&run);
        while !run.state().is_terminal() {
            run.step().unwrap();
            assert_metrics_valid(&run);
        }
        assert_eq!(run.metrics().len(), if multiple { 2 } else { 1 });
        debug!("{} / {}: {:?}", metric, learner, run.cluster_sizes());
    }
}

#[test]
fn test_gradient_step_size_decays_per_iteration() {
    init();
    let mut run = MpckMeansBuilder::new()
        .with_learner(LearnerKind::gradient_descent())
        .with_multiple_metrics(true)
        .build(two_groups())
        .unwrap();
    let term = run.run().unwrap();

    let expected = 0.001 * 0.9f64.powi(term.iterations as i32);
    let rates = run.learning_rates();
    assert_eq!(rates.len(), 2);
    for rate in rates {
        assert_relative_eq!(rate.unwrap(), expected, epsilon = 1e-15);
    }
}

#[test]
fn test_fixed_metric_is_untouched() {
    init();
    let mut run = MpckMeansBuilder::new()
        .with_learner(LearnerKind::None)
        .with_constraint(0, 4, LinkType::MustLink)
        .build(two_groups())
        .unwrap();
    run.run().unwrap();

    assert_eq!(run.metric().diagonal().unwrap(), &[1.0, 1.0]);
    assert_eq!(run.learning_rates(), vec![None]);
}

#[test]
fn test_dot_product_run() {
    init();
    let data = Dataset::from_rows(vec![
        vec![1.0, 0.1],
        vec![0.9, 0.2],
        vec![0.95, 0.05],
        vec![0.1, 1.0],
        vec![0.2, 0.9],
        vec![0.05, 0.95],
    ])
    .unwrap();
    let mut run = MpckMeansBuilder::new()
        .with_metric(MetricFamily::DotProduct)
        .with_learner(LearnerKind::None)
        .with_constraint(0, 1, LinkType::MustLink)
        .with_constraint(3, 4, LinkType::MustLink)
        .build(data)
        .unwrap();
    run.run().unwrap();

    assert!(same_partition(run.cluster_assignments(), &NATURAL));
    for centroid in run.cluster_centroids() {
        let norm = centroid.iter().map(|x| x * x).sum::<f64>().sqrt();
        assert_relative_eq!(norm, 1.0, epsilon = 1e-9);
    }
}

#[test]
fn test_sparse_input() {
    init();
    let rows = two_groups_rows();
    let mut tri = TriMat::new((rows.len(), 2));
    for (i, row) in rows.iter().enumerate() {
        for (j, v) in row.iter().enumerate() {
            if *v != 0.0 {
                tri.add_triplet(i, j, *v);
            }
        }
    }
    let data = Dataset::from_sparse(&tri.to_csr()).unwrap();

    let mut run = MpckMeansBuilder::new().with_seed(5).build(data).unwrap();
    run.run().unwrap();
    assert!(same_partition(run.cluster_assignments(), &NATURAL));
}

#[test]
fn test_seeded_blobs_with_per_cluster_metrics() {
    init();
    let centers = vec![vec![0.0, 0.0], vec![20.0, 0.0], vec![0.0, 20.0]];
    let rows = make_blobs(20, &centers, 1.0, 99);
    let labels: Vec<usize> = (0..60).map(|i| i / 20).collect();
    let data = Dataset::from_rows(rows).unwrap().with_labels(labels).unwrap();

    let mut run = MpckMeansBuilder::new()
        .with_num_clusters(3)
        .with_multiple_metrics(true)
        .with_constraint(0, 1, LinkType::MustLink)
        .with_constraint(20, 21, LinkType::MustLink)
        .with_constraint(40, 41, LinkType::MustLink)
        .build(data)
        .unwrap();
    run.run().unwrap();

    let groups: Vec<Vec<usize>> = (0..3).map(|b| (b * 20..(b + 1) * 20).collect()).collect();
    let groups: Vec<&[usize]> = groups.iter().map(Vec::as_slice).collect();
    assert!(same_partition(run.cluster_assignments(), &groups));
    assert_eq!(run.metrics().len(), 3);
    assert_eq!(run.initialization().unwrap().n_seeded, 3);
}

#[test]
fn test_runs_are_deterministic() {
    init();
    for assigner in [AssignerKind::Simple, AssignerKind::Sorted, AssignerKind::Random] {
        let go = || {
            let mut run = builder_for(assigner)
                .with_constraint(0, 4, LinkType::MustLink)
                .with_constraint(1, 2, LinkType::CannotLink)
                .build(two_groups())
                .unwrap();
            let term = run.run().unwrap();
            (
                run.cluster_assignments().to_vec(),
                run.cluster_centroids().to_vec(),
                term.objective,
                term.iterations,
            )
        };
        assert_eq!(go(), go(), "{:?}", assigner);
    }
}

#[test]
fn test_weight_prior_changes_the_run() {
    init();
    let build = |rho: Option<f64>| {
        let builder = builder_for(AssignerKind::Simple).with_constraint(0, 3, LinkType::CannotLink);
        let builder = match rho {
            Some(rho) => builder.with_regularizer(rho),
            None => builder,
        };
        builder.build(two_groups()).unwrap()
    };

    let mut plain = build(None);
    plain.run().unwrap();
    let mut prior = build(Some(5.0));
    prior.run().unwrap();

    assert!(prior.config().regularize);
    assert_ne!(plain.metric().diagonal(), prior.metric().diagonal());
    assert_metrics_valid(&prior);

    // the objective subtracts ρ times the prior of every metric
    let a = prior.cluster_assignments().to_vec();
    let ctx = prior.context();
    let base: f64 = a
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let c = c.unwrap();
            ctx.distortion(i, c) - ctx.log_term(c)
        })
        .sum::<f64>()
        + prior.violation_report().cost;
    let weight_prior: f64 = prior.metrics().iter().map(|m| m.regularizer()).sum();
    assert!(weight_prior < 0.0);
    assert_relative_eq!(prior.objective_of(&a).unwrap(), base - 5.0 * weight_prior, epsilon = 1e-9);
    assert_relative_eq!(prior.objective_value().unwrap(), base - 5.0 * weight_prior, epsilon = 1e-9);
}

#[test]
fn test_weight_prior_keeps_gradient_weights_positive() {
    init();
    for metric in [MetricFamily::Euclidean, MetricFamily::Kl] {
        let mut run = MpckMeansBuilder::new()
            .with_metric(metric)
            .with_learner(LearnerKind::gradient_descent())
            .with_multiple_metrics(true)
            .with_regularizer(0.5)
            .with_constraint(0, 1, LinkType::MustLink)
            .with_constraint(2, 3, LinkType::CannotLink)
            .with_max_iterations(20)
            .build(two_groups())
            .unwrap();
        while !run.state().is_terminal() {
            run.step().unwrap();
            assert_metrics_valid(&run);
        }
    }
}

#[test]
fn test_set_metric_weights() {
    init();
    let mut run = MpckMeansBuilder::new().build(two_groups()).unwrap();
    assert!(matches!(
        run.set_metric_weights(0, MetricWeights::Diagonal(vec![2.0, 0.5])),
        Err(ClusteringError::Configuration(_))
    ));

    run.step().unwrap();
    assert!(matches!(
        run.set_metric_weights(0, MetricWeights::Diagonal(vec![0.0, 1.0])),
        Err(ClusteringError::Metric(MetricError::NonPositiveWeight { feature: 0, .. }))
    ));
    assert!(matches!(
        run.set_metric_weights(0, MetricWeights::Full(matrix::identity(2))),
        Err(ClusteringError::Metric(MetricError::WrongWeightKind(MetricFamily::Euclidean)))
    ));
    assert!(matches!(
        run.set_metric_weights(2, MetricWeights::Diagonal(vec![1.0, 1.0])),
        Err(ClusteringError::InvalidData(_))
    ));
    assert_eq!(run.metric().diagonal().unwrap(), &[1.0, 1.0]);

    run.set_metric_weights(1, MetricWeights::Diagonal(vec![2.0, 0.5]))
        .unwrap();
    assert_eq!(run.metric().diagonal().unwrap(), &[2.0, 0.5]);
    // the cannot-link bound follows the new weights
    let b = &run.context().bounds[0];
    assert_relative_eq!(
        b.max_distortion,
        run.metric().pair_distortion(&b.lo, &b.hi),
        epsilon = 1e-12
    );

    run.run().unwrap();
    assert_metrics_valid(&run);
}

#[test]
fn test_set_link_weights_applies_to_later_constraints() {
    init();
    let mut run = MpckMeansBuilder::new()
        .with_constraint(0, 1, LinkType::MustLink)
        .build(two_groups())
        .unwrap();
    run.set_link_weights(3.0, 7.0).unwrap();
    run.add_constraint(2, 3, LinkType::CannotLink).unwrap();

    assert_eq!(run.constraints().get(0, 1).unwrap().weight, 1.0);
    assert_eq!(run.constraints().get(2, 3).unwrap().weight, 7.0);
    assert_eq!(run.config().cannot_link_weight, 7.0);
    assert!(matches!(
        run.set_link_weights(-1.0, 1.0),
        Err(ClusteringError::Configuration(_))
    ));

    run.step().unwrap();
    assert!(matches!(
        run.set_link_weights(1.0, 1.0),
        Err(ClusteringError::Configuration(_))
    ));
}

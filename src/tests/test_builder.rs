use mpck_core::constraints::LinkType;
use mpck_core::metric::MetricFamily;

use crate::builder::{AssignerKind, LearnerKind, MpckConfig, MpckMeansBuilder, ViolationPenalty};
use crate::clustering::RunState;
use crate::core::Dataset;
use crate::error::ClusteringError;
use crate::tests::init;
use crate::tests::test_data::{BruteForceSolver, two_groups};

fn is_config_error<T>(res: Result<T, ClusteringError>) -> bool {
    matches!(res, Err(ClusteringError::Configuration(_)))
}

#[test]
fn test_default_config() {
    init();
    let cfg = MpckConfig::default();
    assert_eq!(cfg.num_clusters, 2);
    assert_eq!(cfg.metric, MetricFamily::Euclidean);
    assert_eq!(cfg.learner, LearnerKind::ClosedForm);
    assert_eq!(cfg.assigner, AssignerKind::Simple);
    assert_eq!(cfg.violation_penalty, ViolationPenalty::Constant);
    assert_eq!(cfg.log_term_weight, 1.0);
    assert_eq!(cfg.perturbation, 0.7);
    assert_eq!(cfg.lp_rounding_passes, 5000);
    assert!(cfg.use_transitive_closure);
    assert!(cfg.validate().is_ok());

    assert_eq!(MpckConfig::pck().learner, LearnerKind::None);
    assert!(MpckConfig::mpck_multiple_metrics().multiple_metrics);
}

#[test]
fn test_builder_creates_initial_run() {
    init();
    let run = MpckMeansBuilder::new()
        .with_num_clusters(2)
        .with_seed(7)
        .with_constraint(0, 1, LinkType::MustLink)
        .with_weighted_constraint(0, 3, LinkType::CannotLink, 5.0)
        .build(two_groups())
        .unwrap();

    assert_eq!(run.state(), RunState::Init);
    assert_eq!(run.config().seed, 7);
    assert_eq!(run.constraints().len(), 2);
    assert_eq!(run.constraints().get(0, 3).unwrap().weight, 5.0);
    assert!(run.objective_value().is_none());
}

#[test]
fn test_invalid_k() {
    init();
    assert!(is_config_error(
        MpckMeansBuilder::new().with_num_clusters(0).build(two_groups())
    ));
    assert!(is_config_error(
        MpckMeansBuilder::new().with_num_clusters(7).build(two_groups())
    ));
}

#[test]
fn test_unsupported_pairings() {
    init();
    let pairs = [
        (MetricFamily::Kl, LearnerKind::ClosedForm),
        (MetricFamily::Mahalanobis, LearnerKind::gradient_descent()),
        (MetricFamily::DotProduct, LearnerKind::ClosedForm),
        (MetricFamily::DotProduct, LearnerKind::gradient_descent()),
    ];
    for (metric, learner) in pairs {
        let res = MpckMeansBuilder::new()
            .with_metric(metric)
            .with_learner(learner)
            .build(two_groups());
        assert!(is_config_error(res), "{} + {} must be rejected", metric, learner);
    }

    let ok = MpckMeansBuilder::new()
        .with_metric(MetricFamily::DotProduct)
        .with_learner(LearnerKind::None)
        .build(two_groups());
    assert!(ok.is_ok());
}

#[test]
fn test_lp_assigner_requirements() {
    init();
    // no solver
    assert!(is_config_error(
        MpckMeansBuilder::new()
            .with_assigner(AssignerKind::Lp)
            .build(two_groups())
    ));
    // similarity metric
    assert!(is_config_error(
        MpckMeansBuilder::new()
            .with_assigner(AssignerKind::Lp)
            .with_metric(MetricFamily::DotProduct)
            .with_learner(LearnerKind::None)
            .with_lp_solver(Box::new(BruteForceSolver::default()))
            .build(two_groups())
    ));
    assert!(
        MpckMeansBuilder::new()
            .with_assigner(AssignerKind::Lp)
            .with_lp_solver(Box::new(BruteForceSolver::default()))
            .build(two_groups())
            .is_ok()
    );
}

#[test]
fn test_bad_parameters() {
    init();
    assert!(is_config_error(
        MpckMeansBuilder::new()
            .with_link_weights(-1.0, 1.0)
            .build(two_groups())
    ));
    assert!(is_config_error(
        MpckMeansBuilder::new()
            .with_perturbation(f64::NAN)
            .build(two_groups())
    ));
    assert!(is_config_error(
        MpckMeansBuilder::new()
            .with_max_iterations(0)
            .build(two_groups())
    ));
    assert!(is_config_error(
        MpckMeansBuilder::new()
            .with_stabilization(Some(0))
            .build(two_groups())
    ));
    assert!(is_config_error(
        MpckMeansBuilder::new()
            .with_learner(LearnerKind::GradientDescent {
                eta: 0.0,
                eta_decay: 0.9,
                min_weight: 1e-5
            })
            .build(two_groups())
    ));
}

#[test]
fn test_kl_requires_non_negative_data() {
    init();
    let data = Dataset::from_rows(vec![vec![0.5, -0.1], vec![0.2, 0.3]]).unwrap();
    assert!(is_config_error(
        MpckMeansBuilder::new()
            .with_metric(MetricFamily::Kl)
            .with_learner(LearnerKind::gradient_descent())
            .build(data)
    ));
}

#[test]
fn test_bad_constraints_rejected() {
    init();
    assert!(is_config_error(
        MpckMeansBuilder::new()
            .with_constraint(0, 6, LinkType::MustLink)
            .build(two_groups())
    ));
    assert!(is_config_error(
        MpckMeansBuilder::new()
            .with_constraint(2, 2, LinkType::CannotLink)
            .build(two_groups())
    ));
    assert!(is_config_error(
        MpckMeansBuilder::new()
            .with_weighted_constraint(0, 1, LinkType::CannotLink, -3.0)
            .build(two_groups())
    ));
}

#[test]
fn test_conflicting_constraint_is_not_an_error() {
    init();
    let run = MpckMeansBuilder::new()
        .with_constraint(0, 1, LinkType::MustLink)
        .with_constraint(1, 0, LinkType::CannotLink)
        .build(two_groups())
        .unwrap();
    assert_eq!(run.constraints().len(), 1);
    assert_eq!(run.constraints().lookup(0, 1), Some(LinkType::MustLink));
}

#[test]
fn test_regularizer_settings() {
    init();
    let cfg = MpckConfig::default();
    assert!(!cfg.regularize);
    assert_eq!(cfg.regularizer_weight, 0.001);
    assert_eq!(cfg.effective_regularizer_weight(), 0.0);

    let run = MpckMeansBuilder::new()
        .with_regularizer(0.25)
        .build(two_groups())
        .unwrap();
    assert!(run.config().regularize);
    assert_eq!(run.config().effective_regularizer_weight(), 0.25);

    assert!(is_config_error(
        MpckMeansBuilder::new()
            .with_regularizer(-0.1)
            .build(two_groups())
    ));
    assert!(is_config_error(
        MpckMeansBuilder::new()
            .with_regularizer(f64::INFINITY)
            .build(two_groups())
    ));
}

#[test]
fn test_out_of_range_constraint_names_the_instance() {
    init();
    let res = MpckMeansBuilder::new()
        .with_constraint(0, 1, LinkType::MustLink)
        .with_constraint(9, 2, LinkType::CannotLink)
        .build(two_groups());
    match res {
        Err(ClusteringError::Configuration(msg)) => assert!(msg.contains("instance 9"), "{}", msg),
        other => panic!("expected a configuration error, got {:?}", other.map(|r| r.state())),
    }
}

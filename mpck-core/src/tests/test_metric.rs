// mpck-core/src/tests/test_metric.rs

use approx::assert_relative_eq;

use crate::matrix;
use crate::metric::*;

#[test]
fn test_euclidean_unit_weights() {
    crate::init();
    let m = WeightedEuclidean::new(2);
    assert_relative_eq!(m.distortion(&[0.0, 0.0], &[3.0, 4.0]), 25.0);
    assert_relative_eq!(m.distance(&[0.0, 0.0], &[3.0, 4.0]), 5.0);
    assert_relative_eq!(m.log_normalizer(), 0.0);
    assert!(m.is_distance_based());
}

#[test]
fn test_euclidean_weights_scale_features() {
    crate::init();
    let mut m = WeightedEuclidean::new(2);
    m.set_weights(MetricWeights::Diagonal(vec![2.0, 0.5])).unwrap();
    assert_relative_eq!(m.distortion(&[1.0, 2.0], &[0.0, 0.0]), 2.0 + 2.0);
    assert_relative_eq!(m.log_normalizer(), 2.0_f64.ln() + 0.5_f64.ln());

    m.reset();
    assert_eq!(m.diag(), &[1.0, 1.0]);
}

#[test]
fn test_non_positive_weights_rejected() {
    crate::init();
    let mut m = WeightedEuclidean::new(3);
    let err = m
        .set_weights(MetricWeights::Diagonal(vec![1.0, 0.0, 1.0]))
        .unwrap_err();
    assert_eq!(
        err,
        MetricError::NonPositiveWeight {
            feature: 1,
            value: 0.0
        }
    );
    assert!(matches!(
        m.set_weights(MetricWeights::Diagonal(vec![1.0])),
        Err(MetricError::DimensionMismatch { expected: 3, got: 1 })
    ));
    assert!(matches!(
        m.set_weights(MetricWeights::Full(matrix::identity(3))),
        Err(MetricError::WrongWeightKind(MetricFamily::Euclidean))
    ));
    // untouched after failures
    assert_eq!(m.diag(), &[1.0, 1.0, 1.0]);
}

#[test]
fn test_mahalanobis_identity_matches_euclidean() {
    crate::init();
    let maha = WeightedMahalanobis::new(3);
    let eucl = WeightedEuclidean::new(3);
    let a = [1.0, -2.0, 0.5];
    let b = [0.0, 1.0, 2.5];
    assert_relative_eq!(maha.distortion(&a, &b), eucl.distortion(&a, &b), epsilon = 1e-12);
    assert_relative_eq!(maha.log_normalizer(), 0.0);
}

#[test]
fn test_mahalanobis_rejects_singular_matrix() {
    crate::init();
    let mut m = WeightedMahalanobis::new(2);
    let mut singular = matrix::zeros(2);
    matrix::add_outer(&mut singular, &[1.0, 1.0], 1.0);
    assert_eq!(
        m.set_weights(MetricWeights::Full(singular)),
        Err(MetricError::NotPositiveDefinite)
    );

    let a = matrix::from_rows(&[vec![2.0, 0.0], vec![0.0, 3.0]]);
    m.set_weights(MetricWeights::Full(a)).unwrap();
    assert_relative_eq!(m.log_normalizer(), 6.0_f64.ln(), epsilon = 1e-10);
    assert_relative_eq!(m.distortion(&[1.0, 1.0], &[0.0, 0.0]), 5.0, epsilon = 1e-12);
}

#[test]
fn test_mahalanobis_log_normalizer_with_pivoting_matrix() {
    crate::init();
    // strong off-diagonal coupling, det = 5 - 4 = 1
    let mut m = WeightedMahalanobis::new(2);
    let a = matrix::from_rows(&[vec![1.0, 2.0], vec![2.0, 5.0]]);
    m.set_weights(MetricWeights::Full(a)).unwrap();
    assert_relative_eq!(m.log_normalizer(), 0.0, epsilon = 1e-12);

    let b = matrix::from_rows(&[vec![1.0, 3.0], vec![3.0, 10.0]]);
    m.set_weights(MetricWeights::Full(b)).unwrap();
    assert!(m.log_normalizer().is_finite());
    assert_relative_eq!(m.log_normalizer(), 0.0, epsilon = 1e-12);
}

#[test]
fn test_kl_divergence_zero_on_identical() {
    crate::init();
    let m = WeightedKl::new(3);
    let p = [0.2, 0.5, 0.3];
    assert_relative_eq!(m.distortion(&p, &p), 0.0, epsilon = 1e-12);
    assert_relative_eq!(m.pair_distortion(&p, &p), 0.0, epsilon = 1e-12);
}

#[test]
fn test_kl_handles_zero_coordinates() {
    crate::init();
    let m = WeightedKl::new(2);
    let x = [0.0, 1.0];
    let c = [0.5, 0.5];
    let d = m.distortion(&x, &c);
    // 0.5 + (1 ln 2 - 1 + 0.5)
    assert_relative_eq!(d, 0.5 + 2.0_f64.ln() - 0.5, epsilon = 1e-12);

    let js = m.pair_distortion(&[1.0, 0.0], &[0.0, 1.0]);
    assert!(js.is_finite());
    assert!(js > 0.0);
    assert_relative_eq!(js, m.pair_distortion(&[0.0, 1.0], &[1.0, 0.0]), epsilon = 1e-12);
}

#[test]
fn test_dot_product_is_similarity_based() {
    crate::init();
    let m = WeightedDotProduct::new(2);
    assert!(!m.is_distance_based());
    assert_relative_eq!(m.similarity(&[1.0, 0.0], &[1.0, 0.0]), 1.0);
    assert_relative_eq!(m.distortion(&[1.0, 0.0], &[0.0, 1.0]), 1.0);
}

#[test]
fn test_learnable_metric_dispatch() {
    crate::init();
    let mut m = LearnableMetric::new(MetricFamily::Euclidean, 2);
    assert_eq!(m.family(), MetricFamily::Euclidean);
    assert_eq!(m.n_features(), 2);
    m.set_weights(MetricWeights::Diagonal(vec![4.0, 1.0])).unwrap();
    assert_eq!(m.diagonal(), Some(&[4.0, 1.0][..]));
    assert_relative_eq!(m.distortion(&[1.0, 1.0], &[0.0, 0.0]), 5.0);

    let comps = m.distortion_components(&[1.0, 3.0], &[0.0, 1.0]).unwrap();
    assert_eq!(comps, vec![1.0, 4.0]);

    let maha = LearnableMetric::new(MetricFamily::Mahalanobis, 2);
    assert!(maha.diagonal().is_none());
    assert!(maha.pair_components(&[0.0, 0.0], &[1.0, 1.0]).is_none());
}

#[test]
fn test_inverse_weight_regularizer() {
    crate::init();
    let mut m = LearnableMetric::new(MetricFamily::Euclidean, 2);
    assert_relative_eq!(m.regularizer(), -2.0);

    m.set_weights(MetricWeights::Diagonal(vec![2.0, 0.5])).unwrap();
    assert_relative_eq!(m.regularizer(), -(0.5 + 2.0));
    let g = m.regularizer_gradient().unwrap();
    assert_relative_eq!(g[0], 0.25);
    assert_relative_eq!(g[1], 4.0);

    let mut full = LearnableMetric::new(MetricFamily::Mahalanobis, 2);
    full.set_weights(MetricWeights::Full(matrix::from_rows(&[vec![4.0, 1.0], vec![1.0, 2.0]])))
        .unwrap();
    assert_relative_eq!(full.regularizer(), -(0.25 + 0.5));
    assert!(full.regularizer_gradient().is_none());
}

use approx::assert_abs_diff_eq;

use boreal_core::estimator::{
    ml_increment, robust_increment, weighted_mean, WeightedPoint, MEDIAN_EFFICIENCY,
};

#[test]
fn test_ml_increment_is_weighted_mean() {
    // Σ w·x = 2·1 + 1·4 = 6, Σ w = 3.
    let p = ml_increment(6.0, 3.0).unwrap();
    assert_abs_diff_eq!(p.value, 2.0);
    assert_abs_diff_eq!(p.weight, 3.0);
}

#[test]
fn test_zero_weight_yields_no_update() {
    assert!(ml_increment(1.0, 0.0).is_none());
    assert!(ml_increment(1.0, -2.0).is_none());
    assert!(robust_increment(&mut []).is_none());
    assert!(weighted_mean(&[WeightedPoint::new(5.0, 0.0)]).is_none());
}

#[test]
fn test_robust_recovers_level_under_outliers() {
    // 20 points near 1.0 plus one wild outlier.
    let mut points: Vec<WeightedPoint> = (0..20)
        .map(|i| WeightedPoint::new(1.0 + 0.01 * (i as f64 - 10.0), 1.0))
        .collect();
    points.push(WeightedPoint::new(1000.0, 1.0));

    let ml = weighted_mean(&points).unwrap();
    let robust = robust_increment(&mut points).unwrap();

    assert!(ml.value > 40.0, "ML should be dragged by the outlier");
    assert_abs_diff_eq!(robust.value, 1.0, epsilon = 0.1);
}

#[test]
fn test_robust_weight_carries_efficiency_penalty() {
    let mut points: Vec<WeightedPoint> =
        (0..10).map(|i| WeightedPoint::new(i as f64, 2.0)).collect();
    let robust = robust_increment(&mut points).unwrap();
    assert_abs_diff_eq!(robust.weight, MEDIAN_EFFICIENCY * 20.0, epsilon = 1e-12);
}

#[test]
fn test_two_points_fall_back_to_mean() {
    let mut points = vec![WeightedPoint::new(1.0, 1.0), WeightedPoint::new(3.0, 3.0)];
    let p = robust_increment(&mut points).unwrap();
    assert_abs_diff_eq!(p.value, 2.5);
    assert_abs_diff_eq!(p.weight, 4.0);
}

#[test]
fn test_weighted_median_respects_weights() {
    // Heavy point at 5.0 dominates half the weight.
    let mut points = vec![
        WeightedPoint::new(1.0, 1.0),
        WeightedPoint::new(2.0, 1.0),
        WeightedPoint::new(5.0, 10.0),
        WeightedPoint::new(9.0, 1.0),
    ];
    let p = robust_increment(&mut points).unwrap();
    assert_abs_diff_eq!(p.value, 5.0);
}

#[test]
fn test_median_ignores_minority_outlier_weight() {
    // Outlier mass just under half the total cannot move the median.
    let mut points: Vec<WeightedPoint> = (0..6).map(|_| WeightedPoint::new(1.0, 1.0)).collect();
    points.push(WeightedPoint::new(100.0, 5.0));
    let p = robust_increment(&mut points).unwrap();
    assert_abs_diff_eq!(p.value, 1.0);
}

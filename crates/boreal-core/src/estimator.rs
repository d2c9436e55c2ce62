//! The two increment estimators shared by the frame-resolution and
//! phase-binned decorrelation engines, and by gain solving.
//!
//! Callers accumulate either plain sums (maximum likelihood) or a buffer
//! of weighted points (robust), then ask for the increment. Both report
//! the accumulated weight so zero-weight blocks yield "no update" instead
//! of NaN.

use serde::{Deserialize, Serialize};

/// Which increment estimator a fit uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Estimator {
    /// Weighted mean: minimum variance when the noise is well behaved.
    MaximumLikelihood,
    /// Weighted median: tolerates outliers at a known cost in formal
    /// variance (see [`MEDIAN_EFFICIENCY`]).
    Robust,
}

/// Statistical efficiency of the median relative to the mean for Gaussian
/// noise. Robust estimates carry `efficiency * total_weight` so downstream
/// weighting accounts for the extra variance.
pub const MEDIAN_EFFICIENCY: f64 = 2.0 / std::f64::consts::PI;

/// A value with its statistical weight (inverse variance).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WeightedPoint {
    pub value: f64,
    pub weight: f64,
}

impl WeightedPoint {
    pub fn new(value: f64, weight: f64) -> Self {
        Self { value, weight }
    }
}

/// Maximum-likelihood increment from accumulated sums
/// `num = Σ w·x`, `den = Σ w`. `None` when the total weight is not
/// positive: the caller leaves the block unchanged.
pub fn ml_increment(num: f64, den: f64) -> Option<WeightedPoint> {
    if den > 0.0 {
        Some(WeightedPoint::new(num / den, den))
    } else {
        None
    }
}

/// Weighted mean of a point buffer.
pub fn weighted_mean(points: &[WeightedPoint]) -> Option<WeightedPoint> {
    let mut num = 0.0;
    let mut den = 0.0;
    for p in points {
        if p.weight > 0.0 {
            num += p.weight * p.value;
            den += p.weight;
        }
    }
    ml_increment(num, den)
}

/// Robust increment: the weighted median of `points`. Withstands any
/// contamination carrying less than half the total weight.
///
/// Zero-weight points must not be pushed into the buffer at all — a
/// channel with zero gain is skipped entirely, not included with weight
/// zero — so the cumulative walk here sees only genuine samples. The
/// reported weight is the total scaled by [`MEDIAN_EFFICIENCY`].
pub fn robust_increment(points: &mut [WeightedPoint]) -> Option<WeightedPoint> {
    if points.is_empty() {
        return None;
    }
    let total: f64 = points.iter().map(|p| p.weight).sum();
    if total <= 0.0 {
        return None;
    }
    if points.len() <= 2 {
        return weighted_mean(points).map(|mut p| {
            p.weight = total;
            p
        });
    }

    points.sort_unstable_by(|a, b| a.value.total_cmp(&b.value));

    // The median is the first point whose weight midpoint crosses half
    // the total.
    let target = 0.5 * total;
    let mut below = 0.0;
    for p in points.iter() {
        if below + 0.5 * p.weight >= target {
            return Some(WeightedPoint::new(p.value, MEDIAN_EFFICIENCY * total));
        }
        below += p.weight;
    }
    let last = points[points.len() - 1];
    Some(WeightedPoint::new(last.value, MEDIAN_EFFICIENCY * total))
}

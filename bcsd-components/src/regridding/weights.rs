//! One-dimensional interpolation weights
//!
//! Rectilinear grids are separable, so two-dimensional weights are the product of the
//! latitude and longitude weights computed here. Every function returns `None` when
//! the target cannot be mapped from the source axis.

use bcsd_core::series::FloatValue;
use ndarray::Array1;

/// Tolerance (degrees) when testing whether a coordinate lies inside a grid extent
pub const EXTENT_TOLERANCE: FloatValue = 1e-9;

/// `(source index, weight)` pairs contributing to one target position
pub type AxisWeights = Vec<(usize, FloatValue)>;

/// Range covered by an axis' cell bounds, lowest first
pub fn extent(bounds: &Array1<FloatValue>) -> (FloatValue, FloatValue) {
    let first = bounds[0];
    let last = bounds[bounds.len() - 1];
    (first.min(last), first.max(last))
}

fn inside(bounds: &Array1<FloatValue>, x: FloatValue) -> bool {
    let (lo, hi) = extent(bounds);
    x >= lo - EXTENT_TOLERANCE && x <= hi + EXTENT_TOLERANCE
}

/// Linear weights between the two centres bracketing `x`
///
/// Inside the extent but beyond the outermost centre the edge value is held.
pub fn bilinear(
    centres: &Array1<FloatValue>,
    bounds: &Array1<FloatValue>,
    x: FloatValue,
) -> Option<AxisWeights> {
    if !inside(bounds, x) {
        return None;
    }
    let n = centres.len();
    if n == 1 {
        return Some(vec![(0, 1.0)]);
    }

    // Walk the axis in ascending order regardless of its storage order
    let ascending = centres[n - 1] > centres[0];
    let at = |k: usize| if ascending { k } else { n - 1 - k };
    let c = |k: usize| centres[at(k)];

    if x <= c(0) {
        return Some(vec![(at(0), 1.0)]);
    }
    if x >= c(n - 1) {
        return Some(vec![(at(n - 1), 1.0)]);
    }

    let (mut lo, mut hi) = (0, n - 1);
    while hi - lo > 1 {
        let mid = (lo + hi) / 2;
        if c(mid) <= x {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    let frac = (x - c(lo)) / (c(hi) - c(lo));
    Some(vec![(at(lo), 1.0 - frac), (at(hi), frac)])
}

/// The single centre closest to `x`
pub fn nearest(
    centres: &Array1<FloatValue>,
    bounds: &Array1<FloatValue>,
    x: FloatValue,
) -> Option<AxisWeights> {
    if !inside(bounds, x) {
        return None;
    }
    centres
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| (*a - x).abs().total_cmp(&(*b - x).abs()))
        .map(|(i, _)| vec![(i, 1.0)])
}

/// Area measure of a coordinate interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Measure {
    /// Longitude: area is proportional to the width in degrees
    Degrees,
    /// Latitude: area is proportional to the difference of `sin(lat)`
    SineLatitude,
}

impl Measure {
    fn of(&self, lo: FloatValue, hi: FloatValue) -> FloatValue {
        match self {
            Measure::Degrees => hi - lo,
            Measure::SineLatitude => hi.to_radians().sin() - lo.to_radians().sin(),
        }
    }
}

/// Overlap-area weights of the source cells covering the target cell `[lo, hi]`
///
/// Weights are normalized by the covered area, so a target cell only partly inside
/// the source grid averages the cells it does overlap.
pub fn conservative(
    source_bounds: &Array1<FloatValue>,
    target: (FloatValue, FloatValue),
    measure: Measure,
) -> Option<AxisWeights> {
    let (t_lo, t_hi) = (target.0.min(target.1), target.0.max(target.1));
    let overlaps: AxisWeights = source_bounds
        .windows(2)
        .into_iter()
        .enumerate()
        .filter_map(|(i, edges)| {
            let (s_lo, s_hi) = (edges[0].min(edges[1]), edges[0].max(edges[1]));
            let (lo, hi) = (s_lo.max(t_lo), s_hi.min(t_hi));
            if hi > lo {
                Some((i, measure.of(lo, hi)))
            } else {
                None
            }
        })
        .collect();

    let total: FloatValue = overlaps.iter().map(|(_, w)| w).sum();
    if total > 0.0 {
        Some(overlaps.into_iter().map(|(i, w)| (i, w / total)).collect())
    } else {
        None
    }
}

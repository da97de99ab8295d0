//! Sparse-weight regridding between latitude/longitude grids
//!
//! [`SparseRegridder`] computes, for every destination cell, the source cells that
//! contribute to it and their weights. The resulting [`WeightedRegridOperator`] applies
//! those weights to every time step of a series.
//!
//! Supported methods:
//!
//! - `bilinear`: separable linear interpolation between the bracketing centres
//! - `nearest_s2d`: value of the nearest source centre
//! - `conservative`: area-weighted average of the overlapping source cells
//!
//! Sources must be rectilinear and carry cell bounds. Destinations may be rectilinear
//! grids or point sets (point sets only for `bilinear` and `nearest_s2d`). A destination
//! cell the source cannot cover is an error, never a NaN.

pub mod weights;

use bcsd_core::errors::{BCSDError, BCSDResult};
use bcsd_core::regrid::{RegridMethod, RegridOperator, Regridder};
use bcsd_core::series::{FloatValue, GriddedSeries, SpatialAxes};
use bcsd_core::spatial::GridDescriptor;
use log::debug;
use ndarray::{Array1, Array2};
use std::sync::Arc;
use weights::{AxisWeights, Measure};

type AxisRule = fn(&Array1<FloatValue>, &Array1<FloatValue>, FloatValue) -> Option<AxisWeights>;

/// `(source cell, weight)` pairs for every destination cell
#[derive(Debug, Clone, PartialEq)]
pub struct RegridWeights {
    rows: Vec<Vec<(usize, FloatValue)>>,
    n_source: usize,
}

impl RegridWeights {
    pub fn rows(&self) -> &[Vec<(usize, FloatValue)>] {
        &self.rows
    }

    pub fn n_source(&self) -> usize {
        self.n_source
    }

    pub fn n_destination(&self) -> usize {
        self.rows.len()
    }
}

/// A regridding operator backed by precomputed weights
#[derive(Debug, Clone)]
pub struct WeightedRegridOperator {
    source: GridDescriptor,
    destination: GridDescriptor,
    method: RegridMethod,
    weights: RegridWeights,
}

impl WeightedRegridOperator {
    pub fn method(&self) -> &RegridMethod {
        &self.method
    }

    pub fn weights(&self) -> &RegridWeights {
        &self.weights
    }
}

impl RegridOperator for WeightedRegridOperator {
    fn source(&self) -> &GridDescriptor {
        &self.source
    }

    fn destination(&self) -> &GridDescriptor {
        &self.destination
    }

    fn apply(&self, series: &GriddedSeries) -> BCSDResult<GriddedSeries> {
        if series.axes() != self.source.axes() {
            return Err(BCSDError::incompatible(format!(
                "{} is not on the source grid of this {} operator",
                series.name(),
                self.method
            )));
        }

        let input = series.values();
        let mut values = Array2::zeros((series.n_times(), self.weights.n_destination()));
        for (t, mut row) in values.outer_iter_mut().enumerate() {
            for (out, contributions) in row.iter_mut().zip(&self.weights.rows) {
                *out = contributions
                    .iter()
                    .map(|&(cell, w)| w * input[[t, cell]])
                    .sum();
            }
        }

        series.relocated(
            self.destination.axes().clone(),
            self.destination.bounds().cloned(),
            values,
        )
    }
}

/// Builds [`WeightedRegridOperator`]s for rectilinear sources
#[derive(Debug, Clone, Copy, Default)]
pub struct SparseRegridder;

impl SparseRegridder {
    pub fn new() -> Self {
        Self
    }

    /// Compute the weights for mapping `source` onto `destination`
    pub fn weights(
        &self,
        source: &GridDescriptor,
        destination: &GridDescriptor,
        method: &RegridMethod,
    ) -> BCSDResult<RegridWeights> {
        let (src_lat, src_lon) = match source.axes() {
            SpatialAxes::Rectilinear { lat, lon } => (lat, lon),
            SpatialAxes::Points { .. } => {
                return Err(BCSDError::incompatible(
                    "regridding source must be a rectilinear grid",
                ))
            }
        };
        let src_bounds = source.require_bounds("regridding source")?;
        if src_lat.is_empty() || src_lon.is_empty() {
            return Err(BCSDError::incompatible("regridding source has no cells"));
        }

        let axis_rule: AxisRule = match method {
            RegridMethod::Bilinear => weights::bilinear,
            RegridMethod::Nearest => weights::nearest,
            RegridMethod::Conservative => return conservative_weights(source, destination),
            RegridMethod::Other(name) => {
                return Err(BCSDError::UnsupportedRegridMethod(name.clone()))
            }
        };

        let lat_weights = |y: FloatValue| axis_rule(src_lat, &src_bounds.lat_b, y);
        let lon_weights = |x: FloatValue| axis_rule(src_lon, &src_bounds.lon_b, x);

        let rows: Vec<Option<Vec<(usize, FloatValue)>>> = match destination.axes() {
            SpatialAxes::Rectilinear { lat, lon } => {
                let per_lat: Vec<_> = lat.iter().map(|&y| lat_weights(y)).collect();
                let per_lon: Vec<_> = lon.iter().map(|&x| lon_weights(x)).collect();
                per_lat
                    .iter()
                    .flat_map(|wy| per_lon.iter().map(move |wx| combine(wy, wx, src_lon.len())))
                    .collect()
            }
            SpatialAxes::Points { lat, lon } => lat
                .iter()
                .zip(lon.iter())
                .map(|(&y, &x)| combine(&lat_weights(y), &lon_weights(x), src_lon.len()))
                .collect(),
        };

        collect_rows(rows, source, destination)
    }
}

/// Outer product of latitude and longitude weights, as flat source cell indices
fn combine(
    lat: &Option<AxisWeights>,
    lon: &Option<AxisWeights>,
    nx: usize,
) -> Option<Vec<(usize, FloatValue)>> {
    let (lat, lon) = (lat.as_ref()?, lon.as_ref()?);
    Some(
        lat.iter()
            .flat_map(|&(iy, wy)| lon.iter().map(move |&(ix, wx)| (iy * nx + ix, wy * wx)))
            .filter(|&(_, w)| w != 0.0)
            .collect(),
    )
}

fn conservative_weights(
    source: &GridDescriptor,
    destination: &GridDescriptor,
) -> BCSDResult<RegridWeights> {
    let src_bounds = source.require_bounds("conservative regridding")?;
    let dst_bounds = destination.require_bounds("conservative regridding")?;
    let nx = src_bounds.lon_b.len() - 1;

    let cells = |b: &Array1<FloatValue>| -> Vec<(FloatValue, FloatValue)> {
        b.windows(2).into_iter().map(|w| (w[0], w[1])).collect()
    };
    let per_lat: Vec<_> = cells(&dst_bounds.lat_b)
        .into_iter()
        .map(|cell| weights::conservative(&src_bounds.lat_b, cell, Measure::SineLatitude))
        .collect();
    let per_lon: Vec<_> = cells(&dst_bounds.lon_b)
        .into_iter()
        .map(|cell| weights::conservative(&src_bounds.lon_b, cell, Measure::Degrees))
        .collect();

    let rows = per_lat
        .iter()
        .flat_map(|wy| per_lon.iter().map(move |wx| combine(wy, wx, nx)))
        .collect();
    collect_rows(rows, source, destination)
}

fn collect_rows(
    rows: Vec<Option<Vec<(usize, FloatValue)>>>,
    source: &GridDescriptor,
    destination: &GridDescriptor,
) -> BCSDResult<RegridWeights> {
    let unmapped = rows.iter().filter(|r| r.is_none()).count();
    if unmapped > 0 {
        let extent = source
            .bounds()
            .map(|b| {
                let (lat_lo, lat_hi) = weights::extent(&b.lat_b);
                let (lon_lo, lon_hi) = weights::extent(&b.lon_b);
                format!("lat [{lat_lo}, {lat_hi}], lon [{lon_lo}, {lon_hi}]")
            })
            .unwrap_or_default();
        return Err(BCSDError::incompatible(format!(
            "{unmapped} of {} destination cells lie outside the source grid ({extent})",
            rows.len()
        )));
    }
    Ok(RegridWeights {
        rows: rows.into_iter().flatten().collect(),
        n_source: source.size(),
    })
}

impl Regridder for SparseRegridder {
    fn build(
        &self,
        source: &GridDescriptor,
        destination: &GridDescriptor,
        method: &RegridMethod,
    ) -> BCSDResult<Arc<dyn RegridOperator>> {
        let weights = self.weights(source, destination, method)?;
        debug!(
            "Built {method} weights for {} source and {} destination cells",
            weights.n_source(),
            weights.n_destination()
        );
        Ok(Arc::new(WeightedRegridOperator {
            source: source.clone(),
            destination: destination.clone(),
            method: method.clone(),
            weights,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use bcsd_core::spatial::{harmonize, Regularity};
    use chrono::NaiveDate;
    use ndarray::array;

    fn grid(lat: Array1<FloatValue>, lon: Array1<FloatValue>) -> GridDescriptor {
        let series = field("grid", lat, lon, |_, _| 0.0);
        harmonize(&series, Regularity::Validate).unwrap()
    }

    fn field(
        name: &str,
        lat: Array1<FloatValue>,
        lon: Array1<FloatValue>,
        f: impl Fn(FloatValue, FloatValue) -> FloatValue,
    ) -> GriddedSeries {
        let axes = SpatialAxes::rectilinear(lat, lon);
        let centres = axes.cell_centres();
        let time = vec![
            NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2000, 2, 1).unwrap(),
        ];
        let values = Array2::from_shape_fn((2, centres.len()), |(t, c)| {
            let (y, x) = centres[c];
            f(y, x) + t as FloatValue
        });
        GriddedSeries::new(name, time, axes, values).unwrap()
    }

    fn axis(start: FloatValue, step: FloatValue, n: usize) -> Array1<FloatValue> {
        Array1::from_iter((0..n).map(|i| start + i as FloatValue * step))
    }

    fn regrid(series: &GriddedSeries, destination: &GridDescriptor, method: RegridMethod) -> BCSDResult<GriddedSeries> {
        let source = harmonize(series, Regularity::Validate)?;
        SparseRegridder.build(&source, destination, &method)?.apply(series)
    }

    #[test]
    fn bilinear_reproduces_linear_fields() {
        let series = field("tas", axis(30.0, 1.0, 6), axis(-110.0, 1.0, 6), |y, x| 2.0 * y - x);
        let destination = grid(axis(30.5, 0.5, 8), axis(-109.75, 0.5, 9));
        let out = regrid(&series, &destination, RegridMethod::Bilinear).unwrap();

        assert_eq!(out.n_times(), 2);
        assert_eq!(out.time(), series.time());
        assert_eq!(out.axes(), destination.axes());
        for (c, (y, x)) in out.axes().cell_centres().into_iter().enumerate() {
            assert_abs_diff_eq!(out.values()[[0, c]], 2.0 * y - x, epsilon = 1e-9);
            assert_abs_diff_eq!(out.values()[[1, c]], 2.0 * y - x + 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn round_trip_of_a_smooth_field() {
        let smooth = |y: FloatValue, x: FloatValue| (4.0 * y.to_radians()).sin() + (3.0 * x.to_radians()).cos();
        let fine = field("tas", axis(30.0, 0.5, 21), axis(-110.0, 0.5, 21), smooth);
        let coarse = grid(axis(30.0, 1.0, 11), axis(-110.0, 1.0, 11));
        let fine_grid = harmonize(&fine, Regularity::Validate).unwrap();

        let there = regrid(&fine, &coarse, RegridMethod::Bilinear).unwrap();
        let back = regrid(&there, &fine_grid, RegridMethod::Bilinear).unwrap();

        assert_eq!(back.axes(), fine.axes());
        for (a, b) in fine.values().iter().zip(back.values().iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 2e-3);
        }
    }

    #[test]
    fn weights_sum_to_one() {
        let source = grid(axis(30.0, 1.0, 4), axis(0.0, 1.0, 5));
        let destination = grid(axis(30.2, 0.7, 4), axis(0.1, 0.9, 4));
        for method in [RegridMethod::Bilinear, RegridMethod::Nearest, RegridMethod::Conservative] {
            let weights = SparseRegridder.weights(&source, &destination, &method).unwrap();
            assert_eq!(weights.n_destination(), 16);
            for row in weights.rows() {
                let total: FloatValue = row.iter().map(|(_, w)| w).sum();
                assert_abs_diff_eq!(total, 1.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn conservative_preserves_block_means() {
        // 0.5 degree cells aggregated onto 1 degree cells away from the poles
        let series = field("pr", axis(-0.75, 0.5, 4), axis(0.25, 0.5, 4), |_, x| x);
        let destination = grid(axis(-0.5, 1.0, 2), axis(0.5, 1.0, 2));
        let out = regrid(&series, &destination, RegridMethod::Conservative).unwrap();
        // Longitude weights are exact, so each block mean is the mean of its two columns
        assert_abs_diff_eq!(out.values()[[0, 0]], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(out.values()[[0, 1]], 1.5, epsilon = 1e-12);
    }

    #[test]
    fn nearest_onto_points() {
        let series = field("tas", axis(40.0, 1.0, 3), axis(-105.0, 1.0, 3), |y, x| 100.0 * y + x);
        let points = SpatialAxes::points(array![40.9, 41.2], array![-104.6, -103.4]).unwrap();
        let target = GriddedSeries::new(
            "target",
            vec![NaiveDate::from_ymd_opt(2000, 1, 1).unwrap()],
            points,
            Array2::zeros((1, 2)),
        )
        .unwrap();
        let destination = GridDescriptor::target(&target, Regularity::Validate).unwrap();

        let out = regrid(&series, &destination, RegridMethod::Nearest).unwrap();
        assert_eq!(out.values()[[0, 0]], 100.0 * 41.0 - 105.0);
        assert_eq!(out.values()[[0, 1]], 100.0 * 41.0 - 103.0);
    }

    #[test]
    fn disjoint_grids_are_incompatible() {
        let series = field("tas", axis(30.0, 1.0, 3), axis(0.0, 1.0, 3), |_, _| 1.0);
        let destination = grid(axis(-40.0, 1.0, 3), axis(100.0, 1.0, 3));
        for method in [RegridMethod::Bilinear, RegridMethod::Nearest, RegridMethod::Conservative] {
            let result = regrid(&series, &destination, method);
            assert!(matches!(result, Err(BCSDError::GridIncompatible { .. })));
        }
    }

    #[test]
    fn partial_overlap_is_incompatible_not_nan() {
        let series = field("tas", axis(30.0, 1.0, 3), axis(0.0, 1.0, 3), |_, _| 1.0);
        let destination = grid(axis(31.0, 1.0, 3), axis(0.0, 1.0, 3));
        let result = regrid(&series, &destination, RegridMethod::Bilinear);
        assert!(matches!(result, Err(BCSDError::GridIncompatible { .. })));
    }

    #[test]
    fn conservative_needs_destination_bounds() {
        let source = grid(axis(30.0, 1.0, 3), axis(0.0, 1.0, 3));
        let points = SpatialAxes::points(array![31.0], array![1.0]).unwrap();
        let target = GriddedSeries::new(
            "target",
            vec![NaiveDate::from_ymd_opt(2000, 1, 1).unwrap()],
            points,
            Array2::zeros((1, 1)),
        )
        .unwrap();
        let destination = GridDescriptor::target(&target, Regularity::Validate).unwrap();
        let result = SparseRegridder.weights(&source, &destination, &RegridMethod::Conservative);
        assert!(matches!(result, Err(BCSDError::GridIncompatible { .. })));
    }

    #[test]
    fn unknown_method_is_unsupported() {
        let source = grid(axis(30.0, 1.0, 3), axis(0.0, 1.0, 3));
        let result = SparseRegridder.build(&source, &source, &RegridMethod::from("patch"));
        assert_eq!(
            result.unwrap_err(),
            BCSDError::UnsupportedRegridMethod("patch".to_string())
        );
    }

    #[test]
    fn operator_rejects_series_on_another_grid() {
        let a = field("a", axis(30.0, 1.0, 3), axis(0.0, 1.0, 3), |_, _| 1.0);
        let b = field("b", axis(30.0, 1.0, 3), axis(0.5, 1.0, 3), |_, _| 1.0);
        let source = harmonize(&a, Regularity::Validate).unwrap();
        let operator = SparseRegridder.build(&source, &source, &RegridMethod::Bilinear).unwrap();
        assert!(operator.apply(&a).is_ok());
        assert!(matches!(operator.apply(&b), Err(BCSDError::GridIncompatible { .. })));
    }

    #[test]
    fn missing_values_propagate() {
        let mut series = field("pr", axis(30.0, 1.0, 2), axis(0.0, 1.0, 2), |_, _| 1.0);
        let mut values = series.values().to_owned();
        values[[0, 0]] = FloatValue::NAN;
        series = series.with_values(values).unwrap();

        let destination = grid(axis(30.25, 0.5, 2), axis(0.25, 0.5, 2));
        let out = regrid(&series, &destination, RegridMethod::Bilinear).unwrap();
        assert!(out.values()[[0, 0]].is_nan());
        assert!(!out.values()[[1, 0]].is_nan());
    }
}

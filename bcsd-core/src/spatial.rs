//! Grid geometry and harmonization
//!
//! Regridding needs the cell boundaries of the source grid as well as its centres.
//! Model and observation files usually only carry centres, so [`harmonize`] derives
//! boundaries for a regular latitude/longitude grid and returns them as a new
//! [`GridDescriptor`]; the input series is never modified.
//!
//! # Examples
//!
//! ```rust
//! use bcsd_core::spatial::{GeoBounds, GridDescriptor};
//!
//! // 1 degree analysis grid covering a box of cell centres
//! let bounds = GeoBounds { lat_min: 30.0, lat_max: 32.0, lon_min: -110.0, lon_max: -107.5 };
//! let grid = GridDescriptor::uniform(&bounds, 1.0).unwrap();
//!
//! assert_eq!(grid.shape(), (2, 3));
//! assert_eq!(grid.axes().lat()[0], 30.5);
//! assert_eq!(grid.bounds().unwrap().lon_b[3], -107.0);
//! ```

use crate::errors::{BCSDError, BCSDResult};
use crate::series::{CellBounds, FloatValue, GriddedSeries, SpatialAxes};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Relative tolerance used when checking that a grid axis is evenly spaced
pub const REGULARITY_TOLERANCE: FloatValue = 1e-6;

/// Policy for grids whose spacing is not uniform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regularity {
    /// Reject axes whose spacing varies by more than [`REGULARITY_TOLERANCE`]
    #[default]
    Validate,
    /// Derive boundaries from the first step only, without checking the rest of the axis
    Assume,
}

/// Latitude/longitude extent of a set of cell centres
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    pub lat_min: FloatValue,
    pub lat_max: FloatValue,
    pub lon_min: FloatValue,
    pub lon_max: FloatValue,
}

impl GeoBounds {
    /// Extent of the cell centres of a layout
    ///
    /// NaN coordinates are ignored. Fails if the layout has no cells.
    pub fn of(axes: &SpatialAxes) -> BCSDResult<Self> {
        let (lat_min, lat_max) = min_max(axes.lat())?;
        let (lon_min, lon_max) = min_max(axes.lon())?;
        Ok(Self {
            lat_min,
            lat_max,
            lon_min,
            lon_max,
        })
    }
}

fn min_max(values: &Array1<FloatValue>) -> BCSDResult<(FloatValue, FloatValue)> {
    values
        .iter()
        .filter(|v| !v.is_nan())
        .fold(None, |acc: Option<(FloatValue, FloatValue)>, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
        .ok_or_else(|| BCSDError::GridGeometry("layout has no valid coordinates".to_string()))
}

/// Spatial geometry consumed by a regridding operator
///
/// Grids used as a regridding source are always rectilinear and carry cell bounds.
/// Destinations may be point sets, which have no bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridDescriptor {
    axes: SpatialAxes,
    bounds: Option<CellBounds>,
}

impl GridDescriptor {
    /// Create a rectilinear descriptor from explicit centres and boundaries
    pub fn new(
        lat: Array1<FloatValue>,
        lon: Array1<FloatValue>,
        lat_b: Array1<FloatValue>,
        lon_b: Array1<FloatValue>,
    ) -> BCSDResult<Self> {
        let axes = SpatialAxes::rectilinear(lat, lon);
        let bounds = CellBounds::new(lat_b, lon_b);
        bounds.check_against(&axes)?;
        Ok(Self {
            axes,
            bounds: Some(bounds),
        })
    }

    /// Uniform grid of `step` degree cells laid over `bounds`
    ///
    /// Cell boundaries start at the minimum of each axis and advance by `step` until
    /// they reach the maximum, so the cells cover every point of the box. Centres sit
    /// midway between boundaries and never pass the maximum: a last cell that overhangs
    /// the box has its centre clamped to the edge. An axis with no extent gets one cell
    /// centred on it.
    pub fn uniform(bounds: &GeoBounds, step: FloatValue) -> BCSDResult<Self> {
        if !(step.is_finite() && step > 0.0) {
            return Err(BCSDError::GridGeometry(format!(
                "grid spacing must be positive, got {step}"
            )));
        }
        let (lat, lat_b) = uniform_axis(bounds.lat_min, bounds.lat_max, step);
        let (lon, lon_b) = uniform_axis(bounds.lon_min, bounds.lon_max, step);
        Self::new(lat, lon, lat_b, lon_b)
    }

    /// Destination geometry for a series
    ///
    /// Uses the series' bounds if present, derives them if the grid allows it, and
    /// otherwise describes the cell centres only.
    pub fn target(series: &GriddedSeries, regularity: Regularity) -> BCSDResult<Self> {
        match harmonize(series, regularity) {
            Ok(grid) => Ok(grid),
            Err(BCSDError::GridGeometry(_)) => Ok(Self {
                axes: series.axes().clone(),
                bounds: None,
            }),
            Err(e) => Err(e),
        }
    }

    pub fn axes(&self) -> &SpatialAxes {
        &self.axes
    }

    pub fn bounds(&self) -> Option<&CellBounds> {
        self.bounds.as_ref()
    }

    /// Bounds, or an error naming the operation that needs them
    pub fn require_bounds(&self, purpose: &str) -> BCSDResult<&CellBounds> {
        self.bounds.as_ref().ok_or_else(|| {
            BCSDError::incompatible(format!("{purpose} requires cell bounds on the grid"))
        })
    }

    /// `(ny, nx)` for rectilinear grids, `(1, n)` for point sets
    pub fn shape(&self) -> (usize, usize) {
        match &self.axes {
            SpatialAxes::Rectilinear { lat, lon } => (lat.len(), lon.len()),
            SpatialAxes::Points { lat, .. } => (1, lat.len()),
        }
    }

    pub fn size(&self) -> usize {
        self.axes.size()
    }

    /// Exact structural identity of the geometry, suitable as a cache key
    pub fn structural_key(&self) -> GridKey {
        let bits = |a: &Array1<FloatValue>| a.iter().map(|v| v.to_bits()).collect::<Vec<_>>();
        GridKey {
            rectilinear: self.axes.is_rectilinear(),
            lat: bits(self.axes.lat()),
            lon: bits(self.axes.lon()),
            lat_b: self.bounds.as_ref().map(|b| bits(&b.lat_b)),
            lon_b: self.bounds.as_ref().map(|b| bits(&b.lon_b)),
        }
    }
}

/// Bitwise identity of a [`GridDescriptor`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GridKey {
    rectilinear: bool,
    lat: Vec<u64>,
    lon: Vec<u64>,
    lat_b: Option<Vec<u64>>,
    lon_b: Option<Vec<u64>>,
}

/// `(centres, boundaries)` of one axis of a uniform grid
fn uniform_axis(
    min: FloatValue,
    max: FloatValue,
    step: FloatValue,
) -> (Array1<FloatValue>, Array1<FloatValue>) {
    let cells = ((max - min) / step - 1e-9).ceil().max(0.0) as usize;
    if cells == 0 {
        let centres = Array1::from_elem(1, min);
        let edges = boundaries(&centres, step);
        return (centres, edges);
    }
    let edges = Array1::from_iter((0..=cells).map(|i| min + i as FloatValue * step));
    let centres = Array1::from_iter(
        edges
            .windows(2)
            .into_iter()
            .map(|w| (0.5 * (w[0] + w[1])).min(max)),
    );
    (centres, edges)
}

fn boundaries(centres: &Array1<FloatValue>, step: FloatValue) -> Array1<FloatValue> {
    let n = centres.len();
    Array1::from_iter(
        centres
            .iter()
            .map(|c| c - 0.5 * step)
            .chain(std::iter::once(centres[n - 1] + 0.5 * step)),
    )
}

/// Step of a regular axis, taken from its first two centres
fn axis_step(name: &str, centres: &Array1<FloatValue>, regularity: Regularity) -> BCSDResult<FloatValue> {
    if centres.len() < 2 {
        return Err(BCSDError::GridGeometry(format!(
            "cannot infer the {name} spacing from {} coordinate(s)",
            centres.len()
        )));
    }
    let step = centres[1] - centres[0];
    if !(step.is_finite() && step != 0.0) {
        return Err(BCSDError::GridGeometry(format!(
            "{name} spacing must be non-zero, got {step}"
        )));
    }
    if regularity == Regularity::Validate {
        let tolerance = REGULARITY_TOLERANCE * step.abs();
        if let Some(i) = centres
            .windows(2)
            .into_iter()
            .position(|w| ((w[1] - w[0]) - step).abs() > tolerance)
        {
            return Err(BCSDError::GridGeometry(format!(
                "{name} axis is not regular: step {} between indices {i} and {} differs from {step}",
                centres[i + 1] - centres[i],
                i + 1
            )));
        }
    }
    Ok(step)
}

/// Derive the regridding geometry of a series on a regular latitude/longitude grid
///
/// Existing bounds on the series are reused unchanged. Otherwise each axis gets `N+1`
/// boundaries: `centre[i] - step/2` for every centre plus a trailing
/// `centre[N-1] + step/2`, with `step` taken from the first two centres.
pub fn harmonize(series: &GriddedSeries, regularity: Regularity) -> BCSDResult<GridDescriptor> {
    let (lat, lon) = match series.axes() {
        SpatialAxes::Rectilinear { lat, lon } => (lat, lon),
        SpatialAxes::Points { .. } => {
            return Err(BCSDError::GridGeometry(format!(
                "{} is a point set; cell bounds need a rectilinear grid",
                series.name()
            )))
        }
    };

    if let Some(bounds) = series.bounds() {
        return Ok(GridDescriptor {
            axes: series.axes().clone(),
            bounds: Some(bounds.clone()),
        });
    }

    let lat_step = axis_step("latitude", lat, regularity)?;
    let lon_step = axis_step("longitude", lon, regularity)?;
    GridDescriptor::new(
        lat.clone(),
        lon.clone(),
        boundaries(lat, lat_step),
        boundaries(lon, lon_step),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use chrono::NaiveDate;
    use ndarray::{array, Array2};

    fn series_on(lat: Array1<FloatValue>, lon: Array1<FloatValue>) -> GriddedSeries {
        let n = lat.len() * lon.len();
        GriddedSeries::new(
            "tas",
            vec![NaiveDate::from_ymd_opt(2000, 1, 1).unwrap()],
            SpatialAxes::rectilinear(lat, lon),
            Array2::zeros((1, n)),
        )
        .unwrap()
    }

    #[test]
    fn boundaries_are_offset_by_half_a_step() {
        let step = 0.25;
        let lat = Array1::from_iter((0..5).map(|i| 40.0 + i as FloatValue * step));
        let lon = Array1::from_iter((0..3).map(|i| -100.0 + i as FloatValue * step));
        let grid = harmonize(&series_on(lat.clone(), lon.clone()), Regularity::Validate).unwrap();
        let bounds = grid.bounds().unwrap();

        assert_eq!(bounds.lat_b.len(), lat.len() + 1);
        assert_eq!(bounds.lon_b.len(), lon.len() + 1);
        for i in 0..lat.len() {
            assert_abs_diff_eq!(bounds.lat_b[i], lat[i] - step / 2.0, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(bounds.lat_b[5], lat[4] + step / 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(bounds.lon_b[3], lon[2] + step / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn descending_latitude_keeps_its_orientation() {
        let grid = harmonize(
            &series_on(array![42.0, 41.0, 40.0], array![0.0, 1.0]),
            Regularity::Validate,
        )
        .unwrap();
        assert_eq!(grid.bounds().unwrap().lat_b, array![42.5, 41.5, 40.5, 39.5]);
    }

    #[test]
    fn existing_bounds_are_reused() {
        let bounds = CellBounds::new(array![39.0, 41.0], array![-1.0, 1.0]);
        let series = series_on(array![40.0], array![0.0])
            .with_bounds(bounds.clone())
            .unwrap();
        let grid = harmonize(&series, Regularity::Validate).unwrap();
        assert_eq!(grid.bounds(), Some(&bounds));
    }

    #[test]
    fn harmonize_does_not_touch_the_input() {
        let series = series_on(array![40.0, 41.0], array![0.0, 1.0]);
        let before = series.clone();
        harmonize(&series, Regularity::Validate).unwrap();
        assert_eq!(series, before);
        assert!(series.bounds().is_none());
    }

    #[test]
    fn irregular_axis_is_rejected_when_validating() {
        let series = series_on(array![40.0, 41.0, 43.0], array![0.0, 1.0]);
        let result = harmonize(&series, Regularity::Validate);
        assert!(matches!(result, Err(BCSDError::GridGeometry(_))));
    }

    #[test]
    fn irregular_axis_propagates_first_step_when_assumed() {
        let series = series_on(array![40.0, 41.0, 43.0], array![0.0, 1.0]);
        let grid = harmonize(&series, Regularity::Assume).unwrap();
        // The last boundary is derived from the first step, not the actual spacing
        assert_eq!(grid.bounds().unwrap().lat_b, array![39.5, 40.5, 42.5, 43.5]);
    }

    #[test]
    fn single_cell_without_bounds_is_rejected() {
        let series = series_on(array![40.0], array![0.0, 1.0]);
        assert!(matches!(
            harmonize(&series, Regularity::Validate),
            Err(BCSDError::GridGeometry(_))
        ));
    }

    #[test]
    fn points_cannot_be_harmonized_but_can_be_targets() {
        let axes = SpatialAxes::points(array![40.2, 41.7], array![-105.1, -104.3]).unwrap();
        let series = GriddedSeries::new(
            "pr",
            vec![NaiveDate::from_ymd_opt(2000, 1, 1).unwrap()],
            axes.clone(),
            Array2::zeros((1, 2)),
        )
        .unwrap();

        assert!(harmonize(&series, Regularity::Validate).is_err());
        let target = GridDescriptor::target(&series, Regularity::Validate).unwrap();
        assert_eq!(target.axes(), &axes);
        assert!(target.bounds().is_none());
        assert_eq!(target.shape(), (1, 2));
    }

    #[test]
    fn uniform_grid_covers_the_box() {
        let bounds = GeoBounds {
            lat_min: 30.0,
            lat_max: 31.7,
            lon_min: -110.0,
            lon_max: -110.0,
        };
        let grid = GridDescriptor::uniform(&bounds, 1.0).unwrap();
        assert_eq!(grid.axes().lat(), &array![30.5, 31.5]);
        assert_eq!(grid.bounds().unwrap().lat_b, array![30.0, 31.0, 32.0]);
        assert_eq!(grid.axes().lon(), &array![-110.0]);
        assert_eq!(grid.bounds().unwrap().lon_b, array![-110.5, -109.5]);
    }

    #[test]
    fn uniform_grid_centres_stay_inside_the_box() {
        // 0.1 degree observations from 30.0 to 31.2 under a 1 degree grid
        let bounds = GeoBounds {
            lat_min: 30.0,
            lat_max: 31.2,
            lon_min: -100.0,
            lon_max: -98.0,
        };
        let grid = GridDescriptor::uniform(&bounds, 1.0).unwrap();
        assert_eq!(grid.axes().lat(), &array![30.5, 31.2]);
        assert_eq!(grid.bounds().unwrap().lat_b, array![30.0, 31.0, 32.0]);
        assert_eq!(grid.axes().lon(), &array![-99.5, -98.5]);
        assert_eq!(grid.bounds().unwrap().lon_b, array![-100.0, -99.0, -98.0]);
    }

    #[test]
    fn uniform_grid_is_never_larger_than_the_box_needs() {
        let bounds = GeoBounds {
            lat_min: 30.0,
            lat_max: 31.7,
            lon_min: -100.0,
            lon_max: -98.3,
        };
        let grid = GridDescriptor::uniform(&bounds, 1.0).unwrap();
        assert_eq!(grid.shape(), (2, 2));
        for &lat in grid.axes().lat() {
            assert!((bounds.lat_min..=bounds.lat_max).contains(&lat));
        }
        for &lon in grid.axes().lon() {
            assert!((bounds.lon_min..=bounds.lon_max).contains(&lon));
        }
    }

    #[test]
    fn uniform_grid_rejects_bad_step() {
        let bounds = GeoBounds {
            lat_min: 0.0,
            lat_max: 1.0,
            lon_min: 0.0,
            lon_max: 1.0,
        };
        assert!(GridDescriptor::uniform(&bounds, 0.0).is_err());
        assert!(GridDescriptor::uniform(&bounds, FloatValue::NAN).is_err());
    }

    #[test]
    fn geo_bounds_of_points() {
        let axes = SpatialAxes::points(array![40.2, 38.0, 41.7], array![-105.1, -99.0, -104.3]).unwrap();
        let bounds = GeoBounds::of(&axes).unwrap();
        assert_eq!(bounds.lat_min, 38.0);
        assert_eq!(bounds.lat_max, 41.7);
        assert_eq!(bounds.lon_min, -105.1);
        assert_eq!(bounds.lon_max, -99.0);
    }

    #[test]
    fn structural_key_distinguishes_geometry() {
        let a = GridDescriptor::new(array![0.0], array![0.0], array![-0.5, 0.5], array![-0.5, 0.5]).unwrap();
        let b = GridDescriptor::new(array![0.0], array![0.0], array![-1.0, 1.0], array![-0.5, 0.5]).unwrap();
        assert_eq!(a.structural_key(), a.clone().structural_key());
        assert_ne!(a.structural_key(), b.structural_key());
    }
}

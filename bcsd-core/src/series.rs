//! Gridded, time-indexed series
//!
//! A [`GriddedSeries`] is the value passed between every stage of the BCSD pipeline.
//! Values are stored as a two-dimensional array with shape `(time, cell)`. How the cell
//! index maps onto geography is described by [`SpatialAxes`]:
//!
//! - [`SpatialAxes::Rectilinear`]: a latitude/longitude grid of `ny * nx` cells stored
//!   row-major, so cell `y * nx + x` sits at `(lat[y], lon[x])`
//! - [`SpatialAxes::Points`]: an unstructured set of locations with one `(lat, lon)` pair per cell
//!
//! # Examples
//!
//! ```rust
//! use bcsd_core::series::{GriddedSeries, SpatialAxes};
//! use chrono::NaiveDate;
//! use ndarray::{array, Array2};
//!
//! let time = vec![
//!     NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(),
//!     NaiveDate::from_ymd_opt(2000, 2, 1).unwrap(),
//! ];
//! let axes = SpatialAxes::rectilinear(array![40.0, 41.0], array![-105.0, -104.0, -103.0]);
//! let series = GriddedSeries::new("pr", time, axes, Array2::zeros((2, 6))).unwrap();
//!
//! assert_eq!(series.n_times(), 2);
//! assert_eq!(series.n_cells(), 6);
//! ```

use crate::calendar::month_of;
use crate::errors::{BCSDError, BCSDResult};
use chrono::NaiveDate;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

pub type FloatValue = f64;

/// Timestamp of a single step in a series
///
/// Daily series use every calendar day, monthly series conventionally use the first of each month.
pub type Timestamp = NaiveDate;

/// Geographic layout of the cells in a series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SpatialAxes {
    /// Regular latitude/longitude grid, cells stored as `(y, x)` row-major
    Rectilinear {
        lat: Array1<FloatValue>,
        lon: Array1<FloatValue>,
    },
    /// Unstructured locations, one `(lat, lon)` pair per cell
    Points {
        lat: Array1<FloatValue>,
        lon: Array1<FloatValue>,
    },
}

impl SpatialAxes {
    pub fn rectilinear(lat: Array1<FloatValue>, lon: Array1<FloatValue>) -> Self {
        SpatialAxes::Rectilinear { lat, lon }
    }

    /// Create a point layout
    ///
    /// Fails if `lat` and `lon` have different lengths.
    pub fn points(lat: Array1<FloatValue>, lon: Array1<FloatValue>) -> BCSDResult<Self> {
        if lat.len() != lon.len() {
            return Err(BCSDError::GridGeometry(format!(
                "point layout has {} latitudes but {} longitudes",
                lat.len(),
                lon.len()
            )));
        }
        Ok(SpatialAxes::Points { lat, lon })
    }

    pub fn lat(&self) -> &Array1<FloatValue> {
        match self {
            SpatialAxes::Rectilinear { lat, .. } | SpatialAxes::Points { lat, .. } => lat,
        }
    }

    pub fn lon(&self) -> &Array1<FloatValue> {
        match self {
            SpatialAxes::Rectilinear { lon, .. } | SpatialAxes::Points { lon, .. } => lon,
        }
    }

    pub fn is_rectilinear(&self) -> bool {
        matches!(self, SpatialAxes::Rectilinear { .. })
    }

    /// Number of cells described by the layout
    pub fn size(&self) -> usize {
        match self {
            SpatialAxes::Rectilinear { lat, lon } => lat.len() * lon.len(),
            SpatialAxes::Points { lat, .. } => lat.len(),
        }
    }

    /// `(lat, lon)` of every cell centre in storage order
    pub fn cell_centres(&self) -> Vec<(FloatValue, FloatValue)> {
        match self {
            SpatialAxes::Rectilinear { lat, lon } => lat
                .iter()
                .flat_map(|&y| lon.iter().map(move |&x| (y, x)))
                .collect(),
            SpatialAxes::Points { lat, lon } => {
                lat.iter().copied().zip(lon.iter().copied()).collect()
            }
        }
    }
}

/// Cell-boundary coordinates of a rectilinear grid
///
/// Each axis carries one more boundary than it has centres.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellBounds {
    pub lat_b: Array1<FloatValue>,
    pub lon_b: Array1<FloatValue>,
}

impl CellBounds {
    pub fn new(lat_b: Array1<FloatValue>, lon_b: Array1<FloatValue>) -> Self {
        Self { lat_b, lon_b }
    }

    /// Check that the bounds fit a rectilinear layout
    pub fn check_against(&self, axes: &SpatialAxes) -> BCSDResult<()> {
        match axes {
            SpatialAxes::Rectilinear { lat, lon } => {
                if self.lat_b.len() != lat.len() + 1 || self.lon_b.len() != lon.len() + 1 {
                    return Err(BCSDError::GridGeometry(format!(
                        "bounds of length ({}, {}) do not fit a {}x{} grid",
                        self.lat_b.len(),
                        self.lon_b.len(),
                        lat.len(),
                        lon.len()
                    )));
                }
                Ok(())
            }
            SpatialAxes::Points { .. } => Err(BCSDError::GridGeometry(
                "cell bounds can only be attached to a rectilinear grid".to_string(),
            )),
        }
    }
}

/// A labelled `(time, cell)` array of values
///
/// Series are immutable: every operation in this crate returns a new series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GriddedSeries {
    name: String,
    time: Vec<Timestamp>,
    axes: SpatialAxes,
    bounds: Option<CellBounds>,
    values: Array2<FloatValue>,
}

impl GriddedSeries {
    /// Create a new series
    ///
    /// `values` must have one row per timestamp and one column per cell, and the
    /// timestamps must be strictly increasing.
    pub fn new(
        name: impl Into<String>,
        time: Vec<Timestamp>,
        axes: SpatialAxes,
        values: Array2<FloatValue>,
    ) -> BCSDResult<Self> {
        let name = name.into();
        if values.nrows() != time.len() {
            return Err(BCSDError::InvalidSeries(format!(
                "{name}: {} rows of values for {} timestamps",
                values.nrows(),
                time.len()
            )));
        }
        if values.ncols() != axes.size() {
            return Err(BCSDError::InvalidSeries(format!(
                "{name}: {} columns of values for {} cells",
                values.ncols(),
                axes.size()
            )));
        }
        if let Some(i) = time.windows(2).position(|w| w[0] >= w[1]) {
            return Err(BCSDError::InvalidSeries(format!(
                "{name}: time axis is not strictly increasing at {}",
                time[i + 1]
            )));
        }
        Ok(Self {
            name,
            time,
            axes,
            bounds: None,
            values,
        })
    }

    /// Attach cell-boundary coordinates
    pub fn with_bounds(mut self, bounds: CellBounds) -> BCSDResult<Self> {
        bounds.check_against(&self.axes)?;
        self.bounds = Some(bounds);
        Ok(self)
    }

    /// Create a series sharing this series' name, time axis and geography but holding other values
    pub fn with_values(&self, values: Array2<FloatValue>) -> BCSDResult<Self> {
        if values.dim() != self.values.dim() {
            return Err(BCSDError::Alignment(format!(
                "{}: expected values of shape {:?}, got {:?}",
                self.name,
                self.values.dim(),
                values.dim()
            )));
        }
        Ok(Self {
            values,
            ..self.clone()
        })
    }

    /// Create a series sharing this series' name and time axis, placed on a different grid
    pub fn relocated(
        &self,
        axes: SpatialAxes,
        bounds: Option<CellBounds>,
        values: Array2<FloatValue>,
    ) -> BCSDResult<Self> {
        let series = Self::new(self.name.clone(), self.time.clone(), axes, values)?;
        match bounds {
            Some(bounds) => series.with_bounds(bounds),
            None => Ok(series),
        }
    }

    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn time(&self) -> &[Timestamp] {
        &self.time
    }

    pub fn axes(&self) -> &SpatialAxes {
        &self.axes
    }

    pub fn bounds(&self) -> Option<&CellBounds> {
        self.bounds.as_ref()
    }

    pub fn values(&self) -> ArrayView2<'_, FloatValue> {
        self.values.view()
    }

    pub fn n_times(&self) -> usize {
        self.time.len()
    }

    pub fn n_cells(&self) -> usize {
        self.values.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Time series of a single cell
    pub fn cell(&self, index: usize) -> ArrayView1<'_, FloatValue> {
        self.values.column(index)
    }

    /// Calendar month (1-12) of every time step
    pub fn months(&self) -> Vec<u32> {
        self.time.iter().map(month_of).collect()
    }

    /// Check that another series lives on the same geography
    pub fn check_same_axes(&self, other: &GriddedSeries) -> BCSDResult<()> {
        if self.axes != other.axes {
            return Err(BCSDError::Alignment(format!(
                "{} and {} are on different spatial axes",
                self.name, other.name
            )));
        }
        Ok(())
    }
}

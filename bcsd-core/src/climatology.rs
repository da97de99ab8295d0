//! Climatologies, month-grouped rolling means and anomalies
//!
//! All operations group time steps by calendar month:
//!
//! - [`monthly_climatology`]: mean state of each calendar month across the record
//! - [`rolling_mean`]: smoothing over successive occurrences of the same month
//! - [`anomaly`] / [`restore`]: deviations from a reference and their inverse
//!
//! NaN values are treated as missing data and skipped by the means.

use crate::calendar::{group_apply, group_reduce, month_of, nan_mean, Grouper};
use crate::errors::{BCSDError, BCSDResult};
use crate::series::{CellBounds, FloatValue, GriddedSeries, SpatialAxes};
use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

/// Mean state of a variable for each calendar month
///
/// Rows follow [`months`](Self::months), which are sorted ascending and contain only
/// the months present in the source series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Climatology {
    name: String,
    months: Vec<u32>,
    axes: SpatialAxes,
    bounds: Option<CellBounds>,
    values: Array2<FloatValue>,
}

impl Climatology {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn months(&self) -> &[u32] {
        &self.months
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

    /// True when all twelve months are present
    pub fn is_complete(&self) -> bool {
        self.months.len() == 12
    }

    /// Values of every cell for one calendar month
    pub fn month(&self, month: u32) -> Option<ArrayView1<'_, FloatValue>> {
        self.months
            .iter()
            .position(|&m| m == month)
            .map(|row| self.values.row(row))
    }
}

/// Group a series by calendar month and average each group
pub fn monthly_climatology(series: &GriddedSeries) -> BCSDResult<Climatology> {
    if series.is_empty() {
        return Err(BCSDError::InvalidSeries(format!(
            "cannot compute a climatology of empty series {}",
            series.name()
        )));
    }
    let index = Grouper::Month.index(series.time());
    Ok(Climatology {
        name: series.name().to_string(),
        months: index.keys(),
        axes: series.axes().clone(),
        bounds: series.bounds().cloned(),
        values: group_reduce(series.values(), &index, nan_mean),
    })
}

/// Moving window applied within each calendar-month group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollingWindow {
    /// Number of group occurrences in a full window
    pub length: usize,
    /// Centre the window on each position instead of trailing it
    pub center: bool,
    /// Minimum number of valid values required to produce an output
    pub min_periods: usize,
}

impl Default for RollingWindow {
    /// Nine occurrences, centred, with output wherever any value is available
    fn default() -> Self {
        Self {
            length: 9,
            center: true,
            min_periods: 1,
        }
    }
}

impl RollingWindow {
    pub fn validate(&self) -> BCSDResult<()> {
        if self.length == 0 {
            return Err(BCSDError::InvalidSeries(
                "rolling window length must be at least 1".to_string(),
            ));
        }
        if self.min_periods == 0 || self.min_periods > self.length {
            return Err(BCSDError::InvalidSeries(format!(
                "min_periods must be between 1 and the window length ({}), got {}",
                self.length, self.min_periods
            )));
        }
        Ok(())
    }

    /// Inclusive index range `[start, end]` of the window ending or centred at `i`,
    /// clipped to `0..n`
    ///
    /// An even centred window has one more step before `i` than after it.
    fn span(&self, i: usize, n: usize) -> (usize, usize) {
        let (start, end) = if self.center {
            (i.saturating_sub(self.length / 2), i + (self.length - 1) / 2)
        } else {
            ((i + 1).saturating_sub(self.length), i)
        };
        (start, end.min(n - 1))
    }

    fn apply(&self, values: &[FloatValue]) -> Vec<FloatValue> {
        let n = values.len();
        (0..n)
            .map(|i| {
                let (start, end) = self.span(i, n);
                let valid: Vec<FloatValue> = values[start..=end]
                    .iter()
                    .copied()
                    .filter(|v| !v.is_nan())
                    .collect();
                if valid.len() >= self.min_periods {
                    nan_mean(&valid)
                } else {
                    FloatValue::NAN
                }
            })
            .collect()
    }
}

/// Rolling mean over successive occurrences of each calendar month
///
/// For a monthly series a window of 9 averages the same month across nine years.
pub fn rolling_mean(series: &GriddedSeries, window: &RollingWindow) -> BCSDResult<GriddedSeries> {
    window.validate()?;
    let index = Grouper::Month.index(series.time());
    let values = group_apply(series.values(), &index, |_, _, group| window.apply(group));
    series.with_values(values)
}

/// How an anomaly relates a series to its reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// `series - reference`
    Additive,
    /// `series / reference`
    Ratio,
}

impl AnomalyKind {
    fn forward(&self, value: FloatValue, reference: FloatValue) -> FloatValue {
        match self {
            AnomalyKind::Additive => value - reference,
            AnomalyKind::Ratio => value / reference,
        }
    }

    fn inverse(&self, anomaly: FloatValue, reference: FloatValue) -> FloatValue {
        match self {
            AnomalyKind::Additive => anomaly + reference,
            AnomalyKind::Ratio => anomaly * reference,
        }
    }
}

/// Reference state an anomaly is measured against
#[derive(Debug, Clone, Copy)]
pub enum Reference<'a> {
    /// Element-wise against a series with the same time axis and geography
    Series(&'a GriddedSeries),
    /// Against the climatology of each step's calendar month
    Climatology(&'a Climatology),
}

impl<'a> From<&'a GriddedSeries> for Reference<'a> {
    fn from(value: &'a GriddedSeries) -> Self {
        Reference::Series(value)
    }
}

impl<'a> From<&'a Climatology> for Reference<'a> {
    fn from(value: &'a Climatology) -> Self {
        Reference::Climatology(value)
    }
}

/// Combine every value of `series` with its aligned reference value
fn combine<F>(series: &GriddedSeries, reference: Reference<'_>, op: F) -> BCSDResult<GriddedSeries>
where
    F: Fn(FloatValue, FloatValue) -> FloatValue,
{
    let values = series.values();
    let out = match reference {
        Reference::Series(other) => {
            series.check_same_axes(other)?;
            if series.time() != other.time() {
                return Err(BCSDError::Alignment(format!(
                    "{} and {} have different time axes",
                    series.name(),
                    other.name()
                )));
            }
            let other = other.values();
            Array2::from_shape_fn(values.dim(), |idx| op(values[idx], other[idx]))
        }
        Reference::Climatology(climatology) => {
            if series.axes() != climatology.axes() {
                return Err(BCSDError::Alignment(format!(
                    "{} and the climatology of {} are on different spatial axes",
                    series.name(),
                    climatology.name()
                )));
            }
            let rows = series
                .time()
                .iter()
                .map(|t| {
                    let month = month_of(t);
                    climatology.month(month).ok_or_else(|| {
                        BCSDError::Alignment(format!(
                            "climatology of {} has no values for month {month} needed by {}",
                            climatology.name(),
                            series.name()
                        ))
                    })
                })
                .collect::<BCSDResult<Vec<_>>>()?;
            Array2::from_shape_fn(values.dim(), |(t, c)| op(values[[t, c]], rows[t][c]))
        }
    };
    series.with_values(out)
}

/// Deviation of `series` from `reference`
///
/// Additive anomalies subtract the reference, ratio anomalies divide by it. A
/// [`Climatology`] reference is broadcast onto the series by calendar month.
pub fn anomaly(
    series: &GriddedSeries,
    reference: Reference<'_>,
    kind: AnomalyKind,
) -> BCSDResult<GriddedSeries> {
    combine(series, reference, |v, r| kind.forward(v, r))
}

/// Rebuild a series from its anomaly and reference, the inverse of [`anomaly`]
pub fn restore(
    anomaly: &GriddedSeries,
    reference: Reference<'_>,
    kind: AnomalyKind,
) -> BCSDResult<GriddedSeries> {
    combine(anomaly, reference, |a, r| kind.inverse(a, r))
}

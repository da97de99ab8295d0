//! Core data model and operations for Bias Correction and Statistical Downscaling.
//!
//! The pipeline stages built on this crate are pure transformations over
//! [`GriddedSeries`](series::GriddedSeries):
//!
//! - [`spatial`]: grid harmonization (cell bounds) and analysis grids
//! - [`regrid`]: the regridding stage and operator cache
//! - [`climatology`]: monthly climatologies, rolling means and anomalies
//! - [`quantile_mapping`]: the group-wise bias correction contract
//!
//! Regridding and quantile mapping are performed by implementations of the
//! [`Regridder`](regrid::Regridder) and [`QuantileMapper`](quantile_mapping::QuantileMapper)
//! traits, provided by `bcsd-components` or by the caller.

pub mod calendar;
pub mod climatology;
pub mod errors;
pub mod quantile_mapping;
pub mod regrid;
pub mod series;
pub mod spatial;
pub mod variable;

//! Bias Correction and Statistical Downscaling (BCSD) of gridded climate model output
//!
//! The pipeline takes three series:
//!
//! - `observed`: the reference dataset on its own grid
//! - `training`: the model over the observed period
//! - `predicted`: the model series to correct
//!
//! and returns the bias-corrected anomaly of `predicted` against the training
//! climatology, on the grid of `observed`.
//!
//! ```rust,no_run
//! use bcsd::{BcsdConfig, Bcsd, GriddedSeries, VariableClass};
//!
//! # fn run(observed: &GriddedSeries, training: &GriddedSeries, predicted: &GriddedSeries) -> bcsd::BCSDResult<()> {
//! let config = BcsdConfig::from_toml("analysis_resolution = 0.5")?;
//! let pipeline = Bcsd::new(config)?;
//! let anomaly = pipeline.correct(observed, training, predicted, VariableClass::Precipitation)?;
//! assert_eq!(anomaly.axes(), observed.axes());
//! # Ok(())
//! # }
//! ```
//!
//! Data model and stages live in [`bcsd_core`], reference operators in [`bcsd_components`].

pub mod config;
pub mod pipeline;

pub use bcsd_components;
pub use bcsd_core;

pub use bcsd_core::errors::{BCSDError, BCSDResult};
pub use bcsd_core::series::{CellBounds, GriddedSeries, SpatialAxes};
pub use bcsd_core::variable::VariableClass;
pub use config::{BcsdConfig, TemperatureAnomaly};
pub use pipeline::{bcsd, AnomalyField, Bcsd};

//! The BCSD orchestrator
//!
//! A run is a straight-line pipeline with a single branch on the variable class:
//!
//! 1. Build a uniform analysis grid over the bounding box of the observations
//! 2. Regrid observations, training and prediction onto it in one batch
//! 3. Compute the monthly climatology of the training data
//! 4. Bias correct and express the result as an anomaly against that climatology
//!    (ratio for precipitation, difference for temperatures)
//! 5. Regrid the anomaly back onto the observation grid
//!
//! Regridding operators are cached for the lifetime of a [`Bcsd`], so repeated runs
//! over the same grids only build each operator once. The cache keeps the
//! `cache_capacity` most recently used operators.

use crate::config::{BcsdConfig, TemperatureAnomaly};
use bcsd_components::quantile_mapping::EmpiricalQuantileMapper;
use bcsd_components::regridding::SparseRegridder;
use bcsd_core::calendar::{nan_mean, Grouper};
use bcsd_core::climatology::{
    anomaly, monthly_climatology, restore, rolling_mean, AnomalyKind, Climatology, Reference,
};
use bcsd_core::errors::{BCSDError, BCSDResult};
use bcsd_core::quantile_mapping::QuantileMapper;
use bcsd_core::regrid::{
    regrid_batch, CacheStats, CachingRegridder, Regridder, DEFAULT_CACHE_CAPACITY,
};
use bcsd_core::series::{FloatValue, GriddedSeries};
use bcsd_core::spatial::{GeoBounds, GridDescriptor};
use bcsd_core::variable::VariableClass;
use log::{debug, info, log_enabled, Level};

/// Bias-corrected deviations from the training climatology, on the observation grid
///
/// Precipitation anomalies are ratios, temperature anomalies are differences.
pub type AnomalyField = GriddedSeries;

/// Inputs of a run after regridding onto the analysis grid
struct AnalysisInputs {
    observed: GriddedSeries,
    training: GriddedSeries,
    predicted: GriddedSeries,
    climatology: Climatology,
}

/// A configured BCSD pipeline
///
/// Generic over the regridding engine and the quantile-mapping transform so either can
/// be swapped out. [`Bcsd::new`] uses the reference operators from `bcsd-components`.
#[derive(Debug)]
pub struct Bcsd<R = SparseRegridder, Q = EmpiricalQuantileMapper> {
    config: BcsdConfig,
    regridder: CachingRegridder<R>,
    mapper: Q,
}

impl Bcsd {
    pub fn new(config: BcsdConfig) -> BCSDResult<Self> {
        Self::with_operators(config, SparseRegridder, EmpiricalQuantileMapper::default())
    }
}

impl Default for Bcsd {
    fn default() -> Self {
        Self {
            config: BcsdConfig::default(),
            regridder: CachingRegridder::with_capacity(SparseRegridder, DEFAULT_CACHE_CAPACITY),
            mapper: EmpiricalQuantileMapper::default(),
        }
    }
}

impl<R: Regridder, Q: QuantileMapper> Bcsd<R, Q> {
    /// Create a pipeline using the given regridding engine and quantile mapper
    pub fn with_operators(config: BcsdConfig, regridder: R, mapper: Q) -> BCSDResult<Self> {
        config.validate()?;
        Ok(Self {
            regridder: CachingRegridder::with_capacity(regridder, config.cache_capacity),
            config,
            mapper,
        })
    }

    pub fn config(&self) -> &BcsdConfig {
        &self.config
    }

    pub fn mapper(&self) -> &Q {
        &self.mapper
    }

    /// Statistics of the regridding operator cache
    pub fn cache_stats(&self) -> CacheStats {
        self.regridder.stats()
    }

    /// Drop all cached regridding operators
    pub fn clear_cache(&self) {
        self.regridder.clear()
    }

    /// Bias correct `predicted` and return its anomaly field on the grid of `observed`
    ///
    /// `training` is the model's own simulation of the observed period. The three inputs
    /// may use different grids as long as the training and predicted grids cover the
    /// observations.
    pub fn correct(
        &self,
        observed: &GriddedSeries,
        training: &GriddedSeries,
        predicted: &GriddedSeries,
        variable_class: VariableClass,
    ) -> BCSDResult<AnomalyField> {
        info!(
            "Running BCSD for {variable_class}: {} corrected against {} using {}",
            predicted.name(),
            observed.name(),
            training.name()
        );

        let analysis_grid = GridDescriptor::uniform(
            &GeoBounds::of(observed.axes())?,
            self.config.analysis_resolution,
        )?;
        let inputs = self.to_analysis_grid(&analysis_grid, observed, training, predicted)?;

        let analysis_anomaly = if variable_class.is_precipitation() {
            self.precipitation_anomaly(&inputs, variable_class.anomaly_kind())?
        } else {
            self.temperature_anomaly(&inputs, variable_class.anomaly_kind())?
        };

        let destination = GridDescriptor::target(observed, self.config.grid_regularity)?;
        let result = self
            .regridder
            .build(&analysis_grid, &destination, &self.config.output_method)?
            .apply(&analysis_anomaly)?;
        info!(
            "BCSD complete for {}: {} steps on {} cells",
            predicted.name(),
            result.n_times(),
            result.n_cells()
        );
        Ok(result)
    }

    /// As [`correct`](Self::correct), parsing the variable class from its identifier
    pub fn correct_named(
        &self,
        observed: &GriddedSeries,
        training: &GriddedSeries,
        predicted: &GriddedSeries,
        variable_class: &str,
    ) -> BCSDResult<AnomalyField> {
        let variable_class: VariableClass = variable_class.parse()?;
        self.correct(observed, training, predicted, variable_class)
    }

    fn to_analysis_grid(
        &self,
        analysis_grid: &GridDescriptor,
        observed: &GriddedSeries,
        training: &GriddedSeries,
        predicted: &GriddedSeries,
    ) -> BCSDResult<AnalysisInputs> {
        let (ny, nx) = analysis_grid.shape();
        debug!(
            "Analysis grid of {ny}x{nx} cells at {} degrees",
            self.config.analysis_resolution
        );

        let regridded = regrid_batch(
            &self.regridder,
            analysis_grid,
            &self.config.analysis_method,
            &[observed, training, predicted],
            self.config.grid_regularity,
        )?;
        let [observed, training, predicted]: [GriddedSeries; 3] =
            regridded.try_into().map_err(|v: Vec<GriddedSeries>| {
                BCSDError::InvalidSeries(format!("expected 3 regridded series, got {}", v.len()))
            })?;

        let climatology = monthly_climatology(&training)?;
        debug!(
            "Training climatology of {} covers {} months",
            climatology.name(),
            climatology.months().len()
        );
        Ok(AnalysisInputs {
            observed,
            training,
            predicted,
            climatology,
        })
    }

    fn quantile_map(&self, predict: &GriddedSeries, inputs: &AnalysisInputs) -> BCSDResult<GriddedSeries> {
        self.mapper
            .map(predict, &inputs.training, &inputs.observed, Grouper::Month)
    }

    fn precipitation_anomaly(
        &self,
        inputs: &AnalysisInputs,
        kind: AnomalyKind,
    ) -> BCSDResult<GriddedSeries> {
        let corrected = self.quantile_map(&inputs.predicted, inputs)?;
        anomaly(&corrected, Reference::Climatology(&inputs.climatology), kind)
    }

    fn temperature_anomaly(
        &self,
        inputs: &AnalysisInputs,
        kind: AnomalyKind,
    ) -> BCSDResult<GriddedSeries> {
        let predicted = &inputs.predicted;
        let rolling = rolling_mean(predicted, &self.config.rolling)?;
        let detrended = anomaly(predicted, Reference::Series(&rolling), kind)?;
        if log_enabled!(Level::Debug) {
            let mean = detrended
                .values()
                .as_slice()
                .map_or(FloatValue::NAN, nan_mean);
            debug!("{}: mean de-trended anomaly {mean:.4}", predicted.name());
        }

        match self.config.temperature_anomaly {
            TemperatureAnomaly::Legacy => {
                let corrected = self.quantile_map(predicted, inputs)?;
                let shifted = restore(&rolling, Reference::Series(&corrected), kind)?;
                anomaly(&corrected, Reference::Series(&shifted), kind)
            }
            TemperatureAnomaly::MeanShiftRestored => {
                let shift = anomaly(&rolling, Reference::Climatology(&inputs.climatology), kind)?;
                let unshifted = anomaly(predicted, Reference::Series(&shift), kind)?;
                let corrected = restore(
                    &self.quantile_map(&unshifted, inputs)?,
                    Reference::Series(&shift),
                    kind,
                )?;
                anomaly(&corrected, Reference::Climatology(&inputs.climatology), kind)
            }
        }
    }
}

/// Run BCSD with the default configuration and reference operators
///
/// `variable_class` is one of `pr`, `tmin`, `tmax`, `trange` or `tavg`.
pub fn bcsd(
    observed: &GriddedSeries,
    training: &GriddedSeries,
    predicted: &GriddedSeries,
    variable_class: &str,
) -> BCSDResult<AnomalyField> {
    Bcsd::default().correct_named(observed, training, predicted, variable_class)
}

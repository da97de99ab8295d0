//! Pipeline configuration
//!
//! Every field has a default, so an empty TOML document is a valid configuration:
//!
//! ```toml
//! analysis_resolution = 1.0
//! analysis_method = "bilinear"
//! output_method = "bilinear"
//! temperature_anomaly = "legacy"
//! grid_regularity = "validate"
//! cache_capacity = 32
//!
//! [rolling]
//! length = 9
//! center = true
//! min_periods = 1
//! ```

use bcsd_core::climatology::RollingWindow;
use bcsd_core::errors::{BCSDError, BCSDResult};
use bcsd_core::regrid::{RegridMethod, DEFAULT_CACHE_CAPACITY};
use bcsd_core::series::FloatValue;
use bcsd_core::spatial::Regularity;
use serde::{Deserialize, Serialize};

/// How the temperature branch expresses its final anomaly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemperatureAnomaly {
    /// Quantile-map the raw prediction and return `qm - (rolling + qm)`
    ///
    /// The result is the negated rolling mean of the prediction and does not depend
    /// on the observations. Retained for reproducing existing outputs.
    #[default]
    Legacy,
    /// Quantile-map the prediction with its rolling-mean shift removed, restore the
    /// shift and return the anomaly against the training climatology
    MeanShiftRestored,
}

/// Configuration of a BCSD run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BcsdConfig {
    /// Spacing (degrees) of the analysis grid built over the observations
    pub analysis_resolution: FloatValue,
    /// Method used to move all inputs onto the analysis grid
    pub analysis_method: RegridMethod,
    /// Method used to move the result back onto the observation grid
    pub output_method: RegridMethod,
    pub temperature_anomaly: TemperatureAnomaly,
    /// Handling of unevenly spaced input grids
    pub grid_regularity: Regularity,
    /// Number of regridding operators kept between runs
    pub cache_capacity: usize,
    /// Rolling mean applied to the temperature prediction
    pub rolling: RollingWindow,
}

impl Default for BcsdConfig {
    fn default() -> Self {
        Self {
            analysis_resolution: 1.0,
            analysis_method: RegridMethod::Bilinear,
            output_method: RegridMethod::Bilinear,
            temperature_anomaly: TemperatureAnomaly::default(),
            grid_regularity: Regularity::default(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            rolling: RollingWindow::default(),
        }
    }
}

impl BcsdConfig {
    /// Parse and validate a configuration from TOML
    pub fn from_toml(source: &str) -> BCSDResult<Self> {
        let config: Self = toml::from_str(source).map_err(|e| BCSDError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> BCSDResult<String> {
        toml::to_string(self).map_err(|e| BCSDError::Config(e.to_string()))
    }

    pub fn validate(&self) -> BCSDResult<()> {
        if !(self.analysis_resolution.is_finite() && self.analysis_resolution > 0.0) {
            return Err(BCSDError::Config(format!(
                "analysis_resolution must be a positive number of degrees, got {}",
                self.analysis_resolution
            )));
        }
        if self.cache_capacity == 0 {
            return Err(BCSDError::Config(
                "cache_capacity must hold at least one operator".to_string(),
            ));
        }
        self.rolling.validate().map_err(|e| match e {
            BCSDError::InvalidSeries(reason) => BCSDError::Config(format!("rolling: {reason}")),
            other => other,
        })
    }
}

use thiserror::Error;

/// Error type for invalid operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BCSDError {
    #[error("Invalid grid geometry: {0}")]
    GridGeometry(String),
    #[error("Grids cannot be reconciled: {reason}")]
    GridIncompatible { reason: String },
    #[error("Series are not aligned: {0}")]
    Alignment(String),
    #[error("Unrecognised variable class {0:?}. Expected one of pr, tmin, tmax, trange, tavg")]
    VariableClass(String),
    #[error("Regrid method {0:?} is not supported by this regridder")]
    UnsupportedRegridMethod(String),
    #[error("Invalid series: {0}")]
    InvalidSeries(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl BCSDError {
    pub fn incompatible(reason: impl Into<String>) -> Self {
        BCSDError::GridIncompatible {
            reason: reason.into(),
        }
    }
}

/// Convenience type for `Result<T, BCSDError>`.
pub type BCSDResult<T> = Result<T, BCSDError>;

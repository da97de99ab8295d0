//! Variable classes handled by the BCSD pipeline
//!
//! The class of a variable decides how it is bias corrected and how its anomalies are
//! expressed:
//!
//! | Class           | Identifier | Unit      | Anomaly      |
//! |-----------------|------------|-----------|--------------|
//! | Precipitation   | `pr`       | mm / day  | ratio        |
//! | Daily minimum   | `tmin`     | K         | additive     |
//! | Daily maximum   | `tmax`     | K         | additive     |
//! | Diurnal range   | `trange`   | K         | additive     |
//! | Daily mean      | `tavg`     | K         | additive     |
//!
//! # Example
//!
//! ```rust
//! use bcsd_core::climatology::AnomalyKind;
//! use bcsd_core::variable::VariableClass;
//!
//! let class: VariableClass = "pr".parse().unwrap();
//! assert!(class.is_precipitation());
//! assert_eq!(class.anomaly_kind(), AnomalyKind::Ratio);
//!
//! assert!("snow".parse::<VariableClass>().is_err());
//! ```

use crate::climatology::AnomalyKind;
use crate::errors::BCSDError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum VariableClass {
    Precipitation,
    Tmin,
    Tmax,
    Trange,
    Tavg,
}

impl VariableClass {
    pub const ALL: [VariableClass; 5] = [
        VariableClass::Precipitation,
        VariableClass::Tmin,
        VariableClass::Tmax,
        VariableClass::Trange,
        VariableClass::Tavg,
    ];

    /// Short identifier, as used in model output variable names
    pub fn identifier(&self) -> &'static str {
        match self {
            VariableClass::Precipitation => "pr",
            VariableClass::Tmin => "tmin",
            VariableClass::Tmax => "tmax",
            VariableClass::Trange => "trange",
            VariableClass::Tavg => "tavg",
        }
    }

    /// Canonical unit
    pub fn unit(&self) -> &'static str {
        match self {
            VariableClass::Precipitation => "mm / day",
            _ => "K",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            VariableClass::Precipitation => "Precipitation rate",
            VariableClass::Tmin => "Daily minimum near-surface air temperature",
            VariableClass::Tmax => "Daily maximum near-surface air temperature",
            VariableClass::Trange => "Diurnal near-surface air temperature range",
            VariableClass::Tavg => "Daily mean near-surface air temperature",
        }
    }

    pub fn is_precipitation(&self) -> bool {
        matches!(self, VariableClass::Precipitation)
    }

    /// Ratio anomalies for precipitation, additive anomalies for temperatures
    pub fn anomaly_kind(&self) -> AnomalyKind {
        if self.is_precipitation() {
            AnomalyKind::Ratio
        } else {
            AnomalyKind::Additive
        }
    }
}

impl FromStr for VariableClass {
    type Err = BCSDError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pr" | "precipitation" => Ok(VariableClass::Precipitation),
            "tmin" => Ok(VariableClass::Tmin),
            "tmax" => Ok(VariableClass::Tmax),
            "trange" => Ok(VariableClass::Trange),
            "tavg" => Ok(VariableClass::Tavg),
            _ => Err(BCSDError::VariableClass(s.to_string())),
        }
    }
}

impl TryFrom<String> for VariableClass {
    type Error = BCSDError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VariableClass> for String {
    fn from(value: VariableClass) -> Self {
        value.identifier().to_string()
    }
}

impl fmt::Display for VariableClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

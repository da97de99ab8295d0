//! Reference operators for the BCSD pipeline
//!
//! - [`regridding::SparseRegridder`]: bilinear, nearest-neighbour and conservative
//!   regridding between latitude/longitude grids
//! - [`quantile_mapping::EmpiricalQuantileMapper`]: group-wise empirical quantile mapping

pub mod quantile_mapping;
pub mod regridding;

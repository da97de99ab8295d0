//! Group-wise quantile mapping
//!
//! Quantile mapping corrects a modelled series by matching the distribution of the
//! model's training period to observations. The distribution-matching transform is
//! provided by a [`QuantileMapper`]; this module defines the contract and the input
//! checks shared by every implementation.

use crate::calendar::{GroupIndex, Grouper};
use crate::errors::{BCSDError, BCSDResult};
use crate::series::GriddedSeries;

/// Distribution-matching bias correction applied independently to each group
pub trait QuantileMapper: Send + Sync {
    /// Correct `predict` using a transform fitted from `train` to `obs`
    ///
    /// For every group key (e.g. calendar month) a transform is fitted using the `train`
    /// and `obs` values of that group and applied to the `predict` values of the same
    /// group. The result has the shape and time ordering of `predict`.
    fn map(
        &self,
        predict: &GriddedSeries,
        train: &GriddedSeries,
        obs: &GriddedSeries,
        grouper: Grouper,
    ) -> BCSDResult<GriddedSeries>;
}

/// Group indices of the three inputs to a quantile mapping
#[derive(Debug, Clone)]
pub struct MappingGroups {
    pub predict: GroupIndex,
    pub train: GroupIndex,
    pub obs: GroupIndex,
}

/// Check that the inputs to a quantile mapping can be combined
///
/// All three series must share their spatial axes, and every group present in
/// `predict` must also be present in `train` and `obs`.
pub fn check_mapping_inputs(
    predict: &GriddedSeries,
    train: &GriddedSeries,
    obs: &GriddedSeries,
    grouper: Grouper,
) -> BCSDResult<MappingGroups> {
    predict.check_same_axes(train)?;
    predict.check_same_axes(obs)?;

    let groups = MappingGroups {
        predict: grouper.index(predict.time()),
        train: grouper.index(train.time()),
        obs: grouper.index(obs.time()),
    };

    for key in groups.predict.keys() {
        for (label, index) in [("training", &groups.train), ("observed", &groups.obs)] {
            if !index.contains(key) {
                return Err(BCSDError::Alignment(format!(
                    "{label} data has no values for group {key} present in {}",
                    predict.name()
                )));
            }
        }
    }
    Ok(groups)
}

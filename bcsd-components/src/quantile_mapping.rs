//! Empirical quantile mapping
//!
//! Each predicted value is located within the empirical distribution of the training
//! values of its group, and replaced with the observed value at the same non-exceedance
//! probability.

use bcsd_core::calendar::{group_apply, Grouper};
use bcsd_core::errors::BCSDResult;
use bcsd_core::quantile_mapping::{check_mapping_inputs, QuantileMapper};
use bcsd_core::series::{FloatValue, GriddedSeries};
use log::warn;
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

/// Parameters for the empirical quantile mapper
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmpiricalQuantileMapperParameters {
    /// Minimum number of valid training and observed values a group needs to be mapped.
    /// Groups with fewer values produce NaN.
    pub min_samples: usize,
}

impl Default for EmpiricalQuantileMapperParameters {
    fn default() -> Self {
        Self { min_samples: 1 }
    }
}

/// Empirical CDF of a sample
///
/// The `k`-th smallest of `n` values sits at probability `k / (n - 1)`, and both the
/// CDF and its inverse interpolate linearly between samples. Values outside the sample
/// range are clamped to probability 0 or 1.
#[derive(Debug, Clone, PartialEq)]
pub struct EmpiricalDistribution {
    sorted: Vec<FloatValue>,
}

impl EmpiricalDistribution {
    /// Build from a sample, ignoring NaN values
    pub fn new(sample: &[FloatValue]) -> Self {
        let mut sorted: Vec<FloatValue> = sample.iter().copied().filter(|v| !v.is_nan()).collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        Self { sorted }
    }

    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    /// Probability of not exceeding `x`
    pub fn non_exceedance(&self, x: FloatValue) -> FloatValue {
        let n = self.sorted.len();
        if n == 0 || x.is_nan() {
            return FloatValue::NAN;
        }
        if n == 1 {
            return 0.5;
        }
        if x <= self.sorted[0] {
            return 0.0;
        }
        if x >= self.sorted[n - 1] {
            return 1.0;
        }
        // sorted[lo] <= x < sorted[lo + 1]
        let lo = self.sorted.partition_point(|&v| v <= x) - 1;
        let (a, b) = (self.sorted[lo], self.sorted[lo + 1]);
        (lo as FloatValue + (x - a) / (b - a)) / (n - 1) as FloatValue
    }

    /// Value at probability `p`, the inverse of [`non_exceedance`](Self::non_exceedance)
    pub fn quantile(&self, p: FloatValue) -> FloatValue {
        let n = self.sorted.len();
        if n == 0 || p.is_nan() {
            return FloatValue::NAN;
        }
        if n == 1 {
            return self.sorted[0];
        }
        let position = p.clamp(0.0, 1.0) * (n - 1) as FloatValue;
        let lo = (position.floor() as usize).min(n - 1);
        let hi = (lo + 1).min(n - 1);
        let frac = position - lo as FloatValue;
        self.sorted[lo] + frac * (self.sorted[hi] - self.sorted[lo])
    }
}

/// Quantile mapping using the empirical distributions of each group
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmpiricalQuantileMapper {
    parameters: EmpiricalQuantileMapperParameters,
}

impl EmpiricalQuantileMapper {
    pub fn from_parameters(parameters: EmpiricalQuantileMapperParameters) -> Self {
        Self { parameters }
    }

    pub fn parameters(&self) -> &EmpiricalQuantileMapperParameters {
        &self.parameters
    }

    fn min_samples(&self) -> usize {
        self.parameters.min_samples.max(1)
    }

    fn is_sparse(&self, train: &EmpiricalDistribution, obs: &EmpiricalDistribution) -> bool {
        train.len() < self.min_samples() || obs.len() < self.min_samples()
    }

    /// Map a group of predicted values from the `train` distribution onto `obs`
    pub fn map_values(
        &self,
        predict: &[FloatValue],
        train: &EmpiricalDistribution,
        obs: &EmpiricalDistribution,
    ) -> Vec<FloatValue> {
        if self.is_sparse(train, obs) {
            return vec![FloatValue::NAN; predict.len()];
        }
        predict
            .iter()
            .map(|&p| obs.quantile(train.non_exceedance(p)))
            .collect()
    }
}

impl QuantileMapper for EmpiricalQuantileMapper {
    fn map(
        &self,
        predict: &GriddedSeries,
        train: &GriddedSeries,
        obs: &GriddedSeries,
        grouper: Grouper,
    ) -> BCSDResult<GriddedSeries> {
        let groups = check_mapping_inputs(predict, train, obs, grouper)?;
        let (train_values, obs_values) = (train.values(), obs.values());

        let sample = |values: &ArrayView2<'_, FloatValue>, positions: &[usize], cell: usize| {
            let column: Vec<FloatValue> = positions.iter().map(|&t| values[[t, cell]]).collect();
            EmpiricalDistribution::new(&column)
        };

        let mut sparse_groups = 0usize;
        let values = group_apply(predict.values(), &groups.predict, |key, cell, group| {
            // check_mapping_inputs guarantees every predicted group exists in both indices
            let train_dist = sample(&train_values, groups.train.positions(key).unwrap_or(&[]), cell);
            let obs_dist = sample(&obs_values, groups.obs.positions(key).unwrap_or(&[]), cell);
            if self.is_sparse(&train_dist, &obs_dist) {
                sparse_groups += 1;
            }
            self.map_values(group, &train_dist, &obs_dist)
        });

        if sparse_groups > 0 {
            warn!(
                "{}: {sparse_groups} group/cell combinations had fewer than {} valid values and were left missing",
                predict.name(),
                self.min_samples()
            );
        }
        predict.with_values(values)
    }
}

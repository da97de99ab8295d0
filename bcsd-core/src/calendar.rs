//! Calendar grouping
//!
//! Climatologies, rolling means and quantile mapping all operate on groups of time steps
//! that share a calendar key. Keys are extracted explicitly with a function such as
//! [`month_of`] and collected into a [`GroupIndex`], which then drives the
//! [`group_reduce`] and [`group_apply`] combinators.

use crate::series::{FloatValue, Timestamp};
use chrono::Datelike;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Calendar month (1-12) of a timestamp
pub fn month_of(t: &Timestamp) -> u32 {
    t.month()
}

/// Grouping applied along the time axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Grouper {
    /// Group by calendar month of year
    #[default]
    Month,
}

impl Grouper {
    pub fn key(&self, t: &Timestamp) -> u32 {
        match self {
            Grouper::Month => month_of(t),
        }
    }

    pub fn index(&self, times: &[Timestamp]) -> GroupIndex {
        GroupIndex::by_key(times, |t| self.key(t))
    }
}

/// Positions along a time axis, grouped by key
///
/// Keys iterate in ascending order and positions within a group keep their
/// original time order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupIndex {
    groups: BTreeMap<u32, Vec<usize>>,
    len: usize,
}

impl GroupIndex {
    pub fn by_key<F>(times: &[Timestamp], key: F) -> Self
    where
        F: Fn(&Timestamp) -> u32,
    {
        let mut groups: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        for (i, t) in times.iter().enumerate() {
            groups.entry(key(t)).or_default().push(i);
        }
        Self {
            groups,
            len: times.len(),
        }
    }

    pub fn keys(&self) -> Vec<u32> {
        self.groups.keys().copied().collect()
    }

    pub fn positions(&self, key: u32) -> Option<&[usize]> {
        self.groups.get(&key).map(|v| v.as_slice())
    }

    pub fn contains(&self, key: u32) -> bool {
        self.groups.contains_key(&key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &[usize])> {
        self.groups.iter().map(|(k, v)| (*k, v.as_slice()))
    }

    /// Number of distinct keys
    pub fn n_groups(&self) -> usize {
        self.groups.len()
    }

    /// Length of the time axis the index was built from
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Reduce each group of each cell to a single value
///
/// Returns a `(group, cell)` array with groups in ascending key order.
pub fn group_reduce<F>(
    values: ArrayView2<'_, FloatValue>,
    index: &GroupIndex,
    reduce: F,
) -> Array2<FloatValue>
where
    F: Fn(&[FloatValue]) -> FloatValue,
{
    let n_cells = values.ncols();
    let mut out = Array2::from_elem((index.n_groups(), n_cells), FloatValue::NAN);
    let mut buffer = Vec::new();
    for (g, (_, positions)) in index.iter().enumerate() {
        for cell in 0..n_cells {
            buffer.clear();
            buffer.extend(positions.iter().map(|&t| values[[t, cell]]));
            out[[g, cell]] = reduce(&buffer);
        }
    }
    out
}

/// Transform each group of each cell, writing results back to the original positions
///
/// `apply` receives the group key and the group's values in time order and must return
/// the same number of values.
pub fn group_apply<F>(
    values: ArrayView2<'_, FloatValue>,
    index: &GroupIndex,
    mut apply: F,
) -> Array2<FloatValue>
where
    F: FnMut(u32, usize, &[FloatValue]) -> Vec<FloatValue>,
{
    let n_cells = values.ncols();
    let mut out = Array2::from_elem(values.dim(), FloatValue::NAN);
    let mut buffer = Vec::new();
    for (key, positions) in index.iter() {
        for cell in 0..n_cells {
            buffer.clear();
            buffer.extend(positions.iter().map(|&t| values[[t, cell]]));
            let transformed = apply(key, cell, &buffer);
            debug_assert_eq!(transformed.len(), positions.len());
            for (&t, v) in positions.iter().zip(transformed) {
                out[[t, cell]] = v;
            }
        }
    }
    out
}

/// Mean of the non-NaN values, NaN if there are none
pub fn nan_mean(values: &[FloatValue]) -> FloatValue {
    let (sum, count) = values
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        FloatValue::NAN
    } else {
        sum / count as FloatValue
    }
}

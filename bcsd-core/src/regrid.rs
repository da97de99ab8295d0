//! Regridding stage
//!
//! The interpolation engine itself sits behind the [`Regridder`] and [`RegridOperator`]
//! traits. This module owns the pieces the pipeline needs around it:
//!
//! - [`RegridMethod`]: interpolation method identifiers, passed through to the engine
//! - [`regrid_batch`]: harmonize and regrid several series onto one destination grid
//! - [`CachingRegridder`]: bounded LRU cache of built operators, keyed by exact grid geometry

use crate::errors::BCSDResult;
use crate::series::GriddedSeries;
use crate::spatial::{harmonize, GridDescriptor, GridKey, Regularity};
use log::{debug, warn};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Interpolation method identifier
///
/// Identifiers the pipeline does not know about are carried as [`RegridMethod::Other`]
/// and left for the regridder to accept or reject.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RegridMethod {
    #[default]
    Bilinear,
    Conservative,
    Nearest,
    Other(String),
}

impl RegridMethod {
    pub fn identifier(&self) -> &str {
        match self {
            RegridMethod::Bilinear => "bilinear",
            RegridMethod::Conservative => "conservative",
            RegridMethod::Nearest => "nearest_s2d",
            RegridMethod::Other(name) => name,
        }
    }
}

impl From<&str> for RegridMethod {
    fn from(value: &str) -> Self {
        match value {
            "bilinear" => RegridMethod::Bilinear,
            "conservative" => RegridMethod::Conservative,
            "nearest_s2d" | "nearest" => RegridMethod::Nearest,
            other => RegridMethod::Other(other.to_string()),
        }
    }
}

impl From<String> for RegridMethod {
    fn from(value: String) -> Self {
        RegridMethod::from(value.as_str())
    }
}

impl From<RegridMethod> for String {
    fn from(value: RegridMethod) -> Self {
        value.identifier().to_string()
    }
}

impl FromStr for RegridMethod {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(RegridMethod::from(s))
    }
}

impl fmt::Display for RegridMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

/// A prepared mapping from one grid onto another
///
/// Operators are read-only once built and may be shared between threads.
pub trait RegridOperator: fmt::Debug + Send + Sync {
    fn source(&self) -> &GridDescriptor;

    fn destination(&self) -> &GridDescriptor;

    /// Remap the spatial axes of a series lying on [`source`](Self::source)
    ///
    /// The time axis is left unchanged. Implementations must fail with
    /// `BCSDError::GridIncompatible` rather than fill unmappable cells with NaN.
    fn apply(&self, series: &GriddedSeries) -> BCSDResult<GriddedSeries>;
}

/// Builds [`RegridOperator`]s for a pair of grids
pub trait Regridder: Send + Sync {
    fn build(
        &self,
        source: &GridDescriptor,
        destination: &GridDescriptor,
        method: &RegridMethod,
    ) -> BCSDResult<Arc<dyn RegridOperator>>;
}

impl<R: Regridder + ?Sized> Regridder for Arc<R> {
    fn build(
        &self,
        source: &GridDescriptor,
        destination: &GridDescriptor,
        method: &RegridMethod,
    ) -> BCSDResult<Arc<dyn RegridOperator>> {
        (**self).build(source, destination, method)
    }
}

/// Regrid a batch of series onto a common destination grid
///
/// Each source is harmonized first, then mapped with an operator built for its own grid.
/// Outputs are returned in input order.
pub fn regrid_batch<R: Regridder + ?Sized>(
    regridder: &R,
    destination: &GridDescriptor,
    method: &RegridMethod,
    sources: &[&GriddedSeries],
    regularity: Regularity,
) -> BCSDResult<Vec<GriddedSeries>> {
    sources
        .iter()
        .map(|source| {
            let grid = harmonize(source, regularity)?;
            let operator = regridder.build(&grid, destination, method)?;
            debug!(
                "Regridding {} from {:?} to {:?} cells ({method})",
                source.name(),
                grid.shape(),
                destination.shape()
            );
            operator.apply(source)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct OperatorKey {
    source: GridKey,
    destination: GridKey,
    method: RegridMethod,
}

/// Default number of operators a [`CachingRegridder`] keeps
pub const DEFAULT_CACHE_CAPACITY: usize = 32;

/// Operator cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

type OperatorCache = LruCache<OperatorKey, Arc<dyn RegridOperator>>;

/// A [`Regridder`] that reuses operators for geometry it has already seen
///
/// Operators are keyed by the exact structure of both grids and the method, so a
/// cached operator is only returned for bit-identical coordinates. At most `capacity`
/// operators are kept; the least recently used one is evicted to make room.
pub struct CachingRegridder<R> {
    inner: R,
    operators: Mutex<OperatorCache>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<R> CachingRegridder<R> {
    pub fn new(inner: R) -> Self {
        Self::with_capacity(inner, DEFAULT_CACHE_CAPACITY)
    }

    /// Cache holding at most `capacity` operators (at least one)
    pub fn with_capacity(inner: R, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            operators: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn capacity(&self) -> usize {
        self.operators().cap().get()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.operators().len(),
        }
    }

    /// Drop all cached operators
    pub fn clear(&self) {
        self.operators().clear();
    }

    // Cached operators are immutable, so a panic elsewhere cannot leave them torn.
    fn operators(&self) -> MutexGuard<'_, OperatorCache> {
        self.operators.lock().unwrap_or_else(|poisoned| {
            warn!("Regrid operator cache lock was poisoned, recovering it");
            self.operators.clear_poison();
            poisoned.into_inner()
        })
    }
}

impl<R: fmt::Debug> fmt::Debug for CachingRegridder<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingRegridder")
            .field("inner", &self.inner)
            .field("capacity", &self.capacity())
            .field("stats", &self.stats())
            .finish()
    }
}

impl<R: Regridder> Regridder for CachingRegridder<R> {
    fn build(
        &self,
        source: &GridDescriptor,
        destination: &GridDescriptor,
        method: &RegridMethod,
    ) -> BCSDResult<Arc<dyn RegridOperator>> {
        let key = OperatorKey {
            source: source.structural_key(),
            destination: destination.structural_key(),
            method: method.clone(),
        };

        if let Some(operator) = self.operators().get(&key).cloned() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("Reusing cached {method} operator");
            return Ok(operator);
        }

        // Built without holding the lock
        self.misses.fetch_add(1, Ordering::Relaxed);
        let operator = self.inner.build(source, destination, method)?;
        if let Some((evicted, _)) = self.operators().push(key.clone(), operator.clone()) {
            if evicted != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!("Evicted least recently used {} operator", evicted.method);
            }
        }
        Ok(operator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::BCSDError;
    use crate::series::SpatialAxes;
    use chrono::NaiveDate;
    use ndarray::{array, Array2};
    use std::sync::atomic::AtomicUsize;

    /// Operator that copies the first source cell into every destination cell
    #[derive(Debug)]
    struct Broadcast {
        source: GridDescriptor,
        destination: GridDescriptor,
    }

    impl RegridOperator for Broadcast {
        fn source(&self) -> &GridDescriptor {
            &self.source
        }

        fn destination(&self) -> &GridDescriptor {
            &self.destination
        }

        fn apply(&self, series: &GriddedSeries) -> BCSDResult<GriddedSeries> {
            let n = self.destination.size();
            let values = Array2::from_shape_fn((series.n_times(), n), |(t, _)| series.values()[[t, 0]]);
            series.relocated(
                self.destination.axes().clone(),
                self.destination.bounds().cloned(),
                values,
            )
        }
    }

    #[derive(Default)]
    struct CountingRegridder {
        built: AtomicUsize,
    }

    impl Regridder for CountingRegridder {
        fn build(
            &self,
            source: &GridDescriptor,
            destination: &GridDescriptor,
            method: &RegridMethod,
        ) -> BCSDResult<Arc<dyn RegridOperator>> {
            if let RegridMethod::Other(name) = method {
                return Err(BCSDError::UnsupportedRegridMethod(name.clone()));
            }
            self.built.fetch_add(1, Ordering::Relaxed);
            Ok(Arc::new(Broadcast {
                source: source.clone(),
                destination: destination.clone(),
            }))
        }
    }

    fn series(name: &str, value: f64) -> GriddedSeries {
        GriddedSeries::new(
            name,
            vec![NaiveDate::from_ymd_opt(2000, 1, 1).unwrap()],
            SpatialAxes::rectilinear(array![40.0, 41.0], array![0.0, 1.0]),
            Array2::from_elem((1, 4), value),
        )
        .unwrap()
    }

    fn destination() -> GridDescriptor {
        GridDescriptor::new(
            array![40.5],
            array![0.5, 1.5, 2.5],
            array![40.0, 41.0],
            array![0.0, 1.0, 2.0, 3.0],
        )
        .unwrap()
    }

    #[test]
    fn method_identifiers() {
        assert_eq!(RegridMethod::from("bilinear"), RegridMethod::Bilinear);
        assert_eq!(RegridMethod::from("nearest"), RegridMethod::Nearest);
        assert_eq!(RegridMethod::Nearest.to_string(), "nearest_s2d");
        assert_eq!(
            "patch".parse::<RegridMethod>().unwrap(),
            RegridMethod::Other("patch".to_string())
        );
    }

    #[test]
    fn method_serialises_as_identifier() {
        let json = serde_json::to_string(&RegridMethod::Conservative).unwrap();
        assert_eq!(json, "\"conservative\"");
        let method: RegridMethod = serde_json::from_str("\"bilinear\"").unwrap();
        assert_eq!(method, RegridMethod::Bilinear);
    }

    #[test]
    fn batch_preserves_order() {
        let regridder = CountingRegridder::default();
        let a = series("a", 1.0);
        let b = series("b", 2.0);
        let out = regrid_batch(
            &regridder,
            &destination(),
            &RegridMethod::Bilinear,
            &[&a, &b],
            Regularity::Validate,
        )
        .unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].name(), "a");
        assert_eq!(out[1].values()[[0, 2]], 2.0);
        assert_eq!(out[1].axes(), destination().axes());
        assert_eq!(regridder.built.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn unknown_methods_are_passed_through() {
        let regridder = CountingRegridder::default();
        let a = series("a", 1.0);
        let result = regrid_batch(
            &regridder,
            &destination(),
            &RegridMethod::from("patch"),
            &[&a],
            Regularity::Validate,
        );
        assert_eq!(
            result.unwrap_err(),
            BCSDError::UnsupportedRegridMethod("patch".to_string())
        );
    }

    #[test]
    fn cache_reuses_operators_for_identical_geometry() {
        let cache = CachingRegridder::new(CountingRegridder::default());
        let a = series("a", 1.0);
        let b = series("b", 2.0);
        regrid_batch(
            &cache,
            &destination(),
            &RegridMethod::Bilinear,
            &[&a, &b],
            Regularity::Validate,
        )
        .unwrap();

        assert_eq!(cache.inner().built.load(Ordering::Relaxed), 1);
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                evictions: 0,
                entries: 1
            }
        );

        // A different method is a different operator
        regrid_batch(
            &cache,
            &destination(),
            &RegridMethod::Nearest,
            &[&a],
            Regularity::Validate,
        )
        .unwrap();
        assert_eq!(cache.stats().entries, 2);

        cache.clear();
        assert_eq!(cache.stats().entries, 0);
    }

    fn shifted_destination(offset: f64) -> GridDescriptor {
        GridDescriptor::new(
            array![40.5 + offset],
            array![0.5],
            array![40.0 + offset, 41.0 + offset],
            array![0.0, 1.0],
        )
        .unwrap()
    }

    #[test]
    fn cache_evicts_least_recently_used() {
        let cache = CachingRegridder::with_capacity(CountingRegridder::default(), 2);
        let a = series("a", 1.0);
        let regrid_to = |offset: f64| {
            regrid_batch(
                &cache,
                &shifted_destination(offset),
                &RegridMethod::Bilinear,
                &[&a],
                Regularity::Validate,
            )
            .unwrap()
        };

        regrid_to(0.0);
        regrid_to(0.1);
        // Touch the first grid so the second becomes least recently used
        regrid_to(0.0);
        regrid_to(0.2);

        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 3,
                evictions: 1,
                entries: 2
            }
        );
        regrid_to(0.0);
        assert_eq!(cache.stats().hits, 2);
        regrid_to(0.1);
        assert_eq!(cache.stats().misses, 4);
        assert_eq!(cache.inner().built.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn cache_stays_bounded_over_many_grids() {
        let cache = CachingRegridder::with_capacity(CountingRegridder::default(), 4);
        let a = series("a", 1.0);
        for i in 0..20 {
            regrid_batch(
                &cache,
                &shifted_destination(0.01 * i as f64),
                &RegridMethod::Bilinear,
                &[&a],
                Regularity::Validate,
            )
            .unwrap();
        }
        let stats = cache.stats();
        assert_eq!(stats.entries, 4);
        assert_eq!(stats.evictions, 16);
        assert_eq!(cache.capacity(), 4);
    }

    #[test]
    fn zero_capacity_keeps_one_operator() {
        let cache = CachingRegridder::with_capacity(CountingRegridder::default(), 0);
        assert_eq!(cache.capacity(), 1);
    }

    #[test]
    fn cache_keeps_working_after_a_panic_while_locked() {
        let cache = CachingRegridder::new(CountingRegridder::default());
        let a = series("a", 1.0);

        let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = cache.operators.lock().unwrap();
            panic!("operator construction failed");
        }));
        assert!(panicked.is_err());
        assert!(cache.operators.is_poisoned());

        for _ in 0..2 {
            regrid_batch(
                &cache,
                &destination(),
                &RegridMethod::Bilinear,
                &[&a],
                Regularity::Validate,
            )
            .unwrap();
        }
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                evictions: 0,
                entries: 1
            }
        );
        assert!(!cache.operators.is_poisoned());
    }
}

//! The ordered time-series index: a typed list of 32-bit Unix
//! seconds with an ordering policy, lower/upper-bound search, and a hybrid
//! binary/interpolation strategy chosen automatically per list.

use std::cell::Cell;
use std::path::Path;

use crate::error::{Error, Result};
use crate::list::List;

/// The append-time ordering constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ordering {
    /// No constraint; any sequence of values is accepted.
    None,
    /// Each appended value must be `>=` the previous one.
    WeaklyAscending,
    /// Each appended value must be strictly `>` the previous one.
    StrictlyAscending,
}

/// Which search algorithm to use for `lower_bound`/`upper_bound`/
/// `binary_search`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Binary,
    Interpolation,
    Auto,
}

/// Below this element count, `auto` never bothers sampling: binary search
/// is already fast enough and the sample would be statistically noisy.
const AUTO_SAMPLE_FLOOR: u64 = 10_000;
const AUTO_SAMPLE_POINTS: u64 = 20;
const AUTO_UNIFORMITY_THRESHOLD: f64 = 0.15;
/// Interpolation falls back to a short linear/binary finish once the
/// window narrows to this many elements.
const SHORT_WINDOW: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CachedStrategy {
    Binary,
    Interpolation,
}

/// A strictly/weakly/un-ordered sequence of 32-bit Unix-second timestamps.
pub struct TimeSeries {
    list: List<i32>,
    ordering: Ordering,
    strategy_cache: Cell<Option<CachedStrategy>>,
}

impl TimeSeries {
    pub fn create_writer(
        path: &Path,
        reserved: usize,
        data_type: u32,
        ordering: Ordering,
        minimum_capacity_items: u64,
    ) -> Result<Self> {
        let list = List::create_writer(path, reserved, data_type, minimum_capacity_items)?;
        Ok(TimeSeries {
            list,
            ordering,
            strategy_cache: Cell::new(None),
        })
    }

    pub fn open_reader(path: &Path, reserved: usize, ordering: Ordering) -> Result<Self> {
        let list = List::open_reader(path, reserved)?;
        Ok(TimeSeries {
            list,
            ordering,
            strategy_cache: Cell::new(None),
        })
    }

    pub fn count(&self) -> u64 {
        self.list.count()
    }

    pub fn ordering(&self) -> Ordering {
        self.ordering
    }

    pub fn get(&self, i: u64) -> Result<i32> {
        self.list.get(i)
    }

    /// Appends `value`, enforcing the configured ordering against the
    /// current last element. Leaves `count` unchanged on a violation.
    pub fn append(&mut self, value: i32) -> Result<u64> {
        let count = self.list.count();
        if count > 0 {
            let previous = self.list.get(count - 1)?;
            self.check_ordering(value, previous)?;
        }

        let idx = self.list.append(value)?;
        self.strategy_cache.set(None);
        Ok(idx)
    }

    pub fn set_last(&mut self, value: i32) -> Result<()> {
        let count = self.list.count();
        if count == 0 {
            return Err(Error::OutOfBounds { index: 0, count: 0 });
        }
        if count > 1 {
            let previous = self.list.get(count - 2)?;
            self.check_ordering(value, previous)?;
        }
        self.list.set_last(value)?;
        self.strategy_cache.set(None);
        Ok(())
    }

    pub fn truncate_tail(&mut self, new_count: u64) -> Result<()> {
        self.list.truncate_tail(new_count)?;
        self.strategy_cache.set(None);
        Ok(())
    }

    fn check_ordering(&self, value: i32, previous: i32) -> Result<()> {
        let ok = match self.ordering {
            Ordering::None => true,
            Ordering::WeaklyAscending => value as i64 >= previous as i64,
            Ordering::StrictlyAscending => value as i64 > previous as i64,
        };

        if ok {
            Ok(())
        } else {
            Err(Error::OrderViolation {
                value: value as i64,
                previous: previous as i64,
                ordering: self.ordering,
            })
        }
    }

    /// Smallest index `i` in `[0, last)` with `elem[i] >= v`, or `count` if
    /// none.
    pub fn lower_bound(&self, v: i32, strategy: Strategy) -> Result<u64> {
        self.search(v, strategy, Bound::Lower)
    }

    /// Smallest index `i` in `[0, last)` with `elem[i] > v`, or `count` if
    /// none.
    pub fn upper_bound(&self, v: i32, strategy: Strategy) -> Result<u64> {
        self.search(v, strategy, Bound::Upper)
    }

    /// A matching index, or the bitwise complement of the insertion point
    /// (as a signed offset) when absent.
    pub fn binary_search(&self, v: i32, strategy: Strategy) -> Result<i64> {
        let lb = self.search(v, strategy, Bound::Lower)? as i64;
        let count = self.count() as i64;
        if lb < count && self.get(lb as u64)? == v {
            Ok(lb)
        } else {
            Ok(!lb)
        }
    }

    fn search(&self, v: i32, strategy: Strategy, bound: Bound) -> Result<u64> {
        let count = self.count();
        if count == 0 {
            return Ok(0);
        }

        let resolved = match strategy {
            Strategy::Binary => CachedStrategy::Binary,
            Strategy::Interpolation => CachedStrategy::Interpolation,
            Strategy::Auto => self.auto_strategy(count)?,
        };

        match resolved {
            CachedStrategy::Binary => self.binary_search_impl(v, 0, count, bound),
            CachedStrategy::Interpolation => self.interpolation_search_impl(v, 0, count, bound),
        }
    }

    fn auto_strategy(&self, count: u64) -> Result<CachedStrategy> {
        if let Some(cached) = self.strategy_cache.get() {
            return Ok(cached);
        }

        let chosen = if count < AUTO_SAMPLE_FLOOR {
            CachedStrategy::Binary
        } else {
            self.detect_uniformity(count)?
        };

        self.strategy_cache.set(Some(chosen));
        Ok(chosen)
    }

    /// Samples `AUTO_SAMPLE_POINTS` evenly spaced indices, comparing each
    /// against the value an ideal uniform (arithmetic-progression)
    /// sequence would hold there; accumulates the mean absolute relative
    /// deviation. Below `AUTO_UNIFORMITY_THRESHOLD` the data looks uniform
    /// enough for interpolation search to win.
    fn detect_uniformity(&self, count: u64) -> Result<CachedStrategy> {
        let first = self.list.get(0)? as i64;
        let last = self.list.get(count - 1)? as i64;
        let span = last - first;

        if span == 0 {
            return Ok(CachedStrategy::Binary);
        }

        let mut total_deviation = 0.0f64;
        let samples = AUTO_SAMPLE_POINTS.min(count);

        for k in 0..samples {
            let idx = if samples <= 1 {
                0
            } else {
                (k * (count - 1)) / (samples - 1)
            };
            let actual = self.list.get(idx)? as i64;
            let expected = first + (span * idx as i64) / (count as i64 - 1);
            let deviation = (actual - expected).unsigned_abs() as f64;
            let relative = if span != 0 {
                deviation / span.unsigned_abs() as f64
            } else {
                0.0
            };
            total_deviation += relative;
        }

        let mean_deviation = total_deviation / samples as f64;
        if mean_deviation < AUTO_UNIFORMITY_THRESHOLD {
            Ok(CachedStrategy::Interpolation)
        } else {
            Ok(CachedStrategy::Binary)
        }
    }

    fn binary_search_impl(&self, v: i32, mut low: u64, mut high: u64, bound: Bound) -> Result<u64> {
        while low < high {
            let mid = low + (high - low) / 2;
            let elem = self.list.get(mid)?;
            let go_right = match bound {
                Bound::Lower => elem < v,
                Bound::Upper => elem <= v,
            };
            if go_right {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        Ok(low)
    }

    /// Interpolation search, reformulated to share the exact loop
    /// invariant as [`Self::binary_search_impl`] (find the smallest index
    /// in `[low, high)` satisfying the bound predicate): each iteration
    /// probes an interpolated position `pos` instead of the midpoint, but
    /// `pos` is always clamped into `[low, high-1]`, so every iteration
    /// still sets `low = pos+1` or `high = pos` and shrinks the interval by
    /// at least one element. That makes the progress guard structural
    /// rather than a special case: a probe landing on either boundary
    /// cannot repeat, unlike a naive interpolation-search formulation.
    fn interpolation_search_impl(
        &self,
        v: i32,
        mut low: u64,
        mut high: u64,
        bound: Bound,
    ) -> Result<u64> {
        while high - low > SHORT_WINDOW {
            let elem_low = self.list.get(low)? as i64;
            let last_idx = high - 1;
            let elem_high = self.list.get(last_idx)? as i64;
            let denom = elem_high - elem_low;

            if denom <= 0 {
                // Non-increasing span (ties, or weak ordering with
                // duplicates): interpolation's linear model doesn't apply.
                break;
            }

            let numerator = (v as i64 - elem_low) * (last_idx - low) as i64;
            let pos = (low as i64 + numerator / denom).clamp(low as i64, last_idx as i64) as u64;

            let elem = self.list.get(pos)?;
            let go_right = match bound {
                Bound::Lower => elem < v,
                Bound::Upper => elem <= v,
            };
            if go_right {
                low = pos + 1;
            } else {
                high = pos;
            }
        }

        self.binary_search_impl(v, low, high, bound)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    Lower,
    Upper,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(dir: &tempfile::TempDir, values: &[i32]) -> TimeSeries {
        let path = dir.path().join("series.bin");
        let mut ts =
            TimeSeries::create_writer(&path, 0, 13, Ordering::StrictlyAscending, 4).unwrap();
        for &v in values {
            ts.append(v).unwrap();
        }
        ts
    }

    #[test]
    fn strict_ordering_rejects_non_increasing() {
        let dir = tempfile::tempdir().unwrap();
        let mut ts = build(&dir, &[100, 200, 300]);
        let err = ts.append(200).unwrap_err();
        assert!(matches!(err, Error::OrderViolation { .. }));
        assert_eq!(ts.count(), 3);
        assert_eq!(ts.get(2).unwrap(), 300);
    }

    #[test]
    fn lower_bound_matches_linear_scan() {
        let dir = tempfile::tempdir().unwrap();
        let values: Vec<i32> = (0..500).map(|i| i * 2).collect();
        let ts = build(&dir, &values);

        for target in [-1, 0, 1, 500, 998, 999, 1200] {
            let expected = values.iter().position(|&x| x >= target).unwrap_or(values.len()) as u64;
            let got_binary = ts.lower_bound(target, Strategy::Binary).unwrap();
            let got_interp = ts.lower_bound(target, Strategy::Interpolation).unwrap();
            assert_eq!(got_binary, expected, "binary mismatch at {}", target);
            assert_eq!(got_interp, expected, "interpolation mismatch at {}", target);
        }
    }

    #[test]
    fn upper_bound_matches_linear_scan() {
        let dir = tempfile::tempdir().unwrap();
        let values: Vec<i32> = (0..500).map(|i| i * 2).collect();
        let ts = build(&dir, &values);

        for target in [-1, 0, 1, 998, 999] {
            let expected = values.iter().position(|&x| x > target).unwrap_or(values.len()) as u64;
            assert_eq!(ts.upper_bound(target, Strategy::Binary).unwrap(), expected);
        }
    }

    #[test]
    fn interpolation_terminates_on_boundary_landing_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let base = 1_700_000_000i32;
        let values: Vec<i32> = (0..20_000).map(|i| base + i).collect();
        let ts = build(&dir, &values);

        let idx = ts
            .lower_bound(base + 19_999, Strategy::Interpolation)
            .unwrap();
        assert_eq!(idx, 19_999);

        let upper = ts
            .upper_bound(base + 19_999, Strategy::Interpolation)
            .unwrap();
        assert_eq!(upper, 20_000);
    }

    #[test]
    fn auto_selects_interpolation_for_uniform_large_sequences() {
        let dir = tempfile::tempdir().unwrap();
        let values: Vec<i32> = (0..20_000).map(|i| i).collect();
        let ts = build(&dir, &values);

        let chosen = ts.auto_strategy(ts.count()).unwrap();
        assert_eq!(chosen, CachedStrategy::Interpolation);
    }

    #[test]
    fn auto_selects_binary_for_skewed_sequences() {
        let dir = tempfile::tempdir().unwrap();
        let mut values: Vec<i32> = Vec::with_capacity(20_000);
        let mut v = 0i32;
        for i in 0..20_000 {
            v += if i < 19_000 { 1 } else { 1_000_000 };
            values.push(v);
        }
        let ts = build(&dir, &values);

        let chosen = ts.auto_strategy(ts.count()).unwrap();
        assert_eq!(chosen, CachedStrategy::Binary);
    }
}

#[cfg(test)]
mod round_trip_law {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// `lower_bound`/`upper_bound` agree with a reference linear scan
        /// for arbitrary weakly-ascending sequences and targets, under both
        /// explicit strategies.
        #[test]
        fn bounds_match_linear_scan(
            mut values in prop::collection::vec(-1_000i32..1_000, 0..200),
            target in -1_200i32..1_200,
        ) {
            values.sort_unstable();

            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("series.bin");
            let mut ts = TimeSeries::create_writer(
                &path, 0, crate::tags::UNIX_SECONDS, Ordering::WeaklyAscending, 4,
            ).unwrap();
            for &v in &values {
                ts.append(v).unwrap();
            }

            let expected_lower = values.iter().position(|&x| x >= target).unwrap_or(values.len()) as u64;
            let expected_upper = values.iter().position(|&x| x > target).unwrap_or(values.len()) as u64;

            prop_assert_eq!(ts.lower_bound(target, Strategy::Binary).unwrap(), expected_lower);
            prop_assert_eq!(ts.lower_bound(target, Strategy::Interpolation).unwrap(), expected_lower);
            prop_assert_eq!(ts.upper_bound(target, Strategy::Binary).unwrap(), expected_upper);
            prop_assert_eq!(ts.upper_bound(target, Strategy::Interpolation).unwrap(), expected_upper);
        }
    }
}

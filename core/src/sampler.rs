//! Distribution sampler: uniform ranges, survival-table interpolation,
//! death-time draws and without-replacement selection.
//!
//! Every function takes the random source by `&mut` reference; nothing
//! here owns or hides RNG state.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{
    clock::days_between,
    error::{SimError, SimResult},
    rng::RandomSource,
};

/// Inclusive `[min, max]` range of whole days.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DayRange {
    pub min: u32,
    pub max: u32,
}

impl DayRange {
    pub const ZERO: DayRange = DayRange { min: 0, max: 0 };

    /// Build from a raw config pair; rejects negatives and min > max.
    pub fn from_pair(field: &str, (min, max): (i64, i64)) -> SimResult<Self> {
        if min < 0 || max < 0 {
            return Err(SimError::config(field, format!("range [{min}, {max}] must be non-negative")));
        }
        if min > max {
            return Err(SimError::config(field, format!("range min {min} exceeds max {max}")));
        }
        let to_u32 = |v: i64| {
            u32::try_from(v).map_err(|_| SimError::config(field, format!("{v} days is too large")))
        };
        Ok(Self { min: to_u32(min)?, max: to_u32(max)? })
    }

    pub fn contains(&self, days: i64) -> bool {
        days >= i64::from(self.min) && days <= i64::from(self.max)
    }
}

/// Inclusive `[min, max]` fraction range inside [0, 1].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FractionRange {
    pub min: f64,
    pub max: f64,
}

impl FractionRange {
    pub fn from_pair(field: &str, (min, max): (f64, f64)) -> SimResult<Self> {
        if !min.is_finite() || !max.is_finite() {
            return Err(SimError::config(field, "fractions must be finite"));
        }
        if !(0.0..=1.0).contains(&min) || !(0.0..=1.0).contains(&max) {
            return Err(SimError::config(field, format!("[{min}, {max}] must lie within [0, 1]")));
        }
        if min > max {
            return Err(SimError::config(field, format!("range min {min} exceeds max {max}")));
        }
        Ok(Self { min, max })
    }

    pub fn midpoint(&self) -> f64 {
        (self.min + self.max) / 2.0
    }
}

/// Sparse year → survival-probability anchors.
///
/// Probabilities are in (0, 1] and non-increasing with year. Between
/// anchors the curve is linear; outside them it is clamped.
#[derive(Debug, Clone, PartialEq)]
pub struct SurvivalTable {
    anchors: Vec<(u32, f64)>,
}

impl SurvivalTable {
    pub fn new(field: &str, table: &BTreeMap<u32, f64>) -> SimResult<Self> {
        if table.is_empty() {
            return Err(SimError::config(field, "survival table must have at least one anchor"));
        }
        let mut anchors = Vec::with_capacity(table.len());
        let mut previous: Option<(u32, f64)> = None;
        for (&year, &p) in table {
            if year == 0 {
                return Err(SimError::config(field, "anchor years start at 1"));
            }
            if !p.is_finite() || p <= 0.0 || p > 1.0 {
                return Err(SimError::config(field, format!("probability {p} at year {year} must lie in (0, 1]")));
            }
            if let Some((prev_year, prev_p)) = previous {
                if p > prev_p {
                    return Err(SimError::config(
                        field,
                        format!("survival rises from {prev_p} (year {prev_year}) to {p} (year {year})"),
                    ));
                }
            }
            previous = Some((year, p));
            anchors.push((year, p));
        }
        Ok(Self { anchors })
    }

    pub fn anchors(&self) -> &[(u32, f64)] {
        &self.anchors
    }

    pub fn last_year(&self) -> u32 {
        self.anchors.last().map(|&(y, _)| y).unwrap_or(0)
    }

    /// Survival probability after `elapsed_years`.
    pub fn probability_at(&self, elapsed_years: f64) -> f64 {
        let (first_year, first_p) = self.anchors[0];
        if elapsed_years <= f64::from(first_year) {
            return first_p;
        }
        for pair in self.anchors.windows(2) {
            let (y0, p0) = pair[0];
            let (y1, p1) = pair[1];
            let (x0, x1) = (f64::from(y0), f64::from(y1));
            if elapsed_years <= x1 {
                return p0 + (p1 - p0) * (elapsed_years - x0) / (x1 - x0);
            }
        }
        self.anchors[self.anchors.len() - 1].1
    }
}

/// Uniform whole-day offset in `[range.min, range.max]`.
pub fn sample_uniform_range<R: RandomSource + ?Sized>(rng: &mut R, range: DayRange) -> u32 {
    let span = u64::from(range.max - range.min) + 1;
    range.min + rng.next_u64_below(span) as u32
}

/// Uniform fraction in `[range.min, range.max]`.
pub fn sample_fraction<R: RandomSource + ?Sized>(rng: &mut R, range: FractionRange) -> f64 {
    range.min + (range.max - range.min) * rng.next_f64()
}

/// Uniform date in `[start, end]`, both inclusive.
pub fn sample_date_between<R: RandomSource + ?Sized>(
    rng: &mut R,
    start: NaiveDate,
    end: NaiveDate,
) -> SimResult<NaiveDate> {
    let span = days_between(start, end);
    if span < 0 {
        return Err(SimError::DateOverflow(format!("empty date range {start}..={end}")));
    }
    let offset = rng.next_u64_below(span as u64 + 1);
    crate::clock::add_days(start, offset as u32)
}

pub fn sample_from_survival_table(table: &SurvivalTable, elapsed_years: f64) -> f64 {
    table.probability_at(elapsed_years)
}

/// Whole years from diagnosis to death, or `None` when the patient
/// survives past `max_horizon_years`.
///
/// Draws exactly one uniform `u` and returns the smallest year `y` in
/// 1..=max_horizon with S(y) <= u.
pub fn sample_death_time<R: RandomSource + ?Sized>(
    rng: &mut R,
    table: &SurvivalTable,
    max_horizon_years: u32,
) -> Option<u32> {
    let u = rng.next_f64();
    (1..=max_horizon_years).find(|&year| table.probability_at(f64::from(year)) <= u)
}

/// `k` distinct indices from `0..n`, in draw order (partial Fisher–Yates).
pub fn choose_without_replacement<R: RandomSource + ?Sized>(
    rng: &mut R,
    n: usize,
    k: usize,
) -> Vec<usize> {
    assert!(k <= n, "cannot choose {k} of {n}");
    let mut pool: Vec<usize> = (0..n).collect();
    for i in 0..k {
        let j = i + rng.next_u64_below((n - i) as u64) as usize;
        pool.swap(i, j);
    }
    pool.truncate(k);
    pool
}

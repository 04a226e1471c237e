//! Simulation calendar: date offsets, DB-update boundaries and the
//! monthly buckets the abstraction loop walks through.
//!
//! All month arithmetic is anchored at a fixed origin and computed as
//! origin + n months, never by repeated stepping, so end-of-month
//! clamping cannot drift.

use chrono::{Datelike, Days, Months, NaiveDate};

use crate::error::{SimError, SimResult};

pub fn add_days(date: NaiveDate, days: u32) -> SimResult<NaiveDate> {
    date.checked_add_days(Days::new(u64::from(days)))
        .ok_or_else(|| SimError::DateOverflow(format!("{date} + {days} days")))
}

pub fn add_months(date: NaiveDate, months: u32) -> SimResult<NaiveDate> {
    date.checked_add_months(Months::new(months))
        .ok_or_else(|| SimError::DateOverflow(format!("{date} + {months} months")))
}

pub fn add_years(date: NaiveDate, years: u32) -> SimResult<NaiveDate> {
    let months = years
        .checked_mul(12)
        .ok_or_else(|| SimError::DateOverflow(format!("{date} + {years} years")))?;
    add_months(date, months)
}

/// Whole calendar months from `from` to `to` (month fields only).
pub fn months_between(from: NaiveDate, to: NaiveDate) -> i64 {
    i64::from(to.year() - from.year()) * 12 + i64::from(to.month()) - i64::from(from.month())
}

/// Days from `from` to `to`; negative when `to` is earlier.
pub fn days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    (to - from).num_days()
}

/// Database ingestion schedule: one boundary every `frequency_months`
/// months starting at `origin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbUpdateSchedule {
    origin:           NaiveDate,
    frequency_months: u32,
}

impl DbUpdateSchedule {
    pub fn new(origin: NaiveDate, frequency_months: u32) -> Self {
        assert!(frequency_months > 0, "frequency_months must be > 0");
        Self { origin, frequency_months }
    }

    pub fn boundary(&self, index: u32) -> SimResult<NaiveDate> {
        let months = index
            .checked_mul(self.frequency_months)
            .ok_or_else(|| SimError::DateOverflow(format!("boundary #{index}")))?;
        add_months(self.origin, months)
    }

    /// The first boundary on or after `date`.
    pub fn next_boundary_on_or_after(&self, date: NaiveDate) -> SimResult<NaiveDate> {
        if date <= self.origin {
            return Ok(self.origin);
        }
        // Boundary (mb / freq) - 1 lies in an earlier calendar month than
        // `date`, so scanning upward from mb / freq finds the first one.
        let mb = months_between(self.origin, date).max(0) as u32;
        let mut index = mb / self.frequency_months;
        loop {
            let candidate = self.boundary(index)?;
            if candidate >= date {
                return Ok(candidate);
            }
            index += 1;
        }
    }

    pub fn is_boundary(&self, date: NaiveDate) -> SimResult<bool> {
        Ok(self.next_boundary_on_or_after(date)? == date)
    }
}

/// Month bucket `index` starts at origin + index months.
pub fn month_bucket_start(origin: NaiveDate, index: u32) -> SimResult<NaiveDate> {
    add_months(origin, index)
}

/// Index of the first month bucket that starts on or after `date`.
pub fn first_bucket_on_or_after(origin: NaiveDate, date: NaiveDate) -> SimResult<u32> {
    if date <= origin {
        return Ok(0);
    }
    let mut index = months_between(origin, date).max(0) as u32;
    loop {
        if month_bucket_start(origin, index)? >= date {
            return Ok(index);
        }
        index += 1;
    }
}

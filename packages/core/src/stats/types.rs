//! Normalized statistics types every provider backend produces.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::stats::provider::ProviderResult;

/// One day's cumulative counts for a country.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailySnapshot {
    pub date: NaiveDate,
    pub confirmed: u64,
    pub recovered: u64,
    pub deaths: u64,
}

impl DailySnapshot {
    pub fn new(date: NaiveDate, confirmed: u64, recovered: u64, deaths: u64) -> Self {
        Self {
            date,
            confirmed,
            recovered,
            deaths,
        }
    }
}

/// A country's snapshots, ascending by date with one entry per day.
pub type Series = Vec<DailySnapshot>;

/// Bulk provider output keyed by country slug. A country whose part of the
/// payload was malformed carries its own error instead of a partial series.
pub type SeriesBySlug = BTreeMap<String, ProviderResult<Series>>;

/// Accumulates raw per-row counts into a normalized series.
///
/// Upstream payloads may split a country into several province rows, or
/// list days out of order; pushing every row through one accumulator and
/// calling [`SeriesAccumulator::finish`] sums rows sharing a date and sorts
/// the result.
#[derive(Debug, Default)]
pub struct SeriesAccumulator {
    days: BTreeMap<NaiveDate, (u64, u64, u64)>,
}

impl SeriesAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, date: NaiveDate, confirmed: u64, recovered: u64, deaths: u64) {
        let entry = self.days.entry(date).or_insert((0, 0, 0));
        entry.0 = entry.0.saturating_add(confirmed);
        entry.1 = entry.1.saturating_add(recovered);
        entry.2 = entry.2.saturating_add(deaths);
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn finish(self) -> Series {
        self.days
            .into_iter()
            .map(|(date, (confirmed, recovered, deaths))| {
                DailySnapshot::new(date, confirmed, recovered, deaths)
            })
            .collect()
    }
}

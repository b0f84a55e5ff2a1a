//! Metrics Calculator
//!
//! Pure functions from an ascending snapshot series to [`CountryMetrics`].
//! Every arithmetic hazard goes through one of the named guards below and
//! comes out as [`Metric::Unavailable`], never as a panic, `inf` or `NaN`.

use chrono::NaiveDate;

use crate::country::CountryRef;
use crate::digest::{
    config::MetricsConfig,
    error::CalculationGuard,
    types::{CountryMetrics, Counts, Metric, Percent, Shares},
};
use crate::stats::types::DailySnapshot;

fn settle<T>(result: Result<T, CalculationGuard>) -> Metric<T> {
    match result {
        Ok(v) => Metric::Value(v),
        Err(guard) => {
            tracing::trace!("metric unavailable: {}", guard);
            Metric::Unavailable
        }
    }
}

fn round_to(value: f64, precision: u8, operation: &'static str) -> Result<f64, CalculationGuard> {
    let factor = 10f64.powi(precision as i32);
    // Adding 0.0 turns a rounded -0.0 into +0.0.
    let rounded = (value * factor).round() / factor + 0.0;
    if rounded.is_finite() {
        Ok(rounded)
    } else {
        Err(CalculationGuard::NonFinite { operation })
    }
}

fn try_delta(curr: u64, prev: Option<u64>) -> Result<i64, CalculationGuard> {
    let prev = prev.ok_or(CalculationGuard::MissingHistory { operation: "delta" })?;
    i64::try_from(curr as i128 - prev as i128)
        .map_err(|_| CalculationGuard::Overflow { operation: "delta" })
}

fn try_percent_change(curr: u64, prev: Option<u64>, precision: u8) -> Result<Percent, CalculationGuard> {
    let operation = "percent_change";
    let prev = prev.ok_or(CalculationGuard::MissingHistory { operation })?;
    if prev == 0 {
        return Err(CalculationGuard::DivisionByZero { operation });
    }
    let raw = (curr as f64 / prev as f64 - 1.0) * 100.0;
    Ok(Percent {
        value: round_to(raw, precision, operation)?,
        precision,
    })
}

fn try_share(part: u64, whole: u64, precision: u8) -> Result<Percent, CalculationGuard> {
    let operation = "share";
    if whole == 0 {
        return Err(CalculationGuard::DivisionByZero { operation });
    }
    let raw = part as f64 / whole as f64 * 100.0;
    Ok(Percent {
        value: round_to(raw, precision, operation)?,
        precision,
    })
}

/// `curr - prev`, or `Unavailable` without a previous value. Negative
/// results (upstream corrections) are kept.
pub fn delta(curr: u64, prev: Option<u64>) -> Metric<i64> {
    settle(try_delta(curr, prev))
}

/// `(curr / prev - 1) * 100` rounded to `precision` places, or
/// `Unavailable` when `prev` is missing or zero.
pub fn percent_change(curr: u64, prev: Option<u64>, precision: u8) -> Metric<Percent> {
    settle(try_percent_change(curr, prev, precision))
}

/// `part / whole * 100` rounded to `precision` places, or `Unavailable`
/// when `whole` is zero.
pub fn share(part: u64, whole: u64, precision: u8) -> Metric<Percent> {
    settle(try_share(part, whole, precision))
}

/// Whole calendar days between `today` and the first snapshot matching
/// `predicate`, or `Unavailable` if none does.
pub fn first_occurrence_offset<P>(series: &[DailySnapshot], today: NaiveDate, predicate: P) -> Metric<i64>
where
    P: Fn(&DailySnapshot) -> bool,
{
    settle(
        series
            .iter()
            .find(|s| predicate(s))
            .map(|s| (today - s.date).num_days())
            .ok_or(CalculationGuard::NoOccurrence {
                operation: "first_occurrence_offset",
            }),
    )
}

fn active_cases(snapshot: &DailySnapshot) -> u64 {
    snapshot
        .confirmed
        .saturating_sub(snapshot.recovered)
        .saturating_sub(snapshot.deaths)
}

fn totals_of(snapshot: Option<&DailySnapshot>) -> Counts<Metric<u64>> {
    match snapshot {
        Some(s) => Counts {
            confirmed: Metric::Value(s.confirmed),
            recovered: Metric::Value(s.recovered),
            deaths: Metric::Value(s.deaths),
        },
        None => Counts::splat(Metric::Unavailable),
    }
}

fn deltas_between(curr: Option<&DailySnapshot>, prev: Option<&DailySnapshot>) -> Counts<Metric<i64>> {
    match curr {
        Some(c) => Counts {
            confirmed: delta(c.confirmed, prev.map(|p| p.confirmed)),
            recovered: delta(c.recovered, prev.map(|p| p.recovered)),
            deaths: delta(c.deaths, prev.map(|p| p.deaths)),
        },
        None => Counts::splat(Metric::Unavailable),
    }
}

fn shares_of(snapshot: Option<&DailySnapshot>, precision: u8) -> Shares {
    match snapshot {
        Some(s) => Shares {
            active: share(active_cases(s), s.confirmed, precision),
            deaths: share(s.deaths, s.confirmed, precision),
            recovered: share(s.recovered, s.confirmed, precision),
        },
        None => Shares {
            active: Metric::Unavailable,
            deaths: Metric::Unavailable,
            recovered: Metric::Unavailable,
        },
    }
}

/// Compute every derived metric for one country.
///
/// `series` must be ascending by date. `today` anchors the
/// days-since-first-occurrence offsets so the result depends on nothing but
/// the arguments.
pub fn compute_metrics(
    country: &CountryRef,
    series: &[DailySnapshot],
    today: NaiveDate,
    config: &MetricsConfig,
) -> CountryMetrics {
    let n = series.len();
    let curr = series.last();
    let prev = n.checked_sub(2).and_then(|i| series.get(i));
    let before_prev = n.checked_sub(3).and_then(|i| series.get(i));

    let percent_changes = match curr {
        Some(c) => Counts {
            confirmed: percent_change(
                c.confirmed,
                prev.map(|p| p.confirmed),
                config.change_precision.confirmed,
            ),
            recovered: percent_change(
                c.recovered,
                prev.map(|p| p.recovered),
                config.change_precision.recovered,
            ),
            deaths: percent_change(
                c.deaths,
                prev.map(|p| p.deaths),
                config.change_precision.deaths,
            ),
        },
        None => Counts::splat(Metric::Unavailable),
    };

    let precision = config.share_precision;

    CountryMetrics {
        country: country.clone(),
        as_of: curr.map(|c| c.date),
        totals: totals_of(curr),
        previous_totals: totals_of(prev),
        deltas: deltas_between(curr, prev),
        previous_deltas: deltas_between(prev, before_prev),
        percent_changes,
        active: curr.map(active_cases).into(),
        previous_active: prev.map(active_cases).into(),
        shares: shares_of(curr, precision),
        previous_shares: shares_of(prev, precision),
        days_since_first_case: first_occurrence_offset(series, today, |s| s.confirmed > 0),
        days_since_first_death: first_occurrence_offset(series, today, |s| s.deaths > 0),
    }
}

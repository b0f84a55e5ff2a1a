//! Core data types for digest computation

use chrono::NaiveDate;
use serde::{Serialize, Serializer};

use crate::country::CountryRef;

/// A derived value, or the sentinel that replaces it when the inputs can't
/// produce a meaningful number (missing history, zero divisor, overflow).
///
/// Serializes as the bare value, or `null` when unavailable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Metric<T> {
    Value(T),
    Unavailable,
}

impl<T> Metric<T> {
    pub fn value(self) -> Option<T> {
        match self {
            Metric::Value(v) => Some(v),
            Metric::Unavailable => None,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Metric::Unavailable)
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Metric<U> {
        match self {
            Metric::Value(v) => Metric::Value(f(v)),
            Metric::Unavailable => Metric::Unavailable,
        }
    }
}

impl<T> From<Option<T>> for Metric<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Metric::Value(v),
            None => Metric::Unavailable,
        }
    }
}

impl<T: Serialize> Serialize for Metric<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Metric::Value(v) => v.serialize(serializer),
            Metric::Unavailable => serializer.serialize_none(),
        }
    }
}

/// A percentage already rounded to `precision` decimal places.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Percent {
    pub value: f64,
    pub precision: u8,
}

impl Percent {
    /// Render with an explicit sign, e.g. `+50.00` or `-3.10`.
    pub fn signed(&self) -> String {
        format!("{:+.*}", self.precision as usize, self.value)
    }
}

impl Serialize for Percent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.value)
    }
}

/// One value per tracked count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Counts<T> {
    pub confirmed: T,
    pub recovered: T,
    pub deaths: T,
}

impl<T: Copy> Counts<T> {
    pub fn splat(value: T) -> Self {
        Self {
            confirmed: value,
            recovered: value,
            deaths: value,
        }
    }
}

/// Shares of the confirmed total.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Shares {
    pub active: Metric<Percent>,
    pub deaths: Metric<Percent>,
    pub recovered: Metric<Percent>,
}

/// Derived statistics for one country, recomputed every run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountryMetrics {
    pub country: CountryRef,
    /// Date of the latest snapshot the metrics were computed from.
    pub as_of: Option<NaiveDate>,
    pub totals: Counts<Metric<u64>>,
    pub previous_totals: Counts<Metric<u64>>,
    pub deltas: Counts<Metric<i64>>,
    pub previous_deltas: Counts<Metric<i64>>,
    pub percent_changes: Counts<Metric<Percent>>,
    pub active: Metric<u64>,
    pub previous_active: Metric<u64>,
    pub shares: Shares,
    pub previous_shares: Shares,
    pub days_since_first_case: Metric<i64>,
    pub days_since_first_death: Metric<i64>,
}

/// Template data for one digest email, in the template's field names.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateData {
    pub country: String,
    pub country_slug: String,
    pub user_email: String,
    pub report_date: Option<String>,

    pub total_cases: Metric<u64>,
    pub yesterday_total_cases: Metric<u64>,
    pub total_deaths: Metric<u64>,
    pub yesterday_total_deaths: Metric<u64>,
    pub total_recovered: Metric<u64>,
    pub yesterday_total_recovered: Metric<u64>,
    pub active_cases: Metric<u64>,
    pub yesterday_active_cases: Metric<u64>,

    pub active_cases_percent: Metric<Percent>,
    pub total_deaths_percent: Metric<Percent>,
    pub total_recovered_percent: Metric<Percent>,
    pub yesterday_active_cases_percent: Metric<Percent>,
    pub yesterday_total_deaths_percent: Metric<Percent>,
    pub yesterday_total_recovered_percent: Metric<Percent>,

    pub today_cases: Metric<i64>,
    pub yesterday_cases: Metric<i64>,
    pub today_deaths: Metric<i64>,
    pub yesterday_deaths: Metric<i64>,
    pub today_recovered: Metric<i64>,
    pub yesterday_recovered: Metric<i64>,

    pub today_cases_increase: Option<String>,
    pub today_deaths_increase: Option<String>,
    pub today_recovered_increase: Option<String>,

    pub days_since_first_case: Metric<i64>,
    pub days_since_first_death: Metric<i64>,
}

/// One subscriber's digest, ready to hand to the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DigestPayload {
    pub country_slug: String,
    pub recipient: String,
    pub template_data: TemplateData,
}

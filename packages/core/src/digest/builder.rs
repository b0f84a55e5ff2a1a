//! Digest Builder
//!
//! Joins per-country metrics with the subscribers of each country into one
//! payload per subscriber.

use std::collections::BTreeMap;

use crate::digest::types::{CountryMetrics, DigestPayload, Metric, Percent, TemplateData};
use crate::registry::Subscriber;

/// Bind one country's metrics to one subscriber's template fields.
pub fn template_data(metrics: &CountryMetrics, email: &str) -> TemplateData {
    let increase = |m: Metric<Percent>| m.value().map(|p| p.signed());

    TemplateData {
        country: metrics.country.name.clone(),
        country_slug: metrics.country.slug.clone(),
        user_email: email.to_string(),
        report_date: metrics.as_of.map(|d| d.format("%Y-%m-%d").to_string()),

        total_cases: metrics.totals.confirmed,
        yesterday_total_cases: metrics.previous_totals.confirmed,
        total_deaths: metrics.totals.deaths,
        yesterday_total_deaths: metrics.previous_totals.deaths,
        total_recovered: metrics.totals.recovered,
        yesterday_total_recovered: metrics.previous_totals.recovered,
        active_cases: metrics.active,
        yesterday_active_cases: metrics.previous_active,

        active_cases_percent: metrics.shares.active,
        total_deaths_percent: metrics.shares.deaths,
        total_recovered_percent: metrics.shares.recovered,
        yesterday_active_cases_percent: metrics.previous_shares.active,
        yesterday_total_deaths_percent: metrics.previous_shares.deaths,
        yesterday_total_recovered_percent: metrics.previous_shares.recovered,

        today_cases: metrics.deltas.confirmed,
        yesterday_cases: metrics.previous_deltas.confirmed,
        today_deaths: metrics.deltas.deaths,
        yesterday_deaths: metrics.previous_deltas.deaths,
        today_recovered: metrics.deltas.recovered,
        yesterday_recovered: metrics.previous_deltas.recovered,

        today_cases_increase: increase(metrics.percent_changes.confirmed),
        today_deaths_increase: increase(metrics.percent_changes.deaths),
        today_recovered_increase: increase(metrics.percent_changes.recovered),

        days_since_first_case: metrics.days_since_first_case,
        days_since_first_death: metrics.days_since_first_death,
    }
}

/// Build one payload per (country, subscriber) pair.
///
/// Countries missing from `metrics` (failed upstream) or with no
/// subscribers contribute nothing. The result is sorted by
/// `(country_slug, recipient)`, so identical inputs always give identical
/// output.
pub fn build(
    metrics: &BTreeMap<String, CountryMetrics>,
    subscribers: &BTreeMap<String, Vec<Subscriber>>,
) -> Vec<DigestPayload> {
    let mut payloads: Vec<DigestPayload> = metrics
        .iter()
        .filter_map(|(slug, country_metrics)| {
            subscribers
                .get(slug)
                .filter(|subs| !subs.is_empty())
                .map(|subs| (country_metrics, subs))
        })
        .flat_map(|(country_metrics, subs)| {
            subs.iter().map(move |sub| DigestPayload {
                country_slug: country_metrics.country.slug.clone(),
                recipient: sub.email.clone(),
                template_data: template_data(country_metrics, &sub.email),
            })
        })
        .collect();

    payloads.sort_by(|a, b| {
        (a.country_slug.as_str(), a.recipient.as_str())
            .cmp(&(b.country_slug.as_str(), b.recipient.as_str()))
    });
    payloads
}

/// Group payloads by country, preserving their order within each group.
pub fn group_by_country(payloads: Vec<DigestPayload>) -> BTreeMap<String, Vec<DigestPayload>> {
    let mut grouped: BTreeMap<String, Vec<DigestPayload>> = BTreeMap::new();
    for payload in payloads {
        grouped
            .entry(payload.country_slug.clone())
            .or_default()
            .push(payload);
    }
    grouped
}

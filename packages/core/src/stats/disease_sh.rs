//! disease.sh Stats Provider Adapter
//!
//! Adapts the disease.sh v3 "historical" endpoints to the [`StatsProvider`]
//! trait. Supports both bulk and per-country fetches.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;

use crate::config::HistoryWindow;
use crate::country::{slugify, CountryRef};
use crate::stats::{
    error::ProviderError,
    http::StatsHttpClient,
    provider::{ProviderMetadata, ProviderResult, StatsProvider},
    types::{Series, SeriesAccumulator, SeriesBySlug},
};

const TIMELINE_DATE_FORMAT: &str = "%m/%d/%y";

/// Adapter that implements StatsProvider for disease.sh
pub struct DiseaseShProvider {
    client: StatsHttpClient,
    history: HistoryWindow,
}

#[derive(Debug, Deserialize)]
struct CountrySummary {
    country: String,
}

/// One row of the historical payload. A country split into provinces
/// arrives as several rows sharing `country`.
#[derive(Debug, Deserialize)]
struct HistoricalRecord {
    country: String,
    timeline: Timeline,
}

#[derive(Debug, Deserialize)]
struct Timeline {
    #[serde(default)]
    cases: HashMap<String, Option<u64>>,
    #[serde(default)]
    deaths: HashMap<String, Option<u64>>,
    // Dropped upstream for most countries in later API revisions.
    #[serde(default)]
    recovered: HashMap<String, Option<u64>>,
}

impl DiseaseShProvider {
    pub fn new(client: StatsHttpClient, history: HistoryWindow) -> Self {
        Self { client, history }
    }

    /// Add one timeline to `acc`. Every date is parsed before anything is
    /// added, so a malformed timeline leaves `acc` untouched.
    fn accumulate(acc: &mut SeriesAccumulator, timeline: &Timeline) -> ProviderResult<()> {
        let mut rows = Vec::new();
        for (key, value) in &timeline.cases {
            rows.push((parse_timeline_date(key)?, value.unwrap_or(0), 0, 0));
        }
        for (key, value) in &timeline.recovered {
            rows.push((parse_timeline_date(key)?, 0, value.unwrap_or(0), 0));
        }
        for (key, value) in &timeline.deaths {
            rows.push((parse_timeline_date(key)?, 0, 0, value.unwrap_or(0)));
        }
        for (date, confirmed, recovered, deaths) in rows {
            acc.add(date, confirmed, recovered, deaths);
        }
        Ok(())
    }
}

fn parse_timeline_date(raw: &str) -> ProviderResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, TIMELINE_DATE_FORMAT)
        .map_err(|e| ProviderError::schema(format!("Invalid timeline date '{}': {}", raw, e)))
}

#[async_trait]
impl StatsProvider for DiseaseShProvider {
    async fn fetch_countries(&self) -> ProviderResult<Vec<CountryRef>> {
        let summaries: Vec<CountrySummary> = self.client.get_json("/v3/covid-19/countries").await?;
        Ok(summaries
            .into_iter()
            .map(|c| CountryRef::new(c.country))
            .collect())
    }

    async fn fetch_all(&self) -> ProviderResult<SeriesBySlug> {
        let path = format!("/v3/covid-19/historical?lastdays={}", self.history);
        let records: Vec<HistoricalRecord> = self.client.get_json(&path).await?;

        // A malformed row poisons its own country only; the other
        // province rows of that country are discarded with it.
        let mut by_slug: BTreeMap<String, ProviderResult<SeriesAccumulator>> = BTreeMap::new();
        for record in &records {
            let slug = slugify(&record.country);
            let entry = by_slug
                .entry(slug.clone())
                .or_insert_with(|| Ok(SeriesAccumulator::new()));
            let result = match entry {
                Ok(acc) => Self::accumulate(acc, &record.timeline),
                Err(_) => continue,
            };
            if let Err(err) = result {
                tracing::warn!(country = %slug, "Malformed historical row: {}", err);
                *entry = Err(err);
            }
        }

        Ok(by_slug
            .into_iter()
            .filter_map(|(slug, acc)| match acc {
                Ok(acc) if acc.is_empty() => None,
                Ok(acc) => Some((slug, Ok(acc.finish()))),
                Err(err) => Some((slug, Err(err))),
            })
            .collect())
    }

    async fn fetch_one(&self, country: &CountryRef) -> ProviderResult<Series> {
        let path = format!(
            "/v3/covid-19/historical/{}?lastdays={}",
            country.name.replace(' ', "%20"),
            self.history
        );
        let record: HistoricalRecord = self.client.get_json(&path).await.map_err(|e| match e {
            ProviderError::NotFound { .. } => ProviderError::not_found(&country.slug),
            other => other,
        })?;

        let mut acc = SeriesAccumulator::new();
        Self::accumulate(&mut acc, &record.timeline)?;
        if acc.is_empty() {
            return Err(ProviderError::not_found(&country.slug));
        }
        Ok(acc.finish())
    }

    fn provider_name(&self) -> &str {
        "disease.sh"
    }

    fn get_metadata(&self) -> ProviderMetadata {
        ProviderMetadata { supports_bulk: true }
    }
}

//! In-memory stats provider for tests and local runs.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;

use crate::country::CountryRef;
use crate::stats::{
    error::ProviderError,
    provider::{ProviderMetadata, ProviderResult, StatsProvider},
    types::{Series, SeriesBySlug},
};

/// Provider backed by fixed data, with per-country failure injection.
#[derive(Default)]
pub struct MockStatsProvider {
    countries: Vec<CountryRef>,
    series: BTreeMap<String, Series>,
    failures: HashMap<String, ProviderError>,
    delays: HashMap<String, Duration>,
    bulk: bool,
    bulk_error: Option<ProviderError>,
}

impl MockStatsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a country and its series.
    pub fn with_country(mut self, name: &str, series: Series) -> Self {
        let country = CountryRef::new(name);
        self.series.insert(country.slug.clone(), series);
        self.countries.push(country);
        self
    }

    /// Register a country whose fetch fails with `error`.
    pub fn with_failing_country(mut self, name: &str, error: ProviderError) -> Self {
        let country = CountryRef::new(name);
        self.failures.insert(country.slug.clone(), error);
        self.countries.push(country);
        self
    }

    /// Make the named country's per-country fetch sleep before answering.
    pub fn with_delay(mut self, name: &str, delay: Duration) -> Self {
        self.delays.insert(CountryRef::new(name).slug, delay);
        self
    }

    /// Advertise and serve `fetch_all`.
    pub fn with_bulk(mut self) -> Self {
        self.bulk = true;
        self
    }

    /// Serve `fetch_all` but have it fail as a whole.
    pub fn with_bulk_error(mut self, error: ProviderError) -> Self {
        self.bulk = true;
        self.bulk_error = Some(error);
        self
    }
}

#[async_trait]
impl StatsProvider for MockStatsProvider {
    async fn fetch_countries(&self) -> ProviderResult<Vec<CountryRef>> {
        Ok(self.countries.clone())
    }

    async fn fetch_all(&self) -> ProviderResult<SeriesBySlug> {
        if !self.bulk {
            return Err(ProviderError::unsupported("fetch_all"));
        }
        if let Some(err) = &self.bulk_error {
            return Err(err.clone());
        }
        // A NotFound country is absent from a bulk payload; any other
        // failure travels with its slug.
        let mut all: SeriesBySlug = self
            .series
            .iter()
            .map(|(slug, series)| (slug.clone(), Ok(series.clone())))
            .collect();
        for (slug, err) in &self.failures {
            if !matches!(err, ProviderError::NotFound { .. }) {
                all.insert(slug.clone(), Err(err.clone()));
            }
        }
        Ok(all)
    }

    async fn fetch_one(&self, country: &CountryRef) -> ProviderResult<Series> {
        if let Some(delay) = self.delays.get(&country.slug) {
            tokio::time::sleep(*delay).await;
        }
        if let Some(err) = self.failures.get(&country.slug) {
            return Err(err.clone());
        }
        self.series
            .get(&country.slug)
            .cloned()
            .ok_or_else(|| ProviderError::not_found(&country.slug))
    }

    fn provider_name(&self) -> &str {
        "mock"
    }

    fn get_metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            supports_bulk: self.bulk,
        }
    }
}

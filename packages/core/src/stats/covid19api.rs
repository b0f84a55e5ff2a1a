//! covid19api.com Stats Provider Adapter
//!
//! The day-one timeline API only answers per country, so this adapter
//! leaves `fetch_all` unsupported and the pipeline fans out `fetch_one`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::country::CountryRef;
use crate::stats::{
    error::ProviderError,
    http::StatsHttpClient,
    provider::{ProviderMetadata, ProviderResult, StatsProvider},
    types::{Series, SeriesAccumulator},
};

pub struct Covid19ApiProvider {
    client: StatsHttpClient,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CountryListing {
    country: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DayOneRecord {
    confirmed: u64,
    deaths: u64,
    #[serde(default)]
    recovered: Option<u64>,
    date: String,
}

impl Covid19ApiProvider {
    pub fn new(client: StatsHttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StatsProvider for Covid19ApiProvider {
    async fn fetch_countries(&self) -> ProviderResult<Vec<CountryRef>> {
        let listings: Vec<CountryListing> = self.client.get_json("/countries").await?;
        // The upstream `Slug` field is ignored; slugs are always recomputed
        // so they match what the registry stores.
        Ok(listings
            .into_iter()
            .map(|c| CountryRef::new(c.country))
            .collect())
    }

    async fn fetch_one(&self, country: &CountryRef) -> ProviderResult<Series> {
        let path = format!("/total/dayone/country/{}", country.slug);
        let records: Vec<DayOneRecord> = self.client.get_json(&path).await.map_err(|e| match e {
            ProviderError::NotFound { .. } => ProviderError::not_found(&country.slug),
            other => other,
        })?;

        let mut acc = SeriesAccumulator::new();
        for record in records {
            let date = DateTime::parse_from_rfc3339(&record.date)
                .map_err(|e| {
                    ProviderError::schema(format!("Invalid record date '{}': {}", record.date, e))
                })?
                .with_timezone(&Utc)
                .date_naive();
            acc.add(
                date,
                record.confirmed,
                record.recovered.unwrap_or(0),
                record.deaths,
            );
        }

        if acc.is_empty() {
            return Err(ProviderError::not_found(&country.slug));
        }
        Ok(acc.finish())
    }

    fn provider_name(&self) -> &str {
        "covid19api"
    }

    fn get_metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            supports_bulk: false,
        }
    }
}

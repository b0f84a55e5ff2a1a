//! Stats Provider Module
//!
//! Fetches per-country epidemic time series from an upstream provider and
//! normalizes them into ascending [`DailySnapshot`] sequences, whatever the
//! upstream payload looks like.

pub mod covid19api;
pub mod disease_sh;
pub mod error;
pub mod http;
pub mod mock;
pub mod provider;
pub mod types;

use std::sync::Arc;

pub use error::ProviderError;
pub use provider::{ProviderMetadata, ProviderResult, StatsProvider};
pub use types::{DailySnapshot, Series, SeriesBySlug};

use crate::config::{Config, StatsBackend};
use crate::error::AppError;
use self::covid19api::Covid19ApiProvider;
use self::disease_sh::DiseaseShProvider;
use self::http::{RetryPolicy, StatsHttpClient};

/// Shared handle to whichever provider the configuration selects.
pub type SharedStatsProvider = Arc<dyn StatsProvider + Send + Sync>;

/// Construct the provider chosen by `config.stats_backend`.
pub fn build_provider(config: &Config) -> Result<SharedStatsProvider, AppError> {
    let client = StatsHttpClient::new(
        config.stats_base_url.clone(),
        config.fetch_timeout,
        RetryPolicy::new(config.fetch_max_attempts),
    )?;

    let provider: SharedStatsProvider = match config.stats_backend {
        StatsBackend::DiseaseSh => Arc::new(DiseaseShProvider::new(client, config.history)),
        StatsBackend::Covid19Api => Arc::new(Covid19ApiProvider::new(client)),
    };

    tracing::info!(
        provider = provider.provider_name(),
        base_url = %config.stats_base_url,
        "Stats provider configured"
    );
    Ok(provider)
}

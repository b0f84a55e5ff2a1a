//! Stats Provider Interface
//!
//! Abstraction over upstream epidemic statistics sources. Each backend
//! normalizes its own payload shape into [`Series`] so the pipeline never
//! branches on which provider is configured.

use async_trait::async_trait;

use crate::country::CountryRef;
use crate::stats::{
    error::ProviderError,
    types::{Series, SeriesBySlug},
};

/// Trait for stats providers to ensure data source independence
#[async_trait]
pub trait StatsProvider {
    /// List every country the provider reports on.
    async fn fetch_countries(&self) -> ProviderResult<Vec<CountryRef>>;

    /// Fetch every country's series in one request.
    ///
    /// Backends that can't do this return [`ProviderError::Unsupported`] and
    /// advertise `supports_bulk: false` in their metadata.
    async fn fetch_all(&self) -> ProviderResult<SeriesBySlug> {
        Err(ProviderError::unsupported("fetch_all"))
    }

    /// Fetch a single country's series by slug.
    async fn fetch_one(&self, country: &CountryRef) -> ProviderResult<Series>;

    /// Get the name of this provider for logging/debugging
    fn provider_name(&self) -> &str;

    /// Get provider-specific capabilities
    fn get_metadata(&self) -> ProviderMetadata {
        ProviderMetadata::default()
    }
}

/// Metadata about a stats provider
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderMetadata {
    /// Whether `fetch_all` is served; the pipeline tries it first when set.
    pub supports_bulk: bool,
}

/// Result type for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;

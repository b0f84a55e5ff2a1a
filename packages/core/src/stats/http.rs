//! HTTP transport shared by the provider backends.
//!
//! Classifies failures into the provider error taxonomy and retries
//! transient ones with exponential backoff plus jitter.

use std::time::Duration;

use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

use crate::stats::error::ProviderError;
use crate::stats::provider::ProviderResult;

const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(250);
const MAX_JITTER_MS: u64 = 100;

/// Retry settings for transient upstream failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exp)
    }
}

#[derive(Clone)]
pub struct StatsHttpClient {
    base_url: String,
    http: Client,
    retry: RetryPolicy,
}

impl StatsHttpClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration, retry: RetryPolicy) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            retry,
        })
    }

    /// GET `path` and decode the JSON body, retrying transient failures.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ProviderResult<T> {
        let mut attempt = 1;
        loop {
            match self.get_json_once(path).await {
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    let jitter = rand::thread_rng().gen_range(0..=MAX_JITTER_MS);
                    let delay = self.retry.backoff(attempt) + Duration::from_millis(jitter);
                    tracing::debug!(
                        path,
                        attempt,
                        "Retrying stats request in {:?}: {}",
                        delay,
                        err
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn get_json_once<T: DeserializeOwned>(&self, path: &str) -> ProviderResult<T> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ProviderError::retryable(format!("GET {} failed: {}", path, e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ProviderError::not_found(path));
        }
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(ProviderError::retryable(format!(
                "GET {} returned HTTP {}",
                path, status
            )));
        }
        if !status.is_success() {
            return Err(ProviderError::schema(format!(
                "GET {} returned unexpected HTTP {}",
                path, status
            )));
        }

        let body = response.bytes().await.map_err(|e| {
            ProviderError::retryable(format!("Reading body of {} failed: {}", path, e))
        })?;

        serde_json::from_slice(&body).map_err(|e| {
            ProviderError::schema(format!("Failed to decode response of {}: {}", path, e))
        })
    }
}

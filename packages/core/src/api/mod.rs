//! HTTP API: subscription management, the country list, health and
//! Prometheus metrics.
//!
//! Routes:
//! - `GET    /health`
//! - `GET    /countries`
//! - `POST   /subscriptions`
//! - `DELETE /subscriptions?email=&country=`
//! - `GET    /metrics`

pub mod countries;
pub mod health;
pub mod subscriptions;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{MatchedPath, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::cache::ResponseCache;
use crate::country::CountryRef;
use crate::metrics::AppMetrics;
use crate::pipeline::DigestPipeline;
use crate::registry::SharedRegistry;
use crate::stats::{ProviderError, SharedStatsProvider};

/// How long the provider's country list is served from memory.
pub const COUNTRY_LIST_TTL: Duration = Duration::from_secs(60 * 60);

pub struct ApiState {
    pub registry: SharedRegistry,
    pub provider: SharedStatsProvider,
    pub pipeline: Arc<DigestPipeline>,
    pub countries: ResponseCache<Vec<CountryRef>>,
    pub metrics: Arc<AppMetrics>,
}

pub type SharedState = Arc<ApiState>;

impl ApiState {
    pub fn new(
        registry: SharedRegistry,
        provider: SharedStatsProvider,
        pipeline: Arc<DigestPipeline>,
        metrics: Arc<AppMetrics>,
    ) -> Self {
        Self {
            registry,
            provider,
            pipeline,
            countries: ResponseCache::new(COUNTRY_LIST_TTL),
            metrics,
        }
    }

    /// The provider's country list, refreshed once the cache goes stale.
    pub async fn country_list(&self) -> Result<Vec<CountryRef>, ProviderError> {
        self.countries
            .get_or_refresh(|| self.provider.fetch_countries())
            .await
    }
}

pub type ApiError = (StatusCode, Json<serde_json::Value>);

pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

/// Assemble the full router.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/metrics", get(metrics))
        .route("/countries", get(countries::list_countries))
        .route(
            "/subscriptions",
            axum::routing::post(subscriptions::subscribe).delete(subscriptions::unsubscribe),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), track_http))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// `GET /metrics` in Prometheus text exposition format.
pub async fn metrics(State(state): State<SharedState>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            Body::from(body),
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Failed to render metrics: {}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics error").into_response()
        }
    }
}

async fn track_http(State(state): State<SharedState>, request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let started = Instant::now();
    let response = next.run(request).await;

    state
        .metrics
        .http_request_duration
        .observe(started.elapsed().as_secs_f64());
    state
        .metrics
        .http_requests_total
        .with_label_values(&[method.as_str(), path.as_str(), response.status().as_str()])
        .inc();

    response
}

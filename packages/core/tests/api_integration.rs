//! Integration tests for all API endpoints.
//!
//! Each test boots the full Axum router (same assembly as `main.rs`) using
//! `tower::ServiceExt::oneshot`; no live server, provider or mail service
//! is needed.
//!
//! `build_test_app()` wires together:
//! - A mock stats provider listing Canada, Peru and South Africa
//! - An in-memory SQLite subscriber registry
//! - A recording dispatcher standing in for SendGrid
//! - Prometheus `AppMetrics`

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::NaiveDate;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use covid_daily_digest::{
    api::{self, ApiState},
    config::TemplateIds,
    db,
    digest::MetricsConfig,
    metrics::AppMetrics,
    notify::{mock::RecordingDispatcher, Batch, MailSettings},
    pipeline::{DigestPipeline, PipelineConfig},
    registry::{SharedRegistry, SqliteSubscriberRegistry, SubscriberRegistry},
    stats::{mock::MockStatsProvider, DailySnapshot, SharedStatsProvider},
};

// ---- Helpers ----------------------------------------------------------------

struct TestApp {
    router: Router,
    registry: SharedRegistry,
    dispatcher: Arc<RecordingDispatcher>,
}

async fn build_test_app() -> TestApp {
    let d0 = NaiveDate::from_ymd_opt(2020, 4, 1).unwrap();
    let d1 = NaiveDate::from_ymd_opt(2020, 4, 2).unwrap();
    let two_days = vec![
        DailySnapshot::new(d0, 100, 10, 1),
        DailySnapshot::new(d1, 150, 20, 2),
    ];

    let provider: SharedStatsProvider = Arc::new(
        MockStatsProvider::new()
            .with_country("Canada", two_days.clone())
            .with_country("Peru", two_days.clone())
            .with_country("South Africa", two_days),
    );

    let pool = db::create_pool("sqlite::memory:").await.unwrap();
    let registry: SharedRegistry = Arc::new(SqliteSubscriberRegistry::new(pool));
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let metrics = Arc::new(AppMetrics::new().unwrap());

    let pipeline = Arc::new(DigestPipeline::new(
        provider.clone(),
        registry.clone(),
        dispatcher.clone(),
        metrics.clone(),
        PipelineConfig {
            max_concurrent_fetches: 2,
            fetch_timeout: Duration::from_secs(5),
            metrics: MetricsConfig::default(),
            mail: MailSettings {
                sender_domain: "covid19dailydigest.com".to_string(),
                templates: TemplateIds::default(),
            },
        },
    ));

    let state = Arc::new(ApiState::new(registry.clone(), provider, pipeline, metrics));

    TestApp {
        router: api::router(state),
        registry,
        dispatcher,
    }
}

async fn send(app: &TestApp, request: Request<Body>) -> axum::response::Response {
    app.router.clone().oneshot(request).await.unwrap()
}

fn subscribe_request(body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/subscriptions")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn unsubscribe_request(query: &str) -> Request<Body> {
    Request::builder()
        .method(Method::DELETE)
        .uri(format!("/subscriptions?{}", query))
        .body(Body::empty())
        .unwrap()
}

/// Convenience: collect body bytes and parse as JSON.
async fn json_body(body: Body) -> Value {
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Wait for the background notice task to hand a batch to the dispatcher.
async fn wait_for_batches(dispatcher: &RecordingDispatcher, count: usize) -> Vec<Batch> {
    for _ in 0..100 {
        let batches = dispatcher.batches();
        if batches.len() >= count {
            return batches;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    dispatcher.batches()
}

// ---- GET /health ------------------------------------------------------------

#[tokio::test]
async fn health_returns_200_with_ok_body() {
    let app = build_test_app().await;
    let resp = send(&app, Request::builder().uri("/health").body(Body::empty()).unwrap()).await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get(header::CACHE_CONTROL).unwrap(), "no-store");
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"ok");
}

// ---- GET /countries ---------------------------------------------------------

#[tokio::test]
async fn countries_lists_names_and_slugs() {
    let app = build_test_app().await;
    let resp = send(&app, Request::builder().uri("/countries").body(Body::empty()).unwrap()).await;

    assert_eq!(resp.status(), StatusCode::OK);
    let json = json_body(resp.into_body()).await;
    let countries = json.as_array().unwrap();
    assert_eq!(countries.len(), 3);
    assert!(countries.contains(&json!({ "name": "South Africa", "slug": "south-africa" })));
}

// ---- POST /subscriptions ----------------------------------------------------

#[tokio::test]
async fn subscribe_returns_201_and_stores_the_slug() {
    let app = build_test_app().await;
    let resp = send(
        &app,
        subscribe_request(json!({ "email": "alice@example.com", "country": "South Africa" })),
    )
    .await;

    assert_eq!(resp.status(), StatusCode::CREATED);
    let json = json_body(resp.into_body()).await;
    assert_eq!(json["country_slug"], "south-africa");

    let stored = app.registry.list_by_country("south-africa").await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].email, "alice@example.com");
}

#[tokio::test]
async fn subscribe_sends_welcome_digest_in_background() {
    let app = build_test_app().await;
    let resp = send(
        &app,
        subscribe_request(json!({ "email": "alice@example.com", "country": "canada" })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let batches = wait_for_batches(&app.dispatcher, 1).await;
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].template_id, TemplateIds::default().welcome);
    assert_eq!(batches[0].from, "subscribed@covid19dailydigest.com");
    let data = &batches[0].personalizations[0].template_data;
    assert_eq!(data["country"], "Canada");
    assert_eq!(data["userEmail"], "alice@example.com");
    assert_eq!(data["todayCasesIncrease"], "+50.00");
}

#[tokio::test]
async fn duplicate_subscription_returns_409() {
    let app = build_test_app().await;
    let body = json!({ "email": "alice@example.com", "country": "Peru" });

    let first = send(&app, subscribe_request(body.clone())).await;
    let second = send(&app, subscribe_request(body)).await;

    assert_eq!(first.status(), StatusCode::CREATED);
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let json = json_body(second.into_body()).await;
    assert!(json["error"].is_string());
    assert_eq!(app.registry.list_by_country("peru").await.unwrap().len(), 1);
}

#[tokio::test]
async fn invalid_email_returns_400() {
    let app = build_test_app().await;
    let resp = send(
        &app,
        subscribe_request(json!({ "email": "alice-at-example", "country": "Peru" })),
    )
    .await;

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(app.registry.list_countries().await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_country_returns_400() {
    let app = build_test_app().await;
    let resp = send(
        &app,
        subscribe_request(json!({ "email": "alice@example.com", "country": "Atlantis" })),
    )
    .await;

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ---- DELETE /subscriptions --------------------------------------------------

#[tokio::test]
async fn unsubscribe_returns_204_and_sends_farewell() {
    let app = build_test_app().await;
    app.registry.create("alice@example.com", "south-africa").await.unwrap();

    let resp = send(&app, unsubscribe_request("email=alice@example.com&country=south-africa")).await;

    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert!(app.registry.list_by_country("south-africa").await.unwrap().is_empty());

    let batches = wait_for_batches(&app.dispatcher, 1).await;
    assert_eq!(batches[0].template_id, TemplateIds::default().farewell);
    assert_eq!(
        batches[0].personalizations[0].template_data,
        json!({ "country": "South Africa" })
    );
}

#[tokio::test]
async fn unsubscribe_unknown_pair_returns_404() {
    let app = build_test_app().await;
    let resp = send(&app, unsubscribe_request("email=ghost@example.com&country=peru")).await;

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// ---- GET /metrics -----------------------------------------------------------

#[tokio::test]
async fn metrics_endpoint_reports_http_requests() {
    let app = build_test_app().await;
    send(&app, Request::builder().uri("/health").body(Body::empty()).unwrap()).await;

    let resp = send(&app, Request::builder().uri("/metrics").body(Body::empty()).unwrap()).await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/plain; version=0.0.4"
    );
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(body.contains("covid_digest_http_requests_total"));
    assert!(body.contains("path=\"/health\""));
}

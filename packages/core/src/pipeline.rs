//! Digest pipeline orchestration.
//!
//! One run walks every stage over the full country set:
//!
//! `Idle → FetchingCountries → FetchingSubscribers → FetchingStats →
//! ComputingMetrics → Dispatching → Idle`
//!
//! Each country is an independent unit of work. A unit that fails is
//! recorded once in the [`RunReport`], logged with the country's slug and
//! dropped from the later stages; the run itself always completes.
//! Dispatch is fire-and-forget: the run hands back [`PendingDeliveries`]
//! instead of waiting for the mail provider.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::Config;
use crate::country::CountryRef;
use crate::digest::{self, builder, compute_metrics, CountryMetrics, DigestPayload, MetricsConfig};
use crate::metrics::AppMetrics;
use crate::notify::{Batch, MailSettings, SharedDispatcher};
use crate::registry::{SharedRegistry, Subscriber};
use crate::repository::{DeliveryEvent, DeliveryRepository};
use crate::stats::{ProviderError, Series, SeriesBySlug, SharedStatsProvider};

/// Knobs the pipeline reads on every run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_concurrent_fetches: usize,
    pub fetch_timeout: Duration,
    pub metrics: MetricsConfig,
    pub mail: MailSettings,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_concurrent_fetches: config.max_concurrent_fetches,
            fetch_timeout: config.fetch_timeout,
            metrics: MetricsConfig::default(),
            mail: MailSettings::from_config(config),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    FetchingCountries,
    FetchingSubscribers,
    FetchingStats,
    ComputingMetrics,
    Dispatching,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::FetchingCountries => "fetching_countries",
            RunState::FetchingSubscribers => "fetching_subscribers",
            RunState::FetchingStats => "fetching_stats",
            RunState::ComputingMetrics => "computing_metrics",
            RunState::Dispatching => "dispatching",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountryFailure {
    pub slug: String,
    pub stage: RunState,
    pub reason: String,
}

/// Summary of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Countries the provider listed.
    pub countries_total: usize,
    /// Countries with at least one subscriber.
    pub countries_subscribed: usize,
    /// Countries whose metrics were computed.
    pub countries_processed: usize,
    pub payloads_built: usize,
    /// At most one entry per country.
    pub failures: Vec<CountryFailure>,
    /// Set when the run could not start at all (no country list).
    pub aborted: Option<String>,
}

impl RunReport {
    fn new(run_id: String) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            finished_at: None,
            countries_total: 0,
            countries_subscribed: 0,
            countries_processed: 0,
            payloads_built: 0,
            failures: Vec::new(),
            aborted: None,
        }
    }

    /// Record a failure unless the country already has one. Returns whether
    /// it was recorded.
    pub fn record_failure(&mut self, slug: &str, stage: RunState, reason: impl Into<String>) -> bool {
        if self.failure_for(slug).is_some() {
            return false;
        }
        self.failures.push(CountryFailure {
            slug: slug.to_string(),
            stage,
            reason: reason.into(),
        });
        true
    }

    pub fn failure_for(&self, slug: &str) -> Option<&CountryFailure> {
        self.failures.iter().find(|f| f.slug == slug)
    }
}

/// Per-country delivery tally produced by a dispatch task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverySummary {
    pub country_slug: String,
    pub delivered: usize,
    pub failed: usize,
}

/// Handles of the dispatch tasks spawned by a run. Dropping this detaches
/// the tasks; they still finish and log on their own.
#[derive(Default)]
pub struct PendingDeliveries {
    handles: Vec<JoinHandle<DeliverySummary>>,
}

impl PendingDeliveries {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every batch, sorted by country slug.
    pub async fn wait(self) -> Vec<DeliverySummary> {
        let mut summaries = Vec::with_capacity(self.handles.len());
        for handle in self.handles {
            match handle.await {
                Ok(summary) => summaries.push(summary),
                Err(err) => tracing::error!("Delivery task failed: {}", err),
            }
        }
        summaries.sort_by(|a, b| a.country_slug.cmp(&b.country_slug));
        summaries
    }
}

pub struct RunOutcome {
    pub report: RunReport,
    pub pending: PendingDeliveries,
}

/// Failure to send a one-off subscription notice.
#[derive(Error, Debug)]
pub enum NoticeError {
    #[error("stats unavailable: {0}")]
    Stats(String),

    #[error("template data could not be encoded: {0}")]
    Template(#[from] serde_json::Error),
}

pub struct DigestPipeline {
    provider: SharedStatsProvider,
    registry: SharedRegistry,
    dispatcher: SharedDispatcher,
    delivery_log: Option<DeliveryRepository>,
    metrics: Arc<AppMetrics>,
    config: PipelineConfig,
    fetch_permits: Arc<Semaphore>,
    run_guard: Arc<Mutex<()>>,
    state: watch::Sender<RunState>,
}

impl DigestPipeline {
    pub fn new(
        provider: SharedStatsProvider,
        registry: SharedRegistry,
        dispatcher: SharedDispatcher,
        metrics: Arc<AppMetrics>,
        config: PipelineConfig,
    ) -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            provider,
            registry,
            dispatcher,
            delivery_log: None,
            metrics,
            fetch_permits: Arc::new(Semaphore::new(config.max_concurrent_fetches.max(1))),
            config,
            run_guard: Arc::new(Mutex::new(())),
            state,
        }
    }

    /// Record every recipient outcome in `delivery_events`.
    pub fn with_delivery_log(mut self, repository: DeliveryRepository) -> Self {
        self.delivery_log = Some(repository);
        self
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    fn set_state(&self, state: RunState) {
        self.state.send_replace(state);
        tracing::debug!(state = %state, "Pipeline state changed");
    }

    /// Execute one full run, or return `None` without doing anything when
    /// another run is still active.
    pub async fn run_once(&self) -> Option<RunOutcome> {
        let _guard = match self.run_guard.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::warn!("Digest run already in progress, dropping trigger");
                self.metrics.runs_skipped_total.inc();
                return None;
            }
        };

        let run_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("digest_run", run_id = %run_id);
        let outcome = self.execute(run_id).instrument(span).await;
        self.set_state(RunState::Idle);
        Some(outcome)
    }

    async fn execute(&self, run_id: String) -> RunOutcome {
        let started = Instant::now();
        let mut report = RunReport::new(run_id.clone());
        self.metrics.runs_total.inc();
        tracing::info!("Digest run started");

        self.set_state(RunState::FetchingCountries);
        let countries = match self.fetch_countries().await {
            Ok(countries) => countries,
            Err(reason) => {
                tracing::error!(stage = %RunState::FetchingCountries, "Digest run aborted: {}", reason);
                report.aborted = Some(reason);
                return self.finish(report, PendingDeliveries::default(), started);
            }
        };
        report.countries_total = countries.len();

        self.set_state(RunState::FetchingSubscribers);
        let subscribers = self.fetch_subscribers(&countries, &mut report).await;
        report.countries_subscribed = subscribers.len();

        let subscribed: Vec<CountryRef> = countries
            .values()
            .filter(|c| subscribers.contains_key(&c.slug))
            .cloned()
            .collect();

        self.set_state(RunState::FetchingStats);
        let series = self.fetch_stats(&subscribed, &mut report).await;

        self.set_state(RunState::ComputingMetrics);
        let today = Utc::now().date_naive();
        let computed: BTreeMap<String, CountryMetrics> = subscribed
            .iter()
            .filter_map(|country| {
                series.get(&country.slug).map(|s| {
                    (
                        country.slug.clone(),
                        compute_metrics(country, s, today, &self.config.metrics),
                    )
                })
            })
            .collect();
        report.countries_processed = computed.len();

        let payloads = digest::build(&computed, &subscribers);
        report.payloads_built = payloads.len();
        self.metrics
            .payloads_built_total
            .inc_by(payloads.len() as f64);

        self.set_state(RunState::Dispatching);
        let pending = self.dispatch(&run_id, &countries, payloads, &mut report);

        self.finish(report, pending, started)
    }

    fn finish(&self, mut report: RunReport, pending: PendingDeliveries, started: Instant) -> RunOutcome {
        report.finished_at = Some(Utc::now());
        let elapsed = started.elapsed();
        self.metrics
            .last_run_duration_seconds
            .set(elapsed.as_secs_f64());

        tracing::info!(
            countries = report.countries_total,
            subscribed = report.countries_subscribed,
            processed = report.countries_processed,
            payloads = report.payloads_built,
            failures = report.failures.len(),
            batches = pending.len(),
            "Digest run finished in {:?}",
            elapsed
        );
        RunOutcome { report, pending }
    }

    fn fail(&self, report: &mut RunReport, slug: &str, stage: RunState, reason: impl Into<String>) {
        let reason = reason.into();
        if report.record_failure(slug, stage, reason.clone()) {
            self.metrics
                .country_failures_total
                .with_label_values(&[stage.as_str()])
                .inc();
            tracing::error!(country = %slug, stage = %stage, "Country excluded from run: {}", reason);
        }
    }

    async fn fetch_countries(&self) -> Result<BTreeMap<String, CountryRef>, String> {
        let listed = match tokio::time::timeout(self.config.fetch_timeout, self.provider.fetch_countries()).await {
            Ok(Ok(listed)) => listed,
            Ok(Err(err)) => return Err(err.to_string()),
            Err(_) => {
                return Err(format!(
                    "country list timed out after {:?}",
                    self.config.fetch_timeout
                ))
            }
        };

        let countries: BTreeMap<String, CountryRef> = listed
            .into_iter()
            .map(|country| (country.slug.clone(), country))
            .collect();
        if countries.is_empty() {
            tracing::warn!("Provider listed no countries");
        }
        Ok(countries)
    }

    async fn fetch_subscribers(
        &self,
        countries: &BTreeMap<String, CountryRef>,
        report: &mut RunReport,
    ) -> BTreeMap<String, Vec<Subscriber>> {
        let candidates: Vec<String> = match self.registry.list_countries().await {
            Ok(subscribed) => {
                let subscribed: BTreeSet<String> = subscribed.into_iter().collect();
                for slug in subscribed.iter().filter(|slug| !countries.contains_key(*slug)) {
                    tracing::warn!(
                        country = %slug,
                        stage = %RunState::FetchingSubscribers,
                        "Subscribers skipped: the provider does not list this country"
                    );
                }
                countries
                    .keys()
                    .filter(|slug| subscribed.contains(*slug))
                    .cloned()
                    .collect()
            }
            Err(err) => {
                tracing::warn!("Could not list subscribed countries, querying every country: {}", err);
                countries.keys().cloned().collect()
            }
        };

        let mut tasks = JoinSet::new();
        for slug in candidates.iter().cloned() {
            let registry = self.registry.clone();
            tasks.spawn(
                async move {
                    let result = registry.list_by_country(&slug).await;
                    (slug, result)
                }
                .in_current_span(),
            );
        }

        let mut unresolved: BTreeSet<String> = candidates.into_iter().collect();
        let mut found = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((slug, result)) => {
                    unresolved.remove(&slug);
                    match result {
                        Ok(subs) if subs.is_empty() => {}
                        Ok(subs) => {
                            found.insert(slug, subs);
                        }
                        Err(err) => {
                            self.fail(report, &slug, RunState::FetchingSubscribers, err.to_string())
                        }
                    }
                }
                Err(err) => tracing::error!(stage = %RunState::FetchingSubscribers, "Subscriber task failed: {}", err),
            }
        }
        for slug in unresolved {
            self.fail(report, &slug, RunState::FetchingSubscribers, "subscriber lookup aborted");
        }

        found
    }

    async fn fetch_stats(&self, countries: &[CountryRef], report: &mut RunReport) -> BTreeMap<String, Series> {
        if countries.is_empty() {
            return BTreeMap::new();
        }

        if self.provider.get_metadata().supports_bulk {
            match self.fetch_bulk().await {
                Ok(mut all) => {
                    let mut found = BTreeMap::new();
                    for country in countries {
                        match all.remove(&country.slug) {
                            Some(Ok(series)) => {
                                found.insert(country.slug.clone(), series);
                            }
                            Some(Err(err)) => {
                                self.fail(report, &country.slug, RunState::FetchingStats, err.to_string())
                            }
                            None => self.fail(
                                report,
                                &country.slug,
                                RunState::FetchingStats,
                                ProviderError::not_found(&country.slug).to_string(),
                            ),
                        }
                    }
                    return found;
                }
                Err(reason) => tracing::warn!(
                    stage = %RunState::FetchingStats,
                    "Bulk fetch failed, falling back to per-country fetches: {}",
                    reason
                ),
            }
        }

        self.fetch_each(countries, report).await
    }

    async fn fetch_bulk(&self) -> Result<SeriesBySlug, String> {
        let _permit = self
            .fetch_permits
            .acquire()
            .await
            .map_err(|_| "fetch pool closed".to_string())?;
        match tokio::time::timeout(self.config.fetch_timeout, self.provider.fetch_all()).await {
            Ok(result) => result.map_err(|err| err.to_string()),
            Err(_) => Err(format!("timed out after {:?}", self.config.fetch_timeout)),
        }
    }

    async fn fetch_each(&self, countries: &[CountryRef], report: &mut RunReport) -> BTreeMap<String, Series> {
        let mut tasks = JoinSet::new();
        for country in countries.iter().cloned() {
            let provider = self.provider.clone();
            let permits = self.fetch_permits.clone();
            let limit = self.config.fetch_timeout;
            tasks.spawn(
                async move {
                    let result = fetch_one_bounded(&provider, &permits, &country, limit).await;
                    (country.slug, result)
                }
                .in_current_span(),
            );
        }

        let mut unresolved: BTreeSet<&str> = countries.iter().map(|c| c.slug.as_str()).collect();
        let mut found = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((slug, result)) => {
                    unresolved.remove(slug.as_str());
                    match result {
                        Ok(series) => {
                            found.insert(slug, series);
                        }
                        Err(reason) => self.fail(report, &slug, RunState::FetchingStats, reason),
                    }
                }
                Err(err) => tracing::error!(stage = %RunState::FetchingStats, "Stats task failed: {}", err),
            }
        }
        for slug in unresolved {
            self.fail(report, slug, RunState::FetchingStats, "stats fetch aborted");
        }

        found
    }

    fn dispatch(
        &self,
        run_id: &str,
        countries: &BTreeMap<String, CountryRef>,
        payloads: Vec<DigestPayload>,
        report: &mut RunReport,
    ) -> PendingDeliveries {
        let mut pending = PendingDeliveries::default();

        for (slug, group) in builder::group_by_country(payloads) {
            let name = countries
                .get(&slug)
                .map(|c| c.name.as_str())
                .unwrap_or(slug.as_str());

            let batch = match self.config.mail.digest_batch(name, &slug, &group) {
                Ok(batch) => batch,
                Err(err) => {
                    self.fail(report, &slug, RunState::Dispatching, err.to_string());
                    continue;
                }
            };

            pending.handles.push(tokio::spawn(
                deliver(
                    batch,
                    self.dispatcher.clone(),
                    self.delivery_log.clone(),
                    self.metrics.clone(),
                    run_id.to_string(),
                )
                .in_current_span(),
            ));
        }

        pending
    }

    /// Fetch one country's stats and send it the welcome template.
    pub async fn send_welcome(&self, country: &CountryRef, email: &str) -> Result<DeliverySummary, NoticeError> {
        let series = fetch_one_bounded(
            &self.provider,
            &self.fetch_permits,
            country,
            self.config.fetch_timeout,
        )
        .await
        .map_err(NoticeError::Stats)?;

        let metrics = compute_metrics(country, &series, Utc::now().date_naive(), &self.config.metrics);
        let payload = DigestPayload {
            country_slug: country.slug.clone(),
            recipient: email.to_string(),
            template_data: builder::template_data(&metrics, email),
        };
        let batch = self.config.mail.welcome_batch(&payload)?;

        Ok(deliver(
            batch,
            self.dispatcher.clone(),
            self.delivery_log.clone(),
            self.metrics.clone(),
            "welcome".to_string(),
        )
        .await)
    }

    /// Confirm an unsubscription.
    pub async fn send_farewell(&self, country: &CountryRef, email: &str) -> Result<DeliverySummary, NoticeError> {
        let batch = self
            .config
            .mail
            .farewell_batch(&country.name, &country.slug, email)?;

        Ok(deliver(
            batch,
            self.dispatcher.clone(),
            self.delivery_log.clone(),
            self.metrics.clone(),
            "farewell".to_string(),
        )
        .await)
    }
}

async fn fetch_one_bounded(
    provider: &SharedStatsProvider,
    permits: &Semaphore,
    country: &CountryRef,
    limit: Duration,
) -> Result<Series, String> {
    let _permit = permits
        .acquire()
        .await
        .map_err(|_| "fetch pool closed".to_string())?;

    match tokio::time::timeout(limit, provider.fetch_one(country)).await {
        Ok(Ok(series)) => Ok(series),
        Ok(Err(err)) => Err(err.to_string()),
        Err(_) => Err(format!("timed out after {:?}", limit)),
    }
}

async fn deliver(
    batch: Batch,
    dispatcher: SharedDispatcher,
    delivery_log: Option<DeliveryRepository>,
    metrics: Arc<AppMetrics>,
    run_id: String,
) -> DeliverySummary {
    let outcomes = dispatcher.send(&batch).await;
    let sent_at = Utc::now().to_rfc3339();

    let mut summary = DeliverySummary {
        country_slug: batch.country_slug.clone(),
        delivered: 0,
        failed: 0,
    };
    for outcome in &outcomes {
        match &outcome.error {
            None => summary.delivered += 1,
            Some(err) => {
                summary.failed += 1;
                tracing::warn!(
                    country = %batch.country_slug,
                    recipient = %outcome.recipient,
                    "Delivery failed: {}",
                    err
                );
            }
        }
    }

    metrics
        .recipients_delivered_total
        .inc_by(summary.delivered as f64);
    metrics.recipients_failed_total.inc_by(summary.failed as f64);

    if summary.delivered == 0 && summary.failed > 0 {
        tracing::error!(
            country = %batch.country_slug,
            stage = %RunState::Dispatching,
            "No recipient of the batch was reached"
        );
    } else {
        tracing::info!(
            country = %batch.country_slug,
            delivered = summary.delivered,
            failed = summary.failed,
            "Batch dispatched"
        );
    }

    if let Some(log) = delivery_log {
        let events: Vec<DeliveryEvent> = outcomes
            .iter()
            .map(|o| DeliveryEvent {
                id: None,
                run_id: run_id.clone(),
                country_slug: batch.country_slug.clone(),
                recipient: o.recipient.clone(),
                delivered: o.is_delivered(),
                error: o.error.as_ref().map(|e| e.to_string()),
                sent_at: sent_at.clone(),
            })
            .collect();
        if let Err(err) = log.log_batch(&events).await {
            tracing::error!(country = %batch.country_slug, "Failed to record deliveries: {}", err);
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TemplateIds;
    use crate::notify::mock::RecordingDispatcher;
    use crate::registry::MemorySubscriberRegistry;
    use crate::stats::mock::MockStatsProvider;
    use crate::stats::DailySnapshot;
    use chrono::NaiveDate;

    fn two_days() -> Series {
        let d0 = NaiveDate::from_ymd_opt(2020, 4, 1).unwrap();
        let d1 = NaiveDate::from_ymd_opt(2020, 4, 2).unwrap();
        vec![
            DailySnapshot::new(d0, 100, 10, 1),
            DailySnapshot::new(d1, 150, 20, 2),
        ]
    }

    fn config(timeout: Duration) -> PipelineConfig {
        PipelineConfig {
            max_concurrent_fetches: 4,
            fetch_timeout: timeout,
            metrics: MetricsConfig::default(),
            mail: MailSettings {
                sender_domain: "example.org".to_string(),
                templates: TemplateIds::default(),
            },
        }
    }

    fn pipeline(
        provider: MockStatsProvider,
        registry: MemorySubscriberRegistry,
        dispatcher: Arc<RecordingDispatcher>,
        timeout: Duration,
    ) -> DigestPipeline {
        DigestPipeline::new(
            Arc::new(provider),
            Arc::new(registry),
            dispatcher,
            Arc::new(AppMetrics::new().unwrap()),
            config(timeout),
        )
    }

    #[tokio::test]
    async fn run_builds_and_dispatches_per_country_batches() {
        let provider = MockStatsProvider::new()
            .with_country("Canada", two_days())
            .with_country("Peru", two_days())
            .with_country("Chile", two_days());
        let registry = MemorySubscriberRegistry::new()
            .with_subscriber("a@x.io", "canada")
            .with_subscriber("b@x.io", "canada")
            .with_subscriber("c@x.io", "peru");
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let pipeline = pipeline(provider, registry, dispatcher.clone(), Duration::from_secs(5));

        let outcome = pipeline.run_once().await.unwrap();
        let summaries = outcome.pending.wait().await;

        assert_eq!(outcome.report.countries_total, 3);
        assert_eq!(outcome.report.countries_subscribed, 2);
        assert_eq!(outcome.report.payloads_built, 3);
        assert!(outcome.report.failures.is_empty());
        assert_eq!(summaries.len(), 2);
        assert_eq!(dispatcher.batches().len(), 2);
        assert_eq!(pipeline.state(), RunState::Idle);
    }

    #[tokio::test]
    async fn failed_country_is_recorded_once_and_others_proceed() {
        let provider = MockStatsProvider::new()
            .with_failing_country("Canada", ProviderError::schema("bad payload"))
            .with_country("Peru", two_days());
        let registry = MemorySubscriberRegistry::new()
            .with_subscriber("a@x.io", "canada")
            .with_subscriber("b@x.io", "peru");
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let pipeline = pipeline(provider, registry, dispatcher.clone(), Duration::from_secs(5));

        let outcome = pipeline.run_once().await.unwrap();
        outcome.pending.wait().await;

        assert_eq!(outcome.report.failures.len(), 1);
        let failure = outcome.report.failure_for("canada").unwrap();
        assert_eq!(failure.stage, RunState::FetchingStats);
        assert!(failure.reason.contains("bad payload"));
        assert_eq!(
            dispatcher.deliveries(),
            vec![("peru".to_string(), "b@x.io".to_string())]
        );
    }

    #[tokio::test]
    async fn registry_failure_excludes_only_that_country() {
        let provider = MockStatsProvider::new()
            .with_country("Canada", two_days())
            .with_country("Peru", two_days());
        let registry = MemorySubscriberRegistry::new()
            .with_subscriber("a@x.io", "canada")
            .with_subscriber("b@x.io", "peru")
            .failing_for("canada");
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let pipeline = pipeline(provider, registry, dispatcher.clone(), Duration::from_secs(5));

        let outcome = pipeline.run_once().await.unwrap();
        outcome.pending.wait().await;

        assert_eq!(
            outcome.report.failure_for("canada").map(|f| f.stage),
            Some(RunState::FetchingSubscribers)
        );
        assert_eq!(outcome.report.payloads_built, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_country_times_out_without_blocking_others() {
        let provider = MockStatsProvider::new()
            .with_country("Canada", two_days())
            .with_delay("Canada", Duration::from_secs(60))
            .with_country("Peru", two_days());
        let registry = MemorySubscriberRegistry::new()
            .with_subscriber("a@x.io", "canada")
            .with_subscriber("b@x.io", "peru");
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let pipeline = pipeline(provider, registry, dispatcher.clone(), Duration::from_secs(2));

        let outcome = pipeline.run_once().await.unwrap();
        outcome.pending.wait().await;

        let failure = outcome.report.failure_for("canada").unwrap();
        assert!(failure.reason.contains("timed out"));
        assert_eq!(outcome.report.payloads_built, 1);
    }

    #[tokio::test]
    async fn bulk_failure_falls_back_to_per_country_fetches() {
        let provider = MockStatsProvider::new()
            .with_country("Canada", two_days())
            .with_bulk_error(ProviderError::retryable("HTTP 503"));
        let registry = MemorySubscriberRegistry::new().with_subscriber("a@x.io", "canada");
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let pipeline = pipeline(provider, registry, dispatcher.clone(), Duration::from_secs(5));

        let outcome = pipeline.run_once().await.unwrap();

        assert!(outcome.report.failures.is_empty());
        assert_eq!(outcome.report.payloads_built, 1);
    }

    #[tokio::test]
    async fn country_missing_from_bulk_payload_is_not_found() {
        let provider = MockStatsProvider::new()
            .with_bulk()
            .with_country("Peru", two_days())
            .with_failing_country("Canada", ProviderError::not_found("canada"));
        let registry = MemorySubscriberRegistry::new()
            .with_subscriber("a@x.io", "canada")
            .with_subscriber("b@x.io", "peru");
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let pipeline = pipeline(provider, registry, dispatcher, Duration::from_secs(5));

        let outcome = pipeline.run_once().await.unwrap();

        let failure = outcome.report.failure_for("canada").unwrap();
        assert!(failure.reason.contains("canada"));
        assert_eq!(outcome.report.payloads_built, 1);
    }

    #[tokio::test]
    async fn malformed_country_in_bulk_payload_fails_only_that_country() {
        let provider = MockStatsProvider::new()
            .with_bulk()
            .with_failing_country("Canada", ProviderError::schema("bad row"))
            .with_country("Peru", two_days());
        let registry = MemorySubscriberRegistry::new()
            .with_subscriber("a@x.io", "canada")
            .with_subscriber("b@x.io", "peru");
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let pipeline = pipeline(provider, registry, dispatcher, Duration::from_secs(5));

        let outcome = pipeline.run_once().await.unwrap();

        let failure = outcome.report.failure_for("canada").unwrap();
        assert_eq!(failure.stage, RunState::FetchingStats);
        assert!(failure.reason.contains("bad row"));
        assert_eq!(outcome.report.failures.len(), 1);
        assert_eq!(outcome.report.payloads_built, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_trigger_is_dropped() {
        let provider = MockStatsProvider::new()
            .with_country("Canada", two_days())
            .with_delay("Canada", Duration::from_secs(5));
        let registry = MemorySubscriberRegistry::new().with_subscriber("a@x.io", "canada");
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let pipeline = Arc::new(pipeline(provider, registry, dispatcher, Duration::from_secs(30)));

        let first = {
            let p = pipeline.clone();
            tokio::spawn(async move { p.run_once().await.map(|o| o.report) })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(pipeline.state(), RunState::FetchingStats);

        assert!(pipeline.run_once().await.is_none());
        assert!(first.await.unwrap().is_some());
        assert!(pipeline.run_once().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn run_returns_before_deliveries_finish() {
        let provider = MockStatsProvider::new().with_country("Canada", two_days());
        let registry = MemorySubscriberRegistry::new().with_subscriber("a@x.io", "canada");
        let dispatcher = Arc::new(RecordingDispatcher::new().with_delay(Duration::from_secs(10)));
        let pipeline = pipeline(provider, registry, dispatcher.clone(), Duration::from_secs(5));

        let outcome = pipeline.run_once().await.unwrap();
        assert_eq!(pipeline.state(), RunState::Idle);
        assert!(dispatcher.batches().is_empty());

        let summaries = outcome.pending.wait().await;
        assert_eq!(summaries[0].delivered, 1);
        assert_eq!(dispatcher.batches().len(), 1);
    }

    #[tokio::test]
    async fn failed_recipients_are_counted_per_batch() {
        let provider = MockStatsProvider::new().with_country("Canada", two_days());
        let registry = MemorySubscriberRegistry::new()
            .with_subscriber("a@x.io", "canada")
            .with_subscriber("b@x.io", "canada");
        let dispatcher = Arc::new(RecordingDispatcher::new().failing_recipient("b@x.io"));
        let pipeline = pipeline(provider, registry, dispatcher, Duration::from_secs(5));

        let summaries = pipeline.run_once().await.unwrap().pending.wait().await;

        assert_eq!(
            summaries,
            vec![DeliverySummary {
                country_slug: "canada".to_string(),
                delivered: 1,
                failed: 1,
            }]
        );
    }

    #[tokio::test]
    async fn welcome_notice_uses_the_welcome_template() {
        let provider = MockStatsProvider::new().with_country("Canada", two_days());
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let pipeline = pipeline(
            provider,
            MemorySubscriberRegistry::new(),
            dispatcher.clone(),
            Duration::from_secs(5),
        );

        let summary = pipeline
            .send_welcome(&CountryRef::new("Canada"), "a@x.io")
            .await
            .unwrap();

        assert_eq!(summary.delivered, 1);
        let batch = &dispatcher.batches()[0];
        assert_eq!(batch.template_id, TemplateIds::default().welcome);
        assert_eq!(batch.personalizations[0].template_data["totalCases"], 150);
    }

    #[tokio::test]
    async fn welcome_notice_fails_for_unknown_country() {
        let pipeline = pipeline(
            MockStatsProvider::new(),
            MemorySubscriberRegistry::new(),
            Arc::new(RecordingDispatcher::new()),
            Duration::from_secs(5),
        );

        let err = pipeline
            .send_welcome(&CountryRef::new("Atlantis"), "a@x.io")
            .await
            .unwrap_err();
        assert!(matches!(err, NoticeError::Stats(_)));
    }
}

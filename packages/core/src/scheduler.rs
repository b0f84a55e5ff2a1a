//! Daily digest scheduler.
//!
//! Sleeps until the configured UTC wall-clock time, then triggers one
//! pipeline run in its own task so the loop keeps counting toward the next
//! firing. A trigger that lands while a run is still active is dropped by
//! the pipeline's run guard.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, TimeZone, Utc};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio::time;

use crate::pipeline::DigestPipeline;

/// The first instant strictly after `now` whose UTC time of day is `at`.
pub fn next_fire_after(now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let today = Utc.from_utc_datetime(&now.date_naive().and_time(at));
    if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    }
}

/// Run the daily trigger loop until `Ctrl+C` (SIGINT) is received.
///
/// Runs already in flight at shutdown are abandoned with the runtime.
pub async fn run_daily(pipeline: Arc<DigestPipeline>, hour: u32, minute: u32) {
    let Some(at) = NaiveTime::from_hms_opt(hour, minute, 0) else {
        tracing::error!("Invalid digest time {:02}:{:02}; scheduler not started", hour, minute);
        return;
    };

    tracing::info!("Digest scheduler started (daily at {} UTC)", at.format("%H:%M"));

    loop {
        let now = Utc::now();
        let next = next_fire_after(now, at);
        let wait = (next - now).to_std().unwrap_or_default();
        tracing::info!("Next digest run at {}", next.to_rfc3339());

        tokio::select! {
            _ = time::sleep(wait) => {
                trigger(&pipeline);
            }

            _ = signal::ctrl_c() => {
                tracing::info!("Shutdown signal received. Stopping scheduler.");
                break;
            }
        }
    }

    tracing::info!("Digest scheduler stopped cleanly");
}

/// Start one run in the background. Deliveries are detached; each batch
/// logs its own outcome.
pub fn trigger(pipeline: &Arc<DigestPipeline>) -> JoinHandle<()> {
    let pipeline = pipeline.clone();
    tokio::spawn(async move {
        if let Some(outcome) = pipeline.run_once().await {
            if !outcome.report.failures.is_empty() {
                tracing::warn!(
                    run_id = %outcome.report.run_id,
                    failures = outcome.report.failures.len(),
                    "Digest run completed with excluded countries"
                );
            }
        }
    })
}

//! Delivery log persistence.
//!
//! The pipeline calls [`DeliveryRepository::log_batch`] once per dispatched
//! country batch with the outcome the dispatcher reported for each
//! recipient. Nothing here stores computed metrics.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// One recipient's delivery outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryEvent {
    pub id: Option<i64>,
    pub run_id: String,
    pub country_slug: String,
    pub recipient: String,
    pub delivered: bool,
    pub error: Option<String>,
    pub sent_at: String,
}

/// Repository for the `delivery_events` table.
#[derive(Clone)]
pub struct DeliveryRepository {
    pool: SqlitePool,
}

impl DeliveryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a batch of delivery events in a single transaction.
    pub async fn log_batch(&self, events: &[DeliveryEvent]) -> Result<(), sqlx::Error> {
        if events.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for event in events {
            let delivered_int: i64 = if event.delivered { 1 } else { 0 };

            sqlx::query(
                "INSERT INTO delivery_events
                 (run_id, country_slug, recipient, delivered, error, sent_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&event.run_id)
            .bind(&event.country_slug)
            .bind(&event.recipient)
            .bind(delivered_int)
            .bind(&event.error)
            .bind(&event.sent_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Events of one run, optionally filtered by outcome, ordered by
    /// country then recipient.
    pub async fn query_run(
        &self,
        run_id: &str,
        delivered_filter: Option<bool>,
    ) -> Result<Vec<DeliveryEvent>, sqlx::Error> {
        let mut conditions = vec!["run_id = ?"];
        if delivered_filter.is_some() {
            conditions.push("delivered = ?");
        }

        let sql = format!(
            "SELECT id, run_id, country_slug, recipient, delivered, error, sent_at
             FROM delivery_events
             WHERE {}
             ORDER BY country_slug ASC, recipient ASC",
            conditions.join(" AND ")
        );

        let rows = {
            let mut q = sqlx::query(&sql).bind(run_id);
            if let Some(del) = delivered_filter {
                q = q.bind(if del { 1i64 } else { 0i64 });
            }
            q.fetch_all(&self.pool).await?
        };

        let events = rows
            .into_iter()
            .filter_map(|row| {
                use sqlx::Row;
                let id: i64 = row.try_get("id").ok()?;
                let run_id: String = row.try_get("run_id").ok()?;
                let country_slug: String = row.try_get("country_slug").ok()?;
                let recipient: String = row.try_get("recipient").ok()?;
                let delivered: i64 = row.try_get("delivered").ok()?;
                let error: Option<String> = row.try_get("error").ok()?;
                let sent_at: String = row.try_get("sent_at").ok()?;

                Some(DeliveryEvent {
                    id: Some(id),
                    run_id,
                    country_slug,
                    recipient,
                    delivered: delivered != 0,
                    error,
                    sent_at,
                })
            })
            .collect();

        Ok(events)
    }

    /// Count events of one run with the given outcome.
    pub async fn count_run(&self, run_id: &str, delivered: bool) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM delivery_events WHERE run_id = ? AND delivered = ?",
        )
        .bind(run_id)
        .bind(if delivered { 1i64 } else { 0i64 })
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }
}

//! Recording dispatcher for tests and dry runs.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::notify::{Batch, DispatchError, NotificationDispatcher, RecipientOutcome};

/// Keeps every batch it is handed and fails the recipients it was told to.
#[derive(Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<Batch>>,
    failing_recipients: HashSet<String>,
    delay: Option<Duration>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_recipient(mut self, email: &str) -> Self {
        self.failing_recipients.insert(email.to_string());
        self
    }

    /// Sleep before recording each batch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn batches(&self) -> Vec<Batch> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    /// `(country_slug, recipient)` for every personalization recorded.
    pub fn deliveries(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = self
            .batches()
            .iter()
            .flat_map(|b| {
                b.recipients()
                    .map(|r| (b.country_slug.clone(), r.to_string()))
                    .collect::<Vec<_>>()
            })
            .collect();
        out.sort();
        out
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn send(&self, batch: &Batch) -> Vec<RecipientOutcome> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(batch.clone());
        }

        batch
            .recipients()
            .map(|to| {
                if self.failing_recipients.contains(to) {
                    RecipientOutcome::failed(
                        to,
                        DispatchError::Rejected {
                            status: 400,
                            body: "recipient rejected".to_string(),
                        },
                    )
                } else {
                    RecipientOutcome::delivered(to)
                }
            })
            .collect()
    }
}

//! SendGrid v3 `mail/send` dispatcher.
//!
//! Each batch becomes one or more dynamic-template requests of at most
//! [`MAX_PERSONALIZATIONS`] recipients. A rejected request fails every
//! recipient it carried; the other chunks of the batch are unaffected.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::Serialize;

use crate::notify::{Batch, DispatchError, NotificationDispatcher, RecipientOutcome};

/// SendGrid's per-request personalization limit.
pub const MAX_PERSONALIZATIONS: usize = 1000;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SendGridDispatcher {
    http_client: Client,
    base_url: String,
    api_key: Secret<String>,
}

#[derive(Serialize)]
struct SendEmailBody<'a> {
    personalizations: Vec<SendGridPersonalization<'a>>,
    from: SendGridEmail<'a>,
    template_id: &'a str,
}

#[derive(Serialize)]
struct SendGridEmail<'a> {
    email: &'a str,
}

#[derive(Serialize)]
struct SendGridPersonalization<'a> {
    to: Vec<SendGridEmail<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    subject: Option<&'a str>,
    dynamic_template_data: &'a serde_json::Value,
}

impl SendGridDispatcher {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Secret<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, reqwest::Error> {
        let http_client = Client::builder()
            .timeout(timeout.unwrap_or(REQUEST_TIMEOUT))
            .build()?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn send_chunk(&self, batch: &Batch, start: usize, end: usize) -> Result<(), DispatchError> {
        let url = format!("{}/mail/send", self.base_url);
        let body = SendEmailBody {
            personalizations: batch.personalizations[start..end]
                .iter()
                .map(|p| SendGridPersonalization {
                    to: vec![SendGridEmail { email: &p.to }],
                    subject: batch.subject.as_deref(),
                    dynamic_template_data: &p.template_data,
                })
                .collect(),
            from: SendGridEmail { email: &batch.from },
            template_id: &batch.template_id,
        };

        let response = self
            .http_client
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationDispatcher for SendGridDispatcher {
    async fn send(&self, batch: &Batch) -> Vec<RecipientOutcome> {
        let total = batch.personalizations.len();
        let mut outcomes = Vec::with_capacity(total);

        let mut start = 0;
        while start < total {
            let end = (start + MAX_PERSONALIZATIONS).min(total);
            let result = self.send_chunk(batch, start, end).await;

            if let Err(err) = &result {
                tracing::warn!(
                    country = %batch.country_slug,
                    recipients = end - start,
                    "SendGrid request failed: {}",
                    err
                );
            }

            outcomes.extend(batch.personalizations[start..end].iter().map(|p| match &result {
                Ok(()) => RecipientOutcome::delivered(&p.to),
                Err(err) => RecipientOutcome::failed(&p.to, err.clone()),
            }));
            start = end;
        }

        outcomes
    }
}

//! Notification Dispatcher
//!
//! Delivers templated email batches and reports the outcome per recipient.
//! A batch failing for some recipients is a normal result, not an error of
//! the whole call.

pub mod mock;
pub mod sendgrid;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::config::{Config, TemplateIds};
use crate::digest::DigestPayload;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// One recipient and the data their template is rendered with.
#[derive(Debug, Clone, PartialEq)]
pub struct Personalization {
    pub to: String,
    pub template_data: serde_json::Value,
}

/// A batch of personalizations sharing one template and sender.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub template_id: String,
    pub from: String,
    pub subject: Option<String>,
    pub country_slug: String,
    pub personalizations: Vec<Personalization>,
}

impl Batch {
    pub fn recipients(&self) -> impl Iterator<Item = &str> {
        self.personalizations.iter().map(|p| p.to.as_str())
    }
}

/// What happened to one recipient of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct RecipientOutcome {
    pub recipient: String,
    pub error: Option<DispatchError>,
}

impl RecipientOutcome {
    pub fn delivered(recipient: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            error: None,
        }
    }

    pub fn failed(recipient: impl Into<String>, error: DispatchError) -> Self {
        Self {
            recipient: recipient.into(),
            error: Some(error),
        }
    }

    pub fn is_delivered(&self) -> bool {
        self.error.is_none()
    }
}

#[async_trait]
pub trait NotificationDispatcher {
    /// Send `batch`, returning exactly one outcome per personalization.
    async fn send(&self, batch: &Batch) -> Vec<RecipientOutcome>;
}

pub type SharedDispatcher = Arc<dyn NotificationDispatcher + Send + Sync>;

/// Template ids and sender addresses used to assemble batches.
#[derive(Debug, Clone)]
pub struct MailSettings {
    pub sender_domain: String,
    pub templates: TemplateIds,
}

#[derive(Serialize)]
struct FarewellData<'a> {
    country: &'a str,
}

impl MailSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            sender_domain: config.sender_domain.clone(),
            templates: config.templates.clone(),
        }
    }

    /// The daily digest batch for one country, sent from `{slug}@domain`.
    pub fn digest_batch(
        &self,
        country_name: &str,
        country_slug: &str,
        payloads: &[DigestPayload],
    ) -> Result<Batch, serde_json::Error> {
        let personalizations = payloads
            .iter()
            .map(|p| {
                Ok(Personalization {
                    to: p.recipient.clone(),
                    template_data: serde_json::to_value(&p.template_data)?,
                })
            })
            .collect::<Result<Vec<_>, serde_json::Error>>()?;

        Ok(Batch {
            template_id: self.templates.digest.clone(),
            from: format!("{}@{}", country_slug, self.sender_domain),
            subject: Some(format!("COVID19 Daily Digest for {}", country_name)),
            country_slug: country_slug.to_string(),
            personalizations,
        })
    }

    /// Welcome mail for a fresh subscription, carrying the digest fields.
    pub fn welcome_batch(&self, payload: &DigestPayload) -> Result<Batch, serde_json::Error> {
        Ok(Batch {
            template_id: self.templates.welcome.clone(),
            from: format!("subscribed@{}", self.sender_domain),
            subject: None,
            country_slug: payload.country_slug.clone(),
            personalizations: vec![Personalization {
                to: payload.recipient.clone(),
                template_data: serde_json::to_value(&payload.template_data)?,
            }],
        })
    }

    /// Unsubscription confirmation; the template only needs the country name.
    pub fn farewell_batch(
        &self,
        country_name: &str,
        country_slug: &str,
        email: &str,
    ) -> Result<Batch, serde_json::Error> {
        Ok(Batch {
            template_id: self.templates.farewell.clone(),
            from: format!("unsubscribed@{}", self.sender_domain),
            subject: None,
            country_slug: country_slug.to_string(),
            personalizations: vec![Personalization {
                to: email.to_string(),
                template_data: serde_json::to_value(FarewellData {
                    country: country_name,
                })?,
            }],
        })
    }
}

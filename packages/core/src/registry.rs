//! Subscriber Registry.
//!
//! Stores `(email, country_slug)` subscriptions. The pair is unique: a
//! duplicate insert is rejected with [`RegistryError::Conflict`] by the
//! database constraint itself, so concurrent registrations can't both win.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use thiserror::Error;

/// A single subscription row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Subscriber {
    pub email: String,
    pub country_slug: String,
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("{email} is already subscribed to {country_slug}")]
    Conflict { email: String, country_slug: String },

    #[error("{email} is not subscribed to {country_slug}")]
    NotFound { email: String, country_slug: String },

    #[error("Registry storage error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Registry unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait SubscriberRegistry {
    /// Add a subscription; fails with `Conflict` if the pair exists.
    async fn create(&self, email: &str, country_slug: &str) -> Result<Subscriber, RegistryError>;

    /// Remove a subscription; fails with `NotFound` if the pair is absent.
    async fn delete(&self, email: &str, country_slug: &str) -> Result<(), RegistryError>;

    /// All subscribers of one country.
    async fn list_by_country(&self, country_slug: &str) -> Result<Vec<Subscriber>, RegistryError>;

    /// Distinct slugs with at least one subscriber.
    async fn list_countries(&self) -> Result<Vec<String>, RegistryError>;
}

pub type SharedRegistry = Arc<dyn SubscriberRegistry + Send + Sync>;

/// Registry backed by the `subscribers` SQLite table.
pub struct SqliteSubscriberRegistry {
    pool: SqlitePool,
}

impl SqliteSubscriberRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriberRegistry for SqliteSubscriberRegistry {
    async fn create(&self, email: &str, country_slug: &str) -> Result<Subscriber, RegistryError> {
        let result = sqlx::query("INSERT INTO subscribers (email, country_slug) VALUES (?, ?)")
            .bind(email)
            .bind(country_slug)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(Subscriber {
                email: email.to_string(),
                country_slug: country_slug.to_string(),
            }),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(RegistryError::Conflict {
                    email: email.to_string(),
                    country_slug: country_slug.to_string(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&self, email: &str, country_slug: &str) -> Result<(), RegistryError> {
        let result = sqlx::query("DELETE FROM subscribers WHERE email = ? AND country_slug = ?")
            .bind(email)
            .bind(country_slug)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::NotFound {
                email: email.to_string(),
                country_slug: country_slug.to_string(),
            });
        }
        Ok(())
    }

    async fn list_by_country(&self, country_slug: &str) -> Result<Vec<Subscriber>, RegistryError> {
        let rows = sqlx::query(
            "SELECT email, country_slug FROM subscribers WHERE country_slug = ? ORDER BY email ASC",
        )
        .bind(country_slug)
        .fetch_all(&self.pool)
        .await?;

        let subscribers = rows
            .into_iter()
            .filter_map(|row| {
                use sqlx::Row;
                let email: String = row.try_get("email").ok()?;
                let country_slug: String = row.try_get("country_slug").ok()?;
                Some(Subscriber {
                    email,
                    country_slug,
                })
            })
            .collect();

        Ok(subscribers)
    }

    async fn list_countries(&self) -> Result<Vec<String>, RegistryError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT country_slug FROM subscribers ORDER BY country_slug ASC")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(slug,)| slug).collect())
    }
}

/// In-process registry with per-country failure injection, for tests and
/// dry runs.
#[derive(Default)]
pub struct MemorySubscriberRegistry {
    rows: Mutex<BTreeSet<Subscriber>>,
    failing: Mutex<HashSet<String>>,
}

impl MemorySubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subscriber(self, email: &str, country_slug: &str) -> Self {
        if let Ok(mut rows) = self.rows.lock() {
            rows.insert(Subscriber {
                email: email.to_string(),
                country_slug: country_slug.to_string(),
            });
        }
        self
    }

    /// Make `list_by_country` fail for `country_slug`.
    pub fn failing_for(self, country_slug: &str) -> Self {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(country_slug.to_string());
        }
        self
    }

    fn lock_rows(&self) -> Result<std::sync::MutexGuard<'_, BTreeSet<Subscriber>>, RegistryError> {
        self.rows
            .lock()
            .map_err(|_| RegistryError::Unavailable("registry lock poisoned".to_string()))
    }
}

#[async_trait]
impl SubscriberRegistry for MemorySubscriberRegistry {
    async fn create(&self, email: &str, country_slug: &str) -> Result<Subscriber, RegistryError> {
        let subscriber = Subscriber {
            email: email.to_string(),
            country_slug: country_slug.to_string(),
        };
        if !self.lock_rows()?.insert(subscriber.clone()) {
            return Err(RegistryError::Conflict {
                email: email.to_string(),
                country_slug: country_slug.to_string(),
            });
        }
        Ok(subscriber)
    }

    async fn delete(&self, email: &str, country_slug: &str) -> Result<(), RegistryError> {
        let key = Subscriber {
            email: email.to_string(),
            country_slug: country_slug.to_string(),
        };
        if !self.lock_rows()?.remove(&key) {
            return Err(RegistryError::NotFound {
                email: email.to_string(),
                country_slug: country_slug.to_string(),
            });
        }
        Ok(())
    }

    async fn list_by_country(&self, country_slug: &str) -> Result<Vec<Subscriber>, RegistryError> {
        let failing = self
            .failing
            .lock()
            .map(|f| f.contains(country_slug))
            .unwrap_or(false);
        if failing {
            return Err(RegistryError::Unavailable(format!(
                "injected failure for {}",
                country_slug
            )));
        }
        Ok(self
            .lock_rows()?
            .iter()
            .filter(|s| s.country_slug == country_slug)
            .cloned()
            .collect())
    }

    async fn list_countries(&self) -> Result<Vec<String>, RegistryError> {
        let slugs: BTreeMap<String, ()> = self
            .lock_rows()?
            .iter()
            .map(|s| (s.country_slug.clone(), ()))
            .collect();
        Ok(slugs.into_keys().collect())
    }
}

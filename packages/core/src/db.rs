//! SQLite pool construction and schema setup.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS subscribers (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        email        TEXT NOT NULL,
        country_slug TEXT NOT NULL,
        created_at   TEXT NOT NULL DEFAULT (datetime('now')),
        UNIQUE (email, country_slug)
    )",
    "CREATE INDEX IF NOT EXISTS idx_subscribers_country ON subscribers (country_slug)",
    "CREATE TABLE IF NOT EXISTS delivery_events (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id       TEXT NOT NULL,
        country_slug TEXT NOT NULL,
        recipient    TEXT NOT NULL,
        delivered    INTEGER NOT NULL,
        error        TEXT,
        sent_at      TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_delivery_events_run ON delivery_events (run_id)",
];

/// Open a pool for `database_url` and make sure the schema exists.
///
/// In-memory databases are per-connection in SQLite, so those pools are
/// pinned to a single connection that is never recycled.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    };

    let pool = pool_options.connect_with(options).await?;
    apply_schema(&pool).await?;
    Ok(pool)
}

async fn apply_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

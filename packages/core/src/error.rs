use std::error::Error;
use std::fmt;

/// Unified application error.
///
/// Covers the process-level failures (config, database, network, startup)
/// that are allowed to stop the service. Per-country pipeline failures use
/// the domain errors in `stats`, `registry` and `notify` and never surface
/// here.
#[derive(Debug)]
pub enum AppError {
    Config(String),
    Database(String),
    Network(String),
    Startup(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(msg) => write!(f, "Config error: {}", msg),
            AppError::Database(msg) => write!(f, "Database error: {}", msg),
            AppError::Network(msg) => write!(f, "Network error: {}", msg),
            AppError::Startup(msg) => write!(f, "Startup error: {}", msg),
        }
    }
}

impl Error for AppError {}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Network(err.to_string())
    }
}

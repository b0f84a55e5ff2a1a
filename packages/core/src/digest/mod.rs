//! Digest Module
//!
//! Turns normalized snapshot series into per-country metrics and joins
//! them with subscribers into per-recipient digest payloads.

pub mod builder;
pub mod calculator;
pub mod config;
pub mod error;
pub mod types;


pub use builder::build;
pub use calculator::compute_metrics;
pub use config::MetricsConfig;
pub use error::CalculationGuard;
pub use types::*;

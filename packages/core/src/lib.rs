// Library root: exposes the service modules to the binary and to the
// integration tests in `tests/`.

pub mod api;
pub mod cache;
pub mod cli;
pub mod config;
pub mod country;
pub mod db;
pub mod digest;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod notify;
pub mod pipeline;
pub mod registry;
pub mod repository;
pub mod scheduler;
pub mod stats;

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is unset. sqlx statement logs are held
/// back to `warn`.
pub const DEFAULT_DIRECTIVES: &str = "info,sqlx=warn";

/// `RUST_LOG` if it parses, otherwise [`DEFAULT_DIRECTIVES`].
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Install the global subscriber. Call once, first thing in `main`.
///
/// Pipeline logs carry `country`, `stage` and `recipient` fields and sit
/// inside a `digest_run{run_id}` span, so the compact formatter keeps one
/// run's lines greppable by either key.
pub fn init_logging() {
    fmt()
        .with_env_filter(env_filter())
        .with_target(false)
        .compact()
        .init();

    info!("Logging initialized");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directives_parse() {
        assert!(DEFAULT_DIRECTIVES.parse::<EnvFilter>().is_ok());
    }
}

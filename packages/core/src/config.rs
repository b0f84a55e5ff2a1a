use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use secrecy::Secret;

use crate::cli::Cli;

pub const DEFAULT_DIGEST_TEMPLATE_ID: &str = "d-e178db6964e74919b1796070a2142e73";
pub const DEFAULT_WELCOME_TEMPLATE_ID: &str = "d-7c65e6469d0d44f9aad9fb18666d3678";
pub const DEFAULT_FAREWELL_TEMPLATE_ID: &str = "d-7887262dd5c94092aebb98c695620cfc";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub http_port: u16,
    pub stats_backend: StatsBackend,
    pub stats_base_url: String,
    pub history: HistoryWindow,
    pub fetch_timeout: Duration,
    pub fetch_max_attempts: u32,
    pub max_concurrent_fetches: usize,
    pub digest_hour: u32,
    pub digest_minute: u32,
    pub sendgrid_api_key: Secret<String>,
    pub sendgrid_base_url: String,
    pub sender_domain: String,
    pub templates: TemplateIds,
}

/// Upstream statistics source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsBackend {
    DiseaseSh,
    Covid19Api,
}

impl StatsBackend {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            StatsBackend::DiseaseSh => "https://disease.sh",
            StatsBackend::Covid19Api => "https://api.covid19api.com",
        }
    }
}

impl FromStr for StatsBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disease-sh" => Ok(StatsBackend::DiseaseSh),
            "covid19api" => Ok(StatsBackend::Covid19Api),
            other => Err(format!("Invalid STATS_PROVIDER: {}", other)),
        }
    }
}

impl fmt::Display for StatsBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatsBackend::DiseaseSh => write!(f, "disease-sh"),
            StatsBackend::Covid19Api => write!(f, "covid19api"),
        }
    }
}

/// How much history the bulk-capable backend requests.
///
/// `All` is the default: the days-since-first-case and first-death fields
/// are only exact when the series reaches back to the first occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryWindow {
    All,
    Days(u32),
}

impl FromStr for HistoryWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "all" => Ok(HistoryWindow::All),
            raw => match raw.parse::<u32>() {
                Ok(days) if days >= 2 => Ok(HistoryWindow::Days(days)),
                _ => Err(format!(
                    "HISTORY_DAYS must be 'all' or a number of at least 2, got {}",
                    raw
                )),
            },
        }
    }
}

impl fmt::Display for HistoryWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryWindow::All => write!(f, "all"),
            HistoryWindow::Days(days) => write!(f, "{}", days),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateIds {
    pub digest: String,
    pub welcome: String,
    pub farewell: String,
}

impl Default for TemplateIds {
    fn default() -> Self {
        Self {
            digest: DEFAULT_DIGEST_TEMPLATE_ID.to_string(),
            welcome: DEFAULT_WELCOME_TEMPLATE_ID.to_string(),
            farewell: DEFAULT_FAREWELL_TEMPLATE_ID.to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. `from_env` is this with
    /// the process environment plugged in.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").ok_or("DATABASE_URL is required")?;

        let sendgrid_api_key = lookup("SENDGRID_API_KEY")
            .map(Secret::new)
            .ok_or("SENDGRID_API_KEY is required")?;

        let stats_backend = match lookup("STATS_PROVIDER") {
            Some(raw) => raw.parse::<StatsBackend>()?,
            None => StatsBackend::DiseaseSh,
        };

        let stats_base_url = lookup("STATS_BASE_URL")
            .unwrap_or_else(|| stats_backend.default_base_url().to_string());

        let http_port = parse_or(&lookup, "HTTP_PORT", 8080u16)?;
        let history = match lookup("HISTORY_DAYS") {
            Some(raw) => raw.parse::<HistoryWindow>()?,
            None => HistoryWindow::All,
        };
        let fetch_timeout_seconds = parse_or(&lookup, "FETCH_TIMEOUT_SECONDS", 20u64)?;
        let fetch_max_attempts = parse_or(&lookup, "FETCH_MAX_ATTEMPTS", 3u32)?;
        let max_concurrent_fetches = parse_or(&lookup, "MAX_CONCURRENT_FETCHES", 8usize)?;
        let digest_hour = parse_or(&lookup, "DIGEST_HOUR", 19u32)?;
        let digest_minute = parse_or(&lookup, "DIGEST_MINUTE", 15u32)?;

        let defaults = TemplateIds::default();
        let templates = TemplateIds {
            digest: lookup("DIGEST_TEMPLATE_ID").unwrap_or(defaults.digest),
            welcome: lookup("WELCOME_TEMPLATE_ID").unwrap_or(defaults.welcome),
            farewell: lookup("FAREWELL_TEMPLATE_ID").unwrap_or(defaults.farewell),
        };

        let config = Self {
            database_url,
            http_port,
            stats_backend,
            stats_base_url,
            history,
            fetch_timeout: Duration::from_secs(fetch_timeout_seconds),
            fetch_max_attempts,
            max_concurrent_fetches,
            digest_hour,
            digest_minute,
            sendgrid_api_key,
            sendgrid_base_url: lookup("SENDGRID_BASE_URL")
                .unwrap_or_else(|| "https://api.sendgrid.com/v3".to_string()),
            sender_domain: lookup("SENDER_DOMAIN")
                .unwrap_or_else(|| "covid19dailydigest.com".to_string()),
            templates,
        };

        config.validate()?;
        Ok(config)
    }

    /// Apply command-line overrides on top of the environment values.
    pub fn apply_cli(&mut self, cli: &Cli) -> Result<(), String> {
        if let Some(provider) = cli.provider.as_deref() {
            let backend = provider.parse::<StatsBackend>()?;
            if backend != self.stats_backend && cli.stats_base_url.is_none() {
                self.stats_base_url = backend.default_base_url().to_string();
            }
            self.stats_backend = backend;
        }
        if let Some(url) = &cli.stats_base_url {
            self.stats_base_url = url.clone();
        }
        if let Some(port) = cli.port {
            self.http_port = port;
        }
        if let Some(hour) = cli.digest_hour {
            self.digest_hour = hour;
        }
        if let Some(minute) = cli.digest_minute {
            self.digest_minute = minute;
        }
        self.validate()
    }

    fn validate(&self) -> Result<(), String> {
        if self.digest_hour > 23 {
            return Err(format!("DIGEST_HOUR must be 0-23, got {}", self.digest_hour));
        }
        if self.digest_minute > 59 {
            return Err(format!(
                "DIGEST_MINUTE must be 0-59, got {}",
                self.digest_minute
            ));
        }
        if self.max_concurrent_fetches == 0 {
            return Err("MAX_CONCURRENT_FETCHES must be at least 1".to_string());
        }
        if self.fetch_max_attempts == 0 {
            return Err("FETCH_MAX_ATTEMPTS must be at least 1".to_string());
        }
        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, String>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| format!("{} must be a valid number", key)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn required() -> Vec<(&'static str, &'static str)> {
        vec![
            ("DATABASE_URL", "sqlite::memory:"),
            ("SENDGRID_API_KEY", "SG.test"),
        ]
    }

    #[test]
    fn defaults_are_applied_when_only_required_keys_are_set() {
        let config = Config::from_lookup(lookup_from(&required())).unwrap();

        assert_eq!(config.stats_backend, StatsBackend::DiseaseSh);
        assert_eq!(config.stats_base_url, "https://disease.sh");
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.digest_hour, 19);
        assert_eq!(config.digest_minute, 15);
        assert_eq!(config.max_concurrent_fetches, 8);
        assert_eq!(config.fetch_timeout, Duration::from_secs(20));
        assert_eq!(config.sendgrid_api_key.expose_secret(), "SG.test");
        assert_eq!(config.templates, TemplateIds::default());
        assert_eq!(config.history, HistoryWindow::All);
    }

    #[test]
    fn history_window_accepts_all_or_a_day_count() {
        let mut pairs = required();
        pairs.push(("HISTORY_DAYS", "45"));
        let config = Config::from_lookup(lookup_from(&pairs)).unwrap();
        assert_eq!(config.history, HistoryWindow::Days(45));
        assert_eq!(config.history.to_string(), "45");

        assert_eq!("all".parse::<HistoryWindow>(), Ok(HistoryWindow::All));
        assert!("1".parse::<HistoryWindow>().is_err());
        assert!("forever".parse::<HistoryWindow>().is_err());
    }

    #[test]
    fn missing_database_url_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[("SENDGRID_API_KEY", "x")])).unwrap_err();
        assert!(err.contains("DATABASE_URL"));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let mut pairs = required();
        pairs.push(("STATS_PROVIDER", "johns-hopkins"));
        let err = Config::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(err.contains("STATS_PROVIDER"));
    }

    #[test]
    fn covid19api_provider_gets_its_own_default_url() {
        let mut pairs = required();
        pairs.push(("STATS_PROVIDER", "covid19api"));
        let config = Config::from_lookup(lookup_from(&pairs)).unwrap();
        assert_eq!(config.stats_base_url, "https://api.covid19api.com");
    }

    #[test]
    fn out_of_range_schedule_is_rejected() {
        let mut pairs = required();
        pairs.push(("DIGEST_HOUR", "24"));
        assert!(Config::from_lookup(lookup_from(&pairs)).is_err());
    }

    #[test]
    fn non_numeric_port_is_rejected() {
        let mut pairs = required();
        pairs.push(("HTTP_PORT", "eighty"));
        let err = Config::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert_eq!(err, "HTTP_PORT must be a valid number");
    }

    #[test]
    fn cli_overrides_environment() {
        let mut config = Config::from_lookup(lookup_from(&required())).unwrap();
        let cli = Cli {
            provider: Some("covid19api".to_string()),
            stats_base_url: None,
            port: Some(9000),
            digest_hour: Some(6),
            digest_minute: Some(30),
            run_once: false,
        };

        config.apply_cli(&cli).unwrap();

        assert_eq!(config.stats_backend, StatsBackend::Covid19Api);
        assert_eq!(config.stats_base_url, "https://api.covid19api.com");
        assert_eq!(config.http_port, 9000);
        assert_eq!((config.digest_hour, config.digest_minute), (6, 30));
    }
}

use clap::Parser;

/// COVID-19 daily digest CLI arguments
#[derive(Debug, Parser)]
#[command(
    name = "covid-daily-digest",
    version,
    about = "Daily per-country COVID-19 statistics digests for email subscribers"
)]
pub struct Cli {
    /// Stats provider backend (disease-sh or covid19api)
    #[arg(long)]
    pub provider: Option<String>,

    /// Stats provider base URL
    #[arg(long)]
    pub stats_base_url: Option<String>,

    /// HTTP port for the subscription API
    #[arg(long)]
    pub port: Option<u16>,

    /// Hour of day (UTC) the digest is sent
    #[arg(long)]
    pub digest_hour: Option<u32>,

    /// Minute of the hour the digest is sent
    #[arg(long)]
    pub digest_minute: Option<u32>,

    /// Run the digest pipeline once, wait for deliveries, and exit
    #[arg(long)]
    pub run_once: bool,
}

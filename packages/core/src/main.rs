use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;

use covid_daily_digest::api::{self, ApiState};
use covid_daily_digest::cli::Cli;
use covid_daily_digest::config::Config;
use covid_daily_digest::db;
use covid_daily_digest::error::AppError;
use covid_daily_digest::logging::init_logging;
use covid_daily_digest::metrics::AppMetrics;
use covid_daily_digest::notify::{sendgrid::SendGridDispatcher, SharedDispatcher};
use covid_daily_digest::pipeline::{DigestPipeline, PipelineConfig};
use covid_daily_digest::registry::{SharedRegistry, SqliteSubscriberRegistry};
use covid_daily_digest::repository::DeliveryRepository;
use covid_daily_digest::scheduler;
use covid_daily_digest::stats;

#[tokio::main]
async fn main() {
    dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        tracing::error!("{}", err);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let mut config = Config::from_env().map_err(AppError::Config)?;
    config.apply_cli(&cli).map_err(AppError::Config)?;
    tracing::info!("Service started with config: {:?}", config);

    let pool = db::create_pool(&config.database_url).await?;
    let provider = stats::build_provider(&config)?;
    let registry: SharedRegistry = Arc::new(SqliteSubscriberRegistry::new(pool.clone()));
    let dispatcher: SharedDispatcher = Arc::new(SendGridDispatcher::new(
        config.sendgrid_base_url.clone(),
        config.sendgrid_api_key.clone(),
        None,
    )?);
    let metrics = Arc::new(
        AppMetrics::new().map_err(|e| AppError::Startup(format!("metrics registry: {}", e)))?,
    );

    let pipeline = Arc::new(
        DigestPipeline::new(
            provider.clone(),
            registry.clone(),
            dispatcher,
            metrics.clone(),
            PipelineConfig::from_config(&config),
        )
        .with_delivery_log(DeliveryRepository::new(pool)),
    );

    if cli.run_once {
        if let Some(outcome) = pipeline.run_once().await {
            let summaries = outcome.pending.wait().await;
            let delivered: usize = summaries.iter().map(|s| s.delivered).sum();
            let failed: usize = summaries.iter().map(|s| s.failed).sum();
            tracing::info!(
                run_id = %outcome.report.run_id,
                delivered,
                failed,
                "Single run complete: {}",
                serde_json::to_string(&outcome.report).unwrap_or_default()
            );
        }
        return Ok(());
    }

    let scheduler_task = tokio::spawn(scheduler::run_daily(
        pipeline.clone(),
        config.digest_hour,
        config.digest_minute,
    ));

    let state = Arc::new(ApiState::new(registry, provider, pipeline, metrics));
    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::Startup(format!("bind {}: {}", addr, e)))?;
    tracing::info!("API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await
        .map_err(|e| AppError::Startup(format!("server error: {}", e)))?;

    if let Err(err) = scheduler_task.await {
        tracing::warn!("Scheduler task ended abnormally: {}", err);
    }
    tracing::info!("Service stopped");
    Ok(())
}

use nin_bulk_processor::{app_state, config::AppConfig, db, services::recovery::RecoveryWorker};
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting bulk recovery worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url, config.pool_size())
        .await
        .expect("Failed to connect to database");

    let processor = app_state::build_processor(&config, db_pool).expect("Failed to build bulk processor");
    let worker = RecoveryWorker::new(processor, config.stale_after());
    let interval = Duration::from_secs(config.recovery_interval_secs.max(1));

    tracing::info!(
        stale_after_secs = config.stale_record_secs,
        interval_secs = interval.as_secs(),
        "Worker ready, starting recovery loop"
    );

    loop {
        match worker.sweep().await {
            Ok(report) if report.requeued_jobs.is_empty() && report.finalized.is_empty() => {
                tracing::trace!("Nothing to recover");
            }
            Ok(report) => {
                tracing::info!(
                    requeued_jobs = ?report.requeued_jobs,
                    resumed = ?report.resumed,
                    finalized = ?report.finalized,
                    active = ?worker.active_jobs(),
                    "Recovery sweep complete"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "Recovery sweep failed, will retry");
            }
        }
        sleep(interval).await;
    }
}

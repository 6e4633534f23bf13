use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use nin_bulk_processor::{
    app_state::{self, AppState},
    config::AppConfig,
    db, routes,
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing nin-bulk-processor server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!(
        "bulk_jobs_triggered_total",
        "Bulk trigger requests by outcome (accepted, rejected, error)"
    );
    metrics::describe_counter!("bulk_records_claimed_total", "Records claimed for processing");
    metrics::describe_counter!(
        "bulk_records_resolved_total",
        "Records resolved by outcome (cache_hit, verified, not_verified, failed)"
    );
    metrics::describe_counter!(
        "bulk_lookup_cache_hits_total",
        "Records resolved from the lookup cache without a provider call"
    );
    metrics::describe_counter!("bulk_jobs_completed_total", "Bulk jobs moved to COMPLETED");
    metrics::describe_histogram!("bulk_round_seconds", "Time to claim and resolve one batch");

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url, config.pool_size())
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    let processor =
        app_state::build_processor(&config, db_pool.clone()).expect("Failed to build bulk processor");
    if config.provider_url.is_none() {
        tracing::warn!("YOUVERIFY_API_URL_V2 not set, live bulks will resolve as FAILED");
    }
    tracing::info!(
        batch_size = processor.settings().batch_size,
        max_concurrency = processor.settings().max_concurrency,
        round_delay_ms = processor.settings().round_delay.as_millis() as u64,
        "Bulk processor ready"
    );

    let state = AppState::new(db_pool, processor);

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/process", post(routes::process::process_bulk))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(64 * 1024));

    tracing::info!("Starting nin-bulk-processor on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}

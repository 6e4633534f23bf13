use sqlx::PgPool;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::queries::PgStore;
use crate::services::{
    downstream::{DispatchError, DownstreamClient},
    driver::BulkProcessor,
    mock_provider::MockProvider,
    provider::{LiveProvider, ProviderError},
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub processor: BulkProcessor,
}

impl AppState {
    pub fn new(db: PgPool, processor: BulkProcessor) -> Self {
        Self { db, processor }
    }
}

/// Wires the Postgres store, both providers and the downstream client
/// into a processor.
pub fn build_processor(config: &AppConfig, db: PgPool) -> Result<BulkProcessor, StartupError> {
    let store = Arc::new(PgStore::new(db));
    let live = LiveProvider::new(
        config.provider_url.clone(),
        config.provider_api_key.clone(),
        config.provider_timeout(),
    )?;
    let downstream = DownstreamClient::new(&config.node_service, config.downstream_timeout())?;

    Ok(BulkProcessor::new(
        store.clone(),
        store,
        Arc::new(live),
        Arc::new(MockProvider::new()),
        Arc::new(downstream),
        config.processor_settings(),
    ))
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Provider client: {0}")]
    Provider(#[from] ProviderError),

    #[error("Downstream client: {0}")]
    Downstream(#[from] DispatchError),
}

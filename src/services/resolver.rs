use chrono::Utc;
use std::sync::Arc;

use crate::db::store::{LookupCache, RecordStore, StoreError};
use crate::models::job::ServiceMode;
use crate::models::lookup::LookupCacheEntry;
use crate::models::record::{ClaimedRecord, Resolution};
use crate::services::provider::{ProviderResponse, VerificationProvider};

/// Consent flag sent with every provider lookup.
pub const SUBJECT_CONSENT: bool = true;

/// Turns one claimed record into a persisted terminal outcome.
#[derive(Clone)]
pub struct RecordResolver {
    store: Arc<dyn RecordStore>,
    cache: Arc<dyn LookupCache>,
    live: Arc<dyn VerificationProvider>,
    mock: Arc<dyn VerificationProvider>,
}

impl RecordResolver {
    pub fn new(
        store: Arc<dyn RecordStore>,
        cache: Arc<dyn LookupCache>,
        live: Arc<dyn VerificationProvider>,
        mock: Arc<dyn VerificationProvider>,
    ) -> Self {
        Self { store, cache, live, mock }
    }

    /// Resolves the record and writes the outcome.
    ///
    /// Provider failures are outcomes, not errors. The only error is a
    /// failed write, which leaves the record IN_PROGRESS.
    pub async fn resolve(&self, record: &ClaimedRecord, mode: ServiceMode) -> Result<Resolution, StoreError> {
        let resolution = self.determine(&record.search_parameter, mode).await;

        self.store
            .complete_record(record.pk, &resolution, Utc::now())
            .await?;

        metrics::counter!("bulk_records_resolved_total", "outcome" => resolution.outcome()).increment(1);
        tracing::debug!(
            record_pk = record.pk,
            outcome = resolution.outcome(),
            reason = resolution.failure_reason().unwrap_or_default(),
            "Record resolved"
        );

        Ok(resolution)
    }

    /// Decides the outcome for a search key without touching the record.
    pub async fn determine(&self, search_parameter: &str, mode: ServiceMode) -> Resolution {
        match self.cache.contains(search_parameter).await {
            Ok(true) => {
                metrics::counter!("bulk_lookup_cache_hits_total").increment(1);
                tracing::debug!(search_parameter, "Found in lookup cache, skipping provider call");
                return Resolution::CacheHit;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(search_parameter, error = %e, "Lookup cache read failed, asking provider");
            }
        }

        let provider = if mode.is_live() { &self.live } else { &self.mock };
        let response = provider.resolve(search_parameter, SUBJECT_CONSENT).await;

        match response {
            Ok(ProviderResponse::Found(identity)) => {
                let entry = LookupCacheEntry {
                    search_parameter: search_parameter.to_string(),
                    identity,
                };
                if let Err(e) = self.cache.upsert(&entry).await {
                    tracing::warn!(search_parameter, error = %e, "Failed to cache resolved identity");
                }
                Resolution::Verified
            }
            Ok(ProviderResponse::NotFound { status }) => Resolution::NotVerified { reason: status },
            Ok(ProviderResponse::ClientError { message }) => Resolution::NotVerified { reason: message },
            Ok(ProviderResponse::Unexpected { http_status }) => {
                tracing::warn!(search_parameter, http_status, ?mode, "Provider answered unexpectedly");
                Resolution::Failed { reason: "FAILED".to_string() }
            }
            Err(e) => {
                tracing::warn!(search_parameter, error = %e, ?mode, "Provider call failed");
                Resolution::Failed { reason: e.to_string() }
            }
        }
    }
}

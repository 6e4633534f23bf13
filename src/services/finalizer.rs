use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::db::store::{RecordStore, StoreError};
use crate::models::job::ReportRequest;
use crate::services::downstream::SideEffects;

/// How long results stay downloadable after completion.
pub const RESULT_RETENTION_DAYS: i64 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finalization {
    /// This call moved the job to COMPLETED and fired the side effects.
    Completed {
        completed_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },
    /// Some records are not COMPLETED yet; nothing changed.
    Outstanding { remaining: i64 },
    /// Another caller completed the job first; nothing fired.
    AlreadyCompleted,
}

/// Moves a job to COMPLETED once every record is, exactly once.
#[derive(Clone)]
pub struct JobFinalizer {
    store: Arc<dyn RecordStore>,
    side_effects: Arc<dyn SideEffects>,
}

impl JobFinalizer {
    pub fn new(store: Arc<dyn RecordStore>, side_effects: Arc<dyn SideEffects>) -> Self {
        Self { store, side_effects }
    }

    pub async fn finalize(&self, bulk_pk: i64) -> Result<Finalization, StoreError> {
        let remaining = self.store.count_incomplete(bulk_pk).await?;
        if remaining > 0 {
            tracing::info!(bulk_pk, remaining, "Bulk still has incomplete records, not finalizing");
            return Ok(Finalization::Outstanding { remaining });
        }

        let completed_at = Utc::now();
        let expires_at = completed_at + Duration::days(RESULT_RETENTION_DAYS);
        if !self.store.complete_job(bulk_pk, completed_at, expires_at).await? {
            tracing::info!(bulk_pk, "Bulk already completed, skipping side effects");
            return Ok(Finalization::AlreadyCompleted);
        }

        metrics::counter!("bulk_jobs_completed_total").increment(1);
        tracing::info!(bulk_pk, %expires_at, "Bulk completed");

        match self.store.find_job(bulk_pk).await {
            Ok(Some(job)) => {
                if job.service_mode.is_live() {
                    if let Err(e) = self.side_effects.notify_completion(bulk_pk).await {
                        tracing::error!(bulk_pk, error = %e, "Failed to send completion notification");
                    }
                }
                tracing::info!(bulk_pk, "Generating report for bulk");
                if let Err(e) = self.side_effects.request_report(&ReportRequest::from(&job)).await {
                    tracing::error!(bulk_pk, error = %e, "Failed to request report generation");
                }
            }
            Ok(None) => tracing::warn!(bulk_pk, "Completed bulk vanished before report dispatch"),
            Err(e) => tracing::error!(bulk_pk, error = %e, "Failed to reload completed bulk"),
        }

        Ok(Finalization::Completed { completed_at, expires_at })
    }
}

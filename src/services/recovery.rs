use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::db::store::StoreError;
use crate::models::job::JobStatus;
use crate::services::driver::BulkProcessor;
use crate::services::finalizer::Finalization;

/// What one sweep did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Jobs that had stale records put back to PENDING.
    pub requeued_jobs: Vec<i64>,
    /// Jobs whose loop was restarted by this sweep.
    pub resumed: Vec<i64>,
    /// Jobs moved to COMPLETED by this sweep.
    pub finalized: Vec<i64>,
}

/// Puts abandoned IN_PROGRESS records back in play, restarts jobs whose
/// driver stopped between rounds and finishes jobs whose driver died after
/// the last record completed.
pub struct RecoveryWorker {
    processor: BulkProcessor,
    stale_after: Duration,
    active: Arc<Mutex<HashSet<i64>>>,
}

impl RecoveryWorker {
    pub fn new(processor: BulkProcessor, stale_after: Duration) -> Self {
        Self {
            processor,
            stale_after,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Jobs this worker is currently driving.
    pub fn active_jobs(&self) -> Vec<i64> {
        let active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        let mut jobs: Vec<i64> = active.iter().copied().collect();
        jobs.sort_unstable();
        jobs
    }

    pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
        let store = self.processor.store();
        let mut report = SweepReport::default();

        let stale_before = chrono::Duration::from_std(self.stale_after)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        report.requeued_jobs = store.requeue_stale(stale_before).await?;

        let mut to_resume = Vec::new();
        for bulk_pk in report.requeued_jobs.clone() {
            match store.find_job(bulk_pk).await? {
                Some(job) if job.status == JobStatus::InProgress => to_resume.push(bulk_pk),
                Some(job) => {
                    // Not yet started: the next trigger picks the records up.
                    tracing::info!(bulk_pk, status = %job.status, "Requeued records of a bulk that is not running");
                }
                None => tracing::warn!(bulk_pk, "Requeued records belong to a missing bulk"),
            }
        }

        // Drivers that stopped between rounds leave PENDING records and nothing to requeue.
        for bulk_pk in store.stalled_jobs(stale_before).await? {
            if !to_resume.contains(&bulk_pk) {
                tracing::info!(bulk_pk, "Bulk has pending records but no driver activity");
                to_resume.push(bulk_pk);
            }
        }

        for bulk_pk in to_resume {
            if self.spawn_resume(bulk_pk) {
                tracing::info!(bulk_pk, "Resuming bulk");
                report.resumed.push(bulk_pk);
            }
        }

        for bulk_pk in store.unfinalized_jobs().await? {
            match self.processor.finalize(bulk_pk).await {
                Ok(Finalization::Completed { .. }) => {
                    tracing::info!(bulk_pk, "Finalized orphaned bulk");
                    report.finalized.push(bulk_pk);
                }
                Ok(_) => {}
                Err(e) => tracing::error!(bulk_pk, error = %e, "Failed to finalize orphaned bulk"),
            }
        }

        Ok(report)
    }

    /// Starts a background resume unless one is already running here.
    fn spawn_resume(&self, bulk_pk: i64) -> bool {
        {
            let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
            if !active.insert(bulk_pk) {
                return false;
            }
        }

        let processor = self.processor.clone();
        let active = self.active.clone();
        tokio::spawn(async move {
            match processor.resume(bulk_pk).await {
                Ok(summary) => tracing::info!(
                    bulk_pk,
                    rounds = summary.rounds,
                    finalized = summary.finalized,
                    "Resumed bulk finished"
                ),
                Err(e) => tracing::error!(bulk_pk, error = %e, "Resumed bulk stopped on store error"),
            }
            active.lock().unwrap_or_else(|p| p.into_inner()).remove(&bulk_pk);
        });
        true
    }
}

//! Job driver: validates a trigger, then claims and resolves batches of
//! records until none are pending, then finalizes the job.

use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

use crate::config::ProcessorSettings;
use crate::db::store::{LookupCache, RecordStore, StoreError};
use crate::models::job::{BulkVerificationJob, ServiceMode};
use crate::models::process::ProcessResponse;
use crate::models::record::ClaimedRecord;
use crate::services::claimer;
use crate::services::downstream::SideEffects;
use crate::services::finalizer::{Finalization, JobFinalizer};
use crate::services::provider::VerificationProvider;
use crate::services::resolver::RecordResolver;

/// Minimum pause after a claim that returned nothing while records were
/// still outstanding.
pub const EMPTY_CLAIM_BACKOFF: Duration = Duration::from_millis(50);

/// Result of the VALIDATING step.
#[derive(Debug)]
pub enum StartOutcome {
    Accepted(BulkVerificationJob),
    Rejected(String),
}

/// What one driver loop did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverSummary {
    pub rounds: usize,
    pub records_claimed: usize,
    /// Records whose outcome could not be written and stay IN_PROGRESS.
    pub unpersisted: usize,
    pub finalized: bool,
}

#[derive(Clone)]
pub struct BulkProcessor {
    store: Arc<dyn RecordStore>,
    resolver: RecordResolver,
    finalizer: JobFinalizer,
    settings: ProcessorSettings,
}

impl BulkProcessor {
    pub fn new(
        store: Arc<dyn RecordStore>,
        cache: Arc<dyn LookupCache>,
        live: Arc<dyn VerificationProvider>,
        mock: Arc<dyn VerificationProvider>,
        side_effects: Arc<dyn SideEffects>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            resolver: RecordResolver::new(store.clone(), cache, live, mock),
            finalizer: JobFinalizer::new(store.clone(), side_effects),
            store,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    /// Validates the job and, when accepted, starts its loop in the
    /// background without waiting for it.
    pub async fn trigger(&self, bulk_pk: i64) -> ProcessResponse {
        match self.start(bulk_pk).await {
            Ok(StartOutcome::Accepted(job)) => {
                metrics::counter!("bulk_jobs_triggered_total", "outcome" => "accepted").increment(1);
                tracing::info!(bulk_pk, bulk_id = %job.bulk_id, mode = ?job.service_mode, "Processing bulk");
                self.spawn(job.pk, job.service_mode);
                ProcessResponse::accepted(format!(
                    "Request received successfully, bulk {} is in progress",
                    bulk_pk
                ))
            }
            Ok(StartOutcome::Rejected(reason)) => {
                metrics::counter!("bulk_jobs_triggered_total", "outcome" => "rejected").increment(1);
                tracing::info!(bulk_pk, %reason, "Bulk trigger rejected");
                ProcessResponse::rejected(reason)
            }
            Err(e) => {
                metrics::counter!("bulk_jobs_triggered_total", "outcome" => "error").increment(1);
                tracing::error!(bulk_pk, error = %e, "Error occurred while triggering bulk");
                ProcessResponse::internal_error(e.to_string())
            }
        }
    }

    /// Moves the job to IN_PROGRESS if, and only if, no one else has.
    pub async fn start(&self, bulk_pk: i64) -> Result<StartOutcome, StoreError> {
        let job = match self.store.find_job(bulk_pk).await? {
            Some(job) => job,
            None => return Ok(StartOutcome::Rejected(format!("Bulk with id {} not found", bulk_pk))),
        };

        if !job.status.is_startable() {
            return Ok(StartOutcome::Rejected(format!("Bulk {} is {}", bulk_pk, job.status)));
        }

        if !self.store.start_job(bulk_pk).await? {
            // Lost the race against a concurrent trigger.
            let status = self
                .store
                .find_job(bulk_pk)
                .await?
                .map(|j| j.status.to_string())
                .unwrap_or_else(|| "gone".to_string());
            return Ok(StartOutcome::Rejected(format!("Bulk {} is {}", bulk_pk, status)));
        }

        Ok(StartOutcome::Accepted(job))
    }

    /// Re-enters the loop of a job that is already IN_PROGRESS, e.g. after
    /// its stale records were requeued.
    pub async fn resume(&self, bulk_pk: i64) -> Result<DriverSummary, StoreError> {
        match self.store.find_job(bulk_pk).await? {
            Some(job) => self.run(job.pk, job.service_mode).await,
            None => Ok(DriverSummary::default()),
        }
    }

    pub async fn finalize(&self, bulk_pk: i64) -> Result<Finalization, StoreError> {
        self.finalizer.finalize(bulk_pk).await
    }

    fn spawn(&self, bulk_pk: i64, mode: ServiceMode) {
        let processor = self.clone();
        tokio::spawn(async move {
            match processor.run(bulk_pk, mode).await {
                Ok(summary) => tracing::info!(
                    bulk_pk,
                    rounds = summary.rounds,
                    records = summary.records_claimed,
                    unpersisted = summary.unpersisted,
                    finalized = summary.finalized,
                    "Finished processing bulk"
                ),
                Err(e) => tracing::error!(
                    bulk_pk,
                    error = %e,
                    "Error processing bulk, job left IN_PROGRESS"
                ),
            }
        });
    }

    /// The claim/resolve/pause loop followed by finalization.
    ///
    /// Only store failures while claiming, counting or finalizing end the
    /// loop early; record-level failures are outcomes.
    pub async fn run(&self, bulk_pk: i64, mode: ServiceMode) -> Result<DriverSummary, StoreError> {
        let mut summary = DriverSummary::default();

        while self.store.count_unprocessed(bulk_pk).await? > 0 {
            let started = Instant::now();
            let batch = claimer::claim_batch(self.store.as_ref(), bulk_pk, self.settings.batch_size).await?;

            if batch.is_empty() {
                // Every outstanding record is locked by another driver.
                tracing::debug!(bulk_pk, "Nothing claimable, backing off");
                sleep(self.settings.round_delay.max(EMPTY_CLAIM_BACKOFF)).await;
                continue;
            }

            summary.rounds += 1;
            summary.records_claimed += batch.len();
            summary.unpersisted += self.resolve_round(bulk_pk, &batch, mode).await;

            metrics::histogram!("bulk_round_seconds").record(started.elapsed().as_secs_f64());
            tracing::info!(
                bulk_pk,
                round = summary.rounds,
                claimed = batch.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Round complete"
            );

            if !self.settings.round_delay.is_zero() {
                sleep(self.settings.round_delay).await;
            }
        }

        tracing::info!(bulk_pk, rounds = summary.rounds, "No pending records left, finalizing bulk");
        summary.finalized = matches!(self.finalize(bulk_pk).await?, Finalization::Completed { .. });
        Ok(summary)
    }

    /// Resolves a batch with at most `max_concurrency` records in flight
    /// and waits for all of them. Returns how many outcomes were not saved.
    async fn resolve_round(&self, bulk_pk: i64, batch: &[ClaimedRecord], mode: ServiceMode) -> usize {
        let unpersisted = AtomicUsize::new(0);

        futures::stream::iter(batch)
            .for_each_concurrent(self.settings.max_concurrency, |record| {
                let unpersisted = &unpersisted;
                async move {
                    if let Err(e) = self.resolver.resolve(record, mode).await {
                        unpersisted.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            bulk_pk,
                            record_pk = record.pk,
                            search_parameter = %record.search_parameter,
                            error = %e,
                            "Failed to save record outcome, record stays IN_PROGRESS"
                        );
                    }
                }
            })
            .await;

        unpersisted.into_inner()
    }
}

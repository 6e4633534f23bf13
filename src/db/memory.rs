//! In-process store with the same claiming and conditional-update
//! semantics as [`PgStore`](crate::db::queries::PgStore).
//!
//! Every operation runs under one lock, which gives the atomicity the
//! Postgres store gets from row locks. This is the test double for the
//! processor: besides the store traits it exposes seeding, inspection and
//! failure-injection hooks, and no binary wires it in.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::db::store::{LookupCache, RecordStore, StoreError};
use crate::models::job::{BulkVerificationJob, JobStatus, ServiceMode};
use crate::models::lookup::{LookupCacheEntry, ResolvedIdentity};
use crate::models::record::{ClaimedRecord, RecordJobStatus, Resolution, VerificationRecord};

#[derive(Default)]
struct Inner {
    jobs: BTreeMap<i64, BulkVerificationJob>,
    records: BTreeMap<i64, VerificationRecord>,
    lookup: HashMap<String, ResolvedIdentity>,
    claim_log: Vec<(i64, Vec<i64>)>,
    failing_updates: HashSet<i64>,
    next_job_pk: i64,
    next_record_pk: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds an INITIATED job and returns its pk.
    pub fn insert_job(&self, mode: ServiceMode, file_name: &str, wrapper_fk: Option<i64>) -> i64 {
        let mut inner = self.lock();
        inner.next_job_pk += 1;
        let pk = inner.next_job_pk;
        let now = Utc::now();
        inner.jobs.insert(
            pk,
            BulkVerificationJob {
                pk,
                bulk_id: format!("BULK-{:06}", pk),
                number_of_records: 0,
                user_fk: None,
                status: JobStatus::Initiated,
                service_mode: mode,
                file_name: Some(file_name.to_string()),
                wrapper_fk,
                is_report_uploaded: false,
                created_date: now,
                modified_date: now,
                completion_date: None,
                expiry_date: None,
            },
        );
        pk
    }

    /// Adds pending records in the given order; earlier keys get earlier
    /// creation times.
    pub fn insert_records(&self, bulk_pk: i64, search_parameters: &[&str]) -> Vec<i64> {
        let mut inner = self.lock();
        let base = Utc::now();
        let mut pks = Vec::with_capacity(search_parameters.len());
        for key in search_parameters {
            inner.next_record_pk += 1;
            let pk = inner.next_record_pk;
            let created = base + Duration::milliseconds(pk);
            inner.records.insert(
                pk,
                VerificationRecord {
                    pk,
                    bulk_fk: bulk_pk,
                    search_parameter: key.to_string(),
                    job_status: None,
                    transaction_status: None,
                    retrieval_mode: None,
                    status: None,
                    failure_reason: None,
                    created_date: created,
                    modified_date: created,
                },
            );
            pks.push(pk);
        }
        if let Some(job) = inner.jobs.get_mut(&bulk_pk) {
            job.number_of_records += search_parameters.len() as i32;
        }
        pks
    }

    pub fn job(&self, bulk_pk: i64) -> Option<BulkVerificationJob> {
        self.lock().jobs.get(&bulk_pk).cloned()
    }

    pub fn set_job_status(&self, bulk_pk: i64, status: JobStatus) {
        if let Some(job) = self.lock().jobs.get_mut(&bulk_pk) {
            job.status = status;
        }
    }

    pub fn record(&self, record_pk: i64) -> Option<VerificationRecord> {
        self.lock().records.get(&record_pk).cloned()
    }

    pub fn records(&self, bulk_pk: i64) -> Vec<VerificationRecord> {
        self.lock()
            .records
            .values()
            .filter(|r| r.bulk_fk == bulk_pk)
            .cloned()
            .collect()
    }

    /// Rewinds a record's `modified_date`, as if it had been claimed long ago.
    pub fn backdate_record(&self, record_pk: i64, modified: DateTime<Utc>) {
        if let Some(record) = self.lock().records.get_mut(&record_pk) {
            record.modified_date = modified;
        }
    }

    pub fn lookup_entry(&self, search_parameter: &str) -> Option<ResolvedIdentity> {
        self.lock().lookup.get(search_parameter).cloned()
    }

    /// Claims made so far as `(bulk_pk, record pks)` in claim order.
    pub fn claim_log(&self) -> Vec<(i64, Vec<i64>)> {
        self.lock().claim_log.clone()
    }

    /// Makes every future `complete_record` for this record fail.
    pub fn fail_updates_for(&self, record_pk: i64) {
        self.lock().failing_updates.insert(record_pk);
    }

    pub fn clear_failures(&self) {
        self.lock().failing_updates.clear();
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn find_job(&self, bulk_pk: i64) -> Result<Option<BulkVerificationJob>, StoreError> {
        Ok(self.job(bulk_pk))
    }

    async fn start_job(&self, bulk_pk: i64) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        match inner.jobs.get_mut(&bulk_pk) {
            Some(job) if job.status.is_startable() => {
                job.status = JobStatus::InProgress;
                job.modified_date = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn count_unprocessed(&self, bulk_pk: i64) -> Result<i64, StoreError> {
        let inner = self.lock();
        Ok(inner
            .records
            .values()
            .filter(|r| r.bulk_fk == bulk_pk && r.is_claimable())
            .count() as i64)
    }

    async fn claim_batch(&self, bulk_pk: i64, limit: i64) -> Result<Vec<ClaimedRecord>, StoreError> {
        let mut inner = self.lock();
        let mut candidates: Vec<&VerificationRecord> = inner
            .records
            .values()
            .filter(|r| r.bulk_fk == bulk_pk && r.is_claimable())
            .collect();
        candidates.sort_by(|a, b| a.created_date.cmp(&b.created_date).then(a.pk.cmp(&b.pk)));

        let claimed: Vec<ClaimedRecord> = candidates
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|r| ClaimedRecord {
                pk: r.pk,
                search_parameter: r.search_parameter.clone(),
                created_date: r.created_date,
            })
            .collect();

        let now = Utc::now();
        for c in &claimed {
            if let Some(record) = inner.records.get_mut(&c.pk) {
                record.job_status = Some(RecordJobStatus::InProgress);
                record.modified_date = now;
            }
        }
        if !claimed.is_empty() {
            let pks = claimed.iter().map(|c| c.pk).collect();
            inner.claim_log.push((bulk_pk, pks));
        }
        Ok(claimed)
    }

    async fn complete_record(
        &self,
        record_pk: i64,
        resolution: &Resolution,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.failing_updates.contains(&record_pk) {
            return Err(StoreError::Unavailable(format!(
                "injected update failure for record {}",
                record_pk
            )));
        }
        if let Some(record) = inner.records.get_mut(&record_pk) {
            record.job_status = Some(RecordJobStatus::Completed);
            record.transaction_status = Some(resolution.transaction_status());
            record.retrieval_mode = Some(resolution.retrieval_mode());
            record.status = Some(resolution.status());
            record.failure_reason = resolution.failure_reason().map(str::to_string);
            record.modified_date = at;
        }
        Ok(())
    }

    async fn count_incomplete(&self, bulk_pk: i64) -> Result<i64, StoreError> {
        let inner = self.lock();
        Ok(inner
            .records
            .values()
            .filter(|r| r.bulk_fk == bulk_pk && r.job_status != Some(RecordJobStatus::Completed))
            .count() as i64)
    }

    async fn complete_job(
        &self,
        bulk_pk: i64,
        completed_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        match inner.jobs.get_mut(&bulk_pk) {
            Some(job) if job.status != JobStatus::Completed => {
                job.status = JobStatus::Completed;
                job.completion_date = Some(completed_at);
                job.modified_date = completed_at;
                job.expiry_date = Some(expires_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn requeue_stale(&self, stale_before: DateTime<Utc>) -> Result<Vec<i64>, StoreError> {
        let mut inner = self.lock();
        let now = Utc::now();
        let mut jobs = BTreeSet::new();
        for record in inner.records.values_mut() {
            if record.job_status == Some(RecordJobStatus::InProgress) && record.modified_date < stale_before {
                record.job_status = Some(RecordJobStatus::Pending);
                record.modified_date = now;
                jobs.insert(record.bulk_fk);
            }
        }
        Ok(jobs.into_iter().collect())
    }

    async fn stalled_jobs(&self, stale_before: DateTime<Utc>) -> Result<Vec<i64>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::InProgress && job.modified_date < stale_before)
            .filter(|job| {
                let records: Vec<&VerificationRecord> =
                    inner.records.values().filter(|r| r.bulk_fk == job.pk).collect();
                records.iter().any(|r| r.is_claimable())
                    && records.iter().all(|r| r.modified_date < stale_before)
            })
            .map(|job| job.pk)
            .collect())
    }

    async fn unfinalized_jobs(&self) -> Result<Vec<i64>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::InProgress)
            .filter(|job| {
                inner
                    .records
                    .values()
                    .all(|r| r.bulk_fk != job.pk || r.job_status == Some(RecordJobStatus::Completed))
            })
            .map(|job| job.pk)
            .collect())
    }
}

#[async_trait]
impl LookupCache for MemoryStore {
    async fn contains(&self, search_parameter: &str) -> Result<bool, StoreError> {
        Ok(self.lock().lookup.contains_key(search_parameter))
    }

    async fn upsert(&self, entry: &LookupCacheEntry) -> Result<(), StoreError> {
        self.lock()
            .lookup
            .insert(entry.search_parameter.clone(), entry.identity.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_claim_is_fifo_and_flips_status() {
        let store = MemoryStore::new();
        let job = store.insert_job(ServiceMode::Mock, "batch.csv", None);
        let pks = store.insert_records(job, &["11111111111", "22222222222", "33333333333"]);

        let claimed = store.claim_batch(job, 2).await.unwrap();
        assert_eq!(claimed.iter().map(|c| c.pk).collect::<Vec<_>>(), pks[..2].to_vec());
        assert_eq!(store.record(pks[0]).unwrap().job_status, Some(RecordJobStatus::InProgress));
        assert_eq!(store.count_unprocessed(job).await.unwrap(), 1);
        assert_eq!(store.count_incomplete(job).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_start_job_only_once() {
        let store = MemoryStore::new();
        let job = store.insert_job(ServiceMode::Mock, "batch.csv", None);

        assert!(store.start_job(job).await.unwrap());
        assert!(!store.start_job(job).await.unwrap());
        assert!(!store.start_job(job + 100).await.unwrap());
    }

    #[tokio::test]
    async fn test_stalled_jobs_need_pending_records_and_no_recent_activity() {
        let store = MemoryStore::new();
        let job = store.insert_job(ServiceMode::Mock, "batch.csv", None);
        let pks = store.insert_records(job, &["11111111111", "22222222222"]);
        let later = Utc::now() + Duration::hours(1);

        // Not started yet.
        assert!(store.stalled_jobs(later).await.unwrap().is_empty());

        store.start_job(job).await.unwrap();
        store.claim_batch(job, 1).await.unwrap();
        store.complete_record(pks[0], &Resolution::CacheHit, Utc::now()).await.unwrap();

        assert_eq!(store.stalled_jobs(later).await.unwrap(), vec![job]);
        assert!(store.stalled_jobs(Utc::now() - Duration::hours(1)).await.unwrap().is_empty());

        store.claim_batch(job, 1).await.unwrap();
        store.complete_record(pks[1], &Resolution::CacheHit, Utc::now()).await.unwrap();
        assert!(store.stalled_jobs(later).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_requeue_only_touches_stale_in_progress() {
        let store = MemoryStore::new();
        let job = store.insert_job(ServiceMode::Mock, "batch.csv", None);
        let pks = store.insert_records(job, &["11111111111", "22222222222"]);
        store.claim_batch(job, 2).await.unwrap();
        store.backdate_record(pks[0], Utc::now() - Duration::hours(2));

        let jobs = store.requeue_stale(Utc::now() - Duration::hours(1)).await.unwrap();

        assert_eq!(jobs, vec![job]);
        assert_eq!(store.record(pks[0]).unwrap().job_status, Some(RecordJobStatus::Pending));
        assert_eq!(store.record(pks[1]).unwrap().job_status, Some(RecordJobStatus::InProgress));
    }
}

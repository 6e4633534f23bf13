use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::job::BulkVerificationJob;
use crate::models::lookup::LookupCacheEntry;
use crate::models::record::{ClaimedRecord, Resolution};

/// Access contract for bulk jobs and their records.
///
/// Every coordination decision of the processor is expressed as a row
/// transition through this trait, so implementations must make the
/// conditional operations atomic with respect to concurrent callers.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find_job(&self, bulk_pk: i64) -> Result<Option<BulkVerificationJob>, StoreError>;

    /// Moves a job from INITIATED/PENDING to IN_PROGRESS.
    /// Returns `false` when the job was not in a startable state.
    async fn start_job(&self, bulk_pk: i64) -> Result<bool, StoreError>;

    /// Records of the job whose `job_status` is NULL or PENDING.
    async fn count_unprocessed(&self, bulk_pk: i64) -> Result<i64, StoreError>;

    /// Selects up to `limit` claimable records oldest first, skipping rows
    /// locked by other claimers, and flips them to IN_PROGRESS in the same
    /// operation.
    async fn claim_batch(&self, bulk_pk: i64, limit: i64) -> Result<Vec<ClaimedRecord>, StoreError>;

    async fn complete_record(
        &self,
        record_pk: i64,
        resolution: &Resolution,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Records of the job whose `job_status` is anything but COMPLETED.
    async fn count_incomplete(&self, bulk_pk: i64) -> Result<i64, StoreError>;

    /// Marks the job COMPLETED unless it already is.
    /// Returns `true` only for the caller that changed the row.
    async fn complete_job(
        &self,
        bulk_pk: i64,
        completed_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Resets records stuck IN_PROGRESS since before `stale_before` to
    /// PENDING. Returns the distinct owning job pks.
    async fn requeue_stale(&self, stale_before: DateTime<Utc>) -> Result<Vec<i64>, StoreError>;

    /// IN_PROGRESS jobs that still have NULL/PENDING records but whose row
    /// and records have not been touched since `stale_before`: their driver
    /// stopped between rounds.
    async fn stalled_jobs(&self, stale_before: DateTime<Utc>) -> Result<Vec<i64>, StoreError>;

    /// IN_PROGRESS jobs none of whose records are outstanding.
    async fn unfinalized_jobs(&self) -> Result<Vec<i64>, StoreError>;
}

/// Previously resolved identities, consulted before any provider call.
#[async_trait]
pub trait LookupCache: Send + Sync {
    async fn contains(&self, search_parameter: &str) -> Result<bool, StoreError>;

    /// Inserts the entry or overwrites every resolved field of an existing one.
    async fn upsert(&self, entry: &LookupCacheEntry) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt row in {table}: {detail}")]
    Corrupt { table: &'static str, detail: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

use crate::db::store::{RecordStore, StoreError};
use crate::models::record::ClaimedRecord;

/// Claims the next batch of pending records of a job.
///
/// Records locked by a concurrent claimer are skipped rather than waited
/// on; they stay claimable for a later round or another driver. Every
/// returned record is already IN_PROGRESS.
pub async fn claim_batch(
    store: &dyn RecordStore,
    bulk_pk: i64,
    batch_size: u32,
) -> Result<Vec<ClaimedRecord>, StoreError> {
    let claimed = store.claim_batch(bulk_pk, i64::from(batch_size.max(1))).await?;

    metrics::counter!("bulk_records_claimed_total").increment(claimed.len() as u64);
    tracing::debug!(
        bulk_pk,
        batch_size,
        claimed = claimed.len(),
        oldest = ?claimed.first().map(|r| r.created_date),
        "Claimed record batch"
    );

    Ok(claimed)
}

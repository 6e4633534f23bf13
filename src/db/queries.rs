use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;

use crate::db::store::{LookupCache, RecordStore, StoreError};
use crate::models::job::{BulkVerificationJob, JobStatus, ServiceMode};
use crate::models::lookup::LookupCacheEntry;
use crate::models::record::{ClaimedRecord, RecordJobStatus, Resolution};

/// PostgreSQL-backed store over `nin_bulk_verifications`, `nin_records`
/// and `nin_lookup`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn job_from_row(row: &PgRow) -> Result<BulkVerificationJob, StoreError> {
    let status_str: String = row.try_get("status")?;
    let status = JobStatus::from_str(&status_str).map_err(|_| StoreError::Corrupt {
        table: "nin_bulk_verifications",
        detail: format!("unknown status '{}'", status_str),
    })?;
    let mode: Option<String> = row.try_get("service_mode")?;

    Ok(BulkVerificationJob {
        pk: row.try_get("pk")?,
        bulk_id: row.try_get("bulk_id")?,
        number_of_records: row.try_get("number_of_records")?,
        user_fk: row.try_get("user_fk")?,
        status,
        service_mode: ServiceMode::parse(mode.as_deref().unwrap_or_default()),
        file_name: row.try_get("file_name")?,
        wrapper_fk: row.try_get("wrapper_fk")?,
        is_report_uploaded: row.try_get("is_report_uploaded")?,
        created_date: row.try_get("created_date")?,
        modified_date: row.try_get("modified_date")?,
        completion_date: row.try_get("completion_date")?,
        expiry_date: row.try_get("expiry_date")?,
    })
}

#[async_trait]
impl RecordStore for PgStore {
    async fn find_job(&self, bulk_pk: i64) -> Result<Option<BulkVerificationJob>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT pk, bulk_id, number_of_records, user_fk, status, service_mode, file_name,
                   wrapper_fk, is_report_uploaded, created_date, modified_date,
                   completion_date, expiry_date
            FROM nin_bulk_verifications
            WHERE pk = $1
            "#,
        )
        .bind(bulk_pk)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn start_job(&self, bulk_pk: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE nin_bulk_verifications
            SET status = 'IN_PROGRESS',
                modified_date = NOW()
            WHERE pk = $1
              AND UPPER(status) IN ('INITIATED', 'PENDING')
            "#,
        )
        .bind(bulk_pk)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn count_unprocessed(&self, bulk_pk: i64) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total
            FROM nin_records
            WHERE bulk_fk = $1
              AND (job_status IS NULL OR job_status = 'PENDING')
            "#,
        )
        .bind(bulk_pk)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("total")?)
    }

    async fn claim_batch(&self, bulk_pk: i64, limit: i64) -> Result<Vec<ClaimedRecord>, StoreError> {
        // Selection and status flip are one statement so the row locks taken
        // by SKIP LOCKED are held until the flip commits.
        let rows = sqlx::query(
            r#"
            WITH claimable AS (
                SELECT pk
                FROM nin_records
                WHERE bulk_fk = $1
                  AND (job_status IS NULL OR job_status = 'PENDING')
                ORDER BY created_date ASC, pk ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE nin_records r
            SET job_status = 'IN_PROGRESS',
                modified_date = NOW()
            FROM claimable c
            WHERE r.pk = c.pk
            RETURNING r.pk, r.search_parameter, r.created_date
            "#,
        )
        .bind(bulk_pk)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut claimed = rows
            .into_iter()
            .map(|r| -> Result<ClaimedRecord, StoreError> {
                Ok(ClaimedRecord {
                    pk: r.try_get("pk")?,
                    search_parameter: r.try_get("search_parameter")?,
                    created_date: r.try_get("created_date")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        // RETURNING does not preserve the CTE ordering.
        claimed.sort_by(|a, b| a.created_date.cmp(&b.created_date).then(a.pk.cmp(&b.pk)));
        Ok(claimed)
    }

    async fn complete_record(
        &self,
        record_pk: i64,
        resolution: &Resolution,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE nin_records
            SET job_status = $1,
                transaction_status = $2,
                retrieval_mode = $3,
                status = $4,
                failure_reason = $5,
                modified_date = $6
            WHERE pk = $7
            "#,
        )
        .bind(RecordJobStatus::Completed.as_ref())
        .bind(resolution.transaction_status().as_ref())
        .bind(resolution.retrieval_mode().as_ref())
        .bind(resolution.status().as_ref())
        .bind(resolution.failure_reason())
        .bind(at)
        .bind(record_pk)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn count_incomplete(&self, bulk_pk: i64) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total
            FROM nin_records
            WHERE bulk_fk = $1
              AND job_status IS DISTINCT FROM 'COMPLETED'
            "#,
        )
        .bind(bulk_pk)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("total")?)
    }

    async fn complete_job(
        &self,
        bulk_pk: i64,
        completed_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE nin_bulk_verifications
            SET status = 'COMPLETED',
                completion_date = $1,
                modified_date = $1,
                expiry_date = $2
            WHERE pk = $3
              AND UPPER(status) <> 'COMPLETED'
            "#,
        )
        .bind(completed_at)
        .bind(expires_at)
        .bind(bulk_pk)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn requeue_stale(&self, stale_before: DateTime<Utc>) -> Result<Vec<i64>, StoreError> {
        let rows = sqlx::query(
            r#"
            WITH stale AS (
                SELECT pk
                FROM nin_records
                WHERE job_status = 'IN_PROGRESS'
                  AND modified_date < $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE nin_records r
            SET job_status = 'PENDING',
                modified_date = NOW()
            FROM stale s
            WHERE r.pk = s.pk
            RETURNING r.bulk_fk
            "#,
        )
        .bind(stale_before)
        .fetch_all(&self.pool)
        .await?;

        let mut jobs = rows
            .iter()
            .map(|r| r.try_get::<i64, _>("bulk_fk"))
            .collect::<Result<Vec<_>, _>>()?;
        jobs.sort_unstable();
        jobs.dedup();
        Ok(jobs)
    }

    async fn stalled_jobs(&self, stale_before: DateTime<Utc>) -> Result<Vec<i64>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT b.pk
            FROM nin_bulk_verifications b
            WHERE UPPER(b.status) IN ('IN_PROGRESS', 'IN-PROGRESS')
              AND b.modified_date < $1
              AND EXISTS (
                  SELECT 1 FROM nin_records r
                  WHERE r.bulk_fk = b.pk
                    AND (r.job_status IS NULL OR r.job_status = 'PENDING')
              )
              AND NOT EXISTS (
                  SELECT 1 FROM nin_records r
                  WHERE r.bulk_fk = b.pk
                    AND r.modified_date >= $1
              )
            ORDER BY b.pk
            "#,
        )
        .bind(stale_before)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| r.try_get::<i64, _>("pk"))
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn unfinalized_jobs(&self) -> Result<Vec<i64>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT b.pk
            FROM nin_bulk_verifications b
            WHERE UPPER(b.status) IN ('IN_PROGRESS', 'IN-PROGRESS')
              AND NOT EXISTS (
                  SELECT 1 FROM nin_records r
                  WHERE r.bulk_fk = b.pk
                    AND r.job_status IS DISTINCT FROM 'COMPLETED'
              )
            ORDER BY b.pk
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| r.try_get::<i64, _>("pk"))
            .collect::<Result<Vec<_>, _>>()?)
    }
}

#[async_trait]
impl LookupCache for PgStore {
    async fn contains(&self, search_parameter: &str) -> Result<bool, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT search_parameter
            FROM nin_lookup
            WHERE search_parameter = $1
            LIMIT 1
            "#,
        )
        .bind(search_parameter)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    async fn upsert(&self, entry: &LookupCacheEntry) -> Result<(), StoreError> {
        let identity = &entry.identity;
        sqlx::query(
            r#"
            INSERT INTO nin_lookup (
                search_parameter, first_name, middle_name, surname, gender, mobile, date_of_birth, photo
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (search_parameter) DO UPDATE
            SET first_name = EXCLUDED.first_name,
                middle_name = EXCLUDED.middle_name,
                surname = EXCLUDED.surname,
                gender = EXCLUDED.gender,
                mobile = EXCLUDED.mobile,
                date_of_birth = EXCLUDED.date_of_birth,
                photo = EXCLUDED.photo,
                modified_date = NOW()
            "#,
        )
        .bind(&entry.search_parameter)
        .bind(&identity.first_name)
        .bind(&identity.middle_name)
        .bind(&identity.last_name)
        .bind(&identity.gender)
        .bind(&identity.mobile)
        .bind(identity.birth_date())
        .bind(&identity.photo)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

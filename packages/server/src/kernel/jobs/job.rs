//! The job queue: claim-and-dispatch rows driven by the processor (C8).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

use crate::common::{JobId, TenantId};
use crate::kernel::central_store::CentralStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Complete,
    Failed,
    FailedFallbackEmail,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub tenant_id: TenantId,
    pub job_type: String,
    pub payload: Value,
    pub status: JobStatus,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub process_after: DateTime<Utc>,
    pub source_reference: Option<String>,
}

pub struct NewJob {
    pub tenant_id: TenantId,
    pub job_type: String,
    pub payload: Value,
    pub process_after: DateTime<Utc>,
    pub source_reference: Option<String>,
}

impl Job {
    /// Inserts a job unless a row with the same `(tenant_id, job_type,
    /// source_reference)` already exists in `{pending, processing, complete}`
    /// — the dedup key that makes scheduler sweeps idempotent across runs.
    /// Returns `None` when the insert was skipped as a duplicate.
    pub async fn create(store: &CentralStore, job: NewJob) -> Result<Option<Self>, sqlx::Error> {
        if let Some(source_reference) = &job.source_reference {
            let existing: Option<(JobId,)> = sqlx::query_as(
                r#"
                SELECT id FROM jobs
                WHERE tenant_id = $1 AND job_type = $2 AND source_reference = $3
                  AND status IN ('pending', 'processing', 'complete')
                LIMIT 1
                "#,
            )
            .bind(job.tenant_id)
            .bind(&job.job_type)
            .bind(source_reference)
            .fetch_optional(store.pool())
            .await?;

            if existing.is_some() {
                return Ok(None);
            }
        }

        let created = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO jobs
                (id, tenant_id, job_type, payload, status, retry_count, last_error,
                 created_at, process_after, source_reference)
            VALUES ($1, $2, $3, $4, 'pending', 0, NULL, NOW(), $5, $6)
            RETURNING id, tenant_id, job_type, payload, status, retry_count, last_error,
                      created_at, process_after, source_reference
            "#,
        )
        .bind(JobId::new())
        .bind(job.tenant_id)
        .bind(job.job_type)
        .bind(job.payload)
        .bind(job.process_after)
        .bind(job.source_reference)
        .fetch_one(store.pool())
        .await?;

        Ok(Some(created))
    }

    /// Claims up to `limit` due jobs atomically using `FOR UPDATE SKIP
    /// LOCKED`, so multiple processor instances never claim the same row.
    /// `limit = 0` returns an empty vector without touching the database.
    pub async fn claim_pending(store: &CentralStore, limit: i64) -> Result<Vec<Self>, sqlx::Error> {
        if limit <= 0 {
            return Ok(Vec::new());
        }

        sqlx::query_as::<_, Job>(
            r#"
            WITH claimed AS (
                SELECT id FROM jobs
                WHERE status = 'pending' AND process_after <= NOW()
                ORDER BY process_after ASC
                FOR UPDATE SKIP LOCKED
                LIMIT $1
            )
            UPDATE jobs
            SET status = 'processing'
            FROM claimed
            WHERE jobs.id = claimed.id
            RETURNING jobs.id, jobs.tenant_id, jobs.job_type, jobs.payload, jobs.status,
                      jobs.retry_count, jobs.last_error, jobs.created_at, jobs.process_after,
                      jobs.source_reference
            "#,
        )
        .bind(limit)
        .fetch_all(store.pool())
        .await
    }

    pub async fn mark_complete(store: &CentralStore, id: JobId) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE jobs SET status = 'complete' WHERE id = $1")
            .bind(id)
            .execute(store.pool())
            .await?;
        Ok(())
    }

    pub async fn mark_failed(store: &CentralStore, id: JobId, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE jobs SET status = 'failed', last_error = $2 WHERE id = $1")
            .bind(id)
            .bind(error)
            .execute(store.pool())
            .await?;
        Ok(())
    }

    pub async fn mark_failed_fallback_email(store: &CentralStore, id: JobId, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE jobs SET status = 'failed_fallback_email', last_error = $2 WHERE id = $1")
            .bind(id)
            .bind(error)
            .execute(store.pool())
            .await?;
        Ok(())
    }

    /// Increments `retry_count`, records `error`, and reschedules the job
    /// `delay` in the future with status reset to `pending`.
    pub async fn reschedule(
        store: &CentralStore,
        id: JobId,
        error: &str,
        delay: Duration,
    ) -> Result<(), sqlx::Error> {
        let process_after = Utc::now() + delay;
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending', retry_count = retry_count + 1, last_error = $2, process_after = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(process_after)
        .execute(store.pool())
        .await?;
        Ok(())
    }
}

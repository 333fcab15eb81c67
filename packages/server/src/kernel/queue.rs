//! The communication queue: one row per message waiting to be rendered and
//! dispatched by [`crate::kernel::jobs::handlers::process_queue_item`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

use crate::common::{QueueItemId, TenantId};
use crate::kernel::central_store::CentralStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum QueueItemStatus {
    Pending,
    Processing,
    Sent,
    Failed,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: QueueItemId,
    pub tenant_id: TenantId,
    pub event_type: String,
    pub communication_type: String,
    pub recipient_address: String,
    pub subject: Option<String>,
    pub message_params: Value,
    pub status: QueueItemStatus,
    pub external_message_id: Option<String>,
    pub retry_count: i32,
    pub error_details: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub struct NewQueueItem {
    pub tenant_id: TenantId,
    pub event_type: String,
    pub communication_type: String,
    pub recipient_address: String,
    pub subject: Option<String>,
    pub message_params: Value,
}

impl QueueItem {
    /// Claims up to `limit` pending items with `FOR UPDATE SKIP LOCKED`, same
    /// contention-free pattern as [`crate::kernel::jobs::job::Job::claim_pending`].
    pub async fn claim_pending(store: &CentralStore, limit: i64) -> Result<Vec<Self>, sqlx::Error> {
        if limit <= 0 {
            return Ok(Vec::new());
        }

        sqlx::query_as::<_, QueueItem>(
            r#"
            WITH claimed AS (
                SELECT id FROM communication_queue
                WHERE status = 'pending'
                ORDER BY created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT $1
            )
            UPDATE communication_queue
            SET status = 'processing'
            FROM claimed
            WHERE communication_queue.id = claimed.id
            RETURNING communication_queue.id, communication_queue.tenant_id, communication_queue.event_type,
                      communication_queue.communication_type, communication_queue.recipient_address,
                      communication_queue.subject, communication_queue.message_params, communication_queue.status,
                      communication_queue.external_message_id, communication_queue.retry_count,
                      communication_queue.error_details, communication_queue.created_at
            "#,
        )
        .bind(limit)
        .fetch_all(store.pool())
        .await
    }

    /// Lists up to `limit` pending items without claiming them, oldest
    /// first. Used by the scheduler sweep that turns pending queue items
    /// into `process_queue_item` jobs; the actual claim happens at the job
    /// layer via `FOR UPDATE SKIP LOCKED`, not here.
    pub async fn list_pending(store: &CentralStore, limit: i64) -> Result<Vec<Self>, sqlx::Error> {
        if limit <= 0 {
            return Ok(Vec::new());
        }

        sqlx::query_as::<_, QueueItem>(
            r#"
            SELECT id, tenant_id, event_type, communication_type, recipient_address, subject,
                   message_params, status, external_message_id, retry_count, error_details, created_at
            FROM communication_queue
            WHERE status = 'pending'
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(store.pool())
        .await
    }

    pub async fn get(store: &CentralStore, id: QueueItemId) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, QueueItem>(
            r#"
            SELECT id, tenant_id, event_type, communication_type, recipient_address, subject,
                   message_params, status, external_message_id, retry_count, error_details, created_at
            FROM communication_queue
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(store.pool())
        .await
    }

    pub async fn insert(store: &CentralStore, item: NewQueueItem) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, QueueItem>(
            r#"
            INSERT INTO communication_queue
                (id, tenant_id, event_type, communication_type, recipient_address, subject,
                 message_params, status, external_message_id, retry_count, error_details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', NULL, 0, NULL, NOW())
            RETURNING id, tenant_id, event_type, communication_type, recipient_address, subject,
                      message_params, status, external_message_id, retry_count, error_details, created_at
            "#,
        )
        .bind(QueueItemId::new())
        .bind(item.tenant_id)
        .bind(item.event_type)
        .bind(item.communication_type)
        .bind(item.recipient_address)
        .bind(item.subject)
        .bind(item.message_params)
        .fetch_one(store.pool())
        .await
    }

    pub async fn mark_sent(
        store: &CentralStore,
        id: QueueItemId,
        external_message_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE communication_queue SET status = 'sent', external_message_id = $2 WHERE id = $1")
            .bind(id)
            .bind(external_message_id)
            .execute(store.pool())
            .await?;
        Ok(())
    }

    pub async fn mark_failed(store: &CentralStore, id: QueueItemId, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE communication_queue SET status = 'failed', retry_count = retry_count + 1, error_details = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(store.pool())
        .await?;
        Ok(())
    }
}

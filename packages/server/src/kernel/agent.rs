//! Skip-locked claim for `agent_jobs` (C14).
//!
//! Only the claim primitive lives here — there is no planner or prompting
//! loop in this system; an operator or an external workflow is expected to
//! drive whatever an agent job represents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

use crate::common::{AgentJobId, TenantId};
use crate::kernel::central_store::CentralStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum AgentJobStatus {
    Pending,
    Claimed,
    Complete,
    Failed,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AgentJob {
    pub id: AgentJobId,
    pub tenant_id: TenantId,
    pub kind: String,
    pub payload: Value,
    pub status: AgentJobStatus,
    pub created_at: DateTime<Utc>,
}

impl AgentJob {
    /// Claims up to `limit` pending agent jobs with `FOR UPDATE SKIP LOCKED`.
    pub async fn claim_pending(store: &CentralStore, limit: i64) -> Result<Vec<Self>, sqlx::Error> {
        if limit <= 0 {
            return Ok(Vec::new());
        }

        sqlx::query_as::<_, AgentJob>(
            r#"
            WITH claimed AS (
                SELECT id FROM agent_jobs
                WHERE status = 'pending'
                ORDER BY created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT $1
            )
            UPDATE agent_jobs
            SET status = 'claimed'
            FROM claimed
            WHERE agent_jobs.id = claimed.id
            RETURNING agent_jobs.id, agent_jobs.tenant_id, agent_jobs.kind, agent_jobs.payload,
                      agent_jobs.status, agent_jobs.created_at
            "#,
        )
        .bind(limit)
        .fetch_all(store.pool())
        .await
    }
}

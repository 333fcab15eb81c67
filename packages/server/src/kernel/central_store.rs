//! Pooled connection to the control database: tenants, jobs, queue, templates.

use std::future::Future;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::info;

use crate::common::TenantId;

/// Gateway to the control store (C2).
///
/// Bounded pool (min 1, max 25) shared by every component that reads or
/// writes tenants, jobs, the communication queue, or templates.
#[derive(Clone)]
pub struct CentralStore {
    pool: PgPool,
}

impl CentralStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(25)
            .connect(database_url)
            .await?;

        info!("central store pool connected");
        Ok(Self { pool })
    }

    /// Borrow the underlying pool (sqlx query builders take `&PgPool` directly).
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run `body` inside a single transaction, committing on `Ok` and rolling
    /// back on `Err`. `body` gets the one connection for its entire duration.
    pub async fn within_transaction<F, Fut, T>(&self, body: F) -> Result<T>
    where
        F: FnOnce(Transaction<'static, Postgres>) -> Fut,
        Fut: Future<Output = Result<(T, Transaction<'static, Postgres>)>>,
    {
        let tx = self.pool.begin().await?;
        let (value, tx) = body(tx).await?;
        tx.commit().await?;
        Ok(value)
    }

    /// Drain in-flight queries and close the pool. Called during shutdown.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Ids of every active tenant. Scheduler sweeps and the job processor
    /// only ever act on active tenants — a deactivated tenant's queued jobs
    /// are left in place, not deleted, but no new work is scheduled for it.
    pub async fn active_tenants(&self) -> Result<Vec<TenantId>> {
        let rows: Vec<(TenantId,)> =
            sqlx::query_as("SELECT id FROM tenants WHERE is_active ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

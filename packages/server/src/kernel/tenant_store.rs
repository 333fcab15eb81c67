//! Lazily-created per-tenant connection pools and candidate-finder queries
//! against each tenant's operational (DMS) database.

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use tracing::info;

use crate::common::TenantId;

#[derive(Debug, Error)]
pub enum TenantStoreError {
    #[error("tenant {0} has no resolvable DSN")]
    TenantMisconfigured(TenantId),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Gateway to tenants' operational databases (C3).
///
/// Pools are created on first use, min 1 / max 15 connections, and kept for
/// the process lifetime — there is no eviction.
#[derive(Clone, Default)]
pub struct TenantStore {
    pools: DashMap<TenantId, PgPool>,
}

impl TenantStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the pool for `tenant_id`, creating it if this is the first use.
    pub async fn pool_for(
        &self,
        tenant_id: TenantId,
        dsn: &str,
    ) -> Result<PgPool, TenantStoreError> {
        if let Some(pool) = self.pools.get(&tenant_id) {
            return Ok(pool.clone());
        }

        if dsn.is_empty() {
            return Err(TenantStoreError::TenantMisconfigured(tenant_id));
        }

        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(15)
            .connect(dsn)
            .await?;

        info!(tenant_id = %tenant_id, "tenant pool created");
        self.pools.insert(tenant_id, pool.clone());
        Ok(pool)
    }

    pub async fn close_all(&self) {
        for entry in self.pools.iter() {
            entry.value().close().await;
        }
    }
}

// ============================================================================
// Candidate rows
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CustomerContact {
    pub customer_id: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub contact_preference: Option<String>,
    pub do_not_disturb_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ServiceReminderCandidate {
    pub customer_id: String,
    pub equipment_id: String,
    pub email: String,
    pub model: Option<String>,
    pub date_sold: NaiveDate,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AppointmentCandidate {
    pub appointment_id: String,
    pub customer_id: String,
    pub first_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub scheduled_start: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PastDueInvoice {
    pub invoice_id: String,
    pub customer_id: String,
    pub email: String,
    pub balance: f64,
    pub due_date: NaiveDate,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct WorkOrderEquipment {
    pub work_order_number: String,
    pub equipment_id: String,
    pub model: Option<String>,
    pub serial_number: Option<String>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SevenDayCheckin {
    pub customer_id: String,
    pub equipment_id: String,
    pub email: Option<String>,
    pub date_sold: NaiveDate,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PostServiceSurvey {
    pub work_order_number: String,
    pub customer_id: String,
    pub email: Option<String>,
    pub last_status_change_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AnnualTuneupCandidate {
    pub customer_id: String,
    pub equipment_id: String,
    pub email: Option<String>,
    pub date_sold: NaiveDate,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SeasonalReminderCandidate {
    pub customer_id: String,
    pub email: String,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct GhostCustomerCandidate {
    pub customer_id: String,
    pub email: Option<String>,
    pub last_order_date: NaiveDate,
    pub total_orders: i64,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct WarrantyExpirationCandidate {
    pub customer_id: String,
    pub equipment_id: String,
    pub email: Option<String>,
    pub warranty_end_date: NaiveDate,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TradeInCandidate {
    pub customer_id: String,
    pub equipment_id: String,
    pub email: Option<String>,
    pub date_sold: NaiveDate,
    pub repair_count: i64,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct FirstServiceCandidate {
    pub customer_id: String,
    pub equipment_id: String,
    pub email: Option<String>,
    pub machine_hours: f64,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UsageServiceCandidate {
    pub customer_id: String,
    pub equipment_id: String,
    pub email: Option<String>,
    pub machine_hours: f64,
    pub last_service_hours: Option<f64>,
}

impl TenantStore {
    pub async fn customers_contact(
        &self,
        pool: &PgPool,
        customer_id: &str,
    ) -> Result<Option<CustomerContact>, sqlx::Error> {
        sqlx::query_as::<_, CustomerContact>(
            r#"
            SELECT c.id AS customer_id, c.email, c.phone_mobile AS phone,
                   c.contact_preference, c.do_not_disturb_until
            FROM customers c
            WHERE c.id = $1
            "#,
        )
        .bind(customer_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn service_reminder_candidates(
        &self,
        pool: &PgPool,
    ) -> Result<Vec<ServiceReminderCandidate>, sqlx::Error> {
        sqlx::query_as::<_, ServiceReminderCandidate>(
            r#"
            SELECT c.id AS customer_id, e.id AS equipment_id, c.email, e.model, e.date_sold
            FROM equipment e
            JOIN customers c ON c.id = e.customer_id
            WHERE e.date_sold BETWEEN (NOW() - INTERVAL '25 months') AND (NOW() - INTERVAL '23 months')
              AND c.email IS NOT NULL
            ORDER BY e.date_sold ASC
            "#,
        )
        .fetch_all(pool)
        .await
    }

    pub async fn appointments_in_window(
        &self,
        pool: &PgPool,
    ) -> Result<Vec<AppointmentCandidate>, sqlx::Error> {
        sqlx::query_as::<_, AppointmentCandidate>(
            r#"
            SELECT a.id AS appointment_id, a.customer_id, c.first_name, c.phone_mobile AS phone,
                   c.email, a.scheduled_start
            FROM appointments a
            JOIN customers c ON c.id = a.customer_id
            WHERE a.scheduled_start BETWEEN (NOW() + INTERVAL '24 hours') AND (NOW() + INTERVAL '25 hours')
              AND c.phone_mobile IS NOT NULL
            ORDER BY a.scheduled_start ASC
            "#,
        )
        .fetch_all(pool)
        .await
    }

    pub async fn past_due_invoices(&self, pool: &PgPool) -> Result<Vec<PastDueInvoice>, sqlx::Error> {
        sqlx::query_as::<_, PastDueInvoice>(
            r#"
            SELECT i.id AS invoice_id, i.customer_id, c.email, i.balance, i.due_date
            FROM invoices i
            JOIN customers c ON c.id = i.customer_id
            WHERE i.due_date <= (CURRENT_DATE - INTERVAL '30 days')
              AND i.balance > 0
              AND c.email IS NOT NULL
            ORDER BY i.due_date ASC
            "#,
        )
        .fetch_all(pool)
        .await
    }

    pub async fn work_order_equipment(
        &self,
        pool: &PgPool,
        work_order_number: &str,
    ) -> Result<Option<WorkOrderEquipment>, sqlx::Error> {
        sqlx::query_as::<_, WorkOrderEquipment>(
            r#"
            SELECT wo.number AS work_order_number, e.id AS equipment_id, e.model, e.serial_number
            FROM work_orders wo
            JOIN equipment e ON e.id = wo.equipment_id
            WHERE wo.number = $1
            "#,
        )
        .bind(work_order_number)
        .fetch_optional(pool)
        .await
    }

    pub async fn seven_day_checkin(&self, pool: &PgPool) -> Result<Vec<SevenDayCheckin>, sqlx::Error> {
        sqlx::query_as::<_, SevenDayCheckin>(
            r#"
            SELECT c.id AS customer_id, e.id AS equipment_id, c.email, e.date_sold
            FROM equipment e
            JOIN customers c ON c.id = e.customer_id
            WHERE e.date_sold = (CURRENT_DATE - INTERVAL '7 days')::date
            "#,
        )
        .fetch_all(pool)
        .await
    }

    pub async fn post_service_survey(
        &self,
        pool: &PgPool,
    ) -> Result<Vec<PostServiceSurvey>, sqlx::Error> {
        sqlx::query_as::<_, PostServiceSurvey>(
            r#"
            SELECT wo.number AS work_order_number, wo.customer_id, c.email, wo.last_status_change_at
            FROM work_orders wo
            JOIN customers c ON c.id = wo.customer_id
            WHERE wo.detailed_status = 'Picked Up'
              AND wo.last_status_change_at BETWEEN (NOW() - INTERVAL '72 hours') AND (NOW() - INTERVAL '48 hours')
            "#,
        )
        .fetch_all(pool)
        .await
    }

    pub async fn annual_tuneup(&self, pool: &PgPool) -> Result<Vec<AnnualTuneupCandidate>, sqlx::Error> {
        sqlx::query_as::<_, AnnualTuneupCandidate>(
            r#"
            SELECT c.id AS customer_id, e.id AS equipment_id, c.email, e.date_sold
            FROM equipment e
            JOIN customers c ON c.id = e.customer_id
            WHERE EXTRACT(MONTH FROM e.date_sold) = EXTRACT(MONTH FROM (CURRENT_DATE + INTERVAL '14 days'))
              AND EXTRACT(DAY FROM e.date_sold) = EXTRACT(DAY FROM (CURRENT_DATE + INTERVAL '14 days'))
              AND e.date_sold < (CURRENT_DATE - INTERVAL '1 year')
            "#,
        )
        .fetch_all(pool)
        .await
    }

    pub async fn anniversary_offer(
        &self,
        pool: &PgPool,
    ) -> Result<Vec<AnnualTuneupCandidate>, sqlx::Error> {
        sqlx::query_as::<_, AnnualTuneupCandidate>(
            r#"
            SELECT c.id AS customer_id, e.id AS equipment_id, c.email, e.date_sold
            FROM equipment e
            JOIN customers c ON c.id = e.customer_id
            WHERE EXTRACT(MONTH FROM e.date_sold) = EXTRACT(MONTH FROM (CURRENT_DATE + INTERVAL '7 days'))
              AND EXTRACT(DAY FROM e.date_sold) = EXTRACT(DAY FROM (CURRENT_DATE + INTERVAL '7 days'))
              AND e.date_sold < (CURRENT_DATE - INTERVAL '1 year')
            "#,
        )
        .fetch_all(pool)
        .await
    }

    pub async fn seasonal_reminder(
        &self,
        pool: &PgPool,
    ) -> Result<Vec<SeasonalReminderCandidate>, sqlx::Error> {
        sqlx::query_as::<_, SeasonalReminderCandidate>(
            r#"
            SELECT DISTINCT c.id AS customer_id, c.email
            FROM equipment e
            JOIN customers c ON c.id = e.customer_id
            WHERE c.email IS NOT NULL
            "#,
        )
        .fetch_all(pool)
        .await
    }

    pub async fn ghost_customer(
        &self,
        pool: &PgPool,
        months: i64,
    ) -> Result<Vec<GhostCustomerCandidate>, sqlx::Error> {
        sqlx::query_as::<_, GhostCustomerCandidate>(
            r#"
            SELECT c.id AS customer_id, c.email, c.last_order_date, c.total_orders
            FROM customers c
            WHERE c.last_order_date < (CURRENT_DATE - make_interval(months => $1::int))
              AND c.total_orders > 0
            "#,
        )
        .bind(months)
        .fetch_all(pool)
        .await
    }

    pub async fn warranty_expiration(
        &self,
        pool: &PgPool,
        days: i64,
    ) -> Result<Vec<WarrantyExpirationCandidate>, sqlx::Error> {
        sqlx::query_as::<_, WarrantyExpirationCandidate>(
            r#"
            SELECT c.id AS customer_id, e.id AS equipment_id, c.email, e.warranty_end_date
            FROM equipment e
            JOIN customers c ON c.id = e.customer_id
            WHERE e.warranty_end_date > CURRENT_DATE
              AND e.warranty_end_date <= (CURRENT_DATE + make_interval(days => $1::int))
            "#,
        )
        .bind(days)
        .fetch_all(pool)
        .await
    }

    pub async fn trade_in(
        &self,
        pool: &PgPool,
        min_age_years: i64,
        min_repair_count: i64,
    ) -> Result<Vec<TradeInCandidate>, sqlx::Error> {
        sqlx::query_as::<_, TradeInCandidate>(
            r#"
            SELECT c.id AS customer_id, e.id AS equipment_id, c.email, e.date_sold,
                   COUNT(wo.id) AS repair_count
            FROM equipment e
            JOIN customers c ON c.id = e.customer_id
            LEFT JOIN work_orders wo ON wo.equipment_id = e.id
            WHERE e.date_sold <= (CURRENT_DATE - make_interval(years => $1::int))
            GROUP BY c.id, e.id, c.email, e.date_sold
            HAVING COUNT(wo.id) >= $2
            "#,
        )
        .bind(min_age_years)
        .bind(min_repair_count)
        .fetch_all(pool)
        .await
    }

    pub async fn first_service(
        &self,
        pool: &PgPool,
        hours_threshold: f64,
    ) -> Result<Vec<FirstServiceCandidate>, sqlx::Error> {
        sqlx::query_as::<_, FirstServiceCandidate>(
            r#"
            SELECT c.id AS customer_id, e.id AS equipment_id, c.email, e.machine_hours
            FROM equipment e
            JOIN customers c ON c.id = e.customer_id
            WHERE e.machine_hours >= $1
              AND (e.last_service_date IS NULL OR e.last_service_date <= e.date_sold)
            "#,
        )
        .bind(hours_threshold)
        .fetch_all(pool)
        .await
    }

    pub async fn usage_service(
        &self,
        pool: &PgPool,
        interval: f64,
    ) -> Result<Vec<UsageServiceCandidate>, sqlx::Error> {
        sqlx::query_as::<_, UsageServiceCandidate>(
            r#"
            SELECT c.id AS customer_id, e.id AS equipment_id, c.email, e.machine_hours, e.last_service_hours
            FROM equipment e
            JOIN customers c ON c.id = e.customer_id
            WHERE e.machine_hours >= COALESCE(e.last_service_hours, 0) + $1
            "#,
        )
        .bind(interval)
        .fetch_all(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pool_for_unresolved_dsn_fails() {
        let store = TenantStore::new();
        let tenant_id = TenantId::new();
        let err = store.pool_for(tenant_id, "").await.unwrap_err();
        assert!(matches!(err, TenantStoreError::TenantMisconfigured(_)));
    }
}

//! Individual sweep implementations. Each fans out over every active tenant,
//! runs its candidate-finder query against that tenant's operational
//! database, and creates one deduplicated job per candidate.

use chrono::Datelike;
use serde_json::json;
use tracing::warn;

use super::SchedulerContext;
use crate::common::TenantId;
use crate::kernel::jobs::job::{Job, NewJob};
use crate::kernel::queue::QueueItem;

async fn for_each_active_tenant<F, Fut>(ctx: &SchedulerContext, mut work: F) -> anyhow::Result<usize>
where
    F: FnMut(TenantId, sqlx::PgPool, String) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<usize>>,
{
    let mut total = 0;
    for tenant_id in ctx.central.active_tenants().await? {
        let config = match ctx.tenant_config.get(&ctx.central, tenant_id).await {
            Ok(config) => config,
            Err(err) => {
                warn!(tenant_id = %tenant_id, error = %err, "skipping tenant, no config");
                continue;
            }
        };

        let pool = match ctx.tenant_store.pool_for(tenant_id, &config.dms_dsn).await {
            Ok(pool) => pool,
            Err(err) => {
                warn!(tenant_id = %tenant_id, error = %err, "skipping tenant, no DMS connection");
                continue;
            }
        };

        total += work(tenant_id, pool, config.company_name).await?;
    }
    Ok(total)
}

pub async fn service_reminder_sweep(ctx: &SchedulerContext) -> anyhow::Result<usize> {
    for_each_active_tenant(ctx, |tenant_id, pool, _company| async move {
        let candidates = ctx_tenant_store(ctx).service_reminder_candidates(&pool).await?;
        let mut created = 0;
        for c in candidates {
            let job = NewJob {
                tenant_id,
                job_type: "notify_customer".to_string(),
                payload: json!({"event_type": "service_reminder", "customer_id": c.customer_id, "equipment_id": c.equipment_id, "model": c.model}),
                process_after: chrono::Utc::now(),
                source_reference: Some(format!("service_reminder_{}", c.equipment_id)),
            };
            if Job::create(&ctx.central, job).await?.is_some() {
                created += 1;
            }
        }
        Ok(created)
    })
    .await
}

pub async fn appointment_confirmation_sweep(ctx: &SchedulerContext) -> anyhow::Result<usize> {
    for_each_active_tenant(ctx, |tenant_id, pool, _company| async move {
        let candidates = ctx_tenant_store(ctx).appointments_in_window(&pool).await?;
        let mut created = 0;
        for c in candidates {
            let job = NewJob {
                tenant_id,
                job_type: "notify_customer".to_string(),
                payload: json!({
                    "event_type": "appointment_confirmation",
                    "customer_id": c.customer_id,
                    "first_name": c.first_name,
                    "appointment_id": c.appointment_id,
                    "scheduled_start": c.scheduled_start,
                    "communication_type": "sms",
                    "urgent": true,
                }),
                process_after: chrono::Utc::now(),
                source_reference: Some(format!("appointment_confirmation_{}", c.appointment_id)),
            };
            if Job::create(&ctx.central, job).await?.is_some() {
                created += 1;
            }
        }
        Ok(created)
    })
    .await
}

pub async fn past_due_invoice_sweep(ctx: &SchedulerContext) -> anyhow::Result<usize> {
    for_each_active_tenant(ctx, |tenant_id, pool, _company| async move {
        let candidates = ctx_tenant_store(ctx).past_due_invoices(&pool).await?;
        let mut created = 0;
        for c in candidates {
            let job = NewJob {
                tenant_id,
                job_type: "notify_customer".to_string(),
                payload: json!({"event_type": "past_due_invoice", "customer_id": c.customer_id, "invoice_id": c.invoice_id, "balance": c.balance, "due_date": c.due_date}),
                process_after: chrono::Utc::now(),
                source_reference: Some(format!("past_due_invoice_{}", c.invoice_id)),
            };
            if Job::create(&ctx.central, job).await?.is_some() {
                created += 1;
            }
        }
        Ok(created)
    })
    .await
}

pub async fn seven_day_checkin_sweep(ctx: &SchedulerContext) -> anyhow::Result<usize> {
    for_each_active_tenant(ctx, |tenant_id, pool, _company| async move {
        let candidates = ctx_tenant_store(ctx).seven_day_checkin(&pool).await?;
        let mut created = 0;
        for c in candidates {
            let job = NewJob {
                tenant_id,
                job_type: "notify_customer".to_string(),
                payload: json!({"event_type": "seven_day_checkin", "customer_id": c.customer_id, "equipment_id": c.equipment_id}),
                process_after: chrono::Utc::now(),
                source_reference: Some(format!("seven_day_checkin_{}", c.equipment_id)),
            };
            if Job::create(&ctx.central, job).await?.is_some() {
                created += 1;
            }
        }
        Ok(created)
    })
    .await
}

pub async fn post_service_survey_sweep(ctx: &SchedulerContext) -> anyhow::Result<usize> {
    for_each_active_tenant(ctx, |tenant_id, pool, _company| async move {
        let candidates = ctx_tenant_store(ctx).post_service_survey(&pool).await?;
        let mut created = 0;
        for c in candidates {
            let job = NewJob {
                tenant_id,
                job_type: "notify_customer".to_string(),
                payload: json!({"event_type": "post_service_survey", "customer_id": c.customer_id, "work_order_number": c.work_order_number}),
                process_after: chrono::Utc::now(),
                source_reference: Some(format!("post_service_survey_{}", c.work_order_number)),
            };
            if Job::create(&ctx.central, job).await?.is_some() {
                created += 1;
            }
        }
        Ok(created)
    })
    .await
}

pub async fn annual_tuneup_sweep(ctx: &SchedulerContext) -> anyhow::Result<usize> {
    for_each_active_tenant(ctx, |tenant_id, pool, _company| async move {
        let candidates = ctx_tenant_store(ctx).annual_tuneup(&pool).await?;
        let mut created = 0;
        for c in candidates {
            let job = NewJob {
                tenant_id,
                job_type: "notify_customer".to_string(),
                payload: json!({"event_type": "annual_tuneup", "customer_id": c.customer_id, "equipment_id": c.equipment_id}),
                process_after: chrono::Utc::now(),
                source_reference: Some(format!("annual_tuneup_{}_{}", c.equipment_id, chrono::Utc::now().format("%Y"))),
            };
            if Job::create(&ctx.central, job).await?.is_some() {
                created += 1;
            }
        }
        Ok(created)
    })
    .await
}

pub async fn seasonal_spring_sweep(ctx: &SchedulerContext) -> anyhow::Result<usize> {
    seasonal_sweep(ctx, "seasonal_spring").await
}

pub async fn seasonal_fall_sweep(ctx: &SchedulerContext) -> anyhow::Result<usize> {
    seasonal_sweep(ctx, "seasonal_fall").await
}

/// Shared candidate query for both seasonal reminders; only the event type and
/// dedup prefix differ, since spring and fall are gated to separate months
/// by the caller and never run concurrently for the same tenant.
async fn seasonal_sweep(ctx: &SchedulerContext, event_type: &'static str) -> anyhow::Result<usize> {
    for_each_active_tenant(ctx, |tenant_id, pool, _company| async move {
        let candidates = ctx_tenant_store(ctx).seasonal_reminder(&pool).await?;
        let mut created = 0;
        let year = chrono::Utc::now().format("%Y").to_string();
        for c in candidates {
            let job = NewJob {
                tenant_id,
                job_type: "notify_customer".to_string(),
                payload: json!({"event_type": event_type, "customer_id": c.customer_id}),
                process_after: chrono::Utc::now(),
                source_reference: Some(format!("{}_{}_{}", event_type, c.customer_id, year)),
            };
            if Job::create(&ctx.central, job).await?.is_some() {
                created += 1;
            }
        }
        Ok(created)
    })
    .await
}

pub async fn ghost_customer_sweep(ctx: &SchedulerContext, months: i64) -> anyhow::Result<usize> {
    for_each_active_tenant(ctx, |tenant_id, pool, _company| async move {
        let candidates = ctx_tenant_store(ctx).ghost_customer(&pool, months).await?;
        let mut created = 0;
        let now = chrono::Utc::now();
        let quarter = (now.month() - 1) / 3 + 1;
        let bucket = format!("{}_Q{}", now.format("%Y"), quarter);
        for c in candidates {
            let job = NewJob {
                tenant_id,
                job_type: "notify_customer".to_string(),
                payload: json!({"event_type": "ghost_customer", "customer_id": c.customer_id, "last_order_date": c.last_order_date}),
                process_after: chrono::Utc::now(),
                source_reference: Some(format!("winback_{}_{}", c.customer_id, bucket)),
            };
            if Job::create(&ctx.central, job).await?.is_some() {
                created += 1;
            }
        }
        Ok(created)
    })
    .await
}

pub async fn anniversary_offer_sweep(ctx: &SchedulerContext) -> anyhow::Result<usize> {
    for_each_active_tenant(ctx, |tenant_id, pool, _company| async move {
        let candidates = ctx_tenant_store(ctx).anniversary_offer(&pool).await?;
        let mut created = 0;
        for c in candidates {
            let job = NewJob {
                tenant_id,
                job_type: "notify_customer".to_string(),
                payload: json!({"event_type": "anniversary_offer", "customer_id": c.customer_id, "equipment_id": c.equipment_id}),
                process_after: chrono::Utc::now(),
                source_reference: Some(format!("anniversary_offer_{}_{}", c.equipment_id, chrono::Utc::now().format("%Y"))),
            };
            if Job::create(&ctx.central, job).await?.is_some() {
                created += 1;
            }
        }
        Ok(created)
    })
    .await
}

pub async fn warranty_expiration_sweep(ctx: &SchedulerContext, warning_days: i64) -> anyhow::Result<usize> {
    for_each_active_tenant(ctx, |tenant_id, pool, _company| async move {
        let candidates = ctx_tenant_store(ctx).warranty_expiration(&pool, warning_days).await?;
        let mut created = 0;
        let month = chrono::Utc::now().format("%Y%m").to_string();
        for c in candidates {
            let job = NewJob {
                tenant_id,
                job_type: "notify_customer".to_string(),
                payload: json!({"event_type": "warranty_expiration", "customer_id": c.customer_id, "equipment_id": c.equipment_id, "warranty_end_date": c.warranty_end_date}),
                process_after: chrono::Utc::now(),
                source_reference: Some(format!("warranty_exp_{}_{}", c.equipment_id, month)),
            };
            if Job::create(&ctx.central, job).await?.is_some() {
                created += 1;
            }
        }
        Ok(created)
    })
    .await
}

pub async fn trade_in_sweep(ctx: &SchedulerContext, min_age_years: i64, min_repair_count: i64) -> anyhow::Result<usize> {
    for_each_active_tenant(ctx, |tenant_id, pool, _company| async move {
        let candidates = ctx_tenant_store(ctx).trade_in(&pool, min_age_years, min_repair_count).await?;
        let mut created = 0;
        let year = chrono::Utc::now().format("%Y").to_string();
        for c in candidates {
            let job = NewJob {
                tenant_id,
                job_type: "notify_customer".to_string(),
                payload: json!({"event_type": "trade_in", "customer_id": c.customer_id, "equipment_id": c.equipment_id, "repair_count": c.repair_count}),
                process_after: chrono::Utc::now(),
                source_reference: Some(format!("trade_in_{}_{}", c.equipment_id, year)),
            };
            if Job::create(&ctx.central, job).await?.is_some() {
                created += 1;
            }
        }
        Ok(created)
    })
    .await
}

pub async fn first_service_sweep(ctx: &SchedulerContext, hours_threshold: f64) -> anyhow::Result<usize> {
    for_each_active_tenant(ctx, |tenant_id, pool, _company| async move {
        let candidates = ctx_tenant_store(ctx).first_service(&pool, hours_threshold).await?;
        let mut created = 0;
        for c in candidates {
            let job = NewJob {
                tenant_id,
                job_type: "notify_customer".to_string(),
                payload: json!({"event_type": "first_service", "customer_id": c.customer_id, "equipment_id": c.equipment_id, "machine_hours": c.machine_hours}),
                process_after: chrono::Utc::now(),
                source_reference: Some(format!("first_service_{}", c.equipment_id)),
            };
            if Job::create(&ctx.central, job).await?.is_some() {
                created += 1;
            }
        }
        Ok(created)
    })
    .await
}

pub async fn usage_service_sweep(ctx: &SchedulerContext, interval: f64) -> anyhow::Result<usize> {
    for_each_active_tenant(ctx, |tenant_id, pool, _company| async move {
        let candidates = ctx_tenant_store(ctx).usage_service(&pool, interval).await?;
        let mut created = 0;
        for c in candidates {
            let bucket = (c.machine_hours / interval).floor() as i64;
            let job = NewJob {
                tenant_id,
                job_type: "notify_customer".to_string(),
                payload: json!({"event_type": "usage_service", "customer_id": c.customer_id, "equipment_id": c.equipment_id, "machine_hours": c.machine_hours}),
                process_after: chrono::Utc::now(),
                source_reference: Some(format!("usage_service_{}_{}", c.equipment_id, bucket)),
            };
            if Job::create(&ctx.central, job).await?.is_some() {
                created += 1;
            }
        }
        Ok(created)
    })
    .await
}

/// Turns pending communication-queue rows into deduplicated
/// `process_queue_item` jobs so they run through the same claim, retry, and
/// quiet-hours machinery as every other job instead of being sent directly.
pub async fn queue_dispatch_sweep(ctx: &SchedulerContext) -> anyhow::Result<usize> {
    let items = QueueItem::list_pending(&ctx.central, 200).await?;
    let mut created = 0;
    for item in items {
        let job = NewJob {
            tenant_id: item.tenant_id,
            job_type: "process_queue_item".to_string(),
            payload: json!({"queue_item_id": item.id}),
            process_after: chrono::Utc::now(),
            source_reference: Some(format!("queue:{}", item.id)),
        };
        if Job::create(&ctx.central, job).await?.is_some() {
            created += 1;
        }
    }
    Ok(created)
}

fn ctx_tenant_store(ctx: &SchedulerContext) -> &crate::kernel::tenant_store::TenantStore {
    &ctx.tenant_store
}

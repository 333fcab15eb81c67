//! Time-driven scheduler: one polling loop per sweep, each watching a
//! tenant's operational database for something worth telling a customer
//! about and enqueuing a deduplicated job for it (C11).

pub mod tasks;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::kernel::central_store::CentralStore;
use crate::kernel::tenant_config::TenantConfigStore;
use crate::kernel::tenant_store::TenantStore;

#[derive(Clone)]
pub struct SchedulerContext {
    pub central: CentralStore,
    pub tenant_store: TenantStore,
    pub tenant_config: TenantConfigStore,
}

pub struct SchedulerConfig {
    pub daily_interval: Duration,
    pub weekly_interval: Duration,
    pub monthly_interval: Duration,
    pub appointment_confirmation_interval: Duration,
    pub queue_dispatch_interval: Duration,
    pub service_reminder_hour_utc: u32,
    pub invoice_reminder_hour_utc: u32,
    pub ghost_customer_months: i64,
    pub warranty_warning_days: i64,
    pub trade_in_min_age_years: i64,
    pub trade_in_min_repair_count: i64,
    pub first_service_hours_threshold: f64,
    pub usage_service_hours_interval: f64,
}

/// Spawns every sweep task and runs until `shutdown` is cancelled. Each
/// sweep gets its own interval loop rather than one shared `tokio_cron`
/// scheduler, so a slow tenant fan-out in one sweep never delays another.
pub async fn run(ctx: SchedulerContext, config: SchedulerConfig, shutdown: CancellationToken) {
    let ctx = Arc::new(ctx);
    let config = Arc::new(config);

    let mut handles = Vec::new();

    macro_rules! spawn_sweep {
        ($name:literal, $interval:expr, $sweep:path) => {{
            let ctx = ctx.clone();
            let shutdown = shutdown.clone();
            let interval = $interval;
            handles.push(tokio::spawn(async move {
                run_loop($name, interval, shutdown, move || {
                    let ctx = ctx.clone();
                    async move { $sweep(&ctx).await }
                })
                .await;
            }));
        }};
    }

    {
        let ctx = ctx.clone();
        let shutdown = shutdown.clone();
        let hour = config.service_reminder_hour_utc;
        handles.push(tokio::spawn(async move {
            run_loop_at_hour("service_reminder", hour, shutdown, move || {
                let ctx = ctx.clone();
                async move { tasks::service_reminder_sweep(&ctx).await }
            })
            .await;
        }));
    }
    spawn_sweep!(
        "appointment_confirmation",
        config.appointment_confirmation_interval,
        tasks::appointment_confirmation_sweep
    );
    spawn_sweep!("queue_dispatch", config.queue_dispatch_interval, tasks::queue_dispatch_sweep);
    {
        let ctx = ctx.clone();
        let shutdown = shutdown.clone();
        let hour = config.invoice_reminder_hour_utc;
        handles.push(tokio::spawn(async move {
            run_loop_at_hour("past_due_invoice", hour, shutdown, move || {
                let ctx = ctx.clone();
                async move { tasks::past_due_invoice_sweep(&ctx).await }
            })
            .await;
        }));
    }
    spawn_sweep!("seven_day_checkin", config.daily_interval, tasks::seven_day_checkin_sweep);
    spawn_sweep!("post_service_survey", config.daily_interval, tasks::post_service_survey_sweep);
    spawn_sweep!("annual_tuneup", config.daily_interval, tasks::annual_tuneup_sweep);
    {
        let ctx = ctx.clone();
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            run_loop_at_month("seasonal_spring", 3, shutdown, move || {
                let ctx = ctx.clone();
                async move { tasks::seasonal_spring_sweep(&ctx).await }
            })
            .await;
        }));
    }
    {
        let ctx = ctx.clone();
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            run_loop_at_month("seasonal_fall", 10, shutdown, move || {
                let ctx = ctx.clone();
                async move { tasks::seasonal_fall_sweep(&ctx).await }
            })
            .await;
        }));
    }
    {
        let ctx = ctx.clone();
        let config = config.clone();
        let shutdown = shutdown.clone();
        let interval = config.weekly_interval;
        handles.push(tokio::spawn(async move {
            run_loop("ghost_customer", interval, shutdown, move || {
                let ctx = ctx.clone();
                let config = config.clone();
                async move { tasks::ghost_customer_sweep(&ctx, config.ghost_customer_months).await }
            })
            .await;
        }));
    }
    spawn_sweep!("anniversary_offer", config.daily_interval, tasks::anniversary_offer_sweep);
    {
        let ctx = ctx.clone();
        let config = config.clone();
        let shutdown = shutdown.clone();
        let interval = config.daily_interval;
        handles.push(tokio::spawn(async move {
            run_loop("warranty_expiration", interval, shutdown, move || {
                let ctx = ctx.clone();
                let config = config.clone();
                async move { tasks::warranty_expiration_sweep(&ctx, config.warranty_warning_days).await }
            })
            .await;
        }));
    }
    {
        let ctx = ctx.clone();
        let config = config.clone();
        let shutdown = shutdown.clone();
        let interval = config.monthly_interval;
        handles.push(tokio::spawn(async move {
            run_loop("trade_in", interval, shutdown, move || {
                let ctx = ctx.clone();
                let config = config.clone();
                async move {
                    tasks::trade_in_sweep(&ctx, config.trade_in_min_age_years, config.trade_in_min_repair_count).await
                }
            })
            .await;
        }));
    }
    {
        let ctx = ctx.clone();
        let config = config.clone();
        let shutdown = shutdown.clone();
        let interval = config.weekly_interval;
        handles.push(tokio::spawn(async move {
            run_loop("first_service", interval, shutdown, move || {
                let ctx = ctx.clone();
                let config = config.clone();
                async move { tasks::first_service_sweep(&ctx, config.first_service_hours_threshold).await }
            })
            .await;
        }));
    }
    {
        let ctx = ctx.clone();
        let config = config.clone();
        let shutdown = shutdown.clone();
        let interval = config.weekly_interval;
        handles.push(tokio::spawn(async move {
            run_loop("usage_service", interval, shutdown, move || {
                let ctx = ctx.clone();
                let config = config.clone();
                async move { tasks::usage_service_sweep(&ctx, config.usage_service_hours_interval).await }
            })
            .await;
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }
}

async fn run_loop<F, Fut>(name: &'static str, interval: Duration, shutdown: CancellationToken, mut sweep: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<usize>>,
{
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!(sweep = name, "sweep shutting down");
                break;
            }
            _ = ticker.tick() => {
                match sweep().await {
                    Ok(created) if created > 0 => info!(sweep = name, jobs_created = created, "sweep completed"),
                    Ok(_) => {}
                    Err(err) => error!(sweep = name, error = %err, "sweep failed"),
                }
            }
        }
    }
}

/// Like [`run_loop`], but ticks daily and only invokes `sweep` during the
/// calendar month named by `month` (1-12), for seasonal sweeps that should
/// only run once a year, during their season.
async fn run_loop_at_month<F, Fut>(name: &'static str, month: u32, shutdown: CancellationToken, mut sweep: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<usize>>,
{
    use chrono::Datelike;

    let mut ticker = tokio::time::interval(Duration::from_secs(24 * 3600));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!(sweep = name, "sweep shutting down");
                break;
            }
            _ = ticker.tick() => {
                if chrono::Utc::now().month() != month {
                    continue;
                }
                match sweep().await {
                    Ok(created) if created > 0 => info!(sweep = name, jobs_created = created, "sweep completed"),
                    Ok(_) => {}
                    Err(err) => error!(sweep = name, error = %err, "sweep failed"),
                }
            }
        }
    }
}

/// Like [`run_loop`], but ticks hourly and only invokes `sweep` during the
/// UTC hour named by `hour`, so a sweep like the service reminder email
/// (sent once daily) fires at a configured wall-clock time rather than on
/// whatever cadence the process happened to start at.
async fn run_loop_at_hour<F, Fut>(name: &'static str, hour: u32, shutdown: CancellationToken, mut sweep: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<usize>>,
{
    use chrono::Timelike;

    let mut ticker = tokio::time::interval(Duration::from_secs(3600));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!(sweep = name, "sweep shutting down");
                break;
            }
            _ = ticker.tick() => {
                if chrono::Utc::now().hour() != hour {
                    continue;
                }
                match sweep().await {
                    Ok(created) if created > 0 => info!(sweep = name, jobs_created = created, "sweep completed"),
                    Ok(_) => {}
                    Err(err) => error!(sweep = name, error = %err, "sweep failed"),
                }
            }
        }
    }
}

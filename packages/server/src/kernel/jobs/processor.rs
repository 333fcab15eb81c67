//! Polls the job queue, applies quiet-hours and retry policy, and dispatches
//! due jobs to their handlers with bounded concurrency (C9).

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Timelike, Utc};
use serde_json::json;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::kernel::jobs::handlers::{self, HandlerContext};
use crate::kernel::jobs::job::{Job, JobStatus, NewJob};
use crate::kernel::tenant_config::TenantConfig;

pub struct ProcessorConfig {
    pub poll_interval: std::time::Duration,
    pub max_concurrent_jobs: usize,
    pub retry_delay: ChronoDuration,
    pub max_retries: i32,
}

/// Parses an `HH:MM` string into minutes since midnight. Malformed input is
/// treated as "no quiet hours configured" by the caller, not a hard error.
fn parse_hhmm(raw: &str) -> Option<u32> {
    let (h, m) = raw.split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    if h < 24 && m < 60 {
        Some(h * 60 + m)
    } else {
        None
    }
}

/// Half-open interval membership, with wrap-around when `start > end`:
/// `start < end` → `[start, end)`; `start > end` → `[start, 1440) ∪ [0, end)`.
fn within_quiet_hours(now_minutes: u32, start: u32, end: u32) -> bool {
    if start == end {
        return false;
    }
    if start < end {
        now_minutes >= start && now_minutes < end
    } else {
        now_minutes >= start || now_minutes < end
    }
}

/// Minutes remaining until quiet hours end, from `now_minutes`, given the
/// same start/end convention as [`within_quiet_hours`].
fn minutes_until_quiet_hours_end(now_minutes: u32, end: u32) -> u32 {
    if now_minutes < end {
        end - now_minutes
    } else {
        (1440 - now_minutes) + end
    }
}

fn is_urgent(job: &Job) -> bool {
    job.payload.get("urgent").and_then(|v| v.as_bool()).unwrap_or(false)
}

/// Runs the claim-process loop until `shutdown` is cancelled.
pub async fn run(ctx: HandlerContext, config: ProcessorConfig, shutdown: CancellationToken) {
    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
    let mut ticker = tokio::time::interval(config.poll_interval);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("job processor shutting down");
                break;
            }
            _ = ticker.tick() => {
                let available = semaphore.available_permits();
                if available == 0 {
                    continue;
                }

                let jobs = match Job::claim_pending(&ctx.central, available as i64).await {
                    Ok(jobs) => jobs,
                    Err(err) => {
                        error!(error = %err, "failed to claim jobs");
                        continue;
                    }
                };

                for job in jobs {
                    let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
                    let ctx = ctx.clone();
                    let retry_delay = config.retry_delay;
                    let max_retries = config.max_retries;
                    tokio::spawn(async move {
                        let _permit = permit;
                        execute(&ctx, job, retry_delay, max_retries).await;
                    });
                }
            }
        }
    }
}

async fn execute(ctx: &HandlerContext, job: Job, retry_delay: ChronoDuration, max_retries: i32) {
    if !is_urgent(&job) {
        if let Ok(config) = ctx.tenant_config.get(&ctx.central, job.tenant_id).await {
            if let Some(defer_minutes) = quiet_hours_defer_minutes(&config) {
                let until = Utc::now() + ChronoDuration::minutes(defer_minutes as i64);
                if let Err(err) = Job::reschedule(&ctx.central, job.id, "deferred: quiet hours", until - Utc::now()).await {
                    error!(job_id = %job.id, error = %err, "failed to defer job for quiet hours");
                }
                return;
            }
        }
    }

    match dispatch(ctx, &job).await {
        Ok(()) => {
            if let Err(err) = Job::mark_complete(&ctx.central, job.id).await {
                error!(job_id = %job.id, error = %err, "failed to mark job complete");
            }
        }
        Err(err) => handle_failure(ctx, job, err.to_string(), retry_delay, max_retries).await,
    }
}

fn quiet_hours_defer_minutes(config: &TenantConfig) -> Option<u32> {
    let start = parse_hhmm(config.quiet_hours_start.as_deref()?)?;
    let end = parse_hhmm(config.quiet_hours_end.as_deref()?)?;
    let now = Utc::now();
    let now_minutes = now.hour() * 60 + now.minute();

    if within_quiet_hours(now_minutes, start, end) {
        Some(minutes_until_quiet_hours_end(now_minutes, end))
    } else {
        None
    }
}

/// Dispatches a claimed job to its handler by `job_type`. Unknown job types
/// fail the job fast rather than silently doing nothing.
pub async fn dispatch(ctx: &HandlerContext, job: &Job) -> anyhow::Result<()> {
    match job.job_type.as_str() {
        "send_email" => handlers::send_email(ctx, job).await,
        "send_sms" => handlers::send_sms(ctx, job).await,
        "notify_customer" => dispatch_notify_customer(ctx, job).await,
        "process_queue_item" => dispatch_process_queue_item(ctx, job).await,
        other => Err(anyhow::anyhow!("unknown job_type: {other}")),
    }
}

async fn dispatch_notify_customer(ctx: &HandlerContext, job: &Job) -> anyhow::Result<()> {
    let config = ctx.tenant_config.get(&ctx.central, job.tenant_id).await?;
    let pool = ctx.tenant_store.pool_for(job.tenant_id, &config.dms_dsn).await?;

    let event_type = job
        .payload
        .get("event_type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("notify_customer job missing event_type"))?;

    let customer_id = job
        .payload
        .get("customer_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("job payload missing customer_id"))?;

    let contact = ctx
        .tenant_store
        .customers_contact(&pool, customer_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("customer {customer_id} not found"))?;

    let subject = job.payload.get("subject").and_then(|v| v.as_str()).map(str::to_string);
    let forced = job
        .payload
        .get("communication_type")
        .and_then(|v| v.as_str())
        .and_then(|v| match v {
            "sms" => Some(handlers::CommunicationType::Sms),
            "email" => Some(handlers::CommunicationType::Email),
            _ => None,
        });

    let outcome =
        handlers::notify_customer(ctx, job.tenant_id, event_type, &contact, subject, job.payload.clone(), forced)
            .await?;

    if outcome.skipped {
        info!(job_id = %job.id, reason = ?outcome.reason, "job skipped");
    }

    Ok(())
}

async fn dispatch_process_queue_item(ctx: &HandlerContext, job: &Job) -> anyhow::Result<()> {
    let raw_id = job
        .payload
        .get("queue_item_id")
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("process_queue_item job missing queue_item_id"))?;
    let id: crate::common::QueueItemId = serde_json::from_value(raw_id)?;

    let item = crate::kernel::queue::QueueItem::get(&ctx.central, id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("queue item {id} not found"))?;

    handlers::process_queue_item(ctx, &item).await?;
    Ok(())
}

/// After `max_retries` failed attempts, an SMS job falls back to a one-shot
/// email job (`source_reference = "sms_fallback_<id>"`) instead of giving up
/// entirely; the original job is marked `failed_fallback_email`, not
/// `failed`, so operators can distinguish the two outcomes.
pub async fn handle_failure(
    ctx: &HandlerContext,
    job: Job,
    error: String,
    retry_delay: ChronoDuration,
    max_retries: i32,
) {
    warn!(job_id = %job.id, retry_count = job.retry_count, error = %error, "job failed");

    if job.retry_count + 1 < max_retries {
        if let Err(err) = Job::reschedule(&ctx.central, job.id, &error, retry_delay).await {
            error!(job_id = %job.id, error = %err, "failed to reschedule job");
        }
        return;
    }

    if job.job_type != "send_sms" {
        if let Err(err) = Job::mark_failed(&ctx.central, job.id, &error).await {
            error!(job_id = %job.id, error = %err, "failed to mark job failed");
        }
        return;
    }

    let customer_id = job.payload.get("customer_id").and_then(|v| v.as_str()).map(str::to_string);
    let fallback_email = match customer_id {
        Some(customer_id) => resolve_fallback_email(ctx, job.tenant_id, &customer_id).await,
        None => None,
    };

    let Some(fallback_email) = fallback_email else {
        if let Err(err) = Job::mark_failed(&ctx.central, job.id, &error).await {
            error!(job_id = %job.id, error = %err, "failed to mark job failed");
        }
        return;
    };

    let fallback_reference = format!("sms_fallback_{}", job.id);
    let subject = job
        .payload
        .get("subject")
        .and_then(|v| v.as_str())
        .unwrap_or("A message for you")
        .to_string();

    let mut payload = job.payload.clone();
    if let Some(obj) = payload.as_object_mut() {
        obj.insert("to".to_string(), json!(fallback_email));
        obj.insert("subject".to_string(), json!(subject));
    }

    let created = Job::create(
        &ctx.central,
        NewJob {
            tenant_id: job.tenant_id,
            job_type: "send_email".to_string(),
            payload,
            process_after: Utc::now(),
            source_reference: Some(fallback_reference),
        },
    )
    .await;

    match created {
        Ok(_) => {
            if let Err(err) = Job::mark_failed_fallback_email(&ctx.central, job.id, &error).await {
                error!(job_id = %job.id, error = %err, "failed to mark job failed_fallback_email");
            }
        }
        Err(err) => {
            error!(job_id = %job.id, error = %err, "failed to create sms fallback job");
            let _ = Job::mark_failed(&ctx.central, job.id, &error).await;
        }
    }
}

/// Resolves a customer's email address via C3 for the SMS→email fallback
/// path. Returns `None` on any lookup failure or missing address, so the
/// caller can fall back to a plain `failed` outcome.
async fn resolve_fallback_email(ctx: &HandlerContext, tenant_id: crate::common::TenantId, customer_id: &str) -> Option<String> {
    let config = ctx.tenant_config.get(&ctx.central, tenant_id).await.ok()?;
    let pool = ctx.tenant_store.pool_for(tenant_id, &config.dms_dsn).await.ok()?;
    let contact = ctx.tenant_store.customers_contact(&pool, customer_id).await.ok()??;
    contact.email
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_window_is_half_open() {
        assert!(!within_quiet_hours(22 * 60, 22 * 60, 7 * 60));
        assert!(within_quiet_hours(23 * 60, 22 * 60, 7 * 60));
        assert!(within_quiet_hours(0, 22 * 60, 7 * 60));
        assert!(!within_quiet_hours(7 * 60, 22 * 60, 7 * 60));
    }

    #[test]
    fn simple_window_without_wraparound() {
        assert!(within_quiet_hours(9 * 60, 8 * 60, 17 * 60));
        assert!(!within_quiet_hours(17 * 60, 8 * 60, 17 * 60));
        assert!(!within_quiet_hours(7 * 60 + 59, 8 * 60, 17 * 60));
    }

    #[test]
    fn equal_start_and_end_means_no_quiet_hours() {
        assert!(!within_quiet_hours(12 * 60, 9 * 60, 9 * 60));
    }

    #[test]
    fn minutes_until_end_handles_wraparound() {
        assert_eq!(minutes_until_quiet_hours_end(23 * 60, 7 * 60), 8 * 60);
        assert_eq!(minutes_until_quiet_hours_end(6 * 60, 7 * 60), 60);
    }

    #[test]
    fn parse_hhmm_rejects_out_of_range() {
        assert_eq!(parse_hhmm("24:00"), None);
        assert_eq!(parse_hhmm("10:60"), None);
        assert_eq!(parse_hhmm("09:30"), Some(9 * 60 + 30));
    }
}

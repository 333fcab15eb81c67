//! Integration coverage for the SMS→email fallback state machine (C9): after
//! retries are exhausted, a `send_sms` job falls back to a one-shot
//! `send_email` job rather than giving up outright.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use server_core::kernel::ai::AiGenerator;
use server_core::kernel::jobs::handle_failure;
use server_core::kernel::jobs::job::{Job, JobStatus, NewJob};
use server_core::kernel::jobs::HandlerContext;
use server_core::kernel::tenant_config::TenantConfigStore;
use server_core::kernel::tenant_store::TenantStore;
use server_core::kernel::templates::TemplateStore;

use common::TestHarness;

fn handler_ctx(harness: &TestHarness) -> HandlerContext {
    HandlerContext {
        central: harness.central.clone(),
        tenant_store: TenantStore::new(),
        tenant_config: TenantConfigStore::new(),
        templates: TemplateStore::new(),
        ai: AiGenerator::disabled(),
        http: reqwest::Client::new(),
    }
}

#[tokio::test]
async fn sms_job_falls_back_to_email_after_exhausting_retries() {
    let harness = TestHarness::new().await.expect("harness");
    let tenant_id = harness.insert_tenant("Acme Equipment").await.expect("insert tenant");
    harness
        .insert_customer("c1", Some("c1@example.com"), Some("+15551230000"), None)
        .await
        .expect("insert customer");

    let ctx = handler_ctx(&harness);

    let job = Job::create(
        &harness.central,
        NewJob {
            tenant_id,
            job_type: "send_sms".to_string(),
            payload: json!({"customer_id": "c1", "to": "+15551230000", "body": "Your appointment is tomorrow"}),
            process_after: Utc::now(),
            source_reference: Some("appointment_reminder_a1".to_string()),
        },
    )
    .await
    .expect("create")
    .expect("not a duplicate");

    // Simulate three consecutive failures (e.g. a mocked transport error)
    // against max_retries = 3: the first two reschedule, the third exhausts
    // retries and triggers the fallback.
    for retry_count in 0..3 {
        let mut attempt = job.clone();
        attempt.retry_count = retry_count;
        handle_failure(&ctx, attempt, "mock transport error".to_string(), ChronoDuration::minutes(5), 3).await;
    }

    let reloaded = sqlx::query_as::<_, Job>(
        "SELECT id, tenant_id, job_type, payload, status, retry_count, last_error, \
         created_at, process_after, source_reference FROM jobs WHERE id = $1",
    )
    .bind(job.id)
    .fetch_one(harness.central.pool())
    .await
    .expect("reload job");
    assert_eq!(reloaded.status, JobStatus::FailedFallbackEmail);

    let fallback = sqlx::query_as::<_, Job>(
        "SELECT id, tenant_id, job_type, payload, status, retry_count, last_error, \
         created_at, process_after, source_reference FROM jobs WHERE source_reference = $1",
    )
    .bind(format!("sms_fallback_{}", job.id))
    .fetch_one(harness.central.pool())
    .await
    .expect("reload fallback job");

    assert_eq!(fallback.job_type, "send_email");
    assert_eq!(fallback.payload["to"], "c1@example.com");
    assert_eq!(fallback.payload["body"], "Your appointment is tomorrow");
}

#[tokio::test]
async fn non_sms_job_fails_outright_without_a_fallback() {
    let harness = TestHarness::new().await.expect("harness");
    let tenant_id = harness.insert_tenant("Acme Equipment").await.expect("insert tenant");
    let ctx = handler_ctx(&harness);

    let job = Job::create(
        &harness.central,
        NewJob {
            tenant_id,
            job_type: "process_queue_item".to_string(),
            payload: json!({"queue_item_id": "00000000-0000-0000-0000-000000000000"}),
            process_after: Utc::now(),
            source_reference: Some("queue:nonexistent".to_string()),
        },
    )
    .await
    .expect("create")
    .expect("not a duplicate");

    let mut attempt = job.clone();
    attempt.retry_count = 2;
    handle_failure(&ctx, attempt, "queue item not found".to_string(), ChronoDuration::minutes(5), 3).await;

    let reloaded = sqlx::query_as::<_, Job>(
        "SELECT id, tenant_id, job_type, payload, status, retry_count, last_error, \
         created_at, process_after, source_reference FROM jobs WHERE id = $1",
    )
    .bind(job.id)
    .fetch_one(harness.central.pool())
    .await
    .expect("reload job");

    assert_eq!(reloaded.status, JobStatus::Failed);
}

//! Integration coverage for the `send_email`/`send_sms` handlers (C10):
//! required-field validation and the `from` override, exercised against a
//! tenant with no provider credentials so the test never makes a real
//! network call.

mod common;

use serde_json::json;
use server_core::kernel::ai::AiGenerator;
use server_core::kernel::jobs::handlers;
use server_core::kernel::jobs::job::{Job, NewJob};
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

async fn make_job(harness: &TestHarness, tenant_id: server_core::common::TenantId, job_type: &str, payload: serde_json::Value) -> Job {
    Job::create(
        &harness.central,
        NewJob {
            tenant_id,
            job_type: job_type.to_string(),
            payload,
            process_after: chrono::Utc::now(),
            source_reference: None,
        },
    )
    .await
    .expect("create job")
    .expect("not a duplicate")
}

#[tokio::test]
async fn send_email_requires_to_subject_and_body() {
    let harness = TestHarness::new().await.expect("harness");
    let tenant_id = harness.insert_tenant("Acme Equipment").await.expect("insert tenant");
    let ctx = handler_ctx(&harness);

    let missing_subject = make_job(&harness, tenant_id, "send_email", json!({"to": "c@example.com", "body": "hi"})).await;
    let err = handlers::send_email(&ctx, &missing_subject).await.unwrap_err();
    assert!(err.to_string().contains("subject"));

    let missing_body = make_job(&harness, tenant_id, "send_email", json!({"to": "c@example.com", "subject": "Hi"})).await;
    let err = handlers::send_email(&ctx, &missing_body).await.unwrap_err();
    assert!(err.to_string().contains("body"));
}

#[tokio::test]
async fn send_email_fails_fast_when_provider_has_no_credentials() {
    let harness = TestHarness::new().await.expect("harness");
    let tenant_id = harness
        .insert_tenant_with("Acme Equipment", None, Some("notifications@example.com"))
        .await
        .expect("insert tenant");
    let ctx = handler_ctx(&harness);

    let job = make_job(
        &harness,
        tenant_id,
        "send_email",
        json!({"to": "c@example.com", "subject": "Hi", "body": "Hello there"}),
    )
    .await;

    let err = handlers::send_email(&ctx, &job).await.unwrap_err();
    assert!(err.to_string().to_lowercase().contains("credentials"));
}

#[tokio::test]
async fn send_sms_requires_to_and_body() {
    let harness = TestHarness::new().await.expect("harness");
    let tenant_id = harness.insert_tenant("Acme Equipment").await.expect("insert tenant");
    let ctx = handler_ctx(&harness);

    let missing_to = make_job(&harness, tenant_id, "send_sms", json!({"body": "hi"})).await;
    let err = handlers::send_sms(&ctx, &missing_to).await.unwrap_err();
    assert!(err.to_string().contains("to"));

    let missing_body = make_job(&harness, tenant_id, "send_sms", json!({"to": "+15551230000"})).await;
    let err = handlers::send_sms(&ctx, &missing_body).await.unwrap_err();
    assert!(err.to_string().contains("body"));
}

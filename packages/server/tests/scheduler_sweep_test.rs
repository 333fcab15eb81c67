//! Integration coverage for a scheduler sweep's candidate-query → job
//! creation path, including re-run idempotency (C11).

mod common;

use serde_json::json;
use server_core::kernel::jobs::job::Job;
use server_core::kernel::queue::{NewQueueItem, QueueItem};
use server_core::kernel::scheduler::tasks::{
    queue_dispatch_sweep, seasonal_fall_sweep, seasonal_spring_sweep, service_reminder_sweep,
};
use server_core::kernel::scheduler::SchedulerContext;
use server_core::kernel::tenant_config::TenantConfigStore;
use server_core::kernel::tenant_store::TenantStore;

use common::TestHarness;

fn scheduler_ctx(harness: &TestHarness) -> SchedulerContext {
    SchedulerContext {
        central: harness.central.clone(),
        tenant_store: TenantStore::new(),
        tenant_config: TenantConfigStore::new(),
    }
}

#[tokio::test]
async fn service_reminder_sweep_creates_one_job_per_candidate_and_is_idempotent() {
    let harness = TestHarness::new().await.expect("harness");
    let tenant_id = harness.insert_tenant("Acme Equipment").await.expect("insert tenant");

    harness
        .insert_customer("c1", Some("c1@example.com"), None, None)
        .await
        .expect("insert customer");

    sqlx::query(
        "INSERT INTO equipment (id, customer_id, model, date_sold) VALUES ($1, $2, $3, (CURRENT_DATE - INTERVAL '24 months'))",
    )
    .bind("e1")
    .bind("c1")
    .bind("Loader 500")
    .execute(&harness.tenant_pool)
    .await
    .expect("insert equipment");

    let ctx = scheduler_ctx(&harness);

    let first_run = service_reminder_sweep(&ctx).await.expect("first sweep");
    assert_eq!(first_run, 1);

    let second_run = service_reminder_sweep(&ctx).await.expect("second sweep");
    assert_eq!(second_run, 0, "re-running the sweep must not create a duplicate job for the same equipment");

    let claimed = Job::claim_pending(&harness.central, 10).await.expect("claim");
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].tenant_id, tenant_id);
    assert_eq!(claimed[0].job_type, "notify_customer");
    assert_eq!(claimed[0].payload["event_type"], "service_reminder");
}

#[tokio::test]
async fn seasonal_spring_and_fall_dedup_independently_for_the_same_customer() {
    // Spring and fall share the same candidate query but must not collide on
    // source_reference, since a customer is eligible for both in the same year.
    let harness = TestHarness::new().await.expect("harness");
    harness.insert_tenant("Acme Equipment").await.expect("insert tenant");
    harness
        .insert_customer("c1", Some("c1@example.com"), None, None)
        .await
        .expect("insert customer");

    sqlx::query("INSERT INTO equipment (id, customer_id, model, date_sold) VALUES ($1, $2, $3, CURRENT_DATE)")
        .bind("e1")
        .bind("c1")
        .bind("Loader 500")
        .execute(&harness.tenant_pool)
        .await
        .expect("insert equipment");

    let ctx = scheduler_ctx(&harness);

    assert_eq!(seasonal_spring_sweep(&ctx).await.expect("spring sweep"), 1);
    assert_eq!(seasonal_fall_sweep(&ctx).await.expect("fall sweep"), 1);
    assert_eq!(seasonal_spring_sweep(&ctx).await.expect("spring re-run"), 0);
    assert_eq!(seasonal_fall_sweep(&ctx).await.expect("fall re-run"), 0);

    let claimed = Job::claim_pending(&harness.central, 10).await.expect("claim");
    assert_eq!(claimed.len(), 2);
    assert!(claimed.iter().all(|j| j.job_type == "notify_customer"));
    let event_types: std::collections::HashSet<_> =
        claimed.iter().map(|j| j.payload["event_type"].as_str().unwrap()).collect();
    assert!(event_types.contains("seasonal_spring"));
    assert!(event_types.contains("seasonal_fall"));
}

#[tokio::test]
async fn queue_dispatch_sweep_creates_one_job_per_pending_item_and_is_idempotent() {
    let harness = TestHarness::new().await.expect("harness");
    let tenant_id = harness.insert_tenant("Acme Equipment").await.expect("insert tenant");

    let item = QueueItem::insert(
        &harness.central,
        NewQueueItem {
            tenant_id,
            event_type: "ghost_customer".to_string(),
            communication_type: "email".to_string(),
            recipient_address: "c@example.com".to_string(),
            subject: None,
            message_params: json!({}),
        },
    )
    .await
    .expect("insert queue item");

    let ctx = scheduler_ctx(&harness);

    let first_run = queue_dispatch_sweep(&ctx).await.expect("first sweep");
    assert_eq!(first_run, 1);

    let second_run = queue_dispatch_sweep(&ctx).await.expect("second sweep");
    assert_eq!(second_run, 0, "re-running the sweep must not create a duplicate job for the same queue item");

    let claimed = Job::claim_pending(&harness.central, 10).await.expect("claim");
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].job_type, "process_queue_item");
    assert_eq!(claimed[0].source_reference.as_deref(), Some(format!("queue:{}", item.id).as_str()));
}

#[tokio::test]
async fn sweep_skips_tenants_with_no_usable_config() {
    // No tenants inserted at all: active_tenants() returns empty, and the
    // sweep must complete successfully with zero jobs rather than erroring.
    let harness = TestHarness::new().await.expect("harness");
    let ctx = scheduler_ctx(&harness);

    let created = service_reminder_sweep(&ctx).await.expect("sweep with no tenants");
    assert_eq!(created, 0);
}

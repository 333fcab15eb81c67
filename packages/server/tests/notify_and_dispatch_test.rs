//! Integration coverage for channel resolution (`notify_customer`) and
//! queue-item dispatch (`process_queue_item`) against a real Postgres
//! instance (C9/C10).

mod common;

use serde_json::json;
use server_core::kernel::ai::AiGenerator;
use server_core::kernel::jobs::handlers::{self, CommunicationType, HandlerContext};
use server_core::kernel::queue::{NewQueueItem, QueueItem, QueueItemStatus};
use server_core::kernel::tenant_config::TenantConfigStore;
use server_core::kernel::tenant_store::{CustomerContact, TenantStore};
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

fn contact(email: Option<&str>, phone: Option<&str>, preference: Option<&str>) -> CustomerContact {
    CustomerContact {
        customer_id: "c1".to_string(),
        email: email.map(str::to_string),
        phone: phone.map(str::to_string),
        contact_preference: preference.map(str::to_string),
        do_not_disturb_until: None,
    }
}

#[tokio::test]
async fn appointment_confirmation_without_phone_yields_zero_queue_items() {
    let harness = TestHarness::new().await.expect("harness");
    let tenant_id = harness.insert_tenant("Acme Equipment").await.expect("insert tenant");
    let ctx = handler_ctx(&harness);

    let outcome = handlers::notify_customer(
        &ctx,
        tenant_id,
        "appointment_confirmation",
        &contact(Some("c@example.com"), None, Some("sms")),
        None,
        json!({}),
        None,
    )
    .await
    .expect("notify_customer");

    assert!(outcome.skipped);

    let claimed = QueueItem::claim_pending(&harness.central, 10).await.expect("claim");
    assert!(claimed.is_empty(), "no queue item should be enqueued when the only usable channel is unavailable");
}

#[tokio::test]
async fn forced_channel_wins_over_stated_preference() {
    let harness = TestHarness::new().await.expect("harness");
    let tenant_id = harness.insert_tenant("Acme Equipment").await.expect("insert tenant");
    let ctx = handler_ctx(&harness);

    handlers::notify_customer(
        &ctx,
        tenant_id,
        "past_due_invoice",
        &contact(Some("c@example.com"), Some("+15551230000"), Some("sms")),
        None,
        json!({}),
        Some(CommunicationType::Email),
    )
    .await
    .expect("notify_customer");

    let claimed = QueueItem::claim_pending(&harness.central, 10).await.expect("claim");
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].communication_type, "email");
    assert_eq!(claimed[0].recipient_address, "c@example.com");
}

#[tokio::test]
async fn opted_out_customer_is_skipped_without_enqueuing() {
    let harness = TestHarness::new().await.expect("harness");
    let tenant_id = harness.insert_tenant("Acme Equipment").await.expect("insert tenant");
    let ctx = handler_ctx(&harness);

    let outcome = handlers::notify_customer(
        &ctx,
        tenant_id,
        "seasonal_spring",
        &contact(Some("c@example.com"), Some("+15551230000"), Some("none")),
        None,
        json!({}),
        None,
    )
    .await
    .expect("notify_customer");

    assert!(outcome.skipped);
    assert_eq!(outcome.reason.as_deref(), Some("customer opted out of communications"));
}

#[tokio::test]
async fn process_queue_item_marks_failed_when_email_provider_missing_credentials() {
    let harness = TestHarness::new().await.expect("harness");
    let tenant_id = harness
        .insert_tenant_with("Acme Equipment", Some("re_test_key"), None)
        .await
        .expect("insert tenant");
    harness
        .insert_global_template("ghost_customer", "email", Some("We miss you"), "Hi {{first_name}}, come back!", false)
        .await
        .expect("insert template");

    let ctx = handler_ctx(&harness);

    let item = QueueItem::insert(
        &harness.central,
        NewQueueItem {
            tenant_id,
            event_type: "ghost_customer".to_string(),
            communication_type: "email".to_string(),
            recipient_address: "c@example.com".to_string(),
            subject: None,
            message_params: json!({"first_name": "Dana"}),
        },
    )
    .await
    .expect("insert queue item");

    let err = handlers::process_queue_item(&ctx, &item).await.unwrap_err();
    assert!(err.to_string().contains("resend"));

    let reloaded = sqlx::query_as::<_, QueueItem>(
        "SELECT id, tenant_id, event_type, communication_type, recipient_address, subject, \
         message_params, status, external_message_id, retry_count, error_details, created_at \
         FROM communication_queue WHERE id = $1",
    )
    .bind(item.id)
    .fetch_one(harness.central.pool())
    .await
    .expect("reload queue item");

    assert_eq!(reloaded.status, QueueItemStatus::Failed);
    assert_eq!(reloaded.retry_count, 1);
}

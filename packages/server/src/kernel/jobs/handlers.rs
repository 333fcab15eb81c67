//! Job and queue-item handlers: rendering, enrichment, and dispatch (C10).

use std::collections::HashMap;

use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use crate::common::TenantId;
use crate::kernel::ai::AiGenerator;
use crate::kernel::central_store::CentralStore;
use crate::kernel::jobs::job::Job;
use crate::kernel::providers::{factory, Attachment, OutboundMessage, ProviderError};
use crate::kernel::queue::QueueItem;
use crate::kernel::tenant_config::{TenantConfig, TenantConfigStore};
use crate::kernel::tenant_store::{CustomerContact, TenantStore};
use crate::kernel::templates::TemplateStore;

/// Shared dependencies handlers need; constructed once at startup and
/// cloned cheaply (every field is an `Arc`-backed handle or plain pool).
#[derive(Clone)]
pub struct HandlerContext {
    pub central: CentralStore,
    pub tenant_store: TenantStore,
    pub tenant_config: TenantConfigStore,
    pub templates: TemplateStore,
    pub ai: AiGenerator,
    pub http: reqwest::Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommunicationType {
    Sms,
    Email,
}

impl CommunicationType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Sms => "sms",
            Self::Email => "email",
        }
    }
}

pub struct NotifyOutcome {
    pub skipped: bool,
    pub reason: Option<String>,
}

impl NotifyOutcome {
    fn skip(reason: impl Into<String>) -> Self {
        Self {
            skipped: true,
            reason: Some(reason.into()),
        }
    }

    fn sent() -> Self {
        Self {
            skipped: false,
            reason: None,
        }
    }
}

/// Resolves how (and whether) to contact a customer, honoring
/// `contact_preference` and `do_not_disturb_until`, then enqueues a
/// communication-queue row. A resolved "do not contact" outcome is treated
/// as success, not failure — there was never a message to fail to send.
pub async fn notify_customer(
    ctx: &HandlerContext,
    tenant_id: TenantId,
    event_type: &str,
    contact: &CustomerContact,
    subject: Option<String>,
    params: Value,
    force_communication_type: Option<CommunicationType>,
) -> Result<NotifyOutcome, sqlx::Error> {
    if let Some(until) = contact.do_not_disturb_until {
        if until > Utc::now() {
            return Ok(NotifyOutcome::skip("customer has requested no contact until a later date"));
        }
    }

    let communication_type = match force_communication_type {
        Some(CommunicationType::Email) if contact.email.is_some() => CommunicationType::Email,
        Some(CommunicationType::Sms) if contact.phone.is_some() => CommunicationType::Sms,
        _ => match contact.contact_preference.as_deref() {
            Some("sms") if contact.phone.is_some() => CommunicationType::Sms,
            Some("email") if contact.email.is_some() => CommunicationType::Email,
            Some("none") => return Ok(NotifyOutcome::skip("customer opted out of communications")),
            _ => {
                if contact.email.is_some() {
                    CommunicationType::Email
                } else if contact.phone.is_some() {
                    CommunicationType::Sms
                } else {
                    return Ok(NotifyOutcome::skip("customer has no usable contact method"));
                }
            }
        },
    };

    let recipient_address = match communication_type {
        CommunicationType::Sms => contact.phone.clone().unwrap(),
        CommunicationType::Email => contact.email.clone().unwrap(),
    };

    QueueItem::insert(
        &ctx.central,
        crate::kernel::queue::NewQueueItem {
            tenant_id,
            event_type: event_type.to_string(),
            communication_type: communication_type.as_str().to_string(),
            recipient_address,
            subject,
            message_params: params,
        },
    )
    .await?;

    Ok(NotifyOutcome::sent())
}

/// Sends a `send_email` job directly: `to`, `subject`, and `body` are
/// required in the payload; an optional `from` overrides the tenant's
/// configured from-address for this send only.
pub async fn send_email(ctx: &HandlerContext, job: &Job) -> anyhow::Result<()> {
    let to = job
        .payload
        .get("to")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("send_email job missing to"))?;
    let subject = job
        .payload
        .get("subject")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("send_email job missing subject"))?;
    let body = job
        .payload
        .get("body")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("send_email job missing body"))?;

    let mut config = ctx.tenant_config.get(&ctx.central, job.tenant_id).await?;
    if let Some(from) = job.payload.get("from").and_then(|v| v.as_str()) {
        config.email_from_address = Some(from.to_string());
    }

    let message = OutboundMessage {
        recipient: to,
        subject: Some(subject),
        body_text: body,
        body_html: None,
        attachments: &[],
    };

    let adapter = factory::email_adapter(&config);
    adapter.send(&message, &config).await?;
    Ok(())
}

/// Sends a `send_sms` job directly: `to` and `body` are required in the
/// payload; the tenant's default from-number is used, since SMS has no
/// per-send override equivalent to email's `from`.
pub async fn send_sms(ctx: &HandlerContext, job: &Job) -> anyhow::Result<()> {
    let to = job
        .payload
        .get("to")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("send_sms job missing to"))?;
    let body = job
        .payload
        .get("body")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("send_sms job missing body"))?;

    let config = ctx.tenant_config.get(&ctx.central, job.tenant_id).await?;

    let message = OutboundMessage {
        recipient: to,
        subject: None,
        body_text: body,
        body_html: None,
        attachments: &[],
    };

    let adapter = factory::sms_adapter(&config);
    adapter.send(&message, &config).await?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessQueueItemError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Template(#[from] crate::kernel::templates::TemplateError),

    #[error(transparent)]
    TenantConfig(#[from] crate::kernel::tenant_config::TenantConfigError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Renders and dispatches a single queue item: loads the template, fills in
/// any best-effort enrichment data, generates content, sends via the right
/// provider, and records the outcome on the row.
pub async fn process_queue_item(
    ctx: &HandlerContext,
    item: &QueueItem,
) -> Result<(), ProcessQueueItemError> {
    let config = ctx.tenant_config.get(&ctx.central, item.tenant_id).await?;

    let mut params = flatten_params(&item.message_params);
    enrich_with_equipment(ctx, &config, &mut params).await;
    let attachment = fetch_receipt_attachment(ctx, &params).await;
    let attachments: Vec<Attachment> = attachment.into_iter().collect();

    let template = ctx
        .templates
        .load(&ctx.central, &item.event_type, Some(item.tenant_id), &item.communication_type)
        .await?;

    let rendered = ctx
        .templates
        .render(&template, &params, &item.event_type, &config.company_name, &ctx.ai)
        .await;

    let subject = item.subject.clone().or(rendered.subject);

    let message = OutboundMessage {
        recipient: &item.recipient_address,
        subject: subject.as_deref(),
        body_text: &rendered.body_text,
        body_html: rendered.body_html.as_deref(),
        attachments: &attachments,
    };

    let adapter = match item.communication_type.as_str() {
        "sms" => factory::sms_adapter(&config),
        _ => factory::email_adapter(&config),
    };

    match adapter.send(&message, &config).await {
        Ok(result) => {
            info!(
                queue_item_id = %item.id,
                provider = adapter.provider_name(),
                "queue item sent"
            );
            QueueItem::mark_sent(&ctx.central, item.id, result.message_id.as_deref().unwrap_or_default()).await?;
            Ok(())
        }
        Err(err) => {
            warn!(queue_item_id = %item.id, provider = adapter.provider_name(), error = %err, "send failed");
            QueueItem::mark_failed(&ctx.central, item.id, &err.to_string()).await?;
            Err(err.into())
        }
    }
}

/// Flattens a job/queue-item payload into template substitution params.
/// Scalars render as their plain text form; `null`, arrays, and nested
/// objects are dropped rather than rendered as JSON syntax.
fn flatten_params(value: &Value) -> HashMap<String, String> {
    let Some(object) = value.as_object() else {
        return HashMap::new();
    };

    object
        .iter()
        .filter_map(|(k, v)| match v {
            Value::String(s) => Some((k.clone(), s.clone())),
            Value::Number(n) => Some((k.clone(), n.to_string())),
            Value::Bool(b) => Some((k.clone(), b.to_string())),
            _ => None,
        })
        .collect()
}

/// Best-effort: attach equipment details to `params` for work-order-related
/// events when the payload carries a `work_order_number`. Any failure here
/// is swallowed — the message still goes out without the enrichment.
async fn enrich_with_equipment(ctx: &HandlerContext, config: &TenantConfig, params: &mut HashMap<String, String>) {
    let Some(work_order_number) = params.get("work_order_number").cloned() else {
        return;
    };

    let Ok(pool) = ctx.tenant_store.pool_for(config.tenant_id, &config.dms_dsn).await else {
        return;
    };

    match ctx.tenant_store.work_order_equipment(&pool, &work_order_number).await {
        Ok(Some(equipment)) => {
            if let Some(model) = equipment.model {
                params.entry("equipment_model".to_string()).or_insert(model);
            }
            if let Some(serial) = equipment.serial_number {
                params.entry("equipment_serial".to_string()).or_insert(serial);
            }
        }
        Ok(None) => {}
        Err(err) => warn!(work_order_number, error = %err, "equipment enrichment failed"),
    }
}

/// Best-effort: fetches a receipt PDF's bytes when the payload carries a
/// `receipt_pdf_url`. A 404 or any transport failure is logged and
/// swallowed rather than failing the send — a missing receipt never blocks
/// the underlying notification.
async fn fetch_receipt_attachment(ctx: &HandlerContext, params: &HashMap<String, String>) -> Option<Attachment> {
    let url = params.get("receipt_pdf_url")?;

    let response = match ctx.http.get(url).send().await {
        Ok(response) => response,
        Err(err) => {
            warn!(url, error = %err, "receipt attachment fetch failed");
            return None;
        }
    };

    let status = response.status();
    if status.as_u16() == 404 {
        warn!(url, "receipt attachment not found");
        return None;
    }
    if !status.is_success() {
        warn!(url, status = %status, "receipt attachment unreachable");
        return None;
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/pdf")
        .to_string();

    let filename = url
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("receipt.pdf")
        .to_string();

    match response.bytes().await {
        Ok(bytes) => Some(Attachment {
            filename,
            content_type,
            bytes: bytes.to_vec(),
        }),
        Err(err) => {
            warn!(url, error = %err, "receipt attachment read failed");
            None
        }
    }
}

//! Email adapter for SendGrid.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::json;
use uuid::Uuid;

use crate::kernel::providers::{Adapter, OutboundMessage, ProviderError, SendResult};
use crate::kernel::tenant_config::TenantConfig;

pub struct SendGridAdapter {
    http: reqwest::Client,
}

impl SendGridAdapter {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for SendGridAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for SendGridAdapter {
    async fn send(
        &self,
        message: &OutboundMessage<'_>,
        config: &TenantConfig,
    ) -> Result<SendResult, ProviderError> {
        let key = config
            .sendgrid_key
            .as_ref()
            .ok_or(ProviderError::MissingCredentials("sendgrid"))?;
        let from = config
            .email_from_address
            .as_ref()
            .ok_or(ProviderError::MissingCredentials("sendgrid"))?;

        let mut content = vec![json!({"type": "text/plain", "value": message.body_text})];
        if let Some(html) = message.body_html {
            content.push(json!({"type": "text/html", "value": html}));
        }

        let mut payload = json!({
            "personalizations": [{"to": [{"email": message.recipient}]}],
            "from": {"email": from},
            "subject": message.subject.unwrap_or_default(),
            "content": content,
        });

        if !message.attachments.is_empty() {
            let attachments: Vec<_> = message
                .attachments
                .iter()
                .map(|a| {
                    json!({
                        "content": BASE64.encode(&a.bytes),
                        "filename": a.filename,
                        "type": a.content_type,
                        "disposition": "attachment",
                    })
                })
                .collect();
            payload["attachments"] = json!(attachments);
        }

        let response = self
            .http
            .post("https://api.sendgrid.com/v3/mail/send")
            .bearer_auth(key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProviderError::TransportError {
                provider: "sendgrid",
                source: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::ProviderRejected {
                provider: "sendgrid",
                status_code: status.as_u16(),
            });
        }

        // SendGrid returns no body on success; surface the request id it
        // sends back in headers, falling back to a locally-generated one.
        let message_id = response
            .headers()
            .get("x-message-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Ok(SendResult::ok(message_id))
    }

    fn provider_name(&self) -> &'static str {
        "sendgrid"
    }
}

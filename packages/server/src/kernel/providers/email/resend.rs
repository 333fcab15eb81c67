//! Email adapter for Resend (<https://resend.com>).

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;

use crate::kernel::providers::{Adapter, OutboundMessage, ProviderError, SendResult};
use crate::kernel::tenant_config::TenantConfig;

#[derive(Debug, Deserialize)]
struct ResendResponse {
    id: String,
}

pub struct ResendAdapter {
    http: reqwest::Client,
}

impl ResendAdapter {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for ResendAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for ResendAdapter {
    async fn send(
        &self,
        message: &OutboundMessage<'_>,
        config: &TenantConfig,
    ) -> Result<SendResult, ProviderError> {
        let key = config
            .resend_key
            .as_ref()
            .ok_or(ProviderError::MissingCredentials("resend"))?;
        let from = config
            .email_from_address
            .as_ref()
            .ok_or(ProviderError::MissingCredentials("resend"))?;

        let mut payload = json!({
            "from": from,
            "to": [message.recipient],
            "subject": message.subject.unwrap_or_default(),
            "text": message.body_text,
            "html": message.body_html,
        });

        if !message.attachments.is_empty() {
            let attachments: Vec<_> = message
                .attachments
                .iter()
                .map(|a| {
                    json!({
                        "filename": a.filename,
                        "content": BASE64.encode(&a.bytes),
                    })
                })
                .collect();
            payload["attachments"] = json!(attachments);
        }

        let response = self
            .http
            .post("https://api.resend.com/emails")
            .bearer_auth(key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProviderError::TransportError {
                provider: "resend",
                source: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::ProviderRejected {
                provider: "resend",
                status_code: status.as_u16(),
            });
        }

        let parsed = response
            .json::<ResendResponse>()
            .await
            .map_err(|e| ProviderError::TransportError {
                provider: "resend",
                source: e.to_string(),
            })?;

        Ok(SendResult::ok(parsed.id))
    }

    fn provider_name(&self) -> &'static str {
        "resend"
    }
}

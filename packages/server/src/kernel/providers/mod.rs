//! Pluggable outbound-message provider adapters (C5).

pub mod email;
pub mod factory;
pub mod sms;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::kernel::tenant_config::TenantConfig;

/// Outcome of a single send attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendResult {
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
    pub status_code: Option<u16>,
}

impl SendResult {
    pub fn ok(message_id: impl Into<String>) -> Self {
        Self {
            success: true,
            message_id: Some(message_id.into()),
            error: None,
            status_code: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("missing credentials for {0}")]
    MissingCredentials(&'static str),

    #[error("transport error contacting {provider}: {source}")]
    TransportError {
        provider: &'static str,
        source: String,
    },

    #[error("{provider} rejected the message (status {status_code})")]
    ProviderRejected {
        provider: &'static str,
        status_code: u16,
    },
}

/// An opaque file to attach to an outbound message. The adapter is
/// responsible for translating this into the provider's wire format.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// A message ready to be handed to a provider adapter.
pub struct OutboundMessage<'a> {
    pub recipient: &'a str,
    pub subject: Option<&'a str>,
    pub body_text: &'a str,
    pub body_html: Option<&'a str>,
    pub attachments: &'a [Attachment],
}

/// Uniform interface over SMS and email providers.
#[async_trait]
pub trait Adapter: Send + Sync {
    async fn send(
        &self,
        message: &OutboundMessage<'_>,
        config: &TenantConfig,
    ) -> Result<SendResult, ProviderError>;

    fn provider_name(&self) -> &'static str;
}

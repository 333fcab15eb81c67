//! SMS adapter backed by Twilio.

use async_trait::async_trait;
use twilio::{TwilioClient, TwilioConfig, TwilioError};

use crate::kernel::providers::{Adapter, OutboundMessage, ProviderError, SendResult};
use crate::kernel::tenant_config::TenantConfig;

pub struct TwilioAdapter;

#[async_trait]
impl Adapter for TwilioAdapter {
    async fn send(
        &self,
        message: &OutboundMessage<'_>,
        config: &TenantConfig,
    ) -> Result<SendResult, ProviderError> {
        let (account_sid, auth_token, from) = match (
            &config.sms_account_id,
            &config.sms_auth_token,
            &config.sms_from_number,
        ) {
            (Some(sid), Some(token), Some(from)) => (sid.clone(), token.clone(), from.clone()),
            _ => return Err(ProviderError::MissingCredentials("twilio")),
        };

        let client = TwilioClient::new(TwilioConfig {
            account_sid,
            auth_token,
        });

        match client
            .send_message(message.recipient, &from, message.body_text)
            .await
        {
            Ok(response) => Ok(SendResult::ok(response.sid)),
            Err(TwilioError::Rejected { status, .. }) => Err(ProviderError::ProviderRejected {
                provider: "twilio",
                status_code: status,
            }),
            Err(err) => Err(ProviderError::TransportError {
                provider: "twilio",
                source: err.to_string(),
            }),
        }
    }

    fn provider_name(&self) -> &'static str {
        "twilio"
    }
}

//! Thin client for Twilio's Messages API.
//!
//! Only general SMS sending is implemented here — this system has no OTP/Verify
//! use case. The adapter layer (`server::kernel::providers::sms`) wraps this
//! client to satisfy the generic `Adapter` interface.

use std::collections::HashMap;

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
}

#[derive(Debug, Clone)]
pub struct TwilioClient {
    http: Client,
    config: TwilioConfig,
}

#[derive(Debug, Deserialize)]
pub struct MessageResponse {
    pub sid: String,
    pub status: String,
}

#[derive(Debug, Error)]
pub enum TwilioError {
    #[error("transport error contacting Twilio: {0}")]
    Transport(String),

    #[error("Twilio rejected the message (status {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("failed to parse Twilio response: {0}")]
    Parse(String),
}

impl TwilioClient {
    pub fn new(config: TwilioConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }

    /// Send an SMS via `POST /2010-04-01/Accounts/{sid}/Messages.json`.
    pub async fn send_message(
        &self,
        to: &str,
        from: &str,
        body: &str,
    ) -> Result<MessageResponse, TwilioError> {
        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.config.account_sid
        );

        let mut form: HashMap<&str, &str> = HashMap::new();
        form.insert("To", to);
        form.insert("From", from);
        form.insert("Body", body);

        let response = self
            .http
            .post(url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(|e| TwilioError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "Twilio rejected message");
            return Err(TwilioError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<MessageResponse>()
            .await
            .map_err(|e| TwilioError::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_client_from_config() {
        let client = TwilioClient::new(TwilioConfig {
            account_sid: "ACxxx".into(),
            auth_token: "secret".into(),
        });
        assert_eq!(client.config.account_sid, "ACxxx");
    }
}

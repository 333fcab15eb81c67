//! Selects the right adapter for a tenant and communication type.

use tracing::warn;

use crate::kernel::providers::email::{ResendAdapter, SendGridAdapter};
use crate::kernel::providers::sms::TwilioAdapter;
use crate::kernel::providers::Adapter;
use crate::kernel::tenant_config::TenantConfig;

/// Picks the SMS adapter for a tenant. There is only one SMS provider today,
/// so this always returns Twilio; the indirection exists so callers don't
/// need to know that.
pub fn sms_adapter(_config: &TenantConfig) -> Box<dyn Adapter> {
    Box::new(TwilioAdapter)
}

/// Picks the email adapter for a tenant.
///
/// Resolution order: explicit `email_provider` setting, then key presence
/// (`resend_key` before `sendgrid_key`), then SendGrid by default (for
/// backward compatibility) with a warning so a misconfigured tenant is
/// visible in the logs rather than silently failing every send.
pub fn email_adapter(config: &TenantConfig) -> Box<dyn Adapter> {
    match config.email_provider.as_deref() {
        Some("resend") => return Box::new(ResendAdapter::new()),
        Some("sendgrid") => return Box::new(SendGridAdapter::new()),
        Some(other) => warn!(provider = other, "unknown email_provider, falling back to key detection"),
        None => {}
    }

    if config.resend_key.is_some() {
        return Box::new(ResendAdapter::new());
    }
    if config.sendgrid_key.is_some() {
        return Box::new(SendGridAdapter::new());
    }

    warn!(
        tenant_id = %config.tenant_id,
        "no email provider configured, defaulting to sendgrid"
    );
    Box::new(SendGridAdapter::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> TenantConfig {
        TenantConfig {
            tenant_id: crate::common::TenantId::new(),
            sms_account_id: None,
            sms_auth_token: None,
            sms_from_number: None,
            email_provider: None,
            resend_key: None,
            sendgrid_key: None,
            email_from_address: None,
            quiet_hours_start: None,
            quiet_hours_end: None,
            company_name: "Acme".to_string(),
            company_phone: None,
            company_signature: None,
            external_api_base_url: None,
            dms_dsn: "postgres://example".to_string(),
        }
    }

    #[test]
    fn explicit_provider_wins() {
        let mut config = base_config();
        config.email_provider = Some("sendgrid".to_string());
        config.resend_key = Some("re_xxx".to_string());
        assert_eq!(email_adapter(&config).provider_name(), "sendgrid");
    }

    #[test]
    fn resend_key_detected_before_sendgrid() {
        let mut config = base_config();
        config.resend_key = Some("re_xxx".to_string());
        config.sendgrid_key = Some("sg_xxx".to_string());
        assert_eq!(email_adapter(&config).provider_name(), "resend");
    }

    #[test]
    fn sendgrid_key_detected_when_no_resend_key() {
        let mut config = base_config();
        config.sendgrid_key = Some("sg_xxx".to_string());
        assert_eq!(email_adapter(&config).provider_name(), "sendgrid");
    }

    #[test]
    fn defaults_to_sendgrid_when_unconfigured() {
        let config = base_config();
        assert_eq!(email_adapter(&config).provider_name(), "sendgrid");
    }
}

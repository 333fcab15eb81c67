//! Per-tenant configuration: SMS/email provider credentials, quiet hours,
//! company details, and the DMS connection string.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;

use crate::common::TenantId;
use crate::kernel::central_store::CentralStore;

#[derive(Debug, Error)]
pub enum TenantConfigError {
    #[error("tenant {0} is unknown")]
    TenantUnknown(TenantId),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Resolved configuration for a single tenant.
///
/// `quiet_hours_start`/`quiet_hours_end` are kept as raw `HH:MM` strings as
/// stored — parsing into minutes-since-midnight is the job of whoever applies
/// the quiet-hours rule, since the two representations serve different needs
/// (display vs. arithmetic).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TenantConfig {
    pub tenant_id: TenantId,

    pub sms_account_id: Option<String>,
    pub sms_auth_token: Option<String>,
    pub sms_from_number: Option<String>,

    pub email_provider: Option<String>,
    pub resend_key: Option<String>,
    pub sendgrid_key: Option<String>,
    pub email_from_address: Option<String>,

    pub quiet_hours_start: Option<String>,
    pub quiet_hours_end: Option<String>,

    pub company_name: String,
    pub company_phone: Option<String>,
    pub company_signature: Option<String>,

    pub external_api_base_url: Option<String>,
    pub dms_dsn: String,
}

/// Resolves and caches tenant configuration (C4).
#[derive(Clone, Default)]
pub struct TenantConfigStore {
    cache: DashMap<TenantId, TenantConfig>,
}

impl TenantConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(
        &self,
        store: &CentralStore,
        tenant_id: TenantId,
    ) -> Result<TenantConfig, TenantConfigError> {
        if let Some(config) = self.cache.get(&tenant_id) {
            return Ok(config.clone());
        }

        let config = sqlx::query_as::<_, TenantConfig>(
            r#"
            SELECT tenant_id, sms_account_id, sms_auth_token, sms_from_number,
                   email_provider, resend_key, sendgrid_key, email_from_address,
                   quiet_hours_start, quiet_hours_end,
                   company_name, company_phone, company_signature,
                   external_api_base_url, dms_dsn
            FROM tenant_config
            WHERE tenant_id = $1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(store.pool())
        .await?
        .ok_or(TenantConfigError::TenantUnknown(tenant_id))?;

        self.cache.insert(tenant_id, config.clone());
        Ok(config)
    }

    /// Drops any cached entry, forcing the next `get` to re-query. Useful
    /// after an operator edits a tenant's credentials.
    pub fn invalidate(&self, tenant_id: TenantId) {
        self.cache.remove(&tenant_id);
    }
}

use std::env;
use std::str::FromStr;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use tracing::warn;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Control-store connection string (tenants, tenant_config, message_templates).
    pub central_db_url: String,

    pub poll_interval_ms: u64,
    pub max_concurrent_jobs: usize,
    pub retry_delay_minutes: i64,
    pub max_retries: i32,
    pub health_port: u16,

    pub llm_api_key: Option<String>,
    pub llm_base_url: String,
    pub llm_model: String,

    pub ghost_customer_months: i64,
    pub warranty_warning_days: i64,
    pub trade_in_min_age_years: i64,
    pub trade_in_min_repair_count: i64,
    pub first_service_hours_threshold: f64,
    pub usage_service_hours_interval: f64,

    pub service_reminder_hour_utc: u32,
    pub invoice_reminder_hour_utc: u32,
    pub appointment_confirmation_interval_ms: u64,
    pub queue_processor_interval_ms: u64,
    pub daily_job_interval_ms: u64,
    pub weekly_job_interval_ms: u64,
    pub monthly_job_interval_ms: u64,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Reads `ENV_FILE` first to pick a non-default dotenv path (useful when
    /// running several tenants' worth of local config side by side); falls
    /// back to the default `.env` lookup otherwise.
    pub fn from_env() -> Result<Self> {
        match env::var("ENV_FILE") {
            Ok(path) => {
                if let Err(e) = dotenvy::from_filename(&path) {
                    warn!(path = %path, error = %e, "ENV_FILE set but could not be loaded");
                }
            }
            Err(_) => {
                let _ = dotenv();
            }
        }

        Ok(Self {
            central_db_url: env::var("CENTRAL_DB_URL").context("CENTRAL_DB_URL must be set")?,

            poll_interval_ms: env_num_or("POLL_INTERVAL_MS", 5_000),
            max_concurrent_jobs: env_num_or("MAX_CONCURRENT_JOBS", 5),
            retry_delay_minutes: env_num_or("RETRY_DELAY_MINUTES", 5),
            max_retries: env_num_or("MAX_RETRIES", 3),
            health_port: env_num_or("HEALTH_PORT", 8080),

            llm_api_key: env::var("LLM_API_KEY").ok(),
            llm_base_url: env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            llm_model: env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),

            ghost_customer_months: env_num_or("GHOST_CUSTOMER_MONTHS", 12),
            warranty_warning_days: env_num_or("WARRANTY_WARNING_DAYS", 30),
            trade_in_min_age_years: env_num_or("TRADE_IN_MIN_AGE_YEARS", 8),
            trade_in_min_repair_count: env_num_or("TRADE_IN_MIN_REPAIR_COUNT", 3),
            first_service_hours_threshold: env_num_or("FIRST_SERVICE_HOURS_THRESHOLD", 20.0),
            usage_service_hours_interval: env_num_or("USAGE_SERVICE_HOURS_INTERVAL", 100.0),

            service_reminder_hour_utc: env_num_or("SERVICE_REMINDER_HOUR_UTC", 9),
            invoice_reminder_hour_utc: env_num_or("INVOICE_REMINDER_HOUR_UTC", 9),
            appointment_confirmation_interval_ms: env_num_or(
                "APPOINTMENT_CONFIRMATION_INTERVAL_MS",
                3_600_000,
            ),
            queue_processor_interval_ms: env_num_or("QUEUE_PROCESSOR_INTERVAL_MS", 30_000),
            daily_job_interval_ms: env_num_or("DAILY_JOB_INTERVAL_MS", 86_400_000),
            weekly_job_interval_ms: env_num_or("WEEKLY_JOB_INTERVAL_MS", 604_800_000),
            monthly_job_interval_ms: env_num_or("MONTHLY_JOB_INTERVAL_MS", 2_592_000_000),
        })
    }
}

/// Parse a numeric env var, falling back to `default` (and logging a warning)
/// if it is unset or fails to parse. None of these settings are critical
/// enough to abort startup over a typo.
fn env_num_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, raw, "invalid numeric value, using default");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_num_or_falls_back_on_missing_var() {
        env::remove_var("SOME_UNSET_NUMERIC_VAR_XYZ");
        let v: u64 = env_num_or("SOME_UNSET_NUMERIC_VAR_XYZ", 42);
        assert_eq!(v, 42);
    }

    #[test]
    fn env_num_or_falls_back_on_invalid_value() {
        env::set_var("SOME_INVALID_NUMERIC_VAR_XYZ", "not-a-number");
        let v: u64 = env_num_or("SOME_INVALID_NUMERIC_VAR_XYZ", 7);
        assert_eq!(v, 7);
        env::remove_var("SOME_INVALID_NUMERIC_VAR_XYZ");
    }
}

//! Test harness with testcontainers for integration testing.
//!
//! Starts a single Postgres container, carves out two databases on it (the
//! control store and one tenant's operational database), and runs each
//! schema's migrations once. Containers are shared across the whole test
//! binary via `OnceCell` so every `#[tokio::test]` doesn't pay container
//! start-up cost.

use anyhow::{Context, Result};
use server_core::common::TenantId;
use server_core::kernel::central_store::CentralStore;
use sqlx::PgPool;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct SharedTestInfra {
    central_url: String,
    tenant_url: String,
    _postgres: ContainerAsync<Postgres>,
}

static SHARED_INFRA: OnceCell<SharedTestInfra> = OnceCell::const_new();

impl SharedTestInfra {
    async fn init() -> Result<Self> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let postgres = Postgres::default()
            .start()
            .await
            .context("failed to start postgres container")?;

        let host = postgres.get_host().await?;
        let port = postgres.get_host_port_ipv4(5432).await?;
        let admin_url = format!("postgresql://postgres:postgres@{host}:{port}/postgres");

        let admin_pool = PgPool::connect(&admin_url)
            .await
            .context("failed to connect to postgres for db setup")?;
        sqlx::query("CREATE DATABASE central_store")
            .execute(&admin_pool)
            .await
            .context("failed to create central_store database")?;
        sqlx::query("CREATE DATABASE tenant_fixture")
            .execute(&admin_pool)
            .await
            .context("failed to create tenant_fixture database")?;
        admin_pool.close().await;

        let central_url = format!("postgresql://postgres:postgres@{host}:{port}/central_store");
        let tenant_url = format!("postgresql://postgres:postgres@{host}:{port}/tenant_fixture");

        let central_pool = PgPool::connect(&central_url).await.context("connect central_store")?;
        sqlx::migrate!("./migrations").run(&central_pool).await.context("run central migrations")?;
        central_pool.close().await;

        let tenant_pool = PgPool::connect(&tenant_url).await.context("connect tenant_fixture")?;
        sqlx::migrate!("./migrations_tenant")
            .run(&tenant_pool)
            .await
            .context("run tenant migrations")?;
        tenant_pool.close().await;

        Ok(Self {
            central_url,
            tenant_url,
            _postgres: postgres,
        })
    }

    async fn get() -> &'static Self {
        SHARED_INFRA
            .get_or_init(|| async { Self::init().await.expect("failed to initialize test infrastructure") })
            .await
    }
}

/// Per-test handle onto the shared control store and a fixture tenant
/// operational database. Each test gets its own connection pools (so pool
/// exhaustion in one test can't starve another) against the same
/// already-migrated databases.
pub struct TestHarness {
    pub central: CentralStore,
    pub central_pool: PgPool,
    pub tenant_pool: PgPool,
    pub tenant_dsn: String,
}

impl TestHarness {
    pub async fn new() -> Result<Self> {
        let infra = SharedTestInfra::get().await;

        let central_pool = PgPool::connect(&infra.central_url).await.context("connect central_store")?;
        let tenant_pool = PgPool::connect(&infra.tenant_url).await.context("connect tenant_fixture")?;
        let central = CentralStore::connect(&infra.central_url).await.context("CentralStore::connect")?;

        Ok(Self {
            central,
            central_pool,
            tenant_pool,
            tenant_dsn: infra.tenant_url.clone(),
        })
    }

    /// Inserts a tenant row plus a matching `tenant_config` row pointed at
    /// the shared fixture operational database, and returns the new id.
    pub async fn insert_tenant(&self, company_name: &str) -> Result<TenantId> {
        self.insert_tenant_with(company_name, Some("test_resend_key"), Some("notifications@example.com"))
            .await
    }

    /// Same as [`Self::insert_tenant`] but with the resend key / from
    /// address left configurable, so tests can exercise the
    /// missing-credentials path without a real provider call.
    pub async fn insert_tenant_with(
        &self,
        company_name: &str,
        resend_key: Option<&str>,
        email_from_address: Option<&str>,
    ) -> Result<TenantId> {
        let tenant_id = TenantId::new();

        sqlx::query("INSERT INTO tenants (id, name, is_active) VALUES ($1, $2, TRUE)")
            .bind(tenant_id)
            .bind(company_name)
            .execute(&self.central_pool)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO tenant_config
                (tenant_id, sms_account_id, sms_auth_token, sms_from_number,
                 email_provider, resend_key, sendgrid_key, email_from_address,
                 quiet_hours_start, quiet_hours_end,
                 company_name, company_phone, company_signature,
                 external_api_base_url, dms_dsn)
            VALUES ($1, NULL, NULL, NULL, 'resend', $2, NULL, $3,
                    '21:00', '07:00', $4, NULL, NULL, NULL, $5)
            "#,
        )
        .bind(tenant_id)
        .bind(resend_key)
        .bind(email_from_address)
        .bind(company_name)
        .bind(&self.tenant_dsn)
        .execute(&self.central_pool)
        .await?;

        Ok(tenant_id)
    }

    /// Inserts a global (tenant-agnostic) template for `event_type` /
    /// `communication_type`.
    pub async fn insert_global_template(
        &self,
        event_type: &str,
        communication_type: &str,
        subject_template: Option<&str>,
        body_text_template: &str,
        ai_enhance: bool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO message_templates
                (tenant_id, event_type, communication_type, subject_template,
                 body_text_template, body_html_template, variables, ai_enhance,
                 ai_instructions, is_active, version)
            VALUES (NULL, $1, $2, $3, $4, NULL, '{}'::jsonb, $5, NULL, TRUE, 1)
            "#,
        )
        .bind(event_type)
        .bind(communication_type)
        .bind(subject_template)
        .bind(body_text_template)
        .bind(ai_enhance)
        .execute(&self.central_pool)
        .await?;
        Ok(())
    }

    /// Inserts a customer fixture row into the tenant operational database.
    pub async fn insert_customer(
        &self,
        id: &str,
        email: Option<&str>,
        phone_mobile: Option<&str>,
        contact_preference: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO customers (id, first_name, email, phone_mobile, contact_preference, total_orders)
            VALUES ($1, $1, $2, $3, $4, 0)
            "#,
        )
        .bind(id)
        .bind(email)
        .bind(phone_mobile)
        .bind(contact_preference)
        .execute(&self.tenant_pool)
        .await?;
        Ok(())
    }
}

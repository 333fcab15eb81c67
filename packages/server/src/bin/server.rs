//! Process entrypoint: loads configuration, wires up the kernel, and runs
//! the HTTP server, job processor, and scheduler side by side until a
//! shutdown signal arrives.

use std::sync::Arc;

use anyhow::{Context, Result};
use server_core::kernel::ai::AiGenerator;
use server_core::kernel::central_store::CentralStore;
use server_core::kernel::jobs::{self, HandlerContext, ProcessorConfig};
use server_core::kernel::scheduler::{self, SchedulerConfig, SchedulerContext};
use server_core::kernel::tenant_config::TenantConfigStore;
use server_core::kernel::tenant_store::TenantStore;
use server_core::kernel::templates::TemplateStore;
use server_core::server::app::{build_router, AppState, Metrics};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,server_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting communication engine");

    let config = server_core::Config::from_env().context("failed to load configuration")?;
    tracing::info!(
        max_concurrent_jobs = config.max_concurrent_jobs,
        max_retries = config.max_retries,
        "configuration loaded"
    );

    let central = CentralStore::connect(&config.central_db_url)
        .await
        .context("failed to connect to central store")?;

    let ai = match &config.llm_api_key {
        Some(key) => AiGenerator::new(
            Some(llm_client::LlmClient::new(key.clone(), config.llm_base_url.clone())),
            config.llm_model.clone(),
        ),
        None => {
            tracing::warn!("LLM_API_KEY not set, AI content enhancement disabled");
            AiGenerator::disabled()
        }
    };

    let handler_ctx = HandlerContext {
        central: central.clone(),
        tenant_store: TenantStore::new(),
        tenant_config: TenantConfigStore::new(),
        templates: TemplateStore::new(),
        ai,
        http: reqwest::Client::new(),
    };

    let shutdown = CancellationToken::new();

    let processor_config = ProcessorConfig {
        poll_interval: std::time::Duration::from_millis(config.poll_interval_ms),
        max_concurrent_jobs: config.max_concurrent_jobs,
        retry_delay: chrono::Duration::minutes(config.retry_delay_minutes),
        max_retries: config.max_retries,
    };

    let job_processor = tokio::spawn(jobs::run_processor(
        handler_ctx.clone(),
        processor_config,
        shutdown.clone(),
    ));

    let scheduler_ctx = SchedulerContext {
        central: central.clone(),
        tenant_store: handler_ctx.tenant_store.clone(),
        tenant_config: handler_ctx.tenant_config.clone(),
    };
    let scheduler_config = SchedulerConfig {
        daily_interval: std::time::Duration::from_millis(config.daily_job_interval_ms),
        weekly_interval: std::time::Duration::from_millis(config.weekly_job_interval_ms),
        monthly_interval: std::time::Duration::from_millis(config.monthly_job_interval_ms),
        appointment_confirmation_interval: std::time::Duration::from_millis(
            config.appointment_confirmation_interval_ms,
        ),
        queue_dispatch_interval: std::time::Duration::from_millis(config.queue_processor_interval_ms),
        service_reminder_hour_utc: config.service_reminder_hour_utc,
        invoice_reminder_hour_utc: config.invoice_reminder_hour_utc,
        ghost_customer_months: config.ghost_customer_months,
        warranty_warning_days: config.warranty_warning_days,
        trade_in_min_age_years: config.trade_in_min_age_years,
        trade_in_min_repair_count: config.trade_in_min_repair_count,
        first_service_hours_threshold: config.first_service_hours_threshold,
        usage_service_hours_interval: config.usage_service_hours_interval,
    };
    let scheduler_task = tokio::spawn(scheduler::run(scheduler_ctx, scheduler_config, shutdown.clone()));

    let app_state = AppState {
        central: central.clone(),
        metrics: Arc::new(Metrics::default()),
    };
    let app = build_router(app_state);
    let addr = format!("0.0.0.0:{}", config.health_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("failed to bind health port")?;
    tracing::info!(addr = %addr, "health server listening");

    let server_shutdown = shutdown.clone();
    let http_server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
    });

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, draining in-flight work");
    shutdown.cancel();

    let _ = tokio::join!(job_processor, scheduler_task, http_server);
    central.close().await;
    handler_ctx.tenant_store.close_all().await;

    tracing::info!("shutdown complete");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

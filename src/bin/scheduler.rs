use std::sync::Arc;

use anyhow::{Context, Result};
use time::OffsetDateTime;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

use flowmill::config::Config;
use flowmill::db::balance_repository::BalanceRepository;
use flowmill::db::postgres_balance_repository::PostgresBalanceRepository;
use flowmill::db::postgres_user_repository::PostgresUserRepository;
use flowmill::db::postgres_workflow_repository::PostgresWorkflowRepository;
use flowmill::db::user_repository::UserRepository;
use flowmill::db::workflow_repository::WorkflowRepository;
use flowmill::db;
use flowmill::engine::ExecutorServices;
use flowmill::queue::{SqsWorkQueue, WorkQueue};
use flowmill::scheduler::run_tick;
use flowmill::services::browser::NoBrowserFactory;
use flowmill::services::llm::OpenAiClient;
use flowmill::services::mailer::SmtpMailer;
use flowmill::services::secrets::{NoExternalSecretStore, SecretResolver};
use flowmill::services::sms::TwilioSmsClient;
use flowmill::state::AppState;

/// One tick per process run: scan due workflows, enqueue, advance
/// schedules, reap guests on cleanup ticks, then dispose the pool so no
/// connection outlives the process.
#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env()?);
    let pool = db::connect_tick_pool(&config)
        .await
        .context("failed to connect to database")?;

    let workflows: Arc<dyn WorkflowRepository> = Arc::new(PostgresWorkflowRepository {
        pool: pool.clone(),
    });
    let users: Arc<dyn UserRepository> = Arc::new(PostgresUserRepository { pool: pool.clone() });
    let ledger: Arc<dyn BalanceRepository> =
        Arc::new(PostgresBalanceRepository { pool: pool.clone() });

    let queue: Arc<dyn WorkQueue> = Arc::new(
        SqsWorkQueue::connect(
            config.workflow_queue_url.clone(),
            config.queue_endpoint_url.clone(),
        )
        .await,
    );

    let secrets = Arc::new(SecretResolver::new(
        users.clone(),
        Arc::new(NoExternalSecretStore),
        config.secret_encryption_key.clone(),
    ));
    let services = Arc::new(ExecutorServices {
        secrets,
        browser_factory: Arc::new(NoBrowserFactory),
        llm: Arc::new(OpenAiClient::new(config.openai_api_base.clone())),
        mailer: Arc::new(SmtpMailer),
        sms: Arc::new(TwilioSmsClient::new(config.sms_api_base.clone())),
        http: Arc::new(reqwest::Client::new()),
        browser_headless: config.browser_headless,
        llm_model: config.openai_model.clone(),
    });

    let state = AppState {
        workflows,
        users,
        ledger,
        queue,
        services,
        config,
    };

    let summary = run_tick(&state, OffsetDateTime::now_utc())
        .await
        .context("scheduler tick failed")?;
    info!(
        scheduled = summary.scheduled,
        cleanup_ran = summary.cleanup_ran,
        reaped_guests = summary.reaped_guests,
        reaped_sessions = summary.reaped_sessions,
        "scheduler tick complete"
    );

    // Short-lived process: release every pooled connection before exit.
    pool.close().await;
    Ok(())
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
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
use flowmill::services::browser::NoBrowserFactory;
use flowmill::services::llm::OpenAiClient;
use flowmill::services::mailer::SmtpMailer;
use flowmill::services::secrets::{NoExternalSecretStore, SecretResolver};
use flowmill::services::sms::TwilioSmsClient;
use flowmill::state::AppState;
use flowmill::worker::{poll_queue, process_one_shot};

fn init_tracing() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn spawn_signal_listener(shutdown: Arc<AtomicBool>) {
    tokio::spawn(async move {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received SIGINT, initiating graceful shutdown"),
            _ = sigterm.recv() => info!("received SIGTERM, initiating graceful shutdown"),
        }
        shutdown.store(true, Ordering::SeqCst);
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Arc::new(Config::from_env()?);
    let pool = db::connect_pool(&config)
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
        config: config.clone(),
    };

    if config.polling_mode {
        info!("starting worker in polling mode");
        let shutdown = Arc::new(AtomicBool::new(false));
        spawn_signal_listener(shutdown.clone());
        poll_queue(&state, &shutdown).await;
    } else {
        info!("starting worker in one-shot mode");
        let ok = process_one_shot(&state).await;
        if config.exit_after_completion {
            info!("exiting after completion");
        }
        if !ok {
            // Non-zero exit tells the host to redeliver.
            std::process::exit(1);
        }
    }

    Ok(())
}

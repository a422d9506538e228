pub mod balance_repository;
pub mod postgres_balance_repository;
pub mod postgres_user_repository;
pub mod postgres_workflow_repository;
pub mod user_repository;
pub mod workflow_repository;

use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::PgPool;

use crate::config::Config;

fn connect_options(config: &Config) -> PgConnectOptions {
    let ssl_mode = if config.db_use_ssl {
        match config.db_ssl_mode.as_str() {
            "disable" => PgSslMode::Disable,
            _ => PgSslMode::Require,
        }
    } else {
        PgSslMode::Disable
    };

    let mut options = PgConnectOptions::new()
        .host(&config.db_host)
        .port(config.db_port)
        .username(&config.db_user)
        .password(&config.db_password)
        .database(&config.db_name)
        .ssl_mode(ssl_mode);

    // Transaction-mode poolers reject prepared-statement caches.
    if config.db_disable_statement_cache {
        options = options.statement_cache_capacity(0);
    }

    options
}

/// Shared pool for long-lived worker processes.
pub async fn connect_pool(config: &Config) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .test_before_acquire(true)
        .connect_with(connect_options(config))
        .await
}

/// Single-connection pool for short-lived tick processes. The caller closes
/// it explicitly once the tick completes so no connection outlives the run.
pub async fn connect_tick_pool(config: &Config) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(connect_options(config))
        .await
}

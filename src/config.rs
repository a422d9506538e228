use std::env;

use anyhow::{Context, Result};

use crate::utils::encryption::decode_key;

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

pub struct Config {
    pub db_user: String,
    pub db_password: String,
    pub db_host: String,
    pub db_port: u16,
    pub db_name: String,
    pub db_use_ssl: bool,
    pub db_ssl_mode: String,
    pub db_max_connections: u32,
    pub db_disable_statement_cache: bool,

    pub workflow_queue_url: String,
    pub queue_endpoint_url: Option<String>,
    pub visibility_timeout: i32,

    pub polling_mode: bool,
    pub max_poll_messages: i32,
    pub poll_wait_time: i32,
    pub exit_after_completion: bool,

    pub browser_headless: bool,
    pub openai_api_base: String,
    pub openai_model: String,
    pub sms_api_base: String,

    pub secret_encryption_key: Vec<u8>,

    pub scheduler_interval_minutes: i64,
    pub guest_cleanup_interval_minutes: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let secret_encryption_key = {
            let raw = env::var("SECRET_ENCRYPTION_KEY")
                .context("SECRET_ENCRYPTION_KEY must be set (base64, 32 bytes)")?;
            decode_key(&raw).context("SECRET_ENCRYPTION_KEY is not a valid base64 32-byte key")?
        };

        Ok(Config {
            db_user: env_or("DB_USER", "postgres"),
            db_password: env_or("DB_PASSWORD", "postgres"),
            db_host: env_or("DB_HOST", "localhost"),
            db_port: env_parse("DB_PORT", 5432),
            db_name: env_or("DB_NAME", "flowmill"),
            db_use_ssl: env_bool("DB_USE_SSL", true),
            db_ssl_mode: env_or("DB_SSL_MODE", "require"),
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", 5),
            db_disable_statement_cache: env_bool("DB_DISABLE_STATEMENT_CACHE", false),

            workflow_queue_url: env::var("WORKFLOW_QUEUE_URL")
                .context("WORKFLOW_QUEUE_URL must be set")?,
            queue_endpoint_url: env::var("QUEUE_ENDPOINT_URL").ok(),
            visibility_timeout: env_parse("QUEUE_VISIBILITY_TIMEOUT", 120),

            polling_mode: env_bool("POLLING_MODE", false),
            max_poll_messages: env_parse("MAX_POLL_MESSAGES", 5),
            poll_wait_time: env_parse("POLL_WAIT_TIME", 20),
            exit_after_completion: env_bool("EXIT_AFTER_COMPLETION", false),

            browser_headless: env_bool("BROWSER_HEADLESS", true),
            openai_api_base: env_or("OPENAI_API_BASE", "https://api.openai.com/v1"),
            openai_model: env_or("OPENAI_MODEL", "gpt-4o-mini"),
            sms_api_base: env_or("SMS_API_BASE", "https://api.twilio.com"),

            secret_encryption_key,

            scheduler_interval_minutes: env_parse("SCHEDULER_INTERVAL_MINUTES", 5),
            guest_cleanup_interval_minutes: env_parse("GUEST_CLEANUP_INTERVAL_MINUTES", 60),
        })
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Config {
            db_user: "postgres".into(),
            db_password: "postgres".into(),
            db_host: "localhost".into(),
            db_port: 5432,
            db_name: "flowmill_test".into(),
            db_use_ssl: false,
            db_ssl_mode: "disable".into(),
            db_max_connections: 2,
            db_disable_statement_cache: false,
            workflow_queue_url: "http://localhost:4566/000000000000/flowmill-queue".into(),
            queue_endpoint_url: Some("http://localhost:4566".into()),
            visibility_timeout: 120,
            polling_mode: true,
            max_poll_messages: 5,
            poll_wait_time: 1,
            exit_after_completion: false,
            browser_headless: true,
            openai_api_base: "https://api.openai.com/v1".into(),
            openai_model: "gpt-4o-mini".into(),
            sms_api_base: "https://api.twilio.com".into(),
            secret_encryption_key: vec![0u8; 32],
            scheduler_interval_minutes: 5,
            guest_cleanup_interval_minutes: 60,
        }
    }
}

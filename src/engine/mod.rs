pub mod environment;
pub mod graph;
pub mod nodes;
pub mod runner;

use std::sync::Arc;

use crate::db::balance_repository::LedgerError;
use crate::services::browser::{BrowserError, BrowserFactory};
use crate::services::llm::{LlmClient, LlmError};
use crate::services::mailer::{MailError, Mailer};
use crate::services::secrets::{SecretError, SecretResolver};
use crate::services::sms::{SmsClient, SmsError};

pub use runner::WorkflowRunner;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("node type '{0}' is not registered")]
    NodeTypeUnknown(String),
    #[error("output '{handle}' of node '{node_source}' is not available")]
    UnresolvedInput { node_source: String, handle: String },
    #[error("missing required input '{input}' for node '{node}'")]
    MissingInput { node: String, input: String },
    #[error("insufficient credits")]
    InsufficientCredits,
    #[error("workflow has no active version")]
    MissingActiveVersion,
    #[error("execution plan is malformed: {0}")]
    MalformedPlan(String),
    #[error("{0}")]
    Executor(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<LedgerError> for EngineError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientCredits => EngineError::InsufficientCredits,
            LedgerError::BalanceNotFound => {
                EngineError::Executor("user balance not found".to_string())
            }
            LedgerError::Database(e) => EngineError::Database(e),
        }
    }
}

impl From<BrowserError> for EngineError {
    fn from(err: BrowserError) -> Self {
        EngineError::Executor(err.to_string())
    }
}

impl From<SecretError> for EngineError {
    fn from(err: SecretError) -> Self {
        EngineError::Executor(err.to_string())
    }
}

impl From<LlmError> for EngineError {
    fn from(err: LlmError) -> Self {
        EngineError::Executor(err.to_string())
    }
}

impl From<MailError> for EngineError {
    fn from(err: MailError) -> Self {
        EngineError::Executor(err.to_string())
    }
}

impl From<SmsError> for EngineError {
    fn from(err: SmsError) -> Self {
        EngineError::Executor(err.to_string())
    }
}

/// Collaborators handed to node executors. Built once per process and shared
/// read-only across executions.
pub struct ExecutorServices {
    pub secrets: Arc<SecretResolver>,
    pub browser_factory: Arc<dyn BrowserFactory>,
    pub llm: Arc<dyn LlmClient>,
    pub mailer: Arc<dyn Mailer>,
    pub sms: Arc<dyn SmsClient>,
    pub http: Arc<reqwest::Client>,
    pub browser_headless: bool,
    pub llm_model: String,
}

use std::sync::Arc;

use crate::config::Config;
use crate::db::balance_repository::BalanceRepository;
use crate::db::user_repository::UserRepository;
use crate::db::workflow_repository::WorkflowRepository;
use crate::engine::ExecutorServices;
use crate::queue::WorkQueue;

/// Process-wide shared state: repositories, the queue client and the
/// executor collaborators. Built once at startup, cloned freely.
#[derive(Clone)]
pub struct AppState {
    pub workflows: Arc<dyn WorkflowRepository>,
    pub users: Arc<dyn UserRepository>,
    pub ledger: Arc<dyn BalanceRepository>,
    pub queue: Arc<dyn WorkQueue>,
    pub services: Arc<ExecutorServices>,
    pub config: Arc<Config>,
}

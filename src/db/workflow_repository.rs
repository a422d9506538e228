use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::execution::{ExecutionTrigger, ExecutionUpdate, WorkflowExecution};
use crate::models::execution_log::NewExecutionLog;
use crate::models::execution_phase::{ExecutionPhase, ExecutionPhaseUpdate};
use crate::models::workflow::{Workflow, WorkflowRunPatch};
use crate::models::workflow_version::WorkflowVersion;

/// Typed access to workflows, versions, executions, phases and logs. The
/// scheduler and worker only ever touch rows through this trait; tests mock
/// it wholesale.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn find_workflow_by_id_and_user(
        &self,
        workflow_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Workflow>, sqlx::Error>;

    /// Published workflows whose `next_run_at` has arrived.
    async fn get_due_workflows(&self, now: OffsetDateTime) -> Result<Vec<Workflow>, sqlx::Error>;

    async fn apply_run_patch(
        &self,
        workflow_id: Uuid,
        patch: WorkflowRunPatch,
    ) -> Result<(), sqlx::Error>;

    async fn find_active_version(
        &self,
        workflow_id: Uuid,
    ) -> Result<Option<WorkflowVersion>, sqlx::Error>;

    async fn create_execution(
        &self,
        workflow_id: Uuid,
        user_id: Uuid,
        trigger: ExecutionTrigger,
    ) -> Result<WorkflowExecution, sqlx::Error>;

    async fn find_execution_by_id_and_user(
        &self,
        execution_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<WorkflowExecution>, sqlx::Error>;

    async fn update_execution(
        &self,
        execution_id: Uuid,
        update: ExecutionUpdate,
    ) -> Result<(), sqlx::Error>;

    async fn create_phase(
        &self,
        execution_id: Uuid,
        user_id: Uuid,
        number: i32,
        name: &str,
        inputs: Value,
    ) -> Result<ExecutionPhase, sqlx::Error>;

    async fn update_phase(
        &self,
        phase_id: Uuid,
        update: ExecutionPhaseUpdate,
    ) -> Result<(), sqlx::Error>;

    async fn insert_log(&self, log: NewExecutionLog) -> Result<(), sqlx::Error>;
}

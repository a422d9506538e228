use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::workflow_repository::WorkflowRepository;
use crate::models::execution::{ExecutionTrigger, ExecutionUpdate, WorkflowExecution};
use crate::models::execution_log::NewExecutionLog;
use crate::models::execution_phase::{ExecutionPhase, ExecutionPhaseUpdate};
use crate::models::workflow::{Workflow, WorkflowRunPatch};
use crate::models::workflow_version::WorkflowVersion;

const WORKFLOW_COLUMNS: &str = "id, user_id, name, status, cron, credits_cost, \
     active_version_id, last_run_id, last_run_status, last_run_at, next_run_at, \
     created_at, updated_at";

const EXECUTION_COLUMNS: &str =
    "id, workflow_id, user_id, trigger, status, created_at, started_at, completed_at, \
     credits_consumed";

const PHASE_COLUMNS: &str =
    "id, workflow_execution_id, user_id, number, name, status, started_at, completed_at, \
     node, inputs, outputs, credits_consumed";

pub struct PostgresWorkflowRepository {
    pub pool: PgPool,
}

#[async_trait]
impl WorkflowRepository for PostgresWorkflowRepository {
    async fn find_workflow_by_id_and_user(
        &self,
        workflow_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Workflow>, sqlx::Error> {
        let result = sqlx::query_as::<_, Workflow>(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = $1 AND user_id = $2"
        ))
        .bind(workflow_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }

    async fn get_due_workflows(&self, now: OffsetDateTime) -> Result<Vec<Workflow>, sqlx::Error> {
        let results = sqlx::query_as::<_, Workflow>(&format!(
            r#"
            SELECT {WORKFLOW_COLUMNS}
            FROM workflows
            WHERE status = 'PUBLISHED'
              AND next_run_at IS NOT NULL
              AND next_run_at <= $1
            ORDER BY next_run_at ASC
            "#
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(results)
    }

    async fn apply_run_patch(
        &self,
        workflow_id: Uuid,
        patch: WorkflowRunPatch,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE workflows
            SET last_run_id = COALESCE($2, last_run_id),
                last_run_status = COALESCE($3, last_run_status),
                last_run_at = COALESCE($4, last_run_at),
                next_run_at = CASE WHEN $5 THEN $6 ELSE next_run_at END,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(workflow_id)
        .bind(patch.last_run_id)
        .bind(patch.last_run_status)
        .bind(patch.last_run_at)
        .bind(patch.set_next_run_at)
        .bind(patch.next_run_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_active_version(
        &self,
        workflow_id: Uuid,
    ) -> Result<Option<WorkflowVersion>, sqlx::Error> {
        let result = sqlx::query_as::<_, WorkflowVersion>(
            r#"
            SELECT id, workflow_id, version_number, definition, execution_plan,
                   is_active, parent_version_id, created_by, created_at
            FROM workflow_versions
            WHERE workflow_id = $1 AND is_active = true
            "#,
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }

    async fn create_execution(
        &self,
        workflow_id: Uuid,
        user_id: Uuid,
        trigger: ExecutionTrigger,
    ) -> Result<WorkflowExecution, sqlx::Error> {
        let result = sqlx::query_as::<_, WorkflowExecution>(&format!(
            r#"
            INSERT INTO workflow_executions (workflow_id, user_id, trigger, status, created_at)
            VALUES ($1, $2, $3, 'PENDING', now())
            RETURNING {EXECUTION_COLUMNS}
            "#
        ))
        .bind(workflow_id)
        .bind(user_id)
        .bind(trigger)
        .fetch_one(&self.pool)
        .await?;

        Ok(result)
    }

    async fn find_execution_by_id_and_user(
        &self,
        execution_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<WorkflowExecution>, sqlx::Error> {
        let result = sqlx::query_as::<_, WorkflowExecution>(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM workflow_executions WHERE id = $1 AND user_id = $2"
        ))
        .bind(execution_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }

    async fn update_execution(
        &self,
        execution_id: Uuid,
        update: ExecutionUpdate,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE workflow_executions
            SET status = COALESCE($2, status),
                started_at = COALESCE($3, started_at),
                completed_at = COALESCE($4, completed_at),
                credits_consumed = COALESCE($5, credits_consumed)
            WHERE id = $1
            "#,
        )
        .bind(execution_id)
        .bind(update.status)
        .bind(update.started_at)
        .bind(update.completed_at)
        .bind(update.credits_consumed)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn create_phase(
        &self,
        execution_id: Uuid,
        user_id: Uuid,
        number: i32,
        name: &str,
        inputs: Value,
    ) -> Result<ExecutionPhase, sqlx::Error> {
        let result = sqlx::query_as::<_, ExecutionPhase>(&format!(
            r#"
            INSERT INTO execution_phases
                (workflow_execution_id, user_id, number, name, status, inputs)
            VALUES ($1, $2, $3, $4, 'PENDING', $5)
            RETURNING {PHASE_COLUMNS}
            "#
        ))
        .bind(execution_id)
        .bind(user_id)
        .bind(number)
        .bind(name)
        .bind(inputs)
        .fetch_one(&self.pool)
        .await?;

        Ok(result)
    }

    async fn update_phase(
        &self,
        phase_id: Uuid,
        update: ExecutionPhaseUpdate,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE execution_phases
            SET status = COALESCE($2, status),
                started_at = COALESCE($3, started_at),
                completed_at = COALESCE($4, completed_at),
                node = COALESCE($5, node),
                outputs = COALESCE($6, outputs),
                credits_consumed = COALESCE($7, credits_consumed)
            WHERE id = $1
            "#,
        )
        .bind(phase_id)
        .bind(update.status)
        .bind(update.started_at)
        .bind(update.completed_at)
        .bind(update.node)
        .bind(update.outputs)
        .bind(update.credits_consumed)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_log(&self, log: NewExecutionLog) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO execution_logs (execution_phase_id, log_level, message, "timestamp")
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(log.execution_phase_id)
        .bind(log.log_level)
        .bind(log.message)
        .bind(log.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::balance_repository::BalanceRepository;
use crate::db::workflow_repository::WorkflowRepository;
use crate::models::execution::{ExecutionStatus, ExecutionUpdate, WorkflowExecution};
use crate::models::execution_log::{LogLevel, NewExecutionLog};
use crate::models::execution_phase::{ExecutionPhaseStatus, ExecutionPhaseUpdate};
use crate::models::workflow::Workflow;

use super::environment::{Environment, NodeSnapshot};
use super::graph::{parse_execution_plan, EdgeDefinition, NodeDefinition, PhaseBlock, WorkflowDefinition};
use super::nodes::{executor_for, NodeType, WEB_PAGE_HANDLE};
use super::{EngineError, ExecutorServices};

/// Builds a node's effective inputs: authored literals overlaid with values
/// wired in from upstream outputs. Pure with respect to its arguments. The
/// browser-page handle marks a dependency without carrying a value.
pub fn assemble_inputs(
    node_id: &str,
    literal_inputs: &Map<String, Value>,
    edges: &[EdgeDefinition],
    resources: &HashMap<String, Map<String, Value>>,
) -> Result<Map<String, Value>, EngineError> {
    let mut inputs = literal_inputs.clone();

    for edge in edges.iter().filter(|e| e.target == node_id) {
        if edge.source_handle == WEB_PAGE_HANDLE {
            continue;
        }
        let outputs = resources
            .get(&edge.source)
            .ok_or_else(|| EngineError::UnresolvedInput {
                node_source: edge.source.clone(),
                handle: edge.source_handle.clone(),
            })?;
        let value = outputs
            .get(&edge.source_handle)
            .ok_or_else(|| EngineError::UnresolvedInput {
                node_source: edge.source.clone(),
                handle: edge.source_handle.clone(),
            })?;
        inputs.insert(edge.target_handle.clone(), value.clone());
    }

    Ok(inputs)
}

enum RunOutcome {
    Completed,
    Canceled,
}

/// Executes one run of a workflow: walks the active version's phase blocks
/// in order, wiring inputs, debiting credits and persisting phase state as
/// it goes. Node failures turn into a FAILED execution; persistence errors
/// propagate so the queue can redeliver.
pub struct WorkflowRunner {
    workflows: Arc<dyn WorkflowRepository>,
    ledger: Arc<dyn BalanceRepository>,
    services: Arc<ExecutorServices>,
}

impl WorkflowRunner {
    pub fn new(
        workflows: Arc<dyn WorkflowRepository>,
        ledger: Arc<dyn BalanceRepository>,
        services: Arc<ExecutorServices>,
    ) -> Self {
        WorkflowRunner {
            workflows,
            ledger,
            services,
        }
    }

    pub async fn run_workflow(
        &self,
        workflow: &Workflow,
        execution: &WorkflowExecution,
    ) -> Result<ExecutionStatus, EngineError> {
        // Redelivered messages for finished executions are no-ops.
        if execution.status.is_terminal() {
            info!(
                execution_id = %execution.id,
                status = %execution.status,
                "execution already terminal; skipping redelivered message"
            );
            return Ok(execution.status);
        }

        // RUNNING on entry means a worker crashed mid-run and the queue
        // redelivered. Nodes are not re-run and credits are not re-debited.
        if execution.status == ExecutionStatus::Running {
            return self.fail_crashed_redelivery(execution).await;
        }

        self.workflows
            .update_execution(
                execution.id,
                ExecutionUpdate {
                    status: Some(ExecutionStatus::Running),
                    started_at: Some(OffsetDateTime::now_utc()),
                    ..Default::default()
                },
            )
            .await?;

        let Some(version) = self.workflows.find_active_version(workflow.id).await? else {
            warn!(workflow_id = %workflow.id, "workflow has no active version");
            self.finish(execution.id, ExecutionStatus::Failed, 0).await?;
            return Ok(ExecutionStatus::Failed);
        };

        let definition = match WorkflowDefinition::from_value(&version.definition) {
            Ok(definition) => definition,
            Err(err) => {
                warn!(workflow_id = %workflow.id, error = %err, "unusable workflow definition");
                self.finish(execution.id, ExecutionStatus::Failed, 0).await?;
                return Ok(ExecutionStatus::Failed);
            }
        };
        let blocks = match parse_execution_plan(&version.execution_plan) {
            Ok(blocks) => blocks,
            Err(err) => {
                warn!(workflow_id = %workflow.id, error = %err, "unusable execution plan");
                self.finish(execution.id, ExecutionStatus::Failed, 0).await?;
                return Ok(ExecutionStatus::Failed);
            }
        };

        let mut env = Environment::new();
        let mut credits_spent = 0i32;
        let result = self
            .execute_plan(
                execution,
                &blocks,
                &definition.edges,
                &mut env,
                &mut credits_spent,
            )
            .await;
        env.cleanup().await;

        match result {
            Ok(RunOutcome::Completed) => {
                self.finish(execution.id, ExecutionStatus::Completed, credits_spent)
                    .await?;
                Ok(ExecutionStatus::Completed)
            }
            Ok(RunOutcome::Canceled) => {
                // Status was already set by the cancelling caller; record
                // what the run consumed before stopping.
                self.workflows
                    .update_execution(
                        execution.id,
                        ExecutionUpdate {
                            completed_at: Some(OffsetDateTime::now_utc()),
                            credits_consumed: Some(credits_spent),
                            ..Default::default()
                        },
                    )
                    .await?;
                Ok(ExecutionStatus::Canceled)
            }
            Err(EngineError::Database(e)) => Err(EngineError::Database(e)),
            Err(err) => {
                info!(
                    execution_id = %execution.id,
                    error = %err,
                    "workflow execution failed"
                );
                self.finish(execution.id, ExecutionStatus::Failed, credits_spent)
                    .await?;
                Ok(ExecutionStatus::Failed)
            }
        }
    }

    async fn execute_plan(
        &self,
        execution: &WorkflowExecution,
        blocks: &[PhaseBlock],
        edges: &[EdgeDefinition],
        env: &mut Environment,
        credits_spent: &mut i32,
    ) -> Result<RunOutcome, EngineError> {
        for block in blocks {
            // Cancellation is honored between phase blocks, never mid-node.
            if let Some(current) = self
                .workflows
                .find_execution_by_id_and_user(execution.id, execution.user_id)
                .await?
            {
                if current.status == ExecutionStatus::Canceled {
                    info!(execution_id = %execution.id, "execution canceled; stopping between phases");
                    return Ok(RunOutcome::Canceled);
                }
            }

            if block.nodes.is_empty() {
                warn!(phase = block.phase, "phase block has no nodes");
                continue;
            }

            for node_def in &block.nodes {
                self.run_node(execution, block.phase, node_def, edges, env, credits_spent)
                    .await?;
            }
        }
        Ok(RunOutcome::Completed)
    }

    async fn run_node(
        &self,
        execution: &WorkflowExecution,
        phase_number: i32,
        node_def: &NodeDefinition,
        edges: &[EdgeDefinition],
        env: &mut Environment,
        credits_spent: &mut i32,
    ) -> Result<(), EngineError> {
        let node_type_str = node_def.data.node_type.as_str();

        let inputs =
            match assemble_inputs(&node_def.id, &node_def.data.inputs, edges, &env.resources) {
                Ok(inputs) => inputs,
                Err(err) => {
                    // Persist the failure against a phase carrying the
                    // literal inputs so the UI has something to show.
                    let phase = self
                        .workflows
                        .create_phase(
                            execution.id,
                            execution.user_id,
                            phase_number,
                            node_type_str,
                            Value::Object(node_def.data.inputs.clone()),
                        )
                        .await?;
                    env.create_phase(phase.id, node_type_str);
                    env.add_log(phase.id, LogLevel::Error, err.to_string());
                    self.fail_phase(phase.id, env, 0).await?;
                    return Err(err);
                }
            };

        let phase = self
            .workflows
            .create_phase(
                execution.id,
                execution.user_id,
                phase_number,
                node_type_str,
                Value::Object(inputs.clone()),
            )
            .await?;
        env.create_phase(phase.id, node_type_str);

        let started_at = OffsetDateTime::now_utc();
        self.workflows
            .update_phase(
                phase.id,
                ExecutionPhaseUpdate {
                    status: Some(ExecutionPhaseStatus::Running),
                    started_at: Some(started_at),
                    ..Default::default()
                },
            )
            .await?;
        if let Some(scratch) = env.phase_mut(phase.id) {
            scratch.status = ExecutionPhaseStatus::Running;
            scratch.started_at = Some(started_at);
        }

        let parsed = NodeType::parse(node_type_str)
            .and_then(|node_type| executor_for(node_type).map(|executor| (node_type, executor)));
        let (node_type, executor) = match parsed {
            Some(pair) => pair,
            None => {
                let err = EngineError::NodeTypeUnknown(node_type_str.to_string());
                env.add_log(phase.id, LogLevel::Error, err.to_string());
                self.fail_phase(phase.id, env, 0).await?;
                return Err(err);
            }
        };
        let node = NodeSnapshot {
            id: Uuid::new_v4(),
            definition_id: node_def.id.clone(),
            name: executor.name().to_string(),
            node_type: node_type_str.to_string(),
            started_at,
            ended_at: None,
            inputs: inputs.clone(),
            outputs: Map::new(),
        };
        env.add_log(
            phase.id,
            LogLevel::Info,
            format!("Starting node: {}", executor.name()),
        );

        // Debit before the node runs. A successful debit is never rolled
        // back, even when the node fails afterwards.
        let cost = node_type.credit_cost();
        if let Err(ledger_err) = self.ledger.atomic_debit(execution.user_id, cost).await {
            match EngineError::from(ledger_err) {
                EngineError::Database(e) => return Err(EngineError::Database(e)),
                err => {
                    env.add_log(phase.id, LogLevel::Error, err.to_string());
                    self.fail_phase(phase.id, env, 0).await?;
                    return Err(err);
                }
            }
        }
        *credits_spent += cost;

        match executor.run(&node, phase.id, env, &self.services).await {
            Ok(outputs) => {
                env.resources
                    .insert(node_def.id.clone(), outputs.clone());

                let completed_at = OffsetDateTime::now_utc();
                let mut snapshot = node;
                snapshot.ended_at = Some(completed_at);
                snapshot.outputs = outputs.clone();

                env.add_log(
                    phase.id,
                    LogLevel::Info,
                    format!("Node completed: {}", executor.name()),
                );
                if let Some(scratch) = env.phase_mut(phase.id) {
                    scratch.status = ExecutionPhaseStatus::Completed;
                    scratch.completed_at = Some(completed_at);
                }

                self.workflows
                    .update_phase(
                        phase.id,
                        ExecutionPhaseUpdate {
                            status: Some(ExecutionPhaseStatus::Completed),
                            completed_at: Some(completed_at),
                            node: Some(snapshot.to_value()),
                            outputs: Some(Value::Object(outputs)),
                            credits_consumed: Some(cost),
                            ..Default::default()
                        },
                    )
                    .await?;
                self.flush_logs(phase.id, env).await?;
                Ok(())
            }
            Err(err) => {
                env.add_log(phase.id, LogLevel::Error, err.to_string());
                // The debit already happened; the phase keeps its cost.
                self.fail_phase(phase.id, env, cost).await?;
                Err(err)
            }
        }
    }

    async fn fail_phase(
        &self,
        phase_id: Uuid,
        env: &mut Environment,
        credits_consumed: i32,
    ) -> Result<(), EngineError> {
        let completed_at = OffsetDateTime::now_utc();
        if let Some(scratch) = env.phase_mut(phase_id) {
            scratch.status = ExecutionPhaseStatus::Failed;
            scratch.completed_at = Some(completed_at);
        }
        self.workflows
            .update_phase(
                phase_id,
                ExecutionPhaseUpdate {
                    status: Some(ExecutionPhaseStatus::Failed),
                    completed_at: Some(completed_at),
                    outputs: Some(json!({})),
                    credits_consumed: Some(credits_consumed),
                    ..Default::default()
                },
            )
            .await?;
        self.flush_logs(phase_id, env).await?;
        Ok(())
    }

    async fn flush_logs(&self, phase_id: Uuid, env: &mut Environment) -> Result<(), EngineError> {
        let entries = match env.phase_mut(phase_id) {
            Some(scratch) => std::mem::take(&mut scratch.logs),
            None => return Ok(()),
        };
        for entry in entries {
            self.workflows
                .insert_log(NewExecutionLog {
                    execution_phase_id: phase_id,
                    log_level: entry.level,
                    message: entry.message,
                    timestamp: entry.timestamp,
                })
                .await?;
        }
        Ok(())
    }

    async fn finish(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        credits_consumed: i32,
    ) -> Result<(), EngineError> {
        self.workflows
            .update_execution(
                execution_id,
                ExecutionUpdate {
                    status: Some(status),
                    completed_at: Some(OffsetDateTime::now_utc()),
                    credits_consumed: Some(credits_consumed),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    /// Records what happened on a synthetic phase and fails the execution
    /// without touching the ledger or the nodes.
    async fn fail_crashed_redelivery(
        &self,
        execution: &WorkflowExecution,
    ) -> Result<ExecutionStatus, EngineError> {
        warn!(
            execution_id = %execution.id,
            "execution was RUNNING on redelivery; worker likely crashed mid-run"
        );

        let now = OffsetDateTime::now_utc();
        let phase = self
            .workflows
            .create_phase(
                execution.id,
                execution.user_id,
                0,
                "redelivery_check",
                json!({}),
            )
            .await?;
        self.workflows
            .update_phase(
                phase.id,
                ExecutionPhaseUpdate {
                    status: Some(ExecutionPhaseStatus::Failed),
                    started_at: Some(now),
                    completed_at: Some(now),
                    outputs: Some(json!({})),
                    credits_consumed: Some(0),
                    ..Default::default()
                },
            )
            .await?;
        self.workflows
            .insert_log(NewExecutionLog {
                execution_phase_id: phase.id,
                log_level: LogLevel::Warning,
                message: "message redelivered while execution was RUNNING; marking FAILED \
                          without re-running nodes or re-debiting credits"
                    .to_string(),
                timestamp: now,
            })
            .await?;
        self.workflows
            .update_execution(
                execution.id,
                ExecutionUpdate {
                    status: Some(ExecutionStatus::Failed),
                    completed_at: Some(now),
                    ..Default::default()
                },
            )
            .await?;
        Ok(ExecutionStatus::Failed)
    }
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::engine::WorkflowRunner;
use crate::models::execution::ExecutionStatus;
use crate::models::workflow::{Workflow, WorkflowRunPatch, WorkflowStatus};
use crate::queue::ExecutionMessage;
use crate::state::AppState;
use crate::utils::cron::{chrono_to_offset, next_run, offset_to_chrono};

/// What to do with a message after processing. `Ack` removes it; `Retry`
/// leaves it for the visibility timeout to resurface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDisposition {
    Ack,
    Retry,
}

/// Long-poll loop. Receives up to `MAX_POLL_MESSAGES` at a time, processes
/// them sequentially and acks each one that reached a safe state. The
/// shutdown flag is checked between receives; in-flight messages finish.
pub async fn poll_queue(state: &AppState, shutdown: &AtomicBool) {
    info!(
        queue_url = %state.config.workflow_queue_url,
        "starting queue polling loop"
    );

    while !shutdown.load(Ordering::SeqCst) {
        let messages = match state
            .queue
            .receive(
                state.config.max_poll_messages,
                state.config.poll_wait_time,
                state.config.visibility_timeout,
            )
            .await
        {
            Ok(messages) => messages,
            Err(err) => {
                error!(error = %err, "queue receive failed");
                sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        if messages.is_empty() {
            continue;
        }
        info!(count = messages.len(), "received queue messages");

        for message in messages {
            match process_message(state, &message.body).await {
                MessageDisposition::Ack => {
                    if let Err(err) = state.queue.delete(&message.receipt_handle).await {
                        warn!(error = %err, "failed to delete processed message");
                    }
                }
                MessageDisposition::Retry => {
                    warn!("leaving message un-acked for redelivery");
                }
            }
        }
    }

    info!("worker shutdown complete");
}

/// One-shot mode for event-driven hosts: the message body arrives
/// pre-materialized in `QUEUE_BODY` and the host owns the ack. Returns
/// false when the message should be redelivered.
pub async fn process_one_shot(state: &AppState) -> bool {
    let Ok(body) = std::env::var("QUEUE_BODY") else {
        warn!("no QUEUE_BODY found in environment; nothing to process");
        return true;
    };
    info!("processing pre-materialized message from environment");
    process_message(state, &body).await == MessageDisposition::Ack
}

/// Runs one dispatch message end to end: load, mark last-run, execute,
/// advance the schedule, patch the workflow.
pub async fn process_message(state: &AppState, body: &str) -> MessageDisposition {
    let message: ExecutionMessage = match serde_json::from_str(body) {
        Ok(message) => message,
        Err(err) => {
            // Poison pill; retrying would loop forever.
            error!(error = %err, "failed to parse message body");
            return MessageDisposition::Ack;
        }
    };

    let workflow = match state
        .workflows
        .find_workflow_by_id_and_user(message.workflow_id, message.user_id)
        .await
    {
        Ok(Some(workflow)) => workflow,
        Ok(None) => {
            warn!(
                workflow_id = %message.workflow_id,
                user_id = %message.user_id,
                "workflow not found for message"
            );
            return MessageDisposition::Ack;
        }
        Err(err) => {
            error!(error = %err, "failed to load workflow");
            return MessageDisposition::Retry;
        }
    };

    let execution = match state
        .workflows
        .find_execution_by_id_and_user(message.execution_id, message.user_id)
        .await
    {
        Ok(Some(execution)) => execution,
        Ok(None) => {
            warn!(
                execution_id = %message.execution_id,
                user_id = %message.user_id,
                "execution not found for message"
            );
            return MessageDisposition::Ack;
        }
        Err(err) => {
            error!(error = %err, "failed to load execution");
            return MessageDisposition::Retry;
        }
    };

    info!(
        workflow_id = %workflow.id,
        execution_id = %execution.id,
        "processing workflow execution"
    );

    let marked = state
        .workflows
        .apply_run_patch(
            workflow.id,
            WorkflowRunPatch {
                last_run_id: Some(execution.id),
                last_run_status: Some(ExecutionStatus::Running),
                last_run_at: Some(OffsetDateTime::now_utc()),
                next_run_at: None,
                set_next_run_at: false,
            },
        )
        .await;
    if let Err(err) = marked {
        error!(error = %err, "failed to mark workflow last run");
        return MessageDisposition::Retry;
    }

    let runner = WorkflowRunner::new(
        state.workflows.clone(),
        state.ledger.clone(),
        state.services.clone(),
    );
    let exec_status = match runner.run_workflow(&workflow, &execution).await {
        Ok(status) => status,
        Err(err) => {
            // Persistence-level failure; the execution may not have reached
            // a terminal state, so let the queue redeliver.
            error!(error = %err, execution_id = %execution.id, "runner failed");
            return MessageDisposition::Retry;
        }
    };

    // The execution is terminal and persisted; nothing below may block the
    // ack.
    let patch = WorkflowRunPatch {
        last_run_id: Some(execution.id),
        last_run_status: Some(exec_status),
        last_run_at: Some(OffsetDateTime::now_utc()),
        next_run_at: compute_next_run_at(&workflow),
        set_next_run_at: true,
    };
    if let Err(err) = state.workflows.apply_run_patch(workflow.id, patch).await {
        error!(error = %err, "failed to patch workflow after run");
    }

    MessageDisposition::Ack
}

/// Next occurrence from the workflow's cron, or `None` when the workflow is
/// not scheduled or the expression stopped parsing (logged as an error; the
/// schedule stays cleared until the expression is fixed).
fn compute_next_run_at(workflow: &Workflow) -> Option<OffsetDateTime> {
    if workflow.status != WorkflowStatus::Published {
        return None;
    }
    let cron = workflow.cron.as_deref()?;
    let base = offset_to_chrono(OffsetDateTime::now_utc())?;
    match next_run(cron, base) {
        Ok(next) => chrono_to_offset(next),
        Err(err) => {
            error!(workflow_id = %workflow.id, error = %err, "invalid cron expression");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::balance_repository::MockBalanceRepository;
    use crate::db::user_repository::MockUserRepository;
    use crate::db::workflow_repository::MockWorkflowRepository;
    use crate::engine::nodes::tests_support::TestServices;
    use crate::models::balance::UserBalance;
    use crate::models::execution::{ExecutionTrigger, WorkflowExecution};
    use crate::models::execution_phase::ExecutionPhase;
    use crate::models::execution_phase::ExecutionPhaseStatus;
    use crate::models::workflow_version::WorkflowVersion;
    use crate::queue::{MockWorkQueue, ReceivedMessage};
    use crate::state::AppState;
    use serde_json::json;
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    fn base_state(
        workflows: MockWorkflowRepository,
        queue: MockWorkQueue,
    ) -> AppState {
        AppState {
            workflows: Arc::new(workflows),
            users: Arc::new(MockUserRepository::new()),
            ledger: Arc::new(MockBalanceRepository::new()),
            queue: Arc::new(queue),
            services: Arc::new(TestServices::default().build()),
            config: Arc::new(Config::for_tests()),
        }
    }

    fn state_with_ledger(
        workflows: MockWorkflowRepository,
        ledger: MockBalanceRepository,
    ) -> AppState {
        AppState {
            workflows: Arc::new(workflows),
            users: Arc::new(MockUserRepository::new()),
            ledger: Arc::new(ledger),
            queue: Arc::new(MockWorkQueue::new()),
            services: Arc::new(TestServices::default().build()),
            config: Arc::new(Config::for_tests()),
        }
    }

    fn workflow_fixture(cron: Option<&str>) -> Workflow {
        Workflow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "wf".into(),
            status: WorkflowStatus::Published,
            cron: cron.map(|c| c.to_string()),
            credits_cost: None,
            active_version_id: Some(Uuid::new_v4()),
            last_run_id: None,
            last_run_status: None,
            last_run_at: None,
            next_run_at: None,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    fn execution_fixture(workflow: &Workflow) -> WorkflowExecution {
        WorkflowExecution {
            id: Uuid::new_v4(),
            workflow_id: workflow.id,
            user_id: workflow.user_id,
            trigger: ExecutionTrigger::Scheduled,
            status: ExecutionStatus::Pending,
            created_at: OffsetDateTime::now_utc(),
            started_at: None,
            completed_at: None,
            credits_consumed: None,
        }
    }

    fn message_body(workflow: &Workflow, execution: &WorkflowExecution) -> String {
        serde_json::to_string(&ExecutionMessage::for_execution(
            execution,
            OffsetDateTime::now_utc(),
        ))
        .map(|body| {
            assert!(body.contains(&workflow.id.to_string()));
            body
        })
        .unwrap()
    }

    #[tokio::test]
    async fn poison_message_is_acked_without_lookups() {
        let state = base_state(MockWorkflowRepository::new(), MockWorkQueue::new());
        let disposition = process_message(&state, "{not json").await;
        assert_eq!(disposition, MessageDisposition::Ack);
    }

    #[tokio::test]
    async fn missing_workflow_is_acked_as_orphan() {
        let workflow = workflow_fixture(None);
        let execution = execution_fixture(&workflow);
        let body = message_body(&workflow, &execution);

        let mut workflows = MockWorkflowRepository::new();
        workflows
            .expect_find_workflow_by_id_and_user()
            .returning(|_, _| Ok(None));

        let state = base_state(workflows, MockWorkQueue::new());
        let disposition = process_message(&state, &body).await;
        assert_eq!(disposition, MessageDisposition::Ack);
    }

    #[tokio::test]
    async fn successful_run_patches_last_run_and_schedule() {
        let workflow = workflow_fixture(Some("*/5 * * * *"));
        let execution = execution_fixture(&workflow);
        let body = message_body(&workflow, &execution);

        let node = json!({"id": "n1", "data": {"type": "delay", "inputs": {"Duration": 0.01}}});
        let version = WorkflowVersion {
            id: workflow.active_version_id.unwrap(),
            workflow_id: workflow.id,
            version_number: 1,
            definition: json!({"nodes": [node.clone()], "edges": []}),
            execution_plan: json!([{"phase": 1, "nodes": [node]}]),
            is_active: true,
            parent_version_id: None,
            created_by: workflow.user_id,
            created_at: OffsetDateTime::now_utc(),
        };

        let patches: Arc<Mutex<Vec<WorkflowRunPatch>>> = Arc::new(Mutex::new(Vec::new()));

        let mut workflows = MockWorkflowRepository::new();
        let wf_clone = workflow.clone();
        workflows
            .expect_find_workflow_by_id_and_user()
            .returning(move |_, _| Ok(Some(wf_clone.clone())));
        let exec_clone = execution.clone();
        workflows
            .expect_find_execution_by_id_and_user()
            .returning(move |_, _| Ok(Some(exec_clone.clone())));
        workflows
            .expect_find_active_version()
            .returning(move |_| Ok(Some(version.clone())));
        let patches_clone = Arc::clone(&patches);
        workflows
            .expect_apply_run_patch()
            .returning(move |_, patch| {
                patches_clone.lock().unwrap().push(patch);
                Ok(())
            });
        workflows
            .expect_create_phase()
            .returning(|execution_id, user_id, number, name, inputs| {
                Ok(ExecutionPhase {
                    id: Uuid::new_v4(),
                    workflow_execution_id: execution_id,
                    user_id,
                    number,
                    name: name.to_string(),
                    status: ExecutionPhaseStatus::Pending,
                    started_at: None,
                    completed_at: None,
                    node: None,
                    inputs: Some(inputs),
                    outputs: None,
                    credits_consumed: None,
                })
            });
        workflows.expect_update_phase().returning(|_, _| Ok(()));
        workflows.expect_update_execution().returning(|_, _| Ok(()));
        workflows.expect_insert_log().returning(|_| Ok(()));

        let mut ledger = MockBalanceRepository::new();
        ledger.expect_atomic_debit().returning(|user_id, _| {
            Ok(UserBalance {
                user_id,
                credits: 9,
                updated_at: OffsetDateTime::now_utc(),
            })
        });

        let state = state_with_ledger(workflows, ledger);
        let disposition = process_message(&state, &body).await;
        assert_eq!(disposition, MessageDisposition::Ack);

        let patches = patches.lock().unwrap();
        assert_eq!(patches.len(), 2);
        assert_eq!(patches[0].last_run_status, Some(ExecutionStatus::Running));
        assert!(!patches[0].set_next_run_at);
        assert_eq!(patches[1].last_run_status, Some(ExecutionStatus::Completed));
        assert!(patches[1].set_next_run_at);
        assert!(patches[1].next_run_at.is_some(), "cron must advance");
    }

    #[tokio::test]
    async fn invalid_cron_clears_next_run() {
        let workflow = workflow_fixture(Some("every five minutes"));
        assert!(compute_next_run_at(&workflow).is_none());
    }

    #[tokio::test]
    async fn unpublished_workflow_gets_no_next_run() {
        let mut workflow = workflow_fixture(Some("*/5 * * * *"));
        workflow.status = WorkflowStatus::Disabled;
        assert!(compute_next_run_at(&workflow).is_none());
    }

    #[tokio::test]
    async fn poll_loop_acks_processed_messages_and_honors_shutdown() {
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut queue = MockWorkQueue::new();
        queue
            .expect_receive()
            .times(1)
            .returning(|_, _, _| {
                Ok(vec![ReceivedMessage {
                    body: "{not json".to_string(),
                    receipt_handle: "rh-1".to_string(),
                }])
            });
        let shutdown_clone = Arc::clone(&shutdown);
        queue.expect_delete().times(1).returning(move |handle| {
            assert_eq!(handle, "rh-1");
            shutdown_clone.store(true, Ordering::SeqCst);
            Ok(())
        });

        let state = base_state(MockWorkflowRepository::new(), MockWorkQueue::new());
        let state = AppState {
            queue: Arc::new(queue),
            ..state
        };

        tokio::time::timeout(Duration::from_secs(5), poll_queue(&state, &shutdown))
            .await
            .expect("poll loop should stop after shutdown flag is set");
    }
}

use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::models::execution::ExecutionTrigger;
use crate::models::workflow::WorkflowRunPatch;
use crate::queue::ExecutionMessage;
use crate::state::AppState;
use crate::utils::cron::{chrono_to_offset, next_run, offset_to_chrono};

/// Outcome of one scheduler tick, for the caller's log line.
#[derive(Debug, Default, Clone)]
pub struct TickSummary {
    pub scheduled: usize,
    pub cleanup_ran: bool,
    pub reaped_guests: u64,
    pub reaped_sessions: u64,
}

/// Cleanup runs every Kth tick. Decided from wall-clock position rather
/// than a process counter so short-lived tick processes and replicas agree
/// on which ticks clean up.
pub(crate) fn cleanup_due(
    now: OffsetDateTime,
    tick_minutes: i64,
    cleanup_interval_minutes: i64,
) -> bool {
    let tick_minutes = tick_minutes.max(1);
    if cleanup_interval_minutes <= tick_minutes {
        return true;
    }
    let ticks_per_cleanup = (cleanup_interval_minutes / tick_minutes).max(1);
    let tick_index = (now.unix_timestamp() / 60) / tick_minutes;
    tick_index % ticks_per_cleanup == 0
}

/// One scheduler tick: enqueue every due workflow and advance its
/// `next_run_at`, then reap expired guests on cleanup ticks. Per-workflow
/// failures are logged and skipped; only persistence failures on the scan
/// itself abort the tick.
pub async fn run_tick(state: &AppState, now: OffsetDateTime) -> Result<TickSummary, sqlx::Error> {
    let mut summary = TickSummary::default();

    if cleanup_due(
        now,
        state.config.scheduler_interval_minutes,
        state.config.guest_cleanup_interval_minutes,
    ) {
        summary.cleanup_ran = true;
        match state.users.delete_expired_guests(now).await {
            Ok(reaped) => {
                for guest in &reaped {
                    info!(
                        user_id = %guest.id,
                        expired_at = ?guest.guest_expires_at,
                        "reaped expired guest and all owned rows"
                    );
                }
                summary.reaped_guests = reaped.len() as u64;
            }
            Err(err) => error!(error = %err, "failed to reap expired guests"),
        }
        match state.users.delete_expired_guest_sessions(now).await {
            Ok(reaped) => summary.reaped_sessions = reaped.len() as u64,
            Err(err) => error!(error = %err, "failed to reap expired guest sessions"),
        }
        if summary.reaped_guests > 0 || summary.reaped_sessions > 0 {
            info!(
                guests = summary.reaped_guests,
                sessions = summary.reaped_sessions,
                "guest cleanup removed expired rows"
            );
        }
    }

    let due = state.workflows.get_due_workflows(now).await?;
    info!(count = due.len(), "found due workflows");

    for workflow in due {
        let execution = match state
            .workflows
            .create_execution(workflow.id, workflow.user_id, ExecutionTrigger::Scheduled)
            .await
        {
            Ok(execution) => execution,
            Err(err) => {
                error!(workflow_id = %workflow.id, error = %err, "failed to create execution");
                continue;
            }
        };

        let message = ExecutionMessage::for_execution(&execution, now);
        match serde_json::to_string(&message) {
            Ok(body) => {
                if let Err(err) = state.queue.send(&body).await {
                    // The execution row exists; a manual retry or the next
                    // publish can pick it up. Do not block the tick.
                    warn!(
                        execution_id = %execution.id,
                        error = %err,
                        "failed to enqueue execution message"
                    );
                }
            }
            Err(err) => {
                warn!(execution_id = %execution.id, error = %err, "failed to encode message");
            }
        }

        let next_run_at = workflow.cron.as_deref().and_then(|cron| {
            let base = offset_to_chrono(now)?;
            match next_run(cron, base) {
                Ok(next) => chrono_to_offset(next),
                Err(err) => {
                    warn!(workflow_id = %workflow.id, error = %err, "invalid cron expression");
                    None
                }
            }
        });

        if let Err(err) = state
            .workflows
            .apply_run_patch(
                workflow.id,
                WorkflowRunPatch {
                    next_run_at,
                    set_next_run_at: true,
                    ..Default::default()
                },
            )
            .await
        {
            error!(workflow_id = %workflow.id, error = %err, "failed to advance next_run_at");
            continue;
        }

        summary.scheduled += 1;
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::balance_repository::MockBalanceRepository;
    use crate::db::user_repository::MockUserRepository;
    use crate::db::workflow_repository::MockWorkflowRepository;
    use crate::engine::nodes::tests_support::TestServices;
    use crate::models::execution::{ExecutionStatus, WorkflowExecution};
    use crate::models::user::{GuestSession, User};
    use crate::models::workflow::{Workflow, WorkflowStatus};
    use crate::queue::MockWorkQueue;
    use serde_json::Value;
    use std::sync::{Arc, Mutex};
    use time::macros::datetime;
    use uuid::Uuid;

    fn state(
        workflows: MockWorkflowRepository,
        users: MockUserRepository,
        queue: MockWorkQueue,
    ) -> AppState {
        AppState {
            workflows: Arc::new(workflows),
            users: Arc::new(users),
            ledger: Arc::new(MockBalanceRepository::new()),
            queue: Arc::new(queue),
            services: Arc::new(TestServices::default().build()),
            config: Arc::new(Config::for_tests()),
        }
    }

    fn guest_expired_at(expires_at: OffsetDateTime) -> User {
        User {
            id: Uuid::new_v4(),
            email: None,
            clerk_user_id: None,
            is_guest: true,
            guest_expires_at: Some(expires_at),
            created_at: expires_at - time::Duration::days(7),
        }
    }

    fn session_expired_at(expires_at: OffsetDateTime) -> GuestSession {
        GuestSession {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            session_token: "guest-session-token".into(),
            expires_at,
            created_at: expires_at - time::Duration::days(7),
        }
    }

    fn due_workflow(cron: &str, next_run_at: OffsetDateTime) -> Workflow {
        Workflow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "nightly sync".into(),
            status: WorkflowStatus::Published,
            cron: Some(cron.to_string()),
            credits_cost: None,
            active_version_id: Some(Uuid::new_v4()),
            last_run_id: None,
            last_run_status: None,
            last_run_at: None,
            next_run_at: Some(next_run_at),
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn tick_enqueues_due_workflow_and_advances_next_run() {
        // Matches the scheduler contract: a workflow due at 00:00:00 picked
        // up by the 00:00:10 tick is enqueued once and moved to 00:05:00.
        let now = datetime!(2025-01-01 00:00:10 UTC);
        let workflow = due_workflow("*/5 * * * *", datetime!(2025-01-01 00:00:00 UTC));
        let workflow_id = workflow.id;
        let user_id = workflow.user_id;

        let mut workflows = MockWorkflowRepository::new();
        let wf_clone = workflow.clone();
        workflows
            .expect_get_due_workflows()
            .times(1)
            .returning(move |_| Ok(vec![wf_clone.clone()]));

        let executions: Arc<Mutex<Vec<WorkflowExecution>>> = Arc::new(Mutex::new(Vec::new()));
        let executions_clone = Arc::clone(&executions);
        workflows
            .expect_create_execution()
            .times(1)
            .returning(move |workflow_id, user_id, trigger| {
                assert_eq!(trigger, ExecutionTrigger::Scheduled);
                let execution = WorkflowExecution {
                    id: Uuid::new_v4(),
                    workflow_id,
                    user_id,
                    trigger,
                    status: ExecutionStatus::Pending,
                    created_at: OffsetDateTime::now_utc(),
                    started_at: None,
                    completed_at: None,
                    credits_consumed: None,
                };
                executions_clone.lock().unwrap().push(execution.clone());
                Ok(execution)
            });

        let patches: Arc<Mutex<Vec<WorkflowRunPatch>>> = Arc::new(Mutex::new(Vec::new()));
        let patches_clone = Arc::clone(&patches);
        workflows
            .expect_apply_run_patch()
            .times(1)
            .returning(move |patched_id, patch| {
                assert_eq!(patched_id, workflow_id);
                patches_clone.lock().unwrap().push(patch);
                Ok(())
            });

        let sent: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sent_clone = Arc::clone(&sent);
        let mut queue = MockWorkQueue::new();
        queue.expect_send().times(1).returning(move |body| {
            sent_clone.lock().unwrap().push(body.to_string());
            Ok("mid-1".to_string())
        });

        // 00:00 is a cleanup tick with the default 5m/60m cadence.
        let mut users = MockUserRepository::new();
        users
            .expect_delete_expired_guests()
            .times(1)
            .returning(|_| Ok(Vec::new()));
        users
            .expect_delete_expired_guest_sessions()
            .times(1)
            .returning(|_| Ok(Vec::new()));

        let state = state(workflows, users, queue);
        let summary = run_tick(&state, now).await.unwrap();
        assert_eq!(summary.scheduled, 1);

        let sent = sent.lock().unwrap();
        let body: Value = serde_json::from_str(&sent[0]).unwrap();
        let executions = executions.lock().unwrap();
        assert_eq!(
            body.get("execution_id").and_then(|v| v.as_str()),
            Some(executions[0].id.to_string().as_str())
        );
        assert_eq!(
            body.get("trigger").and_then(|v| v.as_str()),
            Some("scheduled")
        );
        assert_eq!(
            body.get("user_id").and_then(|v| v.as_str()),
            Some(user_id.to_string().as_str())
        );

        let patches = patches.lock().unwrap();
        assert!(patches[0].set_next_run_at);
        assert_eq!(
            patches[0].next_run_at,
            Some(datetime!(2025-01-01 00:05:00 UTC))
        );
    }

    #[tokio::test]
    async fn enqueue_failure_still_advances_schedule() {
        let now = datetime!(2025-03-03 10:07:11 UTC);
        let workflow = due_workflow("0 * * * *", datetime!(2025-03-03 10:00:00 UTC));

        let mut workflows = MockWorkflowRepository::new();
        let wf_clone = workflow.clone();
        workflows
            .expect_get_due_workflows()
            .returning(move |_| Ok(vec![wf_clone.clone()]));
        workflows
            .expect_create_execution()
            .returning(|workflow_id, user_id, trigger| {
                Ok(WorkflowExecution {
                    id: Uuid::new_v4(),
                    workflow_id,
                    user_id,
                    trigger,
                    status: ExecutionStatus::Pending,
                    created_at: OffsetDateTime::now_utc(),
                    started_at: None,
                    completed_at: None,
                    credits_consumed: None,
                })
            });
        let patches: Arc<Mutex<Vec<WorkflowRunPatch>>> = Arc::new(Mutex::new(Vec::new()));
        let patches_clone = Arc::clone(&patches);
        workflows
            .expect_apply_run_patch()
            .returning(move |_, patch| {
                patches_clone.lock().unwrap().push(patch);
                Ok(())
            });

        let mut queue = MockWorkQueue::new();
        queue
            .expect_send()
            .returning(|_| Err(crate::queue::QueueError::Send("broker down".into())));

        // 10:07 with a 5m tick is not a cleanup tick.
        let users = MockUserRepository::new();

        let state = state(workflows, users, queue);
        let summary = run_tick(&state, now).await.unwrap();
        assert_eq!(summary.scheduled, 1);
        assert!(!summary.cleanup_ran);
        assert_eq!(
            patches.lock().unwrap()[0].next_run_at,
            Some(datetime!(2025-03-03 11:00:00 UTC))
        );
    }

    #[tokio::test]
    async fn cleanup_tick_reaps_expired_guests() {
        // Expired guest A is deleted with everything it owns (schema-level
        // cascade); unexpired B survives because the delete is bounded by
        // the expiry cutoff.
        let now = datetime!(2025-01-01 01:00:02 UTC);

        let mut workflows = MockWorkflowRepository::new();
        workflows
            .expect_get_due_workflows()
            .returning(|_| Ok(Vec::new()));

        let mut users = MockUserRepository::new();
        users
            .expect_delete_expired_guests()
            .times(1)
            .returning(move |cutoff| {
                assert_eq!(cutoff, now);
                // Only A, expired an hour before the cutoff, comes back
                // deleted; B expires an hour later and stays.
                Ok(vec![guest_expired_at(now - time::Duration::hours(1))])
            });
        users
            .expect_delete_expired_guest_sessions()
            .times(1)
            .returning(move |_| {
                Ok(vec![
                    session_expired_at(now - time::Duration::hours(2)),
                    session_expired_at(now - time::Duration::minutes(5)),
                ])
            });

        let state = state(workflows, users, MockWorkQueue::new());
        let summary = run_tick(&state, now).await.unwrap();
        assert!(summary.cleanup_ran);
        assert_eq!(summary.reaped_guests, 1);
        assert_eq!(summary.reaped_sessions, 2);
        assert_eq!(summary.scheduled, 0);
    }

    #[test]
    fn cleanup_cadence_follows_wall_clock_modulo() {
        // 5-minute ticks, hourly cleanup: only on-the-hour ticks clean up.
        assert!(cleanup_due(datetime!(2025-01-01 00:00:00 UTC), 5, 60));
        assert!(!cleanup_due(datetime!(2025-01-01 00:05:00 UTC), 5, 60));
        assert!(!cleanup_due(datetime!(2025-01-01 00:55:00 UTC), 5, 60));
        assert!(cleanup_due(datetime!(2025-01-01 01:00:00 UTC), 5, 60));
        // Cleanup interval at or under the tick period cleans every tick.
        assert!(cleanup_due(datetime!(2025-01-01 00:05:00 UTC), 5, 5));
    }
}

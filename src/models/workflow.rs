use core::fmt;

use serde::{Deserialize, Serialize};
use sqlx::{prelude::Type, FromRow};
use time::OffsetDateTime;
use uuid::Uuid;

use super::execution::ExecutionStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "workflow_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum WorkflowStatus {
    Draft,
    Published,
    Disabled,
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowStatus::Draft => "DRAFT",
            WorkflowStatus::Published => "PUBLISHED",
            WorkflowStatus::Disabled => "DISABLED",
        };
        write!(f, "{}", s)
    }
}

/// `next_run_at` is non-null only while the workflow is PUBLISHED with a
/// cron expression; the scheduler and worker keep it advanced.
#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct Workflow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub status: WorkflowStatus,
    pub cron: Option<String>,
    pub credits_cost: Option<i32>,
    pub active_version_id: Option<Uuid>,
    pub last_run_id: Option<Uuid>,
    pub last_run_status: Option<ExecutionStatus>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_run_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub next_run_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Partial update applied by the worker and scheduler; `None` fields are
/// left untouched, except `next_run_at` which is always written (clearing it
/// is a valid patch when a cron expression stops parsing).
#[derive(Debug, Default, Clone)]
pub struct WorkflowRunPatch {
    pub last_run_id: Option<Uuid>,
    pub last_run_status: Option<ExecutionStatus>,
    pub last_run_at: Option<OffsetDateTime>,
    pub next_run_at: Option<OffsetDateTime>,
    pub set_next_run_at: bool,
}

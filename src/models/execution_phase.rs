use serde::{Deserialize, Serialize};
use sqlx::{prelude::Type, FromRow};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "execution_phase_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionPhaseStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One row per executed node. `node` is the snapshot of the node as the
/// runner saw it (id, name, type, timing, inputs, outputs).
#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct ExecutionPhase {
    pub id: Uuid,
    pub workflow_execution_id: Uuid,
    pub user_id: Uuid,
    pub number: i32,
    pub name: String,
    pub status: ExecutionPhaseStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    pub node: Option<serde_json::Value>,
    pub inputs: Option<serde_json::Value>,
    pub outputs: Option<serde_json::Value>,
    pub credits_consumed: Option<i32>,
}

#[derive(Debug, Default, Clone)]
pub struct ExecutionPhaseUpdate {
    pub status: Option<ExecutionPhaseStatus>,
    pub started_at: Option<OffsetDateTime>,
    pub completed_at: Option<OffsetDateTime>,
    pub node: Option<serde_json::Value>,
    pub outputs: Option<serde_json::Value>,
    pub credits_consumed: Option<i32>,
}

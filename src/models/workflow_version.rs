use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Snapshot of an authored graph. `definition` is the raw authoring JSON
/// (`{nodes, edges}`); `execution_plan` is the phased ordering
/// (`[{phase, nodes}, …]`) produced by the authoring tool.
#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct WorkflowVersion {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub version_number: i32,
    pub definition: serde_json::Value,
    pub execution_plan: serde_json::Value,
    pub is_active: bool,
    pub parent_version_id: Option<Uuid>,
    pub created_by: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

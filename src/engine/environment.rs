use std::collections::HashMap;

use serde_json::{json, Map, Value};
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::models::execution_log::LogLevel;
use crate::models::execution_phase::ExecutionPhaseStatus;
use crate::services::browser::BrowserDriver;

/// Buffered log line; flushed to rows when the owning phase terminates.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: OffsetDateTime,
}

/// Snapshot of the node bound to a phase, persisted onto the phase row when
/// the phase terminates.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub id: Uuid,
    pub definition_id: String,
    pub name: String,
    pub node_type: String,
    pub started_at: OffsetDateTime,
    pub ended_at: Option<OffsetDateTime>,
    pub inputs: Map<String, Value>,
    pub outputs: Map<String, Value>,
}

impl NodeSnapshot {
    pub fn to_value(&self) -> Value {
        json!({
            "id": self.id.to_string(),
            "definition_id": self.definition_id,
            "name": self.name,
            "type": self.node_type,
            "start_time": self.started_at
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_default(),
            "end_time": self.ended_at.and_then(|t| {
                t.format(&time::format_description::well_known::Rfc3339).ok()
            }),
            "inputs": Value::Object(self.inputs.clone()),
            "outputs": Value::Object(self.outputs.clone()),
        })
    }
}

/// In-memory state of one phase while its node runs.
#[derive(Debug)]
pub struct PhaseScratch {
    pub id: Uuid,
    pub name: String,
    pub status: ExecutionPhaseStatus,
    pub started_at: Option<OffsetDateTime>,
    pub completed_at: Option<OffsetDateTime>,
    pub logs: Vec<LogEntry>,
    pub node: Option<NodeSnapshot>,
}

impl PhaseScratch {
    pub fn add_log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.logs.push(LogEntry {
            level,
            message: message.into(),
            timestamp: OffsetDateTime::now_utc(),
        });
    }
}

/// Per-execution scratchpad: phase state, node outputs addressable by
/// downstream edges, and the shared browser handle. Never shared between
/// executions.
pub struct Environment {
    pub phases: HashMap<Uuid, PhaseScratch>,
    pub resources: HashMap<String, Map<String, Value>>,
    pub browser: Option<Box<dyn BrowserDriver>>,
}

impl Environment {
    pub fn new() -> Self {
        Environment {
            phases: HashMap::new(),
            resources: HashMap::new(),
            browser: None,
        }
    }

    pub fn create_phase(&mut self, phase_id: Uuid, name: &str) -> &mut PhaseScratch {
        self.phases.entry(phase_id).or_insert_with(|| PhaseScratch {
            id: phase_id,
            name: name.to_string(),
            status: ExecutionPhaseStatus::Pending,
            started_at: None,
            completed_at: None,
            logs: Vec::new(),
            node: None,
        })
    }

    pub fn phase_mut(&mut self, phase_id: Uuid) -> Option<&mut PhaseScratch> {
        self.phases.get_mut(&phase_id)
    }

    pub fn add_log(&mut self, phase_id: Uuid, level: LogLevel, message: impl Into<String>) {
        if let Some(phase) = self.phases.get_mut(&phase_id) {
            phase.add_log(level, message);
        }
    }

    /// Releases every held resource. Invoked on every exit path; safe to
    /// call twice. The driver owns its page, so closing it closes both.
    /// Clearing `resources` comes last.
    pub async fn cleanup(&mut self) {
        if let Some(mut browser) = self.browser.take() {
            if let Err(err) = browser.close().await {
                info!(error = %err, "browser close during cleanup failed");
            } else {
                info!("closed browser");
            }
        }
        self.resources.clear();
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

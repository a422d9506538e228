use serde::Deserialize;
use serde_json::{Map, Value};

use super::EngineError;

#[derive(Debug, Clone, Deserialize)]
pub struct NodeData {
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub inputs: Map<String, Value>,
}

/// A node as authored: the id referenced by edges plus its literal inputs.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeDefinition {
    pub id: String,
    pub data: NodeData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EdgeDefinition {
    pub source: String,
    #[serde(rename = "sourceHandle")]
    pub source_handle: String,
    pub target: String,
    #[serde(rename = "targetHandle")]
    pub target_handle: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default)]
    pub nodes: Vec<NodeDefinition>,
    #[serde(default)]
    pub edges: Vec<EdgeDefinition>,
}

impl WorkflowDefinition {
    pub fn from_value(value: &Value) -> Result<Self, EngineError> {
        serde_json::from_value(value.clone())
            .map_err(|e| EngineError::MalformedPlan(format!("definition: {e}")))
    }
}

/// One entry of the phased ordering: nodes runnable once every node in
/// earlier blocks has completed. Nodes inside a block run sequentially in
/// listed order.
#[derive(Debug, Clone, Deserialize)]
pub struct PhaseBlock {
    pub phase: i32,
    #[serde(default)]
    pub nodes: Vec<NodeDefinition>,
}

pub fn parse_execution_plan(value: &Value) -> Result<Vec<PhaseBlock>, EngineError> {
    serde_json::from_value(value.clone())
        .map_err(|e| EngineError::MalformedPlan(format!("execution plan: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_definition_with_unknown_extra_fields() {
        let value = json!({
            "nodes": [
                {"id": "a", "position": {"x": 1, "y": 2},
                 "data": {"type": "delay", "inputs": {"Duration": 1}}}
            ],
            "edges": [
                {"id": "e1", "source": "a", "sourceHandle": "waited",
                 "target": "b", "targetHandle": "Trigger"}
            ]
        });
        let definition = WorkflowDefinition::from_value(&value).unwrap();
        assert_eq!(definition.nodes.len(), 1);
        assert_eq!(definition.nodes[0].data.node_type, "delay");
        assert_eq!(definition.edges[0].source_handle, "waited");
    }

    #[test]
    fn parses_phase_blocks_in_order() {
        let value = json!([
            {"phase": 1, "nodes": [{"id": "a", "data": {"type": "delay", "inputs": {}}}]},
            {"phase": 2, "nodes": []}
        ]);
        let blocks = parse_execution_plan(&value).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].phase, 1);
        assert!(blocks[1].nodes.is_empty());
    }

    #[test]
    fn malformed_plan_is_rejected() {
        let err = parse_execution_plan(&json!({"phase": 1})).unwrap_err();
        assert!(matches!(err, EngineError::MalformedPlan(_)));
    }
}

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::engine::environment::{Environment, NodeSnapshot};
use crate::engine::{EngineError, ExecutorServices};
use crate::models::execution_log::LogLevel;

use super::{optional_str, require_str, require_value, NodeExecutor};

/// JSON inputs arrive either as strings (authored literals, upstream
/// outputs) or as structured values (wired objects); both are accepted.
fn parse_json_input(value: &Value) -> Result<Value, EngineError> {
    match value {
        Value::String(s) => serde_json::from_str(s)
            .map_err(|e| EngineError::Executor(format!("error parsing JSON: {e}"))),
        other => Ok(other.clone()),
    }
}

fn lookup_path<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = data;
    for part in path.split('.') {
        if part.is_empty() {
            continue;
        }
        match current {
            Value::Object(map) => current = map.get(part)?,
            Value::Array(arr) => {
                let idx: usize = part.parse().ok()?;
                current = arr.get(idx)?;
            }
            _ => return None,
        }
    }
    Some(current)
}

fn set_path(data: &mut Value, path: &str, value: Value) {
    let parts: Vec<&str> = path.split('.').filter(|p| !p.is_empty()).collect();
    if parts.is_empty() {
        return;
    }

    if !data.is_object() {
        *data = Value::Object(Map::new());
    }

    let mut current = data;
    for part in &parts[..parts.len() - 1] {
        let Some(map) = current.as_object_mut() else {
            return;
        };
        let entry = map
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = entry;
    }

    if let Some(map) = current.as_object_mut() {
        map.insert(parts[parts.len() - 1].to_string(), value);
    }
}

pub struct ReadPropertyFromJsonExecutor;

#[async_trait]
impl NodeExecutor for ReadPropertyFromJsonExecutor {
    fn name(&self) -> &'static str {
        "Read Property From JSON Node"
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &["JSON", "Property Name"]
    }

    async fn run(
        &self,
        node: &NodeSnapshot,
        phase_id: Uuid,
        env: &mut Environment,
        _services: &ExecutorServices,
    ) -> Result<Map<String, Value>, EngineError> {
        self.validate(node)?;
        let data = parse_json_input(require_value(node, "JSON")?)?;
        let property_name = require_str(node, "Property Name")?;

        let value = lookup_path(&data, property_name)
            .filter(|v| !v.is_null())
            .cloned()
            .ok_or_else(|| {
                EngineError::Executor(format!("property '{property_name}' not found in JSON"))
            })?;

        env.add_log(
            phase_id,
            LogLevel::Info,
            format!("Property '{property_name}' read from JSON"),
        );

        let mut outputs = Map::new();
        outputs.insert("Property Value".to_string(), value);
        Ok(outputs)
    }
}

pub struct WritePropertyToJsonExecutor;

#[async_trait]
impl NodeExecutor for WritePropertyToJsonExecutor {
    fn name(&self) -> &'static str {
        "Write Property To JSON Node"
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &["JSON", "Property Name", "Property Value"]
    }

    async fn run(
        &self,
        node: &NodeSnapshot,
        phase_id: Uuid,
        env: &mut Environment,
        _services: &ExecutorServices,
    ) -> Result<Map<String, Value>, EngineError> {
        self.validate(node)?;
        let mut data = parse_json_input(require_value(node, "JSON")?)?;
        let property_name = require_str(node, "Property Name")?;
        let property_value = require_value(node, "Property Value")?.clone();

        set_path(&mut data, property_name, property_value);

        env.add_log(
            phase_id,
            LogLevel::Info,
            format!("Property '{property_name}' written to JSON"),
        );

        let serialized = serde_json::to_string(&data)
            .map_err(|e| EngineError::Executor(format!("error serializing JSON: {e}")))?;
        let mut outputs = Map::new();
        outputs.insert("Updated JSON".to_string(), Value::String(serialized));
        Ok(outputs)
    }
}

fn convert_type(value: Value, target_type: &str) -> Value {
    match target_type {
        "string" => match value {
            Value::String(s) => Value::String(s),
            other => Value::String(other.to_string()),
        },
        "number" => match &value {
            Value::Number(_) => value,
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(value),
            _ => value,
        },
        "boolean" => match &value {
            Value::Bool(_) => value,
            Value::String(s) => Value::Bool(!s.is_empty()),
            Value::Number(n) => Value::Bool(n.as_f64().map(|v| v != 0.0).unwrap_or(false)),
            Value::Null => Value::Bool(false),
            _ => Value::Bool(true),
        },
        "array" => match value {
            Value::Array(arr) => Value::Array(arr),
            other => Value::Array(vec![other]),
        },
        _ => value,
    }
}

fn apply_rules(data: &Value, rules: &Map<String, Value>) -> Value {
    let mut result = Map::new();
    for (output_key, rule) in rules {
        let value = match rule {
            Value::String(path) => {
                let normalized = path.trim_start_matches("$.").trim_start_matches('$');
                lookup_path(data, normalized).cloned().unwrap_or(Value::Null)
            }
            Value::Object(mapping) => {
                if let Some(path) = mapping.get("path").and_then(|v| v.as_str()) {
                    let normalized = path.trim_start_matches("$.").trim_start_matches('$');
                    let found = lookup_path(data, normalized).cloned();
                    let value = match found {
                        Some(v) => v,
                        None => mapping.get("default").cloned().unwrap_or(Value::Null),
                    };
                    match mapping.get("type").and_then(|v| v.as_str()) {
                        Some(target) => convert_type(value, target),
                        None => value,
                    }
                } else if let Some(value) = mapping.get("value") {
                    value.clone()
                } else {
                    Value::Object(mapping.clone())
                }
            }
            other => other.clone(),
        };
        result.insert(output_key.clone(), value);
    }
    Value::Object(result)
}

pub struct JsonTransformExecutor;

#[async_trait]
impl NodeExecutor for JsonTransformExecutor {
    fn name(&self) -> &'static str {
        "JSON Transform Node"
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &["Input JSON", "Transform Rules"]
    }

    async fn run(
        &self,
        node: &NodeSnapshot,
        phase_id: Uuid,
        env: &mut Environment,
        _services: &ExecutorServices,
    ) -> Result<Map<String, Value>, EngineError> {
        self.validate(node)?;
        let data = parse_json_input(require_value(node, "Input JSON")?)?;
        let rules_value = parse_json_input(require_value(node, "Transform Rules")?)?;
        let rules = rules_value
            .as_object()
            .ok_or_else(|| EngineError::Executor("transform rules must be an object".to_string()))?;

        env.add_log(phase_id, LogLevel::Info, "Starting JSON transformation");
        let result = apply_rules(&data, rules);
        env.add_log(phase_id, LogLevel::Info, "JSON transformation completed");

        let serialized = serde_json::to_string(&result)
            .map_err(|e| EngineError::Executor(format!("error serializing JSON: {e}")))?;
        let mut outputs = Map::new();
        outputs.insert("Transformed JSON".to_string(), Value::String(serialized));
        Ok(outputs)
    }
}

fn merge_objects(target: &mut Map<String, Value>, source: Map<String, Value>, strategy: &str) {
    for (key, value) in source {
        if strategy == "append" {
            if let (Some(Value::Array(existing)), Value::Array(incoming)) =
                (target.get_mut(&key), &value)
            {
                existing.extend(incoming.clone());
                continue;
            }
        }
        target.insert(key, value);
    }
}

pub struct MergeDataExecutor;

#[async_trait]
impl NodeExecutor for MergeDataExecutor {
    fn name(&self) -> &'static str {
        "Merge Data Node"
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &["Data 1", "Data 2"]
    }

    async fn run(
        &self,
        node: &NodeSnapshot,
        phase_id: Uuid,
        env: &mut Environment,
        _services: &ExecutorServices,
    ) -> Result<Map<String, Value>, EngineError> {
        self.validate(node)?;
        let strategy = optional_str(node, "Merge Strategy").unwrap_or("overwrite");

        // "Data 1"…"Data N", merged in index order.
        let mut indexed: Vec<(u32, &Value)> = node
            .inputs
            .iter()
            .filter_map(|(key, value)| {
                let suffix = key.strip_prefix("Data ")?;
                let index: u32 = suffix.trim().parse().ok()?;
                if value.is_null() {
                    None
                } else {
                    Some((index, value))
                }
            })
            .collect();
        indexed.sort_by_key(|(index, _)| *index);

        env.add_log(
            phase_id,
            LogLevel::Info,
            format!("Found {} data inputs to merge", indexed.len()),
        );

        let mut merged = Map::new();
        for (index, raw) in indexed {
            match parse_json_input(raw) {
                Ok(Value::Object(map)) => merge_objects(&mut merged, map, strategy),
                Ok(other) => {
                    merged.insert(format!("input_{index}"), other);
                }
                Err(_) => {
                    merged.insert(format!("input_{index}"), raw.clone());
                }
            }
        }

        env.add_log(phase_id, LogLevel::Info, "Data merge completed");

        let serialized = serde_json::to_string(&Value::Object(merged))
            .map_err(|e| EngineError::Executor(format!("error serializing JSON: {e}")))?;
        let mut outputs = Map::new();
        outputs.insert("Merged Data".to_string(), Value::String(serialized));
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::nodes::tests_support::{snapshot, test_services};
    use serde_json::json;

    async fn run(
        executor: &dyn NodeExecutor,
        node_type: &str,
        inputs: Value,
    ) -> Result<Map<String, Value>, EngineError> {
        let services = test_services();
        let mut env = Environment::new();
        let phase_id = Uuid::new_v4();
        env.create_phase(phase_id, node_type);
        executor
            .run(&snapshot(node_type, inputs), phase_id, &mut env, &services)
            .await
    }

    #[tokio::test]
    async fn read_property_supports_dot_paths() {
        let outputs = run(
            &ReadPropertyFromJsonExecutor,
            "read_property_from_json",
            json!({"JSON": r#"{"order": {"total": 42}}"#, "Property Name": "order.total"}),
        )
        .await
        .unwrap();
        assert_eq!(outputs.get("Property Value"), Some(&json!(42)));
    }

    #[tokio::test]
    async fn read_property_fails_on_missing_key() {
        let err = run(
            &ReadPropertyFromJsonExecutor,
            "read_property_from_json",
            json!({"JSON": r#"{"a": 1}"#, "Property Name": "b"}),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn read_property_rejects_invalid_json() {
        let err = run(
            &ReadPropertyFromJsonExecutor,
            "read_property_from_json",
            json!({"JSON": "{broken", "Property Name": "a"}),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("parsing JSON"));
    }

    #[tokio::test]
    async fn write_property_creates_nested_objects() {
        let outputs = run(
            &WritePropertyToJsonExecutor,
            "write_property_to_json",
            json!({"JSON": "{}", "Property Name": "customer.address.city", "Property Value": "Oslo"}),
        )
        .await
        .unwrap();
        let updated: Value =
            serde_json::from_str(outputs.get("Updated JSON").and_then(|v| v.as_str()).unwrap())
                .unwrap();
        assert_eq!(updated["customer"]["address"]["city"], json!("Oslo"));
    }

    #[tokio::test]
    async fn transform_applies_paths_defaults_and_types() {
        let outputs = run(
            &JsonTransformExecutor,
            "json_transform",
            json!({
                "Input JSON": r#"{"product": {"price": "19.5", "name": "Widget"}}"#,
                "Transform Rules": {
                    "title": "$.product.name",
                    "price": {"path": "product.price", "type": "number"},
                    "stock": {"path": "product.stock", "default": 0},
                    "source": {"value": "catalog"}
                }
            }),
        )
        .await
        .unwrap();
        let transformed: Value = serde_json::from_str(
            outputs
                .get("Transformed JSON")
                .and_then(|v| v.as_str())
                .unwrap(),
        )
        .unwrap();
        assert_eq!(transformed["title"], json!("Widget"));
        assert_eq!(transformed["price"], json!(19.5));
        assert_eq!(transformed["stock"], json!(0));
        assert_eq!(transformed["source"], json!("catalog"));
    }

    #[tokio::test]
    async fn merge_overwrite_takes_later_values() {
        let outputs = run(
            &MergeDataExecutor,
            "merge_data",
            json!({
                "Data 1": r#"{"a": 1, "b": 1}"#,
                "Data 2": r#"{"b": 2}"#,
            }),
        )
        .await
        .unwrap();
        let merged: Value =
            serde_json::from_str(outputs.get("Merged Data").and_then(|v| v.as_str()).unwrap())
                .unwrap();
        assert_eq!(merged["a"], json!(1));
        assert_eq!(merged["b"], json!(2));
    }

    #[tokio::test]
    async fn merge_append_concatenates_arrays() {
        let outputs = run(
            &MergeDataExecutor,
            "merge_data",
            json!({
                "Data 1": r#"{"items": [1, 2]}"#,
                "Data 2": r#"{"items": [3]}"#,
                "Merge Strategy": "append",
            }),
        )
        .await
        .unwrap();
        let merged: Value =
            serde_json::from_str(outputs.get("Merged Data").and_then(|v| v.as_str()).unwrap())
                .unwrap();
        assert_eq!(merged["items"], json!([1, 2, 3]));
    }

    #[tokio::test]
    async fn merge_wraps_non_object_inputs() {
        let outputs = run(
            &MergeDataExecutor,
            "merge_data",
            json!({
                "Data 1": r#"{"a": 1}"#,
                "Data 2": "plain text",
            }),
        )
        .await
        .unwrap();
        let merged: Value =
            serde_json::from_str(outputs.get("Merged Data").and_then(|v| v.as_str()).unwrap())
                .unwrap();
        assert_eq!(merged["a"], json!(1));
        assert_eq!(merged["input_2"], json!("plain text"));
    }
}

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::engine::environment::{Environment, NodeSnapshot};
use crate::engine::{EngineError, ExecutorServices};
use crate::models::execution_log::LogLevel;

use super::{require_str, require_value, NodeExecutor};

/// Operand after normalization: numeric when the raw value parses as a
/// number, textual otherwise.
#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Number(f64),
    Text(String),
    Bool(bool),
    Other(Value),
}

fn convert_operand(value: &Value) -> Operand {
    match value {
        Value::Number(n) => n
            .as_f64()
            .map(Operand::Number)
            .unwrap_or_else(|| Operand::Other(value.clone())),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(parsed) = trimmed.parse::<f64>() {
                Operand::Number(parsed)
            } else {
                Operand::Text(s.clone())
            }
        }
        Value::Bool(b) => Operand::Bool(*b),
        other => Operand::Other(other.clone()),
    }
}

fn operand_as_text(operand: &Operand) -> String {
    match operand {
        Operand::Number(n) => n.to_string(),
        Operand::Text(s) => s.clone(),
        Operand::Bool(b) => b.to_string(),
        Operand::Other(v) => v.to_string(),
    }
}

fn compare_ordered(
    left: &Operand,
    right: &Operand,
    op: fn(f64, f64) -> bool,
    text_op: fn(&str, &str) -> bool,
) -> Result<bool, EngineError> {
    match (left, right) {
        (Operand::Number(a), Operand::Number(b)) => Ok(op(*a, *b)),
        (Operand::Text(a), Operand::Text(b)) => Ok(text_op(a, b)),
        _ => Err(EngineError::Executor(
            "cannot order values of different types".to_string(),
        )),
    }
}

fn evaluate(left: &Operand, operator: &str, right: &Operand) -> Result<bool, EngineError> {
    let op = operator.trim().to_lowercase();
    match op.as_str() {
        "==" | "equals" => Ok(left == right || operand_as_text(left) == operand_as_text(right)),
        "!=" | "not equals" => {
            Ok(!(left == right || operand_as_text(left) == operand_as_text(right)))
        }
        "<" | "less than" => compare_ordered(left, right, |a, b| a < b, |a, b| a < b),
        ">" | "greater than" => compare_ordered(left, right, |a, b| a > b, |a, b| a > b),
        "<=" | "less than or equal" => compare_ordered(left, right, |a, b| a <= b, |a, b| a <= b),
        ">=" | "greater than or equal" => {
            compare_ordered(left, right, |a, b| a >= b, |a, b| a >= b)
        }
        "contains" | "includes" => {
            Ok(operand_as_text(left).contains(&operand_as_text(right)))
        }
        "not contains" | "does not contain" | "not includes" => {
            Ok(!operand_as_text(left).contains(&operand_as_text(right)))
        }
        _ => Err(EngineError::Executor(format!(
            "unsupported operator: {operator}"
        ))),
    }
}

/// Evaluates a comparison and emits routing hints. Exactly one of
/// `True Path`/`False Path` carries "execute"; downstream nodes consume the
/// outputs like any others — the runner does not prune on them.
pub struct BranchExecutor;

#[async_trait]
impl NodeExecutor for BranchExecutor {
    fn name(&self) -> &'static str {
        "Branch Node"
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &["Left Value", "Operator", "Right Value"]
    }

    async fn run(
        &self,
        node: &NodeSnapshot,
        phase_id: Uuid,
        env: &mut Environment,
        _services: &ExecutorServices,
    ) -> Result<Map<String, Value>, EngineError> {
        self.validate(node)?;
        let left_raw = require_value(node, "Left Value")?.clone();
        let operator = require_str(node, "Operator")?.to_string();
        let right_raw = require_value(node, "Right Value")?.clone();

        env.add_log(
            phase_id,
            LogLevel::Info,
            format!("Evaluating condition: '{left_raw}' {operator} '{right_raw}'"),
        );

        let left = convert_operand(&left_raw);
        let right = convert_operand(&right_raw);
        let result = evaluate(&left, &operator, &right)?;

        env.add_log(phase_id, LogLevel::Info, format!("Condition result: {result}"));

        let mut outputs = Map::new();
        outputs.insert(
            "True Path".to_string(),
            if result {
                Value::String("execute".to_string())
            } else {
                Value::Null
            },
        );
        outputs.insert(
            "False Path".to_string(),
            if result {
                Value::Null
            } else {
                Value::String("execute".to_string())
            },
        );
        outputs.insert("Result".to_string(), Value::Bool(result));
        outputs.insert("Data".to_string(), left_raw);
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::nodes::tests_support::{snapshot, test_services};
    use serde_json::json;

    async fn run_branch(inputs: Value) -> Result<Map<String, Value>, EngineError> {
        let services = test_services();
        let mut env = Environment::new();
        let phase_id = Uuid::new_v4();
        env.create_phase(phase_id, "branch");
        BranchExecutor
            .run(&snapshot("branch", inputs), phase_id, &mut env, &services)
            .await
    }

    #[tokio::test]
    async fn numeric_greater_than_routes_true_path() {
        let outputs = run_branch(json!({
            "Left Value": 10, "Operator": ">", "Right Value": 5
        }))
        .await
        .unwrap();

        assert_eq!(outputs.get("True Path"), Some(&json!("execute")));
        assert_eq!(outputs.get("False Path"), Some(&Value::Null));
        assert_eq!(outputs.get("Result"), Some(&json!(true)));
        assert_eq!(outputs.get("Data"), Some(&json!(10)));
    }

    #[tokio::test]
    async fn numeric_strings_compare_numerically() {
        let outputs = run_branch(json!({
            "Left Value": "10", "Operator": "<", "Right Value": "9"
        }))
        .await
        .unwrap();
        assert_eq!(outputs.get("Result"), Some(&json!(false)));
        assert_eq!(outputs.get("False Path"), Some(&json!("execute")));
    }

    #[tokio::test]
    async fn contains_uses_textual_comparison() {
        let outputs = run_branch(json!({
            "Left Value": "hello world", "Operator": "contains", "Right Value": "world"
        }))
        .await
        .unwrap();
        assert_eq!(outputs.get("Result"), Some(&json!(true)));

        let outputs = run_branch(json!({
            "Left Value": "hello world", "Operator": "not contains", "Right Value": "mars"
        }))
        .await
        .unwrap();
        assert_eq!(outputs.get("Result"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn equality_spans_spellings_and_operators() {
        for operator in ["==", "equals"] {
            let outputs = run_branch(json!({
                "Left Value": "a", "Operator": operator, "Right Value": "a"
            }))
            .await
            .unwrap();
            assert_eq!(outputs.get("Result"), Some(&json!(true)));
        }

        let outputs = run_branch(json!({
            "Left Value": 1, "Operator": "!=", "Right Value": 2
        }))
        .await
        .unwrap();
        assert_eq!(outputs.get("Result"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn ordering_mixed_types_fails() {
        let err = run_branch(json!({
            "Left Value": "abc", "Operator": ">", "Right Value": 3
        }))
        .await
        .unwrap_err();
        assert!(err.to_string().contains("different types"));
    }

    #[tokio::test]
    async fn unknown_operator_fails() {
        let err = run_branch(json!({
            "Left Value": 1, "Operator": "xor", "Right Value": 2
        }))
        .await
        .unwrap_err();
        assert!(err.to_string().contains("unsupported operator"));
    }
}

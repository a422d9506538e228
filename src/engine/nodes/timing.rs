use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::engine::environment::{Environment, NodeSnapshot};
use crate::engine::{EngineError, ExecutorServices};
use crate::models::execution_log::LogLevel;
use crate::services::browser::Visibility;

use super::{optional_str, require_f64, require_str, NodeExecutor};

const WAIT_FOR_ELEMENT_TIMEOUT_MS: u64 = 50_000;

pub struct WaitForElementExecutor;

#[async_trait]
impl NodeExecutor for WaitForElementExecutor {
    fn name(&self) -> &'static str {
        "Wait For Element Node"
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &["Selector", "Visibility"]
    }

    fn validate(&self, node: &NodeSnapshot) -> Result<(), EngineError> {
        for key in self.required_inputs() {
            if !node.inputs.contains_key(*key) {
                return Err(EngineError::MissingInput {
                    node: self.name().to_string(),
                    input: (*key).to_string(),
                });
            }
        }
        let visibility = optional_str(node, "Visibility").unwrap_or("visible");
        if Visibility::parse(visibility).is_none() {
            return Err(EngineError::Executor(
                "visibility must be either 'visible' or 'hidden'".to_string(),
            ));
        }
        Ok(())
    }

    async fn run(
        &self,
        node: &NodeSnapshot,
        phase_id: Uuid,
        env: &mut Environment,
        _services: &ExecutorServices,
    ) -> Result<Map<String, Value>, EngineError> {
        self.validate(node)?;
        let selector = require_str(node, "Selector")?.to_string();
        let visibility_raw = optional_str(node, "Visibility").unwrap_or("visible");
        let visibility = Visibility::parse(visibility_raw).ok_or_else(|| {
            EngineError::Executor("visibility must be either 'visible' or 'hidden'".to_string())
        })?;

        env.add_log(
            phase_id,
            LogLevel::Info,
            format!("Waiting for element {selector} to be {visibility_raw}"),
        );

        let browser = env
            .browser
            .as_mut()
            .ok_or_else(|| EngineError::Executor("no page found in environment".to_string()))?;
        let appeared = browser
            .wait_for_selector(&selector, visibility, WAIT_FOR_ELEMENT_TIMEOUT_MS)
            .await
            .map_err(|e| EngineError::Executor(e.to_string()))?;

        if !appeared {
            return Err(EngineError::Executor(format!(
                "element '{selector}' did not reach state '{visibility_raw}' before the timeout expired"
            )));
        }

        env.add_log(
            phase_id,
            LogLevel::Info,
            format!("Element '{selector}' reached state '{visibility_raw}'"),
        );

        let mut outputs = Map::new();
        outputs.insert("element_appeared".to_string(), Value::Bool(true));
        Ok(outputs)
    }
}

pub struct DelayExecutor;

#[async_trait]
impl NodeExecutor for DelayExecutor {
    fn name(&self) -> &'static str {
        "Wait Node"
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &["Duration"]
    }

    async fn run(
        &self,
        node: &NodeSnapshot,
        phase_id: Uuid,
        env: &mut Environment,
        _services: &ExecutorServices,
    ) -> Result<Map<String, Value>, EngineError> {
        self.validate(node)?;
        let duration_secs = require_f64(node, "Duration")?;
        if !duration_secs.is_finite() || duration_secs < 0.0 {
            return Err(EngineError::Executor(
                "duration must be a non-negative number of seconds".to_string(),
            ));
        }

        env.add_log(
            phase_id,
            LogLevel::Info,
            format!("Waiting for {duration_secs} seconds"),
        );
        tokio::time::sleep(Duration::from_secs_f64(duration_secs)).await;

        let mut outputs = Map::new();
        outputs.insert("waited".to_string(), Value::Bool(true));
        Ok(outputs)
    }
}

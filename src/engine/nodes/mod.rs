mod browser;
mod delivery;
mod extraction;
mod flow_control;
mod processing;
mod timing;

use std::collections::HashMap;
use std::sync::OnceLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::environment::{Environment, NodeSnapshot};
use super::{EngineError, ExecutorServices};

pub use browser::{ClickElementExecutor, FillInputExecutor, LaunchBrowserExecutor};
pub use delivery::{DeliverToWebhookExecutor, EmailDeliveryExecutor, SendSmsExecutor};
pub use extraction::{CondenseHtmlExecutor, ExtractDataOpenAiExecutor, GetHtmlExecutor, GetTextFromHtmlExecutor};
pub use flow_control::BranchExecutor;
pub use processing::{
    JsonTransformExecutor, MergeDataExecutor, ReadPropertyFromJsonExecutor,
    WritePropertyToJsonExecutor,
};
pub use timing::{DelayExecutor, WaitForElementExecutor};

/// Edges carrying this handle mark a browser-page dependency; the value is
/// satisfied by the environment, never wired as an input.
pub const WEB_PAGE_HANDLE: &str = "Web Page";

/// The closed set of executable node types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    LaunchStandardBrowser,
    LaunchStealthBrowser,
    LaunchBrightDataBrowser,
    FillInput,
    ClickElement,
    WaitForElement,
    Delay,
    GetHtml,
    GetTextFromHtml,
    CondenseHtml,
    ExtractDataOpenai,
    ReadPropertyFromJson,
    WritePropertyToJson,
    JsonTransform,
    MergeData,
    Branch,
    DeliverToWebhook,
    EmailDelivery,
    SendSms,
}

impl NodeType {
    pub const ALL: [NodeType; 19] = [
        NodeType::LaunchStandardBrowser,
        NodeType::LaunchStealthBrowser,
        NodeType::LaunchBrightDataBrowser,
        NodeType::FillInput,
        NodeType::ClickElement,
        NodeType::WaitForElement,
        NodeType::Delay,
        NodeType::GetHtml,
        NodeType::GetTextFromHtml,
        NodeType::CondenseHtml,
        NodeType::ExtractDataOpenai,
        NodeType::ReadPropertyFromJson,
        NodeType::WritePropertyToJson,
        NodeType::JsonTransform,
        NodeType::MergeData,
        NodeType::Branch,
        NodeType::DeliverToWebhook,
        NodeType::EmailDelivery,
        NodeType::SendSms,
    ];

    pub fn parse(value: &str) -> Option<Self> {
        serde_json::from_value(Value::String(value.to_string())).ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::LaunchStandardBrowser => "launch_standard_browser",
            NodeType::LaunchStealthBrowser => "launch_stealth_browser",
            NodeType::LaunchBrightDataBrowser => "launch_bright_data_browser",
            NodeType::FillInput => "fill_input",
            NodeType::ClickElement => "click_element",
            NodeType::WaitForElement => "wait_for_element",
            NodeType::Delay => "delay",
            NodeType::GetHtml => "get_html",
            NodeType::GetTextFromHtml => "get_text_from_html",
            NodeType::CondenseHtml => "condense_html",
            NodeType::ExtractDataOpenai => "extract_data_openai",
            NodeType::ReadPropertyFromJson => "read_property_from_json",
            NodeType::WritePropertyToJson => "write_property_to_json",
            NodeType::JsonTransform => "json_transform",
            NodeType::MergeData => "merge_data",
            NodeType::Branch => "branch",
            NodeType::DeliverToWebhook => "deliver_to_webhook",
            NodeType::EmailDelivery => "email_delivery",
            NodeType::SendSms => "send_sms",
        }
    }

    /// Credits debited before the node runs.
    pub fn credit_cost(&self) -> i32 {
        match self {
            NodeType::LaunchStandardBrowser => 5,
            NodeType::LaunchStealthBrowser => 6,
            NodeType::LaunchBrightDataBrowser => 10,
            NodeType::FillInput => 1,
            NodeType::ClickElement => 1,
            NodeType::WaitForElement => 1,
            NodeType::Delay => 1,
            NodeType::GetHtml => 2,
            NodeType::GetTextFromHtml => 2,
            NodeType::CondenseHtml => 2,
            NodeType::ExtractDataOpenai => 4,
            NodeType::ReadPropertyFromJson => 1,
            NodeType::WritePropertyToJson => 1,
            NodeType::JsonTransform => 2,
            NodeType::MergeData => 1,
            NodeType::Branch => 1,
            NodeType::DeliverToWebhook => 2,
            NodeType::EmailDelivery => 3,
            NodeType::SendSms => 2,
        }
    }

    pub fn can_start(&self) -> bool {
        matches!(
            self,
            NodeType::LaunchStandardBrowser
                | NodeType::LaunchStealthBrowser
                | NodeType::LaunchBrightDataBrowser
        )
    }
}

/// Uniform contract for node executors. Executors never touch persistent
/// storage; they return outputs and buffer logs on the current phase.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    fn name(&self) -> &'static str;

    fn required_inputs(&self) -> &'static [&'static str] {
        &[]
    }

    /// Fails fast when a required input is absent. The browser-page handle
    /// is drawn from the environment, not from inputs.
    fn validate(&self, node: &NodeSnapshot) -> Result<(), EngineError> {
        for key in self.required_inputs() {
            if *key != WEB_PAGE_HANDLE && !node.inputs.contains_key(*key) {
                return Err(EngineError::MissingInput {
                    node: self.name().to_string(),
                    input: (*key).to_string(),
                });
            }
        }
        Ok(())
    }

    async fn run(
        &self,
        node: &NodeSnapshot,
        phase_id: Uuid,
        env: &mut Environment,
        services: &ExecutorServices,
    ) -> Result<Map<String, Value>, EngineError>;
}

fn build_executor(node_type: NodeType) -> Box<dyn NodeExecutor> {
    match node_type {
        NodeType::LaunchStandardBrowser => {
            Box::new(LaunchBrowserExecutor::standard())
        }
        NodeType::LaunchStealthBrowser => Box::new(LaunchBrowserExecutor::stealth()),
        NodeType::LaunchBrightDataBrowser => {
            Box::new(LaunchBrowserExecutor::bright_data())
        }
        NodeType::FillInput => Box::new(FillInputExecutor),
        NodeType::ClickElement => Box::new(ClickElementExecutor),
        NodeType::WaitForElement => Box::new(WaitForElementExecutor),
        NodeType::Delay => Box::new(DelayExecutor),
        NodeType::GetHtml => Box::new(GetHtmlExecutor),
        NodeType::GetTextFromHtml => Box::new(GetTextFromHtmlExecutor),
        NodeType::CondenseHtml => Box::new(CondenseHtmlExecutor),
        NodeType::ExtractDataOpenai => Box::new(ExtractDataOpenAiExecutor),
        NodeType::ReadPropertyFromJson => Box::new(ReadPropertyFromJsonExecutor),
        NodeType::WritePropertyToJson => Box::new(WritePropertyToJsonExecutor),
        NodeType::JsonTransform => Box::new(JsonTransformExecutor),
        NodeType::MergeData => Box::new(MergeDataExecutor),
        NodeType::Branch => Box::new(BranchExecutor),
        NodeType::DeliverToWebhook => Box::new(DeliverToWebhookExecutor),
        NodeType::EmailDelivery => Box::new(EmailDeliveryExecutor),
        NodeType::SendSms => Box::new(SendSmsExecutor),
    }
}

static REGISTRY: OnceLock<HashMap<NodeType, Box<dyn NodeExecutor>>> = OnceLock::new();

pub fn executor_for(node_type: NodeType) -> Option<&'static dyn NodeExecutor> {
    let registry = REGISTRY.get_or_init(|| {
        NodeType::ALL
            .into_iter()
            .map(|t| (t, build_executor(t)))
            .collect()
    });
    registry.get(&node_type).map(|b| b.as_ref())
}

// Shared input accessors; executors read their handles through these so the
// error text stays uniform.

pub(crate) fn require_str<'a>(node: &'a NodeSnapshot, key: &str) -> Result<&'a str, EngineError> {
    node.inputs
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| EngineError::Executor(format!("input '{key}' must be a string")))
}

pub(crate) fn optional_str<'a>(node: &'a NodeSnapshot, key: &str) -> Option<&'a str> {
    node.inputs.get(key).and_then(|v| v.as_str())
}

pub(crate) fn require_value<'a>(node: &'a NodeSnapshot, key: &str) -> Result<&'a Value, EngineError> {
    node.inputs
        .get(key)
        .ok_or_else(|| EngineError::Executor(format!("input '{key}' is missing")))
}

/// Accepts numbers or numeric strings, the way authored inputs arrive.
pub(crate) fn require_f64(node: &NodeSnapshot, key: &str) -> Result<f64, EngineError> {
    let value = require_value(node, key)?;
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| EngineError::Executor(format!("input '{key}' is not a valid number"))),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| EngineError::Executor(format!("input '{key}' is not a valid number"))),
        _ => Err(EngineError::Executor(format!(
            "input '{key}' is not a valid number"
        ))),
    }
}

/// Credential references arrive as UUID strings.
pub(crate) fn require_credential_id(node: &NodeSnapshot, key: &str) -> Result<Uuid, EngineError> {
    let raw = require_str(node, key)?;
    Uuid::parse_str(raw.trim())
        .map_err(|_| EngineError::Executor(format!("input '{key}' is not a credential id")))
}

/// Stringifies scalar inputs; objects and arrays serialize to JSON.
pub(crate) fn text_input(node: &NodeSnapshot, key: &str) -> Result<String, EngineError> {
    let value = require_value(node, key)?;
    Ok(match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    })
}

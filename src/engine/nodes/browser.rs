use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::engine::environment::{Environment, NodeSnapshot};
use crate::engine::{EngineError, ExecutorServices};
use crate::models::execution_log::LogLevel;
use crate::services::browser::{BrowserKind, ProxyCredentials};
use crate::utils::mask::mask_secret;

use super::{require_credential_id, require_str, NodeExecutor, WEB_PAGE_HANDLE};

/// Launches (or reuses) the execution's browser and navigates it. One
/// executor per launch flavor; the flavor decides the driver kind and the
/// credential requirements.
pub struct LaunchBrowserExecutor {
    kind: BrowserKind,
    name: &'static str,
    required: &'static [&'static str],
}

impl LaunchBrowserExecutor {
    pub fn standard() -> Self {
        LaunchBrowserExecutor {
            kind: BrowserKind::Standard,
            name: "Standard Browser Node",
            required: &["Website URL"],
        }
    }

    pub fn stealth() -> Self {
        LaunchBrowserExecutor {
            kind: BrowserKind::Stealth,
            name: "Stealth Browser Node",
            required: &["Website URL"],
        }
    }

    pub fn bright_data() -> Self {
        LaunchBrowserExecutor {
            kind: BrowserKind::BrightData,
            name: "Bright Data Browser Node",
            required: &[
                "Website URL",
                "Bright Data Browser Username",
                "Bright Data Browser Password",
            ],
        }
    }

    async fn proxy_credentials(
        &self,
        node: &NodeSnapshot,
        phase_id: Uuid,
        env: &mut Environment,
        services: &ExecutorServices,
    ) -> Result<Option<ProxyCredentials>, EngineError> {
        if self.kind != BrowserKind::BrightData {
            return Ok(None);
        }

        let username = require_str(node, "Bright Data Browser Username")?.to_string();
        let credential_id = require_credential_id(node, "Bright Data Browser Password")?;

        env.add_log(
            phase_id,
            LogLevel::Info,
            "Retrieving proxy password from secret storage",
        );
        let password = services.secrets.resolve_credential(credential_id).await?;
        env.add_log(
            phase_id,
            LogLevel::Info,
            format!("Proxy password retrieved ({})", mask_secret(&password)),
        );

        Ok(Some(ProxyCredentials { username, password }))
    }
}

#[async_trait]
impl NodeExecutor for LaunchBrowserExecutor {
    fn name(&self) -> &'static str {
        self.name
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        self.required
    }

    async fn run(
        &self,
        node: &NodeSnapshot,
        phase_id: Uuid,
        env: &mut Environment,
        services: &ExecutorServices,
    ) -> Result<Map<String, Value>, EngineError> {
        self.validate(node)?;
        let url = require_str(node, "Website URL")?.to_string();

        if env.browser.is_none() {
            let proxy = self.proxy_credentials(node, phase_id, env, services).await?;
            // Proxy-backed sessions run headless regardless of the local
            // toggle; there is no display on the proxy side.
            let headless = if self.kind == BrowserKind::BrightData {
                true
            } else {
                services.browser_headless
            };

            env.add_log(
                phase_id,
                LogLevel::Info,
                format!("Launching {} to {url}...", self.name),
            );
            let driver = services
                .browser_factory
                .launch(self.kind, headless, proxy)
                .await?;
            env.browser = Some(driver);
            env.add_log(phase_id, LogLevel::Info, "Browser launched successfully");
        }

        env.add_log(phase_id, LogLevel::Info, format!("Navigating to {url}..."));
        let browser = env
            .browser
            .as_mut()
            .ok_or_else(|| EngineError::Executor("failed to create browser".to_string()))?;
        browser.navigate(&url).await?;
        env.add_log(phase_id, LogLevel::Info, format!("Successfully loaded {url}"));

        let mut outputs = Map::new();
        outputs.insert(WEB_PAGE_HANDLE.to_string(), Value::Bool(true));
        Ok(outputs)
    }
}

pub struct FillInputExecutor;

#[async_trait]
impl NodeExecutor for FillInputExecutor {
    fn name(&self) -> &'static str {
        "Fill Input Node"
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &["Selector", "Value", WEB_PAGE_HANDLE]
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
        let value = require_str(node, "Value")?.to_string();

        env.add_log(
            phase_id,
            LogLevel::Info,
            format!("Filling input '{selector}'"),
        );

        let browser = env.browser.as_mut().ok_or_else(|| {
            EngineError::Executor(
                "no browser found in environment; launch a browser first".to_string(),
            )
        })?;
        browser.fill(&selector, &value).await.map_err(|e| {
            EngineError::Executor(format!("could not fill input '{selector}': {e}"))
        })?;

        env.add_log(
            phase_id,
            LogLevel::Info,
            format!("Filled '{selector}' successfully"),
        );

        let mut outputs = Map::new();
        outputs.insert(WEB_PAGE_HANDLE.to_string(), Value::Bool(true));
        Ok(outputs)
    }
}

pub struct ClickElementExecutor;

#[async_trait]
impl NodeExecutor for ClickElementExecutor {
    fn name(&self) -> &'static str {
        "Click Element Node"
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &["Selector", WEB_PAGE_HANDLE]
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

        env.add_log(
            phase_id,
            LogLevel::Info,
            format!("Clicking element {selector}"),
        );

        let browser = env.browser.as_mut().ok_or_else(|| {
            EngineError::Executor(
                "no browser found in environment; launch a browser first".to_string(),
            )
        })?;
        browser.click(&selector).await.map_err(|e| {
            EngineError::Executor(format!("could not click element '{selector}': {e}"))
        })?;

        env.add_log(
            phase_id,
            LogLevel::Info,
            format!("Clicked '{selector}' successfully"),
        );

        let mut outputs = Map::new();
        outputs.insert(WEB_PAGE_HANDLE.to_string(), Value::Bool(true));
        Ok(outputs)
    }
}

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::engine::environment::{Environment, NodeSnapshot};
use crate::engine::{EngineError, ExecutorServices};
use crate::models::execution_log::LogLevel;

use super::{optional_str, require_credential_id, require_str, text_input, NodeExecutor};

const EXTRACTION_SYSTEM_PROMPT: &str = "You are a webscraper helper that extracts data from \
HTML or text. You will be given a piece of text or HTML content as input and a prompt \
describing the data to extract. Respond with only the extracted data as a JSON array or \
object, without any additional words or explanations. Analyze the input carefully and \
extract data precisely based on the prompt. If no data is found, return an empty JSON \
array. Work only with the provided content and ensure the output is always valid JSON \
without any surrounding text.";

pub struct GetHtmlExecutor;

#[async_trait]
impl NodeExecutor for GetHtmlExecutor {
    fn name(&self) -> &'static str {
        "Get HTML Node"
    }

    async fn run(
        &self,
        node: &NodeSnapshot,
        phase_id: Uuid,
        env: &mut Environment,
        _services: &ExecutorServices,
    ) -> Result<Map<String, Value>, EngineError> {
        self.validate(node)?;
        env.add_log(phase_id, LogLevel::Info, "Getting page HTML...");

        let browser = env
            .browser
            .as_mut()
            .ok_or_else(|| EngineError::Executor("no browser page found in environment".to_string()))?;
        let html = browser.content().await?;

        env.add_log(phase_id, LogLevel::Info, "HTML content retrieved");

        let mut outputs = Map::new();
        outputs.insert("Html Content".to_string(), Value::String(html));
        Ok(outputs)
    }
}

fn extract_text(html: &str, selector: &str) -> Result<String, EngineError> {
    let document = Html::parse_document(html);
    let parsed = Selector::parse(selector)
        .map_err(|e| EngineError::Executor(format!("invalid selector '{selector}': {e}")))?;

    let mut pieces = Vec::new();
    for element in document.select(&parsed) {
        let text: String = element.text().collect::<Vec<_>>().join(" ");
        let trimmed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if !trimmed.is_empty() {
            pieces.push(trimmed);
        }
    }

    if pieces.is_empty() {
        return Err(EngineError::Executor(format!(
            "no elements matched selector '{selector}'"
        )));
    }
    Ok(pieces.join("\n"))
}

pub struct GetTextFromHtmlExecutor;

#[async_trait]
impl NodeExecutor for GetTextFromHtmlExecutor {
    fn name(&self) -> &'static str {
        "Get Text From HTML Node"
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &["Html", "Selector"]
    }

    async fn run(
        &self,
        node: &NodeSnapshot,
        phase_id: Uuid,
        env: &mut Environment,
        _services: &ExecutorServices,
    ) -> Result<Map<String, Value>, EngineError> {
        self.validate(node)?;
        let html = require_str(node, "Html")?;
        let selector = require_str(node, "Selector")?;

        let text = extract_text(html, selector)?;
        env.add_log(
            phase_id,
            LogLevel::Info,
            format!("Extracted text for selector '{selector}'"),
        );

        let mut outputs = Map::new();
        outputs.insert("Text".to_string(), Value::String(text));
        Ok(outputs)
    }
}

fn scope_to_selector(html: &str, selector: &str) -> Result<String, EngineError> {
    let document = Html::parse_document(html);
    let parsed = Selector::parse(selector)
        .map_err(|e| EngineError::Executor(format!("invalid selector '{selector}': {e}")))?;
    document
        .select(&parsed)
        .next()
        .map(|element| element.html())
        .ok_or_else(|| {
            EngineError::Executor(format!("no elements matched selector '{selector}'"))
        })
}

/// Drops `<script>`/`<style>` spans and HTML comments, then collapses
/// whitespace. Case-insensitive scan over the raw markup; the result is
/// still HTML, just smaller.
fn strip_noise(html: &str) -> String {
    fn remove_spans(input: &str, open: &str, close: &str) -> String {
        // ASCII lowering keeps byte offsets aligned with the original.
        let lower = input.to_ascii_lowercase();
        let mut out = String::with_capacity(input.len());
        let mut cursor = 0;
        while let Some(start_rel) = lower[cursor..].find(open) {
            let start = cursor + start_rel;
            out.push_str(&input[cursor..start]);
            match lower[start..].find(close) {
                Some(end_rel) => cursor = start + end_rel + close.len(),
                None => {
                    cursor = input.len();
                    break;
                }
            }
        }
        out.push_str(&input[cursor..]);
        out
    }

    let without_scripts = remove_spans(html, "<script", "</script>");
    let without_styles = remove_spans(&without_scripts, "<style", "</style>");
    let without_comments = remove_spans(&without_styles, "<!--", "-->");
    without_comments
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct CondenseHtmlExecutor;

#[async_trait]
impl NodeExecutor for CondenseHtmlExecutor {
    fn name(&self) -> &'static str {
        "Condense HTML Node"
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &["Html"]
    }

    async fn run(
        &self,
        node: &NodeSnapshot,
        phase_id: Uuid,
        env: &mut Environment,
        _services: &ExecutorServices,
    ) -> Result<Map<String, Value>, EngineError> {
        self.validate(node)?;
        let html = require_str(node, "Html")?.to_string();

        let scoped = match optional_str(node, "Selector") {
            Some(selector) if !selector.trim().is_empty() => scope_to_selector(&html, selector)?,
            _ => html,
        };

        let mut condensed = strip_noise(&scoped);

        if let Some(raw_max) = node.inputs.get("Max Length") {
            let max_len = match raw_max {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.trim().parse::<u64>().ok(),
                _ => None,
            };
            if let Some(max_len) = max_len {
                let max_len = max_len as usize;
                if condensed.len() > max_len {
                    let cut = condensed
                        .char_indices()
                        .map(|(i, c)| i + c.len_utf8())
                        .take_while(|end| *end <= max_len)
                        .last()
                        .unwrap_or(0);
                    condensed.truncate(cut);
                }
            }
        }

        env.add_log(
            phase_id,
            LogLevel::Info,
            format!("Condensed HTML to {} bytes", condensed.len()),
        );

        let mut outputs = Map::new();
        outputs.insert("Reduced Html".to_string(), Value::String(condensed));
        Ok(outputs)
    }
}

pub struct ExtractDataOpenAiExecutor;

#[async_trait]
impl NodeExecutor for ExtractDataOpenAiExecutor {
    fn name(&self) -> &'static str {
        "OpenAI Extraction Node"
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &["API Key", "Prompt", "Content"]
    }

    async fn run(
        &self,
        node: &NodeSnapshot,
        phase_id: Uuid,
        env: &mut Environment,
        services: &ExecutorServices,
    ) -> Result<Map<String, Value>, EngineError> {
        self.validate(node)?;
        let credential_id = require_credential_id(node, "API Key")?;
        let prompt = require_str(node, "Prompt")?.to_string();
        let content = text_input(node, "Content")?;

        let preview: String = prompt.chars().take(30).collect();
        env.add_log(
            phase_id,
            LogLevel::Info,
            format!("Starting AI call with prompt: {preview}..."),
        );

        // The key lives in this local only; it never reaches outputs or logs.
        let api_key = services.secrets.resolve_credential(credential_id).await?;
        let response = services
            .llm
            .chat(
                &api_key,
                &services.llm_model,
                EXTRACTION_SYSTEM_PROMPT,
                vec![prompt, content],
            )
            .await?;

        env.add_log(phase_id, LogLevel::Info, "AI call completed");

        let mut outputs = Map::new();
        outputs.insert("Extracted Data".to_string(), Value::String(response));
        Ok(outputs)
    }
}

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::engine::environment::{Environment, NodeSnapshot};
use crate::engine::{EngineError, ExecutorServices};
use crate::models::execution_log::LogLevel;
use crate::services::mailer::{MailAttachment, OutgoingEmail, SmtpConfig, TlsMode};

use super::{
    optional_str, require_credential_id, require_f64, require_str, text_input, NodeExecutor,
};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(15);
const RESPONSE_BODY_LIMIT: usize = 5000;

fn is_valid_email_address(value: &str) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.contains(' ') {
        return false;
    }
    let mut parts = trimmed.split('@');
    let local = parts.next().unwrap_or("");
    let domain = match parts.next() {
        Some(d) => d,
        None => return false,
    };
    if parts.next().is_some() {
        return false;
    }
    if local.is_empty() || domain.is_empty() {
        return false;
    }
    if domain.starts_with('.') || domain.ends_with('.') {
        return false;
    }
    domain.contains('.')
}

fn parse_recipient_list(raw: &str) -> Result<Vec<String>, EngineError> {
    let mut recipients = Vec::new();
    let mut seen = HashSet::new();
    for entry in raw.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
        if !is_valid_email_address(entry) {
            return Err(EngineError::Executor(format!(
                "invalid recipient email: {entry}"
            )));
        }
        let lowered = entry.to_lowercase();
        if !seen.insert(lowered) {
            return Err(EngineError::Executor(format!(
                "duplicate recipient email: {entry}"
            )));
        }
        recipients.push(entry.to_string());
    }
    if recipients.is_empty() {
        return Err(EngineError::Executor(
            "recipient email(s) required".to_string(),
        ));
    }
    Ok(recipients)
}

/// POSTs a payload to a webhook. Delivery failures are reported in the
/// outputs rather than failing the phase; the caller decided to fire and
/// forget when it chose this node.
pub struct DeliverToWebhookExecutor;

#[async_trait]
impl NodeExecutor for DeliverToWebhookExecutor {
    fn name(&self) -> &'static str {
        "Deliver To Webhook Node"
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &["Webhook URL", "Payload"]
    }

    async fn run(
        &self,
        node: &NodeSnapshot,
        phase_id: Uuid,
        env: &mut Environment,
        services: &ExecutorServices,
    ) -> Result<Map<String, Value>, EngineError> {
        self.validate(node)?;
        let url = require_str(node, "Webhook URL")?.to_string();
        let payload = text_input(node, "Payload")?;
        let content_type = optional_str(node, "Content Type").unwrap_or("application/json");
        let auth_type = optional_str(node, "Authorization Type")
            .unwrap_or("none")
            .to_lowercase();
        let auth_value = optional_str(node, "Authorization Value").unwrap_or("");

        let mut request = services
            .http
            .post(&url)
            .timeout(WEBHOOK_TIMEOUT)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(payload);

        match auth_type.as_str() {
            "basic" if !auth_value.is_empty() => {
                let encoded = STANDARD.encode(auth_value.as_bytes());
                request = request.header(reqwest::header::AUTHORIZATION, format!("Basic {encoded}"));
            }
            "bearer" if !auth_value.is_empty() => {
                request =
                    request.header(reqwest::header::AUTHORIZATION, format!("Bearer {auth_value}"));
            }
            _ => {}
        }

        let (status_msg, body) = match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    let msg = format!("Delivered with status {}", status.as_u16());
                    env.add_log(phase_id, LogLevel::Info, msg.clone());
                    (msg, body)
                } else {
                    let msg = format!("Failed to deliver: status {}", status.as_u16());
                    env.add_log(phase_id, LogLevel::Error, msg.clone());
                    (msg, String::new())
                }
            }
            Err(err) => {
                let msg = format!("Failed to deliver: {err}");
                env.add_log(phase_id, LogLevel::Error, msg.clone());
                (msg, String::new())
            }
        };

        let truncated: String = body.chars().take(RESPONSE_BODY_LIMIT).collect();
        let mut outputs = Map::new();
        outputs.insert("Delivery Status".to_string(), Value::String(status_msg));
        outputs.insert("Response Body".to_string(), Value::String(truncated));
        Ok(outputs)
    }
}

fn parse_attachments(value: &Value) -> Result<Vec<MailAttachment>, EngineError> {
    let entries = match value {
        Value::Array(entries) => entries.clone(),
        Value::String(raw) => serde_json::from_str::<Vec<Value>>(raw)
            .map_err(|e| EngineError::Executor(format!("invalid attachments: {e}")))?,
        Value::Null => return Ok(Vec::new()),
        _ => {
            return Err(EngineError::Executor(
                "attachments must be an array".to_string(),
            ))
        }
    };

    let mut attachments = Vec::new();
    for entry in entries {
        let filename = entry
            .get("filename")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::Executor("attachment is missing a filename".to_string()))?
            .to_string();
        let content = entry
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::Executor("attachment is missing content".to_string()))?;
        let content_type = entry
            .get("content_type")
            .and_then(|v| v.as_str())
            .unwrap_or("text/plain")
            .to_string();
        attachments.push(MailAttachment {
            filename,
            content: content.as_bytes().to_vec(),
            content_type,
        });
    }
    Ok(attachments)
}

pub struct EmailDeliveryExecutor;

#[async_trait]
impl NodeExecutor for EmailDeliveryExecutor {
    fn name(&self) -> &'static str {
        "Email Delivery Node"
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &[
            "SMTP Host",
            "SMTP Port",
            "SMTP User",
            "SMTP Password",
            "From",
            "To",
            "Subject",
            "Body",
        ]
    }

    async fn run(
        &self,
        node: &NodeSnapshot,
        phase_id: Uuid,
        env: &mut Environment,
        services: &ExecutorServices,
    ) -> Result<Map<String, Value>, EngineError> {
        self.validate(node)?;
        let host = require_str(node, "SMTP Host")?.to_string();
        let port = require_f64(node, "SMTP Port")? as u16;
        let username = require_str(node, "SMTP User")?.to_string();
        let password_credential = require_credential_id(node, "SMTP Password")?;
        let from = require_str(node, "From")?.to_string();
        if !is_valid_email_address(from.split('<').last().unwrap_or(&from).trim_end_matches('>')) {
            return Err(EngineError::Executor(format!(
                "invalid from email address: {from}"
            )));
        }

        let to = parse_recipient_list(require_str(node, "To")?)?;
        let cc = match optional_str(node, "CC") {
            Some(raw) if !raw.trim().is_empty() => parse_recipient_list(raw)?,
            _ => Vec::new(),
        };
        let bcc = match optional_str(node, "BCC") {
            Some(raw) if !raw.trim().is_empty() => parse_recipient_list(raw)?,
            _ => Vec::new(),
        };
        let subject = require_str(node, "Subject")?.to_string();
        let body = text_input(node, "Body")?;
        let tls_mode = TlsMode::parse(optional_str(node, "TLS Mode").unwrap_or("starttls"));
        let attachments = match node.inputs.get("Attachments") {
            Some(value) => parse_attachments(value)?,
            None => Vec::new(),
        };

        env.add_log(
            phase_id,
            LogLevel::Info,
            format!("Sending email to {} recipient(s) via {host}:{port}", to.len()),
        );

        // Resolved SMTP password lives only in this config value.
        let password = services
            .secrets
            .resolve_credential(password_credential)
            .await?;
        let config = SmtpConfig {
            host,
            port,
            username,
            password,
            from,
            tls_mode,
        };
        let email = OutgoingEmail {
            to,
            cc,
            bcc,
            subject,
            body,
            attachments,
        };

        let message_id = services.mailer.send_with_config(&config, &email).await?;

        env.add_log(phase_id, LogLevel::Info, "Email sent successfully");

        let mut outputs = Map::new();
        outputs.insert("Delivery Status".to_string(), Value::String("sent".into()));
        outputs.insert("Message ID".to_string(), Value::String(message_id));
        Ok(outputs)
    }
}

pub struct SendSmsExecutor;

#[async_trait]
impl NodeExecutor for SendSmsExecutor {
    fn name(&self) -> &'static str {
        "Send SMS Node"
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &["Account SID", "Auth Token", "From", "To", "Body"]
    }

    async fn run(
        &self,
        node: &NodeSnapshot,
        phase_id: Uuid,
        env: &mut Environment,
        services: &ExecutorServices,
    ) -> Result<Map<String, Value>, EngineError> {
        self.validate(node)?;
        let account_sid = require_str(node, "Account SID")?.to_string();
        let token_credential = require_credential_id(node, "Auth Token")?;
        let from = require_str(node, "From")?.to_string();
        let to = require_str(node, "To")?.to_string();
        let body = text_input(node, "Body")?;

        env.add_log(phase_id, LogLevel::Info, format!("Sending SMS to {to}"));

        let auth_token = services.secrets.resolve_credential(token_credential).await?;
        let delivery = services
            .sms
            .send_sms(&account_sid, &auth_token, &from, &to, &body)
            .await?;

        env.add_log(
            phase_id,
            LogLevel::Info,
            format!("SMS accepted with status '{}'", delivery.status),
        );

        let mut outputs = Map::new();
        outputs.insert("SMS Status".to_string(), Value::String(delivery.status));
        outputs.insert("Message SID".to_string(), Value::String(delivery.sid));
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::nodes::tests_support::{snapshot, test_services, TestServices};
    use crate::services::sms::SmsDelivery;
    use httpmock::prelude::*;
    use serde_json::json;

    #[tokio::test]
    async fn webhook_delivers_payload_with_bearer_auth() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/hook")
                .header("content-type", "application/json")
                .header("authorization", "Bearer tok-1")
                .body(r#"{"ok":true}"#);
            then.status(200).body("received");
        });

        let services = test_services();
        let mut env = Environment::new();
        let phase_id = Uuid::new_v4();
        env.create_phase(phase_id, "deliver_to_webhook");

        let node = snapshot(
            "deliver_to_webhook",
            json!({
                "Webhook URL": server.url("/hook"),
                "Payload": {"ok": true},
                "Authorization Type": "bearer",
                "Authorization Value": "tok-1",
            }),
        );
        let outputs = DeliverToWebhookExecutor
            .run(&node, phase_id, &mut env, &services)
            .await
            .unwrap();

        mock.assert();
        assert_eq!(
            outputs.get("Delivery Status").and_then(|v| v.as_str()),
            Some("Delivered with status 200")
        );
        assert_eq!(
            outputs.get("Response Body").and_then(|v| v.as_str()),
            Some("received")
        );
    }

    #[tokio::test]
    async fn webhook_failure_is_reported_not_raised() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/hook");
            then.status(503).body("unavailable");
        });

        let services = test_services();
        let mut env = Environment::new();
        let phase_id = Uuid::new_v4();
        env.create_phase(phase_id, "deliver_to_webhook");

        let node = snapshot(
            "deliver_to_webhook",
            json!({"Webhook URL": server.url("/hook"), "Payload": "x"}),
        );
        let outputs = DeliverToWebhookExecutor
            .run(&node, phase_id, &mut env, &services)
            .await
            .unwrap();
        assert!(outputs
            .get("Delivery Status")
            .and_then(|v| v.as_str())
            .unwrap()
            .starts_with("Failed to deliver"));
        assert_eq!(outputs.get("Response Body"), Some(&json!("")));
    }

    #[tokio::test]
    async fn email_resolves_password_and_reports_message_id() {
        let credential_id = Uuid::new_v4();
        let mut bundle = TestServices::default().with_credential(credential_id, "smtp-secret");
        bundle
            .mailer
            .expect_send_with_config()
            .times(1)
            .returning(|config, email| {
                assert_eq!(config.host, "smtp.example.com");
                assert_eq!(config.port, 587);
                assert_eq!(config.password, "smtp-secret");
                assert_eq!(email.to, vec!["dest@example.com".to_string()]);
                assert_eq!(email.cc, vec!["copy@example.com".to_string()]);
                Ok("<id-1@flowmill>".to_string())
            });
        let services = bundle.build();

        let mut env = Environment::new();
        let phase_id = Uuid::new_v4();
        env.create_phase(phase_id, "email_delivery");

        let node = snapshot(
            "email_delivery",
            json!({
                "SMTP Host": "smtp.example.com",
                "SMTP Port": 587,
                "SMTP User": "mailer",
                "SMTP Password": credential_id.to_string(),
                "From": "noreply@example.com",
                "To": "dest@example.com",
                "CC": "copy@example.com",
                "Subject": "digest",
                "Body": "content",
            }),
        );
        let outputs = EmailDeliveryExecutor
            .run(&node, phase_id, &mut env, &services)
            .await
            .unwrap();
        assert_eq!(outputs.get("Delivery Status"), Some(&json!("sent")));
        assert_eq!(outputs.get("Message ID"), Some(&json!("<id-1@flowmill>")));
    }

    #[tokio::test]
    async fn email_rejects_duplicate_recipients() {
        let err = parse_recipient_list("a@example.com, A@example.com").unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[tokio::test]
    async fn sms_resolves_token_and_reports_sid() {
        let credential_id = Uuid::new_v4();
        let mut bundle = TestServices::default().with_credential(credential_id, "twilio-token");
        bundle
            .sms
            .expect_send_sms()
            .times(1)
            .returning(|sid, token, from, to, body| {
                assert_eq!(sid, "AC99");
                assert_eq!(token, "twilio-token");
                assert_eq!(from, "+15550001111");
                assert_eq!(to, "+15550002222");
                assert_eq!(body, "ping");
                Ok(SmsDelivery {
                    status: "queued".into(),
                    sid: "SM7".into(),
                })
            });
        let services = bundle.build();

        let mut env = Environment::new();
        let phase_id = Uuid::new_v4();
        env.create_phase(phase_id, "send_sms");

        let node = snapshot(
            "send_sms",
            json!({
                "Account SID": "AC99",
                "Auth Token": credential_id.to_string(),
                "From": "+15550001111",
                "To": "+15550002222",
                "Body": "ping",
            }),
        );
        let outputs = SendSmsExecutor
            .run(&node, phase_id, &mut env, &services)
            .await
            .unwrap();
        assert_eq!(outputs.get("SMS Status"), Some(&json!("queued")));
        assert_eq!(outputs.get("Message SID"), Some(&json!("SM7")));
    }

    #[test]
    fn recipient_validation_rules() {
        assert!(is_valid_email_address("user@example.com"));
        assert!(!is_valid_email_address("user@@example.com"));
        assert!(!is_valid_email_address("user@nodot"));
        assert!(!is_valid_email_address("user example@x.com"));
        let parsed = parse_recipient_list("a@example.com, b@example.com").unwrap();
        assert_eq!(parsed.len(), 2);
    }
}

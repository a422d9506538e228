use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum SmsError {
    #[error("sms request failed: {0}")]
    Request(String),
    #[error("sms provider returned status {status}: {message}")]
    Provider { status: u16, message: String },
    #[error("sms response was malformed")]
    MalformedResponse,
}

#[derive(Debug, Clone)]
pub struct SmsDelivery {
    pub status: String,
    pub sid: String,
}

/// SMS delivery collaborator. Auth material arrives per call from a resolved
/// credential.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SmsClient: Send + Sync {
    async fn send_sms(
        &self,
        account_sid: &str,
        auth_token: &str,
        from: &str,
        to: &str,
        body: &str,
    ) -> Result<SmsDelivery, SmsError>;
}

pub struct TwilioSmsClient {
    http: Client,
    api_base: String,
}

impl TwilioSmsClient {
    pub fn new(api_base: String) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        TwilioSmsClient { http, api_base }
    }
}

#[async_trait]
impl SmsClient for TwilioSmsClient {
    async fn send_sms(
        &self,
        account_sid: &str,
        auth_token: &str,
        from: &str,
        to: &str,
        body: &str,
    ) -> Result<SmsDelivery, SmsError> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_base.trim_end_matches('/'),
            account_sid
        );

        let response = self
            .http
            .post(&url)
            .basic_auth(account_sid, Some(auth_token))
            .form(&[("From", from), ("To", to), ("Body", body)])
            .send()
            .await
            .map_err(|e| SmsError::Request(e.to_string()))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|_| SmsError::MalformedResponse)?;

        if !status.is_success() {
            let message = payload
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown provider error")
                .to_string();
            return Err(SmsError::Provider {
                status: status.as_u16(),
                message,
            });
        }

        let delivery_status = payload
            .get("status")
            .and_then(|v| v.as_str())
            .ok_or(SmsError::MalformedResponse)?
            .to_string();
        let sid = payload
            .get("sid")
            .and_then(|v| v.as_str())
            .ok_or(SmsError::MalformedResponse)?
            .to_string();

        Ok(SmsDelivery {
            status: delivery_status,
            sid,
        })
    }
}

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::Client;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::execution::{ExecutionTrigger, WorkflowExecution};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue send failed: {0}")]
    Send(String),
    #[error("queue receive failed: {0}")]
    Receive(String),
    #[error("queue delete failed: {0}")]
    Delete(String),
}

/// Wire body of a dispatch message. One message per execution; consumers
/// must tolerate redelivery of the same `execution_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMessage {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub user_id: Uuid,
    pub trigger: ExecutionTrigger,
    pub status: String,
    #[serde(with = "time::serde::rfc3339")]
    pub queued_at: OffsetDateTime,
}

impl ExecutionMessage {
    pub fn for_execution(execution: &WorkflowExecution, queued_at: OffsetDateTime) -> Self {
        ExecutionMessage {
            execution_id: execution.id,
            workflow_id: execution.workflow_id,
            user_id: execution.user_id,
            trigger: execution.trigger,
            status: execution.status.to_string().to_lowercase(),
            queued_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub body: String,
    pub receipt_handle: String,
}

/// Point-to-point work queue with at-least-once delivery. A message left
/// unacked past its visibility timeout is redelivered to another consumer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn send(&self, body: &str) -> Result<String, QueueError>;

    async fn receive(
        &self,
        max_messages: i32,
        wait_secs: i32,
        visibility_timeout: i32,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Explicit ack; safe to call more than once for the same handle.
    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError>;
}

pub struct SqsWorkQueue {
    client: Client,
    queue_url: String,
}

impl SqsWorkQueue {
    /// Builds a client from the ambient AWS environment; `endpoint_override`
    /// points at localstack-style emulators in local dev.
    pub async fn connect(queue_url: String, endpoint_override: Option<String>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(endpoint) = endpoint_override {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;
        SqsWorkQueue {
            client: Client::new(&sdk_config),
            queue_url,
        }
    }
}

#[async_trait]
impl WorkQueue for SqsWorkQueue {
    async fn send(&self, body: &str) -> Result<String, QueueError> {
        let out = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| QueueError::Send(e.to_string()))?;

        Ok(out.message_id().unwrap_or_default().to_string())
    }

    async fn receive(
        &self,
        max_messages: i32,
        wait_secs: i32,
        visibility_timeout: i32,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let out = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max_messages)
            .wait_time_seconds(wait_secs)
            .visibility_timeout(visibility_timeout)
            .send()
            .await
            .map_err(|e| QueueError::Receive(e.to_string()))?;

        let messages = out
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| {
                let body = m.body?;
                let receipt_handle = m.receipt_handle?;
                Some(ReceivedMessage {
                    body,
                    receipt_handle,
                })
            })
            .collect();

        Ok(messages)
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| QueueError::Delete(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::execution::ExecutionStatus;

    fn sample_execution() -> WorkflowExecution {
        WorkflowExecution {
            id: Uuid::new_v4(),
            workflow_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            trigger: ExecutionTrigger::Scheduled,
            status: ExecutionStatus::Pending,
            created_at: OffsetDateTime::now_utc(),
            started_at: None,
            completed_at: None,
            credits_consumed: None,
        }
    }

    #[test]
    fn message_body_matches_wire_format() {
        let execution = sample_execution();
        let message = ExecutionMessage::for_execution(&execution, OffsetDateTime::now_utc());
        let body = serde_json::to_value(&message).unwrap();

        assert_eq!(
            body.get("execution_id").and_then(|v| v.as_str()),
            Some(execution.id.to_string().as_str())
        );
        assert_eq!(
            body.get("trigger").and_then(|v| v.as_str()),
            Some("scheduled")
        );
        assert_eq!(body.get("status").and_then(|v| v.as_str()), Some("pending"));
        assert!(body.get("queued_at").and_then(|v| v.as_str()).is_some());
    }

    #[test]
    fn message_round_trips_through_json() {
        let execution = sample_execution();
        let message = ExecutionMessage::for_execution(&execution, OffsetDateTime::now_utc());
        let body = serde_json::to_string(&message).unwrap();
        let parsed: ExecutionMessage = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed.execution_id, execution.id);
        assert_eq!(parsed.workflow_id, execution.workflow_id);
        assert_eq!(parsed.user_id, execution.user_id);
    }
}

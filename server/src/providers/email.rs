//! Mock email adapter.
//!
//! Stands in for a real ESP integration: it classifies outcomes the way a
//! real adapter would, without network I/O. The verdict is steered two ways:
//!
//! - `MOCK_EMAIL_MODE` env var sets the default (`success`, `transient`,
//!   `permanent`).
//! - Simulator recipients override the mode per message: a local part of
//!   `bounce` fails permanently, `defer` fails transiently. Mirrors the
//!   mailbox simulators real ESPs ship.

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use super::{ChannelProvider, ProviderError};
use crate::models::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MockMode {
    Success,
    Transient,
    Permanent,
}

impl MockMode {
    fn from_env() -> Self {
        match std::env::var("MOCK_EMAIL_MODE").as_deref() {
            Ok("transient") => MockMode::Transient,
            Ok("permanent") => MockMode::Permanent,
            _ => MockMode::Success,
        }
    }
}

pub struct MockEmailProvider {
    mode: MockMode,
}

impl MockEmailProvider {
    pub fn from_env() -> Self {
        Self {
            mode: MockMode::from_env(),
        }
    }

    fn mode_for(&self, message: &Message) -> MockMode {
        let local_part = message
            .to_address
            .split('@')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();

        match local_part.as_str() {
            "bounce" => MockMode::Permanent,
            "defer" => MockMode::Transient,
            _ => self.mode,
        }
    }
}

#[async_trait]
impl ChannelProvider for MockEmailProvider {
    fn name(&self) -> &str {
        "mock-email"
    }

    async fn send(&self, message: &Message) -> Result<serde_json::Value, ProviderError> {
        match self.mode_for(message) {
            MockMode::Success => Ok(json!({
                "provider": self.name(),
                "provider_message_id": Uuid::new_v4().to_string(),
                "accepted": [message.to_address],
            })),
            MockMode::Transient => Err(ProviderError::Transient(
                "upstream temporarily unavailable".to_string(),
            )),
            MockMode::Permanent => Err(ProviderError::Permanent(format!(
                "recipient rejected: {}",
                message.to_address
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MessageStatus, MessageType};
    use chrono::Utc;

    fn message_to(to: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            message_type: MessageType::Email,
            status: MessageStatus::Queued,
            from_address: "sender@example.com".into(),
            to_address: to.into(),
            subject: None,
            body: "hi".into(),
            metadata: None,
            idempotency_key: None,
            attempts: 0,
            max_attempts: 3,
            next_attempt_at: None,
            scheduled_for: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn default_mode_succeeds() {
        let provider = MockEmailProvider { mode: MockMode::Success };
        let payload = provider.send(&message_to("a@example.com")).await.unwrap();
        assert_eq!(payload["provider"], "mock-email");
    }

    #[tokio::test]
    async fn bounce_recipient_is_permanent() {
        let provider = MockEmailProvider { mode: MockMode::Success };
        let err = provider.send(&message_to("bounce@example.com")).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn defer_recipient_is_transient() {
        let provider = MockEmailProvider { mode: MockMode::Success };
        let err = provider.send(&message_to("defer@example.com")).await.unwrap_err();
        assert!(err.is_retryable());
    }
}

//! Channel provider adapters and the broker that selects between them.
//!
//! The engine never inspects provider payloads; adapters classify their own
//! errors and the broker reduces every outcome to a [`SendVerdict`].

pub mod email;

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::models::{Message, MessageType};

pub use email::MockEmailProvider;

/// Hard per-call deadline. Workers are decoupled from callers, so this does
/// not track request cancellation.
pub const PROVIDER_DEADLINE: Duration = Duration::from_secs(10);

/// Errors an adapter can surface. Adapters own classification; the engine
/// only asks [`ProviderError::is_retryable`].
#[derive(Debug, Error)]
pub enum ProviderError {
    /// No adapter is registered for the requested channel.
    #[error("no provider for channel: {0}")]
    UnsupportedChannel(MessageType),

    /// The adapter did not respond within [`PROVIDER_DEADLINE`].
    #[error("provider timed out after {0:?}")]
    Timeout(Duration),

    /// Transient transport or upstream failure; retry later.
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// The provider rejected the message permanently (bad recipient etc.).
    #[error("permanent provider failure: {0}")]
    Permanent(String),
}

impl ProviderError {
    /// Whether the delivery may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProviderError::Permanent(_))
    }
}

/// Object-safe adapter contract. One implementation per channel.
#[async_trait]
pub trait ChannelProvider: Send + Sync {
    /// Unique adapter name, recorded in provider payloads.
    fn name(&self) -> &str;

    /// Attempt delivery. A successful return is a provider-accepted send;
    /// its payload is opaque to the engine.
    async fn send(&self, message: &Message) -> Result<serde_json::Value, ProviderError>;
}

/// Classified outcome of one delivery attempt, as recorded on the event
/// timeline.
#[derive(Debug, Clone)]
pub struct SendVerdict {
    pub success: bool,
    pub retryable: bool,
    pub provider_response: serde_json::Value,
    pub error_message: Option<String>,
}

impl SendVerdict {
    fn delivered(provider_response: serde_json::Value) -> Self {
        Self {
            success: true,
            retryable: false,
            provider_response,
            error_message: None,
        }
    }

    fn failed(err: &ProviderError) -> Self {
        Self {
            success: false,
            retryable: err.is_retryable(),
            provider_response: json!({ "error": err.to_string() }),
            error_message: Some(err.to_string()),
        }
    }
}

/// Maps channel type to an adapter and enforces the per-call deadline.
pub struct ProviderBroker {
    providers: HashMap<MessageType, Arc<dyn ChannelProvider>>,
    deadline: Duration,
}

impl ProviderBroker {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            deadline: PROVIDER_DEADLINE,
        }
    }

    /// Broker with the default adapter set: a mock email provider. Other
    /// channels stay unregistered until real adapters exist.
    pub fn with_default_providers() -> Self {
        let mut broker = Self::new();
        broker.register(MessageType::Email, Arc::new(MockEmailProvider::from_env()));
        broker
    }

    pub fn register(&mut self, channel: MessageType, provider: Arc<dyn ChannelProvider>) {
        self.providers.insert(channel, provider);
    }

    #[cfg(test)]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Dispatch one send and classify the result. Never panics and never
    /// escapes the deadline: an unsupported channel, a timeout, or a
    /// panicking adapter all come back as retryable failed verdicts.
    pub async fn send(&self, message: &Message) -> SendVerdict {
        let provider = match self.providers.get(&message.message_type) {
            Some(provider) => Arc::clone(provider),
            None => {
                let err = ProviderError::UnsupportedChannel(message.message_type);
                tracing::warn!(
                    message_id = %message.id,
                    channel = %message.message_type,
                    "no adapter registered, treating as transient"
                );
                return SendVerdict {
                    retryable: true,
                    ..SendVerdict::failed(&err)
                };
            }
        };

        // Run the adapter on its own task so a panic inside it is contained
        // to this send instead of unwinding through the worker loop.
        let send_message = message.clone();
        let call = tokio::spawn(async move { provider.send(&send_message).await });

        match tokio::time::timeout(self.deadline, call).await {
            Ok(Ok(Ok(payload))) => SendVerdict::delivered(payload),
            Ok(Ok(Err(err))) => SendVerdict::failed(&err),
            Ok(Err(join_err)) => {
                tracing::error!(message_id = %message.id, error = %join_err, "provider task failed");
                SendVerdict::failed(&ProviderError::Transient(format!(
                    "provider crashed: {join_err}"
                )))
            }
            Err(_) => SendVerdict::failed(&ProviderError::Timeout(self.deadline)),
        }
    }
}

impl Default for ProviderBroker {
    fn default() -> Self {
        Self::with_default_providers()
    }
}

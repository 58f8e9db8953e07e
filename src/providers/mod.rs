//! # Channel Providers
//!
//! The opaque send capability behind each channel. The wire protocol of each
//! provider lives outside this crate; dispatchers only see [`ChannelProvider`]
//! and the three failure kinds it may report.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::constants::tags;
use crate::models::{Channel, ChannelTarget, MessageId};

/// Provider error taxonomy
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Transient provider failure on {channel}: {message}")]
    Transient { channel: Channel, message: String },

    #[error("Provider rejected message on {channel}: {reason}")]
    PermanentRejection { channel: Channel, reason: String },

    #[error("Provider call on {channel} timed out after {timeout_ms}ms")]
    Timeout { channel: Channel, timeout_ms: u64 },

    #[error("No provider registered for channel {channel}")]
    ChannelNotConfigured { channel: Channel },
}

impl ProviderError {
    pub fn transient(channel: Channel, message: impl Into<String>) -> Self {
        Self::Transient {
            channel,
            message: message.into(),
        }
    }

    pub fn rejected(channel: Channel, reason: impl Into<String>) -> Self {
        Self::PermanentRejection {
            channel,
            reason: reason.into(),
        }
    }

    /// Diagnostic only; every kind follows the same retry path
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::PermanentRejection { .. } | Self::ChannelNotConfigured { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transient { .. } => "transient",
            Self::PermanentRejection { .. } => "permanent_rejection",
            Self::Timeout { .. } => "timeout",
            Self::ChannelNotConfigured { .. } => "channel_not_configured",
        }
    }
}

/// One outbound send as handed to a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendRequest {
    pub message_id: MessageId,
    pub target: ChannelTarget,
    /// Caller metadata the provider should echo in its delivery events
    pub tags: HashMap<String, String>,
}

impl SendRequest {
    /// Build a request tagged with the message id and `message_type=primary`
    pub fn tagged(message_id: &MessageId, target: &ChannelTarget) -> Self {
        let tags = HashMap::from([
            (tags::MESSAGE_ID.to_string(), message_id.to_string()),
            (tags::MESSAGE_TYPE.to_string(), tags::PRIMARY.to_string()),
        ]);
        Self {
            message_id: message_id.clone(),
            target: target.clone(),
            tags,
        }
    }

    pub fn channel(&self) -> Channel {
        self.target.channel
    }
}

/// Provider acknowledgment of an accepted send
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderReceipt {
    /// Provider-assigned reference for this send, when the provider returns one
    pub provider_ref: Option<String>,
}

impl ProviderReceipt {
    pub fn with_ref(provider_ref: impl Into<String>) -> Self {
        Self {
            provider_ref: Some(provider_ref.into()),
        }
    }
}

#[async_trait]
pub trait ChannelProvider: Send + Sync {
    async fn send(&self, request: &SendRequest) -> Result<ProviderReceipt, ProviderError>;

    /// Provider name for logs
    fn name(&self) -> &str;
}

/// Channel → provider lookup with a per-attempt timeout
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: HashMap<Channel, Arc<dyn ChannelProvider>>,
    attempt_timeout: Duration,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut channels: Vec<_> = self.providers.keys().map(|c| c.as_str()).collect();
        channels.sort_unstable();
        f.debug_struct("ProviderRegistry")
            .field("channels", &channels)
            .field("attempt_timeout", &self.attempt_timeout)
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new(attempt_timeout: Duration) -> Self {
        Self {
            providers: HashMap::new(),
            attempt_timeout,
        }
    }

    pub fn register(mut self, channel: Channel, provider: Arc<dyn ChannelProvider>) -> Self {
        self.providers.insert(channel, provider);
        self
    }

    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    pub fn provider_for(&self, channel: Channel) -> Result<&Arc<dyn ChannelProvider>, ProviderError> {
        self.providers
            .get(&channel)
            .ok_or(ProviderError::ChannelNotConfigured { channel })
    }

    /// Send through the channel's provider, bounded by the attempt timeout
    pub async fn send(&self, request: &SendRequest) -> Result<ProviderReceipt, ProviderError> {
        let channel = request.channel();
        let provider = self.provider_for(channel)?;

        debug!(
            message_id = %request.message_id,
            channel = %channel,
            provider = provider.name(),
            "📤 Invoking channel provider"
        );

        match tokio::time::timeout(self.attempt_timeout, provider.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                channel,
                timeout_ms: u64::try_from(self.attempt_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct SlowProvider;

    #[async_trait]
    impl ChannelProvider for SlowProvider {
        async fn send(&self, _request: &SendRequest) -> Result<ProviderReceipt, ProviderError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ProviderReceipt::default())
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    fn sms_request() -> SendRequest {
        SendRequest::tagged(
            &MessageId::from("m-1"),
            &ChannelTarget {
                channel: Channel::Sms,
                recipient: "+15550100".to_string(),
                sender: None,
                content: json!({"message": "hi"}),
            },
        )
    }

    #[test]
    fn test_requests_are_tagged() {
        let request = sms_request();
        assert_eq!(request.tags.get("message_type").map(String::as_str), Some("primary"));
        assert_eq!(request.tags.get("message_id").map(String::as_str), Some("m-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_times_out() {
        let registry = ProviderRegistry::new(Duration::from_secs(30))
            .register(Channel::Sms, Arc::new(SlowProvider));
        let err = registry.send(&sms_request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout { timeout_ms: 30_000, .. }));
        assert!(!err.is_permanent());
    }

    #[tokio::test]
    async fn test_missing_channel_is_reported() {
        let registry = ProviderRegistry::new(Duration::from_secs(1));
        let err = registry.send(&sms_request()).await.unwrap_err();
        assert_eq!(err, ProviderError::ChannelNotConfigured { channel: Channel::Sms });
    }
}

//! # Message Id Resolution
//!
//! Turns identifiers found in a provider event into an internal message id.
//! Channels that echo caller metadata use [`DirectResolver`]; channels that
//! only report their own ids use [`CorrelationResolver`].

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::error::CourierResult;
use crate::models::MessageId;
use crate::store::CorrelationStore;

#[async_trait]
pub trait MessageIdResolver: Send + Sync {
    /// Resolve the first candidate that maps to a message, in order
    async fn resolve(&self, candidates: &[String]) -> CourierResult<Option<MessageId>>;

    fn strategy(&self) -> &'static str;
}

/// The event already carries the internal id
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectResolver;

#[async_trait]
impl MessageIdResolver for DirectResolver {
    async fn resolve(&self, candidates: &[String]) -> CourierResult<Option<MessageId>> {
        Ok(candidates
            .iter()
            .find(|c| !c.trim().is_empty())
            .map(|c| MessageId::from(c.as_str())))
    }

    fn strategy(&self) -> &'static str {
        "direct"
    }
}

/// The event carries provider ids; look them up in the correlation store
#[derive(Clone)]
pub struct CorrelationResolver {
    store: Arc<dyn CorrelationStore>,
}

impl std::fmt::Debug for CorrelationResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationResolver")
            .field("store", &self.store.store_type())
            .finish()
    }
}

impl CorrelationResolver {
    pub fn new(store: Arc<dyn CorrelationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MessageIdResolver for CorrelationResolver {
    async fn resolve(&self, candidates: &[String]) -> CourierResult<Option<MessageId>> {
        for candidate in candidates {
            if let Some(record) = self.store.get(candidate).await? {
                debug!(provider_message_id = %candidate, message_id = %record.message_id, "🔗 Correlation resolved");
                return Ok(Some(record.message_id));
            }
        }
        Ok(None)
    }

    fn strategy(&self) -> &'static str {
        "correlation"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Channel, CorrelationRecord};
    use crate::store::InMemoryCorrelationStore;

    #[tokio::test]
    async fn test_direct_resolver_skips_blank_candidates() {
        let resolved = DirectResolver
            .resolve(&["".to_string(), "M1".to_string()])
            .await
            .unwrap();
        assert_eq!(resolved, Some(MessageId::from("M1")));
        assert_eq!(DirectResolver.resolve(&[]).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_correlation_resolver_tries_candidates_in_order() {
        let store = Arc::new(InMemoryCorrelationStore::new());
        store
            .put(CorrelationRecord::new(
                "receipt-1",
                MessageId::from("M1"),
                Channel::Chat,
                chrono::Duration::days(1),
            ))
            .await
            .unwrap();
        let resolver = CorrelationResolver::new(store);

        let resolved = resolver
            .resolve(&["wamid.unknown".to_string(), "receipt-1".to_string()])
            .await
            .unwrap();
        assert_eq!(resolved, Some(MessageId::from("M1")));
        assert_eq!(resolver.resolve(&["P999".to_string()]).await.unwrap(), None);
    }
}

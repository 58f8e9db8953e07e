#![allow(dead_code)]

pub mod strategies;

use std::sync::Arc;
use std::time::Duration;

use courier_core::config::RoutingConfig;
use courier_core::dispatch::{
    DeadLetterOperations, DeadLetterReconciler, DispatchContext, DispatchWorker, PrimaryDispatcher,
    SecondaryDispatcher,
};
use courier_core::events::{build_channel_router, EventRouter};
use courier_core::ingress::SubmissionIngress;
use courier_core::messaging::{InMemoryQueue, QueueSettings};
use courier_core::models::{Channel, ChannelTarget, MessageId, MessageRecord, SubmissionRequest};
use courier_core::providers::{ChannelProvider, ProviderRegistry};
use courier_core::state_machine::MessageStateMachine;
use courier_core::store::{InMemoryCorrelationStore, InMemoryMessageStore, MessageStore};
use serde_json::json;

pub const MAX_RECEIVE_COUNT: u32 = 5;

/// Whole engine over in-memory backends, driven batch by batch
pub struct Harness {
    pub messages: Arc<InMemoryMessageStore>,
    pub correlations: Arc<InMemoryCorrelationStore>,
    pub input_queue: Arc<InMemoryQueue>,
    pub retry_queue: Arc<InMemoryQueue>,
    pub primary: Arc<PrimaryDispatcher>,
    pub secondary: Arc<SecondaryDispatcher>,
    pub primary_worker: DispatchWorker,
    pub secondary_worker: DispatchWorker,
    pub router: EventRouter,
    pub ingress: SubmissionIngress,
    pub dead_letters: DeadLetterOperations,
}

impl Harness {
    pub fn new(providers: Vec<(Channel, Arc<dyn ChannelProvider>)>) -> Self {
        Self::with_routing(providers, &RoutingConfig::default())
    }

    pub fn with_routing(
        providers: Vec<(Channel, Arc<dyn ChannelProvider>)>,
        routing: &RoutingConfig,
    ) -> Self {
        let messages = Arc::new(InMemoryMessageStore::new());
        let correlations = Arc::new(InMemoryCorrelationStore::new());
        let input_queue = Arc::new(InMemoryQueue::new(QueueSettings::new("input")));
        // zero visibility timeout: a retried entry is receivable again on the next batch
        let retry_queue = Arc::new(InMemoryQueue::new(
            QueueSettings::new("retry")
                .with_max_receive_count(MAX_RECEIVE_COUNT)
                .with_visibility_timeout(Duration::ZERO),
        ));

        let registry = providers.into_iter().fold(
            ProviderRegistry::new(Duration::from_secs(5)),
            |registry, (channel, provider)| registry.register(channel, provider),
        );
        let retention = chrono::Duration::hours(72);
        let context = Arc::new(DispatchContext::new(
            registry,
            messages.clone(),
            correlations.clone(),
            retention,
        ));

        let primary = Arc::new(PrimaryDispatcher::new(context.clone(), retry_queue.clone()));
        let secondary = Arc::new(SecondaryDispatcher::new(
            context.clone(),
            DeadLetterReconciler::new(context.state_machine().clone(), true),
        ));

        let primary_worker = DispatchWorker::new(
            input_queue.clone(),
            primary.clone(),
            10,
            Duration::from_millis(10),
        );
        let secondary_worker = DispatchWorker::new(
            retry_queue.clone(),
            secondary.clone(),
            10,
            Duration::from_millis(10),
        );

        let router = build_channel_router(
            MessageStateMachine::new(messages.clone()),
            correlations.clone(),
            retention,
            routing,
        )
        .expect("channel router builds");

        Self {
            ingress: SubmissionIngress::new(input_queue.clone()),
            dead_letters: DeadLetterOperations::new(retry_queue.clone(), messages.clone()),
            messages,
            correlations,
            input_queue,
            retry_queue,
            primary,
            secondary,
            primary_worker,
            secondary_worker,
            router,
        }
    }

    /// Run secondary batches until the retry queue is empty, returning how
    /// many batches ran
    pub async fn drain_retry_queue(&self) -> usize {
        let mut batches = 0;
        while !self.retry_queue.is_empty().await {
            self.secondary_worker.process_batch().await.unwrap();
            batches += 1;
            assert!(batches < 100, "retry queue did not drain");
        }
        batches
    }

    pub async fn record(&self, id: &str) -> MessageRecord {
        self.messages
            .get(&MessageId::from(id))
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("no record for {id}"))
    }
}

pub fn target(channel: Channel) -> ChannelTarget {
    let (recipient, content) = match channel {
        Channel::Email => ("a@b.com", json!({"subject": "Hi", "text": "hello"})),
        Channel::Sms => ("+15550100", json!({"message": "hello", "message_type": "TRANSACTIONAL"})),
        Channel::Chat => ("+15550100", json!({"message": "hello"})),
    };
    ChannelTarget {
        channel,
        recipient: recipient.to_string(),
        sender: None,
        content,
    }
}

pub fn request(channel: Channel, fallback: Option<Channel>) -> SubmissionRequest {
    SubmissionRequest {
        target: target(channel),
        fallback: fallback.map(target),
    }
}

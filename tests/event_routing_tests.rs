mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use common::{request, Harness};
use courier_core::config::RoutingConfig;
use courier_core::events::{build_channel_router, ProcessingOutcome};
use courier_core::models::{
    Channel, CorrelationRecord, MessageId, MessageRecord, StateUpdate, Submission,
};
use courier_core::providers::{ChannelProvider, ProviderReceipt};
use courier_core::state_machine::{MessageState, MessageStateMachine, NoOpReason};
use courier_core::store::{
    ConditionalWrite, CorrelationStore, InMemoryCorrelationStore, InMemoryMessageStore,
    MessageStore, StoreError, StoreResult,
};
use courier_core::testing::{chat_event, email_event, sms_event, ScriptedProvider};
use serde_json::json;
use tokio::sync::watch;

/// Message store whose first reads fail as if the database dropped the connection
struct FlakyMessageStore {
    inner: InMemoryMessageStore,
    failing_reads: AtomicU32,
}

#[async_trait]
impl MessageStore for FlakyMessageStore {
    async fn create_if_absent(&self, record: MessageRecord) -> StoreResult<bool> {
        self.inner.create_if_absent(record).await
    }

    async fn get(&self, message_id: &MessageId) -> StoreResult<Option<MessageRecord>> {
        let failing = self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::database("get_message", "connection reset by peer"));
        }
        self.inner.get(message_id).await
    }

    async fn conditional_update(
        &self,
        message_id: &MessageId,
        update: &StateUpdate,
    ) -> StoreResult<ConditionalWrite> {
        self.inner.conditional_update(message_id, update).await
    }

    async fn increment_attempts(&self, message_id: &MessageId) -> StoreResult<u32> {
        self.inner.increment_attempts(message_id).await
    }

    async fn mark_dead_lettered(&self, message_id: &MessageId) -> StoreResult<()> {
        self.inner.mark_dead_lettered(message_id).await
    }

    async fn record_send(
        &self,
        message_id: &MessageId,
        via: Channel,
        provider_ref: Option<&str>,
    ) -> StoreResult<()> {
        self.inner.record_send(message_id, via, provider_ref).await
    }

    fn store_type(&self) -> &'static str {
        "flaky"
    }
}

async fn queued(harness: &Harness, id: &str, channel: Channel) {
    harness
        .messages
        .create_if_absent(MessageRecord::queued(MessageId::from(id), channel))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_email_send_then_delivery_then_late_bounce() {
    let ses: Arc<dyn ChannelProvider> = Arc::new(ScriptedProvider::always_succeeding("ses"));
    let harness = Harness::new(vec![(Channel::Email, ses)]);
    let submission = Submission::new(MessageId::from("M1"), request(Channel::Email, None));
    harness.primary.dispatch(&submission).await.unwrap();
    assert_eq!(harness.record("M1").await.state, MessageState::Sent);

    let report = harness.router.route(&email_event("Delivery", "M1")).await;
    assert_eq!(report.matched(), vec!["email"]);
    assert_eq!(
        report.outcome_for("email"),
        Some(&ProcessingOutcome::Applied {
            message_id: MessageId::from("M1"),
            from: MessageState::Sent,
            to: MessageState::Delivered,
        })
    );
    assert!(harness.correlations.is_empty());

    let report = harness.router.route(&email_event("Delivery", "M1")).await;
    assert!(matches!(
        report.outcome_for("email"),
        Some(ProcessingOutcome::NoOp {
            reason: NoOpReason::AlreadyTerminal,
            ..
        })
    ));

    let report = harness.router.route(&email_event("Bounce", "M1")).await;
    assert!(matches!(
        report.outcome_for("email"),
        Some(ProcessingOutcome::NoOp {
            reason: NoOpReason::AlreadyTerminal,
            ..
        })
    ));
    assert_eq!(harness.record("M1").await.state, MessageState::Delivered);
}

#[tokio::test]
async fn test_duplicate_events_leave_the_record_unchanged() {
    let harness = Harness::new(Vec::new());
    queued(&harness, "M2", Channel::Sms).await;

    let event = sms_event("TEXT_DELIVERED", "M2");
    harness.router.route(&event).await;
    let after_first = harness.record("M2").await;
    let report = harness.router.route(&event).await;

    assert!(matches!(
        report.outcome_for("sms"),
        Some(ProcessingOutcome::NoOp { .. })
    ));
    assert_eq!(harness.record("M2").await, after_first);
}

#[tokio::test]
async fn test_delivery_before_send_write_is_accepted() {
    let harness = Harness::new(Vec::new());
    queued(&harness, "M3", Channel::Email).await;

    harness.router.route(&email_event("Delivery", "M3")).await;
    assert_eq!(harness.record("M3").await.state, MessageState::Delivered);
}

#[tokio::test]
async fn test_filters_only_pass_primary_events() {
    let harness = Harness::new(Vec::new());
    queued(&harness, "M4", Channel::Email).await;

    let broadcast = json!({
        "eventType": "Delivery",
        "mail": {"tags": {"message_type": ["broadcast"], "message_id": ["M4"]}}
    });
    assert!(harness.router.route(&broadcast).await.matched().is_empty());

    let untagged = json!({"eventType": "TEXT_DELIVERED", "context": {"message_id": "M4"}});
    assert!(harness.router.route(&untagged).await.matched().is_empty());

    assert_eq!(
        harness.router.matching_subscribers(&sms_event("TEXT_DELIVERED", "M4")),
        vec!["sms".to_string()]
    );
    assert_eq!(
        harness.router.matching_subscribers(&chat_event("delivered", "wamid.1", None)),
        vec!["chat".to_string()]
    );
    assert_eq!(harness.record("M4").await.state, MessageState::Queued);
}

#[tokio::test]
async fn test_configured_policy_replaces_builtin_filter() {
    let mut routing = RoutingConfig::default();
    routing.filter_policies.insert(
        "sms".to_string(),
        json!({"context": {"message_type": ["primary", "otp"]}}),
    );
    let harness = Harness::with_routing(Vec::new(), &routing);
    queued(&harness, "M5", Channel::Sms).await;

    let otp = json!({
        "eventType": "TEXT_DELIVERED",
        "context": {"message_type": "otp", "message_id": "M5"}
    });
    let report = harness.router.route(&otp).await;
    assert_eq!(report.matched(), vec!["sms"]);
    assert_eq!(harness.record("M5").await.state, MessageState::Delivered);
}

#[tokio::test]
async fn test_chat_events_resolve_through_correlations() {
    let harness = Harness::new(Vec::new());
    queued(&harness, "M1", Channel::Chat).await;
    harness
        .correlations
        .put(CorrelationRecord::new(
            "P123",
            MessageId::from("M1"),
            Channel::Chat,
            chrono::Duration::hours(72),
        ))
        .await
        .unwrap();

    // accepted carries the send receipt; the network id becomes an alias
    let report = harness
        .router
        .route(&chat_event("accepted", "wamid.1", Some("P123")))
        .await;
    assert!(matches!(
        report.outcome_for("chat"),
        Some(ProcessingOutcome::Applied { to: MessageState::Sent, .. })
    ));
    let alias = harness.correlations.get("wamid.1").await.unwrap().unwrap();
    assert_eq!(alias.message_id, MessageId::from("M1"));

    // later statuses carry only the network id
    harness
        .router
        .route(&chat_event("delivered", "wamid.1", None))
        .await;
    assert_eq!(harness.record("M1").await.state, MessageState::Delivered);
}

#[tokio::test]
async fn test_unmapped_chat_event_is_dropped() {
    let harness = Harness::new(Vec::new());
    queued(&harness, "M6", Channel::Chat).await;

    let report = harness
        .router
        .route(&chat_event("delivered", "wamid.unknown", None))
        .await;
    assert_eq!(
        report.outcome_for("chat"),
        Some(&ProcessingOutcome::Unresolved {
            identifiers: vec!["wamid.unknown".to_string()],
        })
    );
    assert_eq!(harness.record("M6").await.state, MessageState::Queued);
}

#[tokio::test]
async fn test_chat_flow_from_send_to_read() {
    let chat: Arc<dyn ChannelProvider> = Arc::new(ScriptedProvider::scripted(
        "chat",
        vec![Ok(ProviderReceipt::with_ref("P900"))],
    ));
    let harness = Harness::new(vec![(Channel::Chat, chat)]);
    let submission = Submission::new(MessageId::from("M7"), request(Channel::Chat, None));
    harness.primary.dispatch(&submission).await.unwrap();

    let report = harness
        .router
        .route(&chat_event("accepted", "wamid.7", Some("P900")))
        .await;
    assert!(matches!(
        report.outcome_for("chat"),
        Some(ProcessingOutcome::NoOp {
            reason: NoOpReason::AlreadyInState,
            ..
        })
    ));

    harness.router.route(&chat_event("read", "wamid.7", None)).await;
    assert_eq!(harness.record("M7").await.state, MessageState::Delivered);
}

#[tokio::test]
async fn test_spawned_router_processes_published_events() {
    let harness = Harness::new(Vec::new());
    queued(&harness, "M8", Channel::Email).await;

    let Harness { router, messages, .. } = harness;
    let (_shutdown, shutdown_receiver) = watch::channel(false);
    let (handle, task) = Arc::new(router).spawn(8, shutdown_receiver);
    handle.publish(email_event("Complaint", "M8")).await.unwrap();
    drop(handle);
    task.await.unwrap();

    let record = messages.get(&MessageId::from("M8")).await.unwrap().unwrap();
    assert_eq!(record.state, MessageState::Complained);
}

#[tokio::test]
async fn test_event_survives_transient_store_failure() {
    let store = Arc::new(FlakyMessageStore {
        inner: InMemoryMessageStore::new(),
        failing_reads: AtomicU32::new(1),
    });
    let mut record = MessageRecord::queued(MessageId::from("M9"), Channel::Email);
    record.state = MessageState::Sent;
    store.create_if_absent(record).await.unwrap();

    let routing = RoutingConfig {
        redelivery_backoff_ms: 1,
        max_redelivery_backoff_ms: 5,
        ..RoutingConfig::default()
    };
    let router = build_channel_router(
        MessageStateMachine::new(store.clone()),
        Arc::new(InMemoryCorrelationStore::new()),
        chrono::Duration::hours(72),
        &routing,
    )
    .unwrap();

    let (_shutdown, shutdown_receiver) = watch::channel(false);
    let (handle, task) = Arc::new(router).spawn(8, shutdown_receiver);
    handle.publish(email_event("Delivery", "M9")).await.unwrap();
    drop(handle);
    task.await.unwrap();

    let record = store.inner.get(&MessageId::from("M9")).await.unwrap().unwrap();
    assert_eq!(record.state, MessageState::Delivered);
    assert_eq!(store.failing_reads.load(Ordering::SeqCst), 0);
}

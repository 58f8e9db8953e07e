//! # Event Router
//!
//! Shared broker for provider delivery events. Every subscriber declares a
//! [`FilterPolicy`]; each published event is evaluated against every policy
//! independently and handed to all subscribers whose policy matches, so one
//! event may reach zero, one or several handlers.
//!
//! A handler error is retried for that subscriber alone, with exponential
//! backoff, up to [`RedeliveryPolicy::max_attempts`] deliveries. Outcomes a
//! handler returns successfully (including unresolved and no-op events) are
//! final.

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::filter::FilterPolicy;
use super::processors::ProcessingOutcome;
use crate::error::{CourierError, CourierResult};

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, event: &Value) -> CourierResult<ProcessingOutcome>;
}

struct Subscription {
    name: String,
    policy: FilterPolicy,
    handler: Arc<dyn EventHandler>,
}

/// Bounded redelivery of events whose handler returned an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedeliveryPolicy {
    /// Deliveries per subscriber, the first one included
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RedeliveryPolicy {
    /// Deliver once and give up on error
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Wait before delivery number `failed_attempt + 1`
    pub fn backoff_for(&self, failed_attempt: u32) -> Duration {
        let doublings = failed_attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << doublings)
            .min(self.max_backoff)
    }
}

/// Result of one subscriber's handling of an event
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub subscriber: String,
    pub attempts: u32,
    pub result: Result<ProcessingOutcome, String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteReport {
    pub deliveries: Vec<Delivery>,
}

impl RouteReport {
    pub fn matched(&self) -> Vec<&str> {
        self.deliveries.iter().map(|d| d.subscriber.as_str()).collect()
    }

    pub fn outcome_for(&self, subscriber: &str) -> Option<&ProcessingOutcome> {
        self.deliveries
            .iter()
            .find(|d| d.subscriber == subscriber)
            .and_then(|d| d.result.as_ref().ok())
    }
}

#[derive(Default)]
pub struct EventRouter {
    subscriptions: RwLock<Vec<Arc<Subscription>>>,
    redelivery: RedeliveryPolicy,
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("subscribers", &self.subscriber_names())
            .field("redelivery", &self.redelivery)
            .finish()
    }
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_redelivery(mut self, policy: RedeliveryPolicy) -> Self {
        self.redelivery = RedeliveryPolicy {
            max_attempts: policy.max_attempts.max(1),
            ..policy
        };
        self
    }

    /// Register `handler` under `name`; names must be unique
    pub fn subscribe(
        &self,
        name: impl Into<String>,
        policy: FilterPolicy,
        handler: Arc<dyn EventHandler>,
    ) -> CourierResult<()> {
        let name = name.into();
        let mut subscriptions = self.subscriptions.write();
        if subscriptions.iter().any(|s| s.name == name) {
            return Err(CourierError::RoutingError(format!(
                "subscriber {name} is already registered"
            )));
        }
        info!(subscriber = %name, policy = %policy.source(), "📡 Subscriber registered");
        subscriptions.push(Arc::new(Subscription {
            name,
            policy,
            handler,
        }));
        Ok(())
    }

    pub fn unsubscribe(&self, name: &str) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.name != name);
        subscriptions.len() != before
    }

    pub fn subscriber_names(&self) -> Vec<String> {
        self.subscriptions
            .read()
            .iter()
            .map(|s| s.name.clone())
            .collect()
    }

    /// Names of the subscribers whose filter matches `event`
    pub fn matching_subscribers(&self, event: &Value) -> Vec<String> {
        self.subscriptions
            .read()
            .iter()
            .filter(|s| s.policy.matches(event))
            .map(|s| s.name.clone())
            .collect()
    }

    /// Deliver `event` to every matching subscriber and wait for all of them
    pub async fn route(&self, event: &Value) -> RouteReport {
        let matched: Vec<Arc<Subscription>> = self
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.policy.matches(event))
            .cloned()
            .collect();

        if matched.is_empty() {
            debug!("Event matched no subscriber");
            return RouteReport::default();
        }

        let deliveries = join_all(
            matched
                .iter()
                .map(|subscription| self.deliver(subscription, event)),
        )
        .await;

        RouteReport { deliveries }
    }

    async fn deliver(&self, subscription: &Subscription, event: &Value) -> Delivery {
        let mut attempt = 1;
        let result = loop {
            match subscription.handler.handle(event).await {
                Ok(outcome) => {
                    debug!(
                        subscriber = %subscription.name,
                        outcome = outcome.label(),
                        attempt,
                        "Event handled"
                    );
                    break Ok(outcome);
                }
                Err(e) if attempt < self.redelivery.max_attempts => {
                    let backoff = self.redelivery.backoff_for(attempt);
                    warn!(
                        subscriber = %subscription.name,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "🔄 Subscriber failed to handle event, redelivering"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        subscriber = %subscription.name,
                        attempts = attempt,
                        error = %e,
                        event = %event,
                        "❌ Subscriber failed to handle event, giving up"
                    );
                    break Err(e.to_string());
                }
            }
        };

        Delivery {
            subscriber: subscription.name.clone(),
            attempts: attempt,
            result,
        }
    }

    /// Run the router behind a bounded channel until `shutdown` flips to true
    /// or every [`RouterHandle`] is dropped. Events already buffered when
    /// shutdown is signalled are still routed.
    pub fn spawn(
        self: Arc<Self>,
        capacity: usize,
        mut shutdown: watch::Receiver<bool>,
    ) -> (RouterHandle, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<Value>(capacity.max(1));
        let router = self;
        let handle = tokio::spawn(async move {
            info!("🚀 Event router started");
            loop {
                tokio::select! {
                    received = receiver.recv() => match received {
                        Some(event) => {
                            router.route(&event).await;
                        }
                        None => break,
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            receiver.close();
                            while let Some(event) = receiver.recv().await {
                                router.route(&event).await;
                            }
                            break;
                        }
                    }
                }
            }
            info!("🛑 Event router stopped");
        });
        (RouterHandle { sender }, handle)
    }
}

/// Publishing side of a spawned router
#[derive(Debug, Clone)]
pub struct RouterHandle {
    sender: mpsc::Sender<Value>,
}

impl RouterHandle {
    pub async fn publish(&self, event: Value) -> CourierResult<()> {
        self.sender.send(event).await.map_err(|_| {
            warn!("Event published after router shutdown");
            CourierError::RoutingError("event router is not running".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Recorder {
        name: String,
        seen: Mutex<Vec<Value>>,
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        async fn handle(&self, event: &Value) -> CourierResult<ProcessingOutcome> {
            self.seen.lock().push(event.clone());
            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(CourierError::StoreError("connection reset".to_string()));
            }
            Ok(ProcessingOutcome::Ignored {
                reason: "recorded".to_string(),
            })
        }
    }

    fn recorder(name: &str) -> Arc<Recorder> {
        flaky_recorder(name, 0)
    }

    fn flaky_recorder(name: &str, failures: u32) -> Arc<Recorder> {
        Arc::new(Recorder {
            name: name.to_string(),
            failures_left: AtomicU32::new(failures),
            ..Recorder::default()
        })
    }

    fn quick_redelivery(max_attempts: u32) -> RedeliveryPolicy {
        RedeliveryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn test_fan_out_to_every_matching_subscriber() {
        let router = EventRouter::new();
        let a = recorder("a");
        let b = recorder("b");
        router
            .subscribe("a", FilterPolicy::field_exists("x"), a.clone())
            .unwrap();
        router
            .subscribe("b", FilterPolicy::field_equals("x", 1), b.clone())
            .unwrap();

        let report = router.route(&json!({"x": 1})).await;
        assert_eq!(report.matched(), vec!["a", "b"]);

        let report = router.route(&json!({"x": 2})).await;
        assert_eq!(report.matched(), vec!["a"]);
        assert_eq!(a.seen.lock().len(), 2);
        assert_eq!(b.seen.lock().len(), 1);

        assert!(router.route(&json!({"y": 1})).await.deliveries.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_subscriber_names_rejected() {
        let router = EventRouter::new();
        router
            .subscribe("a", FilterPolicy::field_exists("x"), recorder("a"))
            .unwrap();
        assert!(router
            .subscribe("a", FilterPolicy::field_exists("y"), recorder("a"))
            .is_err());
        assert!(router.unsubscribe("a"));
        assert!(router.subscriber_names().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_delivery_is_retried_for_that_subscriber_only() {
        let router = EventRouter::new().with_redelivery(quick_redelivery(5));
        let flaky = flaky_recorder("flaky", 2);
        let steady = recorder("steady");
        router
            .subscribe("flaky", FilterPolicy::field_exists("x"), flaky.clone())
            .unwrap();
        router
            .subscribe("steady", FilterPolicy::field_exists("x"), steady.clone())
            .unwrap();

        let report = router.route(&json!({"x": 1})).await;

        let flaky_delivery = &report.deliveries[0];
        assert_eq!(flaky_delivery.attempts, 3);
        assert!(flaky_delivery.result.is_ok());
        assert_eq!(report.deliveries[1].attempts, 1);
        assert_eq!(flaky.seen.lock().len(), 3);
        assert_eq!(steady.seen.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_redelivery_gives_up_after_max_attempts() {
        let router = EventRouter::new().with_redelivery(quick_redelivery(3));
        let broken = flaky_recorder("broken", u32::MAX);
        router
            .subscribe("broken", FilterPolicy::field_exists("x"), broken.clone())
            .unwrap();

        let report = router.route(&json!({"x": 1})).await;

        assert_eq!(report.deliveries[0].attempts, 3);
        assert!(report.deliveries[0].result.is_err());
        assert!(report.outcome_for("broken").is_none());
        assert_eq!(broken.seen.lock().len(), 3);
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let policy = RedeliveryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(u32::MAX), Duration::from_millis(500));
        assert_eq!(
            EventRouter::new()
                .with_redelivery(RedeliveryPolicy {
                    max_attempts: 0,
                    ..policy
                })
                .redelivery
                .max_attempts,
            1
        );
    }

    #[tokio::test]
    async fn test_spawned_router_delivers_published_events() {
        let router = Arc::new(EventRouter::new());
        let a = recorder("a");
        router
            .subscribe("a", FilterPolicy::field_exists("x"), a.clone())
            .unwrap();

        let (_shutdown, receiver) = watch::channel(false);
        let (handle, task) = router.spawn(8, receiver);
        handle.publish(json!({"x": true})).await.unwrap();
        drop(handle);
        task.await.unwrap();

        assert_eq!(a.seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_signal_stops_router_while_handles_live() {
        let router = Arc::new(EventRouter::new());
        let a = recorder("a");
        router
            .subscribe("a", FilterPolicy::field_exists("x"), a.clone())
            .unwrap();

        let (shutdown, receiver) = watch::channel(false);
        let (handle, task) = router.spawn(8, receiver);
        let kept = handle.clone();
        handle.publish(json!({"x": 1})).await.unwrap();
        shutdown.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("router should stop on the shutdown signal")
            .unwrap();
        assert_eq!(a.seen.lock().len(), 1);
        assert!(kept.publish(json!({"x": 2})).await.is_err());
    }
}

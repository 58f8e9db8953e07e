//! # Courier Bootstrap
//!
//! Wires a loaded configuration into a running engine: stores and queues for
//! the configured backend, the two dispatch workers, the event router and the
//! correlation purge loop. Provider implementations are supplied by the host.

use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{ConfigManager, QueueBackend};
use crate::dispatch::{
    DeadLetterOperations, DeadLetterReconciler, DispatchContext, DispatchWorker, PrimaryDispatcher,
    SecondaryDispatcher,
};
use crate::error::{CourierError, CourierResult};
use crate::events::{build_channel_router, RouterHandle};
use crate::ingress::SubmissionIngress;
use crate::messaging::{InMemoryQueue, PgmqQueue, WorkQueue};
use crate::models::Channel;
use crate::providers::{ChannelProvider, ProviderRegistry};
use crate::state_machine::MessageStateMachine;
use crate::store::{
    ensure_schema, CorrelationStore, InMemoryCorrelationStore, InMemoryMessageStore,
    MessageStore, PgCorrelationStore, PgMessageStore,
};

/// Storage and queues for one backend
struct Backend {
    messages: Arc<dyn MessageStore>,
    correlations: Arc<dyn CorrelationStore>,
    input_queue: Arc<dyn WorkQueue>,
    retry_queue: Arc<dyn WorkQueue>,
}

/// Running engine; dropping it does not stop the background tasks, call
/// [`CourierSystemHandle::shutdown`]
pub struct CourierSystemHandle {
    pub ingress: SubmissionIngress,
    pub events: RouterHandle,
    pub dead_letters: DeadLetterOperations,
    pub messages: Arc<dyn MessageStore>,
    pub config_manager: Arc<ConfigManager>,
    shutdown_sender: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for CourierSystemHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CourierSystemHandle")
            .field("environment", &self.config_manager.environment())
            .field("store", &self.messages.store_type())
            .field("tasks", &self.tasks.len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl CourierSystemHandle {
    pub fn is_running(&self) -> bool {
        !*self.shutdown_sender.borrow()
    }

    /// Signal every worker to stop and wait for them to finish their current batch
    pub async fn shutdown(self) -> CourierResult<()> {
        info!("🛑 Courier shutdown requested");
        // receivers may already be gone if a task panicked
        let _ = self.shutdown_sender.send(true);

        let mut failures = 0usize;
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Background task ended abnormally");
                failures += 1;
            }
        }

        if failures > 0 {
            return Err(CourierError::Internal(format!(
                "{failures} background task(s) ended abnormally"
            )));
        }
        info!("✅ Courier stopped");
        Ok(())
    }
}

pub struct CourierBootstrap;

impl CourierBootstrap {
    /// Start the engine with the given channel providers
    pub async fn bootstrap(
        config_manager: Arc<ConfigManager>,
        providers: impl IntoIterator<Item = (Channel, Arc<dyn ChannelProvider>)>,
    ) -> CourierResult<CourierSystemHandle> {
        let config = config_manager.config().clone();
        info!(
            environment = %config_manager.environment(),
            backend = ?config.queues.backend,
            "🚀 BOOTSTRAP: Starting courier"
        );

        let backend = match config.queues.backend {
            QueueBackend::InMemory => Self::in_memory_backend(&config_manager),
            QueueBackend::Pgmq => Self::postgres_backend(&config_manager).await?,
        };

        let registry = providers.into_iter().fold(
            ProviderRegistry::new(config.dispatch.provider_timeout()),
            |registry, (channel, provider)| registry.register(channel, provider),
        );
        for channel in Channel::ALL {
            if registry.provider_for(channel).is_err() {
                warn!(channel = %channel, "No provider registered; sends on this channel will fail");
            }
        }

        let retention = config.correlation.retention();
        let context = Arc::new(DispatchContext::new(
            registry,
            backend.messages.clone(),
            backend.correlations.clone(),
            retention,
        ));

        let primary = PrimaryDispatcher::new(context.clone(), backend.retry_queue.clone())
            .with_retry_delay(config.queues.retry_delay());
        let reconciler = DeadLetterReconciler::new(
            context.state_machine().clone(),
            config.dispatch.mark_failed_on_dead_letter,
        );
        let secondary = SecondaryDispatcher::new(context.clone(), reconciler);

        let router = build_channel_router(
            MessageStateMachine::new(backend.messages.clone()),
            backend.correlations.clone(),
            retention,
            &config.routing,
        )?;

        let (shutdown_sender, shutdown_receiver) = watch::channel(false);
        let (events, router_task) =
            Arc::new(router).spawn(config.routing.channel_capacity, shutdown_receiver.clone());
        let workers = [
            DispatchWorker::new(
                backend.input_queue.clone(),
                Arc::new(primary),
                config.queues.batch_size,
                config.queues.poll_interval(),
            ),
            DispatchWorker::new(
                backend.retry_queue.clone(),
                Arc::new(secondary),
                config.queues.batch_size,
                config.queues.poll_interval(),
            ),
        ];
        let mut tasks: Vec<JoinHandle<()>> = workers
            .into_iter()
            .map(|worker| tokio::spawn(worker.run(shutdown_receiver.clone())))
            .collect();
        tasks.push(tokio::spawn(run_correlation_purge(
            backend.correlations.clone(),
            Duration::from_secs(config.correlation.purge_interval_seconds.max(1)),
            shutdown_receiver,
        )));
        tasks.push(router_task);

        info!(tasks = tasks.len(), "✅ BOOTSTRAP: Courier running");

        Ok(CourierSystemHandle {
            ingress: SubmissionIngress::new(backend.input_queue),
            events,
            dead_letters: DeadLetterOperations::new(backend.retry_queue, backend.messages.clone()),
            messages: backend.messages,
            config_manager,
            shutdown_sender,
            tasks,
        })
    }

    fn in_memory_backend(config_manager: &ConfigManager) -> Backend {
        let queues = &config_manager.config().queues;
        Backend {
            messages: Arc::new(InMemoryMessageStore::new()),
            correlations: Arc::new(InMemoryCorrelationStore::new()),
            input_queue: Arc::new(InMemoryQueue::new(queues.primary_settings())),
            retry_queue: Arc::new(InMemoryQueue::new(queues.retry_settings())),
        }
    }

    async fn postgres_backend(config_manager: &ConfigManager) -> CourierResult<Backend> {
        let config = config_manager.config();
        let url = config.database.url.as_deref().ok_or_else(|| {
            CourierError::ConfigurationError("database.url is required for pgmq".to_string())
        })?;

        let pool = PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .connect(url)
            .await?;
        ensure_schema(&pool).await?;

        let input = PgmqQueue::new(pool.clone(), config.queues.primary_settings())?;
        let retry = PgmqQueue::new(pool.clone(), config.queues.retry_settings())?;
        input.ensure_queues().await?;
        retry.ensure_queues().await?;
        info!("✅ BOOTSTRAP: Postgres schema and pgmq queues ready");

        Ok(Backend {
            messages: Arc::new(PgMessageStore::new(pool.clone())),
            correlations: Arc::new(PgCorrelationStore::new(pool)),
            input_queue: Arc::new(input),
            retry_queue: Arc::new(retry),
        })
    }
}

/// Periodically delete correlations past their retention
pub async fn run_correlation_purge(
    store: Arc<dyn CorrelationStore>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match store.purge_expired(chrono::Utc::now()).await {
                    Ok(0) => {}
                    Ok(purged) => info!(purged, store = store.store_type(), "🧹 Expired correlations purged"),
                    Err(e) => error!(error = %e, "Correlation purge failed"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CourierConfig;
    use crate::models::CorrelationRecord;
    use crate::testing::ScriptedProvider;

    #[tokio::test]
    async fn test_in_memory_system_starts_and_stops() {
        let manager = Arc::new(ConfigManager::from_config(CourierConfig::default(), "test").unwrap());
        let provider: Arc<dyn ChannelProvider> = Arc::new(ScriptedProvider::always_succeeding("ses"));
        let handle = CourierBootstrap::bootstrap(manager, [(Channel::Email, provider)])
            .await
            .unwrap();

        assert!(handle.is_running());
        assert_eq!(handle.messages.store_type(), "in_memory");
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_completes_while_event_handles_are_held() {
        let manager = Arc::new(ConfigManager::from_config(CourierConfig::default(), "test").unwrap());
        let providers: Vec<(Channel, Arc<dyn ChannelProvider>)> = Vec::new();
        let handle = CourierBootstrap::bootstrap(manager, providers).await.unwrap();
        let publisher = handle.events.clone();

        tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .expect("shutdown should not wait on outstanding publishers")
            .unwrap();
        assert!(publisher.publish(serde_json::json!({"mail": {}})).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_loop_removes_expired_correlations() {
        let store = Arc::new(InMemoryCorrelationStore::new());
        let mut record = CorrelationRecord::new(
            "P1",
            crate::models::MessageId::from("M1"),
            Channel::Chat,
            chrono::Duration::hours(1),
        );
        record.expires_at = chrono::Utc::now() - chrono::Duration::minutes(1);
        store.put(record).await.unwrap();

        let (sender, receiver) = watch::channel(false);
        let task = tokio::spawn(run_correlation_purge(
            store.clone(),
            Duration::from_secs(60),
            receiver,
        ));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(store.is_empty());

        sender.send(true).unwrap();
        task.await.unwrap();
    }
}

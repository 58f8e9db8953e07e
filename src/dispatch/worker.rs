//! # Dispatch Worker
//!
//! Polling loop that feeds queue entries to a [`QueueHandler`]. Each entry in
//! a batch is handled concurrently; a failing entry never stops the loop.

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::CourierResult;
use crate::messaging::{QueueEntry, WorkQueue};

/// What the worker does with an entry after the handler returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryDisposition {
    /// Processing finished; remove the entry
    Ack,
    /// Leave the entry to reappear after its visibility timeout
    Retry,
}

#[async_trait]
pub trait QueueHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Handle one entry. An `Err` is logged and treated as [`EntryDisposition::Retry`].
    async fn handle(&self, entry: &QueueEntry) -> CourierResult<EntryDisposition>;

    /// Called for each entry the queue redrove to its dead-letter queue
    async fn on_dead_letter(&self, _entry: &QueueEntry) {}
}

/// Counts for one polling cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub received: usize,
    pub acked: usize,
    pub retried: usize,
    pub errored: usize,
    pub dead_lettered: usize,
}

#[derive(Debug, Default)]
pub struct WorkerStats {
    pub polling_cycles: AtomicU64,
    pub entries_acked: AtomicU64,
    pub entries_retried: AtomicU64,
    pub handler_errors: AtomicU64,
    pub entries_dead_lettered: AtomicU64,
    pub polling_errors: AtomicU64,
}

impl WorkerStats {
    fn record(&self, report: &BatchReport) {
        self.polling_cycles.fetch_add(1, Ordering::Relaxed);
        self.entries_acked
            .fetch_add(report.acked as u64, Ordering::Relaxed);
        self.entries_retried
            .fetch_add(report.retried as u64, Ordering::Relaxed);
        self.handler_errors
            .fetch_add(report.errored as u64, Ordering::Relaxed);
        self.entries_dead_lettered
            .fetch_add(report.dead_lettered as u64, Ordering::Relaxed);
    }
}

pub struct DispatchWorker {
    worker_id: Uuid,
    queue: Arc<dyn WorkQueue>,
    handler: Arc<dyn QueueHandler>,
    batch_size: usize,
    poll_interval: Duration,
    stats: Arc<WorkerStats>,
}

impl std::fmt::Debug for DispatchWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchWorker")
            .field("worker_id", &self.worker_id)
            .field("queue", &self.queue.queue_name())
            .field("handler", &self.handler.name())
            .field("batch_size", &self.batch_size)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl DispatchWorker {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        handler: Arc<dyn QueueHandler>,
        batch_size: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            worker_id: Uuid::new_v4(),
            queue,
            handler,
            batch_size: batch_size.max(1),
            poll_interval,
            stats: Arc::new(WorkerStats::default()),
        }
    }

    pub fn worker_id(&self) -> Uuid {
        self.worker_id
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    /// Receive one batch and handle it
    pub async fn process_batch(&self) -> CourierResult<BatchReport> {
        let batch = self.queue.receive(self.batch_size).await?;
        let mut report = BatchReport {
            received: batch.entries.len(),
            dead_lettered: batch.dead_lettered.len(),
            ..BatchReport::default()
        };

        for entry in &batch.dead_lettered {
            self.handler.on_dead_letter(entry).await;
        }

        let results = join_all(batch.entries.iter().map(|entry| async move {
            (entry, self.handler.handle(entry).await)
        }))
        .await;

        for (entry, result) in results {
            match result {
                Ok(EntryDisposition::Ack) => match self.queue.ack(entry.id).await {
                    Ok(()) => report.acked += 1,
                    Err(e) => {
                        error!(worker_id = %self.worker_id, entry_id = entry.id, error = %e, "Failed to ack entry");
                        report.errored += 1;
                    }
                },
                Ok(EntryDisposition::Retry) => report.retried += 1,
                Err(e) => {
                    error!(
                        worker_id = %self.worker_id,
                        handler = self.handler.name(),
                        entry_id = entry.id,
                        receive_count = entry.receive_count,
                        error = %e,
                        "❌ Handler failed, entry left for redelivery"
                    );
                    report.errored += 1;
                }
            }
        }

        self.stats.record(&report);
        Ok(report)
    }

    /// Poll until `shutdown` flips to `true` or its sender is dropped
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            worker_id = %self.worker_id,
            queue = %self.queue.queue_name(),
            handler = self.handler.name(),
            "🚀 Dispatch worker started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let idle = match self.process_batch().await {
                Ok(report) => {
                    if report.received > 0 || report.dead_lettered > 0 {
                        debug!(worker_id = %self.worker_id, report = ?report, "Batch processed");
                    }
                    report.received == 0
                }
                Err(e) => {
                    self.stats.polling_errors.fetch_add(1, Ordering::Relaxed);
                    error!(worker_id = %self.worker_id, error = %e, "Polling cycle failed");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        info!(worker_id = %self.worker_id, "🛑 Dispatch worker stopped");
    }
}

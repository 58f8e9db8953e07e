//! # Messaging
//!
//! Work queues feeding the dispatchers: the primary input queue and the
//! retry queue with its dead-letter queue. [`WorkQueue`] is the seam; the
//! in-memory implementation serves tests and single-node use, the pgmq
//! implementation serves durable deployments.

pub mod errors;
pub mod in_memory_queue;
pub mod pgmq_queue;
pub mod queue;

pub use errors::{MessagingError, MessagingResult};
pub use in_memory_queue::InMemoryQueue;
pub use pgmq_queue::{validate_queue_name, PgmqQueue};
pub use queue::{
    send_json, QueueEntry, QueueEntryId, QueueMetrics, QueueSettings, ReceiveBatch, WorkQueue,
};

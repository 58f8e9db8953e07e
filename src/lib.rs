#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Courier Core
//!
//! Dispatch-and-reconciliation engine for outbound notifications over email,
//! SMS and chat channels.
//!
//! ## Overview
//!
//! Callers hand a submission to the [`ingress`] adapter and get a message id
//! back immediately. A primary dispatcher makes the first provider call; a
//! failure hands the submission to a retry queue whose receive budget bounds
//! the number of further attempts before the entry is dead-lettered.
//! Providers later report what happened through delivery events, which the
//! [`events`] router filters and feeds to per-channel processors. Every state
//! change goes through the message [`state_machine`], so late, duplicate and
//! out-of-order events can never regress a message.
//!
//! ## Module Organization
//!
//! - [`models`] - Message records, correlation records and submissions
//! - [`store`] - Message and correlation stores (in-memory and Postgres)
//! - [`messaging`] - Work queues with visibility timeouts and dead-lettering
//! - [`providers`] - Channel provider seam and error taxonomy
//! - [`dispatch`] - Primary and secondary dispatchers, queue workers, dead letters
//! - [`events`] - Filter policies, event router and channel processors
//! - [`state_machine`] - Message lifecycle transitions
//! - [`config`] - Layered configuration
//! - [`bootstrap`] - Wiring a configuration into running workers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use courier_core::bootstrap::CourierBootstrap;
//! use courier_core::config::ConfigManager;
//! use courier_core::models::{Channel, SubmissionRequest};
//! use courier_core::providers::ChannelProvider;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! courier_core::logging::init_structured_logging();
//! let config = ConfigManager::load()?;
//! // register real providers here; unregistered channels fail every send
//! let providers: Vec<(Channel, Arc<dyn ChannelProvider>)> = Vec::new();
//! let system = CourierBootstrap::bootstrap(config, providers).await?;
//!
//! let request: SubmissionRequest = serde_json::from_str(
//!     r#"{"channel":"email","recipient":"a@b.com","content":{"subject":"Hi","text":"hello"}}"#,
//! )?;
//! let ack = system.ingress.accept(request).await?;
//! println!("queued {}", ack.message_id);
//!
//! system.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests
//! ```

pub mod bootstrap;
pub mod config;
pub mod constants;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod ingress;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod providers;
pub mod state_machine;
pub mod store;
pub mod testing;

pub use config::{ConfigManager, CourierConfig};
pub use dispatch::{DispatchContext, DispatchOutcome, PrimaryDispatcher, SecondaryDispatcher};
pub use error::{CourierError, CourierResult};
pub use events::{build_channel_router, EventRouter, FilterPolicy, ProcessingOutcome};
pub use ingress::{SubmissionAck, SubmissionIngress};
pub use models::{Channel, MessageId, MessageRecord, Submission, SubmissionRequest};
pub use providers::{ChannelProvider, ProviderError, ProviderRegistry};
pub use state_machine::{MessageState, MessageStateMachine};

//! # Data Models
//!
//! Records held by the message and correlation stores, plus the submission
//! payload carried through the dispatch queues.

pub mod correlation;
pub mod message;
pub mod submission;

pub use correlation::CorrelationRecord;
pub use message::{Channel, MessageId, MessageRecord, StateUpdate};
pub use submission::{ChannelTarget, Submission, SubmissionRequest};

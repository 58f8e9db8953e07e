//! # System Constants
//!
//! Queue names, tag keys and provider event vocabularies that define the
//! operational boundaries of the courier dispatch engine.

pub use crate::state_machine::MessageState as MessageStatus;

/// Queue names used by the dispatch pipeline
pub mod queues {
    /// Input queue consumed by the primary dispatcher
    pub const PRIMARY_INPUT_QUEUE: &str = "courier_primary_queue";

    /// Retry queue consumed by the secondary dispatcher
    pub const RETRY_QUEUE: &str = "courier_retry_queue";

    /// Terminal holding queue for retry entries that exhausted their receive budget
    pub const DEAD_LETTER_QUEUE: &str = "courier_retry_dlq";

    /// Receive budget enforced by the retry queue before dead-lettering
    pub const DEFAULT_MAX_RECEIVE_COUNT: u32 = 5;
}

/// Tag keys attached to every outbound send so providers echo them back
pub mod tags {
    /// Tag carrying the send classification
    pub const MESSAGE_TYPE: &str = "message_type";

    /// Tag carrying the internal message identifier
    pub const MESSAGE_ID: &str = "message_id";

    /// Value of [`MESSAGE_TYPE`] for sends made by this engine
    pub const PRIMARY: &str = "primary";
}

/// Email provider event types (`eventType`)
pub mod email_events {
    pub const SEND: &str = "Send";
    pub const DELIVERY: &str = "Delivery";
    pub const BOUNCE: &str = "Bounce";
    pub const REJECT: &str = "Reject";
    pub const RENDERING_FAILURE: &str = "Rendering Failure";
    pub const COMPLAINT: &str = "Complaint";
}

/// SMS provider event types (`eventType`)
pub mod sms_events {
    pub const TEXT_QUEUED: &str = "TEXT_QUEUED";
    pub const TEXT_PENDING: &str = "TEXT_PENDING";
    pub const TEXT_SUCCESSFUL: &str = "TEXT_SUCCESSFUL";
    pub const TEXT_DELIVERED: &str = "TEXT_DELIVERED";
    pub const TEXT_BLOCKED: &str = "TEXT_BLOCKED";
    pub const TEXT_SPAM: &str = "TEXT_SPAM";
    pub const TEXT_INVALID: &str = "TEXT_INVALID";
    pub const TEXT_INVALID_MESSAGE: &str = "TEXT_INVALID_MESSAGE";
    pub const TEXT_OPTED_OUT: &str = "TEXT_OPTED_OUT";
    pub const TEXT_UNREACHABLE: &str = "TEXT_UNREACHABLE";
    pub const TEXT_CARRIER_UNREACHABLE: &str = "TEXT_CARRIER_UNREACHABLE";
    pub const TEXT_CARRIER_BLOCKED: &str = "TEXT_CARRIER_BLOCKED";
    pub const TEXT_TTL_EXPIRED: &str = "TEXT_TTL_EXPIRED";
    pub const TEXT_UNKNOWN: &str = "TEXT_UNKNOWN";
}

/// Chat provider webhook status values (`statuses[].status`)
pub mod chat_statuses {
    pub const ACCEPTED: &str = "accepted";
    pub const SENT: &str = "sent";
    pub const DELIVERED: &str = "delivered";
    pub const READ: &str = "read";
    pub const FAILED: &str = "failed";

    /// `changes[].field` value carrying message status updates
    pub const MESSAGES_FIELD: &str = "messages";
}

/// Status groupings for validation and logic
pub mod status_groups {
    use super::MessageStatus;

    /// Statuses from which no further transition is accepted
    pub const TERMINAL_STATES: &[MessageStatus] = &[
        MessageStatus::Delivered,
        MessageStatus::Bounced,
        MessageStatus::Rejected,
        MessageStatus::Complained,
        MessageStatus::Failed,
    ];

    /// Statuses a provider event may report
    pub const PROVIDER_REPORTED_STATES: &[MessageStatus] = &[
        MessageStatus::Sent,
        MessageStatus::Delivered,
        MessageStatus::Bounced,
        MessageStatus::Rejected,
        MessageStatus::Complained,
    ];
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::message::{Channel, MessageId};
use crate::error::{CourierError, CourierResult};

/// Where and what to send on one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelTarget {
    pub channel: Channel,
    pub recipient: String,
    /// Origination identity (from-address, origination number, phone number id)
    #[serde(default)]
    pub sender: Option<String>,
    /// Channel-specific content object
    pub content: Value,
}

impl ChannelTarget {
    /// Check that the content object carries what the channel needs
    pub fn validate(&self) -> CourierResult<()> {
        if self.recipient.trim().is_empty() {
            return Err(CourierError::ValidationError(format!(
                "{} target has an empty recipient",
                self.channel
            )));
        }

        let content = self.content.as_object().ok_or_else(|| {
            CourierError::ValidationError(format!(
                "{} content must be a JSON object",
                self.channel
            ))
        })?;

        let has = |key: &str| content.get(key).is_some_and(|v| !v.is_null());

        let valid = match self.channel {
            Channel::Email => has("template") || (has("subject") && (has("text") || has("html"))),
            Channel::Sms | Channel::Chat => has("message"),
        };

        if !valid {
            let expected = match self.channel {
                Channel::Email => "either `template` or `subject` with `text`/`html`",
                Channel::Sms | Channel::Chat => "a `message` field",
            };
            return Err(CourierError::ValidationError(format!(
                "{} content requires {expected}",
                self.channel
            )));
        }

        Ok(())
    }
}

/// Caller's request as received at the ingress boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRequest {
    #[serde(flatten)]
    pub target: ChannelTarget,
    /// Alternate target used when the first send attempt fails
    #[serde(default)]
    pub fallback: Option<ChannelTarget>,
}

/// Queue payload handed to the dispatchers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub message_id: MessageId,
    pub target: ChannelTarget,
    #[serde(default)]
    pub fallback: Option<ChannelTarget>,
    pub submitted_at: DateTime<Utc>,
}

impl Submission {
    pub fn new(message_id: MessageId, request: SubmissionRequest) -> Self {
        Self {
            message_id,
            target: request.target,
            fallback: request.fallback,
            submitted_at: Utc::now(),
        }
    }

    /// Target for the first attempt
    pub fn primary_target(&self) -> &ChannelTarget {
        &self.target
    }

    /// Target for retry attempts: the fallback when present, else the original
    pub fn retry_target(&self) -> &ChannelTarget {
        self.fallback.as_ref().unwrap_or(&self.target)
    }

    pub fn channel(&self) -> Channel {
        self.target.channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn email_target(content: Value) -> ChannelTarget {
        ChannelTarget {
            channel: Channel::Email,
            recipient: "a@b.com".to_string(),
            sender: Some("noreply@example.com".to_string()),
            content,
        }
    }

    #[test]
    fn test_email_content_validation() {
        assert!(email_target(json!({"template": "welcome"})).validate().is_ok());
        assert!(email_target(json!({"subject": "Hi", "text": "hello"}))
            .validate()
            .is_ok());
        assert!(email_target(json!({"subject": "Hi"})).validate().is_err());
        assert!(email_target(json!("plain string")).validate().is_err());
    }

    #[test]
    fn test_empty_recipient_rejected() {
        let target = ChannelTarget {
            channel: Channel::Sms,
            recipient: "  ".to_string(),
            sender: None,
            content: json!({"message": "hi"}),
        };
        assert!(target.validate().is_err());
    }

    #[test]
    fn test_retry_target_prefers_fallback() {
        let fallback = ChannelTarget {
            channel: Channel::Sms,
            recipient: "+15550100".to_string(),
            sender: None,
            content: json!({"message": "hi"}),
        };
        let submission = Submission::new(
            MessageId::from("m-1"),
            SubmissionRequest {
                target: email_target(json!({"template": "welcome"})),
                fallback: Some(fallback.clone()),
            },
        );
        assert_eq!(submission.primary_target().channel, Channel::Email);
        assert_eq!(submission.retry_target(), &fallback);
    }

    #[test]
    fn test_request_deserializes_flattened_target() {
        let request: SubmissionRequest = serde_json::from_value(json!({
            "channel": "email",
            "recipient": "a@b.com",
            "content": {"subject": "Hi", "html": "<p>hi</p>"}
        }))
        .unwrap();
        assert_eq!(request.target.channel, Channel::Email);
        assert!(request.fallback.is_none());
    }
}

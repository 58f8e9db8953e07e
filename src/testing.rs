//! # Test Support
//!
//! Scripted providers and provider-shaped event fixtures shared by unit and
//! integration tests. Nothing here talks to a real provider.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::providers::{ChannelProvider, ProviderError, ProviderReceipt, SendRequest};

#[derive(Debug)]
enum Fallthrough {
    Succeed,
    Fail(ProviderError),
}

/// Provider that replays a script of results, then falls back to a fixed
/// behavior once the script runs out
#[derive(Debug)]
pub struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<Result<ProviderReceipt, ProviderError>>>,
    fallthrough: Fallthrough,
    calls: AtomicUsize,
    requests: Mutex<Vec<SendRequest>>,
}

impl ScriptedProvider {
    fn build(
        name: &str,
        script: Vec<Result<ProviderReceipt, ProviderError>>,
        fallthrough: Fallthrough,
    ) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(script.into()),
            fallthrough,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Accepts every send, returning `"{name}-{n}"` as the provider reference
    pub fn always_succeeding(name: &str) -> Self {
        Self::build(name, Vec::new(), Fallthrough::Succeed)
    }

    pub fn always_failing(name: &str, error: ProviderError) -> Self {
        Self::build(name, Vec::new(), Fallthrough::Fail(error))
    }

    /// Replays `script` in order, succeeding once it is exhausted
    pub fn scripted(name: &str, script: Vec<Result<ProviderReceipt, ProviderError>>) -> Self {
        Self::build(name, script, Fallthrough::Succeed)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<SendRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ChannelProvider for ScriptedProvider {
    async fn send(&self, request: &SendRequest) -> Result<ProviderReceipt, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().push(request.clone());

        if let Some(scripted) = self.script.lock().pop_front() {
            return scripted;
        }
        match &self.fallthrough {
            Fallthrough::Succeed => Ok(ProviderReceipt::with_ref(format!("{}-{n}", self.name))),
            Fallthrough::Fail(error) => Err(error.clone()),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Email provider event tagged the way outbound sends are tagged
pub fn email_event(event_type: &str, message_id: &str) -> Value {
    json!({
        "eventType": event_type,
        "mail": {
            "messageId": format!("ses-{message_id}"),
            "tags": {
                "message_type": ["primary"],
                "message_id": [message_id]
            }
        }
    })
}

/// SMS provider event carrying the caller context set at send time
pub fn sms_event(event_type: &str, message_id: &str) -> Value {
    json!({
        "eventType": event_type,
        "messageId": format!("sms-{message_id}"),
        "context": {
            "message_type": "primary",
            "message_id": message_id
        }
    })
}

/// Chat webhook event; the entry travels as a JSON-encoded string
pub fn chat_event(status: &str, network_id: &str, receipt: Option<&str>) -> Value {
    let entry = json!({
        "id": "account-1",
        "changes": [{
            "field": "messages",
            "value": {"statuses": [{"id": network_id, "status": status}]}
        }]
    });
    let mut event = json!({ "webhookEntry": entry.to_string() });
    if let Some(receipt) = receipt {
        event["messageId"] = json!(receipt);
    }
    event
}

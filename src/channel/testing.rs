//! Scripted in-memory channel for exercising the orchestration pipeline.
//!
//! Tests queue responses per command, observe what was sent, and inject
//! push events at the exact interleaving they want to exercise.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use super::{Channel, ChannelError, EVENT_BUFFER};

/// One request observed by the scripted channel.
#[derive(Debug, Clone)]
pub struct SentRequest {
    pub command: String,
    pub params: Value,
    pub session_id: Option<String>,
}

#[derive(Default)]
pub struct ScriptedChannel {
    responses: Mutex<HashMap<String, VecDeque<Result<Value, String>>>>,
    sent: Mutex<Vec<SentRequest>>,
    events: Mutex<HashMap<String, broadcast::Sender<Value>>>,
}

impl ScriptedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next successful response for `command`.
    pub fn respond(&self, command: &str, response: Value) {
        self.responses
            .lock()
            .unwrap()
            .entry(command.to_string())
            .or_default()
            .push_back(Ok(response));
    }

    /// Queue the next response for `command` as a rejection.
    pub fn respond_err(&self, command: &str, message: &str) {
        self.responses
            .lock()
            .unwrap()
            .entry(command.to_string())
            .or_default()
            .push_back(Err(message.to_string()));
    }

    /// Deliver a push event to current subscribers of `event`.
    pub fn push_event(&self, event: &str, payload: Value) {
        let sender = self.events.lock().unwrap().get(event).cloned();
        if let Some(sender) = sender {
            let _ = sender.send(payload);
        }
    }

    /// Every request sent so far, in order.
    pub fn sent(&self) -> Vec<SentRequest> {
        self.sent.lock().unwrap().clone()
    }

    /// How many times `command` was sent.
    pub fn sent_count(&self, command: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|request| request.command == command)
            .count()
    }
}

#[async_trait]
impl Channel for ScriptedChannel {
    async fn send(
        &self,
        command: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<Value, ChannelError> {
        self.sent.lock().unwrap().push(SentRequest {
            command: command.to_string(),
            params,
            session_id: session_id.map(str::to_string),
        });

        let next = self
            .responses
            .lock()
            .unwrap()
            .get_mut(command)
            .and_then(|queue| queue.pop_front());
        match next {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(ChannelError::Rejected {
                command: command.to_string(),
                message,
            }),
            None => Err(ChannelError::Rejected {
                command: command.to_string(),
                message: "no scripted response".to_string(),
            }),
        }
    }

    fn subscribe(&self, event: &str) -> broadcast::Receiver<Value> {
        self.events
            .lock()
            .unwrap()
            .entry(event.to_string())
            .or_insert_with(|| broadcast::channel(EVENT_BUFFER).0)
            .subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_scripted_responses_pop_in_order() {
        let channel = ScriptedChannel::new();
        channel.respond("cmd", json!({"n": 1}));
        channel.respond("cmd", json!({"n": 2}));

        assert_eq!(
            channel.send("cmd", json!({}), None).await.unwrap(),
            json!({"n": 1})
        );
        assert_eq!(
            channel.send("cmd", json!({}), Some("s1")).await.unwrap(),
            json!({"n": 2})
        );
        assert!(channel.send("cmd", json!({}), None).await.is_err());

        let sent = channel.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[1].session_id.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn test_push_event_reaches_subscriber() {
        let channel = ScriptedChannel::new();
        let mut receiver = channel.subscribe("evt");
        channel.push_event("evt", json!({"k": "v"}));
        assert_eq!(receiver.try_recv().unwrap(), json!({"k": "v"}));
    }
}

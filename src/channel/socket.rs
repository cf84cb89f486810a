//! WebSocket implementation of the channel contract.
//!
//! Requests are JSON frames carrying a monotonically increasing id; the
//! service answers each with a frame quoting the same id. Frames without an
//! id are push events, fanned out to per-event-name broadcast channels.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use super::{Channel, ChannelError, EVENT_BUFFER};

/// Outbound request frame.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestFrame<'a> {
    id: u64,
    method: &'a str,
    params: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
}

/// Inbound frame: a response when `id` is present, a push event otherwise.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InboundFrame {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<WireError>,
    #[serde(default)]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    code: i64,
    message: String,
}

struct PendingRequest {
    command: String,
    reply: oneshot::Sender<Result<Value, ChannelError>>,
}

type PendingMap = Arc<Mutex<HashMap<u64, PendingRequest>>>;
type EventMap = Arc<Mutex<HashMap<String, broadcast::Sender<Value>>>>;

/// Channel adapter speaking JSON over one WebSocket connection.
pub struct SocketChannel {
    next_id: AtomicU64,
    outbound: mpsc::UnboundedSender<Message>,
    pending: PendingMap,
    events: EventMap,
    timeout: Duration,
}

impl SocketChannel {
    /// Connect to the service and spawn the reader/writer tasks.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, ChannelError> {
        let (stream, _) = connect_async(url).await.map_err(|err| ChannelError::Connect {
            url: url.to_string(),
            reason: err.to_string(),
        })?;
        debug!("connected to {url}");
        let (mut sink, mut source) = stream.split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if sink.send(frame).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let events: EventMap = Arc::new(Mutex::new(HashMap::new()));
        let reader_pending = Arc::clone(&pending);
        let reader_events = Arc::clone(&events);
        tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        dispatch_frame(&text, &reader_pending, &reader_events);
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            fail_pending(&reader_pending);
        });

        Ok(Self {
            next_id: AtomicU64::new(1),
            outbound,
            pending,
            events,
            timeout,
        })
    }
}

#[async_trait]
impl Channel for SocketChannel {
    async fn send(
        &self,
        command: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<Value, ChannelError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        lock(&self.pending).insert(
            id,
            PendingRequest {
                command: command.to_string(),
                reply: reply_tx,
            },
        );

        let frame = RequestFrame {
            id,
            method: command,
            params: &params,
            session_id,
        };
        let text = serde_json::to_string(&frame).expect("request frames serialize");
        if self.outbound.send(Message::Text(text)).is_err() {
            lock(&self.pending).remove(&id);
            return Err(ChannelError::Closed {
                command: command.to_string(),
            });
        }

        match tokio::time::timeout(self.timeout, reply_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ChannelError::Closed {
                command: command.to_string(),
            }),
            Err(_) => {
                lock(&self.pending).remove(&id);
                Err(ChannelError::Timeout {
                    command: command.to_string(),
                    seconds: self.timeout.as_secs(),
                })
            }
        }
    }

    fn subscribe(&self, event: &str) -> broadcast::Receiver<Value> {
        lock(&self.events)
            .entry(event.to_string())
            .or_insert_with(|| broadcast::channel(EVENT_BUFFER).0)
            .subscribe()
    }
}

/// Route one inbound frame to its pending request or event subscribers.
fn dispatch_frame(text: &str, pending: &PendingMap, events: &EventMap) {
    let frame: InboundFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            warn!("discarding unparseable frame: {err}");
            return;
        }
    };

    if let Some(id) = frame.id {
        let entry = lock(pending).remove(&id);
        match entry {
            Some(request) => {
                let outcome = match frame.error {
                    Some(wire) => Err(ChannelError::Rejected {
                        command: request.command,
                        message: format!("{} (code {})", wire.message, wire.code),
                    }),
                    None => Ok(frame.result.unwrap_or(Value::Null)),
                };
                let _ = request.reply.send(outcome);
            }
            None => debug!("response for unknown request id {id}"),
        }
    } else if let Some(method) = frame.method {
        let sender = lock(events).get(&method).cloned();
        match sender {
            Some(sender) => {
                let _ = sender.send(frame.params.unwrap_or(Value::Null));
            }
            None => debug!("no subscribers for {method}"),
        }
    }
}

/// The connection is gone; fail every request still waiting on it.
fn fail_pending(pending: &PendingMap) {
    for (_, request) in lock(pending).drain() {
        let PendingRequest { command, reply } = request;
        let _ = reply.send(Err(ChannelError::Closed { command }));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().expect("channel state mutex poisoned")
}
